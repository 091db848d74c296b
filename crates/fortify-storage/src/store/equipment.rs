use anyhow::Result;
use chrono::{DateTime, Utc};
use fortify_common::models::Equipment;
use fortify_common::types::EquipmentStatus;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, TransactionTrait,
};
use serde_json::json;

use crate::entities::equipment::{self, Column, Entity};
use crate::store::{now, parse_enum, record_audit, utc, Actor, FortifyStore};

pub struct NewEquipment {
    pub mill_id: String,
    pub name: String,
    pub equipment_type: String,
    pub manufacturer: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub installed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct EquipmentUpdate {
    pub name: Option<String>,
    pub equipment_type: Option<String>,
    pub manufacturer: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub status: Option<EquipmentStatus>,
    pub installed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct EquipmentFilter {
    pub mill_id: Option<String>,
    pub status: Option<EquipmentStatus>,
    pub equipment_type: Option<String>,
}

pub(crate) fn to_equipment(m: equipment::Model) -> Result<Equipment> {
    Ok(Equipment {
        status: parse_enum("equipment.status", &m.status)?,
        id: m.id,
        mill_id: m.mill_id,
        name: m.name,
        equipment_type: m.equipment_type,
        manufacturer: m.manufacturer,
        model_number: m.model_number,
        serial_number: m.serial_number,
        installed_at: m.installed_at.map(utc),
        last_maintenance_at: m.last_maintenance_at.map(utc),
        created_at: utc(m.created_at),
        updated_at: utc(m.updated_at),
    })
}

fn filtered(filter: &EquipmentFilter) -> Select<Entity> {
    let mut q = Entity::find();
    if let Some(mill_id) = &filter.mill_id {
        q = q.filter(Column::MillId.eq(mill_id.as_str()));
    }
    if let Some(status) = filter.status {
        q = q.filter(Column::Status.eq(status.as_str()));
    }
    if let Some(kind) = &filter.equipment_type {
        q = q.filter(Column::EquipmentType.eq(kind.as_str()));
    }
    q
}

impl FortifyStore {
    pub async fn create_equipment(&self, new: NewEquipment, actor: &Actor) -> Result<Equipment> {
        let now = now();
        let txn = self.db().begin().await?;
        let am = equipment::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            mill_id: Set(new.mill_id),
            name: Set(new.name),
            equipment_type: Set(new.equipment_type),
            manufacturer: Set(new.manufacturer),
            model_number: Set(new.model_number),
            serial_number: Set(new.serial_number),
            status: Set(EquipmentStatus::Operational.as_str().to_owned()),
            installed_at: Set(new.installed_at.map(|t| t.fixed_offset())),
            last_maintenance_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(&txn).await?;
        record_audit(
            &txn,
            actor,
            "CREATE",
            "equipment",
            &model.id,
            Some(json!({ "mill_id": model.mill_id, "name": model.name })),
        )
        .await?;
        txn.commit().await?;
        to_equipment(model)
    }

    pub async fn get_equipment(&self, id: &str) -> Result<Option<Equipment>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_equipment).transpose()
    }

    pub async fn list_equipment(
        &self,
        filter: &EquipmentFilter,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Equipment>> {
        let rows = filtered(filter)
            .order_by(Column::CreatedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_equipment).collect()
    }

    pub async fn count_equipment(&self, filter: &EquipmentFilter) -> Result<u64> {
        Ok(filtered(filter).count(self.db()).await?)
    }

    pub async fn update_equipment(
        &self,
        id: &str,
        update: EquipmentUpdate,
        actor: &Actor,
    ) -> Result<Option<Equipment>> {
        let txn = self.db().begin().await?;
        let Some(m) = Entity::find_by_id(id).one(&txn).await? else {
            return Ok(None);
        };
        let mut am: equipment::ActiveModel = m.into();
        if let Some(name) = &update.name {
            am.name = Set(name.clone());
        }
        if let Some(kind) = &update.equipment_type {
            am.equipment_type = Set(kind.clone());
        }
        if let Some(v) = &update.manufacturer {
            am.manufacturer = Set(Some(v.clone()));
        }
        if let Some(v) = &update.model_number {
            am.model_number = Set(Some(v.clone()));
        }
        if let Some(v) = &update.serial_number {
            am.serial_number = Set(Some(v.clone()));
        }
        if let Some(status) = update.status {
            am.status = Set(status.as_str().to_owned());
        }
        if let Some(at) = update.installed_at {
            am.installed_at = Set(Some(at.fixed_offset()));
        }
        am.updated_at = Set(now());
        let updated = am.update(&txn).await?;
        record_audit(
            &txn,
            actor,
            "UPDATE",
            "equipment",
            id,
            Some(json!({ "name": update.name, "status": update.status })),
        )
        .await?;
        txn.commit().await?;
        Ok(Some(to_equipment(updated)?))
    }

    pub async fn delete_equipment(&self, id: &str, actor: &Actor) -> Result<bool> {
        let txn = self.db().begin().await?;
        let res = Entity::delete_by_id(id).exec(&txn).await?;
        if res.rows_affected == 0 {
            return Ok(false);
        }
        record_audit(&txn, actor, "DELETE", "equipment", id, None).await?;
        txn.commit().await?;
        Ok(true)
    }
}
