use anyhow::Result;
use fortify_common::models::Mill;
use fortify_common::types::MillStatus;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, TransactionTrait,
};
use serde_json::json;

use crate::entities::mill::{self, Column, Entity};
use crate::store::{conflict_on_unique, now, parse_enum, record_audit, utc, Actor, FortifyStore};

pub struct NewMill {
    pub name: String,
    pub code: String,
    pub region: String,
    pub country: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MillUpdate {
    pub name: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub address: Option<String>,
    pub status: Option<MillStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct MillFilter {
    pub name_contains: Option<String>,
    pub region: Option<String>,
    pub status: Option<MillStatus>,
    /// Restricts the list to one mill (mill roles)
    pub id: Option<String>,
}

fn to_mill(m: mill::Model) -> Result<Mill> {
    Ok(Mill {
        status: parse_enum("mills.status", &m.status)?,
        id: m.id,
        name: m.name,
        code: m.code,
        region: m.region,
        country: m.country,
        address: m.address,
        created_at: utc(m.created_at),
        updated_at: utc(m.updated_at),
    })
}

fn filtered(filter: &MillFilter) -> Select<Entity> {
    let mut q = Entity::find();
    if let Some(name) = &filter.name_contains {
        q = q.filter(Column::Name.contains(name.as_str()));
    }
    if let Some(region) = &filter.region {
        q = q.filter(Column::Region.eq(region.as_str()));
    }
    if let Some(status) = filter.status {
        q = q.filter(Column::Status.eq(status.as_str()));
    }
    if let Some(id) = &filter.id {
        q = q.filter(Column::Id.eq(id.as_str()));
    }
    q
}

impl FortifyStore {
    pub async fn create_mill(&self, new: NewMill, actor: &Actor) -> Result<Mill> {
        let now = now();
        let txn = self.db().begin().await?;
        let am = mill::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            name: Set(new.name),
            code: Set(new.code.trim().to_uppercase()),
            region: Set(new.region),
            country: Set(new.country),
            address: Set(new.address),
            status: Set(MillStatus::Active.as_str().to_owned()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am
            .insert(&txn)
            .await
            .map_err(|e| conflict_on_unique(e, "a mill with this code already exists"))?;
        record_audit(
            &txn,
            actor,
            "CREATE",
            "mill",
            &model.id,
            Some(json!({ "code": model.code, "name": model.name })),
        )
        .await?;
        txn.commit().await?;
        to_mill(model)
    }

    pub async fn get_mill(&self, id: &str) -> Result<Option<Mill>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_mill).transpose()
    }

    pub async fn list_mills(&self, filter: &MillFilter, limit: u64, offset: u64) -> Result<Vec<Mill>> {
        let rows = filtered(filter)
            .order_by(Column::Name, Order::Asc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_mill).collect()
    }

    pub async fn count_mills(&self, filter: &MillFilter) -> Result<u64> {
        Ok(filtered(filter).count(self.db()).await?)
    }

    pub async fn update_mill(&self, id: &str, update: MillUpdate, actor: &Actor) -> Result<Option<Mill>> {
        let txn = self.db().begin().await?;
        let Some(m) = Entity::find_by_id(id).one(&txn).await? else {
            return Ok(None);
        };
        let mut am: mill::ActiveModel = m.into();
        if let Some(name) = &update.name {
            am.name = Set(name.clone());
        }
        if let Some(region) = &update.region {
            am.region = Set(region.clone());
        }
        if let Some(country) = &update.country {
            am.country = Set(country.clone());
        }
        if let Some(address) = &update.address {
            am.address = Set(Some(address.clone()));
        }
        if let Some(status) = update.status {
            am.status = Set(status.as_str().to_owned());
        }
        am.updated_at = Set(now());
        let updated = am.update(&txn).await?;
        record_audit(
            &txn,
            actor,
            "UPDATE",
            "mill",
            id,
            Some(json!({
                "name": update.name,
                "region": update.region,
                "country": update.country,
                "status": update.status,
            })),
        )
        .await?;
        txn.commit().await?;
        Ok(Some(to_mill(updated)?))
    }
}
