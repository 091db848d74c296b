use anyhow::Result;
use chrono::{DateTime, Utc};
use fortify_analytics::predictive::SensorThresholds;
use fortify_analytics::threshold::ThresholdBreach;
use fortify_common::models::{IotSensor, SensorAlert, SensorReading};
use fortify_common::types::{AlertStatus, Role};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, TransactionTrait,
};
use serde_json::json;

use crate::entities::{alert, iot_sensor, sensor_alert, sensor_reading};
use crate::error::StorageError;
use crate::store::{now, parse_enum, record_audit, utc, Actor, FortifyStore};

pub struct NewSensor {
    pub equipment_id: String,
    pub mill_id: String,
    pub name: String,
    pub sensor_type: String,
    pub unit: String,
    pub min_threshold: Option<f64>,
    pub max_threshold: Option<f64>,
    pub critical_threshold: Option<f64>,
    pub calibration_date: Option<DateTime<Utc>>,
    pub next_calibration_date: Option<DateTime<Utc>>,
}

/// `Some(None)` clears a threshold.
#[derive(Debug, Clone, Default)]
pub struct SensorUpdate {
    pub name: Option<String>,
    pub unit: Option<String>,
    pub min_threshold: Option<Option<f64>>,
    pub max_threshold: Option<Option<f64>>,
    pub critical_threshold: Option<Option<f64>>,
    pub calibration_date: Option<DateTime<Utc>>,
    pub next_calibration_date: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct SensorFilter {
    pub mill_id: Option<String>,
    pub equipment_id: Option<String>,
    pub sensor_type: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct SensorAlertFilter {
    pub mill_id: Option<String>,
    pub sensor_id: Option<String>,
    pub is_resolved: Option<bool>,
}

/// Threshold view of a sensor record.
pub trait IotSensorExt {
    fn thresholds(&self) -> SensorThresholds;
}

impl IotSensorExt for IotSensor {
    fn thresholds(&self) -> SensorThresholds {
        SensorThresholds {
            min: self.min_threshold,
            max: self.max_threshold,
            critical: self.critical_threshold,
        }
    }
}

fn to_sensor(m: iot_sensor::Model) -> IotSensor {
    IotSensor {
        id: m.id,
        equipment_id: m.equipment_id,
        mill_id: m.mill_id,
        name: m.name,
        sensor_type: m.sensor_type,
        unit: m.unit,
        min_threshold: m.min_threshold,
        max_threshold: m.max_threshold,
        critical_threshold: m.critical_threshold,
        calibration_date: m.calibration_date.map(utc),
        next_calibration_date: m.next_calibration_date.map(utc),
        is_active: m.is_active,
        created_at: utc(m.created_at),
        updated_at: utc(m.updated_at),
    }
}

fn to_reading(m: sensor_reading::Model) -> SensorReading {
    SensorReading {
        id: m.id,
        sensor_id: m.sensor_id,
        value: m.value,
        recorded_at: utc(m.recorded_at),
        created_at: utc(m.created_at),
    }
}

fn to_sensor_alert(m: sensor_alert::Model) -> Result<SensorAlert> {
    Ok(SensorAlert {
        alert_type: parse_enum("sensor_alerts.alert_type", &m.alert_type)?,
        severity: parse_enum("sensor_alerts.severity", &m.severity)?,
        id: m.id,
        sensor_id: m.sensor_id,
        equipment_id: m.equipment_id,
        mill_id: m.mill_id,
        value: m.value,
        threshold: m.threshold,
        message: m.message,
        is_resolved: m.is_resolved,
        resolved_by: m.resolved_by,
        resolved_at: m.resolved_at.map(utc),
        created_at: utc(m.created_at),
    })
}

fn filtered(filter: &SensorFilter) -> Select<iot_sensor::Entity> {
    use iot_sensor::Column;
    let mut q = iot_sensor::Entity::find();
    if let Some(mill_id) = &filter.mill_id {
        q = q.filter(Column::MillId.eq(mill_id.as_str()));
    }
    if let Some(equipment_id) = &filter.equipment_id {
        q = q.filter(Column::EquipmentId.eq(equipment_id.as_str()));
    }
    if let Some(kind) = &filter.sensor_type {
        q = q.filter(Column::SensorType.eq(kind.as_str()));
    }
    if let Some(active) = filter.is_active {
        q = q.filter(Column::IsActive.eq(active));
    }
    q
}

fn readings_in_range(
    sensor_id: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Select<sensor_reading::Entity> {
    use sensor_reading::Column;
    let mut q = sensor_reading::Entity::find().filter(Column::SensorId.eq(sensor_id));
    if let Some(from) = from {
        q = q.filter(Column::RecordedAt.gte(from.fixed_offset()));
    }
    if let Some(to) = to {
        q = q.filter(Column::RecordedAt.lte(to.fixed_offset()));
    }
    q
}

fn alerts_filtered(filter: &SensorAlertFilter) -> Select<sensor_alert::Entity> {
    use sensor_alert::Column;
    let mut q = sensor_alert::Entity::find();
    if let Some(mill_id) = &filter.mill_id {
        q = q.filter(Column::MillId.eq(mill_id.as_str()));
    }
    if let Some(sensor_id) = &filter.sensor_id {
        q = q.filter(Column::SensorId.eq(sensor_id.as_str()));
    }
    if let Some(resolved) = filter.is_resolved {
        q = q.filter(Column::IsResolved.eq(resolved));
    }
    q
}

impl FortifyStore {
    pub async fn create_sensor(&self, new: NewSensor, actor: &Actor) -> Result<IotSensor> {
        let now = now();
        let txn = self.db().begin().await?;
        let am = iot_sensor::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            equipment_id: Set(new.equipment_id),
            mill_id: Set(new.mill_id),
            name: Set(new.name),
            sensor_type: Set(new.sensor_type),
            unit: Set(new.unit),
            min_threshold: Set(new.min_threshold),
            max_threshold: Set(new.max_threshold),
            critical_threshold: Set(new.critical_threshold),
            calibration_date: Set(new.calibration_date.map(|t| t.fixed_offset())),
            next_calibration_date: Set(new.next_calibration_date.map(|t| t.fixed_offset())),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(&txn).await?;
        record_audit(
            &txn,
            actor,
            "CREATE",
            "iot_sensor",
            &model.id,
            Some(json!({ "equipment_id": model.equipment_id, "sensor_type": model.sensor_type })),
        )
        .await?;
        txn.commit().await?;
        Ok(to_sensor(model))
    }

    pub async fn get_sensor(&self, id: &str) -> Result<Option<IotSensor>> {
        let model = iot_sensor::Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(to_sensor))
    }

    pub async fn list_sensors(&self, filter: &SensorFilter, limit: u64, offset: u64) -> Result<Vec<IotSensor>> {
        let rows = filtered(filter)
            .order_by(iot_sensor::Column::CreatedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_sensor).collect())
    }

    pub async fn count_sensors(&self, filter: &SensorFilter) -> Result<u64> {
        Ok(filtered(filter).count(self.db()).await?)
    }

    pub async fn update_sensor(&self, id: &str, update: SensorUpdate, actor: &Actor) -> Result<Option<IotSensor>> {
        let txn = self.db().begin().await?;
        let Some(m) = iot_sensor::Entity::find_by_id(id).one(&txn).await? else {
            return Ok(None);
        };
        let mut am: iot_sensor::ActiveModel = m.into();
        if let Some(name) = &update.name {
            am.name = Set(name.clone());
        }
        if let Some(unit) = &update.unit {
            am.unit = Set(unit.clone());
        }
        if let Some(v) = update.min_threshold {
            am.min_threshold = Set(v);
        }
        if let Some(v) = update.max_threshold {
            am.max_threshold = Set(v);
        }
        if let Some(v) = update.critical_threshold {
            am.critical_threshold = Set(v);
        }
        if let Some(at) = update.calibration_date {
            am.calibration_date = Set(Some(at.fixed_offset()));
        }
        if let Some(at) = update.next_calibration_date {
            am.next_calibration_date = Set(Some(at.fixed_offset()));
        }
        if let Some(active) = update.is_active {
            am.is_active = Set(active);
        }
        am.updated_at = Set(now());
        let updated = am.update(&txn).await?;
        record_audit(
            &txn,
            actor,
            "UPDATE",
            "iot_sensor",
            id,
            Some(json!({
                "min_threshold": update.min_threshold,
                "max_threshold": update.max_threshold,
                "critical_threshold": update.critical_threshold,
                "is_active": update.is_active,
            })),
        )
        .await?;
        txn.commit().await?;
        Ok(Some(to_sensor(updated)))
    }

    /// Appends a reading. A breach also records a sensor alert, a portal alert
    /// for the mill's managers and an audit-log row, all in one transaction.
    pub async fn append_reading(
        &self,
        sensor: &IotSensor,
        value: f64,
        recorded_at: DateTime<Utc>,
        breach: Option<&ThresholdBreach>,
        actor: &Actor,
    ) -> Result<(SensorReading, Option<SensorAlert>)> {
        let now = now();
        let txn = self.db().begin().await?;
        let reading = sensor_reading::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            sensor_id: Set(sensor.id.clone()),
            value: Set(value),
            recorded_at: Set(recorded_at.fixed_offset()),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut raised = None;
        if let Some(breach) = breach {
            let sensor_alert = sensor_alert::ActiveModel {
                id: Set(fortify_common::id::next_id()),
                sensor_id: Set(sensor.id.clone()),
                equipment_id: Set(sensor.equipment_id.clone()),
                mill_id: Set(sensor.mill_id.clone()),
                alert_type: Set(breach.alert_type.as_str().to_owned()),
                severity: Set(breach.severity.as_str().to_owned()),
                value: Set(value),
                threshold: Set(breach.threshold),
                message: Set(breach.message.clone()),
                is_resolved: Set(false),
                resolved_by: Set(None),
                resolved_at: Set(None),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;

            let metadata = json!({
                "sensor_id": sensor.id,
                "sensor_alert_id": sensor_alert.id,
                "equipment_id": sensor.equipment_id,
                "value": value,
                "threshold": breach.threshold,
                "alert_type": breach.alert_type,
            });
            alert::ActiveModel {
                id: Set(fortify_common::id::next_id()),
                alert_type: Set("SENSOR_THRESHOLD".to_owned()),
                severity: Set(breach.severity.as_str().to_owned()),
                status: Set(AlertStatus::Pending.as_str().to_owned()),
                title: Set(format!("Sensor threshold breached: {}", sensor.name)),
                message: Set(breach.message.clone()),
                recipient_id: Set(None),
                recipient_role: Set(Some(Role::MillManager.as_str().to_owned())),
                mill_id: Set(Some(sensor.mill_id.clone())),
                metadata: Set(Some(metadata.to_string())),
                read_at: Set(None),
                acknowledged_at: Set(None),
                resolved_at: Set(None),
                resolved_by: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;

            record_audit(
                &txn,
                actor,
                "SENSOR_THRESHOLD_BREACH",
                "iot_sensor",
                &sensor.id,
                Some(metadata),
            )
            .await?;
            tracing::warn!(
                sensor_id = %sensor.id,
                mill_id = %sensor.mill_id,
                value,
                threshold = breach.threshold,
                alert_type = %breach.alert_type,
                "Sensor threshold breached"
            );
            raised = Some(to_sensor_alert(sensor_alert)?);
        }

        txn.commit().await?;
        Ok((to_reading(reading), raised))
    }

    /// Newest first.
    pub async fn list_readings(
        &self,
        sensor_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<SensorReading>> {
        let rows = readings_in_range(sensor_id, from, to)
            .order_by(sensor_reading::Column::RecordedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_reading).collect())
    }

    pub async fn count_readings(
        &self,
        sensor_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        Ok(readings_in_range(sensor_id, from, to).count(self.db()).await?)
    }

    /// Every reading since `since`, oldest first.
    pub async fn readings_since(&self, sensor_id: &str, since: DateTime<Utc>) -> Result<Vec<SensorReading>> {
        let rows = readings_in_range(sensor_id, Some(since), None)
            .order_by(sensor_reading::Column::RecordedAt, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_reading).collect())
    }

    pub async fn list_sensor_alerts(
        &self,
        filter: &SensorAlertFilter,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<SensorAlert>> {
        let rows = alerts_filtered(filter)
            .order_by(sensor_alert::Column::CreatedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_sensor_alert).collect()
    }

    pub async fn count_sensor_alerts(&self, filter: &SensorAlertFilter) -> Result<u64> {
        Ok(alerts_filtered(filter).count(self.db()).await?)
    }

    pub async fn get_sensor_alert(&self, id: &str) -> Result<Option<SensorAlert>> {
        let model = sensor_alert::Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_sensor_alert).transpose()
    }

    pub async fn resolve_sensor_alert(&self, id: &str, actor: &Actor) -> Result<Option<SensorAlert>> {
        let txn = self.db().begin().await?;
        let Some(m) = sensor_alert::Entity::find_by_id(id).one(&txn).await? else {
            return Ok(None);
        };
        if m.is_resolved {
            return Err(StorageError::InvalidState("sensor alert is already resolved".into()).into());
        }
        let mut am: sensor_alert::ActiveModel = m.into();
        am.is_resolved = Set(true);
        am.resolved_by = Set(actor.user_id.clone());
        am.resolved_at = Set(Some(now()));
        let updated = am.update(&txn).await?;
        record_audit(&txn, actor, "RESOLVE", "sensor_alert", id, None).await?;
        txn.commit().await?;
        Ok(Some(to_sensor_alert(updated)?))
    }
}
