use anyhow::Result;
use chrono::{DateTime, Utc};
use fortify_common::models::{DeliveryStop, DeliveryTrip, GeoPoint, TripTrackingPoint};
use fortify_common::types::{StatusTransition, TripStatus};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, TransactionTrait,
};
use serde_json::json;

use crate::entities::{delivery_trip, trip_tracking};
use crate::error::StorageError;
use crate::store::{from_json, now, parse_enum, record_audit, to_json, utc, Actor, FortifyStore};

pub struct NewTrip {
    pub rfp_id: Option<String>,
    pub mill_id: String,
    pub driver_id: Option<String>,
    pub vehicle_number: String,
    pub origin: String,
    pub destination: String,
    pub delivery_sequence: Vec<DeliveryStop>,
    pub created_by: String,
}

#[derive(Debug, Clone, Default)]
pub struct TripUpdate {
    pub status: Option<TripStatus>,
    /// `Some(None)` unassigns the driver
    pub driver_id: Option<Option<String>>,
    pub vehicle_number: Option<String>,
    pub delivery_sequence: Option<Vec<DeliveryStop>>,
}

#[derive(Debug, Clone, Default)]
pub struct TripFilter {
    pub mill_id: Option<String>,
    pub driver_id: Option<String>,
    pub rfp_id: Option<String>,
    pub status: Option<TripStatus>,
}

pub struct NewTrackingPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: Option<f64>,
    pub heading: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

fn to_trip(m: delivery_trip::Model) -> Result<DeliveryTrip> {
    Ok(DeliveryTrip {
        status: parse_enum("delivery_trips.status", &m.status)?,
        current_location: m
            .current_location
            .as_deref()
            .map(|t| from_json("delivery_trips.current_location", t))
            .transpose()?,
        delivery_sequence: from_json("delivery_trips.delivery_sequence", &m.delivery_sequence)?,
        id: m.id,
        rfp_id: m.rfp_id,
        mill_id: m.mill_id,
        driver_id: m.driver_id,
        vehicle_number: m.vehicle_number,
        origin: m.origin,
        destination: m.destination,
        departed_at: m.departed_at.map(utc),
        arrived_at: m.arrived_at.map(utc),
        created_by: m.created_by,
        created_at: utc(m.created_at),
        updated_at: utc(m.updated_at),
    })
}

fn to_point(m: trip_tracking::Model) -> TripTrackingPoint {
    TripTrackingPoint {
        id: m.id,
        trip_id: m.trip_id,
        latitude: m.latitude,
        longitude: m.longitude,
        speed_kmh: m.speed_kmh,
        heading: m.heading,
        recorded_at: utc(m.recorded_at),
    }
}

fn filtered(filter: &TripFilter) -> Select<delivery_trip::Entity> {
    use delivery_trip::Column;
    let mut q = delivery_trip::Entity::find();
    if let Some(mill_id) = &filter.mill_id {
        q = q.filter(Column::MillId.eq(mill_id.as_str()));
    }
    if let Some(driver_id) = &filter.driver_id {
        q = q.filter(Column::DriverId.eq(driver_id.as_str()));
    }
    if let Some(rfp_id) = &filter.rfp_id {
        q = q.filter(Column::RfpId.eq(rfp_id.as_str()));
    }
    if let Some(status) = filter.status {
        q = q.filter(Column::Status.eq(status.as_str()));
    }
    q
}

/// Applies a validated status change and stamps departure/arrival times.
fn apply_status(
    am: &mut delivery_trip::ActiveModel,
    current: TripStatus,
    next: TripStatus,
    at: DateTimeWithTimeZone,
) -> Result<TripStatus> {
    let next = current.transition_to(next).map_err(StorageError::from)?;
    am.status = Set(next.as_str().to_owned());
    match next {
        TripStatus::InTransit => am.departed_at = Set(Some(at)),
        TripStatus::Delivered => am.arrived_at = Set(Some(at)),
        _ => {}
    }
    Ok(next)
}

impl FortifyStore {
    pub async fn create_trip(&self, new: NewTrip, actor: &Actor) -> Result<DeliveryTrip> {
        let now = now();
        let txn = self.db().begin().await?;
        let am = delivery_trip::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            rfp_id: Set(new.rfp_id),
            mill_id: Set(new.mill_id),
            driver_id: Set(new.driver_id),
            vehicle_number: Set(new.vehicle_number),
            origin: Set(new.origin),
            destination: Set(new.destination),
            status: Set(TripStatus::Scheduled.as_str().to_owned()),
            current_location: Set(None),
            delivery_sequence: Set(to_json("delivery_trips.delivery_sequence", &new.delivery_sequence)?),
            departed_at: Set(None),
            arrived_at: Set(None),
            created_by: Set(new.created_by),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(&txn).await?;
        record_audit(
            &txn,
            actor,
            "CREATE",
            "delivery_trip",
            &model.id,
            Some(json!({
                "mill_id": model.mill_id,
                "vehicle_number": model.vehicle_number,
                "stops": new.delivery_sequence.len(),
            })),
        )
        .await?;
        txn.commit().await?;
        to_trip(model)
    }

    pub async fn get_trip(&self, id: &str) -> Result<Option<DeliveryTrip>> {
        let model = delivery_trip::Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_trip).transpose()
    }

    pub async fn list_trips(&self, filter: &TripFilter, limit: u64, offset: u64) -> Result<Vec<DeliveryTrip>> {
        let rows = filtered(filter)
            .order_by(delivery_trip::Column::CreatedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_trip).collect()
    }

    pub async fn count_trips(&self, filter: &TripFilter) -> Result<u64> {
        Ok(filtered(filter).count(self.db()).await?)
    }

    pub async fn update_trip(&self, id: &str, update: TripUpdate, actor: &Actor) -> Result<Option<DeliveryTrip>> {
        let now = now();
        let txn = self.db().begin().await?;
        let Some(m) = delivery_trip::Entity::find_by_id(id).one(&txn).await? else {
            return Ok(None);
        };
        let current: TripStatus = parse_enum("delivery_trips.status", &m.status)?;
        let mut am: delivery_trip::ActiveModel = m.into();
        if let Some(next) = update.status {
            if next != current {
                apply_status(&mut am, current, next, now)?;
            }
        }
        if let Some(driver) = &update.driver_id {
            am.driver_id = Set(driver.clone());
        }
        if let Some(vehicle) = &update.vehicle_number {
            am.vehicle_number = Set(vehicle.clone());
        }
        if let Some(stops) = &update.delivery_sequence {
            am.delivery_sequence = Set(to_json("delivery_trips.delivery_sequence", stops)?);
        }
        am.updated_at = Set(now);
        let updated = am.update(&txn).await?;
        record_audit(
            &txn,
            actor,
            "UPDATE",
            "delivery_trip",
            id,
            Some(json!({
                "from_status": current,
                "status": update.status,
                "driver_id": update.driver_id,
            })),
        )
        .await?;
        txn.commit().await?;
        Ok(Some(to_trip(updated)?))
    }

    /// Appends a GPS breadcrumb, moves the trip's current location and starts
    /// a SCHEDULED trip. Closed trips reject new points.
    pub async fn append_tracking(
        &self,
        trip_id: &str,
        point: NewTrackingPoint,
        actor: &Actor,
    ) -> Result<Option<(DeliveryTrip, TripTrackingPoint)>> {
        let now = now();
        let txn = self.db().begin().await?;
        let Some(m) = delivery_trip::Entity::find_by_id(trip_id).one(&txn).await? else {
            return Ok(None);
        };
        let current: TripStatus = parse_enum("delivery_trips.status", &m.status)?;
        if current.is_terminal() {
            return Err(StorageError::InvalidState(format!("trip is already {current}")).into());
        }

        let tracked = trip_tracking::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            trip_id: Set(trip_id.to_owned()),
            latitude: Set(point.latitude),
            longitude: Set(point.longitude),
            speed_kmh: Set(point.speed_kmh),
            heading: Set(point.heading),
            recorded_at: Set(point.recorded_at.fixed_offset()),
        }
        .insert(&txn)
        .await?;

        let location = GeoPoint {
            latitude: point.latitude,
            longitude: point.longitude,
        };
        let mut am: delivery_trip::ActiveModel = m.into();
        am.current_location = Set(Some(to_json("delivery_trips.current_location", &location)?));
        if current == TripStatus::Scheduled {
            apply_status(&mut am, current, TripStatus::InTransit, now)?;
        }
        am.updated_at = Set(now);
        let updated = am.update(&txn).await?;

        record_audit(
            &txn,
            actor,
            "TRACK",
            "delivery_trip",
            trip_id,
            Some(json!({ "latitude": point.latitude, "longitude": point.longitude })),
        )
        .await?;
        txn.commit().await?;
        Ok(Some((to_trip(updated)?, to_point(tracked))))
    }

    /// Oldest first.
    pub async fn list_tracking(&self, trip_id: &str, limit: u64, offset: u64) -> Result<Vec<TripTrackingPoint>> {
        use trip_tracking::Column;
        let rows = trip_tracking::Entity::find()
            .filter(Column::TripId.eq(trip_id))
            .order_by(Column::RecordedAt, Order::Asc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_point).collect())
    }

    pub async fn count_tracking(&self, trip_id: &str) -> Result<u64> {
        Ok(trip_tracking::Entity::find()
            .filter(trip_tracking::Column::TripId.eq(trip_id))
            .count(self.db())
            .await?)
    }

    /// Marks the trip DELIVERED and every stop delivered.
    pub async fn complete_trip(&self, id: &str, actor: &Actor) -> Result<Option<DeliveryTrip>> {
        let now = now();
        let txn = self.db().begin().await?;
        let Some(m) = delivery_trip::Entity::find_by_id(id).one(&txn).await? else {
            return Ok(None);
        };
        let current: TripStatus = parse_enum("delivery_trips.status", &m.status)?;
        let mut stops: Vec<DeliveryStop> = from_json("delivery_trips.delivery_sequence", &m.delivery_sequence)?;
        for stop in &mut stops {
            stop.delivered = true;
        }
        let mut am: delivery_trip::ActiveModel = m.into();
        apply_status(&mut am, current, TripStatus::Delivered, now)?;
        am.delivery_sequence = Set(to_json("delivery_trips.delivery_sequence", &stops)?);
        am.updated_at = Set(now);
        let updated = am.update(&txn).await?;
        record_audit(&txn, actor, "COMPLETE", "delivery_trip", id, None).await?;
        txn.commit().await?;
        tracing::info!(trip_id = %id, stops = stops.len(), "Delivery trip completed");
        Ok(Some(to_trip(updated)?))
    }
}
