use anyhow::Result;
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ConnectionTrait, Database, DatabaseConnection, DbErr,
    SqlErr,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::str::FromStr;

use crate::entities;
use crate::error::StorageError;

pub mod alert;
pub mod audit_log;
pub mod compliance;
pub mod equipment;
pub mod logistics;
pub mod maintenance;
pub mod mill;
pub mod notification;
pub mod rfp;
pub mod sensor;
pub mod training;
pub mod user;

pub use alert::{AlertAudience, AlertFilter, NewAlert};
pub use audit_log::AuditLogFilter;
pub use compliance::{AuditFilter, NewTemplate, TemplateFilter, TemplateRevision};
pub use equipment::{EquipmentFilter, EquipmentUpdate, NewEquipment};
pub use logistics::{NewTrackingPoint, NewTrip, TripFilter, TripUpdate};
pub use maintenance::{NewTask, TaskFilter, TaskUpdate};
pub use mill::{MillFilter, MillUpdate, NewMill};
pub use rfp::{NewBid, NewRfp, RfpFilter, RfpUpdate};
pub use sensor::{IotSensorExt, NewSensor, SensorAlertFilter, SensorFilter, SensorUpdate};
pub use training::{CourseFilter, CourseUpdate, NewCourse, ProgressFilter};
pub use user::{NewUser, UserFilter, UserUpdate};

/// Access layer for the portal database.
///
/// All methods are `async fn` over SeaORM. Mutations open a transaction,
/// write the primary row plus any derived rows (alerts, notifications) and
/// the audit-log entry, then commit.
pub struct FortifyStore {
    pub(crate) db: DatabaseConnection,
}

impl FortifyStore {
    /// Connects, creates `data_dir` if needed and runs pending migrations.
    ///
    /// `db_url` example: `sqlite:///var/lib/fortify/fortify.db?mode=rwc`
    pub async fn new(db_url: &str, data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db = Database::connect(db_url).await?;

        if db_url.starts_with("sqlite:") {
            db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        }

        Migrator::up(&db, None).await?;
        tracing::info!(db_url = %db_url, "Initialized portal store");

        Ok(Self { db })
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Cheap round-trip used by the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        self.db.execute_unprepared("SELECT 1").await?;
        Ok(())
    }
}

/// Who performed a mutation, recorded in the audit trail.
#[derive(Debug, Clone, Default)]
pub struct Actor {
    /// None for system actions (seeding, CLI)
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
}

impl Actor {
    pub fn system() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>, ip_address: Option<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ip_address,
        }
    }
}

pub(crate) async fn record_audit<C: ConnectionTrait>(
    conn: &C,
    actor: &Actor,
    action: &str,
    resource_type: &str,
    resource_id: &str,
    details: Option<Value>,
) -> Result<()> {
    let am = entities::audit_log::ActiveModel {
        id: Set(fortify_common::id::next_id()),
        user_id: Set(actor.user_id.clone()),
        action: Set(action.to_owned()),
        resource_type: Set(resource_type.to_owned()),
        resource_id: Set(resource_id.to_owned()),
        details: Set(details.map(|d| d.to_string())),
        ip_address: Set(actor.ip_address.clone()),
        created_at: Set(now()),
    };
    am.insert(conn).await?;
    Ok(())
}

pub(crate) async fn notify<C: ConnectionTrait>(
    conn: &C,
    user_id: &str,
    category: &str,
    title: String,
    message: String,
    link: Option<String>,
) -> Result<()> {
    let am = entities::notification::ActiveModel {
        id: Set(fortify_common::id::next_id()),
        user_id: Set(user_id.to_owned()),
        title: Set(title),
        message: Set(message),
        category: Set(category.to_owned()),
        link: Set(link),
        is_read: Set(false),
        read_at: Set(None),
        created_at: Set(now()),
    };
    am.insert(conn).await?;
    Ok(())
}

pub(crate) fn now() -> DateTimeWithTimeZone {
    Utc::now().fixed_offset()
}

pub(crate) fn utc(dt: DateTimeWithTimeZone) -> DateTime<Utc> {
    dt.with_timezone(&Utc)
}

pub(crate) fn parse_enum<T: FromStr<Err = String>>(column: &'static str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        StorageError::InvalidColumn {
            column,
            value: value.to_owned(),
        }
        .into()
    })
}

pub(crate) fn from_json<T: DeserializeOwned>(column: &'static str, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|source| StorageError::Json { column, source }.into())
}

pub(crate) fn to_json<T: Serialize>(column: &'static str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|source| StorageError::Json { column, source }.into())
}

/// Turns a unique-constraint violation into [`StorageError::Conflict`].
pub(crate) fn conflict_on_unique(err: DbErr, message: &str) -> anyhow::Error {
    if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
        StorageError::Conflict(message.to_owned()).into()
    } else {
        err.into()
    }
}

pub(crate) fn not_found(entity: &'static str, id: &str) -> anyhow::Error {
    StorageError::NotFound {
        entity,
        id: id.to_owned(),
    }
    .into()
}
