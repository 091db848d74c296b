use anyhow::Result;
use fortify_common::models::Alert;
use fortify_common::types::{AlertSeverity, AlertStatus, Role, StatusTransition};
use sea_orm::sea_query::Condition;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, TransactionTrait,
};
use serde_json::{json, Value};

use crate::entities::alert::{self, Column, Entity};
use crate::error::StorageError;
use crate::store::{from_json, now, parse_enum, record_audit, utc, Actor, FortifyStore};

pub struct NewAlert {
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub recipient_id: Option<String>,
    pub recipient_role: Option<Role>,
    pub mill_id: Option<String>,
    pub metadata: Option<Value>,
}

/// The requester an alert list is scoped to.
///
/// An alert is visible when it is addressed to the user, to the user's role
/// (within their mill, or with no mill), or to nobody in particular and the
/// mill matches.
#[derive(Debug, Clone)]
pub struct AlertAudience {
    pub user_id: String,
    pub role: Role,
    pub mill_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    /// None lists every alert (admin, program manager)
    pub audience: Option<AlertAudience>,
    pub status: Option<AlertStatus>,
    pub severity: Option<AlertSeverity>,
    pub alert_type: Option<String>,
    pub unread_only: bool,
}

fn to_alert(m: alert::Model) -> Result<Alert> {
    Ok(Alert {
        severity: parse_enum("alerts.severity", &m.severity)?,
        status: parse_enum("alerts.status", &m.status)?,
        recipient_role: m
            .recipient_role
            .as_deref()
            .map(|r| parse_enum("alerts.recipient_role", r))
            .transpose()?,
        metadata: m
            .metadata
            .as_deref()
            .map(|t| from_json("alerts.metadata", t))
            .transpose()?,
        id: m.id,
        alert_type: m.alert_type,
        title: m.title,
        message: m.message,
        recipient_id: m.recipient_id,
        mill_id: m.mill_id,
        read_at: m.read_at.map(utc),
        acknowledged_at: m.acknowledged_at.map(utc),
        resolved_at: m.resolved_at.map(utc),
        resolved_by: m.resolved_by,
        created_at: utc(m.created_at),
        updated_at: utc(m.updated_at),
    })
}

fn mill_matches(mill_id: Option<&str>) -> Condition {
    let any_mill = Condition::any().add(Column::MillId.is_null());
    match mill_id {
        Some(mill) => any_mill.add(Column::MillId.eq(mill)),
        None => any_mill,
    }
}

fn audience_condition(audience: &AlertAudience) -> Condition {
    let mill = audience.mill_id.as_deref();
    Condition::any()
        .add(Column::RecipientId.eq(audience.user_id.as_str()))
        .add(
            Condition::all()
                .add(Column::RecipientRole.eq(audience.role.as_str()))
                .add(mill_matches(mill)),
        )
        .add(
            Condition::all()
                .add(Column::RecipientId.is_null())
                .add(Column::RecipientRole.is_null())
                .add(mill_matches(mill)),
        )
}

fn filtered(filter: &AlertFilter) -> Select<Entity> {
    let mut q = Entity::find();
    if let Some(audience) = &filter.audience {
        q = q.filter(audience_condition(audience));
    }
    if let Some(status) = filter.status {
        q = q.filter(Column::Status.eq(status.as_str()));
    }
    if let Some(severity) = filter.severity {
        q = q.filter(Column::Severity.eq(severity.as_str()));
    }
    if let Some(kind) = &filter.alert_type {
        q = q.filter(Column::AlertType.eq(kind.as_str()));
    }
    if filter.unread_only {
        q = q.filter(Column::ReadAt.is_null());
    }
    q
}

impl FortifyStore {
    pub async fn create_alert(&self, new: NewAlert, actor: &Actor) -> Result<Alert> {
        let now = now();
        let txn = self.db().begin().await?;
        let am = alert::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            alert_type: Set(new.alert_type),
            severity: Set(new.severity.as_str().to_owned()),
            status: Set(AlertStatus::Pending.as_str().to_owned()),
            title: Set(new.title),
            message: Set(new.message),
            recipient_id: Set(new.recipient_id),
            recipient_role: Set(new.recipient_role.map(|r| r.as_str().to_owned())),
            mill_id: Set(new.mill_id),
            metadata: Set(new.metadata.map(|v| v.to_string())),
            read_at: Set(None),
            acknowledged_at: Set(None),
            resolved_at: Set(None),
            resolved_by: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(&txn).await?;
        record_audit(
            &txn,
            actor,
            "CREATE",
            "alert",
            &model.id,
            Some(json!({ "alert_type": model.alert_type, "severity": model.severity })),
        )
        .await?;
        txn.commit().await?;
        to_alert(model)
    }

    pub async fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_alert).transpose()
    }

    pub async fn list_alerts(&self, filter: &AlertFilter, limit: u64, offset: u64) -> Result<Vec<Alert>> {
        let rows = filtered(filter)
            .order_by(Column::CreatedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_alert).collect()
    }

    pub async fn count_alerts(&self, filter: &AlertFilter) -> Result<u64> {
        Ok(filtered(filter).count(self.db()).await?)
    }

    /// Moves an alert along [`AlertStatus`]'s transition table.
    pub async fn update_alert_status(&self, id: &str, next: AlertStatus, actor: &Actor) -> Result<Option<Alert>> {
        let now = now();
        let txn = self.db().begin().await?;
        let Some(m) = Entity::find_by_id(id).one(&txn).await? else {
            return Ok(None);
        };
        let current: AlertStatus = parse_enum("alerts.status", &m.status)?;
        let next = current.transition_to(next).map_err(StorageError::from)?;
        let mut am: alert::ActiveModel = m.into();
        am.status = Set(next.as_str().to_owned());
        match next {
            AlertStatus::Acknowledged => am.acknowledged_at = Set(Some(now)),
            AlertStatus::Resolved => {
                am.resolved_at = Set(Some(now));
                am.resolved_by = Set(actor.user_id.clone());
            }
            _ => {}
        }
        am.updated_at = Set(now);
        let updated = am.update(&txn).await?;
        record_audit(
            &txn,
            actor,
            "STATUS_CHANGE",
            "alert",
            id,
            Some(json!({ "from": current, "to": next })),
        )
        .await?;
        txn.commit().await?;
        Ok(Some(to_alert(updated)?))
    }

    /// Stamps `read_at` once; later calls keep the first timestamp.
    pub async fn mark_alert_read(&self, id: &str, actor: &Actor) -> Result<Option<Alert>> {
        let txn = self.db().begin().await?;
        let Some(m) = Entity::find_by_id(id).one(&txn).await? else {
            return Ok(None);
        };
        if m.read_at.is_some() {
            return Ok(Some(to_alert(m)?));
        }
        let now = now();
        let mut am: alert::ActiveModel = m.into();
        am.read_at = Set(Some(now));
        am.updated_at = Set(now);
        let updated = am.update(&txn).await?;
        record_audit(&txn, actor, "MARK_READ", "alert", id, None).await?;
        txn.commit().await?;
        Ok(Some(to_alert(updated)?))
    }

    pub async fn delete_alert(&self, id: &str, actor: &Actor) -> Result<bool> {
        let txn = self.db().begin().await?;
        let res = Entity::delete_by_id(id).exec(&txn).await?;
        if res.rows_affected == 0 {
            return Ok(false);
        }
        record_audit(&txn, actor, "DELETE", "alert", id, None).await?;
        txn.commit().await?;
        Ok(true)
    }

    /// Alerts visible to `audience` that are not yet resolved.
    pub async fn count_open_alerts(&self, audience: Option<&AlertAudience>) -> Result<u64> {
        let mut q = Entity::find().filter(Column::Status.ne(AlertStatus::Resolved.as_str()));
        if let Some(audience) = audience {
            q = q.filter(audience_condition(audience));
        }
        Ok(q.count(self.db()).await?)
    }
}
