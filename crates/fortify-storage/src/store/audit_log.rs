use anyhow::Result;
use fortify_common::models::AuditLog;
use sea_orm::{ColumnTrait, EntityTrait, Order, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select};

use crate::entities::audit_log::{self, Column, Entity};
use crate::store::{from_json, utc, FortifyStore};

#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub user_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub action: Option<String>,
}

fn to_log(m: audit_log::Model) -> Result<AuditLog> {
    Ok(AuditLog {
        details: m
            .details
            .as_deref()
            .map(|t| from_json("audit_logs.details", t))
            .transpose()?,
        id: m.id,
        user_id: m.user_id,
        action: m.action,
        resource_type: m.resource_type,
        resource_id: m.resource_id,
        ip_address: m.ip_address,
        created_at: utc(m.created_at),
    })
}

fn filtered(filter: &AuditLogFilter) -> Select<Entity> {
    let mut q = Entity::find();
    if let Some(user_id) = &filter.user_id {
        q = q.filter(Column::UserId.eq(user_id.as_str()));
    }
    if let Some(kind) = &filter.resource_type {
        q = q.filter(Column::ResourceType.eq(kind.as_str()));
    }
    if let Some(resource_id) = &filter.resource_id {
        q = q.filter(Column::ResourceId.eq(resource_id.as_str()));
    }
    if let Some(action) = &filter.action {
        q = q.filter(Column::Action.eq(action.as_str()));
    }
    q
}

impl FortifyStore {
    /// Newest first.
    pub async fn list_audit_logs(&self, filter: &AuditLogFilter, limit: u64, offset: u64) -> Result<Vec<AuditLog>> {
        let rows = filtered(filter)
            .order_by(Column::CreatedAt, Order::Desc)
            .order_by(Column::Id, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_log).collect()
    }

    pub async fn count_audit_logs(&self, filter: &AuditLogFilter) -> Result<u64> {
        Ok(filtered(filter).count(self.db()).await?)
    }
}
