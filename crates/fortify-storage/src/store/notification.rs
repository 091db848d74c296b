use anyhow::Result;
use fortify_common::models::Notification;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, TransactionTrait,
};
use serde_json::json;

use crate::entities::notification::{self, Column, Entity};
use crate::store::{now, record_audit, utc, Actor, FortifyStore};

fn to_notification(m: notification::Model) -> Notification {
    Notification {
        id: m.id,
        user_id: m.user_id,
        title: m.title,
        message: m.message,
        category: m.category,
        link: m.link,
        is_read: m.is_read,
        read_at: m.read_at.map(utc),
        created_at: utc(m.created_at),
    }
}

fn owned_by(user_id: &str, unread_only: bool) -> Select<Entity> {
    let mut q = Entity::find().filter(Column::UserId.eq(user_id));
    if unread_only {
        q = q.filter(Column::IsRead.eq(false));
    }
    q
}

impl FortifyStore {
    pub async fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Notification>> {
        let rows = owned_by(user_id, unread_only)
            .order_by(Column::CreatedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_notification).collect())
    }

    pub async fn count_notifications(&self, user_id: &str, unread_only: bool) -> Result<u64> {
        Ok(owned_by(user_id, unread_only).count(self.db()).await?)
    }

    /// Marks one of the user's notifications read. Other users' rows are
    /// reported as missing.
    pub async fn mark_notification_read(
        &self,
        id: &str,
        user_id: &str,
        actor: &Actor,
    ) -> Result<Option<Notification>> {
        let txn = self.db().begin().await?;
        let Some(m) = Entity::find_by_id(id)
            .filter(Column::UserId.eq(user_id))
            .one(&txn)
            .await?
        else {
            return Ok(None);
        };
        if m.is_read {
            return Ok(Some(to_notification(m)));
        }
        let mut am: notification::ActiveModel = m.into();
        am.is_read = Set(true);
        am.read_at = Set(Some(now()));
        let updated = am.update(&txn).await?;
        record_audit(&txn, actor, "MARK_READ", "notification", id, None).await?;
        txn.commit().await?;
        Ok(Some(to_notification(updated)))
    }

    /// Returns how many notifications changed.
    pub async fn mark_all_notifications_read(&self, user_id: &str, actor: &Actor) -> Result<u64> {
        let txn = self.db().begin().await?;
        let res = Entity::update_many()
            .col_expr(Column::IsRead, Expr::value(true))
            .col_expr(Column::ReadAt, Expr::value(now()))
            .filter(Column::UserId.eq(user_id))
            .filter(Column::IsRead.eq(false))
            .exec(&txn)
            .await?;
        record_audit(
            &txn,
            actor,
            "MARK_ALL_READ",
            "notification",
            user_id,
            Some(json!({ "updated": res.rows_affected })),
        )
        .await?;
        txn.commit().await?;
        Ok(res.rows_affected)
    }
}
