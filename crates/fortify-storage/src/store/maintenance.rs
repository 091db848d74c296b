use anyhow::Result;
use chrono::{DateTime, Utc};
use fortify_common::models::MaintenanceTask;
use fortify_common::types::{
    MaintenancePriority, MaintenanceStatus, MaintenanceTaskType, StatusTransition,
};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, TransactionTrait,
};
use serde_json::json;

use crate::entities::{equipment, maintenance_task};
use crate::error::StorageError;
use crate::store::{now, parse_enum, record_audit, utc, Actor, FortifyStore};

use maintenance_task::{Column, Entity};

pub struct NewTask {
    pub equipment_id: String,
    pub mill_id: String,
    pub title: String,
    pub description: Option<String>,
    pub task_type: MaintenanceTaskType,
    pub priority: MaintenancePriority,
    pub assignee_id: Option<String>,
    pub scheduled_date: DateTime<Utc>,
    pub created_by: String,
}

#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<MaintenanceStatus>,
    pub priority: Option<MaintenancePriority>,
    /// `Some(None)` unassigns
    pub assignee_id: Option<Option<String>>,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub mill_id: Option<String>,
    pub equipment_id: Option<String>,
    pub status: Option<MaintenanceStatus>,
    pub priority: Option<MaintenancePriority>,
    pub task_type: Option<MaintenanceTaskType>,
    pub assignee_id: Option<String>,
    /// Excludes COMPLETED and CANCELLED
    pub open_only: bool,
}

fn to_task(m: maintenance_task::Model) -> Result<MaintenanceTask> {
    Ok(MaintenanceTask {
        task_type: parse_enum("maintenance_tasks.task_type", &m.task_type)?,
        status: parse_enum("maintenance_tasks.status", &m.status)?,
        priority: parse_enum("maintenance_tasks.priority", &m.priority)?,
        id: m.id,
        equipment_id: m.equipment_id,
        mill_id: m.mill_id,
        title: m.title,
        description: m.description,
        assignee_id: m.assignee_id,
        scheduled_date: utc(m.scheduled_date),
        completed_at: m.completed_at.map(utc),
        notes: m.notes,
        created_by: m.created_by,
        created_at: utc(m.created_at),
        updated_at: utc(m.updated_at),
    })
}

fn filtered(filter: &TaskFilter) -> Select<Entity> {
    let mut q = Entity::find();
    if let Some(mill_id) = &filter.mill_id {
        q = q.filter(Column::MillId.eq(mill_id.as_str()));
    }
    if let Some(equipment_id) = &filter.equipment_id {
        q = q.filter(Column::EquipmentId.eq(equipment_id.as_str()));
    }
    if let Some(status) = filter.status {
        q = q.filter(Column::Status.eq(status.as_str()));
    }
    if let Some(priority) = filter.priority {
        q = q.filter(Column::Priority.eq(priority.as_str()));
    }
    if let Some(kind) = filter.task_type {
        q = q.filter(Column::TaskType.eq(kind.as_str()));
    }
    if let Some(assignee) = &filter.assignee_id {
        q = q.filter(Column::AssigneeId.eq(assignee.as_str()));
    }
    if filter.open_only {
        q = q.filter(Column::Status.is_not_in([
            MaintenanceStatus::Completed.as_str(),
            MaintenanceStatus::Cancelled.as_str(),
        ]));
    }
    q
}

impl FortifyStore {
    pub async fn create_task(&self, new: NewTask, actor: &Actor) -> Result<MaintenanceTask> {
        let now = now();
        let txn = self.db().begin().await?;
        let am = maintenance_task::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            equipment_id: Set(new.equipment_id),
            mill_id: Set(new.mill_id),
            title: Set(new.title),
            description: Set(new.description),
            task_type: Set(new.task_type.as_str().to_owned()),
            status: Set(MaintenanceStatus::Scheduled.as_str().to_owned()),
            priority: Set(new.priority.as_str().to_owned()),
            assignee_id: Set(new.assignee_id),
            scheduled_date: Set(new.scheduled_date.fixed_offset()),
            completed_at: Set(None),
            notes: Set(None),
            created_by: Set(new.created_by),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(&txn).await?;
        record_audit(
            &txn,
            actor,
            "CREATE",
            "maintenance_task",
            &model.id,
            Some(json!({
                "equipment_id": model.equipment_id,
                "task_type": model.task_type,
                "priority": model.priority,
            })),
        )
        .await?;
        txn.commit().await?;
        to_task(model)
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<MaintenanceTask>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_task).transpose()
    }

    pub async fn list_tasks(&self, filter: &TaskFilter, limit: u64, offset: u64) -> Result<Vec<MaintenanceTask>> {
        let rows = filtered(filter)
            .order_by(Column::ScheduledDate, Order::Asc)
            .order_by(Column::CreatedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_task).collect()
    }

    pub async fn count_tasks(&self, filter: &TaskFilter) -> Result<u64> {
        Ok(filtered(filter).count(self.db()).await?)
    }

    /// Status changes follow [`MaintenanceStatus`]'s transition table.
    /// Completion stamps the task and the equipment's last service date.
    pub async fn update_task(&self, id: &str, update: TaskUpdate, actor: &Actor) -> Result<Option<MaintenanceTask>> {
        let now = now();
        let txn = self.db().begin().await?;
        let Some(m) = Entity::find_by_id(id).one(&txn).await? else {
            return Ok(None);
        };
        let current: MaintenanceStatus = parse_enum("maintenance_tasks.status", &m.status)?;
        let equipment_id = m.equipment_id.clone();
        let mut am: maintenance_task::ActiveModel = m.into();

        let mut completed = false;
        if let Some(next) = update.status {
            if next != current {
                let next = current.transition_to(next).map_err(StorageError::from)?;
                am.status = Set(next.as_str().to_owned());
                if next == MaintenanceStatus::Completed {
                    am.completed_at = Set(Some(now));
                    completed = true;
                }
            }
        }
        if let Some(title) = &update.title {
            am.title = Set(title.clone());
        }
        if let Some(description) = &update.description {
            am.description = Set(Some(description.clone()));
        }
        if let Some(priority) = update.priority {
            am.priority = Set(priority.as_str().to_owned());
        }
        if let Some(assignee) = &update.assignee_id {
            am.assignee_id = Set(assignee.clone());
        }
        if let Some(at) = update.scheduled_date {
            am.scheduled_date = Set(at.fixed_offset());
        }
        if let Some(notes) = &update.notes {
            am.notes = Set(Some(notes.clone()));
        }
        am.updated_at = Set(now);
        let updated = am.update(&txn).await?;

        if completed {
            if let Some(eq) = equipment::Entity::find_by_id(equipment_id.as_str()).one(&txn).await? {
                let mut eq: equipment::ActiveModel = eq.into();
                eq.last_maintenance_at = Set(Some(now));
                eq.updated_at = Set(now);
                eq.update(&txn).await?;
            }
        }

        record_audit(
            &txn,
            actor,
            "UPDATE",
            "maintenance_task",
            id,
            Some(json!({
                "from_status": current,
                "status": update.status,
                "priority": update.priority,
                "assignee_id": update.assignee_id,
            })),
        )
        .await?;
        txn.commit().await?;
        Ok(Some(to_task(updated)?))
    }

    pub async fn delete_task(&self, id: &str, actor: &Actor) -> Result<bool> {
        let txn = self.db().begin().await?;
        let res = Entity::delete_by_id(id).exec(&txn).await?;
        if res.rows_affected == 0 {
            return Ok(false);
        }
        record_audit(&txn, actor, "DELETE", "maintenance_task", id, None).await?;
        txn.commit().await?;
        Ok(true)
    }

    /// Whether the equipment already has a PREDICTIVE task that is still open.
    pub async fn has_open_predictive_task(&self, equipment_id: &str) -> Result<bool> {
        let filter = TaskFilter {
            equipment_id: Some(equipment_id.to_owned()),
            task_type: Some(MaintenanceTaskType::Predictive),
            open_only: true,
            ..Default::default()
        };
        Ok(self.count_tasks(&filter).await? > 0)
    }
}
