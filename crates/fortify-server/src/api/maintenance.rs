use crate::api::equipment::load_equipment;
use crate::api::pagination::PaginationParams;
use crate::api::{
    double_option, forbidden, not_found, scoped_mill_filter, store_error,
    success_paginated_response, success_response, IdResponse, ValidJson,
};
use crate::auth::Identity;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};
use fortify_analytics::predictive::{
    aggregate_equipment, analyze_sensor, EquipmentRisk, Reading, RiskLevel,
};
use fortify_common::models::{Equipment, MaintenanceTask};
use fortify_common::types::{
    EquipmentStatus, MaintenancePriority, MaintenanceStatus, MaintenanceTaskType, Role,
};
use fortify_storage::store::{
    EquipmentFilter, IotSensorExt, NewTask, SensorFilter, TaskFilter, TaskUpdate,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

const TASK_EDITORS: &[Role] = &[Role::SystemAdmin, Role::ProgramManager, Role::MillManager];

/// Page size used when walking every piece of equipment or sensor.
const SCAN_BATCH: u64 = 200;

async fn load_task(
    state: &AppState,
    trace_id: &str,
    identity: &Identity,
    id: &str,
) -> Result<MaintenanceTask, Response> {
    match state.store.get_task(id).await {
        Ok(Some(task)) if identity.can_access_mill(&task.mill_id) => Ok(task),
        Ok(Some(_)) => Err(forbidden(trace_id, "task belongs to another mill")),
        Ok(None) => Err(not_found(trace_id, "maintenance task", id)),
        Err(e) => Err(store_error(trace_id, e)),
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListTasksParams {
    #[param(required = false, rename = "mill_id__eq")]
    #[serde(rename = "mill_id__eq")]
    mill_id_eq: Option<String>,
    #[param(required = false, rename = "equipment_id__eq")]
    #[serde(rename = "equipment_id__eq")]
    equipment_id_eq: Option<String>,
    #[param(required = false, rename = "status__eq")]
    #[serde(rename = "status__eq")]
    status_eq: Option<MaintenanceStatus>,
    #[param(required = false, rename = "priority__eq")]
    #[serde(rename = "priority__eq")]
    priority_eq: Option<MaintenancePriority>,
    #[param(required = false, rename = "task_type__eq")]
    #[serde(rename = "task_type__eq")]
    task_type_eq: Option<MaintenanceTaskType>,
    #[param(required = false, rename = "assignee_id__eq")]
    #[serde(rename = "assignee_id__eq")]
    assignee_id_eq: Option<String>,
    /// Only tasks that are neither completed nor cancelled
    #[param(required = false)]
    #[serde(default)]
    open_only: bool,
}

#[utoipa::path(
    get,
    path = "/v1/maintenance/tasks",
    tag = "Maintenance",
    security(("bearer_auth" = [])),
    params(ListTasksParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated maintenance tasks", body = Vec<MaintenanceTask>)
    )
)]
async fn list_tasks(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(params): Query<ListTasksParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let mill_id = match scoped_mill_filter(&trace_id, &identity, params.mill_id_eq) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let filter = TaskFilter {
        mill_id,
        equipment_id: params.equipment_id_eq,
        status: params.status_eq,
        priority: params.priority_eq,
        task_type: params.task_type_eq,
        assignee_id: params.assignee_id_eq,
        open_only: params.open_only,
    };
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_tasks(&filter).await {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state.store.list_tasks(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct CreateTaskRequest {
    equipment_id: String,
    #[validate(length(min = 1, max = 200))]
    title: String,
    description: Option<String>,
    task_type: MaintenanceTaskType,
    #[serde(default = "default_priority")]
    priority: MaintenancePriority,
    assignee_id: Option<String>,
    scheduled_date: DateTime<Utc>,
}

fn default_priority() -> MaintenancePriority {
    MaintenancePriority::Medium
}

#[utoipa::path(
    post,
    path = "/v1/maintenance/tasks",
    tag = "Maintenance",
    security(("bearer_auth" = [])),
    request_body = CreateTaskRequest,
    responses(
        (status = 201, description = "Task scheduled", body = MaintenanceTask),
        (status = 403, description = "Not allowed", body = crate::api::ApiError),
        (status = 404, description = "No such equipment", body = crate::api::ApiError)
    )
)]
async fn create_task(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CreateTaskRequest>,
) -> impl IntoResponse {
    if !identity.is_any(TASK_EDITORS) {
        return forbidden(&trace_id, "not allowed to schedule maintenance");
    }
    let equipment = match load_equipment(&state, &trace_id, &identity, &req.equipment_id).await {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let new = NewTask {
        equipment_id: equipment.id,
        mill_id: equipment.mill_id,
        title: req.title,
        description: req.description,
        task_type: req.task_type,
        priority: req.priority,
        assignee_id: req.assignee_id,
        scheduled_date: req.scheduled_date,
        created_by: identity.user_id.clone(),
    };
    match state.store.create_task(new, &identity.actor()).await {
        Ok(task) => success_response(StatusCode::CREATED, &trace_id, task),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/maintenance/tasks/{id}",
    tag = "Maintenance",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Maintenance task", body = MaintenanceTask),
        (status = 404, description = "No such task", body = crate::api::ApiError)
    )
)]
async fn get_task(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match load_task(&state, &trace_id, &identity, &id).await {
        Ok(task) => success_response(StatusCode::OK, &trace_id, task),
        Err(resp) => resp,
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct UpdateTaskRequest {
    #[validate(length(min = 1, max = 200))]
    title: Option<String>,
    description: Option<String>,
    status: Option<MaintenanceStatus>,
    priority: Option<MaintenancePriority>,
    /// null unassigns
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    assignee_id: Option<Option<String>>,
    scheduled_date: Option<DateTime<Utc>>,
    notes: Option<String>,
}

impl UpdateTaskRequest {
    /// Operators may only move status and add notes.
    fn touches_planning(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.priority.is_some()
            || self.assignee_id.is_some()
            || self.scheduled_date.is_some()
    }
}

/// Status moves follow the maintenance transition table; completing a task
/// stamps `completed_at` and the equipment's `last_maintenance_at`.
#[utoipa::path(
    patch,
    path = "/v1/maintenance/tasks/{id}",
    tag = "Maintenance",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Task id")),
    request_body = UpdateTaskRequest,
    responses(
        (status = 200, description = "Updated task", body = MaintenanceTask),
        (status = 400, description = "Invalid status transition", body = crate::api::ApiError),
        (status = 403, description = "Not allowed", body = crate::api::ApiError),
        (status = 404, description = "No such task", body = crate::api::ApiError)
    )
)]
async fn update_task(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<UpdateTaskRequest>,
) -> impl IntoResponse {
    if let Err(resp) = load_task(&state, &trace_id, &identity, &id).await {
        return resp;
    }
    if !identity.is_any(TASK_EDITORS) && req.touches_planning() {
        return forbidden(&trace_id, "operators may only update status and notes");
    }
    let update = TaskUpdate {
        title: req.title,
        description: req.description,
        status: req.status,
        priority: req.priority,
        assignee_id: req.assignee_id,
        scheduled_date: req.scheduled_date,
        notes: req.notes,
    };
    match state.store.update_task(&id, update, &identity.actor()).await {
        Ok(Some(task)) => success_response(StatusCode::OK, &trace_id, task),
        Ok(None) => not_found(&trace_id, "maintenance task", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/maintenance/tasks/{id}",
    tag = "Maintenance",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task deleted", body = IdResponse),
        (status = 403, description = "Administrators only", body = crate::api::ApiError),
        (status = 404, description = "No such task", body = crate::api::ApiError)
    )
)]
async fn delete_task(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if !identity.role.is_admin() {
        return forbidden(&trace_id, "only administrators delete maintenance tasks");
    }
    match state.store.delete_task(&id, &identity.actor()).await {
        Ok(true) => success_response(StatusCode::OK, &trace_id, IdResponse { id }),
        Ok(false) => not_found(&trace_id, "maintenance task", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct PredictiveParams {
    #[param(required = false, rename = "mill_id__eq")]
    #[serde(rename = "mill_id__eq")]
    mill_id_eq: Option<String>,
    #[param(required = false, rename = "equipment_id__eq")]
    #[serde(rename = "equipment_id__eq")]
    equipment_id_eq: Option<String>,
    /// Schedule PREDICTIVE tasks for HIGH and CRITICAL equipment
    #[param(required = false)]
    #[serde(default)]
    create_tasks: bool,
}

#[derive(Serialize, ToSchema)]
struct PredictiveReport {
    generated_at: DateTime<Utc>,
    window_days: i64,
    /// Most severe first
    equipment: Vec<EquipmentRisk>,
    created_tasks: Vec<MaintenanceTask>,
}

/// Loads every non-decommissioned piece of equipment in scope.
async fn equipment_in_scope(
    state: &AppState,
    mill_id: Option<String>,
) -> anyhow::Result<Vec<Equipment>> {
    let filter = EquipmentFilter {
        mill_id,
        ..Default::default()
    };
    let mut all = Vec::new();
    let mut offset = 0;
    loop {
        let page = state.store.list_equipment(&filter, SCAN_BATCH, offset).await?;
        let fetched = page.len() as u64;
        all.extend(
            page.into_iter()
                .filter(|e| e.status != EquipmentStatus::Decommissioned),
        );
        if fetched < SCAN_BATCH {
            return Ok(all);
        }
        offset += SCAN_BATCH;
    }
}

/// Runs the heuristic over each active sensor of `equipment`.
async fn assess_equipment(
    state: &AppState,
    equipment: &Equipment,
    now: DateTime<Utc>,
) -> anyhow::Result<EquipmentRisk> {
    let config = &state.config.predictive;
    let filter = SensorFilter {
        equipment_id: Some(equipment.id.clone()),
        is_active: Some(true),
        ..Default::default()
    };
    let sensors = state.store.list_sensors(&filter, SCAN_BATCH, 0).await?;
    let since = now - Duration::days(config.effective_window_days());

    let mut predictions = Vec::with_capacity(sensors.len());
    for sensor in &sensors {
        let readings: Vec<Reading> = state
            .store
            .readings_since(&sensor.id, since)
            .await?
            .into_iter()
            .map(|r| Reading {
                value: r.value,
                recorded_at: r.recorded_at,
            })
            .collect();
        predictions.push(analyze_sensor(
            &sensor.id,
            &readings,
            &sensor.thresholds(),
            now,
            config,
        ));
    }
    Ok(aggregate_equipment(&equipment.id, predictions))
}

fn predictive_task(equipment: &Equipment, risk: &EquipmentRisk, created_by: &str, now: DateTime<Utc>) -> NewTask {
    let (priority, scheduled_date) = match risk.risk_level {
        RiskLevel::Critical => (MaintenancePriority::Critical, now),
        _ => (MaintenancePriority::High, now + Duration::days(1)),
    };
    let reasons: Vec<&str> = risk
        .sensors
        .iter()
        .filter(|s| s.risk_level.needs_maintenance())
        .flat_map(|s| s.reasons.iter().map(String::as_str))
        .collect();
    NewTask {
        equipment_id: equipment.id.clone(),
        mill_id: equipment.mill_id.clone(),
        title: format!("Predictive maintenance: {}", equipment.name),
        description: Some(format!("{} risk. {}", risk.risk_level, reasons.join("; "))),
        task_type: MaintenanceTaskType::Predictive,
        priority,
        assignee_id: None,
        scheduled_date,
        created_by: created_by.to_owned(),
    }
}

/// Risk assessment over the trailing reading window for every piece of
/// equipment in scope.
#[utoipa::path(
    get,
    path = "/v1/maintenance/predictive",
    tag = "Maintenance",
    security(("bearer_auth" = [])),
    params(PredictiveParams),
    responses(
        (status = 200, description = "Equipment risk report", body = PredictiveReport),
        (status = 403, description = "Not allowed to create tasks", body = crate::api::ApiError)
    )
)]
async fn predictive_report(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(params): Query<PredictiveParams>,
) -> impl IntoResponse {
    if params.create_tasks && !identity.is_any(TASK_EDITORS) {
        return forbidden(&trace_id, "not allowed to schedule maintenance");
    }
    let now = Utc::now();
    let equipment = match params.equipment_id_eq {
        Some(id) => match load_equipment(&state, &trace_id, &identity, &id).await {
            Ok(e) => vec![e],
            Err(resp) => return resp,
        },
        None => {
            let mill_id = match scoped_mill_filter(&trace_id, &identity, params.mill_id_eq) {
                Ok(v) => v,
                Err(resp) => return resp,
            };
            match equipment_in_scope(&state, mill_id).await {
                Ok(list) => list,
                Err(e) => return store_error(&trace_id, e),
            }
        }
    };

    let mut risks = Vec::with_capacity(equipment.len());
    let mut created_tasks = Vec::new();
    for item in &equipment {
        let risk = match assess_equipment(&state, item, now).await {
            Ok(r) => r,
            Err(e) => return store_error(&trace_id, e),
        };
        if params.create_tasks && risk.risk_level.needs_maintenance() {
            match state.store.has_open_predictive_task(&item.id).await {
                Ok(true) => {}
                Ok(false) => {
                    let new = predictive_task(item, &risk, &identity.user_id, now);
                    match state.store.create_task(new, &identity.actor()).await {
                        Ok(task) => {
                            tracing::info!(
                                equipment_id = %item.id,
                                risk = %risk.risk_level,
                                task_id = %task.id,
                                "Predictive maintenance task created"
                            );
                            created_tasks.push(task);
                        }
                        Err(e) => return store_error(&trace_id, e),
                    }
                }
                Err(e) => return store_error(&trace_id, e),
            }
        }
        risks.push(risk);
    }
    risks.sort_by(|a, b| b.risk_level.cmp(&a.risk_level));

    success_response(
        StatusCode::OK,
        &trace_id,
        PredictiveReport {
            generated_at: now,
            window_days: state.config.predictive.effective_window_days(),
            equipment: risks,
            created_tasks,
        },
    )
}

pub fn maintenance_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_tasks, create_task))
        .routes(routes!(get_task, update_task, delete_task))
        .routes(routes!(predictive_report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fortify_analytics::predictive::{RecommendedAction, SensorPrediction};

    fn equipment() -> Equipment {
        let now = Utc::now();
        Equipment {
            id: "eq-1".into(),
            mill_id: "mill-1".into(),
            name: "Premix doser".into(),
            equipment_type: "doser".into(),
            manufacturer: None,
            model_number: None,
            serial_number: None,
            status: EquipmentStatus::Operational,
            installed_at: None,
            last_maintenance_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn risk(level: RiskLevel) -> EquipmentRisk {
        EquipmentRisk {
            equipment_id: "eq-1".into(),
            risk_level: level,
            recommended_action: level.recommended_action(),
            earliest_breach_days: None,
            sensors: vec![SensorPrediction {
                sensor_id: "s-1".into(),
                risk_level: level,
                confidence: 0.8,
                reasons: vec!["recent mean above max threshold".into()],
                metrics: None,
                days_to_breach: None,
                predicted_breach_at: None,
                recommended_action: RecommendedAction::ScheduleMaintenance,
            }],
        }
    }

    #[test]
    fn critical_risk_schedules_immediately() {
        let now = Utc::now();
        let task = predictive_task(&equipment(), &risk(RiskLevel::Critical), "u-1", now);
        assert_eq!(task.priority, MaintenancePriority::Critical);
        assert_eq!(task.scheduled_date, now);
        assert_eq!(task.task_type, MaintenanceTaskType::Predictive);
        assert_eq!(task.mill_id, "mill-1");
    }

    #[test]
    fn high_risk_schedules_next_day_with_reasons() {
        let now = Utc::now();
        let task = predictive_task(&equipment(), &risk(RiskLevel::High), "u-1", now);
        assert_eq!(task.priority, MaintenancePriority::High);
        assert_eq!(task.scheduled_date, now + Duration::days(1));
        let description = task.description.unwrap_or_default();
        assert!(description.starts_with("HIGH risk."));
        assert!(description.contains("above max threshold"));
    }
}
