use crate::api::pagination::PaginationParams;
use crate::api::{
    ensure_mill, forbidden, not_found, scoped_mill_filter, store_error, success_paginated_response,
    success_response, IdResponse, ValidJson,
};
use crate::auth::Identity;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use fortify_common::models::Equipment;
use fortify_common::types::{EquipmentStatus, Role};
use fortify_storage::store::{EquipmentFilter, EquipmentUpdate, NewEquipment};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

const EQUIPMENT_EDITORS: &[Role] = &[Role::SystemAdmin, Role::ProgramManager, Role::MillManager];

/// Loads equipment the requester is allowed to see.
pub(crate) async fn load_equipment(
    state: &AppState,
    trace_id: &str,
    identity: &Identity,
    id: &str,
) -> Result<Equipment, Response> {
    match state.store.get_equipment(id).await {
        Ok(Some(equipment)) if identity.can_access_mill(&equipment.mill_id) => Ok(equipment),
        Ok(Some(_)) => Err(forbidden(trace_id, "equipment belongs to another mill")),
        Ok(None) => Err(not_found(trace_id, "equipment", id)),
        Err(e) => Err(store_error(trace_id, e)),
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListEquipmentParams {
    #[param(required = false, rename = "mill_id__eq")]
    #[serde(rename = "mill_id__eq")]
    mill_id_eq: Option<String>,
    #[param(required = false, rename = "status__eq")]
    #[serde(rename = "status__eq")]
    status_eq: Option<EquipmentStatus>,
    #[param(required = false, rename = "equipment_type__eq")]
    #[serde(rename = "equipment_type__eq")]
    equipment_type_eq: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/equipment",
    tag = "Equipment",
    security(("bearer_auth" = [])),
    params(ListEquipmentParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated equipment", body = Vec<Equipment>),
        (status = 403, description = "Another mill requested", body = crate::api::ApiError)
    )
)]
async fn list_equipment(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(params): Query<ListEquipmentParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let mill_id = match scoped_mill_filter(&trace_id, &identity, params.mill_id_eq) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let filter = EquipmentFilter {
        mill_id,
        status: params.status_eq,
        equipment_type: params.equipment_type_eq,
    };
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_equipment(&filter).await {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state.store.list_equipment(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct CreateEquipmentRequest {
    mill_id: String,
    #[validate(length(min = 1, max = 200))]
    name: String,
    /// e.g. mixer, doser, conveyor
    #[validate(length(min = 1, max = 100))]
    equipment_type: String,
    manufacturer: Option<String>,
    model_number: Option<String>,
    serial_number: Option<String>,
    installed_at: Option<DateTime<Utc>>,
}

#[utoipa::path(
    post,
    path = "/v1/equipment",
    tag = "Equipment",
    security(("bearer_auth" = [])),
    request_body = CreateEquipmentRequest,
    responses(
        (status = 201, description = "Equipment registered", body = Equipment),
        (status = 403, description = "Not allowed for this mill", body = crate::api::ApiError),
        (status = 404, description = "No such mill", body = crate::api::ApiError)
    )
)]
async fn create_equipment(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CreateEquipmentRequest>,
) -> impl IntoResponse {
    if !identity.is_any(EQUIPMENT_EDITORS) {
        return forbidden(&trace_id, "not allowed to register equipment");
    }
    if let Some(resp) = ensure_mill(&state, &trace_id, &identity, &req.mill_id).await {
        return resp;
    }
    let new = NewEquipment {
        mill_id: req.mill_id,
        name: req.name,
        equipment_type: req.equipment_type,
        manufacturer: req.manufacturer,
        model_number: req.model_number,
        serial_number: req.serial_number,
        installed_at: req.installed_at,
    };
    match state.store.create_equipment(new, &identity.actor()).await {
        Ok(equipment) => success_response(StatusCode::CREATED, &trace_id, equipment),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/equipment/{id}",
    tag = "Equipment",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Equipment id")),
    responses(
        (status = 200, description = "Equipment", body = Equipment),
        (status = 403, description = "Another mill", body = crate::api::ApiError),
        (status = 404, description = "No such equipment", body = crate::api::ApiError)
    )
)]
async fn get_equipment(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match load_equipment(&state, &trace_id, &identity, &id).await {
        Ok(equipment) => success_response(StatusCode::OK, &trace_id, equipment),
        Err(resp) => resp,
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct UpdateEquipmentRequest {
    #[validate(length(min = 1, max = 200))]
    name: Option<String>,
    equipment_type: Option<String>,
    manufacturer: Option<String>,
    model_number: Option<String>,
    serial_number: Option<String>,
    status: Option<EquipmentStatus>,
    installed_at: Option<DateTime<Utc>>,
}

#[utoipa::path(
    patch,
    path = "/v1/equipment/{id}",
    tag = "Equipment",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Equipment id")),
    request_body = UpdateEquipmentRequest,
    responses(
        (status = 200, description = "Updated equipment", body = Equipment),
        (status = 403, description = "Not allowed", body = crate::api::ApiError),
        (status = 404, description = "No such equipment", body = crate::api::ApiError)
    )
)]
async fn update_equipment(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<UpdateEquipmentRequest>,
) -> impl IntoResponse {
    if !identity.is_any(EQUIPMENT_EDITORS) {
        return forbidden(&trace_id, "not allowed to edit equipment");
    }
    if let Err(resp) = load_equipment(&state, &trace_id, &identity, &id).await {
        return resp;
    }
    let update = EquipmentUpdate {
        name: req.name,
        equipment_type: req.equipment_type,
        manufacturer: req.manufacturer,
        model_number: req.model_number,
        serial_number: req.serial_number,
        status: req.status,
        installed_at: req.installed_at,
    };
    match state.store.update_equipment(&id, update, &identity.actor()).await {
        Ok(Some(equipment)) => success_response(StatusCode::OK, &trace_id, equipment),
        Ok(None) => not_found(&trace_id, "equipment", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/equipment/{id}",
    tag = "Equipment",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Equipment id")),
    responses(
        (status = 200, description = "Equipment deleted", body = IdResponse),
        (status = 403, description = "Administrators only", body = crate::api::ApiError),
        (status = 404, description = "No such equipment", body = crate::api::ApiError)
    )
)]
async fn delete_equipment(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if !identity.role.is_admin() {
        return forbidden(&trace_id, "only administrators delete equipment");
    }
    match state.store.delete_equipment(&id, &identity.actor()).await {
        Ok(true) => {
            tracing::info!(equipment_id = %id, "Equipment deleted");
            success_response(StatusCode::OK, &trace_id, IdResponse { id })
        }
        Ok(false) => not_found(&trace_id, "equipment", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

pub fn equipment_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_equipment, create_equipment))
        .routes(routes!(get_equipment, update_equipment, delete_equipment))
}
