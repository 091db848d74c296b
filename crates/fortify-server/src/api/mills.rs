use crate::api::pagination::PaginationParams;
use crate::api::{
    forbidden, not_found, store_error, success_paginated_response, success_response, ValidJson,
};
use crate::auth::Identity;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use fortify_common::models::Mill;
use fortify_common::types::{MillStatus, Role};
use fortify_storage::store::{MillFilter, MillUpdate, NewMill};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

const MILL_ADMINS: &[Role] = &[Role::SystemAdmin, Role::ProgramManager];

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListMillsParams {
    #[param(required = false, rename = "name__contains")]
    #[serde(rename = "name__contains")]
    name_contains: Option<String>,
    #[param(required = false, rename = "region__eq")]
    #[serde(rename = "region__eq")]
    region_eq: Option<String>,
    #[param(required = false, rename = "status__eq")]
    #[serde(rename = "status__eq")]
    status_eq: Option<MillStatus>,
}

/// Mill roles only ever see their own mill.
#[utoipa::path(
    get,
    path = "/v1/mills",
    tag = "Mills",
    security(("bearer_auth" = [])),
    params(ListMillsParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated mills", body = Vec<Mill>)
    )
)]
async fn list_mills(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(params): Query<ListMillsParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let filter = MillFilter {
        name_contains: params.name_contains,
        region: params.region_eq,
        status: params.status_eq,
        id: identity.mill_scope().map(str::to_string),
    };
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_mills(&filter).await {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state.store.list_mills(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct CreateMillRequest {
    #[validate(length(min = 1, max = 200))]
    name: String,
    /// Registry code, unique across mills
    #[validate(length(min = 1, max = 50))]
    code: String,
    #[validate(length(min = 1))]
    region: String,
    #[validate(length(min = 1))]
    country: String,
    address: Option<String>,
}

#[utoipa::path(
    post,
    path = "/v1/mills",
    tag = "Mills",
    security(("bearer_auth" = [])),
    request_body = CreateMillRequest,
    responses(
        (status = 201, description = "Mill registered", body = Mill),
        (status = 403, description = "Only administrators and program managers", body = crate::api::ApiError),
        (status = 409, description = "Code already used", body = crate::api::ApiError)
    )
)]
async fn create_mill(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CreateMillRequest>,
) -> impl IntoResponse {
    if !identity.is_any(MILL_ADMINS) {
        return forbidden(&trace_id, "only administrators and program managers register mills");
    }
    let new = NewMill {
        name: req.name,
        code: req.code,
        region: req.region,
        country: req.country,
        address: req.address,
    };
    match state.store.create_mill(new, &identity.actor()).await {
        Ok(mill) => {
            tracing::info!(mill_id = %mill.id, code = %mill.code, "Mill registered");
            success_response(StatusCode::CREATED, &trace_id, mill)
        }
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/mills/{id}",
    tag = "Mills",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Mill id")),
    responses(
        (status = 200, description = "Mill", body = Mill),
        (status = 403, description = "Another mill", body = crate::api::ApiError),
        (status = 404, description = "No such mill", body = crate::api::ApiError)
    )
)]
async fn get_mill(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if !identity.can_access_mill(&id) {
        return forbidden(&trace_id, "mill is outside your assignment");
    }
    match state.store.get_mill(&id).await {
        Ok(Some(mill)) => success_response(StatusCode::OK, &trace_id, mill),
        Ok(None) => not_found(&trace_id, "mill", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct UpdateMillRequest {
    #[validate(length(min = 1, max = 200))]
    name: Option<String>,
    region: Option<String>,
    country: Option<String>,
    address: Option<String>,
    /// Administrators and program managers only
    status: Option<MillStatus>,
}

/// Mill managers may edit their own mill's details but not its status.
#[utoipa::path(
    patch,
    path = "/v1/mills/{id}",
    tag = "Mills",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Mill id")),
    request_body = UpdateMillRequest,
    responses(
        (status = 200, description = "Updated mill", body = Mill),
        (status = 403, description = "Not allowed", body = crate::api::ApiError),
        (status = 404, description = "No such mill", body = crate::api::ApiError)
    )
)]
async fn update_mill(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<UpdateMillRequest>,
) -> impl IntoResponse {
    let is_admin = identity.is_any(MILL_ADMINS);
    let own_manager = identity.role == Role::MillManager && identity.can_access_mill(&id);
    if !is_admin && !(own_manager && req.status.is_none()) {
        return forbidden(&trace_id, "not allowed to edit this mill");
    }
    let update = MillUpdate {
        name: req.name,
        region: req.region,
        country: req.country,
        address: req.address,
        status: req.status,
    };
    match state.store.update_mill(&id, update, &identity.actor()).await {
        Ok(Some(mill)) => success_response(StatusCode::OK, &trace_id, mill),
        Ok(None) => not_found(&trace_id, "mill", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

pub fn mill_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_mills, create_mill))
        .routes(routes!(get_mill, update_mill))
}
