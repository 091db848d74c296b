use crate::api::pagination::PaginationParams;
use crate::api::{forbidden, store_error, success_paginated_response};
use crate::auth::Identity;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use fortify_common::models::AuditLog;
use fortify_common::types::Role;
use fortify_storage::store::AuditLogFilter;
use serde::Deserialize;
use utoipa::IntoParams;
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListAuditLogsParams {
    #[param(required = false, rename = "user_id__eq")]
    #[serde(rename = "user_id__eq")]
    user_id_eq: Option<String>,
    /// e.g. `mill`, `compliance_audit`
    #[param(required = false, rename = "resource_type__eq")]
    #[serde(rename = "resource_type__eq")]
    resource_type_eq: Option<String>,
    #[param(required = false, rename = "resource_id__eq")]
    #[serde(rename = "resource_id__eq")]
    resource_id_eq: Option<String>,
    /// e.g. `CREATE`, `UPDATE`
    #[param(required = false, rename = "action__eq")]
    #[serde(rename = "action__eq")]
    action_eq: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/audit-logs",
    tag = "AuditLogs",
    security(("bearer_auth" = [])),
    params(ListAuditLogsParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated audit trail, newest first", body = Vec<AuditLog>),
        (status = 403, description = "Admins and program managers only", body = crate::api::ApiError)
    )
)]
async fn list_audit_logs(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(params): Query<ListAuditLogsParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    if !identity.is_any(&[Role::SystemAdmin, Role::ProgramManager]) {
        return forbidden(&trace_id, "audit trail is restricted");
    }
    let filter = AuditLogFilter {
        user_id: params.user_id_eq,
        resource_type: params.resource_type_eq,
        resource_id: params.resource_id_eq,
        action: params.action_eq,
    };
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_audit_logs(&filter).await {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state.store.list_audit_logs(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

pub fn audit_log_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(list_audit_logs))
}
