use crate::api::pagination::PaginationParams;
use crate::api::{
    ensure_mill, forbidden, not_found, store_error, success_paginated_response, success_response,
    IdResponse, ValidJson,
};
use crate::auth::Identity;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fortify_common::models::Alert;
use fortify_common::types::{AlertSeverity, AlertStatus, Role};
use fortify_storage::store::{AlertAudience, AlertFilter, NewAlert};
use serde::Deserialize;
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

const ALERT_AUTHORS: &[Role] = &[
    Role::SystemAdmin,
    Role::ProgramManager,
    Role::Inspector,
    Role::MillManager,
];

/// Admins and program managers see every alert.
fn audience_of(identity: &Identity) -> Option<AlertAudience> {
    if identity.is_any(&[Role::SystemAdmin, Role::ProgramManager]) {
        return None;
    }
    Some(AlertAudience {
        user_id: identity.user_id.clone(),
        role: identity.role,
        mill_id: identity.mill_id.clone(),
    })
}

/// Same rule the store applies when listing.
fn visible_to(alert: &Alert, audience: &AlertAudience) -> bool {
    let mill_ok = alert
        .mill_id
        .as_deref()
        .map_or(true, |mill| audience.mill_id.as_deref() == Some(mill));
    match (&alert.recipient_id, alert.recipient_role) {
        (Some(user), _) if *user == audience.user_id => true,
        (_, Some(role)) => role == audience.role && mill_ok,
        (None, None) => mill_ok,
        _ => false,
    }
}

async fn load_alert(
    state: &AppState,
    trace_id: &str,
    identity: &Identity,
    id: &str,
) -> Result<Alert, Response> {
    match state.store.get_alert(id).await {
        Ok(Some(alert)) => match audience_of(identity) {
            Some(audience) if !visible_to(&alert, &audience) => {
                Err(not_found(trace_id, "alert", id))
            }
            _ => Ok(alert),
        },
        Ok(None) => Err(not_found(trace_id, "alert", id)),
        Err(e) => Err(store_error(trace_id, e)),
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListAlertsParams {
    #[param(required = false, rename = "status__eq")]
    #[serde(rename = "status__eq")]
    status_eq: Option<AlertStatus>,
    #[param(required = false, rename = "severity__eq")]
    #[serde(rename = "severity__eq")]
    severity_eq: Option<AlertSeverity>,
    #[param(required = false, rename = "alert_type__eq")]
    #[serde(rename = "alert_type__eq")]
    alert_type_eq: Option<String>,
    #[param(required = false)]
    #[serde(default)]
    unread_only: bool,
}

/// Alerts addressed to the requester, their role or their mill.
#[utoipa::path(
    get,
    path = "/v1/alerts",
    tag = "Alerts",
    security(("bearer_auth" = [])),
    params(ListAlertsParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated alerts", body = Vec<Alert>)
    )
)]
async fn list_alerts(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(params): Query<ListAlertsParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let filter = AlertFilter {
        audience: audience_of(&identity),
        status: params.status_eq,
        severity: params.severity_eq,
        alert_type: params.alert_type_eq,
        unread_only: params.unread_only,
    };
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_alerts(&filter).await {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state.store.list_alerts(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct CreateAlertRequest {
    /// Free-form category, e.g. COMPLIANCE, SUPPLY, SAFETY
    #[validate(length(min = 1, max = 50))]
    alert_type: String,
    severity: AlertSeverity,
    #[validate(length(min = 1, max = 200))]
    title: String,
    #[validate(length(min = 1))]
    message: String,
    recipient_id: Option<String>,
    recipient_role: Option<Role>,
    /// Mill managers may only address their own mill
    mill_id: Option<String>,
    metadata: Option<Value>,
}

#[utoipa::path(
    post,
    path = "/v1/alerts",
    tag = "Alerts",
    security(("bearer_auth" = [])),
    request_body = CreateAlertRequest,
    responses(
        (status = 201, description = "Alert raised", body = Alert),
        (status = 403, description = "Not allowed", body = crate::api::ApiError)
    )
)]
async fn create_alert(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CreateAlertRequest>,
) -> impl IntoResponse {
    if !identity.is_any(ALERT_AUTHORS) {
        return forbidden(&trace_id, "not allowed to raise alerts");
    }
    let mill_id = match (identity.mill_scope(), req.mill_id) {
        (Some(own), None) => Some(own.to_string()),
        (_, requested) => requested,
    };
    if let Some(mill_id) = &mill_id {
        if let Some(resp) = ensure_mill(&state, &trace_id, &identity, mill_id).await {
            return resp;
        }
    }
    if let Some(recipient) = &req.recipient_id {
        match state.store.get_user(recipient).await {
            Ok(Some(_)) => {}
            Ok(None) => return not_found(&trace_id, "user", recipient),
            Err(e) => return store_error(&trace_id, e),
        }
    }
    let new = NewAlert {
        alert_type: req.alert_type,
        severity: req.severity,
        title: req.title,
        message: req.message,
        recipient_id: req.recipient_id,
        recipient_role: req.recipient_role,
        mill_id,
        metadata: req.metadata,
    };
    match state.store.create_alert(new, &identity.actor()).await {
        Ok(alert) => success_response(StatusCode::CREATED, &trace_id, alert),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/alerts/{id}",
    tag = "Alerts",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Alert id")),
    responses(
        (status = 200, description = "Alert", body = Alert),
        (status = 404, description = "No such alert", body = crate::api::ApiError)
    )
)]
async fn get_alert(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match load_alert(&state, &trace_id, &identity, &id).await {
        Ok(alert) => success_response(StatusCode::OK, &trace_id, alert),
        Err(resp) => resp,
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct AlertStatusRequest {
    status: AlertStatus,
}

/// Moves an alert along its lifecycle.
#[utoipa::path(
    patch,
    path = "/v1/alerts/{id}/status",
    tag = "Alerts",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Alert id")),
    request_body = AlertStatusRequest,
    responses(
        (status = 200, description = "Updated alert", body = Alert),
        (status = 400, description = "Invalid status transition", body = crate::api::ApiError),
        (status = 404, description = "No such alert", body = crate::api::ApiError)
    )
)]
async fn update_alert_status(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<AlertStatusRequest>,
) -> impl IntoResponse {
    if let Err(resp) = load_alert(&state, &trace_id, &identity, &id).await {
        return resp;
    }
    match state
        .store
        .update_alert_status(&id, req.status, &identity.actor())
        .await
    {
        Ok(Some(alert)) => success_response(StatusCode::OK, &trace_id, alert),
        Ok(None) => not_found(&trace_id, "alert", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    post,
    path = "/v1/alerts/{id}/read",
    tag = "Alerts",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Alert id")),
    responses(
        (status = 200, description = "Alert marked read", body = Alert),
        (status = 404, description = "No such alert", body = crate::api::ApiError)
    )
)]
async fn mark_alert_read(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(resp) = load_alert(&state, &trace_id, &identity, &id).await {
        return resp;
    }
    match state.store.mark_alert_read(&id, &identity.actor()).await {
        Ok(Some(alert)) => success_response(StatusCode::OK, &trace_id, alert),
        Ok(None) => not_found(&trace_id, "alert", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/alerts/{id}",
    tag = "Alerts",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Alert id")),
    responses(
        (status = 200, description = "Alert deleted", body = IdResponse),
        (status = 403, description = "Administrators only", body = crate::api::ApiError),
        (status = 404, description = "No such alert", body = crate::api::ApiError)
    )
)]
async fn delete_alert(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if !identity.role.is_admin() {
        return forbidden(&trace_id, "only administrators delete alerts");
    }
    match state.store.delete_alert(&id, &identity.actor()).await {
        Ok(true) => success_response(StatusCode::OK, &trace_id, IdResponse { id }),
        Ok(false) => not_found(&trace_id, "alert", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

pub fn alert_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_alerts, create_alert))
        .routes(routes!(get_alert, delete_alert))
        .routes(routes!(update_alert_status))
        .routes(routes!(mark_alert_read))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn alert(recipient_id: Option<&str>, recipient_role: Option<Role>, mill_id: Option<&str>) -> Alert {
        let now = Utc::now();
        Alert {
            id: "a-1".into(),
            alert_type: "SENSOR".into(),
            severity: AlertSeverity::High,
            status: AlertStatus::Pending,
            title: "t".into(),
            message: "m".into(),
            recipient_id: recipient_id.map(String::from),
            recipient_role,
            mill_id: mill_id.map(String::from),
            metadata: None,
            read_at: None,
            acknowledged_at: None,
            resolved_at: None,
            resolved_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn manager_of(mill: &str) -> AlertAudience {
        AlertAudience {
            user_id: "u-1".into(),
            role: Role::MillManager,
            mill_id: Some(mill.into()),
        }
    }

    #[test]
    fn direct_recipient_always_sees_alert() {
        assert!(visible_to(&alert(Some("u-1"), None, Some("other")), &manager_of("mill-1")));
        assert!(!visible_to(&alert(Some("u-2"), None, Some("mill-1")), &manager_of("mill-1")));
    }

    #[test]
    fn role_alerts_respect_mill() {
        let audience = manager_of("mill-1");
        assert!(visible_to(&alert(None, Some(Role::MillManager), Some("mill-1")), &audience));
        assert!(visible_to(&alert(None, Some(Role::MillManager), None), &audience));
        assert!(!visible_to(&alert(None, Some(Role::MillManager), Some("mill-2")), &audience));
        assert!(!visible_to(&alert(None, Some(Role::Inspector), Some("mill-1")), &audience));
    }

    #[test]
    fn broadcast_alerts_are_visible_within_mill() {
        let audience = manager_of("mill-1");
        assert!(visible_to(&alert(None, None, None), &audience));
        assert!(visible_to(&alert(None, None, Some("mill-1")), &audience));
        assert!(!visible_to(&alert(None, None, Some("mill-2")), &audience));
    }
}
