pub mod alerts;
pub mod audit_logs;
pub mod compliance;
pub mod dashboard;
pub mod equipment;
pub mod logistics;
pub mod maintenance;
pub mod mills;
pub mod notifications;
pub mod pagination;
pub mod rfps;
pub mod sensors;
pub mod training;
pub mod users;

use crate::auth::Identity;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, FromRequest, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use fortify_analytics::AnalyticsError;
use fortify_storage::{DbErr, StorageError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

/// Error envelope.
#[derive(Serialize, ToSchema)]
pub struct ApiError {
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
}

/// Envelope wrapping every response.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    /// 0 on success
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
    pub data: Option<T>,
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedData<T>
where
    T: Serialize,
{
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

/// Body of delete and other id-only responses.
#[derive(Serialize, ToSchema)]
pub struct IdResponse {
    pub id: String,
}

/// Tells an absent field (`None`) apart from an explicit `null`
/// (`Some(None)`) in PATCH bodies.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

pub fn success_empty_response(status: StatusCode, trace_id: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: 0,
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

pub fn success_paginated_response<T>(
    status: StatusCode,
    trace_id: &str,
    items: Vec<T>,
    total: u64,
    limit: u64,
    offset: u64,
) -> Response
where
    T: Serialize,
{
    success_response(
        status,
        trace_id,
        PaginatedData {
            items,
            total,
            limit,
            offset,
        },
    )
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "unauthorized" => 1002,
        "token_expired" => 1003,
        "not_found" => 1004,
        "conflict" => 1005,
        "forbidden" => 1006,
        "validation_failed" => 1007,
        "invalid_transition" => 1010,
        "certificate_not_eligible" => 1011,
        "storage_error" => 1501,
        "internal_error" => 1500,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

pub fn not_found(trace_id: &str, entity: &str, id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        trace_id,
        "not_found",
        &format!("{entity} '{id}' not found"),
    )
}

pub fn forbidden(trace_id: &str, msg: &str) -> Response {
    error_response(StatusCode::FORBIDDEN, trace_id, "forbidden", msg)
}

pub fn bad_request(trace_id: &str, msg: &str) -> Response {
    error_response(StatusCode::BAD_REQUEST, trace_id, "bad_request", msg)
}

/// Maps a store or scoring failure to its status and error code.
pub fn store_error(trace_id: &str, err: anyhow::Error) -> Response {
    if let Some(e) = err.downcast_ref::<StorageError>() {
        let (status, code) = match e {
            StorageError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            StorageError::Transition(_) => (StatusCode::BAD_REQUEST, "invalid_transition"),
            StorageError::InvalidState(_) | StorageError::Conflict(_) => {
                (StatusCode::CONFLICT, "conflict")
            }
            StorageError::NotEligible(_) => (StatusCode::BAD_REQUEST, "certificate_not_eligible"),
            StorageError::InvalidColumn { .. } | StorageError::Json { .. } => {
                tracing::error!(trace_id = %trace_id, error = %e, "Corrupt row");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    trace_id,
                    "storage_error",
                    "Stored data is invalid",
                );
            }
        };
        return error_response(status, trace_id, code, &e.to_string());
    }
    if let Some(e) = err.downcast_ref::<AnalyticsError>() {
        return bad_request(trace_id, &e.to_string());
    }
    if let Some(e) = err.downcast_ref::<DbErr>() {
        tracing::error!(trace_id = %trace_id, error = %e, "Database error");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            trace_id,
            "storage_error",
            "Database error",
        );
    }
    tracing::error!(trace_id = %trace_id, error = %err, "Unhandled error");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        trace_id,
        "internal_error",
        "Internal error",
    )
}

/// Pins scoped requesters to their own mill. Asking for another mill is
/// refused rather than silently ignored.
pub fn scoped_mill_filter(
    trace_id: &str,
    identity: &Identity,
    requested: Option<String>,
) -> Result<Option<String>, Response> {
    match (identity.mill_scope(), requested) {
        (None, requested) => Ok(requested),
        (Some(own), Some(requested)) if requested != own => {
            Err(forbidden(trace_id, "mill is outside your assignment"))
        }
        (Some(own), _) => Ok(Some(own.to_string())),
    }
}

/// Checks that the requester may act on `mill_id` and that the mill exists.
pub async fn ensure_mill(
    state: &AppState,
    trace_id: &str,
    identity: &Identity,
    mill_id: &str,
) -> Option<Response> {
    if !identity.can_access_mill(mill_id) {
        return Some(forbidden(trace_id, "mill is outside your assignment"));
    }
    match state.store.get_mill(mill_id).await {
        Ok(Some(_)) => None,
        Ok(None) => Some(not_found(trace_id, "mill", mill_id)),
        Err(e) => Some(store_error(trace_id, e)),
    }
}

/// JSON body extractor that also runs `validator` rules. Rejections use the
/// error envelope.
pub struct ValidJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let trace_id = req
            .extensions()
            .get::<TraceId>()
            .map(|t| t.0.clone())
            .unwrap_or_default();
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| bad_request(&trace_id, &rejection.body_text()))?;
        value.validate().map_err(|errors| {
            error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "validation_failed",
                &errors.to_string(),
            )
        })?;
        Ok(Self(value))
    }
}

#[derive(Serialize, ToSchema)]
struct HealthResponse {
    version: String,
    uptime_secs: i64,
    /// "ok" or "error"
    storage_status: String,
}

/// Service health. No authentication.
#[utoipa::path(
    get,
    path = "/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    )
)]
async fn health(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let uptime = (Utc::now() - state.start_time).num_seconds();
    let storage_status = match state.store.ping().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::error!(error = %e, "Storage health check failed");
            "error"
        }
    };
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: uptime,
            storage_status: storage_status.to_string(),
        },
    )
}

pub fn public_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(health))
}

pub fn auth_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(crate::auth::login))
}

pub fn protected_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(crate::auth::me))
        .routes(routes!(crate::auth::change_password))
        .merge(users::user_routes())
        .merge(mills::mill_routes())
        .merge(equipment::equipment_routes())
        .merge(sensors::sensor_routes())
        .merge(maintenance::maintenance_routes())
        .merge(alerts::alert_routes())
        .merge(compliance::compliance_routes())
        .merge(training::training_routes())
        .merge(rfps::rfp_routes())
        .merge(logistics::logistics_routes())
        .merge(notifications::notification_routes())
        .merge(audit_logs::audit_log_routes())
        .merge(dashboard::dashboard_routes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fortify_common::types::TransitionError;

    async fn envelope(resp: Response) -> (StatusCode, Value) {
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn storage_errors_map_to_statuses() {
        let cases: Vec<(anyhow::Error, StatusCode, i64)> = vec![
            (
                StorageError::NotFound {
                    entity: "mill",
                    id: "1".into(),
                }
                .into(),
                StatusCode::NOT_FOUND,
                1004,
            ),
            (
                StorageError::Transition(TransitionError {
                    entity: "alert",
                    from: "RESOLVED".into(),
                    to: "PENDING".into(),
                })
                .into(),
                StatusCode::BAD_REQUEST,
                1010,
            ),
            (
                StorageError::Conflict("dup".into()).into(),
                StatusCode::CONFLICT,
                1005,
            ),
            (
                StorageError::NotEligible("low score".into()).into(),
                StatusCode::BAD_REQUEST,
                1011,
            ),
            (
                AnalyticsError::InvalidRules("bad".into()).into(),
                StatusCode::BAD_REQUEST,
                1001,
            ),
            (anyhow::anyhow!("boom"), StatusCode::INTERNAL_SERVER_ERROR, 1500),
        ];
        for (err, status, code) in cases {
            let (got, body) = envelope(store_error("t-1", err)).await;
            assert_eq!(got, status);
            assert_eq!(body["err_code"], code);
            assert_eq!(body["trace_id"], "t-1");
            assert!(body["data"].is_null());
        }
    }

    #[test]
    fn unknown_code_falls_back() {
        assert_eq!(to_custom_error_code("nope"), 1999);
        assert_eq!(to_custom_error_code("forbidden"), 1006);
    }
}
