use crate::api::pagination::PaginationParams;
use crate::api::{not_found, store_error, success_paginated_response, success_response};
use crate::auth::Identity;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use fortify_common::models::Notification;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListNotificationsParams {
    /// Only unread notifications
    #[param(required = false)]
    #[serde(default)]
    unread_only: bool,
}

/// Lists the caller's own notifications, newest first.
#[utoipa::path(
    get,
    path = "/v1/notifications",
    tag = "Notifications",
    security(("bearer_auth" = [])),
    params(ListNotificationsParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated notifications", body = Vec<Notification>),
        (status = 401, description = "Unauthenticated", body = crate::api::ApiError)
    )
)]
async fn list_notifications(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(params): Query<ListNotificationsParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state
        .store
        .count_notifications(&identity.user_id, params.unread_only)
        .await
    {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state
        .store
        .list_notifications(&identity.user_id, params.unread_only, limit, offset)
        .await
    {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    post,
    path = "/v1/notifications/{id}/read",
    tag = "Notifications",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Notification marked read", body = Notification),
        (status = 404, description = "No such notification for the caller", body = crate::api::ApiError)
    )
)]
async fn mark_notification_read(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state
        .store
        .mark_notification_read(&id, &identity.user_id, &identity.actor())
        .await
    {
        Ok(Some(n)) => success_response(StatusCode::OK, &trace_id, n),
        Ok(None) => not_found(&trace_id, "notification", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Serialize, ToSchema)]
struct MarkAllReadResponse {
    updated: u64,
}

#[utoipa::path(
    post,
    path = "/v1/notifications/read-all",
    tag = "Notifications",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Number of notifications marked read", body = MarkAllReadResponse)
    )
)]
async fn mark_all_notifications_read(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state
        .store
        .mark_all_notifications_read(&identity.user_id, &identity.actor())
        .await
    {
        Ok(updated) => success_response(StatusCode::OK, &trace_id, MarkAllReadResponse { updated }),
        Err(e) => store_error(&trace_id, e),
    }
}

pub fn notification_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_notifications))
        .routes(routes!(mark_notification_read))
        .routes(routes!(mark_all_notifications_read))
}
