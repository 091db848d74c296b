use crate::api::pagination::PaginationParams;
use crate::api::{
    bad_request, double_option, not_found, store_error, success_paginated_response,
    success_response, ValidJson,
};
use crate::auth::Identity;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fortify_common::models::User;
use fortify_common::types::Role;
use fortify_storage::auth::hash_password;
use fortify_storage::store::{NewUser, UserFilter, UserUpdate};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListUsersParams {
    #[param(required = false, rename = "role__eq")]
    #[serde(rename = "role__eq")]
    role_eq: Option<Role>,
    #[param(required = false, rename = "mill_id__eq")]
    #[serde(rename = "mill_id__eq")]
    mill_id_eq: Option<String>,
    #[param(required = false, rename = "is_active__eq")]
    #[serde(rename = "is_active__eq")]
    is_active_eq: Option<bool>,
    #[param(required = false, rename = "email__contains")]
    #[serde(rename = "email__contains")]
    email_contains: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/users",
    tag = "Users",
    security(("bearer_auth" = [])),
    params(ListUsersParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated users", body = Vec<User>),
        (status = 403, description = "Not an administrator", body = crate::api::ApiError)
    )
)]
async fn list_users(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListUsersParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let filter = UserFilter {
        role: params.role_eq,
        mill_id: params.mill_id_eq,
        is_active: params.is_active_eq,
        email_contains: params.email_contains,
    };
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_users(&filter).await {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state.store.list_users(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct CreateUserRequest {
    #[validate(email(message = "invalid e-mail address"))]
    email: String,
    #[validate(length(min = 1, max = 120))]
    name: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    password: String,
    role: Role,
    /// Required for MILL_MANAGER and MILL_OPERATOR
    mill_id: Option<String>,
}

/// Mill roles need a mill, and any given mill must exist.
async fn check_mill_assignment(
    state: &AppState,
    trace_id: &str,
    role: Role,
    mill_id: Option<&str>,
) -> Option<Response> {
    match mill_id {
        None if role.is_mill_role() => {
            Some(bad_request(trace_id, &format!("{role} accounts need a mill_id")))
        }
        None => None,
        Some(mill_id) => match state.store.get_mill(mill_id).await {
            Ok(Some(_)) => None,
            Ok(None) => Some(bad_request(trace_id, &format!("unknown mill '{mill_id}'"))),
            Err(e) => Some(store_error(trace_id, e)),
        },
    }
}

#[utoipa::path(
    post,
    path = "/v1/users",
    tag = "Users",
    security(("bearer_auth" = [])),
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 400, description = "Invalid body", body = crate::api::ApiError),
        (status = 409, description = "E-mail already registered", body = crate::api::ApiError)
    )
)]
async fn create_user(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CreateUserRequest>,
) -> impl IntoResponse {
    if let Some(resp) = check_mill_assignment(&state, &trace_id, req.role, req.mill_id.as_deref()).await {
        return resp;
    }
    let password_hash = match hash_password(&req.password) {
        Ok(hash) => hash,
        Err(e) => return store_error(&trace_id, e),
    };
    let new = NewUser {
        email: req.email,
        name: req.name,
        password_hash,
        role: req.role,
        mill_id: req.mill_id,
    };
    match state.store.create_user(new, &identity.actor()).await {
        Ok(user) => {
            tracing::info!(user_id = %user.id, role = %user.role, "User created");
            success_response(StatusCode::CREATED, &trace_id, user)
        }
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/users/{id}",
    tag = "Users",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 404, description = "No such user", body = crate::api::ApiError)
    )
)]
async fn get_user(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_user(&id).await {
        Ok(Some(user)) => success_response(StatusCode::OK, &trace_id, user),
        Ok(None) => not_found(&trace_id, "user", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct UpdateUserRequest {
    #[validate(length(min = 1, max = 120))]
    name: Option<String>,
    role: Option<Role>,
    /// null removes the mill assignment
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    mill_id: Option<Option<String>>,
    is_active: Option<bool>,
}

#[utoipa::path(
    patch,
    path = "/v1/users/{id}",
    tag = "Users",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "User id")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated user", body = User),
        (status = 400, description = "Invalid change", body = crate::api::ApiError),
        (status = 404, description = "No such user", body = crate::api::ApiError)
    )
)]
async fn update_user(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<UpdateUserRequest>,
) -> impl IntoResponse {
    let existing = match state.store.get_user(&id).await {
        Ok(Some(user)) => user,
        Ok(None) => return not_found(&trace_id, "user", &id),
        Err(e) => return store_error(&trace_id, e),
    };
    if id == identity.user_id && (req.is_active == Some(false) || req.role.is_some_and(|r| !r.is_admin())) {
        return bad_request(&trace_id, "administrators cannot demote or disable themselves");
    }

    let role = req.role.unwrap_or(existing.role);
    let mill_id = match &req.mill_id {
        Some(next) => next.as_deref(),
        None => existing.mill_id.as_deref(),
    };
    if req.role.is_some() || req.mill_id.is_some() {
        if let Some(resp) = check_mill_assignment(&state, &trace_id, role, mill_id).await {
            return resp;
        }
    }

    let update = UserUpdate {
        name: req.name,
        role: req.role,
        mill_id: req.mill_id,
        is_active: req.is_active,
    };
    match state.store.update_user(&id, update, &identity.actor()).await {
        Ok(Some(user)) => success_response(StatusCode::OK, &trace_id, user),
        Ok(None) => not_found(&trace_id, "user", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

/// Deactivates the account; users are never hard-deleted.
#[utoipa::path(
    delete,
    path = "/v1/users/{id}",
    tag = "Users",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Deactivated user", body = User),
        (status = 404, description = "No such user", body = crate::api::ApiError)
    )
)]
async fn deactivate_user(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if id == identity.user_id {
        return bad_request(&trace_id, "administrators cannot disable themselves");
    }
    match state.store.deactivate_user(&id, &identity.actor()).await {
        Ok(Some(user)) => {
            tracing::info!(user_id = %id, "User deactivated");
            success_response(StatusCode::OK, &trace_id, user)
        }
        Ok(None) => not_found(&trace_id, "user", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

pub fn user_routes() -> OpenApiRouter<crate::state::AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_users, create_user))
        .routes(routes!(get_user, update_user, deactivate_user))
}
