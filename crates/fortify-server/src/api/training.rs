use crate::api::pagination::PaginationParams;
use crate::api::{
    error_response, forbidden, not_found, store_error, success_paginated_response,
    success_response, ValidJson,
};
use crate::auth::Identity;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use fortify_common::models::{TrainingCertificate, TrainingCourse, TrainingProgress};
use fortify_common::types::{Role, TrainingStatus};
use fortify_storage::store::{CourseFilter, CourseUpdate, NewCourse, ProgressFilter};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

const COURSE_AUTHORS: &[Role] = &[Role::SystemAdmin, Role::ProgramManager];

/// May look at other learners' progress and certificates.
fn sees_everyone(identity: &Identity) -> bool {
    identity.is_any(COURSE_AUTHORS)
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListCoursesParams {
    #[param(required = false, rename = "category__eq")]
    #[serde(rename = "category__eq")]
    category_eq: Option<String>,
    #[param(required = false)]
    #[serde(default)]
    active_only: bool,
}

#[utoipa::path(
    get,
    path = "/v1/training/courses",
    tag = "Training",
    security(("bearer_auth" = [])),
    params(ListCoursesParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated courses", body = Vec<TrainingCourse>)
    )
)]
async fn list_courses(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListCoursesParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let filter = CourseFilter {
        category: params.category_eq,
        active_only: params.active_only,
    };
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_courses(&filter).await {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state.store.list_courses(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct CreateCourseRequest {
    #[validate(length(min = 1, max = 200))]
    title: String,
    description: Option<String>,
    /// e.g. FORTIFICATION, SAFETY, QUALITY
    #[validate(length(min = 1, max = 100))]
    category: String,
    #[validate(range(min = 1))]
    duration_minutes: i32,
    /// Defaults to the configured passing score
    #[validate(range(min = 0.0, max = 100.0))]
    passing_score: Option<f64>,
}

#[utoipa::path(
    post,
    path = "/v1/training/courses",
    tag = "Training",
    security(("bearer_auth" = [])),
    request_body = CreateCourseRequest,
    responses(
        (status = 201, description = "Course created", body = TrainingCourse),
        (status = 403, description = "Not allowed", body = crate::api::ApiError)
    )
)]
async fn create_course(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CreateCourseRequest>,
) -> impl IntoResponse {
    if !identity.is_any(COURSE_AUTHORS) {
        return forbidden(&trace_id, "only administrators and program managers manage courses");
    }
    let new = NewCourse {
        title: req.title,
        description: req.description,
        category: req.category,
        duration_minutes: req.duration_minutes,
        passing_score: req
            .passing_score
            .unwrap_or(state.config.training.default_passing_score),
    };
    match state.store.create_course(new, &identity.actor()).await {
        Ok(course) => success_response(StatusCode::CREATED, &trace_id, course),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/training/courses/{id}",
    tag = "Training",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Course id")),
    responses(
        (status = 200, description = "Course", body = TrainingCourse),
        (status = 404, description = "No such course", body = crate::api::ApiError)
    )
)]
async fn get_course(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_course(&id).await {
        Ok(Some(course)) => success_response(StatusCode::OK, &trace_id, course),
        Ok(None) => not_found(&trace_id, "training course", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct UpdateCourseRequest {
    #[validate(length(min = 1, max = 200))]
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    #[validate(range(min = 1))]
    duration_minutes: Option<i32>,
    #[validate(range(min = 0.0, max = 100.0))]
    passing_score: Option<f64>,
    is_active: Option<bool>,
}

#[utoipa::path(
    patch,
    path = "/v1/training/courses/{id}",
    tag = "Training",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Course id")),
    request_body = UpdateCourseRequest,
    responses(
        (status = 200, description = "Updated course", body = TrainingCourse),
        (status = 404, description = "No such course", body = crate::api::ApiError)
    )
)]
async fn update_course(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<UpdateCourseRequest>,
) -> impl IntoResponse {
    if !identity.is_any(COURSE_AUTHORS) {
        return forbidden(&trace_id, "only administrators and program managers manage courses");
    }
    let update = CourseUpdate {
        title: req.title,
        description: req.description,
        category: req.category,
        duration_minutes: req.duration_minutes,
        passing_score: req.passing_score,
        is_active: req.is_active,
    };
    match state.store.update_course(&id, update, &identity.actor()).await {
        Ok(Some(course)) => success_response(StatusCode::OK, &trace_id, course),
        Ok(None) => not_found(&trace_id, "training course", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListProgressParams {
    /// Administrators and program managers only; defaults to the requester
    #[param(required = false, rename = "user_id__eq")]
    #[serde(rename = "user_id__eq")]
    user_id_eq: Option<String>,
    #[param(required = false, rename = "course_id__eq")]
    #[serde(rename = "course_id__eq")]
    course_id_eq: Option<String>,
    #[param(required = false, rename = "status__eq")]
    #[serde(rename = "status__eq")]
    status_eq: Option<TrainingStatus>,
}

#[utoipa::path(
    get,
    path = "/v1/training/progress",
    tag = "Training",
    security(("bearer_auth" = [])),
    params(ListProgressParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated progress records", body = Vec<TrainingProgress>),
        (status = 403, description = "Another learner requested", body = crate::api::ApiError)
    )
)]
async fn list_progress(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(params): Query<ListProgressParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let user_id = match params.user_id_eq {
        Some(user) if user != identity.user_id && !sees_everyone(&identity) => {
            return forbidden(&trace_id, "only your own training progress is visible");
        }
        Some(user) => Some(user),
        None if sees_everyone(&identity) => None,
        None => Some(identity.user_id.clone()),
    };
    let filter = ProgressFilter {
        user_id,
        course_id: params.course_id_eq,
        status: params.status_eq,
    };
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_progress(&filter).await {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state.store.list_progress(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct ProgressRequest {
    /// Percentage of the course completed
    #[validate(range(min = 0.0, max = 100.0))]
    progress: f64,
    /// Assessment score, if taken
    #[validate(range(min = 0.0, max = 100.0))]
    score: Option<f64>,
}

#[derive(Serialize, ToSchema)]
struct ProgressResponse {
    progress: TrainingProgress,
    /// Set when this update earned the course certificate
    certificate: Option<TrainingCertificate>,
}

/// Records the requester's progress. Reaching 100% with a passing score
/// issues the course certificate once.
#[utoipa::path(
    put,
    path = "/v1/training/courses/{id}/progress",
    tag = "Training",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Course id")),
    request_body = ProgressRequest,
    responses(
        (status = 200, description = "Progress recorded", body = ProgressResponse),
        (status = 404, description = "No such course", body = crate::api::ApiError),
        (status = 409, description = "Course is inactive", body = crate::api::ApiError)
    )
)]
async fn record_progress(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<ProgressRequest>,
) -> impl IntoResponse {
    match state.store.get_course(&id).await {
        Ok(Some(course)) if !course.is_active => {
            return error_response(StatusCode::CONFLICT, &trace_id, "conflict", "course is inactive");
        }
        Ok(Some(_)) => {}
        Ok(None) => return not_found(&trace_id, "training course", &id),
        Err(e) => return store_error(&trace_id, e),
    }
    match state
        .store
        .upsert_progress(&identity.user_id, &id, req.progress, req.score, &identity.actor())
        .await
    {
        Ok((progress, certificate)) => {
            if let Some(cert) = &certificate {
                tracing::info!(
                    user_id = %identity.user_id,
                    course_id = %id,
                    certificate = %cert.certificate_number,
                    "Training certificate issued"
                );
            }
            success_response(StatusCode::OK, &trace_id, ProgressResponse { progress, certificate })
        }
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListCertificatesParams {
    /// Administrators and program managers only; defaults to the requester
    #[param(required = false, rename = "user_id__eq")]
    #[serde(rename = "user_id__eq")]
    user_id_eq: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/training/certificates",
    tag = "Training",
    security(("bearer_auth" = [])),
    params(ListCertificatesParams),
    responses(
        (status = 200, description = "Certificates, newest first", body = Vec<TrainingCertificate>)
    )
)]
async fn list_certificates(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(params): Query<ListCertificatesParams>,
) -> impl IntoResponse {
    let user_id = if sees_everyone(&identity) {
        params.user_id_eq
    } else {
        match params.user_id_eq {
            Some(user) if user != identity.user_id => {
                return forbidden(&trace_id, "only your own certificates are visible");
            }
            _ => Some(identity.user_id.clone()),
        }
    };
    match state.store.list_training_certificates(user_id.as_deref()).await {
        Ok(items) => success_response(StatusCode::OK, &trace_id, items),
        Err(e) => store_error(&trace_id, e),
    }
}

pub fn training_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_courses, create_course))
        .routes(routes!(get_course, update_course))
        .routes(routes!(record_progress))
        .routes(routes!(list_progress))
        .routes(routes!(list_certificates))
}
