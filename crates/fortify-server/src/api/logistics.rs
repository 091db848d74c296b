use crate::api::pagination::PaginationParams;
use crate::api::{
    bad_request, double_option, ensure_mill, forbidden, not_found, scoped_mill_filter,
    store_error, success_paginated_response, success_response, ValidJson,
};
use crate::auth::Identity;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use fortify_common::models::{DeliveryStop, DeliveryTrip, TripTrackingPoint};
use fortify_common::types::{Role, TripStatus};
use fortify_storage::store::{NewTrackingPoint, NewTrip, TripFilter, TripUpdate};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

/// May plan trips for mills in their scope.
const TRIP_PLANNERS: &[Role] = &[Role::SystemAdmin, Role::ProgramManager, Role::MillManager];

fn is_driver(identity: &Identity, trip: &DeliveryTrip) -> bool {
    trip.driver_id.as_deref() == Some(identity.user_id.as_str())
}

fn plans(identity: &Identity, trip: &DeliveryTrip) -> bool {
    identity.is_any(TRIP_PLANNERS) && identity.can_access_mill(&trip.mill_id)
}

/// Planners see their mills' trips, drivers their assigned trips and buyers
/// the trips delivering their RFPs.
async fn load_trip(
    state: &AppState,
    trace_id: &str,
    identity: &Identity,
    id: &str,
) -> Result<DeliveryTrip, Response> {
    let trip = match state.store.get_trip(id).await {
        Ok(Some(trip)) => trip,
        Ok(None) => return Err(not_found(trace_id, "delivery trip", id)),
        Err(e) => return Err(store_error(trace_id, e)),
    };
    if plans(identity, &trip) || is_driver(identity, &trip) {
        return Ok(trip);
    }
    if identity.role == Role::InstitutionalBuyer {
        if let Some(rfp_id) = &trip.rfp_id {
            match state.store.get_rfp(rfp_id).await {
                Ok(Some(rfp)) if rfp.buyer_id == identity.user_id => return Ok(trip),
                Ok(_) => {}
                Err(e) => return Err(store_error(trace_id, e)),
            }
        }
    }
    Err(forbidden(trace_id, "trip is outside your assignment"))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListTripsParams {
    #[param(required = false, rename = "mill_id__eq")]
    #[serde(rename = "mill_id__eq")]
    mill_id_eq: Option<String>,
    #[param(required = false, rename = "driver_id__eq")]
    #[serde(rename = "driver_id__eq")]
    driver_id_eq: Option<String>,
    /// Required for buyers
    #[param(required = false, rename = "rfp_id__eq")]
    #[serde(rename = "rfp_id__eq")]
    rfp_id_eq: Option<String>,
    #[param(required = false, rename = "status__eq")]
    #[serde(rename = "status__eq")]
    status_eq: Option<TripStatus>,
}

#[utoipa::path(
    get,
    path = "/v1/logistics/trips",
    tag = "Logistics",
    security(("bearer_auth" = [])),
    params(ListTripsParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated trips", body = Vec<DeliveryTrip>),
        (status = 403, description = "Outside your assignment", body = crate::api::ApiError)
    )
)]
async fn list_trips(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(params): Query<ListTripsParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let mut filter = TripFilter {
        mill_id: params.mill_id_eq,
        driver_id: params.driver_id_eq,
        rfp_id: params.rfp_id_eq,
        status: params.status_eq,
    };
    match identity.role {
        Role::SystemAdmin | Role::ProgramManager => {}
        Role::MillManager => {
            filter.mill_id = match scoped_mill_filter(&trace_id, &identity, filter.mill_id) {
                Ok(v) => v,
                Err(resp) => return resp,
            };
        }
        Role::InstitutionalBuyer => {
            let Some(rfp_id) = &filter.rfp_id else {
                return bad_request(&trace_id, "rfp_id__eq is required");
            };
            match state.store.get_rfp(rfp_id).await {
                Ok(Some(rfp)) if rfp.buyer_id == identity.user_id => {}
                Ok(_) => return forbidden(&trace_id, "rfp is not yours"),
                Err(e) => return store_error(&trace_id, e),
            }
        }
        _ => filter.driver_id = Some(identity.user_id.clone()),
    }
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_trips(&filter).await {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state.store.list_trips(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

/// Drivers must be active logistics coordinators.
async fn check_driver(state: &AppState, trace_id: &str, driver_id: &str) -> Option<Response> {
    match state.store.get_user(driver_id).await {
        Ok(Some(user)) if user.is_active && user.role == Role::LogisticsCoordinator => None,
        Ok(Some(_)) => Some(bad_request(
            trace_id,
            "driver must be an active logistics coordinator",
        )),
        Ok(None) => Some(not_found(trace_id, "user", driver_id)),
        Err(e) => Some(store_error(trace_id, e)),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct CreateTripRequest {
    /// RFP this trip delivers, if any
    rfp_id: Option<String>,
    mill_id: String,
    driver_id: Option<String>,
    #[validate(length(min = 1, max = 30))]
    vehicle_number: String,
    #[validate(length(min = 1))]
    origin: String,
    #[validate(length(min = 1))]
    destination: String,
    /// Ordered stops
    #[serde(default)]
    delivery_sequence: Vec<DeliveryStop>,
}

#[utoipa::path(
    post,
    path = "/v1/logistics/trips",
    tag = "Logistics",
    security(("bearer_auth" = [])),
    request_body = CreateTripRequest,
    responses(
        (status = 201, description = "Trip scheduled", body = DeliveryTrip),
        (status = 400, description = "Unsuitable driver", body = crate::api::ApiError),
        (status = 404, description = "No such mill, RFP or driver", body = crate::api::ApiError)
    )
)]
async fn create_trip(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CreateTripRequest>,
) -> impl IntoResponse {
    if !identity.is_any(TRIP_PLANNERS) {
        return forbidden(&trace_id, "not allowed to plan trips");
    }
    if let Some(resp) = ensure_mill(&state, &trace_id, &identity, &req.mill_id).await {
        return resp;
    }
    if let Some(rfp_id) = &req.rfp_id {
        match state.store.get_rfp(rfp_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return not_found(&trace_id, "rfp", rfp_id),
            Err(e) => return store_error(&trace_id, e),
        }
    }
    if let Some(driver_id) = &req.driver_id {
        if let Some(resp) = check_driver(&state, &trace_id, driver_id).await {
            return resp;
        }
    }
    let new = NewTrip {
        rfp_id: req.rfp_id,
        mill_id: req.mill_id,
        driver_id: req.driver_id,
        vehicle_number: req.vehicle_number,
        origin: req.origin,
        destination: req.destination,
        delivery_sequence: req.delivery_sequence,
        created_by: identity.user_id.clone(),
    };
    match state.store.create_trip(new, &identity.actor()).await {
        Ok(trip) => success_response(StatusCode::CREATED, &trace_id, trip),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/logistics/trips/{id}",
    tag = "Logistics",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Trip id")),
    responses(
        (status = 200, description = "Trip", body = DeliveryTrip),
        (status = 404, description = "No such trip", body = crate::api::ApiError)
    )
)]
async fn get_trip(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match load_trip(&state, &trace_id, &identity, &id).await {
        Ok(trip) => success_response(StatusCode::OK, &trace_id, trip),
        Err(resp) => resp,
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct UpdateTripRequest {
    status: Option<TripStatus>,
    /// null unassigns the driver
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    driver_id: Option<Option<String>>,
    #[validate(length(min = 1, max = 30))]
    vehicle_number: Option<String>,
    delivery_sequence: Option<Vec<DeliveryStop>>,
}

/// Planners may change anything; the assigned driver only the status.
#[utoipa::path(
    patch,
    path = "/v1/logistics/trips/{id}",
    tag = "Logistics",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Trip id")),
    request_body = UpdateTripRequest,
    responses(
        (status = 200, description = "Updated trip", body = DeliveryTrip),
        (status = 400, description = "Invalid status transition", body = crate::api::ApiError),
        (status = 403, description = "Not allowed", body = crate::api::ApiError)
    )
)]
async fn update_trip(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<UpdateTripRequest>,
) -> impl IntoResponse {
    let trip = match load_trip(&state, &trace_id, &identity, &id).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let planning = req.driver_id.is_some()
        || req.vehicle_number.is_some()
        || req.delivery_sequence.is_some();
    let allowed = plans(&identity, &trip) || (is_driver(&identity, &trip) && !planning);
    if !allowed {
        return forbidden(&trace_id, "not allowed to change this trip");
    }
    if let Some(Some(driver_id)) = &req.driver_id {
        if let Some(resp) = check_driver(&state, &trace_id, driver_id).await {
            return resp;
        }
    }
    let update = TripUpdate {
        status: req.status,
        driver_id: req.driver_id,
        vehicle_number: req.vehicle_number,
        delivery_sequence: req.delivery_sequence,
    };
    match state.store.update_trip(&id, update, &identity.actor()).await {
        Ok(Some(trip)) => success_response(StatusCode::OK, &trace_id, trip),
        Ok(None) => not_found(&trace_id, "delivery trip", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct TrackingRequest {
    #[validate(range(min = -90.0, max = 90.0))]
    latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    longitude: f64,
    #[validate(range(min = 0.0))]
    speed_kmh: Option<f64>,
    /// Degrees clockwise from north
    #[validate(range(min = 0.0, max = 360.0))]
    heading: Option<f64>,
    /// Defaults to the time the point is received
    recorded_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, ToSchema)]
struct TrackingResponse {
    trip: DeliveryTrip,
    point: TripTrackingPoint,
}

/// Records a GPS point. The first point starts a SCHEDULED trip.
#[utoipa::path(
    post,
    path = "/v1/logistics/trips/{id}/tracking",
    tag = "Logistics",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Trip id")),
    request_body = TrackingRequest,
    responses(
        (status = 201, description = "Point recorded", body = TrackingResponse),
        (status = 409, description = "Trip already closed", body = crate::api::ApiError)
    )
)]
async fn append_tracking(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<TrackingRequest>,
) -> impl IntoResponse {
    let trip = match load_trip(&state, &trace_id, &identity, &id).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    if !plans(&identity, &trip) && !is_driver(&identity, &trip) {
        return forbidden(&trace_id, "only the driver or planners track this trip");
    }
    let point = NewTrackingPoint {
        latitude: req.latitude,
        longitude: req.longitude,
        speed_kmh: req.speed_kmh,
        heading: req.heading,
        recorded_at: req.recorded_at.unwrap_or_else(Utc::now),
    };
    match state.store.append_tracking(&id, point, &identity.actor()).await {
        Ok(Some((trip, point))) => {
            success_response(StatusCode::CREATED, &trace_id, TrackingResponse { trip, point })
        }
        Ok(None) => not_found(&trace_id, "delivery trip", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

/// Oldest first.
#[utoipa::path(
    get,
    path = "/v1/logistics/trips/{id}/tracking",
    tag = "Logistics",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Trip id"), PaginationParams),
    responses(
        (status = 200, description = "Paginated tracking points", body = Vec<TripTrackingPoint>)
    )
)]
async fn list_tracking(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    if let Err(resp) = load_trip(&state, &trace_id, &identity, &id).await {
        return resp;
    }
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_tracking(&id).await {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state.store.list_tracking(&id, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    post,
    path = "/v1/logistics/trips/{id}/complete",
    tag = "Logistics",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Trip id")),
    responses(
        (status = 200, description = "Trip delivered", body = DeliveryTrip),
        (status = 400, description = "Trip has not departed", body = crate::api::ApiError)
    )
)]
async fn complete_trip(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let trip = match load_trip(&state, &trace_id, &identity, &id).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    if !plans(&identity, &trip) && !is_driver(&identity, &trip) {
        return forbidden(&trace_id, "only the driver or planners complete this trip");
    }
    match state.store.complete_trip(&id, &identity.actor()).await {
        Ok(Some(trip)) => success_response(StatusCode::OK, &trace_id, trip),
        Ok(None) => not_found(&trace_id, "delivery trip", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

pub fn logistics_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_trips, create_trip))
        .routes(routes!(get_trip, update_trip))
        .routes(routes!(append_tracking, list_tracking))
        .routes(routes!(complete_trip))
}
