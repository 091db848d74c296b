use crate::api::equipment::load_equipment;
use crate::api::pagination::PaginationParams;
use crate::api::{
    bad_request, error_response, forbidden, not_found, scoped_mill_filter, store_error,
    success_paginated_response, success_response, double_option, ValidJson,
};
use crate::auth::Identity;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};
use fortify_analytics::threshold::evaluate_reading;
use fortify_common::models::{IotSensor, SensorAlert, SensorReading};
use fortify_common::types::Role;
use fortify_storage::store::{
    IotSensorExt, NewSensor, SensorAlertFilter, SensorFilter, SensorUpdate,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

const SENSOR_EDITORS: &[Role] = &[Role::SystemAdmin, Role::ProgramManager, Role::MillManager];

/// Readings stamped further ahead than this are rejected as clock errors.
const MAX_CLOCK_SKEW_MINUTES: i64 = 5;

pub(crate) async fn load_sensor(
    state: &AppState,
    trace_id: &str,
    identity: &Identity,
    id: &str,
) -> Result<IotSensor, Response> {
    match state.store.get_sensor(id).await {
        Ok(Some(sensor)) if identity.can_access_mill(&sensor.mill_id) => Ok(sensor),
        Ok(Some(_)) => Err(forbidden(trace_id, "sensor belongs to another mill")),
        Ok(None) => Err(not_found(trace_id, "sensor", id)),
        Err(e) => Err(store_error(trace_id, e)),
    }
}

/// min < max <= critical, for whichever bounds are present.
fn check_thresholds(
    min: Option<f64>,
    max: Option<f64>,
    critical: Option<f64>,
) -> Result<(), String> {
    for value in [min, max, critical].into_iter().flatten() {
        if !value.is_finite() {
            return Err("thresholds must be finite numbers".into());
        }
    }
    if let (Some(min), Some(max)) = (min, max) {
        if min >= max {
            return Err("min_threshold must be below max_threshold".into());
        }
    }
    if let (Some(max), Some(critical)) = (max, critical) {
        if critical < max {
            return Err("critical_threshold must not be below max_threshold".into());
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListSensorsParams {
    #[param(required = false, rename = "mill_id__eq")]
    #[serde(rename = "mill_id__eq")]
    mill_id_eq: Option<String>,
    #[param(required = false, rename = "equipment_id__eq")]
    #[serde(rename = "equipment_id__eq")]
    equipment_id_eq: Option<String>,
    #[param(required = false, rename = "sensor_type__eq")]
    #[serde(rename = "sensor_type__eq")]
    sensor_type_eq: Option<String>,
    #[param(required = false, rename = "is_active__eq")]
    #[serde(rename = "is_active__eq")]
    is_active_eq: Option<bool>,
}

#[utoipa::path(
    get,
    path = "/v1/sensors",
    tag = "Sensors",
    security(("bearer_auth" = [])),
    params(ListSensorsParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated sensors", body = Vec<IotSensor>)
    )
)]
async fn list_sensors(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(params): Query<ListSensorsParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let mill_id = match scoped_mill_filter(&trace_id, &identity, params.mill_id_eq) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let filter = SensorFilter {
        mill_id,
        equipment_id: params.equipment_id_eq,
        sensor_type: params.sensor_type_eq,
        is_active: params.is_active_eq,
    };
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_sensors(&filter).await {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state.store.list_sensors(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct RegisterSensorRequest {
    equipment_id: String,
    #[validate(length(min = 1, max = 200))]
    name: String,
    /// e.g. temperature, vibration, dosing_rate
    #[validate(length(min = 1, max = 100))]
    sensor_type: String,
    #[validate(length(min = 1, max = 30))]
    unit: String,
    min_threshold: Option<f64>,
    max_threshold: Option<f64>,
    critical_threshold: Option<f64>,
    calibration_date: Option<DateTime<Utc>>,
    next_calibration_date: Option<DateTime<Utc>>,
}

/// Registers a sensor on a piece of equipment; the mill is taken from the
/// equipment.
#[utoipa::path(
    post,
    path = "/v1/sensors",
    tag = "Sensors",
    security(("bearer_auth" = [])),
    request_body = RegisterSensorRequest,
    responses(
        (status = 201, description = "Sensor registered", body = IotSensor),
        (status = 400, description = "Inconsistent thresholds", body = crate::api::ApiError),
        (status = 404, description = "No such equipment", body = crate::api::ApiError)
    )
)]
async fn register_sensor(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<RegisterSensorRequest>,
) -> impl IntoResponse {
    if !identity.is_any(SENSOR_EDITORS) {
        return forbidden(&trace_id, "not allowed to register sensors");
    }
    if let Err(msg) = check_thresholds(req.min_threshold, req.max_threshold, req.critical_threshold) {
        return bad_request(&trace_id, &msg);
    }
    let equipment = match load_equipment(&state, &trace_id, &identity, &req.equipment_id).await {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let new = NewSensor {
        equipment_id: equipment.id,
        mill_id: equipment.mill_id,
        name: req.name,
        sensor_type: req.sensor_type,
        unit: req.unit,
        min_threshold: req.min_threshold,
        max_threshold: req.max_threshold,
        critical_threshold: req.critical_threshold,
        calibration_date: req.calibration_date,
        next_calibration_date: req.next_calibration_date,
    };
    match state.store.create_sensor(new, &identity.actor()).await {
        Ok(sensor) => success_response(StatusCode::CREATED, &trace_id, sensor),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/sensors/{id}",
    tag = "Sensors",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Sensor id")),
    responses(
        (status = 200, description = "Sensor", body = IotSensor),
        (status = 404, description = "No such sensor", body = crate::api::ApiError)
    )
)]
async fn get_sensor(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match load_sensor(&state, &trace_id, &identity, &id).await {
        Ok(sensor) => success_response(StatusCode::OK, &trace_id, sensor),
        Err(resp) => resp,
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct UpdateSensorRequest {
    #[validate(length(min = 1, max = 200))]
    name: Option<String>,
    unit: Option<String>,
    /// null clears the bound
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<f64>)]
    min_threshold: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<f64>)]
    max_threshold: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<f64>)]
    critical_threshold: Option<Option<f64>>,
    calibration_date: Option<DateTime<Utc>>,
    next_calibration_date: Option<DateTime<Utc>>,
    is_active: Option<bool>,
}

#[utoipa::path(
    patch,
    path = "/v1/sensors/{id}",
    tag = "Sensors",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Sensor id")),
    request_body = UpdateSensorRequest,
    responses(
        (status = 200, description = "Updated sensor", body = IotSensor),
        (status = 400, description = "Inconsistent thresholds", body = crate::api::ApiError),
        (status = 404, description = "No such sensor", body = crate::api::ApiError)
    )
)]
async fn update_sensor(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<UpdateSensorRequest>,
) -> impl IntoResponse {
    if !identity.is_any(SENSOR_EDITORS) {
        return forbidden(&trace_id, "not allowed to edit sensors");
    }
    let sensor = match load_sensor(&state, &trace_id, &identity, &id).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let min = req.min_threshold.unwrap_or(sensor.min_threshold);
    let max = req.max_threshold.unwrap_or(sensor.max_threshold);
    let critical = req.critical_threshold.unwrap_or(sensor.critical_threshold);
    if let Err(msg) = check_thresholds(min, max, critical) {
        return bad_request(&trace_id, &msg);
    }
    let update = SensorUpdate {
        name: req.name,
        unit: req.unit,
        min_threshold: req.min_threshold,
        max_threshold: req.max_threshold,
        critical_threshold: req.critical_threshold,
        calibration_date: req.calibration_date,
        next_calibration_date: req.next_calibration_date,
        is_active: req.is_active,
    };
    match state.store.update_sensor(&id, update, &identity.actor()).await {
        Ok(Some(sensor)) => success_response(StatusCode::OK, &trace_id, sensor),
        Ok(None) => not_found(&trace_id, "sensor", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct AppendReadingRequest {
    value: f64,
    /// Defaults to the time the reading is received
    recorded_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, ToSchema)]
struct ReadingResponse {
    reading: SensorReading,
    /// Present when the reading crossed a threshold
    alert: Option<SensorAlert>,
}

/// Records a reading and checks it against the sensor's thresholds. A breach
/// raises a sensor alert and a portal alert for the mill's managers.
#[utoipa::path(
    post,
    path = "/v1/sensors/{id}/readings",
    tag = "Sensors",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Sensor id")),
    request_body = AppendReadingRequest,
    responses(
        (status = 201, description = "Reading stored", body = ReadingResponse),
        (status = 400, description = "Timestamp in the future", body = crate::api::ApiError),
        (status = 409, description = "Sensor is inactive", body = crate::api::ApiError)
    )
)]
async fn append_reading(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<AppendReadingRequest>,
) -> impl IntoResponse {
    let sensor = match load_sensor(&state, &trace_id, &identity, &id).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    if !sensor.is_active {
        return error_response(StatusCode::CONFLICT, &trace_id, "conflict", "sensor is inactive");
    }
    let now = Utc::now();
    let recorded_at = req.recorded_at.unwrap_or(now);
    if recorded_at > now + Duration::minutes(MAX_CLOCK_SKEW_MINUTES) {
        return bad_request(&trace_id, "recorded_at is in the future");
    }

    let breach = evaluate_reading(&sensor.name, &sensor.unit, req.value, &sensor.thresholds());
    match state
        .store
        .append_reading(&sensor, req.value, recorded_at, breach.as_ref(), &identity.actor())
        .await
    {
        Ok((reading, alert)) => success_response(
            StatusCode::CREATED,
            &trace_id,
            ReadingResponse { reading, alert },
        ),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ReadingRangeParams {
    /// recorded_at >= from
    #[param(required = false)]
    from: Option<DateTime<Utc>>,
    /// recorded_at <= to
    #[param(required = false)]
    to: Option<DateTime<Utc>>,
}

/// Newest first.
#[utoipa::path(
    get,
    path = "/v1/sensors/{id}/readings",
    tag = "Sensors",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Sensor id"), ReadingRangeParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated readings", body = Vec<SensorReading>)
    )
)]
async fn list_readings(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(range): Query<ReadingRangeParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    if let Err(resp) = load_sensor(&state, &trace_id, &identity, &id).await {
        return resp;
    }
    if let (Some(from), Some(to)) = (range.from, range.to) {
        if from > to {
            return bad_request(&trace_id, "from must not be after to");
        }
    }
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_readings(&id, range.from, range.to).await {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state
        .store
        .list_readings(&id, range.from, range.to, limit, offset)
        .await
    {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListSensorAlertsParams {
    #[param(required = false, rename = "mill_id__eq")]
    #[serde(rename = "mill_id__eq")]
    mill_id_eq: Option<String>,
    #[param(required = false, rename = "sensor_id__eq")]
    #[serde(rename = "sensor_id__eq")]
    sensor_id_eq: Option<String>,
    #[param(required = false, rename = "is_resolved__eq")]
    #[serde(rename = "is_resolved__eq")]
    is_resolved_eq: Option<bool>,
}

#[utoipa::path(
    get,
    path = "/v1/sensors/alerts",
    tag = "Sensors",
    security(("bearer_auth" = [])),
    params(ListSensorAlertsParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated sensor alerts", body = Vec<SensorAlert>)
    )
)]
async fn list_sensor_alerts(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(params): Query<ListSensorAlertsParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let mill_id = match scoped_mill_filter(&trace_id, &identity, params.mill_id_eq) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let filter = SensorAlertFilter {
        mill_id,
        sensor_id: params.sensor_id_eq,
        is_resolved: params.is_resolved_eq,
    };
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_sensor_alerts(&filter).await {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state.store.list_sensor_alerts(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    post,
    path = "/v1/sensors/alerts/{id}/resolve",
    tag = "Sensors",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Sensor alert id")),
    responses(
        (status = 200, description = "Resolved alert", body = SensorAlert),
        (status = 404, description = "No such alert", body = crate::api::ApiError),
        (status = 409, description = "Already resolved", body = crate::api::ApiError)
    )
)]
async fn resolve_sensor_alert(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_sensor_alert(&id).await {
        Ok(Some(alert)) if identity.can_access_mill(&alert.mill_id) => {}
        Ok(Some(_)) => return forbidden(&trace_id, "alert belongs to another mill"),
        Ok(None) => return not_found(&trace_id, "sensor alert", &id),
        Err(e) => return store_error(&trace_id, e),
    }
    match state.store.resolve_sensor_alert(&id, &identity.actor()).await {
        Ok(Some(alert)) => success_response(StatusCode::OK, &trace_id, alert),
        Ok(None) => not_found(&trace_id, "sensor alert", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

pub fn sensor_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_sensors, register_sensor))
        .routes(routes!(list_sensor_alerts))
        .routes(routes!(resolve_sensor_alert))
        .routes(routes!(get_sensor, update_sensor))
        .routes(routes!(append_reading, list_readings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_must_be_ordered() {
        assert!(check_thresholds(None, None, None).is_ok());
        assert!(check_thresholds(Some(1.0), Some(5.0), Some(8.0)).is_ok());
        assert!(check_thresholds(Some(5.0), Some(5.0), None).is_err());
        assert!(check_thresholds(None, Some(9.0), Some(8.0)).is_err());
        assert!(check_thresholds(Some(f64::NAN), None, None).is_err());
        assert!(check_thresholds(Some(1.0), None, Some(0.5)).is_ok());
    }
}
