use crate::api::pagination::PaginationParams;
use crate::api::{
    bad_request, forbidden, not_found, store_error, success_paginated_response, success_response,
    ValidJson,
};
use crate::auth::Identity;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use fortify_common::models::{Rfp, RfpBid};
use fortify_common::types::{RfpStatus, Role};
use fortify_storage::store::{NewBid, NewRfp, RfpFilter, RfpUpdate};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

const PROGRAM_STAFF: &[Role] = &[Role::SystemAdmin, Role::ProgramManager];

/// Statuses visible to requesters who neither own the RFP nor run the program.
const PUBLISHED: &[RfpStatus] = &[RfpStatus::Open, RfpStatus::Closed, RfpStatus::Awarded];

fn owns(identity: &Identity, rfp: &Rfp) -> bool {
    identity.is_any(PROGRAM_STAFF) || rfp.buyer_id == identity.user_id
}

/// Drafts and cancelled RFPs are hidden from anyone but their owner.
async fn load_rfp(
    state: &AppState,
    trace_id: &str,
    identity: &Identity,
    id: &str,
) -> Result<Rfp, Response> {
    match state.store.get_rfp(id).await {
        Ok(Some(rfp)) if owns(identity, &rfp) || PUBLISHED.contains(&rfp.status) => Ok(rfp),
        Ok(_) => Err(not_found(trace_id, "rfp", id)),
        Err(e) => Err(store_error(trace_id, e)),
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListRfpsParams {
    #[param(required = false, rename = "status__eq")]
    #[serde(rename = "status__eq")]
    status_eq: Option<RfpStatus>,
    #[param(required = false, rename = "commodity__eq")]
    #[serde(rename = "commodity__eq")]
    commodity_eq: Option<String>,
}

/// Buyers see their own RFPs; mills and coordinators see published ones.
#[utoipa::path(
    get,
    path = "/v1/rfps",
    tag = "RFPs",
    security(("bearer_auth" = [])),
    params(ListRfpsParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated RFPs", body = Vec<Rfp>)
    )
)]
async fn list_rfps(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(params): Query<ListRfpsParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let mut filter = RfpFilter {
        commodity: params.commodity_eq,
        ..Default::default()
    };
    if identity.role == Role::InstitutionalBuyer {
        filter.buyer_id = Some(identity.user_id.clone());
        filter.statuses = params.status_eq.into_iter().collect();
    } else if identity.is_any(PROGRAM_STAFF) {
        filter.statuses = params.status_eq.into_iter().collect();
    } else {
        filter.statuses = match params.status_eq {
            Some(status) if PUBLISHED.contains(&status) => vec![status],
            Some(_) => {
                return success_paginated_response(
                    StatusCode::OK,
                    &trace_id,
                    Vec::<Rfp>::new(),
                    0,
                    pagination.limit(),
                    pagination.offset(),
                )
            }
            None => PUBLISHED.to_vec(),
        };
    }
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_rfps(&filter).await {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state.store.list_rfps(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct CreateRfpRequest {
    #[validate(length(min = 1, max = 200))]
    title: String,
    description: Option<String>,
    /// e.g. fortified wheat flour, fortified maize meal
    #[validate(length(min = 1, max = 100))]
    commodity: String,
    #[validate(range(exclusive_min = 0.0))]
    quantity: f64,
    #[validate(length(min = 1, max = 30))]
    unit: String,
    #[validate(length(min = 1))]
    delivery_location: String,
    #[validate(range(exclusive_min = 0.0))]
    budget: Option<f64>,
    deadline: DateTime<Utc>,
}

/// New RFPs start as DRAFT.
#[utoipa::path(
    post,
    path = "/v1/rfps",
    tag = "RFPs",
    security(("bearer_auth" = [])),
    request_body = CreateRfpRequest,
    responses(
        (status = 201, description = "RFP drafted", body = Rfp),
        (status = 400, description = "Deadline in the past", body = crate::api::ApiError),
        (status = 403, description = "Not allowed", body = crate::api::ApiError)
    )
)]
async fn create_rfp(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CreateRfpRequest>,
) -> impl IntoResponse {
    if identity.role != Role::InstitutionalBuyer && !identity.is_any(PROGRAM_STAFF) {
        return forbidden(&trace_id, "only buyers and program staff publish RFPs");
    }
    if req.deadline <= Utc::now() {
        return bad_request(&trace_id, "deadline must be in the future");
    }
    let new = NewRfp {
        buyer_id: identity.user_id.clone(),
        title: req.title,
        description: req.description,
        commodity: req.commodity,
        quantity: req.quantity,
        unit: req.unit,
        delivery_location: req.delivery_location,
        budget: req.budget,
        deadline: req.deadline,
    };
    match state.store.create_rfp(new, &identity.actor()).await {
        Ok(rfp) => success_response(StatusCode::CREATED, &trace_id, rfp),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/rfps/{id}",
    tag = "RFPs",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "RFP id")),
    responses(
        (status = 200, description = "RFP", body = Rfp),
        (status = 404, description = "No such RFP", body = crate::api::ApiError)
    )
)]
async fn get_rfp(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match load_rfp(&state, &trace_id, &identity, &id).await {
        Ok(rfp) => success_response(StatusCode::OK, &trace_id, rfp),
        Err(resp) => resp,
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct UpdateRfpRequest {
    #[validate(length(min = 1, max = 200))]
    title: Option<String>,
    description: Option<String>,
    commodity: Option<String>,
    #[validate(range(exclusive_min = 0.0))]
    quantity: Option<f64>,
    unit: Option<String>,
    delivery_location: Option<String>,
    #[validate(range(exclusive_min = 0.0))]
    budget: Option<f64>,
    deadline: Option<DateTime<Utc>>,
    /// Follows the RFP transition table; AWARDED is reached through a bid
    status: Option<RfpStatus>,
}

/// Fields are editable while DRAFT; status moves follow the transition table.
#[utoipa::path(
    patch,
    path = "/v1/rfps/{id}",
    tag = "RFPs",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "RFP id")),
    request_body = UpdateRfpRequest,
    responses(
        (status = 200, description = "Updated RFP", body = Rfp),
        (status = 400, description = "Invalid status transition", body = crate::api::ApiError),
        (status = 409, description = "Not editable", body = crate::api::ApiError)
    )
)]
async fn update_rfp(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<UpdateRfpRequest>,
) -> impl IntoResponse {
    let rfp = match load_rfp(&state, &trace_id, &identity, &id).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if !owns(&identity, &rfp) {
        return forbidden(&trace_id, "only the issuing buyer edits this RFP");
    }
    let update = RfpUpdate {
        title: req.title,
        description: req.description,
        commodity: req.commodity,
        quantity: req.quantity,
        unit: req.unit,
        delivery_location: req.delivery_location,
        budget: req.budget,
        deadline: req.deadline,
        status: req.status,
    };
    match state.store.update_rfp(&id, update, &identity.actor()).await {
        Ok(Some(rfp)) => success_response(StatusCode::OK, &trace_id, rfp),
        Ok(None) => not_found(&trace_id, "rfp", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

/// The issuer sees every bid; a mill manager sees their mill's bid.
#[utoipa::path(
    get,
    path = "/v1/rfps/{id}/bids",
    tag = "RFPs",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "RFP id")),
    responses(
        (status = 200, description = "Bids, lowest price first", body = Vec<RfpBid>),
        (status = 403, description = "Not allowed", body = crate::api::ApiError)
    )
)]
async fn list_bids(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let rfp = match load_rfp(&state, &trace_id, &identity, &id).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let mill_id = if owns(&identity, &rfp) {
        None
    } else if identity.role == Role::MillManager {
        identity.mill_id.clone()
    } else {
        return forbidden(&trace_id, "bids are visible to the issuer and bidding mills");
    };
    match state.store.list_bids(&id, mill_id.as_deref()).await {
        Ok(items) => success_response(StatusCode::OK, &trace_id, items),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct CreateBidRequest {
    #[validate(range(exclusive_min = 0.0))]
    price_per_unit: f64,
    #[validate(range(exclusive_min = 0.0))]
    quantity: f64,
    notes: Option<String>,
}

/// Mill managers bid for their own mill on OPEN RFPs, once per RFP.
#[utoipa::path(
    post,
    path = "/v1/rfps/{id}/bids",
    tag = "RFPs",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "RFP id")),
    request_body = CreateBidRequest,
    responses(
        (status = 201, description = "Bid submitted", body = RfpBid),
        (status = 403, description = "Mill managers only", body = crate::api::ApiError),
        (status = 409, description = "RFP not open or mill already bid", body = crate::api::ApiError)
    )
)]
async fn create_bid(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<CreateBidRequest>,
) -> impl IntoResponse {
    let Some(mill_id) = identity
        .mill_id
        .clone()
        .filter(|_| identity.role == Role::MillManager)
    else {
        return forbidden(&trace_id, "only mill managers bid on RFPs");
    };
    if let Err(resp) = load_rfp(&state, &trace_id, &identity, &id).await {
        return resp;
    }
    let new = NewBid {
        mill_id,
        submitted_by: identity.user_id.clone(),
        price_per_unit: req.price_per_unit,
        quantity: req.quantity,
        notes: req.notes,
    };
    match state.store.create_bid(&id, new, &identity.actor()).await {
        Ok(bid) => success_response(StatusCode::CREATED, &trace_id, bid),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct AwardRequest {
    bid_id: String,
}

/// Accepts one bid and rejects the rest.
#[utoipa::path(
    post,
    path = "/v1/rfps/{id}/award",
    tag = "RFPs",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "RFP id")),
    request_body = AwardRequest,
    responses(
        (status = 200, description = "Awarded RFP", body = Rfp),
        (status = 400, description = "RFP cannot be awarded", body = crate::api::ApiError),
        (status = 404, description = "No such RFP or bid", body = crate::api::ApiError)
    )
)]
async fn award_bid(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<AwardRequest>,
) -> impl IntoResponse {
    let rfp = match load_rfp(&state, &trace_id, &identity, &id).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if !owns(&identity, &rfp) {
        return forbidden(&trace_id, "only the issuing buyer awards this RFP");
    }
    match state.store.award_bid(&id, &req.bid_id, &identity.actor()).await {
        Ok(Some(rfp)) => {
            tracing::info!(rfp_id = %id, bid_id = %req.bid_id, "RFP awarded");
            success_response(StatusCode::OK, &trace_id, rfp)
        }
        Ok(None) => not_found(&trace_id, "rfp", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

pub fn rfp_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_rfps, create_rfp))
        .routes(routes!(get_rfp, update_rfp))
        .routes(routes!(list_bids, create_bid))
        .routes(routes!(award_bid))
}
