use crate::api::pagination::PaginationParams;
use crate::api::{
    ensure_mill, forbidden, not_found, scoped_mill_filter, store_error,
    success_paginated_response, success_response, ValidJson,
};
use crate::auth::Identity;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fortify_analytics::compliance::{
    parse_rules, parse_sections, score_documents, validate_rules, validate_template,
    what_if_analysis, Responses, ScoreBreakdown, WhatIfResult,
};
use fortify_analytics::AnalyticsError;
use fortify_common::models::{
    ComplianceAnnotation, ComplianceAudit, ComplianceTemplate, MillCertificate,
};
use fortify_common::types::{AnnotationType, AuditStatus, Role};
use fortify_storage::store::{AuditFilter, NewTemplate, TemplateFilter, TemplateRevision};
use serde::Deserialize;
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

const TEMPLATE_AUTHORS: &[Role] = &[Role::SystemAdmin, Role::ProgramManager];
/// May start audits and edit their responses.
const AUDIT_OWNERS: &[Role] = &[Role::SystemAdmin, Role::ProgramManager, Role::MillManager];

/// Parses and cross-checks a sections document against its rules document.
pub(crate) fn check_template_documents(sections: &Value, rules: &Value) -> Result<(), AnalyticsError> {
    let sections = parse_sections(sections)?;
    let rules = parse_rules(rules)?;
    validate_template(&sections)?;
    validate_rules(&rules, &sections)
}

async fn load_template(
    state: &AppState,
    trace_id: &str,
    id: &str,
) -> Result<ComplianceTemplate, Response> {
    match state.store.get_template(id).await {
        Ok(Some(template)) => Ok(template),
        Ok(None) => Err(not_found(trace_id, "compliance template", id)),
        Err(e) => Err(store_error(trace_id, e)),
    }
}

async fn load_audit(
    state: &AppState,
    trace_id: &str,
    identity: &Identity,
    id: &str,
) -> Result<ComplianceAudit, Response> {
    match state.store.get_audit(id).await {
        Ok(Some(audit)) if identity.can_access_mill(&audit.mill_id) => Ok(audit),
        Ok(Some(_)) => Err(forbidden(trace_id, "audit belongs to another mill")),
        Ok(None) => Err(not_found(trace_id, "compliance audit", id)),
        Err(e) => Err(store_error(trace_id, e)),
    }
}

/// Scores the audit's stored responses against its template.
async fn score_audit(
    state: &AppState,
    trace_id: &str,
    audit: &ComplianceAudit,
) -> Result<ScoreBreakdown, Response> {
    let template = load_template(state, trace_id, &audit.template_id).await?;
    score_documents(&template.sections, &template.scoring_rules, &audit.responses)
        .map_err(|e| store_error(trace_id, e.into()))
}

// ---- templates ----

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListTemplatesParams {
    #[param(required = false, rename = "name__eq")]
    #[serde(rename = "name__eq")]
    name_eq: Option<String>,
    /// Only the current version of each template
    #[param(required = false)]
    #[serde(default)]
    active_only: bool,
}

#[utoipa::path(
    get,
    path = "/v1/compliance/templates",
    tag = "Compliance",
    security(("bearer_auth" = [])),
    params(ListTemplatesParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated templates", body = Vec<ComplianceTemplate>)
    )
)]
async fn list_templates(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListTemplatesParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let filter = TemplateFilter {
        active_only: params.active_only,
        name: params.name_eq,
    };
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_templates(&filter).await {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state.store.list_templates(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct CreateTemplateRequest {
    #[validate(length(min = 1, max = 200))]
    name: String,
    description: Option<String>,
    /// Array of sections, each with weighted items
    #[schema(value_type = Object)]
    sections: Value,
    /// pass_threshold, red_flags, red_flag_policy, section_minimums
    #[schema(value_type = Object)]
    scoring_rules: Value,
}

#[utoipa::path(
    post,
    path = "/v1/compliance/templates",
    tag = "Compliance",
    security(("bearer_auth" = [])),
    request_body = CreateTemplateRequest,
    responses(
        (status = 201, description = "Template created at version 1", body = ComplianceTemplate),
        (status = 400, description = "Malformed sections or rules", body = crate::api::ApiError),
        (status = 409, description = "Name already used", body = crate::api::ApiError)
    )
)]
async fn create_template(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CreateTemplateRequest>,
) -> impl IntoResponse {
    if !identity.is_any(TEMPLATE_AUTHORS) {
        return forbidden(&trace_id, "only administrators and program managers author templates");
    }
    if let Err(e) = check_template_documents(&req.sections, &req.scoring_rules) {
        return store_error(&trace_id, e.into());
    }
    let new = NewTemplate {
        name: req.name,
        description: req.description,
        sections: req.sections,
        scoring_rules: req.scoring_rules,
    };
    match state.store.create_template(new, &identity.actor()).await {
        Ok(template) => success_response(StatusCode::CREATED, &trace_id, template),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/compliance/templates/{id}",
    tag = "Compliance",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Template id")),
    responses(
        (status = 200, description = "Template", body = ComplianceTemplate),
        (status = 404, description = "No such template", body = crate::api::ApiError)
    )
)]
async fn get_template(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match load_template(&state, &trace_id, &id).await {
        Ok(template) => success_response(StatusCode::OK, &trace_id, template),
        Err(resp) => resp,
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct NewVersionRequest {
    description: Option<String>,
    #[schema(value_type = Option<Object>)]
    sections: Option<Value>,
    #[schema(value_type = Option<Object>)]
    scoring_rules: Option<Value>,
}

/// Publishes the next version of a template; omitted documents are copied
/// from `{id}`. Earlier versions are deactivated but kept.
#[utoipa::path(
    post,
    path = "/v1/compliance/templates/{id}/versions",
    tag = "Compliance",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Template id to revise")),
    request_body = NewVersionRequest,
    responses(
        (status = 201, description = "New template version", body = ComplianceTemplate),
        (status = 400, description = "Malformed sections or rules", body = crate::api::ApiError),
        (status = 404, description = "No such template", body = crate::api::ApiError)
    )
)]
async fn create_template_version(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<NewVersionRequest>,
) -> impl IntoResponse {
    if !identity.is_any(TEMPLATE_AUTHORS) {
        return forbidden(&trace_id, "only administrators and program managers author templates");
    }
    let parent = match load_template(&state, &trace_id, &id).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let sections = req.sections.as_ref().unwrap_or(&parent.sections);
    let rules = req.scoring_rules.as_ref().unwrap_or(&parent.scoring_rules);
    if let Err(e) = check_template_documents(sections, rules) {
        return store_error(&trace_id, e.into());
    }
    let revision = TemplateRevision {
        description: req.description,
        sections: req.sections,
        scoring_rules: req.scoring_rules,
    };
    match state
        .store
        .create_template_version(&id, revision, &identity.actor())
        .await
    {
        Ok(Some(template)) => success_response(StatusCode::CREATED, &trace_id, template),
        Ok(None) => not_found(&trace_id, "compliance template", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

// ---- audits ----

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListAuditsParams {
    #[param(required = false, rename = "mill_id__eq")]
    #[serde(rename = "mill_id__eq")]
    mill_id_eq: Option<String>,
    #[param(required = false, rename = "template_id__eq")]
    #[serde(rename = "template_id__eq")]
    template_id_eq: Option<String>,
    #[param(required = false, rename = "status__eq")]
    #[serde(rename = "status__eq")]
    status_eq: Option<AuditStatus>,
}

#[utoipa::path(
    get,
    path = "/v1/compliance/audits",
    tag = "Compliance",
    security(("bearer_auth" = [])),
    params(ListAuditsParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated audits", body = Vec<ComplianceAudit>)
    )
)]
async fn list_audits(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(params): Query<ListAuditsParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let mill_id = match scoped_mill_filter(&trace_id, &identity, params.mill_id_eq) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let filter = AuditFilter {
        mill_id,
        template_id: params.template_id_eq,
        status: params.status_eq,
    };
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_audits(&filter).await {
        Ok(v) => v,
        Err(e) => return store_error(&trace_id, e),
    };
    match state.store.list_audits(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct StartAuditRequest {
    /// Defaults to the requester's own mill
    mill_id: Option<String>,
    template_id: String,
}

#[utoipa::path(
    post,
    path = "/v1/compliance/audits",
    tag = "Compliance",
    security(("bearer_auth" = [])),
    request_body = StartAuditRequest,
    responses(
        (status = 201, description = "Audit opened", body = ComplianceAudit),
        (status = 400, description = "No mill given", body = crate::api::ApiError),
        (status = 404, description = "No such mill or template", body = crate::api::ApiError),
        (status = 409, description = "Template superseded", body = crate::api::ApiError)
    )
)]
async fn start_audit(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<StartAuditRequest>,
) -> impl IntoResponse {
    if !identity.is_any(AUDIT_OWNERS) {
        return forbidden(&trace_id, "not allowed to open audits");
    }
    let Some(mill_id) = req.mill_id.or_else(|| identity.mill_id.clone()) else {
        return crate::api::bad_request(&trace_id, "mill_id is required");
    };
    if let Some(resp) = ensure_mill(&state, &trace_id, &identity, &mill_id).await {
        return resp;
    }
    match state
        .store
        .start_audit(&mill_id, &req.template_id, &identity.user_id, &identity.actor())
        .await
    {
        Ok(audit) => success_response(StatusCode::CREATED, &trace_id, audit),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/compliance/audits/{id}",
    tag = "Compliance",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Audit id")),
    responses(
        (status = 200, description = "Audit", body = ComplianceAudit),
        (status = 404, description = "No such audit", body = crate::api::ApiError)
    )
)]
async fn get_audit(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match load_audit(&state, &trace_id, &identity, &id).await {
        Ok(audit) => success_response(StatusCode::OK, &trace_id, audit),
        Err(resp) => resp,
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct SaveResponsesRequest {
    /// Item id to answer; null clears an answer
    #[schema(value_type = Object)]
    responses: Responses,
}

#[utoipa::path(
    put,
    path = "/v1/compliance/audits/{id}/responses",
    tag = "Compliance",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Audit id")),
    request_body = SaveResponsesRequest,
    responses(
        (status = 200, description = "Audit with merged responses", body = ComplianceAudit),
        (status = 409, description = "Audit is not editable", body = crate::api::ApiError)
    )
)]
async fn save_responses(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<SaveResponsesRequest>,
) -> impl IntoResponse {
    if !identity.is_any(AUDIT_OWNERS) {
        return forbidden(&trace_id, "not allowed to edit audit responses");
    }
    if let Err(resp) = load_audit(&state, &trace_id, &identity, &id).await {
        return resp;
    }
    match state
        .store
        .save_responses(&id, &req.responses, &identity.actor())
        .await
    {
        Ok(Some(audit)) => success_response(StatusCode::OK, &trace_id, audit),
        Ok(None) => not_found(&trace_id, "compliance audit", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

/// Scores the responses, stores the breakdown and hands the audit to the
/// inspectors.
#[utoipa::path(
    post,
    path = "/v1/compliance/audits/{id}/submit",
    tag = "Compliance",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Audit id")),
    responses(
        (status = 200, description = "Submitted audit", body = ComplianceAudit),
        (status = 400, description = "Invalid status transition", body = crate::api::ApiError)
    )
)]
async fn submit_audit(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if !identity.is_any(AUDIT_OWNERS) {
        return forbidden(&trace_id, "not allowed to submit audits");
    }
    let audit = match load_audit(&state, &trace_id, &identity, &id).await {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let breakdown = match score_audit(&state, &trace_id, &audit).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    match state.store.submit_audit(&id, &breakdown, &identity.actor()).await {
        Ok(Some(audit)) => success_response(StatusCode::OK, &trace_id, audit),
        Ok(None) => not_found(&trace_id, "compliance audit", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

/// Current score of the stored responses. Nothing is persisted.
#[utoipa::path(
    get,
    path = "/v1/compliance/audits/{id}/score",
    tag = "Compliance",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Audit id")),
    responses(
        (status = 200, description = "Score breakdown", body = ScoreBreakdown)
    )
)]
async fn score(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let audit = match load_audit(&state, &trace_id, &identity, &id).await {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match score_audit(&state, &trace_id, &audit).await {
        Ok(breakdown) => success_response(StatusCode::OK, &trace_id, breakdown),
        Err(resp) => resp,
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct WhatIfRequest {
    /// Hypothetical answers merged over the stored ones; null removes an answer
    #[serde(default)]
    #[schema(value_type = Object)]
    overrides: Responses,
}

#[utoipa::path(
    post,
    path = "/v1/compliance/audits/{id}/what-if",
    tag = "Compliance",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Audit id")),
    request_body = WhatIfRequest,
    responses(
        (status = 200, description = "Baseline and projected scores", body = WhatIfResult)
    )
)]
async fn what_if(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<WhatIfRequest>,
) -> impl IntoResponse {
    let audit = match load_audit(&state, &trace_id, &identity, &id).await {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let template = match load_template(&state, &trace_id, &audit.template_id).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let parsed = (|| -> Result<_, AnalyticsError> {
        let sections = parse_sections(&template.sections)?;
        let rules = parse_rules(&template.scoring_rules)?;
        validate_template(&sections)?;
        validate_rules(&rules, &sections)?;
        Ok((sections, rules))
    })();
    match parsed {
        Ok((sections, rules)) => success_response(
            StatusCode::OK,
            &trace_id,
            what_if_analysis(&sections, &audit.responses, &req.overrides, &rules),
        ),
        Err(e) => store_error(&trace_id, e.into()),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct ReviewRequest {
    /// APPROVED, REJECTED or REVISION_REQUESTED
    decision: AuditStatus,
    #[validate(length(max = 4000))]
    notes: Option<String>,
}

#[utoipa::path(
    post,
    path = "/v1/compliance/audits/{id}/review",
    tag = "Compliance",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Audit id")),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Reviewed audit", body = ComplianceAudit),
        (status = 400, description = "Invalid status transition", body = crate::api::ApiError),
        (status = 403, description = "Reviewers only", body = crate::api::ApiError),
        (status = 409, description = "Not a review decision", body = crate::api::ApiError)
    )
)]
async fn review_audit(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<ReviewRequest>,
) -> impl IntoResponse {
    if !identity.role.is_oversight() {
        return forbidden(&trace_id, "only inspectors, program managers and administrators review audits");
    }
    match state
        .store
        .review_audit(&id, req.decision, req.notes, &identity.actor())
        .await
    {
        Ok(Some(audit)) => success_response(StatusCode::OK, &trace_id, audit),
        Ok(None) => not_found(&trace_id, "compliance audit", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

#[utoipa::path(
    get,
    path = "/v1/compliance/audits/{id}/annotations",
    tag = "Compliance",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Audit id")),
    responses(
        (status = 200, description = "Annotations, oldest first", body = Vec<ComplianceAnnotation>)
    )
)]
async fn list_annotations(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(resp) = load_audit(&state, &trace_id, &identity, &id).await {
        return resp;
    }
    match state.store.list_annotations(&id).await {
        Ok(items) => success_response(StatusCode::OK, &trace_id, items),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct AnnotationRequest {
    /// Questionnaire item the note refers to, if any
    item_id: Option<String>,
    #[serde(default = "default_annotation_type")]
    annotation_type: AnnotationType,
    #[validate(length(min = 1, max = 4000))]
    comment: String,
}

fn default_annotation_type() -> AnnotationType {
    AnnotationType::Comment
}

#[utoipa::path(
    post,
    path = "/v1/compliance/audits/{id}/annotations",
    tag = "Compliance",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Audit id")),
    request_body = AnnotationRequest,
    responses(
        (status = 201, description = "Annotation added", body = ComplianceAnnotation)
    )
)]
async fn add_annotation(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<AnnotationRequest>,
) -> impl IntoResponse {
    if let Err(resp) = load_audit(&state, &trace_id, &identity, &id).await {
        return resp;
    }
    match state
        .store
        .add_annotation(&id, req.item_id, req.annotation_type, req.comment, &identity.actor())
        .await
    {
        Ok(annotation) => success_response(StatusCode::CREATED, &trace_id, annotation),
        Err(e) => store_error(&trace_id, e),
    }
}

/// Issues the mill certificate for an approved audit that meets the
/// configured minimum score. One certificate per audit.
#[utoipa::path(
    post,
    path = "/v1/compliance/audits/{id}/certificate",
    tag = "Compliance",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Audit id")),
    responses(
        (status = 201, description = "Certificate issued", body = MillCertificate),
        (status = 400, description = "Audit does not qualify", body = crate::api::ApiError),
        (status = 409, description = "Already issued", body = crate::api::ApiError)
    )
)]
async fn issue_certificate(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if !identity.role.is_oversight() {
        return forbidden(&trace_id, "only inspectors, program managers and administrators issue certificates");
    }
    let compliance = &state.config.compliance;
    match state
        .store
        .issue_certificate(
            &id,
            compliance.certificate_min_score,
            compliance.certificate_validity_days,
            &identity.actor(),
        )
        .await
    {
        Ok(Some(certificate)) => success_response(StatusCode::CREATED, &trace_id, certificate),
        Ok(None) => not_found(&trace_id, "compliance audit", &id),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListCertificatesParams {
    #[param(required = false, rename = "mill_id__eq")]
    #[serde(rename = "mill_id__eq")]
    mill_id_eq: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/compliance/certificates",
    tag = "Compliance",
    security(("bearer_auth" = [])),
    params(ListCertificatesParams),
    responses(
        (status = 200, description = "Certificates, newest first", body = Vec<MillCertificate>)
    )
)]
async fn list_certificates(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(params): Query<ListCertificatesParams>,
) -> impl IntoResponse {
    let mill_id = match scoped_mill_filter(&trace_id, &identity, params.mill_id_eq) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.store.list_certificates(mill_id.as_deref()).await {
        Ok(items) => success_response(StatusCode::OK, &trace_id, items),
        Err(e) => store_error(&trace_id, e),
    }
}

pub fn compliance_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_templates, create_template))
        .routes(routes!(get_template))
        .routes(routes!(create_template_version))
        .routes(routes!(list_audits, start_audit))
        .routes(routes!(get_audit))
        .routes(routes!(save_responses))
        .routes(routes!(submit_audit))
        .routes(routes!(score))
        .routes(routes!(what_if))
        .routes(routes!(review_audit))
        .routes(routes!(list_annotations, add_annotation))
        .routes(routes!(issue_certificate))
        .routes(routes!(list_certificates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sections() -> Value {
        json!([{
            "id": "premix",
            "title": "Premix handling",
            "weight": 1.0,
            "items": [
                { "id": "storage", "question": "Premix stored dry?", "type": "boolean" }
            ]
        }])
    }

    #[test]
    fn accepts_consistent_documents() {
        let rules = json!({ "pass_threshold": 70.0, "red_flag_policy": "fail_audit" });
        assert!(check_template_documents(&sections(), &rules).is_ok());
    }

    #[test]
    fn rejects_rules_pointing_at_unknown_items() {
        let rules = json!({
            "red_flag_policy": "advisory",
            "red_flags": [{
                "id": "rf-1",
                "item_id": "missing",
                "operator": "equals",
                "value": false,
                "severity": "CRITICAL",
                "message": "no such item"
            }]
        });
        assert!(matches!(
            check_template_documents(&sections(), &rules),
            Err(AnalyticsError::InvalidRules(_))
        ));
    }

    #[test]
    fn rejects_non_array_sections() {
        assert!(matches!(
            check_template_documents(&json!({"id": "x"}), &json!({})),
            Err(AnalyticsError::InvalidSections(_))
        ));
    }
}
