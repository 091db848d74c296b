use crate::state::AppState;
use crate::{api, auth, logging, openapi};
use axum::http::HeaderValue;
use axum::middleware;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "FortifyMIS Portal API",
        description = "Food-fortification program management: mills, equipment telemetry, compliance audits, training, procurement and logistics",
    ),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Auth", description = "Login and session"),
        (name = "Users", description = "User administration"),
        (name = "Mills", description = "Mill registry"),
        (name = "Equipment", description = "Mill equipment"),
        (name = "Sensors", description = "IoT sensors, readings and sensor alerts"),
        (name = "Maintenance", description = "Maintenance tasks and predictive risk"),
        (name = "Alerts", description = "Operational alerts"),
        (name = "Compliance", description = "Templates, audits, scoring and certificates"),
        (name = "Training", description = "Courses, progress and certificates"),
        (name = "Rfps", description = "Procurement requests and bids"),
        (name = "Logistics", description = "Delivery trips and GPS tracking"),
        (name = "Notifications", description = "In-app notifications"),
        (name = "AuditLogs", description = "Audit trail"),
        (name = "Dashboard", description = "Role-specific KPI cards")
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(utoipa::openapi::security::Http::new(
                utoipa::openapi::security::HttpAuthScheme::Bearer,
            )),
        );
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}

pub fn build_http_app(state: AppState) -> Router {
    let (public_router, public_spec) = api::public_routes().split_for_parts();
    let (login_router, login_spec) = api::auth_routes().split_for_parts();
    let (protected_router, protected_spec) = api::protected_routes().split_for_parts();

    let mut merged_spec = ApiDoc::openapi();
    merged_spec.merge(public_spec);
    merged_spec.merge(login_spec);
    merged_spec.merge(protected_spec);
    let spec = Arc::new(merged_spec.clone());

    let cors = cors_layer(&state.config.cors_allowed_origins);

    // The last layer added runs first: authentication, then the role matrix.
    public_router
        .merge(login_router)
        .merge(
            protected_router
                .layer(middleware::from_fn(crate::middleware::role_guard))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth::jwt_auth_middleware,
                )),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/v1/openapi.json", merged_spec))
        .merge(openapi::yaml_route(spec))
        .layer(cors)
        .layer(middleware::from_fn(logging::request_logging))
}
