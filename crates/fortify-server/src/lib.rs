//! HTTP server for the FortifyMIS portal.
//!
//! [`app::build_http_app`] assembles the axum router: public health and login
//! routes, then every `/v1/*` resource behind JWT authentication and the
//! role matrix, plus the OpenAPI document and Swagger UI.

pub mod admin_seed;
pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod logging;
pub mod middleware;
pub mod openapi;
pub mod state;
pub mod template_seed;
