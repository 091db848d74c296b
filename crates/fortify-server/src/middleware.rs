use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use fortify_common::types::Role;

use crate::api::forbidden;
use crate::auth::Identity;
use crate::logging::TraceId;

/// Resources every signed-in role may reach.
const SHARED_RESOURCES: &[&str] = &["auth", "alerts", "notifications", "dashboard"];

/// Resources (first path segment after `/v1/`) a role may reach in addition
/// to [`SHARED_RESOURCES`]. SYSTEM_ADMIN is handled separately.
fn role_resources(role: Role) -> &'static [&'static str] {
    match role {
        Role::SystemAdmin => &[],
        Role::ProgramManager => &[
            "mills",
            "equipment",
            "sensors",
            "maintenance",
            "compliance",
            "training",
            "rfps",
            "logistics",
            "audit-logs",
        ],
        Role::Inspector => &["mills", "compliance", "training"],
        Role::MillManager => &[
            "mills",
            "equipment",
            "sensors",
            "maintenance",
            "compliance",
            "training",
            "rfps",
            "logistics",
        ],
        Role::MillOperator => &["equipment", "sensors", "maintenance", "training"],
        Role::InstitutionalBuyer => &["rfps", "logistics"],
        Role::LogisticsCoordinator => &["logistics"],
    }
}

/// Whether `role` may call anything under `path`.
pub fn role_allows(role: Role, path: &str) -> bool {
    let Some(rest) = path.strip_prefix("/v1/") else {
        return false;
    };
    if role.is_admin() {
        return true;
    }
    let resource = rest.split('/').next().unwrap_or_default();
    SHARED_RESOURCES.contains(&resource) || role_resources(role).contains(&resource)
}

/// Route-level RBAC. Runs after [`crate::auth::jwt_auth_middleware`].
pub async fn role_guard(req: Request<Body>, next: Next) -> Response {
    let trace_id = req
        .extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default();
    let Some(identity) = req.extensions().get::<Identity>() else {
        return forbidden(&trace_id, "no identity on request");
    };
    let path = req.uri().path();
    if !role_allows(identity.role, path) {
        tracing::warn!(
            trace_id = %trace_id,
            user_id = %identity.user_id,
            role = %identity.role,
            path = %path,
            "Request rejected by role matrix"
        );
        return forbidden(
            &trace_id,
            &format!("role {} may not access {path}", identity.role),
        );
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_reaches_everything() {
        assert!(role_allows(Role::SystemAdmin, "/v1/users"));
        assert!(role_allows(Role::SystemAdmin, "/v1/audit-logs"));
    }

    #[test]
    fn shared_routes_are_open_to_all_roles() {
        for role in Role::ALL {
            assert!(role_allows(*role, "/v1/alerts"));
            assert!(role_allows(*role, "/v1/notifications/read-all"));
            assert!(role_allows(*role, "/v1/dashboard"));
            assert!(role_allows(*role, "/v1/auth/me"));
        }
    }

    #[test]
    fn users_are_admin_only() {
        for role in Role::ALL.iter().filter(|r| !r.is_admin()) {
            assert!(!role_allows(*role, "/v1/users"), "{role}");
        }
    }

    #[test]
    fn matrix_denies_outside_prefixes() {
        assert!(role_allows(Role::MillOperator, "/v1/sensors/1/readings"));
        assert!(!role_allows(Role::MillOperator, "/v1/compliance/audits"));
        assert!(!role_allows(Role::MillOperator, "/v1/mills"));
        assert!(role_allows(Role::Inspector, "/v1/compliance/audits/1/review"));
        assert!(!role_allows(Role::Inspector, "/v1/equipment"));
        assert!(role_allows(Role::InstitutionalBuyer, "/v1/rfps/1/bids"));
        assert!(!role_allows(Role::InstitutionalBuyer, "/v1/maintenance/tasks"));
        assert!(role_allows(Role::LogisticsCoordinator, "/v1/logistics/trips"));
        assert!(!role_allows(Role::LogisticsCoordinator, "/v1/rfps"));
        assert!(role_allows(Role::ProgramManager, "/v1/audit-logs"));
        assert!(!role_allows(Role::MillManager, "/v1/audit-logs"));
    }

    #[test]
    fn segment_must_match_exactly() {
        assert!(!role_allows(Role::LogisticsCoordinator, "/v1/logistics-admin"));
        assert!(!role_allows(Role::ProgramManager, "/health"));
    }
}
