use axum::body::Body;
use axum::extract::{ConnectInfo, Extension, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fortify_common::models::User;
use fortify_common::types::{LoginRequest, Role};
use fortify_storage::auth::{hash_password, verify_password};
use fortify_storage::Actor;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use utoipa::ToSchema;
use validator::Validate;

use crate::api::{
    bad_request, error_response, forbidden, store_error, success_empty_response, success_response,
    ApiError, ValidJson,
};
use crate::logging::TraceId;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub mill_id: Option<String>,
    /// Must equal the user's current token version
    pub token_version: i32,
    pub iat: u64,
    pub exp: u64,
}

pub fn create_token(secret: &str, user: &User, expire_secs: u64) -> anyhow::Result<String> {
    let now = chrono::Utc::now().timestamp() as u64;
    let claims = Claims {
        sub: user.id.clone(),
        email: user.email.clone(),
        role: user.role,
        mill_id: user.mill_id.clone(),
        token_version: user.token_version,
        iat: now,
        exp: now + expire_secs,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

pub fn validate_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// The authenticated requester, inserted into request extensions by
/// [`jwt_auth_middleware`]. Role and mill come from the live user row.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub mill_id: Option<String>,
    pub ip_address: Option<String>,
}

impl Identity {
    pub fn actor(&self) -> Actor {
        Actor::user(self.user_id.clone(), self.ip_address.clone())
    }

    pub fn is_any(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }

    /// The mill this requester is confined to; None means every mill.
    /// Only mill roles are confined. A mill recorded on any other account
    /// is an affiliation, not a boundary.
    pub fn mill_scope(&self) -> Option<&str> {
        if self.role.is_mill_role() {
            self.mill_id.as_deref()
        } else {
            None
        }
    }

    pub fn can_access_mill(&self, mill_id: &str) -> bool {
        self.mill_scope().map_or(true, |own| own == mill_id)
    }
}

fn auth_error(trace_id: &str, code: &str, msg: &str) -> Response {
    error_response(StatusCode::UNAUTHORIZED, trace_id, code, msg)
}

/// Bearer-token authentication.
///
/// Rejects tokens whose version no longer matches the user (password change,
/// role change, deactivation) and mill roles without an assigned mill.
pub async fn jwt_auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let trace_id = req
        .extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default();

    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) if !token.is_empty() => token,
        Some(_) => return auth_error(&trace_id, "unauthorized", "invalid authorization header"),
        None if auth_header.is_some() => {
            return auth_error(&trace_id, "unauthorized", "invalid authorization header")
        }
        None => return auth_error(&trace_id, "unauthorized", "missing authorization header"),
    };

    let claims = match validate_token(&state.jwt_secret, token) {
        Ok(claims) => claims,
        Err(e) => {
            if matches!(e.kind(), jsonwebtoken::errors::ErrorKind::ExpiredSignature) {
                return auth_error(&trace_id, "token_expired", "token expired");
            }
            return auth_error(&trace_id, "unauthorized", "invalid token");
        }
    };

    let user = match state.store.get_user(&claims.sub).await {
        Ok(Some(user)) => user,
        Ok(None) => return auth_error(&trace_id, "unauthorized", "unknown user"),
        Err(e) => return store_error(&trace_id, e),
    };
    if !user.is_active {
        return auth_error(&trace_id, "unauthorized", "account is disabled");
    }
    if user.token_version != claims.token_version {
        return auth_error(&trace_id, "unauthorized", "token has been revoked");
    }
    if user.role.is_mill_role() && user.mill_id.is_none() {
        return forbidden(&trace_id, "account is not assigned to a mill");
    }

    let ip_address = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    req.extensions_mut().insert(Identity {
        user_id: user.id,
        email: user.email,
        role: user.role,
        mill_id: user.mill_id,
        ip_address,
    });
    next.run(req).await
}

#[derive(Serialize, ToSchema)]
pub struct LoginResponse {
    pub access_token: String,
    /// Always "Bearer"
    pub token_type: String,
    pub expires_in: u64,
    pub user: User,
}

/// Exchange e-mail and password for a session token.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = LoginResponse),
        (status = 400, description = "Missing fields", body = ApiError),
        (status = 401, description = "Wrong credentials or disabled account", body = ApiError)
    )
)]
pub async fn login(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return bad_request(&trace_id, "email and password are required");
    }

    let (user, password_hash) = match state.store.get_user_credentials(&req.email).await {
        Ok(Some(found)) => found,
        Ok(None) => return auth_error(&trace_id, "unauthorized", "invalid credentials"),
        Err(e) => return store_error(&trace_id, e),
    };

    match verify_password(&req.password, &password_hash) {
        Ok(true) => {}
        Ok(false) => return auth_error(&trace_id, "unauthorized", "invalid credentials"),
        Err(e) => {
            tracing::warn!(user_id = %user.id, error = %e, "Stored password hash is unreadable");
            return auth_error(&trace_id, "unauthorized", "invalid credentials");
        }
    }
    if !user.is_active {
        return auth_error(&trace_id, "unauthorized", "account is disabled");
    }

    let access_token = match create_token(&state.jwt_secret, &user, state.token_expire_secs) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create token");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "internal_error",
                "internal error",
            );
        }
    };

    let actor = Actor::user(
        user.id.clone(),
        connect_info.map(|Extension(ConnectInfo(addr))| addr.ip().to_string()),
    );
    if let Err(e) = state.store.record_login(&user.id, &actor).await {
        tracing::warn!(user_id = %user.id, error = %e, "Failed to record login");
    }
    tracing::info!(user_id = %user.id, role = %user.role, "User signed in");

    success_response(
        StatusCode::OK,
        &trace_id,
        LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: state.token_expire_secs,
            user,
        },
    )
}

/// The signed-in user's profile.
#[utoipa::path(
    get,
    path = "/v1/auth/me",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Not signed in", body = ApiError)
    )
)]
pub async fn me(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.store.get_user(&identity.user_id).await {
        Ok(Some(user)) => success_response(StatusCode::OK, &trace_id, user),
        Ok(None) => auth_error(&trace_id, "unauthorized", "unknown user"),
        Err(e) => store_error(&trace_id, e),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    #[validate(length(min = 8, message = "new password must be at least 8 characters"))]
    pub new_password: String,
}

/// Change the signed-in user's password. Every token issued before the
/// change stops working.
#[utoipa::path(
    post,
    path = "/v1/auth/password",
    tag = "Auth",
    security(("bearer_auth" = [])),
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed"),
        (status = 400, description = "Weak new password", body = ApiError),
        (status = 401, description = "Current password is wrong", body = ApiError)
    )
)]
pub async fn change_password(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<ChangePasswordRequest>,
) -> impl IntoResponse {
    let current_hash = match state.store.get_password_hash(&identity.user_id).await {
        Ok(Some(hash)) => hash,
        Ok(None) => return auth_error(&trace_id, "unauthorized", "unknown user"),
        Err(e) => return store_error(&trace_id, e),
    };
    if !matches!(verify_password(&req.current_password, &current_hash), Ok(true)) {
        return auth_error(&trace_id, "unauthorized", "current password is incorrect");
    }
    if req.current_password == req.new_password {
        return bad_request(&trace_id, "new password must differ from the current one");
    }

    let new_hash = match hash_password(&req.new_password) {
        Ok(hash) => hash,
        Err(e) => return store_error(&trace_id, e),
    };
    match state
        .store
        .change_password(&identity.user_id, &new_hash, &identity.actor())
        .await
    {
        Ok(true) => success_empty_response(StatusCode::OK, &trace_id, "password changed"),
        Ok(false) => auth_error(&trace_id, "unauthorized", "unknown user"),
        Err(e) => store_error(&trace_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(role: Role, mill_id: Option<&str>) -> User {
        User {
            id: "u-1".into(),
            email: "a@b.c".into(),
            name: "A".into(),
            role,
            mill_id: mill_id.map(str::to_string),
            is_active: true,
            token_version: 3,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn token_round_trip_keeps_role_and_version() {
        let token = create_token("secret", &user(Role::MillManager, Some("m-1")), 60).unwrap();
        let claims = validate_token("secret", &token).unwrap();
        assert_eq!(claims.sub, "u-1");
        assert_eq!(claims.role, Role::MillManager);
        assert_eq!(claims.mill_id.as_deref(), Some("m-1"));
        assert_eq!(claims.token_version, 3);
        assert!(validate_token("other-secret", &token).is_err());
    }

    #[test]
    fn admin_is_never_mill_scoped() {
        let identity = Identity {
            user_id: "u".into(),
            email: "e".into(),
            role: Role::SystemAdmin,
            mill_id: Some("m-1".into()),
            ip_address: None,
        };
        assert_eq!(identity.mill_scope(), None);
        assert!(identity.can_access_mill("m-2"));

        let manager = Identity {
            role: Role::MillManager,
            ..identity
        };
        assert_eq!(manager.mill_scope(), Some("m-1"));
        assert!(manager.can_access_mill("m-1"));
        assert!(!manager.can_access_mill("m-2"));
    }

    #[test]
    fn oversight_roles_with_a_mill_stay_unscoped() {
        for role in [Role::Inspector, Role::ProgramManager] {
            let identity = Identity {
                user_id: "u".into(),
                email: "e".into(),
                role,
                mill_id: Some("m-1".into()),
                ip_address: None,
            };
            assert_eq!(identity.mill_scope(), None);
            assert!(identity.can_access_mill("m-2"));
        }
    }
}
