use crate::config::AuthConfig;
use anyhow::Result;
use fortify_common::types::Role;
use fortify_storage::auth::hash_password;
use fortify_storage::store::{NewUser, UserFilter};
use fortify_storage::{Actor, FortifyStore};

/// Creates the configured administrator when no active SYSTEM_ADMIN exists.
/// Returns the new user's id, or None when an admin was already present.
pub async fn ensure_default_admin(store: &FortifyStore, auth: &AuthConfig) -> Result<Option<String>> {
    let admins = store
        .count_users(&UserFilter {
            role: Some(Role::SystemAdmin),
            is_active: Some(true),
            ..Default::default()
        })
        .await?;
    if admins > 0 {
        tracing::info!(count = admins, "Administrator already present, skipping default admin creation");
        return Ok(None);
    }
    let password_hash = hash_password(&auth.default_admin_password)?;
    let user = store
        .create_user(
            NewUser {
                email: auth.default_admin_email.clone(),
                name: "Administrator".to_string(),
                password_hash,
                role: Role::SystemAdmin,
                mill_id: None,
            },
            &Actor::system(),
        )
        .await?;
    tracing::info!(email = %user.email, "Created default admin account");
    Ok(Some(user.id))
}
