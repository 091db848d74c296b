use anyhow::Result;
use fortify_common::models::User;
use fortify_common::types::Role;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, TransactionTrait,
};
use serde_json::json;

use crate::entities::user::{self, Column, Entity};
use crate::store::{conflict_on_unique, now, parse_enum, record_audit, utc, Actor, FortifyStore};

pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub mill_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub role: Option<Role>,
    /// `Some(None)` clears the assignment
    pub mill_id: Option<Option<String>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub mill_id: Option<String>,
    pub is_active: Option<bool>,
    pub email_contains: Option<String>,
}

fn to_user(m: user::Model) -> Result<User> {
    Ok(User {
        role: parse_enum("users.role", &m.role)?,
        id: m.id,
        email: m.email,
        name: m.name,
        mill_id: m.mill_id,
        is_active: m.is_active,
        token_version: m.token_version,
        created_at: utc(m.created_at),
        updated_at: utc(m.updated_at),
    })
}

fn filtered(filter: &UserFilter) -> Select<Entity> {
    let mut q = Entity::find();
    if let Some(role) = filter.role {
        q = q.filter(Column::Role.eq(role.as_str()));
    }
    if let Some(mill_id) = &filter.mill_id {
        q = q.filter(Column::MillId.eq(mill_id.as_str()));
    }
    if let Some(active) = filter.is_active {
        q = q.filter(Column::IsActive.eq(active));
    }
    if let Some(email) = &filter.email_contains {
        q = q.filter(Column::Email.contains(email.as_str()));
    }
    q
}

impl FortifyStore {
    pub async fn create_user(&self, new: NewUser, actor: &Actor) -> Result<User> {
        let now = now();
        let txn = self.db().begin().await?;
        let am = user::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            email: Set(new.email.trim().to_lowercase()),
            name: Set(new.name),
            password_hash: Set(new.password_hash),
            role: Set(new.role.as_str().to_owned()),
            mill_id: Set(new.mill_id),
            is_active: Set(true),
            token_version: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am
            .insert(&txn)
            .await
            .map_err(|e| conflict_on_unique(e, "a user with this email already exists"))?;
        record_audit(
            &txn,
            actor,
            "CREATE",
            "user",
            &model.id,
            Some(json!({ "email": model.email, "role": model.role })),
        )
        .await?;
        txn.commit().await?;
        to_user(model)
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_user).transpose()
    }

    /// Looks up a user and their password hash for login.
    pub async fn get_user_credentials(&self, email: &str) -> Result<Option<(User, String)>> {
        let model = Entity::find()
            .filter(Column::Email.eq(email.trim().to_lowercase()))
            .one(self.db())
            .await?;
        match model {
            Some(m) => {
                let hash = m.password_hash.clone();
                Ok(Some((to_user(m)?, hash)))
            }
            None => Ok(None),
        }
    }

    pub async fn get_password_hash(&self, id: &str) -> Result<Option<String>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(|m| m.password_hash))
    }

    pub async fn list_users(&self, filter: &UserFilter, limit: u64, offset: u64) -> Result<Vec<User>> {
        let rows = filtered(filter)
            .order_by(Column::CreatedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_user).collect()
    }

    pub async fn count_users(&self, filter: &UserFilter) -> Result<u64> {
        Ok(filtered(filter).count(self.db()).await?)
    }

    /// Role, mill or activation changes revoke outstanding tokens.
    pub async fn update_user(&self, id: &str, update: UserUpdate, actor: &Actor) -> Result<Option<User>> {
        let txn = self.db().begin().await?;
        let Some(m) = Entity::find_by_id(id).one(&txn).await? else {
            return Ok(None);
        };
        let revoke = update.role.is_some() || update.mill_id.is_some() || update.is_active == Some(false);
        let version = m.token_version;
        let mut am: user::ActiveModel = m.into();
        if let Some(name) = &update.name {
            am.name = Set(name.clone());
        }
        if let Some(role) = update.role {
            am.role = Set(role.as_str().to_owned());
        }
        if let Some(mill_id) = &update.mill_id {
            am.mill_id = Set(mill_id.clone());
        }
        if let Some(active) = update.is_active {
            am.is_active = Set(active);
        }
        if revoke {
            am.token_version = Set(version + 1);
        }
        am.updated_at = Set(now());
        let updated = am.update(&txn).await?;
        record_audit(
            &txn,
            actor,
            "UPDATE",
            "user",
            id,
            Some(json!({
                "name": update.name,
                "role": update.role,
                "mill_id": update.mill_id,
                "is_active": update.is_active,
            })),
        )
        .await?;
        txn.commit().await?;
        Ok(Some(to_user(updated)?))
    }

    pub async fn deactivate_user(&self, id: &str, actor: &Actor) -> Result<Option<User>> {
        self.update_user(
            id,
            UserUpdate {
                is_active: Some(false),
                ..Default::default()
            },
            actor,
        )
        .await
    }

    /// Replaces the password hash and bumps the token version.
    pub async fn change_password(&self, id: &str, password_hash: &str, actor: &Actor) -> Result<bool> {
        let txn = self.db().begin().await?;
        let Some(m) = Entity::find_by_id(id).one(&txn).await? else {
            return Ok(false);
        };
        let version = m.token_version;
        let mut am: user::ActiveModel = m.into();
        am.password_hash = Set(password_hash.to_owned());
        am.token_version = Set(version + 1);
        am.updated_at = Set(now());
        am.update(&txn).await?;
        record_audit(&txn, actor, "CHANGE_PASSWORD", "user", id, None).await?;
        txn.commit().await?;
        Ok(true)
    }

    /// Audit-only record of a successful sign-in.
    pub async fn record_login(&self, user_id: &str, actor: &Actor) -> Result<()> {
        record_audit(self.db(), actor, "LOGIN", "user", user_id, None).await
    }

    /// Active users holding `role`, optionally restricted to one mill.
    pub async fn active_users_with_role(&self, role: Role, mill_id: Option<&str>) -> Result<Vec<User>> {
        users_with_role(self.db(), role, mill_id).await
    }
}

pub(crate) async fn users_with_role<C: sea_orm::ConnectionTrait>(
    conn: &C,
    role: Role,
    mill_id: Option<&str>,
) -> Result<Vec<User>> {
    let mut q = Entity::find()
        .filter(Column::Role.eq(role.as_str()))
        .filter(Column::IsActive.eq(true));
    if let Some(mill_id) = mill_id {
        q = q.filter(Column::MillId.eq(mill_id));
    }
    let rows = q.all(conn).await?;
    rows.into_iter().map(to_user).collect()
}
