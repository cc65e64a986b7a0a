//! Seeding user rows and signing in.

use super::{AccountKind, Claims, TokenIssuer, UNAUTHENTICATED_TOKEN, UserGroup};
use crate::ids;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

/// User row to seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    /// Primary key.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Unique e-mail.
    pub email: String,
    /// Role group.
    pub group: UserGroup,
    /// Organisation.
    pub school_id: i64,
    /// Tenant path.
    pub resource_path: String,
}

impl NewUser {
    /// A user with generated id, name and e-mail.
    #[must_use]
    pub fn generated(group: UserGroup, school_id: i64, resource_path: &str) -> Self {
        let user_id = ids::new_id();
        let suffix = ids::random_suffix();
        Self {
            name: format!("bdd-{}-{suffix}", group.as_str().to_ascii_lowercase()),
            email: format!("bdd-{suffix}-{user_id}@example.com"),
            user_id,
            group,
            school_id,
            resource_path: resource_path.to_owned(),
        }
    }
}

/// Where seeded users are written.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Persist `user` together with its group membership.
    async fn insert_user(&self, user: &NewUser) -> Result<()>;
}

/// [`AccountStore`] writing to the platform's user tables.
#[derive(Debug, Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    /// Store writing through `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn insert_user(&self, user: &NewUser) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await.context("begin user insert")?;
        sqlx::query(
            "INSERT INTO users (user_id, name, email, user_group, country, resource_path, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 'COUNTRY_VN', $5, $6, $6)",
        )
        .bind(&user.user_id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.group.as_str())
        .bind(&user.resource_path)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("insert user {}", user.user_id))?;
        sqlx::query(
            "INSERT INTO users_groups (user_id, group_id, is_origin, status, resource_path, created_at, updated_at) \
             VALUES ($1, $2, true, 'USER_GROUP_STATUS_ACTIVE', $3, $4, $4)",
        )
        .bind(&user.user_id)
        .bind(user.group.as_str())
        .bind(&user.resource_path)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("insert group of user {}", user.user_id))?;
        match user.group {
            UserGroup::SchoolAdmin => {
                sqlx::query(
                    "INSERT INTO school_admins (school_admin_id, school_id, resource_path, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $4)",
                )
                .bind(&user.user_id)
                .bind(user.school_id)
                .bind(&user.resource_path)
                .bind(now)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("insert school admin {}", user.user_id))?;
            }
            UserGroup::Teacher => {
                sqlx::query(
                    "INSERT INTO teachers (teacher_id, school_ids, resource_path, created_at, updated_at) \
                     VALUES ($1, ARRAY[$2::int], $3, $4, $4)",
                )
                .bind(&user.user_id)
                .bind(user.school_id)
                .bind(&user.resource_path)
                .bind(now)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("insert teacher {}", user.user_id))?;
            }
            UserGroup::Student => {
                sqlx::query(
                    "INSERT INTO students (student_id, school_id, current_grade, resource_path, created_at, updated_at) \
                     VALUES ($1, $2, 12, $3, $4, $4)",
                )
                .bind(&user.user_id)
                .bind(user.school_id)
                .bind(&user.resource_path)
                .bind(now)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("insert student {}", user.user_id))?;
            }
            UserGroup::Admin | UserGroup::Parent => {}
        }
        tx.commit().await.context("commit user insert")
    }
}

/// Outcome of signing in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedIn {
    /// Seeded user, or the placeholder id for unauthenticated accounts.
    pub user_id: String,
    /// Group of the seeded user.
    pub group: Option<UserGroup>,
    /// Token to send with calls.
    pub token: String,
}

impl SignedIn {
    /// Placeholder identity carrying the fixed invalid token.
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self {
            user_id: UNAUTHENTICATED_TOKEN.to_owned(),
            group: None,
            token: UNAUTHENTICATED_TOKEN.to_owned(),
        }
    }

    /// Claims for acting as this user.
    #[must_use]
    pub fn claims(&self, school_id: i64, resource_path: &str) -> Option<Claims> {
        self.group.map(|group| Claims {
            user_id: self.user_id.clone(),
            group,
            school_id,
            resource_path: resource_path.to_owned(),
        })
    }
}

/// Seed an account of `kind` and obtain a token for it.
///
/// Unauthenticated accounts touch neither the store nor the issuer.
///
/// # Errors
///
/// Fails when the row cannot be written or no token can be issued.
pub async fn sign_in(
    store: &dyn AccountStore,
    issuer: &dyn TokenIssuer,
    kind: AccountKind,
    school_id: i64,
    resource_path: &str,
) -> Result<SignedIn> {
    let Some(group) = kind.user_group() else {
        return Ok(SignedIn::unauthenticated());
    };
    let user = NewUser::generated(group, school_id, resource_path);
    store.insert_user(&user).await?;
    let token = issuer
        .issue(&user.user_id, group)
        .await
        .with_context(|| format!("issue token for {group} {}", user.user_id))?;
    tracing::debug!(user_id = %user.user_id, %group, "signed in");
    Ok(SignedIn {
        user_id: user.user_id,
        group: Some(group),
        token,
    })
}
