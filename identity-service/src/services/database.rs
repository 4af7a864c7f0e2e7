//! Relational credential store: users, organizations, memberships, linked
//! auth methods and SSO configuration.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{
    leaves_organization_without_admin, LinkedAuthMethod, MemberSummary, Membership,
    MembershipChange, Organization, OrganizationWithRole, ProviderKind, Role, SsoConfig, User,
    PASSWORD_METHOD,
};

use super::ServiceError;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn health_check(&self) -> Result<(), ServiceError>;

    // Users
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError>;
    /// Fails with `EmailAlreadyRegistered` when the email is taken.
    async fn insert_user(&self, user: &User) -> Result<(), ServiceError>;

    // Organizations
    /// Inserts the organization and the creator's admin membership as one unit.
    /// Fails with `SlugTaken` without side effects when the slug exists.
    async fn create_organization(
        &self,
        org: &Organization,
        creator_id: Uuid,
    ) -> Result<Membership, ServiceError>;
    async fn find_organization_by_id(
        &self,
        org_id: Uuid,
    ) -> Result<Option<Organization>, ServiceError>;
    async fn find_organization_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<Organization>, ServiceError>;
    async fn list_organizations_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<OrganizationWithRole>, ServiceError>;
    async fn delete_organization(&self, org_id: Uuid) -> Result<bool, ServiceError>;

    // Memberships
    async fn find_membership(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Membership>, ServiceError>;
    async fn list_members(&self, org_id: Uuid) -> Result<Vec<MemberSummary>, ServiceError>;
    async fn is_member_by_email(&self, org_id: Uuid, email: &str) -> Result<bool, ServiceError>;
    /// Returns false when the user was already a member (role untouched).
    async fn insert_membership_if_absent(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<bool, ServiceError>;
    /// Role change and removal run with the organization row locked and
    /// refuse any change that leaves the organization without an admin.
    async fn change_member_role(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<MembershipChange, ServiceError>;
    async fn remove_member(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<MembershipChange, ServiceError>;

    // Authentication methods
    async fn list_auth_methods(&self, user_id: Uuid)
        -> Result<Vec<LinkedAuthMethod>, ServiceError>;
    async fn upsert_auth_method(&self, method: &LinkedAuthMethod) -> Result<(), ServiceError>;
    /// Removes a linked provider, or the password when `method` is
    /// `"password"`. Returns false when the user has no such method and
    /// `LastAuthMethod` when it is the only one left.
    async fn remove_auth_method(&self, user_id: Uuid, method: &str) -> Result<bool, ServiceError>;

    // SSO configuration
    async fn find_sso_config(
        &self,
        org_id: Uuid,
        provider: ProviderKind,
    ) -> Result<Option<SsoConfig>, ServiceError>;
    async fn upsert_sso_config(&self, config: &SsoConfig) -> Result<SsoConfig, ServiceError>;
}

fn db_err(e: sqlx::Error) -> ServiceError {
    ServiceError::Database(anyhow::anyhow!(e))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open the pool and bring the schema in `migrations/` up to date.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            "Connecting to PostgreSQL"
        );
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect(config.url.expose_secret())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to PostgreSQL: {}", e))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to apply migrations: {}", e))?;
        tracing::info!("Credential store ready");

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl CredentialStore for Database {
    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                db_err(e)
            })?;
        Ok(())
    }

    // ==================== User Operations ====================

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn insert_user(&self, user: &User) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, email, display_name, password_hash, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::EmailAlreadyRegistered
            } else {
                db_err(e)
            }
        })?;
        Ok(())
    }

    // ==================== Organization Operations ====================

    async fn create_organization(
        &self,
        org: &Organization,
        creator_id: Uuid,
    ) -> Result<Membership, ServiceError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO organizations (org_id, org_name, org_slug, created_utc)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(org.org_id)
        .bind(&org.org_name)
        .bind(&org.org_slug)
        .bind(org.created_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::SlugTaken
            } else {
                db_err(e)
            }
        })?;

        let membership = sqlx::query_as::<_, Membership>(
            r#"
            INSERT INTO organization_members (org_id, user_id, role_code, created_utc, updated_utc)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(org.org_id)
        .bind(creator_id)
        .bind(Role::Admin.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(membership)
    }

    async fn find_organization_by_id(
        &self,
        org_id: Uuid,
    ) -> Result<Option<Organization>, ServiceError> {
        sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE org_id = $1")
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_organization_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<Organization>, ServiceError> {
        sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE org_slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn list_organizations_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<OrganizationWithRole>, ServiceError> {
        sqlx::query_as::<_, OrganizationWithRole>(
            r#"
            SELECT o.org_id, o.org_name, o.org_slug, m.role_code, o.created_utc
            FROM organizations o
            JOIN organization_members m ON m.org_id = o.org_id
            WHERE m.user_id = $1
            ORDER BY o.org_name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn delete_organization(&self, org_id: Uuid) -> Result<bool, ServiceError> {
        let result = sqlx::query("DELETE FROM organizations WHERE org_id = $1")
            .bind(org_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    // ==================== Membership Operations ====================

    async fn find_membership(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Membership>, ServiceError> {
        sqlx::query_as::<_, Membership>(
            "SELECT * FROM organization_members WHERE org_id = $1 AND user_id = $2",
        )
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_members(&self, org_id: Uuid) -> Result<Vec<MemberSummary>, ServiceError> {
        sqlx::query_as::<_, MemberSummary>(
            r#"
            SELECT u.user_id, u.email, u.display_name, m.role_code, m.created_utc
            FROM organization_members m
            JOIN users u ON u.user_id = m.user_id
            WHERE m.org_id = $1
            ORDER BY m.created_utc
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn is_member_by_email(&self, org_id: Uuid, email: &str) -> Result<bool, ServiceError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM organization_members m
                JOIN users u ON u.user_id = m.user_id
                WHERE m.org_id = $1 AND u.email = $2
            )
            "#,
        )
        .bind(org_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn insert_membership_if_absent(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            INSERT INTO organization_members (org_id, user_id, role_code, created_utc, updated_utc)
            VALUES ($1, $2, $3, NOW(), NOW())
            ON CONFLICT (org_id, user_id) DO NOTHING
            "#,
        )
        .bind(org_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn change_member_role(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<MembershipChange, ServiceError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let Some(current) = lock_and_read_membership(&mut tx, org_id, user_id).await? else {
            return Ok(MembershipChange::NotMember);
        };

        let admins = count_admins(&mut tx, org_id).await?;
        if leaves_organization_without_admin(current.role(), Some(role), admins) {
            return Ok(MembershipChange::LastAdmin);
        }

        let updated = sqlx::query_as::<_, Membership>(
            r#"
            UPDATE organization_members
            SET role_code = $3, updated_utc = NOW()
            WHERE org_id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(org_id)
        .bind(user_id)
        .bind(role.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(MembershipChange::Updated(updated))
    }

    async fn remove_member(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<MembershipChange, ServiceError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let Some(current) = lock_and_read_membership(&mut tx, org_id, user_id).await? else {
            return Ok(MembershipChange::NotMember);
        };

        let admins = count_admins(&mut tx, org_id).await?;
        if leaves_organization_without_admin(current.role(), None, admins) {
            return Ok(MembershipChange::LastAdmin);
        }

        sqlx::query("DELETE FROM organization_members WHERE org_id = $1 AND user_id = $2")
            .bind(org_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(MembershipChange::Removed)
    }

    // ==================== Auth Method Operations ====================

    async fn list_auth_methods(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<LinkedAuthMethod>, ServiceError> {
        sqlx::query_as::<_, LinkedAuthMethod>(
            "SELECT * FROM linked_auth_methods WHERE user_id = $1 ORDER BY provider_code",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn upsert_auth_method(&self, method: &LinkedAuthMethod) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO linked_auth_methods (user_id, provider_code, provider_subject, created_utc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, provider_code)
            DO UPDATE SET provider_subject = EXCLUDED.provider_subject
            "#,
        )
        .bind(method.user_id)
        .bind(&method.provider_code)
        .bind(&method.provider_subject)
        .bind(method.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn remove_auth_method(&self, user_id: Uuid, method: &str) -> Result<bool, ServiceError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Row lock serializes concurrent unlinks for the same user.
        let Some(user) =
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?
        else {
            return Ok(false);
        };

        let linked: Vec<String> = sqlx::query_scalar(
            "SELECT provider_code FROM linked_auth_methods WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        let is_password = method == PASSWORD_METHOD;
        let present = if is_password {
            user.has_password()
        } else {
            linked.iter().any(|p| p == method)
        };
        if !present {
            return Ok(false);
        }

        let total = linked.len() + usize::from(user.has_password());
        if total <= 1 {
            return Err(ServiceError::LastAuthMethod);
        }

        if is_password {
            sqlx::query("UPDATE users SET password_hash = NULL WHERE user_id = $1")
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        } else {
            sqlx::query(
                "DELETE FROM linked_auth_methods WHERE user_id = $1 AND provider_code = $2",
            )
            .bind(user_id)
            .bind(method)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    // ==================== SSO Operations ====================

    async fn find_sso_config(
        &self,
        org_id: Uuid,
        provider: ProviderKind,
    ) -> Result<Option<SsoConfig>, ServiceError> {
        sqlx::query_as::<_, SsoConfig>(
            "SELECT * FROM sso_configs WHERE org_id = $1 AND provider_code = $2",
        )
        .bind(org_id)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn upsert_sso_config(&self, config: &SsoConfig) -> Result<SsoConfig, ServiceError> {
        sqlx::query_as::<_, SsoConfig>(
            r#"
            INSERT INTO sso_configs
                (org_id, provider_code, client_id, client_secret, tenant_qualifier, enabled_flag, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            ON CONFLICT (org_id, provider_code) DO UPDATE SET
                client_id = EXCLUDED.client_id,
                client_secret = EXCLUDED.client_secret,
                tenant_qualifier = EXCLUDED.tenant_qualifier,
                enabled_flag = EXCLUDED.enabled_flag,
                updated_utc = NOW()
            RETURNING *
            "#,
        )
        .bind(config.org_id)
        .bind(&config.provider_code)
        .bind(&config.client_id)
        .bind(&config.client_secret)
        .bind(&config.tenant_qualifier)
        .bind(config.enabled_flag)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }
}

/// Lock the organization row, then read the target membership.
async fn lock_and_read_membership(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    org_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Membership>, ServiceError> {
    let locked: Option<Uuid> =
        sqlx::query_scalar("SELECT org_id FROM organizations WHERE org_id = $1 FOR UPDATE")
            .bind(org_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?;

    if locked.is_none() {
        return Ok(None);
    }

    sqlx::query_as::<_, Membership>(
        "SELECT * FROM organization_members WHERE org_id = $1 AND user_id = $2",
    )
    .bind(org_id)
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_err)
}

async fn count_admins(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    org_id: Uuid,
) -> Result<i64, ServiceError> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM organization_members WHERE org_id = $1 AND role_code = 'admin'",
    )
    .bind(org_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(db_err)
}
