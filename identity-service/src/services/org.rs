//! Organization & role authority.
//!
//! Every mutation of an organization passes through [`OrganizationService::require_role`].
//! The last-admin invariant itself is enforced inside the store transaction,
//! so the service only translates the outcome.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    validate_slug, MemberSummary, Membership, MembershipChange, Organization,
    OrganizationWithRole, ProviderKind, Role, SsoConfig,
};

use super::{CredentialStore, ServiceError};

/// SSO settings supplied by an admin. `client_secret: None` keeps the stored secret.
#[derive(Debug, Clone)]
pub struct SsoSettings {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub tenant: Option<String>,
    pub enabled: bool,
}

#[derive(Clone)]
pub struct OrganizationService {
    store: Arc<dyn CredentialStore>,
}

impl OrganizationService {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// The caller's membership if their role is at least `minimum`.
    /// Non-members get the same `Forbidden` as under-privileged members.
    pub async fn require_role(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        minimum: Role,
    ) -> Result<Membership, ServiceError> {
        match self.store.find_membership(org_id, user_id).await? {
            Some(m) if m.role().satisfies(minimum) => Ok(m),
            _ => {
                tracing::debug!(%org_id, %user_id, required = %minimum, "Role check failed");
                Err(ServiceError::Forbidden(minimum))
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_organization(
        &self,
        creator_id: Uuid,
        name: &str,
        slug: &str,
    ) -> Result<(Organization, Membership), ServiceError> {
        validate_slug(slug).map_err(ServiceError::InvalidSlug)?;

        let org = Organization::new(name.trim().to_string(), slug.to_string());
        let membership = self.store.create_organization(&org, creator_id).await?;

        tracing::info!(org_id = %org.org_id, slug, "Organization created");
        Ok((org, membership))
    }

    pub async fn get_organization(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<(Organization, Role), ServiceError> {
        let membership = self.require_role(org_id, user_id, Role::Viewer).await?;
        let org = self
            .store
            .find_organization_by_id(org_id)
            .await?
            .ok_or(ServiceError::NotFound("Organization"))?;
        Ok((org, membership.role()))
    }

    pub async fn list_organizations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<OrganizationWithRole>, ServiceError> {
        self.store.list_organizations_for_user(user_id).await
    }

    pub async fn list_members(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<MemberSummary>, ServiceError> {
        self.require_role(org_id, user_id, Role::Viewer).await?;
        self.store.list_members(org_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_organization(&self, org_id: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
        self.require_role(org_id, user_id, Role::Admin).await?;
        if !self.store.delete_organization(org_id).await? {
            return Err(ServiceError::NotFound("Organization"));
        }
        tracing::info!(%org_id, "Organization deleted");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_member_role(
        &self,
        org_id: Uuid,
        actor_id: Uuid,
        target_id: Uuid,
        role: Role,
    ) -> Result<Membership, ServiceError> {
        self.require_role(org_id, actor_id, Role::Admin).await?;
        match self.store.change_member_role(org_id, target_id, role).await? {
            MembershipChange::Updated(m) => {
                tracing::info!(%org_id, %target_id, role = %role, "Member role changed");
                Ok(m)
            }
            other => Err(change_error(other)),
        }
    }

    /// Admins may remove anyone; any member may remove themself.
    #[tracing::instrument(skip(self))]
    pub async fn remove_member(
        &self,
        org_id: Uuid,
        actor_id: Uuid,
        target_id: Uuid,
    ) -> Result<(), ServiceError> {
        let minimum = if actor_id == target_id {
            Role::Viewer
        } else {
            Role::Admin
        };
        self.require_role(org_id, actor_id, minimum).await?;

        match self.store.remove_member(org_id, target_id).await? {
            MembershipChange::Removed => {
                tracing::info!(%org_id, %target_id, "Member removed");
                Ok(())
            }
            other => Err(change_error(other)),
        }
    }

    pub async fn is_member_by_email(&self, org_id: Uuid, email: &str) -> Result<bool, ServiceError> {
        self.store.is_member_by_email(org_id, email).await
    }

    /// Grant `role` to `user_id`: inserted when absent, otherwise a guarded
    /// role change.
    pub async fn grant_membership(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<Membership, ServiceError> {
        if self
            .store
            .insert_membership_if_absent(org_id, user_id, role)
            .await?
        {
            return Ok(Membership::new(org_id, user_id, role));
        }
        match self.store.change_member_role(org_id, user_id, role).await? {
            MembershipChange::Updated(m) => Ok(m),
            other => Err(change_error(other)),
        }
    }

    #[tracing::instrument(skip(self, settings))]
    pub async fn configure_sso(
        &self,
        org_id: Uuid,
        actor_id: Uuid,
        provider: ProviderKind,
        settings: SsoSettings,
    ) -> Result<SsoConfig, ServiceError> {
        self.require_role(org_id, actor_id, Role::Admin).await?;

        let existing = self.store.find_sso_config(org_id, provider).await?;
        let client_secret = match (settings.client_secret, &existing) {
            (Some(secret), _) if !secret.is_empty() => secret,
            (_, Some(current)) => current.client_secret.clone(),
            _ => {
                return Err(ServiceError::Validation(
                    "client_secret is required".to_string(),
                ))
            }
        };

        let now = Utc::now();
        let config = SsoConfig {
            org_id,
            provider_code: provider.as_str().to_string(),
            client_id: settings.client_id,
            client_secret,
            tenant_qualifier: settings.tenant.filter(|t| !t.trim().is_empty()),
            enabled_flag: settings.enabled,
            created_utc: existing.map(|c| c.created_utc).unwrap_or(now),
            updated_utc: now,
        };
        let stored = self.store.upsert_sso_config(&config).await?;

        tracing::info!(%org_id, provider = %provider, enabled = stored.enabled_flag, "SSO configured");
        Ok(stored)
    }

    pub async fn get_sso_config(
        &self,
        org_id: Uuid,
        actor_id: Uuid,
        provider: ProviderKind,
    ) -> Result<SsoConfig, ServiceError> {
        self.require_role(org_id, actor_id, Role::Admin).await?;
        self.store
            .find_sso_config(org_id, provider)
            .await?
            .ok_or(ServiceError::NotFound("SSO configuration"))
    }
}

fn change_error(change: MembershipChange) -> ServiceError {
    match change {
        MembershipChange::LastAdmin => ServiceError::LastAdmin,
        MembershipChange::NotMember => ServiceError::NotFound("Member"),
        MembershipChange::Updated(_) | MembershipChange::Removed => {
            ServiceError::Internal(anyhow::anyhow!("Unexpected membership change outcome"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::services::MockCredentialStore;

    async fn setup() -> (Arc<MockCredentialStore>, OrganizationService, User) {
        let store = Arc::new(MockCredentialStore::new());
        let alice = User::new("alice@acme.io".into(), Some("Alice".into()), None);
        store.insert_user(&alice).await.unwrap();
        (store.clone(), OrganizationService::new(store), alice)
    }

    async fn add_user(store: &MockCredentialStore, email: &str) -> User {
        let user = User::new(email.into(), None, None);
        store.insert_user(&user).await.unwrap();
        user
    }

    #[tokio::test]
    async fn creator_becomes_admin() {
        let (_, orgs, alice) = setup().await;
        let (org, membership) = orgs
            .create_organization(alice.user_id, "Acme", "acme")
            .await
            .unwrap();
        assert_eq!(membership.role(), Role::Admin);

        let (fetched, role) = orgs.get_organization(org.org_id, alice.user_id).await.unwrap();
        assert_eq!(fetched.org_slug, "acme");
        assert_eq!(role, Role::Admin);
    }

    #[tokio::test]
    async fn invalid_and_duplicate_slugs() {
        let (store, orgs, alice) = setup().await;
        assert!(matches!(
            orgs.create_organization(alice.user_id, "Acme", "Acme Corp").await,
            Err(ServiceError::InvalidSlug(_))
        ));

        let (first, _) = orgs
            .create_organization(alice.user_id, "Acme", "acme")
            .await
            .unwrap();
        let err = orgs
            .create_organization(alice.user_id, "Acme Two", "acme")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(store.organization_count(), 1);
        assert!(orgs.get_organization(first.org_id, alice.user_id).await.is_ok());
    }

    #[tokio::test]
    async fn role_ordering_is_enforced() {
        let (store, orgs, alice) = setup().await;
        let bob = add_user(&store, "bob@acme.io").await;
        let (org, _) = orgs
            .create_organization(alice.user_id, "Acme", "acme")
            .await
            .unwrap();
        orgs.grant_membership(org.org_id, bob.user_id, Role::Editor)
            .await
            .unwrap();

        assert!(orgs.require_role(org.org_id, bob.user_id, Role::Viewer).await.is_ok());
        assert!(orgs.require_role(org.org_id, bob.user_id, Role::Editor).await.is_ok());
        let err = orgs
            .require_role(org.org_id, bob.user_id, Role::Admin)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Requires admin role");

        let stranger = Uuid::new_v4();
        assert!(matches!(
            orgs.require_role(org.org_id, stranger, Role::Viewer).await,
            Err(ServiceError::Forbidden(Role::Viewer))
        ));
    }

    #[tokio::test]
    async fn last_admin_cannot_be_demoted_or_removed() {
        let (store, orgs, alice) = setup().await;
        let (org, _) = orgs
            .create_organization(alice.user_id, "Acme", "acme")
            .await
            .unwrap();

        assert!(matches!(
            orgs.update_member_role(org.org_id, alice.user_id, alice.user_id, Role::Editor)
                .await,
            Err(ServiceError::LastAdmin)
        ));
        assert!(matches!(
            orgs.remove_member(org.org_id, alice.user_id, alice.user_id).await,
            Err(ServiceError::LastAdmin)
        ));

        let carol = add_user(&store, "carol@acme.io").await;
        orgs.grant_membership(org.org_id, carol.user_id, Role::Admin)
            .await
            .unwrap();
        orgs.update_member_role(org.org_id, alice.user_id, alice.user_id, Role::Viewer)
            .await
            .unwrap();
        assert_eq!(store.membership_count(), 2);
    }

    #[tokio::test]
    async fn members_may_leave_but_not_remove_others() {
        let (store, orgs, alice) = setup().await;
        let bob = add_user(&store, "bob@acme.io").await;
        let dan = add_user(&store, "dan@acme.io").await;
        let (org, _) = orgs
            .create_organization(alice.user_id, "Acme", "acme")
            .await
            .unwrap();
        for user in [&bob, &dan] {
            orgs.grant_membership(org.org_id, user.user_id, Role::Viewer)
                .await
                .unwrap();
        }

        assert!(matches!(
            orgs.remove_member(org.org_id, bob.user_id, dan.user_id).await,
            Err(ServiceError::Forbidden(Role::Admin))
        ));
        orgs.remove_member(org.org_id, bob.user_id, bob.user_id)
            .await
            .unwrap();
        assert!(matches!(
            orgs.remove_member(org.org_id, alice.user_id, bob.user_id).await,
            Err(ServiceError::NotFound("Member"))
        ));
    }

    #[tokio::test]
    async fn sso_secret_is_kept_when_omitted() {
        let (_, orgs, alice) = setup().await;
        let (org, _) = orgs
            .create_organization(alice.user_id, "Acme", "acme")
            .await
            .unwrap();

        let missing_secret = SsoSettings {
            client_id: "client".into(),
            client_secret: None,
            tenant: None,
            enabled: true,
        };
        assert!(matches!(
            orgs.configure_sso(org.org_id, alice.user_id, ProviderKind::Microsoft, missing_secret.clone())
                .await,
            Err(ServiceError::Validation(_))
        ));

        orgs.configure_sso(
            org.org_id,
            alice.user_id,
            ProviderKind::Microsoft,
            SsoSettings {
                client_secret: Some("s3cret".into()),
                tenant: Some("acme.onmicrosoft.com".into()),
                ..missing_secret.clone()
            },
        )
        .await
        .unwrap();
        let updated = orgs
            .configure_sso(
                org.org_id,
                alice.user_id,
                ProviderKind::Microsoft,
                SsoSettings {
                    client_id: "client-2".into(),
                    enabled: false,
                    ..missing_secret
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.client_secret, "s3cret");
        assert_eq!(updated.client_id, "client-2");
        assert!(!updated.enabled_flag);

        assert!(matches!(
            orgs.get_sso_config(org.org_id, alice.user_id, ProviderKind::Google).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
