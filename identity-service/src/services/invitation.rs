//! Invitation workflow: `pending -> accepted | expired | revoked`.
//!
//! Records live in the ephemeral store under `invitation:<sha256(token)>`;
//! expiry is the store TTL, so an expired invitation and one that never
//! existed look the same.

use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

use crate::dtos::invitation::InvitationResponse;
use crate::models::{trim_email, Invitation, Membership, Role, User};
use crate::utils::{generate_token, hash_token};

use super::{EphemeralStore, OrganizationService, ServiceError};

pub const INVITATIONS: &str = "Invitations";

const INVITATION_KEY_PREFIX: &str = "invitation:";

fn invitation_key(token: &str) -> String {
    format!("{}{}", INVITATION_KEY_PREFIX, hash_token(token))
}

#[derive(Clone)]
pub struct InvitationService {
    ephemeral: Arc<dyn EphemeralStore>,
    orgs: OrganizationService,
    ttl: Duration,
}

impl InvitationService {
    pub fn new(ephemeral: Arc<dyn EphemeralStore>, orgs: OrganizationService, expiry_days: i64) -> Self {
        Self {
            ephemeral,
            orgs,
            ttl: Duration::days(expiry_days.max(1)),
        }
    }

    async fn load(&self, token: &str) -> Result<Invitation, ServiceError> {
        let payload = self
            .ephemeral
            .get(&invitation_key(token))
            .await
            .map_err(ServiceError::Ephemeral)?
            .ok_or(ServiceError::InvitationNotFound)?;
        serde_json::from_str(&payload).map_err(|e| {
            tracing::warn!(error = %e, "Unreadable invitation record");
            ServiceError::InvitationNotFound
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn create(
        &self,
        org_id: Uuid,
        inviter_id: Uuid,
        email: &str,
        role: Role,
    ) -> Result<InvitationResponse, ServiceError> {
        self.orgs.require_role(org_id, inviter_id, Role::Admin).await?;
        let email = trim_email(email);
        if self.orgs.is_member_by_email(org_id, &email).await? {
            return Err(ServiceError::AlreadyMember);
        }

        let invitation = Invitation::new(org_id, email, role, inviter_id, self.ttl);
        let payload = serde_json::to_string(&invitation)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
        let token = generate_token();
        self.ephemeral
            .set_ex(
                &invitation_key(&token),
                &payload,
                self.ttl.num_seconds().max(1) as u64,
            )
            .await
            .map_err(ServiceError::Ephemeral)?;

        tracing::info!(%org_id, role = %role, "Invitation created");
        Ok(InvitationResponse {
            token,
            org_id,
            email: invitation.email,
            role,
            expires_at: invitation.expires_utc,
        })
    }

    /// Joins `caller` to the inviting organization. A mismatched email leaves
    /// the invitation usable by its intended recipient.
    #[tracing::instrument(skip(self, token, caller), fields(user_id = %caller.user_id))]
    pub async fn accept(&self, token: &str, caller: &User) -> Result<Membership, ServiceError> {
        let invitation = self.load(token).await?;
        if !invitation.is_for(&caller.email) {
            tracing::warn!(org_id = %invitation.org_id, "Invitation presented by a different account");
            return Err(ServiceError::InvitationEmailMismatch);
        }

        let membership = self
            .orgs
            .grant_membership(invitation.org_id, caller.user_id, invitation.role)
            .await?;
        self.ephemeral
            .delete(&invitation_key(token))
            .await
            .map_err(ServiceError::Ephemeral)?;

        tracing::info!(org_id = %invitation.org_id, role = %invitation.role, "Invitation accepted");
        Ok(membership)
    }

    #[tracing::instrument(skip(self, token))]
    pub async fn revoke(&self, org_id: Uuid, admin_id: Uuid, token: &str) -> Result<(), ServiceError> {
        self.orgs.require_role(org_id, admin_id, Role::Admin).await?;
        let invitation = self.load(token).await?;
        if invitation.org_id != org_id {
            return Err(ServiceError::InvitationNotFound);
        }
        self.ephemeral
            .delete(&invitation_key(token))
            .await
            .map_err(ServiceError::Ephemeral)?;
        tracing::info!(%org_id, "Invitation revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{CredentialStore, MockCredentialStore, MockEphemeralStore};

    struct Fixture {
        store: Arc<MockCredentialStore>,
        ephemeral: Arc<MockEphemeralStore>,
        orgs: OrganizationService,
        invitations: InvitationService,
        alice: User,
        bob: User,
        org_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MockCredentialStore::new());
        let ephemeral = Arc::new(MockEphemeralStore::new());
        let alice = User::new("alice@acme.io".into(), None, None);
        let bob = User::new("bob@acme.io".into(), None, None);
        store.insert_user(&alice).await.unwrap();
        store.insert_user(&bob).await.unwrap();

        let orgs = OrganizationService::new(store.clone());
        let (org, _) = orgs
            .create_organization(alice.user_id, "Acme", "acme")
            .await
            .unwrap();
        let invitations = InvitationService::new(ephemeral.clone(), orgs.clone(), 7);
        Fixture {
            store,
            ephemeral,
            orgs,
            invitations,
            alice,
            bob,
            org_id: org.org_id,
        }
    }

    #[tokio::test]
    async fn accept_joins_with_invited_role() {
        let f = fixture().await;
        let invite = f
            .invitations
            .create(f.org_id, f.alice.user_id, "bob@acme.io", Role::Editor)
            .await
            .unwrap();
        assert_eq!(invite.role, Role::Editor);

        let membership = f.invitations.accept(&invite.token, &f.bob).await.unwrap();
        assert_eq!(membership.role(), Role::Editor);
        assert!(f
            .orgs
            .require_role(f.org_id, f.bob.user_id, Role::Editor)
            .await
            .is_ok());

        assert!(matches!(
            f.invitations.accept(&invite.token, &f.bob).await,
            Err(ServiceError::InvitationNotFound)
        ));
    }

    #[tokio::test]
    async fn wrong_email_leaves_invitation_usable() {
        let f = fixture().await;
        let eve = User::new("eve@acme.io".into(), None, None);
        f.store.insert_user(&eve).await.unwrap();
        let invite = f
            .invitations
            .create(f.org_id, f.alice.user_id, "bob@acme.io", Role::Viewer)
            .await
            .unwrap();

        assert!(matches!(
            f.invitations.accept(&invite.token, &eve).await,
            Err(ServiceError::InvitationEmailMismatch)
        ));
        assert_eq!(f.store.membership_count(), 1);
        assert!(f.invitations.accept(&invite.token, &f.bob).await.is_ok());
    }

    #[tokio::test]
    async fn only_admins_invite_non_members() {
        let f = fixture().await;
        assert!(matches!(
            f.invitations
                .create(f.org_id, f.bob.user_id, "carol@acme.io", Role::Viewer)
                .await,
            Err(ServiceError::Forbidden(Role::Admin))
        ));
        assert!(matches!(
            f.invitations
                .create(f.org_id, f.alice.user_id, "alice@acme.io", Role::Viewer)
                .await,
            Err(ServiceError::AlreadyMember)
        ));
    }

    #[tokio::test]
    async fn expired_and_revoked_invitations_are_not_found() {
        let f = fixture().await;
        let expired = f
            .invitations
            .create(f.org_id, f.alice.user_id, "bob@acme.io", Role::Viewer)
            .await
            .unwrap();
        f.ephemeral.expire(&invitation_key(&expired.token));
        assert!(matches!(
            f.invitations.accept(&expired.token, &f.bob).await,
            Err(ServiceError::InvitationNotFound)
        ));

        let revoked = f
            .invitations
            .create(f.org_id, f.alice.user_id, "bob@acme.io", Role::Viewer)
            .await
            .unwrap();
        assert!(matches!(
            f.invitations
                .revoke(Uuid::new_v4(), f.alice.user_id, &revoked.token)
                .await,
            Err(ServiceError::Forbidden(_))
        ));
        f.invitations
            .revoke(f.org_id, f.alice.user_id, &revoked.token)
            .await
            .unwrap();
        assert!(f.invitations.accept(&revoked.token, &f.bob).await.is_err());
    }

    #[tokio::test]
    async fn accepting_cannot_demote_last_admin() {
        let f = fixture().await;
        let invite = f
            .invitations
            .create(f.org_id, f.alice.user_id, "alice2@acme.io", Role::Viewer)
            .await
            .unwrap();
        let mut renamed = f.alice.clone();
        renamed.email = "alice2@acme.io".into();

        assert!(matches!(
            f.invitations.accept(&invite.token, &renamed).await,
            Err(ServiceError::LastAdmin)
        ));
        assert!(f
            .orgs
            .require_role(f.org_id, f.alice.user_id, Role::Admin)
            .await
            .is_ok());
    }
}
