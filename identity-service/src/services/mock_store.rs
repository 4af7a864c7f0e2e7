use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::{
    leaves_organization_without_admin, LinkedAuthMethod, MemberSummary, Membership,
    MembershipChange, Organization, OrganizationWithRole, ProviderKind, Role, SsoConfig, User,
    PASSWORD_METHOD,
};

use super::{CredentialStore, ServiceError};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    organizations: HashMap<Uuid, Organization>,
    memberships: HashMap<(Uuid, Uuid), Membership>,
    auth_methods: HashMap<(Uuid, String), LinkedAuthMethod>,
    sso_configs: HashMap<(Uuid, String), SsoConfig>,
}

/// In-memory credential store. One mutex guards every table, so each call
/// is atomic the way a database transaction would be.
#[derive(Default)]
pub struct MockCredentialStore {
    tables: Mutex<Tables>,
}

impl MockCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, ServiceError> {
        self.tables
            .lock()
            .map_err(|e| ServiceError::Database(anyhow::anyhow!("Mock store mutex poisoned: {}", e)))
    }

    pub fn user_count(&self) -> usize {
        self.tables.lock().map(|t| t.users.len()).unwrap_or(0)
    }

    pub fn organization_count(&self) -> usize {
        self.tables.lock().map(|t| t.organizations.len()).unwrap_or(0)
    }

    pub fn membership_count(&self) -> usize {
        self.tables.lock().map(|t| t.memberships.len()).unwrap_or(0)
    }

    pub fn auth_method_count(&self) -> usize {
        self.tables.lock().map(|t| t.auth_methods.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CredentialStore for MockCredentialStore {
    async fn health_check(&self) -> Result<(), ServiceError> {
        self.lock().map(|_| ())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(self.lock()?.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<(), ServiceError> {
        let mut tables = self.lock()?;
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(ServiceError::EmailAlreadyRegistered);
        }
        tables.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn create_organization(
        &self,
        org: &Organization,
        creator_id: Uuid,
    ) -> Result<Membership, ServiceError> {
        let mut tables = self.lock()?;
        if tables
            .organizations
            .values()
            .any(|o| o.org_slug == org.org_slug)
        {
            return Err(ServiceError::SlugTaken);
        }
        let membership = Membership::new(org.org_id, creator_id, Role::Admin);
        tables.organizations.insert(org.org_id, org.clone());
        tables
            .memberships
            .insert((org.org_id, creator_id), membership.clone());
        Ok(membership)
    }

    async fn find_organization_by_id(
        &self,
        org_id: Uuid,
    ) -> Result<Option<Organization>, ServiceError> {
        Ok(self.lock()?.organizations.get(&org_id).cloned())
    }

    async fn find_organization_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<Organization>, ServiceError> {
        Ok(self
            .lock()?
            .organizations
            .values()
            .find(|o| o.org_slug == slug)
            .cloned())
    }

    async fn list_organizations_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<OrganizationWithRole>, ServiceError> {
        let tables = self.lock()?;
        let mut orgs: Vec<OrganizationWithRole> = tables
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| {
                tables.organizations.get(&m.org_id).map(|o| OrganizationWithRole {
                    org_id: o.org_id,
                    org_name: o.org_name.clone(),
                    org_slug: o.org_slug.clone(),
                    role_code: m.role_code.clone(),
                    created_utc: o.created_utc,
                })
            })
            .collect();
        orgs.sort_by(|a, b| a.org_name.cmp(&b.org_name));
        Ok(orgs)
    }

    async fn delete_organization(&self, org_id: Uuid) -> Result<bool, ServiceError> {
        let mut tables = self.lock()?;
        let existed = tables.organizations.remove(&org_id).is_some();
        tables.memberships.retain(|(o, _), _| *o != org_id);
        tables.sso_configs.retain(|(o, _), _| *o != org_id);
        Ok(existed)
    }

    async fn find_membership(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Membership>, ServiceError> {
        Ok(self.lock()?.memberships.get(&(org_id, user_id)).cloned())
    }

    async fn list_members(&self, org_id: Uuid) -> Result<Vec<MemberSummary>, ServiceError> {
        let tables = self.lock()?;
        let mut members: Vec<MemberSummary> = tables
            .memberships
            .values()
            .filter(|m| m.org_id == org_id)
            .filter_map(|m| {
                tables.users.get(&m.user_id).map(|u| MemberSummary {
                    user_id: u.user_id,
                    email: u.email.clone(),
                    display_name: u.display_name.clone(),
                    role_code: m.role_code.clone(),
                    created_utc: m.created_utc,
                })
            })
            .collect();
        members.sort_by(|a, b| a.created_utc.cmp(&b.created_utc));
        Ok(members)
    }

    async fn is_member_by_email(&self, org_id: Uuid, email: &str) -> Result<bool, ServiceError> {
        let tables = self.lock()?;
        Ok(tables
            .users
            .values()
            .filter(|u| u.email == email)
            .any(|u| tables.memberships.contains_key(&(org_id, u.user_id))))
    }

    async fn insert_membership_if_absent(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<bool, ServiceError> {
        let mut tables = self.lock()?;
        if tables.memberships.contains_key(&(org_id, user_id)) {
            return Ok(false);
        }
        tables
            .memberships
            .insert((org_id, user_id), Membership::new(org_id, user_id, role));
        Ok(true)
    }

    async fn change_member_role(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<MembershipChange, ServiceError> {
        let mut tables = self.lock()?;
        let Some(current) = tables.memberships.get(&(org_id, user_id)).cloned() else {
            return Ok(MembershipChange::NotMember);
        };
        let admins = admin_count(&tables, org_id);
        if leaves_organization_without_admin(current.role(), Some(role), admins) {
            return Ok(MembershipChange::LastAdmin);
        }
        let mut updated = current;
        updated.role_code = role.as_str().to_string();
        updated.updated_utc = Utc::now();
        tables
            .memberships
            .insert((org_id, user_id), updated.clone());
        Ok(MembershipChange::Updated(updated))
    }

    async fn remove_member(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<MembershipChange, ServiceError> {
        let mut tables = self.lock()?;
        let Some(current) = tables.memberships.get(&(org_id, user_id)).cloned() else {
            return Ok(MembershipChange::NotMember);
        };
        let admins = admin_count(&tables, org_id);
        if leaves_organization_without_admin(current.role(), None, admins) {
            return Ok(MembershipChange::LastAdmin);
        }
        tables.memberships.remove(&(org_id, user_id));
        Ok(MembershipChange::Removed)
    }

    async fn list_auth_methods(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<LinkedAuthMethod>, ServiceError> {
        let mut methods: Vec<LinkedAuthMethod> = self
            .lock()?
            .auth_methods
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        methods.sort_by(|a, b| a.provider_code.cmp(&b.provider_code));
        Ok(methods)
    }

    async fn upsert_auth_method(&self, method: &LinkedAuthMethod) -> Result<(), ServiceError> {
        let mut tables = self.lock()?;
        tables
            .auth_methods
            .entry((method.user_id, method.provider_code.clone()))
            .and_modify(|existing| existing.provider_subject = method.provider_subject.clone())
            .or_insert_with(|| method.clone());
        Ok(())
    }

    async fn remove_auth_method(&self, user_id: Uuid, method: &str) -> Result<bool, ServiceError> {
        let mut tables = self.lock()?;
        let Some(has_password) = tables.users.get(&user_id).map(User::has_password) else {
            return Ok(false);
        };
        let linked = tables
            .auth_methods
            .keys()
            .filter(|(u, _)| *u == user_id)
            .count();

        let is_password = method == PASSWORD_METHOD;
        let present = if is_password {
            has_password
        } else {
            tables
                .auth_methods
                .contains_key(&(user_id, method.to_string()))
        };
        if !present {
            return Ok(false);
        }
        if linked + usize::from(has_password) <= 1 {
            return Err(ServiceError::LastAuthMethod);
        }

        if is_password {
            if let Some(user) = tables.users.get_mut(&user_id) {
                user.password_hash = None;
            }
        } else {
            tables.auth_methods.remove(&(user_id, method.to_string()));
        }
        Ok(true)
    }

    async fn find_sso_config(
        &self,
        org_id: Uuid,
        provider: ProviderKind,
    ) -> Result<Option<SsoConfig>, ServiceError> {
        Ok(self
            .lock()?
            .sso_configs
            .get(&(org_id, provider.as_str().to_string()))
            .cloned())
    }

    async fn upsert_sso_config(&self, config: &SsoConfig) -> Result<SsoConfig, ServiceError> {
        let mut tables = self.lock()?;
        let key = (config.org_id, config.provider_code.clone());
        let mut stored = config.clone();
        if let Some(existing) = tables.sso_configs.get(&key) {
            stored.created_utc = existing.created_utc;
        }
        stored.updated_utc = Utc::now();
        tables.sso_configs.insert(key, stored.clone());
        Ok(stored)
    }
}

fn admin_count(tables: &Tables, org_id: Uuid) -> i64 {
    tables
        .memberships
        .values()
        .filter(|m| m.org_id == org_id && m.role() == Role::Admin)
        .count() as i64
}
