//! In-memory IAM

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sntl_core::control::{ApiResult, Iam, PolicyInfo, PolicyVersion, RoleInfo};
use sntl_core::{ApiError, ErrorCode};
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

/// Most versions a managed policy may hold
pub const MAX_POLICY_VERSIONS: usize = 5;

/// An IAM Role
#[derive(Debug, Clone)]
pub struct Role {
    pub role_name: String,
    pub role_id: String,
    pub arn: String,
    /// Assume role policy document (JSON string)
    pub assume_role_policy_document: String,
    pub create_date: DateTime<Utc>,
    /// Attached policy ARNs
    pub attached_policies: Vec<String>,
}

/// One version of a managed policy document
#[derive(Debug, Clone)]
pub struct StoredVersion {
    pub version_id: String,
    pub document: String,
    pub is_default: bool,
    pub create_date: DateTime<Utc>,
}

/// An IAM managed policy
#[derive(Debug, Clone)]
pub struct Policy {
    pub policy_name: String,
    pub policy_id: String,
    pub arn: String,
    pub versions: Vec<StoredVersion>,
    /// Next `vN` to hand out; ids are never reused
    pub next_version: u32,
    pub attachment_count: i32,
}

impl Policy {
    pub fn default_version(&self) -> Option<&StoredVersion> {
        self.versions.iter().find(|v| v.is_default)
    }

    fn push_version(&mut self, document: &str, set_as_default: bool) -> StoredVersion {
        if set_as_default {
            for version in &mut self.versions {
                version.is_default = false;
            }
        }
        let version = StoredVersion {
            version_id: format!("v{}", self.next_version),
            document: document.to_string(),
            is_default: set_as_default,
            create_date: Utc::now(),
        };
        self.next_version += 1;
        self.versions.push(version.clone());
        version
    }
}

/// In-memory IAM store
///
/// `read_lag` makes freshly created roles and policies invisible to the next
/// N reads, the way the real control plane lags behind its writes.
#[derive(Debug)]
pub struct FakeIam {
    account_id: String,
    roles: DashMap<String, Role>,
    /// Policies indexed by ARN
    policies: DashMap<String, Policy>,
    read_lag: AtomicU32,
    unsettled: DashMap<String, u32>,
}

impl FakeIam {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            roles: DashMap::new(),
            policies: DashMap::new(),
            read_lag: AtomicU32::new(0),
            unsettled: DashMap::new(),
        }
    }

    pub fn set_read_lag(&self, reads: u32) {
        self.read_lag.store(reads, Ordering::SeqCst);
    }

    pub fn role(&self, name: &str) -> Option<Role> {
        self.roles.get(name).map(|r| r.clone())
    }

    pub fn policy(&self, arn: &str) -> Option<Policy> {
        self.policies.get(arn).map(|p| p.clone())
    }

    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    fn settle_later(&self, key: &str) {
        let lag = self.read_lag.load(Ordering::SeqCst);
        if lag > 0 {
            self.unsettled.insert(key.to_string(), lag);
        }
    }

    /// Whether a read of `key` still misses.
    fn lagging(&self, key: &str) -> bool {
        let mut remaining = match self.unsettled.get_mut(key) {
            Some(remaining) => remaining,
            None => return false,
        };
        *remaining -= 1;
        let lagging = *remaining > 0;
        drop(remaining);
        if !lagging {
            self.unsettled.remove(key);
        }
        true
    }

    fn no_such_entity(what: &str) -> ApiError {
        ApiError::new(ErrorCode::NoSuchEntity, format!("{what} cannot be found")).with_resource(what)
    }
}

impl Default for FakeIam {
    fn default() -> Self {
        Self::new("000000000000")
    }
}

#[async_trait]
impl Iam for FakeIam {
    async fn create_role(&self, name: &str, trust_policy: &str) -> ApiResult<RoleInfo> {
        if self.roles.contains_key(name) {
            return Err(ApiError::new(
                ErrorCode::EntityAlreadyExists,
                format!("Role with name {name} already exists."),
            ));
        }

        let role = Role {
            role_name: name.to_string(),
            role_id: format!(
                "AROA{}",
                &Uuid::new_v4().simple().to_string()[..17].to_uppercase()
            ),
            arn: format!("arn:aws:iam::{}:role/{}", self.account_id, name),
            assume_role_policy_document: trust_policy.to_string(),
            create_date: Utc::now(),
            attached_policies: Vec::new(),
        };
        let info = RoleInfo {
            name: role.role_name.clone(),
            arn: role.arn.clone(),
        };
        self.roles.insert(name.to_string(), role);
        self.settle_later(name);
        Ok(info)
    }

    async fn update_assume_role_policy(&self, name: &str, trust_policy: &str) -> ApiResult<()> {
        let mut role = self
            .roles
            .get_mut(name)
            .ok_or_else(|| Self::no_such_entity(name))?;
        role.assume_role_policy_document = trust_policy.to_string();
        Ok(())
    }

    async fn get_role(&self, name: &str) -> ApiResult<RoleInfo> {
        if self.lagging(name) {
            return Err(Self::no_such_entity(name));
        }
        self.roles
            .get(name)
            .map(|r| RoleInfo {
                name: r.role_name.clone(),
                arn: r.arn.clone(),
            })
            .ok_or_else(|| Self::no_such_entity(name))
    }

    async fn delete_role(&self, name: &str) -> ApiResult<()> {
        {
            let role = self.roles.get(name).ok_or_else(|| Self::no_such_entity(name))?;
            if !role.attached_policies.is_empty() {
                return Err(ApiError::new(
                    ErrorCode::DeleteConflict,
                    "Cannot delete entity, must detach all policies first.",
                ));
            }
        }
        self.roles.remove(name);
        Ok(())
    }

    async fn create_policy(&self, name: &str, document: &str) -> ApiResult<PolicyInfo> {
        let arn = format!("arn:aws:iam::{}:policy/{}", self.account_id, name);
        if self.policies.contains_key(&arn) {
            return Err(ApiError::new(
                ErrorCode::EntityAlreadyExists,
                format!("A policy called {name} already exists."),
            ));
        }

        let mut policy = Policy {
            policy_name: name.to_string(),
            policy_id: format!(
                "ANPA{}",
                &Uuid::new_v4().simple().to_string()[..17].to_uppercase()
            ),
            arn: arn.clone(),
            versions: Vec::new(),
            next_version: 1,
            attachment_count: 0,
        };
        let version = policy.push_version(document, true);
        self.policies.insert(arn.clone(), policy);
        self.settle_later(&arn);

        Ok(PolicyInfo {
            name: name.to_string(),
            arn,
            default_version_id: Some(version.version_id),
        })
    }

    async fn get_policy(&self, arn: &str) -> ApiResult<PolicyInfo> {
        if self.lagging(arn) {
            return Err(Self::no_such_entity(arn));
        }
        self.policies
            .get(arn)
            .map(|p| PolicyInfo {
                name: p.policy_name.clone(),
                arn: p.arn.clone(),
                default_version_id: p.default_version().map(|v| v.version_id.clone()),
            })
            .ok_or_else(|| Self::no_such_entity(arn))
    }

    async fn delete_policy(&self, arn: &str) -> ApiResult<()> {
        {
            let policy = self.policies.get(arn).ok_or_else(|| Self::no_such_entity(arn))?;
            if policy.attachment_count > 0 {
                return Err(ApiError::new(
                    ErrorCode::DeleteConflict,
                    "Cannot delete a policy attached to entities.",
                ));
            }
            if policy.versions.len() > 1 {
                return Err(ApiError::new(
                    ErrorCode::DeleteConflict,
                    "Cannot delete a policy with non-default versions.",
                ));
            }
        }
        self.policies.remove(arn);
        Ok(())
    }

    async fn list_policy_versions(&self, arn: &str) -> ApiResult<Vec<PolicyVersion>> {
        let policy = self.policies.get(arn).ok_or_else(|| Self::no_such_entity(arn))?;
        // newest first, as the real listing does
        Ok(policy
            .versions
            .iter()
            .rev()
            .map(|v| PolicyVersion {
                version_id: v.version_id.clone(),
                is_default: v.is_default,
                create_date: Some(v.create_date),
            })
            .collect())
    }

    async fn create_policy_version(
        &self,
        arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> ApiResult<PolicyVersion> {
        let mut policy = self
            .policies
            .get_mut(arn)
            .ok_or_else(|| Self::no_such_entity(arn))?;

        if policy.versions.len() >= MAX_POLICY_VERSIONS {
            return Err(ApiError::new(
                ErrorCode::LimitExceeded,
                format!("A managed policy can have up to {MAX_POLICY_VERSIONS} versions."),
            ));
        }

        let version = policy.push_version(document, set_as_default);
        Ok(PolicyVersion {
            version_id: version.version_id,
            is_default: version.is_default,
            create_date: Some(version.create_date),
        })
    }

    async fn delete_policy_version(&self, arn: &str, version_id: &str) -> ApiResult<()> {
        let mut policy = self
            .policies
            .get_mut(arn)
            .ok_or_else(|| Self::no_such_entity(arn))?;

        let index = policy
            .versions
            .iter()
            .position(|v| v.version_id == version_id)
            .ok_or_else(|| Self::no_such_entity(version_id))?;

        if policy.versions[index].is_default {
            return Err(ApiError::new(
                ErrorCode::DeleteConflict,
                "Cannot delete the default version of a policy.",
            ));
        }
        policy.versions.remove(index);
        Ok(())
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> ApiResult<()> {
        if !self.policies.contains_key(policy_arn) {
            return Err(Self::no_such_entity(policy_arn));
        }
        let mut role = self
            .roles
            .get_mut(role)
            .ok_or_else(|| Self::no_such_entity(role))?;

        if !role.attached_policies.iter().any(|p| p == policy_arn) {
            role.attached_policies.push(policy_arn.to_string());
            if let Some(mut policy) = self.policies.get_mut(policy_arn) {
                policy.attachment_count += 1;
            }
        }
        Ok(())
    }

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> ApiResult<()> {
        let mut role = self
            .roles
            .get_mut(role)
            .ok_or_else(|| Self::no_such_entity(role))?;

        if !role.attached_policies.iter().any(|p| p == policy_arn) {
            return Err(Self::no_such_entity(policy_arn));
        }
        role.attached_policies.retain(|p| p != policy_arn);

        if let Some(mut policy) = self.policies.get_mut(policy_arn) {
            policy.attachment_count = (policy.attachment_count - 1).max(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get_role() {
        let iam = FakeIam::new("123456789012");
        let role = iam.create_role("TestRole", "{}").await.unwrap();
        assert_eq!(role.arn, "arn:aws:iam::123456789012:role/TestRole");
        assert_eq!(iam.get_role("TestRole").await.unwrap(), role);
    }

    #[tokio::test]
    async fn test_duplicate_role_fails() {
        let iam = FakeIam::default();
        iam.create_role("TestRole", "{}").await.unwrap();
        let result = iam.create_role("TestRole", "{}").await;
        assert!(matches!(result, Err(e) if e.code == ErrorCode::EntityAlreadyExists));
    }

    #[tokio::test]
    async fn test_read_lag() {
        let iam = FakeIam::default();
        iam.set_read_lag(2);
        iam.create_role("Lagging", "{}").await.unwrap();
        assert!(iam.get_role("Lagging").await.is_err());
        assert!(iam.get_role("Lagging").await.is_err());
        assert!(iam.get_role("Lagging").await.is_ok());
    }

    #[tokio::test]
    async fn test_version_ceiling() {
        let iam = FakeIam::default();
        let policy = iam.create_policy("P", "{}").await.unwrap();
        for _ in 1..MAX_POLICY_VERSIONS {
            iam.create_policy_version(&policy.arn, "{}", true).await.unwrap();
        }
        let result = iam.create_policy_version(&policy.arn, "{}", true).await;
        assert!(matches!(result, Err(e) if e.code == ErrorCode::LimitExceeded));
    }

    #[tokio::test]
    async fn test_attached_policy_blocks_role_delete() {
        let iam = FakeIam::default();
        iam.create_role("R", "{}").await.unwrap();
        let policy = iam.create_policy("P", "{}").await.unwrap();
        iam.attach_role_policy("R", &policy.arn).await.unwrap();
        iam.attach_role_policy("R", &policy.arn).await.unwrap();
        assert_eq!(iam.policy(&policy.arn).unwrap().attachment_count, 1);

        let result = iam.delete_role("R").await;
        assert!(matches!(result, Err(e) if e.code == ErrorCode::DeleteConflict));
    }
}
