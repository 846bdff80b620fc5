//! Control-plane ports
//!
//! Drivers only talk to the cloud through these traits. The AWS SDK adapters
//! and the in-memory test plane both implement them; handles are built once
//! per process and passed in explicitly.

use crate::catalog::{ImageDescription, ImageManifest};
use crate::error::ApiError;
use crate::ontology::{AuthType, Cors};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type ApiResult<T> = Result<T, ApiError>;

/// Identity of the credentials in use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
    pub account: String,
    pub arn: String,
}

/// Short-lived scoped credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: Option<DateTime<Utc>>,
}

impl Credentials {
    /// The standard SDK environment variables.
    pub fn as_env(&self) -> Vec<(String, String)> {
        vec![
            ("AWS_ACCESS_KEY_ID".to_string(), self.access_key_id.clone()),
            ("AWS_SECRET_ACCESS_KEY".to_string(), self.secret_access_key.clone()),
            ("AWS_SESSION_TOKEN".to_string(), self.session_token.clone()),
        ]
    }
}

/// Login for pushing to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleInfo {
    pub name: String,
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyInfo {
    pub name: String,
    pub arn: String,
    pub default_version_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyVersion {
    pub version_id: String,
    pub is_default: bool,
    pub create_date: Option<DateTime<Utc>>,
}

impl PolicyVersion {
    /// Numeric part of `vN`, for ordering versions without a create date.
    pub fn ordinal(&self) -> u64 {
        self.version_id
            .trim_start_matches('v')
            .parse()
            .unwrap_or(u64::MAX)
    }
}

/// Desired function configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: String,
    pub role_arn: String,
    pub image_uri: String,
    pub description: String,
    pub environment: BTreeMap<String, String>,
    pub storage: i32,
    pub memory: i32,
    pub timeout: i32,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
}

/// Progress of the last configuration or code update
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UpdateStatus {
    #[default]
    Successful,
    InProgress,
    Failed(Option<String>),
}

/// A function as described by the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub arn: String,
    pub role_arn: Option<String>,
    pub image_uri: Option<String>,
    /// Image reference pinned to a manifest digest
    pub resolved_image_uri: Option<String>,
    pub last_update_status: UpdateStatus,
    pub version: Option<String>,
}

/// A resource-policy statement on a function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub statement_id: String,
    pub action: String,
    pub principal: String,
    pub function_url_auth_type: AuthType,
}

/// Public URL configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlConfig {
    pub auth_type: AuthType,
    pub cors: Cors,
}

/// Container image registry
#[async_trait]
pub trait Registry: Send + Sync {
    /// Every image digest in the repository, with its tags.
    async fn describe_images(&self, repository: &str) -> ApiResult<Vec<ImageDescription>>;

    /// Manifests for the given manifest digests.
    async fn batch_get_manifests(
        &self,
        repository: &str,
        digests: &[String],
    ) -> ApiResult<Vec<ImageManifest>>;

    /// Fresh login credentials for pushing.
    async fn authorization(&self) -> ApiResult<RegistryCredentials>;
}

/// Roles and managed policies
#[async_trait]
pub trait Iam: Send + Sync {
    async fn create_role(&self, name: &str, trust_policy: &str) -> ApiResult<RoleInfo>;
    async fn update_assume_role_policy(&self, name: &str, trust_policy: &str) -> ApiResult<()>;
    async fn get_role(&self, name: &str) -> ApiResult<RoleInfo>;
    async fn delete_role(&self, name: &str) -> ApiResult<()>;

    async fn create_policy(&self, name: &str, document: &str) -> ApiResult<PolicyInfo>;
    async fn get_policy(&self, arn: &str) -> ApiResult<PolicyInfo>;
    async fn delete_policy(&self, arn: &str) -> ApiResult<()>;
    async fn list_policy_versions(&self, arn: &str) -> ApiResult<Vec<PolicyVersion>>;
    async fn create_policy_version(
        &self,
        arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> ApiResult<PolicyVersion>;
    async fn delete_policy_version(&self, arn: &str, version_id: &str) -> ApiResult<()>;

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> ApiResult<()>;
    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> ApiResult<()>;
}

/// Functions, their permissions and public URLs
#[async_trait]
pub trait Functions: Send + Sync {
    async fn create_function(&self, spec: &FunctionSpec) -> ApiResult<FunctionInfo>;
    async fn update_function_configuration(&self, spec: &FunctionSpec) -> ApiResult<FunctionInfo>;
    async fn update_function_code(
        &self,
        name: &str,
        image_uri: &str,
        publish: bool,
    ) -> ApiResult<FunctionInfo>;
    async fn get_function(&self, name: &str) -> ApiResult<FunctionInfo>;
    async fn delete_function(&self, name: &str) -> ApiResult<()>;

    async fn add_permission(&self, name: &str, permission: &Permission) -> ApiResult<()>;
    async fn remove_permission(&self, name: &str, statement_id: &str) -> ApiResult<()>;

    async fn create_url_config(&self, name: &str, config: &UrlConfig) -> ApiResult<String>;
    async fn update_url_config(&self, name: &str, config: &UrlConfig) -> ApiResult<String>;
    async fn get_url_config(&self, name: &str) -> ApiResult<String>;
    async fn delete_url_config(&self, name: &str) -> ApiResult<()>;
}

/// Security token service
#[async_trait]
pub trait Tokens: Send + Sync {
    async fn caller_identity(&self) -> ApiResult<CallerIdentity>;
    async fn federation_token(&self, name: &str, policy: &str) -> ApiResult<Credentials>;
}

/// Client handles for every cloud port
#[derive(Clone)]
pub struct ControlPlane {
    pub registry: Arc<dyn Registry>,
    pub iam: Arc<dyn Iam>,
    pub functions: Arc<dyn Functions>,
    pub tokens: Arc<dyn Tokens>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_version_ordinal() {
        let version = |id: &str| PolicyVersion {
            version_id: id.to_string(),
            is_default: false,
            create_date: None,
        };
        assert_eq!(version("v1").ordinal(), 1);
        assert_eq!(version("v12").ordinal(), 12);
        assert_eq!(version("weird").ordinal(), u64::MAX);
    }

    #[test]
    fn test_credentials_env() {
        let credentials = Credentials {
            access_key_id: "AKIA".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
            expiration: None,
        };
        let env = credentials.as_env();
        assert_eq!(env.len(), 3);
        assert!(env.contains(&("AWS_SESSION_TOKEN".to_string(), "token".to_string())));
    }
}
