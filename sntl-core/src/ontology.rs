//! Identity, environment and provisioning facts for one invocation
//!
//! Everything here is resolved eagerly at startup and passed to drivers
//! read-only. Replacing environment values is an explicit call.

use crate::control::Tokens;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Who and where we are deploying
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub partition: String,
    pub region: String,
    pub account_id: String,
    pub caller_id: String,
    pub repository_name: String,
}

impl Context {
    /// Resolve account and caller from the token service.
    ///
    /// Without an explicit partition the caller id, lowercased, is used.
    pub async fn resolve(
        tokens: &dyn Tokens,
        repository_name: impl Into<String>,
        region: impl Into<String>,
        partition: Option<String>,
    ) -> Result<Self> {
        let identity = tokens.caller_identity().await?;
        let partition = partition.unwrap_or_else(|| identity.user_id.to_lowercase());

        let context = Self {
            partition,
            region: region.into(),
            account_id: identity.account,
            caller_id: identity.user_id,
            repository_name: repository_name.into(),
        };
        debug!(resource = %context.resource_name(), "Resolved context");
        Ok(context)
    }

    /// Deterministic key of every owned resource: `partition-region-repository`.
    pub fn resource_name(&self) -> String {
        format!("{}-{}-{}", self.partition, self.region, self.repository_name)
    }

    pub fn policy_arn(&self) -> String {
        format!("arn:aws:iam::{}:policy/{}", self.account_id, self.resource_name())
    }

    pub fn registry_url(&self) -> String {
        format!("{}.dkr.ecr.{}.amazonaws.com", self.account_id, self.region)
    }

    pub fn repository_url(&self) -> String {
        format!("{}/{}", self.registry_url(), self.repository_name)
    }

    /// Look up a field by name, for template rendering.
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "partition" => Some(self.partition.clone()),
            "region" => Some(self.region.clone()),
            "account_id" => Some(self.account_id.clone()),
            "caller_id" => Some(self.caller_id.clone()),
            "repository_name" => Some(self.repository_name.clone()),
            "repository_url" => Some(self.repository_url()),
            "registry_url" => Some(self.registry_url()),
            "resource_name" => Some(self.resource_name()),
            _ => None,
        }
    }
}

/// Deployed environment values and their store path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envs {
    /// Store path, injected into the function as `PARTITION`
    pub path: String,
    pub values: BTreeMap<String, String>,
}

impl Envs {
    pub fn for_context(context: &Context, values: BTreeMap<String, String>) -> Self {
        Self {
            path: format!("/{}/{}/env/", context.partition, context.repository_name),
            values,
        }
    }
}

/// Function URL auth mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    #[default]
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "AWS_IAM", alias = "AWS")]
    AwsIam,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::AwsIam => "AWS_IAM",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CORS policy attached to a public URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cors {
    pub allow_headers: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_origins: Vec<String>,
    pub expose_headers: Vec<String>,
}

/// Provisioning parameters for the function and its URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provision {
    /// Ephemeral storage (MB)
    #[serde(default = "default_storage")]
    pub storage: i32,
    /// Allocated memory (MB)
    #[serde(default = "default_memory")]
    pub memory: i32,
    /// Timeout (s)
    #[serde(default = "default_timeout")]
    pub timeout: i32,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default = "wildcard")]
    pub allow_headers: Vec<String>,
    #[serde(default = "wildcard")]
    pub allow_methods: Vec<String>,
    #[serde(default = "wildcard")]
    pub allow_origins: Vec<String>,
    #[serde(default = "wildcard")]
    pub expose_headers: Vec<String>,
}

impl Default for Provision {
    fn default() -> Self {
        Self {
            storage: default_storage(),
            memory: default_memory(),
            timeout: default_timeout(),
            subnet_ids: Vec::new(),
            security_group_ids: Vec::new(),
            auth_type: AuthType::default(),
            allow_headers: wildcard(),
            allow_methods: wildcard(),
            allow_origins: wildcard(),
            expose_headers: wildcard(),
        }
    }
}

impl Provision {
    pub fn cors(&self) -> Cors {
        Cors {
            allow_headers: self.allow_headers.clone(),
            allow_methods: self.allow_methods.clone(),
            allow_origins: self.allow_origins.clone(),
            expose_headers: self.expose_headers.clone(),
        }
    }
}

fn default_storage() -> i32 {
    512
}

fn default_memory() -> i32 {
    128
}

fn default_timeout() -> i32 {
    3
}

fn wildcard() -> Vec<String> {
    vec!["*".to_string()]
}

/// Read-only facts a driver consults for one invocation
#[derive(Debug, Clone)]
pub struct Ontology {
    pub context: Context,
    pub envs: Envs,
    pub configs: Provision,
}

impl Ontology {
    pub fn new(context: Context, values: BTreeMap<String, String>, configs: Provision) -> Self {
        let envs = Envs::for_context(&context, values);
        Self {
            context,
            envs,
            configs,
        }
    }

    /// Replace the deployed environment values after they were rewritten.
    pub fn with_envs(mut self, values: BTreeMap<String, String>) -> Self {
        self.envs = Envs::for_context(&self.context, values);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Context {
        Context {
            partition: "dev".to_string(),
            region: "us-west-2".to_string(),
            account_id: "123456789012".to_string(),
            caller_id: "AIDAEXAMPLE".to_string(),
            repository_name: "app".to_string(),
        }
    }

    #[test]
    fn test_derived_names() {
        let context = context();
        assert_eq!(context.resource_name(), "dev-us-west-2-app");
        assert_eq!(
            context.policy_arn(),
            "arn:aws:iam::123456789012:policy/dev-us-west-2-app"
        );
        assert_eq!(
            context.repository_url(),
            "123456789012.dkr.ecr.us-west-2.amazonaws.com/app"
        );
    }

    #[test]
    fn test_envs_path() {
        let ontology = Ontology::new(context(), BTreeMap::new(), Provision::default());
        assert_eq!(ontology.envs.path, "/dev/app/env/");
    }

    #[test]
    fn test_with_envs_replaces_values() {
        let ontology = Ontology::new(context(), BTreeMap::new(), Provision::default())
            .with_envs(BTreeMap::from([("key".to_string(), "value".to_string())]));
        assert_eq!(ontology.envs.values.get("key").map(String::as_str), Some("value"));
        assert_eq!(ontology.envs.path, "/dev/app/env/");
    }

    #[test]
    fn test_provision_defaults() {
        let provision: Provision = serde_json::from_str("{}").unwrap();
        assert_eq!(provision, Provision::default());
        assert_eq!(provision.storage, 512);
        assert_eq!(provision.allow_origins, vec!["*"]);
    }

    #[test]
    fn test_auth_type_alias() {
        let provision: Provision = serde_json::from_str(r#"{"auth_type":"AWS"}"#).unwrap();
        assert_eq!(provision.auth_type, AuthType::AwsIam);
        assert_eq!(provision.auth_type.as_str(), "AWS_IAM");
        assert!(serde_json::from_str::<Provision>(r#"{"auth_type":"BASIC"}"#).is_err());
    }
}
