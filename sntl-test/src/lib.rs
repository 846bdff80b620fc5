//! Test utilities for sentential
//!
//! Provides in-memory stand-ins for every external port so drivers can be
//! exercised end to end without a cloud account or a container daemon:
//! - `FakeRegistry`, `FakeIam`, `FakeFunctions`, `FakeTokens` for the control plane
//! - `FakeRuntime` for the local container runtime
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sntl_test::TestPlane;
//!
//! #[tokio::test]
//! async fn test_deploy() {
//!     let plane = TestPlane::new();
//!     plane.registry.put_image(sntl_test::REPOSITORY, "sha256:m1", "sha256:c1", &["v1"]);
//!
//!     let control = plane.control_plane();
//!     let ontology = plane.ontology();
//! }
//! ```

pub mod functions;
pub mod iam;
pub mod registry;
pub mod runtime;
pub mod tokens;

pub use functions::FakeFunctions;
pub use iam::FakeIam;
pub use registry::FakeRegistry;
pub use runtime::FakeRuntime;
pub use tokens::FakeTokens;

use sntl_core::{Context, ControlPlane, Ontology, Provision};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const ACCOUNT_ID: &str = "123456789012";
pub const REGION: &str = "us-east-1";
pub const PARTITION: &str = "dev";
pub const REPOSITORY: &str = "app";
pub const CALLER_ID: &str = "AIDATESTCALLER";

/// A policy template exercising both placeholder scopes
pub const POLICY_TEMPLATE: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":["ssm:GetParametersByPath"],"Resource":"arn:aws:ssm:{{ context.region }}:{{ context.account_id }}:parameter/{{ context.partition }}/{{ context.repository_name }}/*"}]}"#;

/// Every fake control-plane service, wired together
pub struct TestPlane {
    pub registry: Arc<FakeRegistry>,
    pub iam: Arc<FakeIam>,
    pub functions: Arc<FakeFunctions>,
    pub tokens: Arc<FakeTokens>,
}

impl TestPlane {
    pub fn new() -> Self {
        let registry = Arc::new(FakeRegistry::new(format!(
            "{ACCOUNT_ID}.dkr.ecr.{REGION}.amazonaws.com"
        )));
        registry.create_repository(REPOSITORY);

        Self {
            functions: Arc::new(FakeFunctions::new(ACCOUNT_ID, REGION, registry.clone())),
            iam: Arc::new(FakeIam::new(ACCOUNT_ID)),
            tokens: Arc::new(FakeTokens::new(ACCOUNT_ID, CALLER_ID)),
            registry,
        }
    }

    pub fn control_plane(&self) -> ControlPlane {
        ControlPlane {
            registry: self.registry.clone(),
            iam: self.iam.clone(),
            functions: self.functions.clone(),
            tokens: self.tokens.clone(),
        }
    }

    pub fn context(&self) -> Context {
        Context {
            partition: PARTITION.to_string(),
            region: REGION.to_string(),
            account_id: ACCOUNT_ID.to_string(),
            caller_id: CALLER_ID.to_string(),
            repository_name: REPOSITORY.to_string(),
        }
    }

    pub fn ontology(&self) -> Ontology {
        Ontology::new(self.context(), BTreeMap::new(), Provision::default())
    }
}

impl Default for TestPlane {
    fn default() -> Self {
        Self::new()
    }
}
