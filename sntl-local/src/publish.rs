//! Pushing local builds to the registry

use sntl_core::container::ContainerRuntime;
use sntl_core::control::Registry;
use sntl_core::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Tags a local version under the registry repository and pushes it
pub struct Publisher {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<dyn Registry>,
    repository_name: String,
    repository_url: String,
}

impl Publisher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, registry: Arc<dyn Registry>, context: &Context) -> Self {
        Self {
            runtime,
            registry,
            repository_name: context.repository_name.clone(),
            repository_url: context.repository_url(),
        }
    }

    /// Push `{repository}:{version}`, logging in again once if the registry
    /// rejects the current credentials. Returns the pushed reference.
    pub async fn publish(&self, version: &str) -> Result<String> {
        let source = format!("{}:{version}", self.repository_name);
        self.runtime
            .tag_image(&source, &self.repository_url, version)
            .await?;

        match self.runtime.push_image(&self.repository_url, version, None).await {
            Ok(()) => {}
            Err(e) if e.is_auth_failure() => {
                warn!(repository = %self.repository_url, error = %e, "Registry rejected credentials, logging in again");
                let credentials = self.registry.authorization().await?;
                self.runtime
                    .push_image(&self.repository_url, version, Some(&credentials))
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }

        let reference = format!("{}:{version}", self.repository_url);
        info!(image = %reference, "Published");
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sntl_core::Error;
    use sntl_test::{FakeRuntime, TestPlane};

    fn setup() -> (TestPlane, Arc<FakeRuntime>, Publisher) {
        let plane = TestPlane::new();
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add_image("sha256:c1", &["app:v1"], &[]);
        let publisher = Publisher::new(runtime.clone(), plane.registry.clone(), &plane.context());
        (plane, runtime, publisher)
    }

    #[tokio::test]
    async fn test_publish_tags_and_pushes() {
        let (plane, runtime, publisher) = setup();
        let reference = publisher.publish("v1").await.unwrap();

        assert_eq!(reference, format!("{}:v1", plane.context().repository_url()));
        assert_eq!(runtime.pushed(), vec![reference]);
        assert_eq!(plane.registry.authorization_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_relogs_once() {
        let (plane, runtime, publisher) = setup();
        runtime.fail_pushes(1);

        publisher.publish("v1").await.unwrap();
        assert_eq!(runtime.push_attempts(), 2);
        assert_eq!(plane.registry.authorization_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_gives_up_after_retry() {
        let (plane, runtime, publisher) = setup();
        runtime.fail_pushes(2);

        let result = publisher.publish("v1").await;
        assert!(matches!(result, Err(Error::Api(e)) if e.is_auth_failure()));
        assert_eq!(runtime.push_attempts(), 2);
        assert_eq!(plane.registry.authorization_count(), 1);
        assert!(runtime.pushed().is_empty());
    }

    #[tokio::test]
    async fn test_publish_unknown_version() {
        let (plane, runtime, publisher) = setup();
        assert!(publisher.publish("v9").await.is_err());
        assert_eq!(runtime.push_attempts(), 0);
        assert_eq!(plane.registry.authorization_count(), 0);
    }
}
