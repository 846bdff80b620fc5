//! Container runtime port used by local emulation

use crate::control::{ApiResult, RegistryCredentials};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// An image known to the local runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalImage {
    /// Runtime image id; the config digest
    pub id: String,
    /// `repository:tag` references
    pub repo_tags: Vec<String>,
    /// `repository@digest` references
    pub repo_digests: Vec<String>,
    pub architecture: Option<String>,
}

/// A container, running or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Name without the leading slash
    pub name: String,
    /// The reference the container was started from
    pub image: String,
    pub image_id: String,
}

/// What to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub image: String,
    pub name: String,
    pub hostname: String,
    pub network: String,
    pub env: Vec<(String, String)>,
    /// (host port, container port)
    pub ports: Vec<(u16, u16)>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_images(&self) -> ApiResult<Vec<LocalImage>>;
    async fn inspect_image(&self, reference: &str) -> ApiResult<LocalImage>;
    async fn tag_image(&self, source: &str, repository: &str, tag: &str) -> ApiResult<()>;
    async fn push_image(
        &self,
        repository: &str,
        tag: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> ApiResult<()>;

    async fn list_containers(&self) -> ApiResult<Vec<ContainerSummary>>;
    /// Create and start a detached container, returning its id.
    async fn run_container(&self, spec: &RunSpec) -> ApiResult<String>;
    /// Force-remove a container and its anonymous volumes.
    async fn remove_container(&self, name: &str) -> ApiResult<()>;

    async fn create_network(&self, name: &str) -> ApiResult<()>;
    async fn remove_network(&self, name: &str) -> ApiResult<()>;

    /// Log lines of a container, ending when it stops if `follow` is set.
    fn logs(&self, name: &str, follow: bool) -> BoxStream<'static, ApiResult<String>>;
}
