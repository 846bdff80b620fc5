//! Image catalog over the local runtime's image store

use async_trait::async_trait;
use sntl_core::catalog::Catalog;
use sntl_core::container::{ContainerRuntime, LocalImage};
use sntl_core::{Image, Result};
use std::sync::Arc;

/// Local images tagged under the repository name
pub struct LocalCatalog {
    runtime: Arc<dyn ContainerRuntime>,
    repository_name: String,
}

impl LocalCatalog {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, repository_name: impl Into<String>) -> Self {
        Self {
            runtime,
            repository_name: repository_name.into(),
        }
    }

    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    /// The image for a runtime listing entry, if any tag names the repository.
    fn from_local(&self, local: LocalImage) -> Option<Image> {
        let prefix = format!("{}:", self.repository_name);
        let versions: Vec<String> = local
            .repo_tags
            .iter()
            .filter_map(|tag| tag.strip_prefix(&prefix))
            .map(ToString::to_string)
            .collect();
        if versions.is_empty() {
            return None;
        }

        let mut image = Image::new(local.id).with_versions(&self.repository_name, versions);
        if let Some(digest) = local
            .repo_digests
            .first()
            .and_then(|reference| reference.split_once('@'))
            .map(|(_, digest)| digest)
        {
            image = image.with_digest(digest);
        }
        Some(image)
    }
}

#[async_trait]
impl Catalog for LocalCatalog {
    async fn images(&self) -> Result<Vec<Image>> {
        let listed = self.runtime.list_images().await?;
        let mut images = Vec::new();
        for local in listed {
            let id = local.id.clone();
            let Some(image) = self.from_local(local) else {
                continue;
            };
            // architecture is only reported by inspection
            let inspected = self.runtime.inspect_image(&id).await?;
            images.push(match inspected.architecture {
                Some(arch) => image.with_arch(arch),
                None => image,
            });
        }
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sntl_core::Error;
    use sntl_test::FakeRuntime;

    fn catalog(runtime: FakeRuntime) -> LocalCatalog {
        LocalCatalog::new(Arc::new(runtime), "app")
    }

    #[tokio::test]
    async fn test_only_repository_tags() {
        let runtime = FakeRuntime::new();
        runtime.add_image("sha256:c1", &["app:v1", "app:latest"], &["reg/app@sha256:m1"]);
        runtime.add_image("sha256:c2", &["other:v1"], &[]);
        runtime.add_image("sha256:c3", &["reg/app:v3"], &[]);

        let images = catalog(runtime).images().await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].id, "sha256:c1");
        assert_eq!(images[0].digest.as_deref(), Some("sha256:m1"));
        assert_eq!(images[0].versions, vec!["v1", "latest"]);
        assert_eq!(images[0].tags, vec!["app:v1", "app:latest"]);
        assert_eq!(images[0].arch.as_deref(), Some("x86_64"));
    }

    #[tokio::test]
    async fn test_arch_comes_from_inspection() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add_image("sha256:c1", &["app:v1"], &[]);
        runtime.add_image("sha256:c2", &["other:v1"], &[]);
        assert!(runtime.list_images().await.unwrap()[0].architecture.is_none());

        let catalog = LocalCatalog::new(runtime.clone(), "app");
        let image = catalog.image("v1").await.unwrap();
        assert_eq!(image.arch.as_deref(), Some("x86_64"));
        assert_eq!(runtime.inspections(), 1);
    }

    #[tokio::test]
    async fn test_unpushed_image_has_no_digest() {
        let runtime = FakeRuntime::new();
        runtime.add_image("sha256:c1", &["app:dev"], &[]);

        let image = catalog(runtime).image("dev").await.unwrap();
        assert!(image.digest.is_none());
    }

    #[tokio::test]
    async fn test_missing_version() {
        let runtime = FakeRuntime::new();
        runtime.add_image("sha256:c1", &["app:v1"], &[]);
        assert!(matches!(
            catalog(runtime).image("v2").await,
            Err(Error::NotFound(_))
        ));
    }
}
