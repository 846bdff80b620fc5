//! In-memory image registry

use async_trait::async_trait;
use dashmap::DashMap;
use sntl_core::control::{ApiResult, Registry, RegistryCredentials};
use sntl_core::{ApiError, ErrorCode, ImageDescription, ImageManifest};
use std::sync::atomic::{AtomicUsize, Ordering};

/// An image stored in a repository
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub manifest_digest: String,
    pub config_digest: String,
    pub tags: Vec<String>,
}

/// Repositories of images keyed by manifest digest
#[derive(Debug, Default)]
pub struct FakeRegistry {
    endpoint: String,
    repositories: DashMap<String, Vec<StoredImage>>,
    authorizations: AtomicUsize,
}

impl FakeRegistry {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn create_repository(&self, repository: &str) {
        self.repositories.entry(repository.to_string()).or_default();
    }

    /// Store an image, moving any of `tags` off the images holding them.
    pub fn put_image(&self, repository: &str, manifest: &str, config: &str, tags: &[&str]) {
        let mut images = self.repositories.entry(repository.to_string()).or_default();
        for image in images.iter_mut() {
            image.tags.retain(|t| !tags.contains(&t.as_str()));
        }

        let tags = tags.iter().map(|t| t.to_string());
        match images.iter_mut().find(|i| i.manifest_digest == manifest) {
            Some(image) => image.tags.extend(tags),
            None => images.push(StoredImage {
                manifest_digest: manifest.to_string(),
                config_digest: config.to_string(),
                tags: tags.collect(),
            }),
        }
    }

    /// Point an existing manifest at a different config, which a sound
    /// registry never does.
    pub fn corrupt(&self, repository: &str, manifest: &str, config: &str) {
        if let Some(mut images) = self.repositories.get_mut(repository) {
            for image in images.iter_mut().filter(|i| i.manifest_digest == manifest) {
                image.config_digest = config.to_string();
            }
        }
    }

    /// Manifest digest currently tagged `tag`.
    pub fn resolve_tag(&self, repository: &str, tag: &str) -> Option<String> {
        self.repositories.get(repository).and_then(|images| {
            images
                .iter()
                .find(|i| i.tags.iter().any(|t| t == tag))
                .map(|i| i.manifest_digest.clone())
        })
    }

    pub fn authorization_count(&self) -> usize {
        self.authorizations.load(Ordering::SeqCst)
    }

    fn repository_not_found(repository: &str) -> ApiError {
        ApiError::new(
            ErrorCode::RepositoryNotFound,
            format!("The repository with name '{repository}' does not exist"),
        )
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn describe_images(&self, repository: &str) -> ApiResult<Vec<ImageDescription>> {
        let images = self
            .repositories
            .get(repository)
            .ok_or_else(|| Self::repository_not_found(repository))?;
        Ok(images
            .iter()
            .map(|i| ImageDescription {
                digest: i.manifest_digest.clone(),
                tags: i.tags.clone(),
            })
            .collect())
    }

    async fn batch_get_manifests(
        &self,
        repository: &str,
        digests: &[String],
    ) -> ApiResult<Vec<ImageManifest>> {
        let images = self
            .repositories
            .get(repository)
            .ok_or_else(|| Self::repository_not_found(repository))?;
        Ok(images
            .iter()
            .filter(|i| digests.contains(&i.manifest_digest))
            .map(|i| ImageManifest {
                digest: i.manifest_digest.clone(),
                config_digest: Some(i.config_digest.clone()),
            })
            .collect())
    }

    async fn authorization(&self) -> ApiResult<RegistryCredentials> {
        self.authorizations.fetch_add(1, Ordering::SeqCst);
        Ok(RegistryCredentials {
            username: "AWS".to_string(),
            password: "registry-password".to_string(),
            endpoint: format!("https://{}", self.endpoint),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tags_move_between_images() {
        let registry = FakeRegistry::default();
        registry.put_image("app", "m1", "c1", &["latest", "v1"]);
        registry.put_image("app", "m2", "c2", &["latest"]);

        let described = registry.describe_images("app").await.unwrap();
        assert_eq!(described[0].tags, vec!["v1"]);
        assert_eq!(described[1].tags, vec!["latest"]);
        assert_eq!(registry.resolve_tag("app", "latest").as_deref(), Some("m2"));
    }

    #[tokio::test]
    async fn test_missing_repository() {
        let registry = FakeRegistry::default();
        let result = registry.describe_images("nope").await;
        assert!(matches!(result, Err(e) if e.code == ErrorCode::RepositoryNotFound));
    }
}
