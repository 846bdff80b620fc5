//! Image catalog backed by the container registry

use async_trait::async_trait;
use parking_lot::Mutex;
use sntl_core::catalog::{join, Catalog, DigestIndex};
use sntl_core::control::Registry;
use sntl_core::{Context, Image, Result};
use std::sync::Arc;
use tracing::debug;

/// Registry images, keyed by config digest
///
/// The digest index lives as long as the catalog, so a manifest that resolves
/// to a different config between two listings is reported as an integrity
/// violation.
pub struct RegistryCatalog {
    registry: Arc<dyn Registry>,
    repository_name: String,
    repository_url: String,
    index: Mutex<DigestIndex>,
}

impl RegistryCatalog {
    pub fn new(registry: Arc<dyn Registry>, context: &Context) -> Self {
        Self {
            registry,
            repository_name: context.repository_name.clone(),
            repository_url: context.repository_url(),
            index: Mutex::new(DigestIndex::new()),
        }
    }

    pub fn repository_url(&self) -> &str {
        &self.repository_url
    }
}

#[async_trait]
impl Catalog for RegistryCatalog {
    async fn images(&self) -> Result<Vec<Image>> {
        let descriptions = self.registry.describe_images(&self.repository_name).await?;
        if descriptions.is_empty() {
            return Ok(Vec::new());
        }

        let digests: Vec<String> = descriptions.iter().map(|d| d.digest.clone()).collect();
        let manifests = self
            .registry
            .batch_get_manifests(&self.repository_name, &digests)
            .await?;
        debug!(
            repository = %self.repository_name,
            descriptions = descriptions.len(),
            manifests = manifests.len(),
            "Listed registry images"
        );

        let mut index = self.index.lock();
        join(&mut index, &self.repository_url, &descriptions, &manifests)
    }
}
