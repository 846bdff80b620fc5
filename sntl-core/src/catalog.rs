//! Image catalog: joining registry listings into digest-keyed images

use crate::error::{Error, Result};
use crate::image::Image;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

/// One entry of the registry's per-digest listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescription {
    /// Manifest digest
    pub digest: String,
    /// Short tags; empty for untagged images
    pub tags: Vec<String>,
}

/// A fetched manifest and the config digest it embeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageManifest {
    pub digest: String,
    /// Absent for manifest lists, which carry no config of their own
    pub config_digest: Option<String>,
}

#[derive(Deserialize)]
struct RawManifest {
    config: Option<RawDescriptor>,
}

#[derive(Deserialize)]
struct RawDescriptor {
    digest: String,
}

impl ImageManifest {
    /// Parse a docker v2 / OCI manifest document.
    pub fn parse(digest: impl Into<String>, document: &str) -> Result<Self> {
        let raw: RawManifest = serde_json::from_str(document)?;
        Ok(Self {
            digest: digest.into(),
            config_digest: raw.config.map(|c| c.digest),
        })
    }
}

/// Manifest digest to config digest mapping, kept for the life of a catalog
///
/// A manifest digest must keep resolving to the same config digest; anything
/// else is an integrity violation and is never corrected silently.
#[derive(Debug, Default)]
pub struct DigestIndex {
    configs: HashMap<String, String>,
}

impl DigestIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, manifest: &str, config: &str) -> Result<()> {
        match self.configs.get(manifest) {
            Some(existing) if existing != config => Err(Error::Integrity {
                manifest: manifest.to_string(),
                existing: existing.clone(),
                conflicting: config.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.configs.insert(manifest.to_string(), config.to_string());
                Ok(())
            }
        }
    }

    pub fn config_of(&self, manifest: &str) -> Option<&str> {
        self.configs.get(manifest).map(String::as_str)
    }
}

/// Join the description listing and the manifest fetch by manifest digest.
///
/// Descriptions whose manifest has no config digest (manifest lists) are keyed
/// by their manifest digest.
pub fn join(
    index: &mut DigestIndex,
    repository_url: &str,
    descriptions: &[ImageDescription],
    manifests: &[ImageManifest],
) -> Result<Vec<Image>> {
    for manifest in manifests {
        if let Some(config) = &manifest.config_digest {
            index.record(&manifest.digest, config)?;
        }
    }

    let images = descriptions
        .iter()
        .map(|description| {
            let id = index
                .config_of(&description.digest)
                .unwrap_or(&description.digest);
            Image::new(id)
                .with_digest(description.digest.clone())
                .with_versions(repository_url, description.tags.iter().cloned())
        })
        .collect();

    Ok(images)
}

/// First image carrying `version`.
pub fn find_version(images: Vec<Image>, version: &str) -> Result<Image> {
    images
        .into_iter()
        .find(|image| image.has_version(version))
        .ok_or_else(|| Error::not_found(format!("no image with version {version}")))
}

/// Read-only view of the images available to a driver
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn images(&self) -> Result<Vec<Image>>;

    async fn image(&self, version: &str) -> Result<Image> {
        find_version(self.images().await?, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPO: &str = "123456789012.dkr.ecr.us-east-1.amazonaws.com/app";

    fn description(digest: &str, tags: &[&str]) -> ImageDescription {
        ImageDescription {
            digest: digest.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn manifest(digest: &str, config: &str) -> ImageManifest {
        ImageManifest {
            digest: digest.to_string(),
            config_digest: Some(config.to_string()),
        }
    }

    #[test]
    fn test_join_tagged_and_untagged() {
        let mut index = DigestIndex::new();
        let images = join(
            &mut index,
            REPO,
            &[description("m1", &["v1", "latest"]), description("m2", &[])],
            &[manifest("m1", "D1"), manifest("m2", "D2")],
        )
        .unwrap();

        assert_eq!(images.len(), 2);
        assert_eq!(images[0].id, "D1");
        assert_eq!(images[0].digest.as_deref(), Some("m1"));
        assert_eq!(images[0].versions, vec!["v1", "latest"]);
        assert_eq!(images[0].tags[0], format!("{REPO}:v1"));
        assert_eq!(images[1].id, "D2");
        assert!(images[1].versions.is_empty());
        assert!(images[1].tags.is_empty());

        assert_eq!(find_version(images.clone(), "v1").unwrap().id, "D1");
        assert_eq!(find_version(images.clone(), "latest").unwrap().id, "D1");
        assert!(matches!(
            find_version(images, "v2"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_conflicting_config_is_integrity_violation() {
        let mut index = DigestIndex::new();
        let result = join(
            &mut index,
            REPO,
            &[description("m1", &["v1"])],
            &[manifest("m1", "D1"), manifest("m1", "D9")],
        );
        assert!(matches!(result, Err(Error::Integrity { .. })));
    }

    #[test]
    fn test_integrity_holds_across_calls() {
        let mut index = DigestIndex::new();
        join(&mut index, REPO, &[], &[manifest("m1", "D1")]).unwrap();
        join(&mut index, REPO, &[], &[manifest("m1", "D1")]).unwrap();
        let result = join(&mut index, REPO, &[], &[manifest("m1", "D2")]);
        assert!(matches!(result, Err(Error::Integrity { .. })));
    }

    #[test]
    fn test_duplicate_tags_first_match_wins() {
        let mut index = DigestIndex::new();
        let images = join(
            &mut index,
            REPO,
            &[description("m1", &["v1"]), description("m2", &["v1"])],
            &[manifest("m1", "D1"), manifest("m2", "D2")],
        )
        .unwrap();
        assert_eq!(find_version(images, "v1").unwrap().id, "D1");
    }

    #[test]
    fn test_parse_manifest() {
        let document = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
            "config": {"mediaType": "application/vnd.docker.container.image.v1+json", "size": 1, "digest": "sha256:cfg"},
            "layers": []
        }"#;
        let manifest = ImageManifest::parse("sha256:man", document).unwrap();
        assert_eq!(manifest.config_digest.as_deref(), Some("sha256:cfg"));

        let list = r#"{"schemaVersion": 2, "manifests": []}"#;
        assert!(ImageManifest::parse("sha256:list", list).unwrap().config_digest.is_none());
    }

    #[test]
    fn test_manifest_list_keyed_by_manifest_digest() {
        let mut index = DigestIndex::new();
        let images = join(
            &mut index,
            REPO,
            &[description("list", &["multi"])],
            &[ImageManifest {
                digest: "list".to_string(),
                config_digest: None,
            }],
        )
        .unwrap();
        assert_eq!(images[0].id, "list");
    }
}
