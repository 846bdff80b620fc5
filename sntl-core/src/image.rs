//! Content-addressed images

use serde::{Deserialize, Serialize};

/// A built image, identified by its config digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Config digest; the identity of the build content
    pub id: String,
    /// Manifest digest the registry stores the image under
    pub digest: Option<String>,
    /// Fully qualified pull references
    pub tags: Vec<String>,
    /// Short human-assigned tags (`latest`, `v3`, ...)
    pub versions: Vec<String>,
    pub arch: Option<String>,
}

impl Image {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            digest: None,
            tags: Vec::new(),
            versions: Vec::new(),
            arch: None,
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Attach versions, qualifying each as a tag under `repository_url`.
    pub fn with_versions<I, S>(mut self, repository_url: &str, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for version in versions {
            let version = version.into();
            push_unique(&mut self.tags, format!("{repository_url}:{version}"));
            push_unique(&mut self.versions, version);
        }
        self
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        let arch = arch.into();
        // the runtime reports amd64, the function platform calls it x86_64
        self.arch = Some(if arch == "amd64" {
            "x86_64".to_string()
        } else {
            arch
        });
        self
    }

    pub fn has_version(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
    }

    /// Whether `digest` names this image, by config or manifest digest.
    pub fn matches_digest(&self, digest: &str) -> bool {
        self.id == digest || self.digest.as_deref() == Some(digest)
    }

    /// Short id for display: 12 hex characters without the algorithm prefix.
    pub fn short_id(&self) -> &str {
        humanize(&self.id)
    }
}

/// Strip `sha256:` and truncate to 12 characters.
pub fn humanize(digest: &str) -> &str {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    &hex[..hex.len().min(12)]
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}
