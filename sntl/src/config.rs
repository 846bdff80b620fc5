//! Configuration management

use anyhow::Context as _;
use serde::Deserialize;
use sntl_aws::Timings;
use sntl_core::Provision;
use sntl_local::LocalOptions;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Everything a command needs besides the CLI arguments
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Defaults to the name of the working directory
    #[serde(default)]
    pub repository_name: Option<String>,

    /// Defaults to the caller id, lowercased
    #[serde(default)]
    pub partition: Option<String>,

    /// Defaults to the region of the credential chain
    #[serde(default)]
    pub region: Option<String>,

    #[serde(default = "default_policy_path")]
    pub policy_path: PathBuf,

    #[serde(default)]
    pub provision: Provision,

    /// Deployed environment values, for `{{ env.<key> }}` placeholders
    #[serde(default)]
    pub envs: BTreeMap<String, String>,

    #[serde(default)]
    pub timings: Timings,

    #[serde(default)]
    pub local: LocalOptions,
}

fn default_policy_path() -> PathBuf {
    PathBuf::from("policy.json")
}

impl Settings {
    /// Load configuration from file and environment
    ///
    /// Without an explicit path, `sentential.toml` and `.sntl/sentential.toml`
    /// are read if present. `SNTL_` variables override either, with `__`
    /// separating nested keys (`SNTL_PROVISION__MEMORY=1024`).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let builder = match path {
            Some(path) => config::Config::builder().add_source(config::File::from(path)),
            None => config::Config::builder()
                .add_source(config::File::with_name(".sntl/sentential").required(false))
                .add_source(config::File::with_name("sentential").required(false)),
        };

        let config = builder
            .add_source(
                config::Environment::with_prefix("SNTL")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(config.try_deserialize::<Settings>()?)
    }

    pub fn repository_name(&self) -> anyhow::Result<String> {
        if let Some(name) = &self.repository_name {
            return Ok(name.clone());
        }
        let cwd = std::env::current_dir()?;
        cwd.file_name()
            .and_then(|name| name.to_str())
            .map(ToString::to_string)
            .context("cannot derive a repository name from the working directory")
    }
}
