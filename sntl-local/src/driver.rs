//! Local emulation driver
//!
//! Runs the function image next to an optional gateway sidecar on a private
//! bridge network. The function container receives short-lived credentials
//! scoped by the same policy document the remote driver would attach.

use crate::catalog::LocalCatalog;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use sntl_core::catalog::{find_version, Catalog};
use sntl_core::container::{ContainerRuntime, RunSpec};
use sntl_core::error::tolerate_missing;
use sntl_core::{ControlPlane, Driver, Error, Function, Image, Ontology, PolicyTemplate, Result};
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info};

/// Federation token names are capped by the token service.
const TOKEN_NAME_LIMIT: usize = 32;

/// Names, ports and the gateway image used by the emulation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LocalOptions {
    pub network: String,
    pub function_container: String,
    pub gateway_container: String,
    pub gateway_image: String,
    pub function_port: u16,
    pub gateway_port: u16,
}

impl Default for LocalOptions {
    fn default() -> Self {
        Self {
            network: "sentential-bridge".to_string(),
            function_container: "sentential".to_string(),
            gateway_container: "sentential-gw".to_string(),
            gateway_image: "ghcr.io/wheegee/sentential-gw:latest".to_string(),
            function_port: 9000,
            gateway_port: 8081,
        }
    }
}

impl LocalOptions {
    fn function_url(&self) -> String {
        format!("http://localhost:{}", self.function_port)
    }

    fn gateway_url(&self) -> String {
        format!("http://localhost:{}", self.gateway_port)
    }
}

/// Port the runtime interface emulator listens on inside the function image
const EMULATOR_PORT: u16 = 8080;

pub struct LocalDriver {
    ontology: Ontology,
    control: ControlPlane,
    runtime: Arc<dyn ContainerRuntime>,
    policy: Arc<dyn PolicyTemplate>,
    catalog: LocalCatalog,
    options: LocalOptions,
}

impl LocalDriver {
    pub fn new(
        ontology: Ontology,
        control: ControlPlane,
        runtime: Arc<dyn ContainerRuntime>,
        policy: Arc<dyn PolicyTemplate>,
    ) -> Self {
        let catalog = LocalCatalog::new(runtime.clone(), &ontology.context.repository_name);
        Self {
            ontology,
            control,
            runtime,
            policy,
            catalog,
            options: LocalOptions::default(),
        }
    }

    pub fn with_options(mut self, options: LocalOptions) -> Self {
        self.options = options;
        self
    }

    fn token_name(&self) -> String {
        let mut name = format!("{}-spec-policy", self.ontology.context.repository_name);
        name.truncate(TOKEN_NAME_LIMIT);
        name
    }

    /// Reference the function container is started from.
    fn reference(&self, image: &Image) -> String {
        match image.versions.first() {
            Some(version) => format!("{}:{version}", self.catalog.repository_name()),
            None => image.id.clone(),
        }
    }

    async fn function_env(&self) -> Result<Vec<(String, String)>> {
        let document = self.policy.render(&self.ontology)?;
        let credentials = self
            .control
            .tokens
            .federation_token(&self.token_name(), &document)
            .await?;
        debug!(expiration = ?credentials.expiration, "Issued emulation credentials");

        let mut env = vec![
            ("AWS_REGION".to_string(), self.ontology.context.region.clone()),
            ("PARTITION".to_string(), self.ontology.envs.path.clone()),
        ];
        env.extend(credentials.as_env());
        Ok(env)
    }

    async fn run_gateway(&self) -> Result<()> {
        let options = &self.options;
        let spec = RunSpec {
            image: options.gateway_image.clone(),
            name: options.gateway_container.clone(),
            hostname: options.gateway_container.clone(),
            network: options.network.clone(),
            env: vec![(
                "LAMBDA_ENDPOINT".to_string(),
                format!("http://{}:{EMULATOR_PORT}", options.function_container),
            )],
            ports: vec![(options.gateway_port, options.gateway_port)],
        };
        self.runtime.run_container(&spec).await?;
        info!(container = %spec.name, port = options.gateway_port, "Started gateway");
        Ok(())
    }

    /// Copy the function container's output into `out`.
    pub async fn tail(&self, follow: bool, out: &mut (impl Write + Send)) -> Result<()> {
        let mut lines = self.runtime.logs(&self.options.function_container, follow);
        while let Some(line) = lines.next().await {
            out.write_all(line?.as_bytes())?;
        }
        out.flush()?;
        Ok(())
    }

    /// Resolve a container's image reference back into a catalog image.
    async fn resolve_image(&self, reference: &str, image_id: &str) -> Result<Image> {
        let images = self.catalog.images().await?;
        let prefix = format!("{}:", self.catalog.repository_name());
        match reference.strip_prefix(&prefix) {
            Some(version) => find_version(images, version),
            None => images
                .into_iter()
                .find(|image| image.matches_digest(image_id))
                .ok_or_else(|| Error::not_found(format!("image {reference}"))),
        }
    }
}

#[async_trait]
impl Catalog for LocalDriver {
    async fn images(&self) -> Result<Vec<Image>> {
        self.catalog.images().await
    }
}

#[async_trait]
impl Driver for LocalDriver {
    async fn deployed(&self) -> Result<Function> {
        let containers = self.runtime.list_containers().await?;
        let function = containers
            .iter()
            .find(|c| c.name == self.options.function_container)
            .ok_or_else(|| Error::not_found("no local function container"))?;
        let gateway = containers
            .iter()
            .any(|c| c.name == self.options.gateway_container);

        let image = self.resolve_image(&function.image, &function.image_id).await?;
        let url = gateway.then(|| self.options.gateway_url());

        Ok(Function::new(
            image,
            self.ontology.context.resource_name(),
            function.id.clone(),
            &self.ontology.context.region,
        )
        .with_public_url(url))
    }

    async fn deploy(&self, image: &Image, public_url: bool) -> Result<String> {
        let options = &self.options;
        self.destroy().await?;

        self.runtime.create_network(&options.network).await?;
        debug!(network = %options.network, "Created network");

        let spec = RunSpec {
            image: self.reference(image),
            name: options.function_container.clone(),
            hostname: options.function_container.clone(),
            network: options.network.clone(),
            env: self.function_env().await?,
            ports: vec![(options.function_port, EMULATOR_PORT)],
        };
        let id = self.runtime.run_container(&spec).await?;
        info!(container = %spec.name, image = %spec.image, id = %id, "Started function");

        if public_url {
            self.run_gateway().await?;
            Ok(options.gateway_url())
        } else {
            Ok(options.function_url())
        }
    }

    async fn destroy(&self) -> Result<()> {
        let options = &self.options;
        for name in [&options.gateway_container, &options.function_container] {
            if tolerate_missing(self.runtime.remove_container(name).await)?.is_some() {
                info!(container = %name, "Removed container");
            }
        }
        if tolerate_missing(self.runtime.remove_network(&options.network).await)?.is_some() {
            debug!(network = %options.network, "Removed network");
        }
        Ok(())
    }

    async fn logs(&self, follow: bool) -> Result<()> {
        self.tail(follow, &mut std::io::stdout()).await
    }
}
