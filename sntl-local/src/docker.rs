//! Container runtime backed by the Docker engine API

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{CreateImageOptions, ListImagesOptions, PushImageOptions, TagImageOptions};
use bollard::models::{HostConfig, PortBinding};
use bollard::network::CreateNetworkOptions;
use bollard::Docker;
use futures::stream::{BoxStream, StreamExt};
use sntl_core::container::{ContainerRuntime, ContainerSummary, LocalImage, RunSpec};
use sntl_core::control::{ApiResult, RegistryCredentials};
use sntl_core::{ApiError, ErrorCode};
use std::collections::HashMap;
use tracing::{debug, info};

/// Docker engine client
#[derive(Clone)]
pub struct BollardRuntime {
    docker: Docker,
}

impl BollardRuntime {
    /// Connect through `DOCKER_HOST` or the default local socket.
    pub fn connect() -> ApiResult<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(api_error)?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn pull(&self, reference: &str) -> ApiResult<()> {
        info!(image = %reference, "Pulling image");
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            let progress = progress.map_err(image_error)?;
            if let Some(status) = progress.status {
                debug!(image = %reference, status = %status, "Pull progress");
            }
        }
        Ok(())
    }

    async fn create(&self, spec: &RunSpec) -> Result<String, DockerError> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for (host, container) in &spec.ports {
            let key = format!("{container}/tcp");
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host.to_string()),
                }]),
            );
        }

        let config = Config {
            image: Some(spec.image.clone()),
            hostname: Some(spec.hostname.clone()),
            env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                network_mode: Some(spec.network.clone()),
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self.docker.create_container(Some(options), config).await?;
        Ok(response.id)
    }
}

/// Classify an engine error by HTTP status.
fn api_error(err: DockerError) -> ApiError {
    match err {
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => {
            let code = match status_code {
                404 => ErrorCode::ResourceNotFound,
                409 => ErrorCode::ResourceConflict,
                401 | 403 => ErrorCode::Unauthorized,
                _ => ErrorCode::ServiceFailure,
            };
            ApiError::new(code, message)
        }
        other => ApiError::new(ErrorCode::ServiceFailure, other.to_string()),
    }
}

fn image_error(err: DockerError) -> ApiError {
    let error = api_error(err);
    if error.code == ErrorCode::ResourceNotFound {
        ApiError::new(ErrorCode::ImageNotFound, error.message)
    } else {
        error
    }
}

/// Push failures arrive as text in the progress stream.
fn push_error(message: String) -> ApiError {
    let lower = message.to_lowercase();
    let code = if lower.contains("unauthorized")
        || lower.contains("authentication required")
        || lower.contains("no basic auth credentials")
        || lower.contains("denied")
        || lower.contains("token has expired")
    {
        ErrorCode::Unauthorized
    } else {
        ErrorCode::ServiceFailure
    };
    ApiError::new(code, message)
}

fn docker_credentials(credentials: &RegistryCredentials) -> DockerCredentials {
    DockerCredentials {
        username: Some(credentials.username.clone()),
        password: Some(credentials.password.clone()),
        serveraddress: Some(credentials.endpoint.clone()),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    async fn list_images(&self) -> ApiResult<Vec<LocalImage>> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String>::default()))
            .await
            .map_err(api_error)?;

        Ok(images
            .into_iter()
            .map(|image| LocalImage {
                id: image.id,
                repo_tags: image.repo_tags,
                repo_digests: image.repo_digests,
                architecture: None,
            })
            .collect())
    }

    async fn inspect_image(&self, reference: &str) -> ApiResult<LocalImage> {
        let image = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(image_error)?;

        Ok(LocalImage {
            id: image.id.unwrap_or_default(),
            repo_tags: image.repo_tags.unwrap_or_default(),
            repo_digests: image.repo_digests.unwrap_or_default(),
            architecture: image.architecture,
        })
    }

    async fn tag_image(&self, source: &str, repository: &str, tag: &str) -> ApiResult<()> {
        let options = TagImageOptions {
            repo: repository,
            tag,
        };
        self.docker
            .tag_image(source, Some(options))
            .await
            .map_err(image_error)
    }

    async fn push_image(
        &self,
        repository: &str,
        tag: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> ApiResult<()> {
        let mut stream = self.docker.push_image(
            repository,
            Some(PushImageOptions { tag }),
            credentials.map(docker_credentials),
        );

        while let Some(progress) = stream.next().await {
            let progress = match progress {
                Ok(progress) => progress,
                Err(DockerError::DockerResponseServerError { message, .. }) => {
                    return Err(push_error(message))
                }
                Err(e) => return Err(api_error(e)),
            };
            if let Some(message) = progress.error {
                return Err(push_error(message));
            }
            if let Some(status) = progress.status {
                debug!(repository, tag, status = %status, "Push progress");
            }
        }
        Ok(())
    }

    async fn list_containers(&self) -> ApiResult<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(api_error)?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                name: c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|name| name.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                image_id: c.image_id.unwrap_or_default(),
            })
            .collect())
    }

    async fn run_container(&self, spec: &RunSpec) -> ApiResult<String> {
        let id = match self.create(spec).await {
            Ok(id) => id,
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                self.pull(&spec.image).await?;
                self.create(spec).await.map_err(api_error)?
            }
            Err(e) => return Err(api_error(e)),
        };

        self.docker
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(api_error)?;
        debug!(container = %spec.name, id = %id, "Started container");
        Ok(id)
    }

    async fn remove_container(&self, name: &str) -> ApiResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(api_error)
    }

    async fn create_network(&self, name: &str) -> ApiResult<()> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            ..Default::default()
        };
        self.docker
            .create_network(options)
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> ApiResult<()> {
        self.docker.remove_network(name).await.map_err(api_error)
    }

    fn logs(&self, name: &str, follow: bool) -> BoxStream<'static, ApiResult<String>> {
        let options = LogsOptions::<String> {
            follow,
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };
        self.docker
            .logs(name, Some(options))
            .map(|line| line.map(|output| output.to_string()).map_err(api_error))
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let error = |status_code| {
            api_error(DockerError::DockerResponseServerError {
                status_code,
                message: "x".to_string(),
            })
        };
        assert!(error(404).is_not_found());
        assert!(error(409).is_conflict());
        assert!(error(401).is_auth_failure());
        assert_eq!(error(500).code, ErrorCode::ServiceFailure);
    }

    #[test]
    fn test_image_not_found() {
        let error = image_error(DockerError::DockerResponseServerError {
            status_code: 404,
            message: "No such image: app:v1".to_string(),
        });
        assert_eq!(error.code, ErrorCode::ImageNotFound);
    }

    #[test]
    fn test_push_error_classification() {
        assert!(push_error("unauthorized: authentication required".into()).is_auth_failure());
        assert!(push_error(
            "denied: Your authorization token has expired. Reauthenticate and try again.".into()
        )
        .is_auth_failure());
        assert!(!push_error("blob upload unknown".into()).is_auth_failure());
    }
}
