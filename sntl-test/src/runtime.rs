//! In-memory container runtime

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use sntl_core::container::{ContainerRuntime, ContainerSummary, LocalImage, RunSpec};
use sntl_core::control::{ApiResult, RegistryCredentials};
use sntl_core::{ApiError, ErrorCode};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

/// A container and the `RunSpec` it was started from
#[derive(Debug, Clone)]
pub struct RunningContainer {
    pub summary: ContainerSummary,
    pub spec: RunSpec,
    pub logs: Vec<String>,
}

impl RunningContainer {
    pub fn env(&self, key: &str) -> Option<&str> {
        self.spec
            .env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default)]
struct State {
    images: Vec<LocalImage>,
    containers: HashMap<String, RunningContainer>,
    networks: BTreeSet<String>,
    pushed: Vec<String>,
}

/// In-memory container runtime
///
/// `fail_pushes(n)` makes the next `n` pushes fail as unauthorized.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
    push_failures: AtomicU32,
    push_attempts: AtomicU32,
    inspections: AtomicU32,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_image(&self, id: &str, repo_tags: &[&str], repo_digests: &[&str]) {
        self.state.lock().images.push(LocalImage {
            id: id.to_string(),
            repo_tags: repo_tags.iter().map(|t| t.to_string()).collect(),
            repo_digests: repo_digests.iter().map(|d| d.to_string()).collect(),
            architecture: Some("amd64".to_string()),
        });
    }

    pub fn fail_pushes(&self, count: u32) {
        self.push_failures.store(count, Ordering::SeqCst);
    }

    pub fn push_attempts(&self) -> u32 {
        self.push_attempts.load(Ordering::SeqCst)
    }

    pub fn inspections(&self) -> u32 {
        self.inspections.load(Ordering::SeqCst)
    }

    pub fn pushed(&self) -> Vec<String> {
        self.state.lock().pushed.clone()
    }

    pub fn container(&self, name: &str) -> Option<RunningContainer> {
        self.state.lock().containers.get(name).cloned()
    }

    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().containers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn networks(&self) -> Vec<String> {
        self.state.lock().networks.iter().cloned().collect()
    }

    pub fn write_log(&self, name: &str, line: &str) {
        if let Some(container) = self.state.lock().containers.get_mut(name) {
            container.logs.push(line.to_string());
        }
    }

    fn find_image<'a>(images: &'a [LocalImage], reference: &str) -> Option<&'a LocalImage> {
        images.iter().find(|i| {
            i.id == reference
                || i.repo_tags.iter().any(|t| t == reference)
                || i.repo_digests.iter().any(|d| d == reference)
        })
    }

    fn no_such(what: &str, name: &str) -> ApiError {
        ApiError::new(ErrorCode::ResourceNotFound, format!("No such {what}: {name}"))
            .with_resource(name)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    // listings carry no architecture, only inspection does
    async fn list_images(&self) -> ApiResult<Vec<LocalImage>> {
        Ok(self
            .state
            .lock()
            .images
            .iter()
            .map(|image| LocalImage {
                architecture: None,
                ..image.clone()
            })
            .collect())
    }

    async fn inspect_image(&self, reference: &str) -> ApiResult<LocalImage> {
        self.inspections.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        Self::find_image(&state.images, reference)
            .cloned()
            .ok_or_else(|| {
                ApiError::new(ErrorCode::ImageNotFound, format!("No such image: {reference}"))
            })
    }

    async fn tag_image(&self, source: &str, repository: &str, tag: &str) -> ApiResult<()> {
        let mut state = self.state.lock();
        let target = format!("{repository}:{tag}");
        for image in &mut state.images {
            image.repo_tags.retain(|t| *t != target);
        }
        let id = Self::find_image(&state.images, source)
            .map(|i| i.id.clone())
            .ok_or_else(|| {
                ApiError::new(ErrorCode::ImageNotFound, format!("No such image: {source}"))
            })?;
        if let Some(image) = state.images.iter_mut().find(|i| i.id == id) {
            image.repo_tags.push(target);
        }
        Ok(())
    }

    async fn push_image(
        &self,
        repository: &str,
        tag: &str,
        _credentials: Option<&RegistryCredentials>,
    ) -> ApiResult<()> {
        self.push_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.push_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.push_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ApiError::new(
                ErrorCode::Unauthorized,
                "authentication required",
            ));
        }

        let reference = format!("{repository}:{tag}");
        let mut state = self.state.lock();
        if Self::find_image(&state.images, &reference).is_none() {
            return Err(ApiError::new(
                ErrorCode::ImageNotFound,
                format!("An image does not exist locally with the tag: {repository}"),
            ));
        }
        state.pushed.push(reference);
        Ok(())
    }

    async fn list_containers(&self) -> ApiResult<Vec<ContainerSummary>> {
        Ok(self
            .state
            .lock()
            .containers
            .values()
            .map(|c| c.summary.clone())
            .collect())
    }

    async fn run_container(&self, spec: &RunSpec) -> ApiResult<String> {
        let mut state = self.state.lock();
        if state.containers.contains_key(&spec.name) {
            return Err(ApiError::new(
                ErrorCode::ResourceConflict,
                format!("The container name \"/{}\" is already in use", spec.name),
            ));
        }
        if !state.networks.contains(&spec.network) {
            return Err(Self::no_such("network", &spec.network));
        }
        let image_id = Self::find_image(&state.images, &spec.image)
            .map(|i| i.id.clone())
            .ok_or_else(|| {
                ApiError::new(ErrorCode::ImageNotFound, format!("No such image: {}", spec.image))
            })?;

        let id = Uuid::new_v4().simple().to_string();
        state.containers.insert(
            spec.name.clone(),
            RunningContainer {
                summary: ContainerSummary {
                    id: id.clone(),
                    name: spec.name.clone(),
                    image: spec.image.clone(),
                    image_id,
                },
                spec: spec.clone(),
                logs: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn remove_container(&self, name: &str) -> ApiResult<()> {
        self.state
            .lock()
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::no_such("container", name))
    }

    async fn create_network(&self, name: &str) -> ApiResult<()> {
        if !self.state.lock().networks.insert(name.to_string()) {
            return Err(ApiError::new(
                ErrorCode::ResourceConflict,
                format!("network with name {name} already exists"),
            ));
        }
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> ApiResult<()> {
        let mut state = self.state.lock();
        if state.containers.values().any(|c| c.spec.network == name) {
            return Err(ApiError::new(
                ErrorCode::ResourceConflict,
                format!("error while removing network: network {name} has active endpoints"),
            ));
        }
        if !state.networks.remove(name) {
            return Err(Self::no_such("network", name));
        }
        Ok(())
    }

    fn logs(&self, name: &str, _follow: bool) -> BoxStream<'static, ApiResult<String>> {
        let lines: Vec<ApiResult<String>> = match self.state.lock().containers.get(name) {
            Some(container) => container.logs.iter().cloned().map(Ok).collect(),
            None => vec![Err(Self::no_such("container", name))],
        };
        stream::iter(lines).boxed()
    }
}
