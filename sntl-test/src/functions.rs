//! In-memory function service

use crate::registry::FakeRegistry;
use async_trait::async_trait;
use dashmap::DashMap;
use sntl_core::control::{
    ApiResult, FunctionInfo, FunctionSpec, Functions, Permission, UpdateStatus, UrlConfig,
};
use sntl_core::{ApiError, ErrorCode};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A stored function
#[derive(Debug, Clone)]
pub struct StoredFunction {
    pub spec: FunctionSpec,
    pub arn: String,
    pub resolved_image_uri: Option<String>,
    /// Published version numbers
    pub versions: Vec<u32>,
    pub permissions: Vec<Permission>,
    pub url: Option<(UrlConfig, String)>,
    /// Polls left before an in-flight update reports success
    pub updating: u32,
}

/// In-memory function service
///
/// Image references are resolved against the registry the way the real
/// service pins `repo:tag` to a manifest digest at deploy time.
#[derive(Debug)]
pub struct FakeFunctions {
    account_id: String,
    region: String,
    registry: Arc<FakeRegistry>,
    functions: DashMap<String, StoredFunction>,
    update_lag: AtomicU32,
}

impl FakeFunctions {
    pub fn new(account_id: impl Into<String>, region: impl Into<String>, registry: Arc<FakeRegistry>) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
            registry,
            functions: DashMap::new(),
            update_lag: AtomicU32::new(0),
        }
    }

    /// Keep configuration updates in progress for the next `polls` reads.
    pub fn set_update_lag(&self, polls: u32) {
        self.update_lag.store(polls, Ordering::SeqCst);
    }

    pub fn function(&self, name: &str) -> Option<StoredFunction> {
        self.functions.get(name).map(|f| f.clone())
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn permissions(&self, name: &str) -> Vec<Permission> {
        self.functions
            .get(name)
            .map(|f| f.permissions.clone())
            .unwrap_or_default()
    }

    fn resolve(&self, image_uri: &str) -> ApiResult<String> {
        let invalid = || {
            ApiError::new(
                ErrorCode::InvalidParameterValue,
                format!("Source image {image_uri} does not exist."),
            )
        };
        let (repository_url, tag) = image_uri.rsplit_once(':').ok_or_else(invalid)?;
        let repository = repository_url.rsplit('/').next().unwrap_or(repository_url);
        let digest = self.registry.resolve_tag(repository, tag).ok_or_else(invalid)?;
        Ok(format!("{repository_url}@{digest}"))
    }

    fn not_found(name: &str) -> ApiError {
        ApiError::new(
            ErrorCode::ResourceNotFound,
            format!("Function not found: {name}"),
        )
        .with_resource(name)
    }

    fn info(function: &StoredFunction) -> FunctionInfo {
        FunctionInfo {
            name: function.spec.name.clone(),
            arn: function.arn.clone(),
            role_arn: Some(function.spec.role_arn.clone()),
            image_uri: Some(function.spec.image_uri.clone()),
            resolved_image_uri: function.resolved_image_uri.clone(),
            last_update_status: if function.updating > 0 {
                UpdateStatus::InProgress
            } else {
                UpdateStatus::Successful
            },
            version: function.versions.last().map(ToString::to_string),
        }
    }
}

#[async_trait]
impl Functions for FakeFunctions {
    async fn create_function(&self, spec: &FunctionSpec) -> ApiResult<FunctionInfo> {
        if self.functions.contains_key(&spec.name) {
            return Err(ApiError::new(
                ErrorCode::ResourceConflict,
                format!("Function already exist: {}", spec.name),
            ));
        }

        let function = StoredFunction {
            spec: spec.clone(),
            arn: format!(
                "arn:aws:lambda:{}:{}:function:{}",
                self.region, self.account_id, spec.name
            ),
            resolved_image_uri: Some(self.resolve(&spec.image_uri)?),
            versions: Vec::new(),
            permissions: Vec::new(),
            url: None,
            updating: 0,
        };
        let info = Self::info(&function);
        self.functions.insert(spec.name.clone(), function);
        Ok(info)
    }

    async fn update_function_configuration(&self, spec: &FunctionSpec) -> ApiResult<FunctionInfo> {
        let mut function = self
            .functions
            .get_mut(&spec.name)
            .ok_or_else(|| Self::not_found(&spec.name))?;

        // configuration updates never touch the code
        let image_uri = function.spec.image_uri.clone();
        function.spec = FunctionSpec {
            image_uri,
            ..spec.clone()
        };
        function.updating = self.update_lag.load(Ordering::SeqCst);
        Ok(Self::info(&function))
    }

    async fn update_function_code(
        &self,
        name: &str,
        image_uri: &str,
        publish: bool,
    ) -> ApiResult<FunctionInfo> {
        let resolved = self.resolve(image_uri)?;
        let mut function = self
            .functions
            .get_mut(name)
            .ok_or_else(|| Self::not_found(name))?;

        if function.updating > 0 {
            return Err(ApiError::new(
                ErrorCode::ResourceConflict,
                format!("An update is in progress for resource: {}", function.arn),
            ));
        }

        function.spec.image_uri = image_uri.to_string();
        function.resolved_image_uri = Some(resolved);
        if !publish {
            return Ok(Self::info(&function));
        }

        // the response describes the published version
        let next = function.versions.last().copied().unwrap_or(0) + 1;
        function.versions.push(next);
        let mut info = Self::info(&function);
        info.arn = format!("{}:{next}", function.arn);
        Ok(info)
    }

    async fn get_function(&self, name: &str) -> ApiResult<FunctionInfo> {
        let mut function = self
            .functions
            .get_mut(name)
            .ok_or_else(|| Self::not_found(name))?;
        let info = Self::info(&function);
        function.updating = function.updating.saturating_sub(1);
        Ok(info)
    }

    async fn delete_function(&self, name: &str) -> ApiResult<()> {
        self.functions
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(name))
    }

    async fn add_permission(&self, name: &str, permission: &Permission) -> ApiResult<()> {
        let mut function = self
            .functions
            .get_mut(name)
            .ok_or_else(|| Self::not_found(name))?;

        if function
            .permissions
            .iter()
            .any(|p| p.statement_id == permission.statement_id)
        {
            return Err(ApiError::new(
                ErrorCode::ResourceConflict,
                format!(
                    "The statement id ({}) provided already exists.",
                    permission.statement_id
                ),
            ));
        }
        function.permissions.push(permission.clone());
        Ok(())
    }

    async fn remove_permission(&self, name: &str, statement_id: &str) -> ApiResult<()> {
        let mut function = self
            .functions
            .get_mut(name)
            .ok_or_else(|| Self::not_found(name))?;

        let before = function.permissions.len();
        function.permissions.retain(|p| p.statement_id != statement_id);
        if function.permissions.len() == before {
            return Err(ApiError::new(
                ErrorCode::ResourceNotFound,
                "No policy is associated with the given resource.",
            ));
        }
        Ok(())
    }

    async fn create_url_config(&self, name: &str, config: &UrlConfig) -> ApiResult<String> {
        let mut function = self
            .functions
            .get_mut(name)
            .ok_or_else(|| Self::not_found(name))?;

        if function.url.is_some() {
            return Err(ApiError::new(
                ErrorCode::ResourceConflict,
                format!("Failed to create function url config for [functionArn = {}]. Error message: FunctionUrlConfig exists for this Lambda function", function.arn),
            ));
        }

        let url = format!(
            "https://{}.lambda-url.{}.on.aws/",
            Uuid::new_v4().simple(),
            self.region
        );
        function.url = Some((config.clone(), url.clone()));
        Ok(url)
    }

    async fn update_url_config(&self, name: &str, config: &UrlConfig) -> ApiResult<String> {
        let mut function = self
            .functions
            .get_mut(name)
            .ok_or_else(|| Self::not_found(name))?;

        match function.url.as_mut() {
            Some((existing, url)) => {
                *existing = config.clone();
                Ok(url.clone())
            }
            None => Err(Self::not_found(name)),
        }
    }

    async fn get_url_config(&self, name: &str) -> ApiResult<String> {
        let function = self.functions.get(name).ok_or_else(|| Self::not_found(name))?;
        function
            .url
            .as_ref()
            .map(|(_, url)| url.clone())
            .ok_or_else(|| Self::not_found(name))
    }

    async fn delete_url_config(&self, name: &str) -> ApiResult<()> {
        let mut function = self
            .functions
            .get_mut(name)
            .ok_or_else(|| Self::not_found(name))?;
        function
            .url
            .take()
            .map(|_| ())
            .ok_or_else(|| Self::not_found(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec(image_uri: &str) -> FunctionSpec {
        FunctionSpec {
            name: "fn".to_string(),
            role_arn: "arn:aws:iam::0:role/fn".to_string(),
            image_uri: image_uri.to_string(),
            description: String::new(),
            environment: BTreeMap::new(),
            storage: 512,
            memory: 128,
            timeout: 3,
            subnet_ids: Vec::new(),
            security_group_ids: Vec::new(),
        }
    }

    fn service() -> FakeFunctions {
        let registry = Arc::new(FakeRegistry::default());
        registry.put_image("app", "sha256:m1", "sha256:c1", &["v1"]);
        FakeFunctions::new("0", "us-east-1", registry)
    }

    #[tokio::test]
    async fn test_create_resolves_image() {
        let functions = service();
        let info = functions.create_function(&spec("reg/app:v1")).await.unwrap();
        assert_eq!(info.resolved_image_uri.as_deref(), Some("reg/app@sha256:m1"));
    }

    #[tokio::test]
    async fn test_unknown_image_rejected() {
        let functions = service();
        let result = functions.create_function(&spec("reg/app:v9")).await;
        assert!(matches!(result, Err(e) if e.code == ErrorCode::InvalidParameterValue));
    }

    #[tokio::test]
    async fn test_code_update_conflicts_while_updating() {
        let functions = service();
        functions.set_update_lag(1);
        functions.create_function(&spec("reg/app:v1")).await.unwrap();
        functions.update_function_configuration(&spec("reg/app:v1")).await.unwrap();

        let result = functions.update_function_code("fn", "reg/app:v1", true).await;
        assert!(matches!(result, Err(e) if e.code == ErrorCode::ResourceConflict));

        let polled = functions.get_function("fn").await.unwrap();
        assert_eq!(polled.last_update_status, UpdateStatus::InProgress);
        assert_eq!(
            functions.get_function("fn").await.unwrap().last_update_status,
            UpdateStatus::Successful
        );
        assert!(functions.update_function_code("fn", "reg/app:v1", true).await.is_ok());
    }

    #[tokio::test]
    async fn test_published_code_update_is_qualified() {
        let functions = service();
        let created = functions.create_function(&spec("reg/app:v1")).await.unwrap();

        let published = functions.update_function_code("fn", "reg/app:v1", true).await.unwrap();
        assert_eq!(published.arn, format!("{}:1", created.arn));
        assert_eq!(published.version.as_deref(), Some("1"));

        let unpublished = functions.update_function_code("fn", "reg/app:v1", false).await.unwrap();
        assert_eq!(unpublished.arn, created.arn);
    }

    #[tokio::test]
    async fn test_duplicate_statement_conflicts() {
        let functions = service();
        functions.create_function(&spec("reg/app:v1")).await.unwrap();
        let permission = Permission {
            statement_id: "sid".to_string(),
            action: "lambda:InvokeFunctionUrl".to_string(),
            principal: "*".to_string(),
            function_url_auth_type: sntl_core::AuthType::None,
        };
        functions.add_permission("fn", &permission).await.unwrap();
        assert!(functions.add_permission("fn", &permission).await.is_err());
        functions.remove_permission("fn", "sid").await.unwrap();
        assert!(functions.remove_permission("fn", "sid").await.unwrap_err().is_not_found());
    }
}
