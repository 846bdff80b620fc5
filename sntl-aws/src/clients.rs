//! AWS SDK adapters for the control-plane ports
//!
//! One `AwsClients` is built per process from the ambient credential chain
//! and shared by every driver through a `ControlPlane`.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ecr::types::ImageIdentifier;
use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_lambda::types::{
    Cors as LambdaCors, Environment, EphemeralStorage, FunctionCode, FunctionUrlAuthType,
    LastUpdateStatus, PackageType, VpcConfig,
};
use base64::{engine::general_purpose, Engine};
use chrono::{DateTime, Utc};
use sntl_core::catalog::{ImageDescription, ImageManifest};
use sntl_core::control::{
    ApiResult, CallerIdentity, Credentials, FunctionInfo, FunctionSpec, Functions, Iam,
    Permission, PolicyInfo, PolicyVersion, Registry, RegistryCredentials, RoleInfo, Tokens,
    UpdateStatus, UrlConfig,
};
use sntl_core::{ApiError, ControlPlane, Cors, ErrorCode};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Manifest media types the catalog can read a config digest from
const MANIFEST_MEDIA_TYPES: [&str; 4] = [
    "application/vnd.docker.distribution.manifest.v2+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.oci.image.index.v1+json",
];

/// Per-call ceiling of the manifest batch fetch
const MANIFEST_BATCH: usize = 100;

/// SDK clients for every port
pub struct AwsClients {
    ecr: aws_sdk_ecr::Client,
    iam: aws_sdk_iam::Client,
    lambda: aws_sdk_lambda::Client,
    sts: aws_sdk_sts::Client,
    region: Option<String>,
}

impl AwsClients {
    /// Load the default credential chain, optionally pinning a region.
    pub async fn from_env(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_sdk_lambda::config::Region::new(region));
        }
        let config = loader.load().await;
        let region = config.region().map(ToString::to_string);
        debug!(region = ?region, "Loaded AWS configuration");

        Self {
            ecr: aws_sdk_ecr::Client::new(&config),
            iam: aws_sdk_iam::Client::new(&config),
            lambda: aws_sdk_lambda::Client::new(&config),
            sts: aws_sdk_sts::Client::new(&config),
            region,
        }
    }

    /// Region resolved by the credential chain, if any.
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn control_plane(self: Arc<Self>) -> ControlPlane {
        ControlPlane {
            registry: self.clone(),
            iam: self.clone(),
            functions: self.clone(),
            tokens: self,
        }
    }
}

/// Classify an SDK failure by its service error code.
fn api_error<E, R>(err: SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().map_or(ErrorCode::ServiceFailure, ErrorCode::from_code);
    let message = err.message().map(ToString::to_string);
    ApiError::new(
        code,
        message.unwrap_or_else(|| DisplayErrorContext(err).to_string()),
    )
}

fn build_error(err: impl std::fmt::Display) -> ApiError {
    ApiError::new(ErrorCode::Validation, err.to_string())
}

fn missing(field: &str) -> ApiError {
    ApiError::new(ErrorCode::ServiceFailure, format!("response without {field}"))
}

fn timestamp(value: &aws_sdk_iam::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

#[async_trait]
impl Registry for AwsClients {
    async fn describe_images(&self, repository: &str) -> ApiResult<Vec<ImageDescription>> {
        let mut pages = self
            .ecr
            .describe_images()
            .repository_name(repository)
            .into_paginator()
            .items()
            .send();

        let mut descriptions = Vec::new();
        while let Some(detail) = pages.next().await {
            let detail = detail.map_err(api_error)?;
            if let Some(digest) = detail.image_digest() {
                descriptions.push(ImageDescription {
                    digest: digest.to_string(),
                    tags: detail.image_tags().to_vec(),
                });
            }
        }
        Ok(descriptions)
    }

    async fn batch_get_manifests(
        &self,
        repository: &str,
        digests: &[String],
    ) -> ApiResult<Vec<ImageManifest>> {
        let mut manifests = Vec::with_capacity(digests.len());

        for chunk in digests.chunks(MANIFEST_BATCH) {
            let ids = chunk
                .iter()
                .map(|digest| ImageIdentifier::builder().image_digest(digest).build())
                .collect();
            let output = self
                .ecr
                .batch_get_image()
                .repository_name(repository)
                .set_image_ids(Some(ids))
                .set_accepted_media_types(Some(
                    MANIFEST_MEDIA_TYPES.iter().map(ToString::to_string).collect(),
                ))
                .send()
                .await
                .map_err(api_error)?;

            for failure in output.failures() {
                warn!(
                    repository,
                    digest = ?failure.image_id().and_then(|id| id.image_digest()),
                    reason = ?failure.failure_reason(),
                    "Manifest fetch failed"
                );
            }

            for image in output.images() {
                let (Some(digest), Some(document)) = (
                    image.image_id().and_then(|id| id.image_digest()),
                    image.image_manifest(),
                ) else {
                    continue;
                };
                let manifest = ImageManifest::parse(digest, document)
                    .map_err(|e| ApiError::new(ErrorCode::ServiceFailure, e.to_string()))?;
                manifests.push(manifest);
            }
        }

        Ok(manifests)
    }

    async fn authorization(&self) -> ApiResult<RegistryCredentials> {
        let output = self
            .ecr
            .get_authorization_token()
            .send()
            .await
            .map_err(api_error)?;
        let data = output
            .authorization_data()
            .first()
            .ok_or_else(|| missing("authorization data"))?;

        let token = data
            .authorization_token()
            .ok_or_else(|| missing("authorization token"))?;
        let decoded = general_purpose::STANDARD
            .decode(token)
            .map_err(|e| ApiError::new(ErrorCode::ServiceFailure, e.to_string()))?;
        let decoded = String::from_utf8_lossy(&decoded);
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| missing("user:password in authorization token"))?;

        Ok(RegistryCredentials {
            username: username.to_string(),
            password: password.to_string(),
            endpoint: data.proxy_endpoint().unwrap_or_default().to_string(),
        })
    }
}

#[async_trait]
impl Iam for AwsClients {
    async fn create_role(&self, name: &str, trust_policy: &str) -> ApiResult<RoleInfo> {
        let output = self
            .iam
            .create_role()
            .role_name(name)
            .assume_role_policy_document(trust_policy)
            .send()
            .await
            .map_err(api_error)?;
        let role = output.role().ok_or_else(|| missing("role"))?;
        Ok(RoleInfo {
            name: role.role_name().to_string(),
            arn: role.arn().to_string(),
        })
    }

    async fn update_assume_role_policy(&self, name: &str, trust_policy: &str) -> ApiResult<()> {
        self.iam
            .update_assume_role_policy()
            .role_name(name)
            .policy_document(trust_policy)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn get_role(&self, name: &str) -> ApiResult<RoleInfo> {
        let output = self
            .iam
            .get_role()
            .role_name(name)
            .send()
            .await
            .map_err(|e| api_error(e).with_resource(name))?;
        let role = output.role().ok_or_else(|| missing("role"))?;
        Ok(RoleInfo {
            name: role.role_name().to_string(),
            arn: role.arn().to_string(),
        })
    }

    async fn delete_role(&self, name: &str) -> ApiResult<()> {
        self.iam
            .delete_role()
            .role_name(name)
            .send()
            .await
            .map_err(|e| api_error(e).with_resource(name))?;
        Ok(())
    }

    async fn create_policy(&self, name: &str, document: &str) -> ApiResult<PolicyInfo> {
        let output = self
            .iam
            .create_policy()
            .policy_name(name)
            .policy_document(document)
            .send()
            .await
            .map_err(api_error)?;
        let policy = output.policy().ok_or_else(|| missing("policy"))?;
        Ok(PolicyInfo {
            name: policy.policy_name().unwrap_or(name).to_string(),
            arn: policy.arn().ok_or_else(|| missing("policy arn"))?.to_string(),
            default_version_id: policy.default_version_id().map(ToString::to_string),
        })
    }

    async fn get_policy(&self, arn: &str) -> ApiResult<PolicyInfo> {
        let output = self
            .iam
            .get_policy()
            .policy_arn(arn)
            .send()
            .await
            .map_err(|e| api_error(e).with_resource(arn))?;
        let policy = output.policy().ok_or_else(|| missing("policy"))?;
        Ok(PolicyInfo {
            name: policy.policy_name().unwrap_or_default().to_string(),
            arn: policy.arn().unwrap_or(arn).to_string(),
            default_version_id: policy.default_version_id().map(ToString::to_string),
        })
    }

    async fn delete_policy(&self, arn: &str) -> ApiResult<()> {
        self.iam
            .delete_policy()
            .policy_arn(arn)
            .send()
            .await
            .map_err(|e| api_error(e).with_resource(arn))?;
        Ok(())
    }

    async fn list_policy_versions(&self, arn: &str) -> ApiResult<Vec<PolicyVersion>> {
        let output = self
            .iam
            .list_policy_versions()
            .policy_arn(arn)
            .send()
            .await
            .map_err(|e| api_error(e).with_resource(arn))?;
        Ok(output
            .versions()
            .iter()
            .map(|v| PolicyVersion {
                version_id: v.version_id().unwrap_or_default().to_string(),
                is_default: v.is_default_version(),
                create_date: v.create_date().and_then(timestamp),
            })
            .collect())
    }

    async fn create_policy_version(
        &self,
        arn: &str,
        document: &str,
        set_as_default: bool,
    ) -> ApiResult<PolicyVersion> {
        let output = self
            .iam
            .create_policy_version()
            .policy_arn(arn)
            .policy_document(document)
            .set_as_default(set_as_default)
            .send()
            .await
            .map_err(|e| api_error(e).with_resource(arn))?;
        let version = output
            .policy_version()
            .ok_or_else(|| missing("policy version"))?;
        Ok(PolicyVersion {
            version_id: version.version_id().unwrap_or_default().to_string(),
            is_default: version.is_default_version(),
            create_date: version.create_date().and_then(timestamp),
        })
    }

    async fn delete_policy_version(&self, arn: &str, version_id: &str) -> ApiResult<()> {
        self.iam
            .delete_policy_version()
            .policy_arn(arn)
            .version_id(version_id)
            .send()
            .await
            .map_err(|e| api_error(e).with_resource(arn))?;
        Ok(())
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> ApiResult<()> {
        self.iam
            .attach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> ApiResult<()> {
        self.iam
            .detach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }
}

fn update_status(status: Option<&LastUpdateStatus>, reason: Option<&str>) -> UpdateStatus {
    match status {
        Some(LastUpdateStatus::InProgress) => UpdateStatus::InProgress,
        Some(LastUpdateStatus::Failed) => UpdateStatus::Failed(reason.map(ToString::to_string)),
        _ => UpdateStatus::Successful,
    }
}

/// Fields shared by every configuration-shaped response.
fn function_info(
    name: Option<&str>,
    arn: Option<&str>,
    role: Option<&str>,
    status: UpdateStatus,
    version: Option<&str>,
) -> FunctionInfo {
    FunctionInfo {
        name: name.unwrap_or_default().to_string(),
        arn: arn.unwrap_or_default().to_string(),
        role_arn: role.map(ToString::to_string),
        image_uri: None,
        resolved_image_uri: None,
        last_update_status: status,
        version: version.map(ToString::to_string),
    }
}

fn environment(spec: &FunctionSpec) -> Environment {
    let variables: HashMap<String, String> = spec
        .environment
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Environment::builder().set_variables(Some(variables)).build()
}

fn vpc_config(spec: &FunctionSpec) -> VpcConfig {
    VpcConfig::builder()
        .set_subnet_ids(Some(spec.subnet_ids.clone()))
        .set_security_group_ids(Some(spec.security_group_ids.clone()))
        .build()
}

fn cors(cors: &Cors) -> LambdaCors {
    LambdaCors::builder()
        .set_allow_headers(Some(cors.allow_headers.clone()))
        .set_allow_methods(Some(cors.allow_methods.clone()))
        .set_allow_origins(Some(cors.allow_origins.clone()))
        .set_expose_headers(Some(cors.expose_headers.clone()))
        .build()
}

#[async_trait]
impl Functions for AwsClients {
    async fn create_function(&self, spec: &FunctionSpec) -> ApiResult<FunctionInfo> {
        let storage = EphemeralStorage::builder()
            .size(spec.storage)
            .build()
            .map_err(build_error)?;
        let output = self
            .lambda
            .create_function()
            .function_name(&spec.name)
            .role(&spec.role_arn)
            .package_type(PackageType::Image)
            .code(FunctionCode::builder().image_uri(&spec.image_uri).build())
            .description(&spec.description)
            .environment(environment(spec))
            .ephemeral_storage(storage)
            .memory_size(spec.memory)
            .timeout(spec.timeout)
            .vpc_config(vpc_config(spec))
            .send()
            .await
            .map_err(api_error)?;

        Ok(function_info(
            output.function_name(),
            output.function_arn(),
            output.role(),
            update_status(output.last_update_status(), output.last_update_status_reason()),
            output.version(),
        ))
    }

    async fn update_function_configuration(&self, spec: &FunctionSpec) -> ApiResult<FunctionInfo> {
        let storage = EphemeralStorage::builder()
            .size(spec.storage)
            .build()
            .map_err(build_error)?;
        let output = self
            .lambda
            .update_function_configuration()
            .function_name(&spec.name)
            .role(&spec.role_arn)
            .description(&spec.description)
            .environment(environment(spec))
            .ephemeral_storage(storage)
            .memory_size(spec.memory)
            .timeout(spec.timeout)
            .vpc_config(vpc_config(spec))
            .send()
            .await
            .map_err(api_error)?;

        Ok(function_info(
            output.function_name(),
            output.function_arn(),
            output.role(),
            update_status(output.last_update_status(), output.last_update_status_reason()),
            output.version(),
        ))
    }

    async fn update_function_code(
        &self,
        name: &str,
        image_uri: &str,
        publish: bool,
    ) -> ApiResult<FunctionInfo> {
        let output = self
            .lambda
            .update_function_code()
            .function_name(name)
            .image_uri(image_uri)
            .publish(publish)
            .send()
            .await
            .map_err(api_error)?;

        Ok(function_info(
            output.function_name(),
            output.function_arn(),
            output.role(),
            update_status(output.last_update_status(), output.last_update_status_reason()),
            output.version(),
        ))
    }

    async fn get_function(&self, name: &str) -> ApiResult<FunctionInfo> {
        let output = self
            .lambda
            .get_function()
            .function_name(name)
            .send()
            .await
            .map_err(|e| api_error(e).with_resource(name))?;

        let configuration = output.configuration();
        let code = output.code();
        let mut info = function_info(
            configuration.and_then(|c| c.function_name()).or(Some(name)),
            configuration.and_then(|c| c.function_arn()),
            configuration.and_then(|c| c.role()),
            update_status(
                configuration.and_then(|c| c.last_update_status()),
                configuration.and_then(|c| c.last_update_status_reason()),
            ),
            configuration.and_then(|c| c.version()),
        );
        info.image_uri = code.and_then(|c| c.image_uri()).map(ToString::to_string);
        info.resolved_image_uri = code
            .and_then(|c| c.resolved_image_uri())
            .map(ToString::to_string);
        Ok(info)
    }

    async fn delete_function(&self, name: &str) -> ApiResult<()> {
        self.lambda
            .delete_function()
            .function_name(name)
            .send()
            .await
            .map_err(|e| api_error(e).with_resource(name))?;
        Ok(())
    }

    async fn add_permission(&self, name: &str, permission: &Permission) -> ApiResult<()> {
        self.lambda
            .add_permission()
            .function_name(name)
            .statement_id(&permission.statement_id)
            .action(&permission.action)
            .principal(&permission.principal)
            .function_url_auth_type(FunctionUrlAuthType::from(
                permission.function_url_auth_type.as_str(),
            ))
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn remove_permission(&self, name: &str, statement_id: &str) -> ApiResult<()> {
        self.lambda
            .remove_permission()
            .function_name(name)
            .statement_id(statement_id)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn create_url_config(&self, name: &str, config: &UrlConfig) -> ApiResult<String> {
        let output = self
            .lambda
            .create_function_url_config()
            .function_name(name)
            .auth_type(FunctionUrlAuthType::from(config.auth_type.as_str()))
            .cors(cors(&config.cors))
            .send()
            .await
            .map_err(api_error)?;
        Ok(output.function_url().to_string())
    }

    async fn update_url_config(&self, name: &str, config: &UrlConfig) -> ApiResult<String> {
        let output = self
            .lambda
            .update_function_url_config()
            .function_name(name)
            .auth_type(FunctionUrlAuthType::from(config.auth_type.as_str()))
            .cors(cors(&config.cors))
            .send()
            .await
            .map_err(api_error)?;
        Ok(output.function_url().to_string())
    }

    async fn get_url_config(&self, name: &str) -> ApiResult<String> {
        let output = self
            .lambda
            .get_function_url_config()
            .function_name(name)
            .send()
            .await
            .map_err(api_error)?;
        Ok(output.function_url().to_string())
    }

    async fn delete_url_config(&self, name: &str) -> ApiResult<()> {
        self.lambda
            .delete_function_url_config()
            .function_name(name)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }
}

#[async_trait]
impl Tokens for AwsClients {
    async fn caller_identity(&self) -> ApiResult<CallerIdentity> {
        let output = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(api_error)?;
        Ok(CallerIdentity {
            user_id: output.user_id().unwrap_or_default().to_string(),
            account: output.account().ok_or_else(|| missing("account"))?.to_string(),
            arn: output.arn().unwrap_or_default().to_string(),
        })
    }

    async fn federation_token(&self, name: &str, policy: &str) -> ApiResult<Credentials> {
        let output = self
            .sts
            .get_federation_token()
            .name(name)
            .policy(policy)
            .send()
            .await
            .map_err(api_error)?;
        let credentials = output
            .credentials()
            .ok_or_else(|| missing("credentials"))?;
        let expiration = credentials.expiration();

        Ok(Credentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expiration: DateTime::from_timestamp(expiration.secs(), expiration.subsec_nanos()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_status_mapping() {
        assert_eq!(
            update_status(Some(&LastUpdateStatus::InProgress), None),
            UpdateStatus::InProgress
        );
        assert_eq!(
            update_status(Some(&LastUpdateStatus::Failed), Some("image not found")),
            UpdateStatus::Failed(Some("image not found".to_string()))
        );
        assert_eq!(update_status(None, None), UpdateStatus::Successful);
    }

    #[test]
    fn test_function_environment() {
        let mut environment_values = std::collections::BTreeMap::new();
        environment_values.insert("PARTITION".to_string(), "/dev/app/env/".to_string());
        let spec = FunctionSpec {
            name: "f".to_string(),
            role_arn: "arn".to_string(),
            image_uri: "repo:v1".to_string(),
            description: String::new(),
            environment: environment_values,
            storage: 512,
            memory: 128,
            timeout: 3,
            subnet_ids: Vec::new(),
            security_group_ids: Vec::new(),
        };
        let env = environment(&spec);
        assert_eq!(
            env.variables().and_then(|v| v.get("PARTITION")).map(String::as_str),
            Some("/dev/app/env/")
        );
    }
}
