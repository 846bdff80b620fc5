//! Remote driver: reconciles the function and its dependents in the cloud
//!
//! Every resource is keyed by the context's resource name. `deploy` converges
//! role, policy, attachment, function, permission and URL in that order,
//! creating on first sight and updating on conflict. `destroy` walks the same
//! chain backwards and treats anything already gone as done.

use crate::catalog::RegistryCatalog;
use crate::waiter::{exists, updated, Timings};
use async_trait::async_trait;
use sntl_core::catalog::Catalog;
use sntl_core::control::{FunctionInfo, FunctionSpec, Permission, PolicyInfo, PolicyVersion, UrlConfig};
use sntl_core::error::tolerate_missing;
use sntl_core::{
    ControlPlane, Driver, Error, Function, Image, Ontology, PolicyTemplate, Result, TRUST_POLICY,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Most versions a managed policy may hold
pub const MAX_POLICY_VERSIONS: usize = 5;

/// Statement granting public invocation through the function URL
pub const STATEMENT_ID: &str = "FunctionURLAllowPublicAccess";

const INVOKE_URL_ACTION: &str = "lambda:InvokeFunctionUrl";

pub struct AwsDriver {
    ontology: Ontology,
    control: ControlPlane,
    policy: Arc<dyn PolicyTemplate>,
    catalog: RegistryCatalog,
    timings: Timings,
}

impl AwsDriver {
    pub fn new(ontology: Ontology, control: ControlPlane, policy: Arc<dyn PolicyTemplate>) -> Self {
        let catalog = RegistryCatalog::new(control.registry.clone(), &ontology.context);
        Self {
            ontology,
            control,
            policy,
            catalog,
            timings: Timings::default(),
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn resource_name(&self) -> String {
        self.ontology.context.resource_name()
    }

    fn image_uri(&self, image: &Image) -> Result<String> {
        let version = image
            .versions
            .first()
            .ok_or_else(|| Error::not_found(format!("image {} has no version tag", image.short_id())))?;
        Ok(format!("{}:{}", self.catalog.repository_url(), version))
    }

    fn function_spec(&self, role_arn: String, image_uri: String) -> FunctionSpec {
        let provision = &self.ontology.configs;
        let mut environment = BTreeMap::new();
        environment.insert("PARTITION".to_string(), self.ontology.envs.path.clone());

        FunctionSpec {
            name: self.resource_name(),
            role_arn,
            description: format!("sententially deployed {image_uri}"),
            image_uri,
            environment,
            storage: provision.storage,
            memory: provision.memory,
            timeout: provision.timeout,
            subnet_ids: provision.subnet_ids.clone(),
            security_group_ids: provision.security_group_ids.clone(),
        }
    }

    async fn put_role(&self) -> Result<String> {
        let iam = &self.control.iam;
        let name = self.resource_name();

        match iam.create_role(&name, TRUST_POLICY).await {
            Ok(_) => info!(role = %name, "Created role"),
            Err(e) if e.is_conflict() => {
                iam.update_assume_role_policy(&name, TRUST_POLICY).await?;
                debug!(role = %name, "Updated role trust policy");
            }
            Err(e) => return Err(e.into()),
        }

        let role_name = name.as_str();
        self.timings
            .role_exists()
            .wait(role_name, move || async move { exists(iam.get_role(role_name).await) })
            .await?;

        Ok(iam.get_role(&name).await?.arn)
    }

    async fn put_policy(&self) -> Result<PolicyInfo> {
        let iam = &self.control.iam;
        let name = self.resource_name();
        let arn = self.ontology.context.policy_arn();
        let document = self.policy.render(&self.ontology)?;

        match iam.create_policy(&name, &document).await {
            Ok(_) => info!(policy = %arn, "Created policy"),
            Err(e) if e.is_conflict() => {
                let versions = iam.list_policy_versions(&arn).await?;
                if versions.len() >= MAX_POLICY_VERSIONS {
                    if let Some(oldest) = oldest_evictable(&versions) {
                        iam.delete_policy_version(&arn, &oldest.version_id).await?;
                        debug!(policy = %arn, version = %oldest.version_id, "Evicted policy version");
                    }
                }
                let version = iam.create_policy_version(&arn, &document, true).await?;
                info!(policy = %arn, version = %version.version_id, "Updated policy");
            }
            Err(e) => return Err(e.into()),
        }

        let policy_arn = arn.as_str();
        self.timings
            .policy_exists()
            .wait(policy_arn, move || async move { exists(iam.get_policy(policy_arn).await) })
            .await?;

        Ok(iam.get_policy(&arn).await?)
    }

    async fn wait_for_update(&self, name: &str) -> Result<()> {
        let functions = &self.control.functions;
        self.timings
            .function_updated()
            .wait(name, move || async move {
                match functions.get_function(name).await {
                    Ok(function) => updated(&function.last_update_status, name),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    async fn put_function(&self, role_arn: String, image: &Image) -> Result<FunctionInfo> {
        let functions = &self.control.functions;
        let spec = self.function_spec(role_arn, self.image_uri(image)?);

        tokio::time::sleep(self.timings.settle()).await;

        let function = match functions.create_function(&spec).await {
            Ok(function) => {
                info!(function = %spec.name, image = %spec.image_uri, "Created function");
                function
            }
            Err(e) if e.is_conflict() => {
                // the published version carries a qualified arn
                let function = functions.update_function_configuration(&spec).await?;
                self.wait_for_update(&spec.name).await?;
                let published = functions
                    .update_function_code(&spec.name, &spec.image_uri, true)
                    .await?;
                self.wait_for_update(&spec.name).await?;
                info!(
                    function = %spec.name,
                    image = %spec.image_uri,
                    version = ?published.version,
                    "Updated function"
                );
                function
            }
            Err(e) => return Err(e.into()),
        };

        self.put_permission(&spec.name).await?;
        Ok(function)
    }

    /// Reissue the public-invoke statement so repeated deploys keep exactly one.
    async fn put_permission(&self, name: &str) -> Result<()> {
        let functions = &self.control.functions;
        if tolerate_missing(functions.remove_permission(name, STATEMENT_ID).await)?.is_some() {
            debug!(function = %name, statement = STATEMENT_ID, "Removed existing statement");
        }

        let permission = Permission {
            statement_id: STATEMENT_ID.to_string(),
            action: INVOKE_URL_ACTION.to_string(),
            principal: "*".to_string(),
            function_url_auth_type: self.ontology.configs.auth_type,
        };
        functions.add_permission(name, &permission).await?;
        Ok(())
    }

    async fn put_url(&self, name: &str) -> Result<String> {
        let functions = &self.control.functions;
        let config = UrlConfig {
            auth_type: self.ontology.configs.auth_type,
            cors: self.ontology.configs.cors(),
        };

        match functions.create_url_config(name, &config).await {
            Ok(url) => info!(function = %name, url = %url, "Created function URL"),
            Err(e) if e.is_conflict() => {
                functions.update_url_config(name, &config).await?;
                debug!(function = %name, "Updated function URL");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(functions.get_url_config(name).await?)
    }

    async fn drop_url(&self, name: &str) -> Result<()> {
        if tolerate_missing(self.control.functions.delete_url_config(name).await)?.is_some() {
            info!(function = %name, "Removed function URL");
        }
        Ok(())
    }

    /// Catalog entry for a deployed function's image reference.
    async fn resolve_image(&self, function: &FunctionInfo) -> Result<Image> {
        let images = self.catalog.images().await?;

        if let Some(digest) = function
            .resolved_image_uri
            .as_deref()
            .and_then(|uri| uri.rsplit_once('@'))
            .map(|(_, digest)| digest)
        {
            return Ok(match images.into_iter().find(|i| i.matches_digest(digest)) {
                Some(image) => image,
                None => {
                    warn!(digest, "Deployed image is no longer in the registry");
                    Image::new(digest).with_digest(digest)
                }
            });
        }

        let version = function
            .image_uri
            .as_deref()
            .and_then(|uri| uri.rsplit_once(':'))
            .map(|(_, tag)| tag)
            .ok_or_else(|| Error::not_found(format!("image reference of {}", function.name)))?;
        sntl_core::catalog::find_version(images, version)
    }
}

/// Oldest non-default version, by creation date then version number.
fn oldest_evictable(versions: &[PolicyVersion]) -> Option<&PolicyVersion> {
    versions
        .iter()
        .filter(|v| !v.is_default)
        .min_by_key(|v| (v.create_date, v.ordinal()))
}

#[async_trait]
impl Catalog for AwsDriver {
    async fn images(&self) -> Result<Vec<Image>> {
        self.catalog.images().await
    }
}

#[async_trait]
impl Driver for AwsDriver {
    async fn deployed(&self) -> Result<Function> {
        let name = self.resource_name();
        let function = match self.control.functions.get_function(&name).await {
            Ok(function) => function,
            Err(e) if e.is_not_found() => {
                return Err(Error::not_found(format!("no function deployed as {name}")))
            }
            Err(e) => return Err(e.into()),
        };

        let image = self.resolve_image(&function).await?;
        let public_url = tolerate_missing(self.control.functions.get_url_config(&name).await)?;

        let mut deployed = Function::new(image, name, function.arn, &self.ontology.context.region)
            .with_public_url(public_url)
            .with_console_link();
        if let Some(role_arn) = function.role_arn {
            deployed = deployed.with_role_arn(role_arn);
        }
        Ok(deployed)
    }

    async fn deploy(&self, image: &Image, public_url: bool) -> Result<String> {
        let name = self.resource_name();
        info!(function = %name, image = %image.short_id(), public_url, "Deploying");

        let role_arn = self.put_role().await?;
        let policy = self.put_policy().await?;
        self.control.iam.attach_role_policy(&name, &policy.arn).await?;
        debug!(role = %name, policy = %policy.arn, "Attached policy");

        let function = self.put_function(role_arn, image).await?;

        if public_url {
            self.put_url(&name).await
        } else {
            self.drop_url(&name).await?;
            Ok(function.arn)
        }
    }

    async fn destroy(&self) -> Result<()> {
        let name = self.resource_name();
        let arn = self.ontology.context.policy_arn();
        let iam = &self.control.iam;
        let functions = &self.control.functions;
        info!(function = %name, "Destroying");

        tolerate_missing(functions.delete_url_config(&name).await)?;
        if tolerate_missing(functions.delete_function(&name).await)?.is_some() {
            info!(function = %name, "Deleted function");
        }

        tolerate_missing(iam.detach_role_policy(&name, &arn).await)?;
        if let Some(versions) = tolerate_missing(iam.list_policy_versions(&arn).await)? {
            for version in versions.iter().filter(|v| !v.is_default) {
                tolerate_missing(iam.delete_policy_version(&arn, &version.version_id).await)?;
            }
        }
        if tolerate_missing(iam.delete_policy(&arn).await)?.is_some() {
            info!(policy = %arn, "Deleted policy");
        }

        if tolerate_missing(iam.delete_role(&name).await)?.is_some() {
            info!(role = %name, "Deleted role");
        }
        Ok(())
    }

    async fn logs(&self, follow: bool) -> Result<()> {
        let group = format!("/aws/lambda/{}", self.resource_name());
        let mut command = Command::new("aws");
        command
            .args(["logs", "tail", &group])
            .env("AWS_REGION", &self.ontology.context.region);
        if follow {
            command.arg("--follow");
        }

        debug!(group = %group, follow, "Tailing logs");
        let status = command.status().await?;
        if !status.success() {
            return Err(Error::Subprocess(format!("aws logs tail exited with {status}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn version(id: &str, is_default: bool, day: u32) -> PolicyVersion {
        PolicyVersion {
            version_id: id.to_string(),
            is_default,
            create_date: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).single(),
        }
    }

    #[test]
    fn test_oldest_evictable_skips_default() {
        let versions = vec![
            version("v1", true, 1),
            version("v2", false, 2),
            version("v3", false, 3),
        ];
        assert_eq!(oldest_evictable(&versions).unwrap().version_id, "v2");
    }

    #[test]
    fn test_oldest_evictable_ties_by_ordinal() {
        let versions = vec![
            version("v10", false, 1),
            version("v9", false, 1),
            version("v11", true, 2),
        ];
        assert_eq!(oldest_evictable(&versions).unwrap().version_id, "v9");
    }

    #[test]
    fn test_only_default_is_not_evictable() {
        assert!(oldest_evictable(&[version("v1", true, 1)]).is_none());
    }
}
