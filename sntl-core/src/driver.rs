//! The capability contract shared by every execution backend

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::function::Function;
use crate::image::Image;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

/// A deployment backend
///
/// `deploy` and `destroy` are idempotent: they read current state, then
/// create or update, and tolerate whatever a previous run left behind.
#[async_trait]
pub trait Driver: Catalog {
    /// The live function, or `Error::NotFound` when nothing is deployed.
    async fn deployed(&self) -> Result<Function>;

    /// Ensure `image` is deployed. Returns the public URL when one was
    /// requested, otherwise the function's stable identifier.
    async fn deploy(&self, image: &Image, public_url: bool) -> Result<String>;

    /// Tear down every owned resource.
    async fn destroy(&self) -> Result<()>;

    async fn logs(&self, follow: bool) -> Result<()>;

    async fn invoke(&self, _payload: &str) -> Result<String> {
        Err(Error::Unimplemented("invoke"))
    }
}

/// Which backend a command runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Aws,
    Local,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Local => "local",
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aws" | "remote" => Ok(Self::Aws),
            "local" | "docker" => Ok(Self::Local),
            other => Err(format!("unknown target: {other}")),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;

    #[async_trait]
    impl Catalog for Nothing {
        async fn images(&self) -> Result<Vec<Image>> {
            Ok(vec![Image::new("sha256:a").with_versions("repo", ["v1"])])
        }
    }

    #[async_trait]
    impl Driver for Nothing {
        async fn deployed(&self) -> Result<Function> {
            Err(Error::not_found("function"))
        }

        async fn deploy(&self, _image: &Image, _public_url: bool) -> Result<String> {
            Ok("arn".to_string())
        }

        async fn destroy(&self) -> Result<()> {
            Ok(())
        }

        async fn logs(&self, _follow: bool) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_target_from_str() {
        assert_eq!("aws".parse::<Target>(), Ok(Target::Aws));
        assert_eq!("LOCAL".parse::<Target>(), Ok(Target::Local));
        assert!("gcp".parse::<Target>().is_err());
    }

    #[tokio::test]
    async fn test_invoke_is_unimplemented() {
        let driver: Box<dyn Driver> = Box::new(Nothing);
        assert!(matches!(
            driver.invoke("{}").await,
            Err(Error::Unimplemented("invoke"))
        ));
    }

    #[tokio::test]
    async fn test_default_image_lookup() {
        let driver: Box<dyn Driver> = Box::new(Nothing);
        assert_eq!(driver.image("v1").await.unwrap().id, "sha256:a");
        assert!(matches!(driver.image("v2").await, Err(Error::NotFound(_))));
    }
}
