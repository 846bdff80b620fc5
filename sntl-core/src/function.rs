//! The live deployed function

use crate::image::Image;
use serde::{Deserialize, Serialize};

/// A deployed function and the image it runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub image: Image,
    /// Resource name; the primary key of the deployment
    pub name: String,
    pub arn: String,
    pub role_arn: Option<String>,
    pub region: String,
    pub public_url: Option<String>,
    pub web_console_url: Option<String>,
}

impl Function {
    pub fn new(image: Image, name: impl Into<String>, arn: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            image,
            name: name.into(),
            arn: arn.into(),
            role_arn: None,
            region: region.into(),
            public_url: None,
            web_console_url: None,
        }
    }

    pub fn with_role_arn(mut self, role_arn: impl Into<String>) -> Self {
        self.role_arn = Some(role_arn.into());
        self
    }

    pub fn with_public_url(mut self, url: Option<String>) -> Self {
        self.public_url = url.filter(|u| !u.is_empty());
        self
    }

    /// Link to the function in the web console.
    pub fn with_console_link(mut self) -> Self {
        self.web_console_url = Some(format!(
            "https://{region}.console.aws.amazon.com/lambda/home?region={region}#/functions/{name}",
            region = self.region,
            name = self.name
        ));
        self
    }
}
