//! Core types and traits for sentential
//!
//! This crate holds the data model shared by every driver: images and
//! functions, the ontology a deployment is evaluated against, the error
//! taxonomy, and the ports through which drivers reach the control plane
//! and the local container runtime.

pub mod catalog;
pub mod container;
pub mod control;
pub mod driver;
pub mod error;
pub mod function;
pub mod image;
pub mod ontology;
pub mod template;

pub use catalog::{Catalog, DigestIndex, ImageDescription, ImageManifest};
pub use container::{ContainerRuntime, ContainerSummary, LocalImage, RunSpec};
pub use control::{ControlPlane, Functions, Iam, Registry, Tokens};
pub use driver::{Driver, Target};
pub use error::{ApiError, Error, ErrorCode, Result};
pub use function::Function;
pub use image::Image;
pub use ontology::{AuthType, Context, Cors, Envs, Ontology, Provision};
pub use template::{FilePolicy, InlinePolicy, PolicyTemplate, TRUST_POLICY};
