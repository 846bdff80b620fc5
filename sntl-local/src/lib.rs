//! Local emulation for sentential
//!
//! - `BollardRuntime`: the Docker engine behind the `ContainerRuntime` port
//! - `LocalCatalog`: images in the local store tagged under the repository
//! - `LocalDriver`: runs the function, and optionally a gateway, on a bridge network
//! - `Publisher`: pushes local versions to the registry

pub mod catalog;
pub mod docker;
pub mod driver;
pub mod publish;

pub use catalog::LocalCatalog;
pub use docker::BollardRuntime;
pub use driver::{LocalDriver, LocalOptions};
pub use publish::Publisher;
