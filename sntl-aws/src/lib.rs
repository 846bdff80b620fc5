//! Remote deployment driver
//!
//! Reconciles a function, its execution role and managed policy, its
//! public-invoke permission and optional URL against the cloud control plane.
//! SDK access goes through the ports in `sntl_core::control`; `AwsClients`
//! implements them for real accounts.

pub mod catalog;
pub mod clients;
pub mod driver;
pub mod waiter;

pub use catalog::RegistryCatalog;
pub use clients::AwsClients;
pub use driver::{AwsDriver, MAX_POLICY_VERSIONS, STATEMENT_ID};
pub use waiter::{Poll, Timings, Waiter};
