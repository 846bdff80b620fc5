//! Bounded polling for eventually-consistent control-plane reads

use serde::Deserialize;
use sntl_core::control::{ApiResult, UpdateStatus};
use sntl_core::{ApiError, Error, ErrorCode, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Outcome of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Ready,
    Pending,
}

/// A named poll loop with a fixed delay and attempt ceiling
#[derive(Debug, Clone, Copy)]
pub struct Waiter {
    pub name: &'static str,
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Waiter {
    /// Poll `check` until it reports ready, an error, or attempts run out.
    ///
    /// The first check runs immediately; the delay separates later ones.
    pub async fn wait<F, Fut>(&self, resource: &str, mut check: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Poll>>,
    {
        for attempt in 1..=self.max_attempts {
            if check().await? == Poll::Ready {
                debug!(waiter = self.name, resource, attempt, "Waiter satisfied");
                return Ok(());
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.delay).await;
            }
        }

        Err(Error::WaiterTimeout {
            waiter: self.name,
            resource: resource.to_string(),
            attempts: self.max_attempts,
        })
    }
}

/// Pending while the resource is not visible yet.
pub fn exists<T>(result: ApiResult<T>) -> Result<Poll> {
    match result {
        Ok(_) => Ok(Poll::Ready),
        Err(e) if e.is_not_found() => Ok(Poll::Pending),
        Err(e) => Err(e.into()),
    }
}

/// Pending while the last update is still being applied.
pub fn updated(status: &UpdateStatus, resource: &str) -> Result<Poll> {
    match status {
        UpdateStatus::Successful => Ok(Poll::Ready),
        UpdateStatus::InProgress => Ok(Poll::Pending),
        UpdateStatus::Failed(reason) => Err(ApiError::new(
            ErrorCode::ServiceFailure,
            reason
                .clone()
                .unwrap_or_else(|| "function update failed".to_string()),
        )
        .with_resource(resource)
        .into()),
    }
}

/// Delays and attempt ceilings for the remote driver
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Pause before creating the function, letting the new role propagate
    pub settle_secs: u64,
    pub poll_interval_ms: u64,
    pub role_attempts: u32,
    pub policy_attempts: u32,
    pub function_attempts: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle_secs: 10,
            poll_interval_ms: 1000,
            role_attempts: 20,
            policy_attempts: 20,
            function_attempts: 300,
        }
    }
}

impl Timings {
    /// No sleeping at all; for tests against the in-memory plane.
    pub fn immediate() -> Self {
        Self {
            settle_secs: 0,
            poll_interval_ms: 0,
            ..Self::default()
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn role_exists(&self) -> Waiter {
        Waiter {
            name: "role_exists",
            delay: self.interval(),
            max_attempts: self.role_attempts,
        }
    }

    pub fn policy_exists(&self) -> Waiter {
        Waiter {
            name: "policy_exists",
            delay: self.interval(),
            max_attempts: self.policy_attempts,
        }
    }

    pub fn function_updated(&self) -> Waiter {
        Waiter {
            name: "function_updated",
            delay: self.interval(),
            max_attempts: self.function_attempts,
        }
    }
}
