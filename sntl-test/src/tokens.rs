//! In-memory token service

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use sntl_core::control::{ApiResult, CallerIdentity, Credentials, Tokens};
use sntl_core::{ApiError, ErrorCode};
use uuid::Uuid;

/// A federation token request as received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederationRequest {
    pub name: String,
    pub policy: String,
}

#[derive(Debug)]
pub struct FakeTokens {
    identity: CallerIdentity,
    requests: Mutex<Vec<FederationRequest>>,
}

impl FakeTokens {
    pub fn new(account_id: &str, user_id: &str) -> Self {
        Self {
            identity: CallerIdentity {
                user_id: user_id.to_string(),
                account: account_id.to_string(),
                arn: format!("arn:aws:iam::{account_id}:user/{}", user_id.to_lowercase()),
            },
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<FederationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Tokens for FakeTokens {
    async fn caller_identity(&self) -> ApiResult<CallerIdentity> {
        Ok(self.identity.clone())
    }

    async fn federation_token(&self, name: &str, policy: &str) -> ApiResult<Credentials> {
        if name.len() < 2 || name.len() > 32 {
            return Err(ApiError::new(
                ErrorCode::Validation,
                "Name must be between 2 and 32 characters",
            ));
        }

        self.requests.lock().push(FederationRequest {
            name: name.to_string(),
            policy: policy.to_string(),
        });

        let key = Uuid::new_v4().simple().to_string().to_uppercase();
        Ok(Credentials {
            access_key_id: format!("ASIA{}", &key[..16]),
            secret_access_key: Uuid::new_v4().simple().to_string(),
            session_token: Uuid::new_v4().to_string(),
            expiration: Some(Utc::now() + Duration::hours(12)),
        })
    }
}
