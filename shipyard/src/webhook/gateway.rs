//! Webhook gateway
//!
//! Authenticates push notifications against the per-project secret and hands
//! accepted ones to the executor. Nothing reaches the executor before the
//! signature checks out.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::deploy::executor::{DeployOutcome, DeploymentExecutor};
use crate::errors::ShipyardError;
use crate::models::autodeploy::AutoDeployConfig;
use crate::models::deployment::TriggerKind;
use crate::storage::autodeploy::AutoDeployStore;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

pub const SIGNATURE_PREFIX: &str = "sha256=";

/// What the gateway decided for an authenticated request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookDecision {
    Deploy { owner: String, project: String },

    /// Authentic, but a push to another branch
    Ignored { reason: String },
}

/// `sha256=<hex>` signature of `body`
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, ShipyardError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| ShipyardError::Internal(format!("Invalid HMAC key: {}", e)))?;
    mac.update(body);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Constant-time check of a `sha256=<hex>` signature
pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let Some(provided) = signature.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(provided) = hex::decode(provided) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    bool::from(expected.as_slice().ct_eq(&provided))
}

/// Branch named by a push payload's `ref`, when the body carries one
fn pushed_branch(body: &[u8]) -> Option<String> {
    let payload: serde_json::Value = serde_json::from_slice(body).ok()?;
    let git_ref = payload.get("ref")?.as_str()?;
    git_ref.strip_prefix("refs/heads/").map(str::to_string)
}

pub struct WebhookGateway {
    autodeploy: Arc<AutoDeployStore>,
    executor: Arc<DeploymentExecutor>,
}

impl WebhookGateway {
    pub fn new(autodeploy: Arc<AutoDeployStore>, executor: Arc<DeploymentExecutor>) -> Self {
        Self {
            autodeploy,
            executor,
        }
    }

    /// Authenticate a delivery and decide whether it deploys
    pub fn authorize(
        &self,
        webhook_id: i64,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookDecision, ShipyardError> {
        let config = self
            .autodeploy
            .find_by_webhook_id(webhook_id)?
            .ok_or_else(|| ShipyardError::NotFound(format!("webhook {}", webhook_id)))?;

        let secret = match (&config.webhook_secret, config.webhook_enabled) {
            (Some(secret), true) => secret,
            _ => {
                warn!(webhook_id, "Delivery for a disabled webhook");
                return Err(ShipyardError::Unauthorized(
                    "webhook is not enabled".to_string(),
                ));
            }
        };

        let Some(signature) = signature else {
            warn!(webhook_id, "Delivery without signature");
            return Err(ShipyardError::Unauthorized(format!(
                "missing {} header",
                SIGNATURE_HEADER
            )));
        };
        if !verify_signature(secret.as_bytes(), body, signature) {
            warn!(webhook_id, "Delivery with invalid signature");
            return Err(ShipyardError::Unauthorized("invalid signature".to_string()));
        }

        Ok(decide(&config, body))
    }

    /// Authenticate, then run the deployment inline
    pub async fn handle(
        &self,
        webhook_id: i64,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<Option<DeployOutcome>, ShipyardError> {
        match self.authorize(webhook_id, signature, body)? {
            WebhookDecision::Deploy { owner, project } => Ok(Some(
                self.executor
                    .execute_deploy(&owner, &project, TriggerKind::Webhook)
                    .await,
            )),
            WebhookDecision::Ignored { reason } => {
                debug!(webhook_id, "Webhook ignored: {}", reason);
                Ok(None)
            }
        }
    }

    /// Run an accepted deployment in the background
    pub fn dispatch(&self, owner: String, project: String) -> JoinHandle<DeployOutcome> {
        let executor = self.executor.clone();
        tokio::spawn(async move {
            executor
                .execute_deploy(&owner, &project, TriggerKind::Webhook)
                .await
        })
    }
}

fn decide(config: &AutoDeployConfig, body: &[u8]) -> WebhookDecision {
    if let Some(branch) = pushed_branch(body) {
        if branch != config.branch {
            return WebhookDecision::Ignored {
                reason: format!("push to {}, tracking {}", branch, config.branch),
            };
        }
    }
    info!(
        owner = %config.owner,
        project = %config.project,
        "Webhook accepted"
    );
    WebhookDecision::Deploy {
        owner: config.owner.clone(),
        project: config.project.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_roundtrip() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let signature = sign(b"s3cret", body).unwrap();
        assert!(signature.starts_with("sha256="));
        assert!(verify_signature(b"s3cret", body, &signature));
        assert!(!verify_signature(b"other", body, &signature));
        assert!(!verify_signature(b"s3cret", b"tampered", &signature));
    }

    #[test]
    fn test_malformed_signatures() {
        let body = b"{}";
        assert!(!verify_signature(b"k", body, ""));
        assert!(!verify_signature(b"k", body, "sha1=abcdef"));
        assert!(!verify_signature(b"k", body, "sha256=not-hex"));
        assert!(!verify_signature(b"k", body, "sha256=abcd"));
    }

    #[test]
    fn test_pushed_branch() {
        assert_eq!(
            pushed_branch(br#"{"ref":"refs/heads/develop"}"#),
            Some("develop".to_string())
        );
        assert_eq!(pushed_branch(br#"{"ref":"refs/tags/v1"}"#), None);
        assert_eq!(pushed_branch(b"not json"), None);
    }
}
