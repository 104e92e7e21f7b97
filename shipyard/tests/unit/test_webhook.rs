//! Webhook gateway tests

use secrecy::ExposeSecret;
use shipyard::deploy::executor::DeployOutcome;
use shipyard::errors::ShipyardError;
use shipyard::models::deployment::TriggerKind;
use shipyard::webhook::gateway::sign;

use crate::common::{templated, Harness};

const PUSH_MAIN: &[u8] = br#"{"ref":"refs/heads/main","after":"abc1234"}"#;

fn setup() -> (Harness, i64, String) {
    let h = Harness::new();
    h.add_project("alice", "blog", templated());
    let (config, secret) = h.app.autodeploy.enable_webhook("alice", "blog", "main").unwrap();
    h.git.push_upstream("abc1234");
    (h, config.id, secret.expose_secret().to_string())
}

#[tokio::test]
async fn test_invalid_signature_never_reaches_executor() {
    let (h, id, _secret) = setup();
    let forged = sign(b"not-the-secret", PUSH_MAIN).unwrap();

    let result = h.app.gateway.handle(id, Some(&forged), PUSH_MAIN).await;
    assert!(matches!(result, Err(ShipyardError::Unauthorized(_))));

    let result = h.app.gateway.handle(id, None, PUSH_MAIN).await;
    assert!(matches!(result, Err(ShipyardError::Unauthorized(_))));

    assert_eq!(h.git.pulls(), 0);
    assert!(h.app.logs.recent("alice", "blog", 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_valid_signature_deploys() {
    let (h, id, secret) = setup();
    let signature = sign(secret.as_bytes(), PUSH_MAIN).unwrap();

    let outcome = h.app.gateway.handle(id, Some(&signature), PUSH_MAIN).await.unwrap();
    assert!(matches!(outcome, Some(DeployOutcome::Completed { has_changes: true, .. })));

    let history = h.app.logs.recent("alice", "blog", 10).unwrap();
    assert_eq!(history[0].trigger, TriggerKind::Webhook);
}

#[tokio::test]
async fn test_push_to_other_branch_is_ignored() {
    let (h, id, secret) = setup();
    let body = br#"{"ref":"refs/heads/feature"}"#;
    let signature = sign(secret.as_bytes(), body).unwrap();

    let outcome = h.app.gateway.handle(id, Some(&signature), body).await.unwrap();
    assert!(outcome.is_none());
    assert_eq!(h.git.pulls(), 0);
}

#[tokio::test]
async fn test_disabled_or_unknown_webhook() {
    let (h, id, secret) = setup();
    let signature = sign(secret.as_bytes(), PUSH_MAIN).unwrap();

    let result = h.app.gateway.handle(id + 100, Some(&signature), PUSH_MAIN).await;
    assert!(matches!(result, Err(ShipyardError::NotFound(_))));

    h.app.autodeploy.disable_webhook("alice", "blog").unwrap();
    let result = h.app.gateway.handle(id, Some(&signature), PUSH_MAIN).await;
    assert!(matches!(result, Err(ShipyardError::Unauthorized(_))));
    assert_eq!(h.git.pulls(), 0);
}

#[tokio::test]
async fn test_regenerated_secret_invalidates_old_one() {
    let (h, id, old_secret) = setup();
    let new_secret = h.app.autodeploy.regenerate_webhook_secret("alice", "blog").unwrap();

    let stale = sign(old_secret.as_bytes(), PUSH_MAIN).unwrap();
    let result = h.app.gateway.authorize(id, Some(&stale), PUSH_MAIN);
    assert!(matches!(result, Err(ShipyardError::Unauthorized(_))));

    let fresh = sign(new_secret.expose_secret().as_bytes(), PUSH_MAIN).unwrap();
    assert!(h.app.gateway.authorize(id, Some(&fresh), PUSH_MAIN).is_ok());
}
