//! End-to-end registry integration tests
//!
//! Exercises the full pipeline over the in-memory store:
//! - publish / retire-and-replace / tombstone lifecycle
//! - signature production and verification across all signer versions
//! - ownership enforcement on mutations
//! - harvest queries (time windows, paging, ids vs docs)
//! - keyring file loading

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures_util::StreamExt;

use archway::auth::{JwtValidator, RequestContext};
use archway::authz::OwnershipAuthorizer;
use archway::envelope::Envelope;
use archway::harvest::{self, HarvestConfig};
use archway::keyring::{InMemoryKeyRegistry, KeyRegistry};
use archway::lifecycle::LifecycleManager;
use archway::signer::SignerRegistry;
use archway::signing::SignatureService;
use archway::store::{EnvelopeStore, MemoryStore};
use archway::types::ArchwayError;
use archway::validate::{EnvelopeValidator, RequiredFieldsValidator};

// =============================================================================
// Shared pipeline fixture
// =============================================================================

struct Pipeline {
    lifecycle: LifecycleManager,
    store: Arc<MemoryStore>,
    keys: Arc<InMemoryKeyRegistry>,
    signatures: Arc<SignatureService>,
}

fn pipeline() -> Pipeline {
    let keys = Arc::new(InMemoryKeyRegistry::new());
    keys.generate_for_user("alice", vec!["Alice <alice@example.org>".into()]);
    keys.generate_for_user("bob", vec!["Bob <bob@example.org>".into()]);

    let registry = Arc::new(SignerRegistry::with_default_schemes());
    let signatures = Arc::new(SignatureService::new(registry, keys.clone()));
    let validator = Arc::new(EnvelopeValidator::new(
        Arc::new(RequiredFieldsValidator::default()),
        signatures.clone(),
        keys.clone(),
    ));
    let authz = Arc::new(OwnershipAuthorizer::new(keys.clone()));
    let store = Arc::new(MemoryStore::new());

    Pipeline {
        lifecycle: LifecycleManager::new(store.clone(), validator, authz),
        store,
        keys,
        signatures,
    }
}

fn ctx(username: &str) -> RequestContext {
    RequestContext {
        username: username.into(),
        session_credential: None,
        node_id: "itest-node".into(),
        base_url: "http://itest-node".into(),
    }
}

fn unsigned(version: &str, locator: &str) -> Envelope {
    Envelope::from_slice(
        format!(
            r#"{{"doc_version": "{}", "resource_locator": "{}"}}"#,
            version, locator
        )
        .as_bytes(),
    )
    .unwrap()
}

async fn harvest_result(
    store: &MemoryStore,
    params: HashMap<String, String>,
) -> serde_json::Value {
    let config = HarvestConfig::default();
    let scan = harvest::build_query(&params, &config).unwrap();
    let mut stream = store.range_scan(&scan).await.unwrap();

    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk.unwrap());
    }
    serde_json::from_slice(&buf).unwrap()
}

// =============================================================================
// Publish lifecycle
// =============================================================================

#[tokio::test]
async fn test_publish_assigns_identity_and_signature() {
    let p = pipeline();
    let receipt = p
        .lifecycle
        .create(unsigned("0.49.0", "http://r/course-1"), &ctx("alice"))
        .await
        .unwrap();

    let stored = p.lifecycle.read(&receipt.doc_id).await.unwrap();
    assert!(stored.has_signature());
    assert_eq!(stored.key_owner(), Some("Alice <alice@example.org>"));
    assert_eq!(stored.publishing_node.as_deref(), Some("itest-node"));
    assert!(stored.create_timestamp.is_some());

    // The produced signature verifies under the declared scheme.
    p.signatures.verify(&stored).await.unwrap();
}

#[tokio::test]
async fn test_publish_verifies_presigned_envelope() {
    let p = pipeline();

    // Sign client-side with alice's key, then submit the signed envelope.
    // Node-managed fields are excluded from the signed form, so the gateway
    // restamping timestamps and publishing_node does not break the
    // signature, under any supported version. The client picks its own id;
    // the signed content covers it.
    let record = p.keys.list_keys_for_user("alice").await.unwrap()[0].clone();
    for version in ["0.21.0", "0.23.0", "0.49.0", "0.51.0"] {
        let mut env = unsigned(version, "http://r/presigned");
        env.doc_id = Some(format!("presigned-{}", version));
        p.signatures
            .sign(&mut env, &record, "http://client-node/keys/alice")
            .unwrap();

        let receipt = p.lifecycle.create(env, &ctx("alice")).await.unwrap();
        let stored = p.lifecycle.read(&receipt.doc_id).await.unwrap();
        assert_eq!(stored.key_owner(), Some("Alice <alice@example.org>"));
        // Stamped by the gateway, signature still the client's.
        assert_eq!(stored.publishing_node.as_deref(), Some("itest-node"));
    }
}

#[tokio::test]
async fn test_publish_rejects_tampered_presigned_envelope() {
    let p = pipeline();

    let mut env = unsigned("0.49.0", "http://r/original");
    env.doc_id = Some("tampered-doc".into());
    let record = p.keys.list_keys_for_user("alice").await.unwrap()[0].clone();
    p.signatures
        .sign(&mut env, &record, "http://client-node/keys/alice")
        .unwrap();

    // Tamper with a signed payload field after signing.
    env.payload.insert(
        "resource_locator".into(),
        serde_json::json!("http://r/tampered"),
    );

    let err = p.lifecycle.create(env, &ctx("alice")).await.unwrap_err();
    assert!(matches!(err, ArchwayError::SignatureInvalid(_)));
    assert!(p.store.is_empty());
}

#[tokio::test]
async fn test_publish_rejects_unknown_signer_version() {
    let p = pipeline();
    let err = p
        .lifecycle
        .create(unsigned("9.9.9", "http://r/1"), &ctx("alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, ArchwayError::UnsupportedSignerVersion(_)));
    assert!(p.store.is_empty());
}

#[tokio::test]
async fn test_publish_across_all_signer_versions() {
    let p = pipeline();
    for version in ["0.21.0", "0.23.0", "0.49.0", "0.51.0"] {
        let receipt = p
            .lifecycle
            .create(
                unsigned(version, &format!("http://r/{}", version)),
                &ctx("alice"),
            )
            .await
            .unwrap();
        let stored = p.lifecycle.read(&receipt.doc_id).await.unwrap();
        p.signatures.verify(&stored).await.unwrap();
    }
}

// =============================================================================
// Retire-and-replace
// =============================================================================

#[tokio::test]
async fn test_update_then_delete_full_lifecycle() {
    let p = pipeline();
    let receipt = p
        .lifecycle
        .create(unsigned("0.49.0", "http://r/v1"), &ctx("alice"))
        .await
        .unwrap();

    p.lifecycle
        .update(&receipt.doc_id, unsigned("0.49.0", "http://r/v2"), &ctx("alice"))
        .await
        .unwrap();

    let updated = p.lifecycle.read(&receipt.doc_id).await.unwrap();
    assert!(!updated.is_tombstone());
    assert_eq!(updated.payload["resource_locator"], "http://r/v2");

    p.lifecycle.delete(&receipt.doc_id, &ctx("alice")).await.unwrap();
    let retired = p.lifecycle.read(&receipt.doc_id).await.unwrap();
    assert!(retired.is_tombstone());
}

#[tokio::test]
async fn test_mutations_by_non_owner_are_rejected() {
    let p = pipeline();
    let receipt = p
        .lifecycle
        .create(unsigned("0.49.0", "http://r/alice-doc"), &ctx("alice"))
        .await
        .unwrap();

    let update_err = p
        .lifecycle
        .update(&receipt.doc_id, unsigned("0.49.0", "http://r/x"), &ctx("bob"))
        .await
        .unwrap_err();
    assert!(matches!(update_err, ArchwayError::Forbidden(_)));

    let delete_err = p.lifecycle.delete(&receipt.doc_id, &ctx("bob")).await.unwrap_err();
    assert!(matches!(delete_err, ArchwayError::Forbidden(_)));

    // Document untouched.
    assert!(!p.lifecycle.read(&receipt.doc_id).await.unwrap().is_tombstone());
}

#[tokio::test]
async fn test_mutation_by_unknown_user_is_rejected() {
    let p = pipeline();
    let receipt = p
        .lifecycle
        .create(unsigned("0.49.0", "http://r/1"), &ctx("alice"))
        .await
        .unwrap();

    // mallory has no registered keys at all; this must fail, not silently
    // evaluate to "not owner".
    let err = p.lifecycle.delete(&receipt.doc_id, &ctx("mallory")).await.unwrap_err();
    assert!(matches!(err, ArchwayError::Forbidden(_)));
}

// =============================================================================
// Harvest
// =============================================================================

#[tokio::test]
async fn test_harvest_lists_active_ids_only() {
    let p = pipeline();
    let kept = p
        .lifecycle
        .create(unsigned("0.49.0", "http://r/kept"), &ctx("alice"))
        .await
        .unwrap();
    let dropped = p
        .lifecycle
        .create(unsigned("0.49.0", "http://r/dropped"), &ctx("alice"))
        .await
        .unwrap();
    p.lifecycle.delete(&dropped.doc_id, &ctx("alice")).await.unwrap();

    let result = harvest_result(&p.store, HashMap::new()).await;
    let ids = result["ids"].as_array().unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(ids[0], kept.doc_id.as_str());

    // The tombstone stays readable by id.
    assert!(p.lifecycle.read(&dropped.doc_id).await.unwrap().is_tombstone());
}

#[tokio::test]
async fn test_harvest_include_docs_returns_documents() {
    let p = pipeline();
    p.lifecycle
        .create(unsigned("0.49.0", "http://r/full"), &ctx("alice"))
        .await
        .unwrap();

    let mut params = HashMap::new();
    params.insert("include_docs".to_string(), "true".to_string());
    let result = harvest_result(&p.store, params).await;

    let docs = result["docs"].as_array().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["resource_locator"], "http://r/full");
    assert_eq!(docs[0]["digital_signature"]["key_owner"], "Alice <alice@example.org>");
}

#[tokio::test]
async fn test_harvest_window_excludes_out_of_range() {
    let p = pipeline();
    p.lifecycle
        .create(unsigned("0.49.0", "http://r/now"), &ctx("alice"))
        .await
        .unwrap();

    // A window entirely in the past matches nothing.
    let mut params = HashMap::new();
    params.insert("from".to_string(), "2000-01-01T00:00:00Z".to_string());
    params.insert("until".to_string(), "2000-12-31T23:59:59Z".to_string());
    let result = harvest_result(&p.store, params).await;
    assert!(result["ids"].as_array().unwrap().is_empty());

    // An open window matches the fresh document.
    let result = harvest_result(&p.store, HashMap::new()).await;
    assert_eq!(result["ids"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_harvest_pages_beyond_collection_are_empty() {
    let p = pipeline();
    for i in 0..3 {
        p.lifecycle
            .create(unsigned("0.49.0", &format!("http://r/{}", i)), &ctx("alice"))
            .await
            .unwrap();
    }

    let mut params = HashMap::new();
    params.insert("page".to_string(), "4".to_string());
    let result = harvest_result(&p.store, params).await;
    assert!(result["ids"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_harvest_rejects_inverted_window() {
    let mut params = HashMap::new();
    params.insert("from".to_string(), "2024-06-01".to_string());
    params.insert("until".to_string(), "2024-01-01".to_string());

    let err = harvest::build_query(&params, &HarvestConfig::default()).unwrap_err();
    assert!(matches!(err, ArchwayError::InvalidTimeRange(_)));
}

// =============================================================================
// Keyring file loading
// =============================================================================

#[tokio::test]
async fn test_keyring_file_round_trip() {
    let seed = [7u8; 32];
    let entries = serde_json::json!([{
        "username": "carol",
        "uids": ["Carol <carol@example.org>"],
        "signing_key": BASE64.encode(seed),
    }]);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(entries.to_string().as_bytes()).unwrap();

    let registry = InMemoryKeyRegistry::load_from_file(file.path()).unwrap();
    assert_eq!(registry.user_count(), 1);

    let keys = registry.list_keys_for_user("carol").await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].primary_uid(), "Carol <carol@example.org>");
    assert!(keys[0].signing_key.is_some());

    // Same seed loads to the same key id.
    let again = InMemoryKeyRegistry::load_from_file(file.path()).unwrap();
    let reloaded = again.list_keys_for_user("carol").await.unwrap();
    assert_eq!(reloaded[0].key_id, keys[0].key_id);
}

#[test]
fn test_keyring_file_rejects_bad_seed_length() {
    let entries = serde_json::json!([{
        "username": "carol",
        "uids": ["Carol <carol@example.org>"],
        "signing_key": BASE64.encode([1u8; 16]),
    }]);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(entries.to_string().as_bytes()).unwrap();

    assert!(matches!(
        InMemoryKeyRegistry::load_from_file(file.path()),
        Err(ArchwayError::Config(_))
    ));
}

// =============================================================================
// Token auth
// =============================================================================

#[test]
fn test_jwt_round_trip_identifies_user() {
    let validator = JwtValidator::new(
        "integration-test-secret-at-least-32-chars".into(),
        3600,
    )
    .unwrap();

    let token = validator.generate_token("alice").unwrap();
    let claims = validator.verify_token(&token).unwrap();
    assert_eq!(claims.sub, "alice");
}
