//! Document lifecycle
//!
//! Orchestrates create/update/delete as transitions of an append-mostly,
//! tombstone-based lifecycle: NEW -> ACTIVE -> TOMBSTONED (terminal).
//! Persistence is delegated to the store; same-id write races surface as
//! store conflicts and the whole authorize-then-write sequence is retried
//! from a fresh read, bounded.
//!
//! A logical update is two physical writes: the old record retired as a
//! tombstone, then the replacement ACTIVE record written under the same id
//! with the revision token the tombstone write returned. If the process
//! dies between the two writes the document reads as gone until the second
//! write is retried; validation runs before either write, so a rejected
//! payload never leaves a dangling tombstone.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::auth::RequestContext;
use crate::authz::OwnershipAuthorizer;
use crate::envelope::Envelope;
use crate::store::EnvelopeStore;
use crate::types::{ArchwayError, Result};
use crate::validate::EnvelopeValidator;

/// Attempts at the read-authorize-write sequence before giving up on a
/// conflicting writer.
const MAX_CONFLICT_RETRIES: usize = 3;

/// Outcome of an accepted mutation.
#[derive(Debug, Clone, Serialize)]
pub struct MutationReceipt {
    #[serde(rename = "doc_ID")]
    pub doc_id: String,
}

pub struct LifecycleManager {
    store: Arc<dyn EnvelopeStore>,
    validator: Arc<EnvelopeValidator>,
    authz: Arc<OwnershipAuthorizer>,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn EnvelopeStore>,
        validator: Arc<EnvelopeValidator>,
        authz: Arc<OwnershipAuthorizer>,
    ) -> Self {
        Self {
            store,
            validator,
            authz,
        }
    }

    /// NEW -> ACTIVE. Assigns server-managed fields, rejects reused ids,
    /// validates (schema, then sign-or-verify), and writes once.
    pub async fn create(&self, mut envelope: Envelope, ctx: &RequestContext) -> Result<MutationReceipt> {
        envelope.rev = None;
        envelope.populate_node_values(&ctx.node_id);
        let doc_id = envelope
            .doc_id
            .clone()
            .ok_or_else(|| ArchwayError::Internal("Envelope id was not assigned".into()))?;

        if self.store.contains(&doc_id).await? {
            return Err(ArchwayError::DuplicateId);
        }

        self.validator
            .validate(&mut envelope, &ctx.username, &ctx.user_key_url())
            .await?;

        self.store.put(&envelope, ctx.credential()).await?;
        info!(doc_id = %doc_id, user = %ctx.username, "Envelope created");
        Ok(MutationReceipt { doc_id })
    }

    /// ACTIVE -> TOMBSTONED plus a replacement ACTIVE record under the same
    /// logical id. The original creation time is preserved across the
    /// logical update.
    pub async fn update(
        &self,
        id: &str,
        replacement: Envelope,
        ctx: &RequestContext,
    ) -> Result<MutationReceipt> {
        for attempt in 0..MAX_CONFLICT_RETRIES {
            let existing = self
                .store
                .get(id)
                .await?
                .ok_or_else(|| ArchwayError::NotFound("Document does not exist".into()))?;

            self.authorize_mutation(&existing, ctx).await?;

            // Build and validate the replacement before touching the store:
            // a rejected payload must not leave a dangling tombstone.
            let mut fresh = replacement.clone();
            fresh.rev = None;
            fresh.populate_node_values(&ctx.node_id);
            fresh.doc_id = Some(id.to_string());
            fresh.create_timestamp = existing.create_timestamp;

            self.validator
                .validate(&mut fresh, &ctx.username, &ctx.user_key_url())
                .await?;

            let mut retired = existing;
            retired.mark_tombstone();

            let rev = match self.store.put(&retired, ctx.credential()).await {
                Ok(rev) => rev,
                Err(ArchwayError::StoreConflict(msg)) => {
                    warn!(doc_id = id, attempt, "Conflict retiring old record: {}", msg);
                    continue;
                }
                Err(e) => return Err(e),
            };

            // Second write carries the token from the first, making a retry
            // after partial failure idempotent.
            fresh.rev = Some(rev);
            match self.store.put(&fresh, ctx.credential()).await {
                Ok(_) => {
                    info!(doc_id = id, user = %ctx.username, "Envelope updated");
                    return Ok(MutationReceipt {
                        doc_id: id.to_string(),
                    });
                }
                Err(ArchwayError::StoreConflict(msg)) => {
                    warn!(doc_id = id, attempt, "Conflict writing replacement: {}", msg);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ArchwayError::StoreConflict(format!(
            "Gave up updating {} after {} attempts",
            id, MAX_CONFLICT_RETRIES
        )))
    }

    /// ACTIVE -> TOMBSTONED, terminal. Single write, no replacement.
    pub async fn delete(&self, id: &str, ctx: &RequestContext) -> Result<()> {
        for attempt in 0..MAX_CONFLICT_RETRIES {
            let existing = self
                .store
                .get(id)
                .await?
                .ok_or_else(|| ArchwayError::NotFound("Document does not exist".into()))?;

            self.authorize_mutation(&existing, ctx).await?;

            let mut retired = existing;
            retired.mark_tombstone();

            match self.store.put(&retired, ctx.credential()).await {
                Ok(_) => {
                    info!(doc_id = id, user = %ctx.username, "Envelope retired");
                    return Ok(());
                }
                Err(ArchwayError::StoreConflict(msg)) => {
                    warn!(doc_id = id, attempt, "Conflict retiring record: {}", msg);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ArchwayError::StoreConflict(format!(
            "Gave up retiring {} after {} attempts",
            id, MAX_CONFLICT_RETRIES
        )))
    }

    /// Direct passthrough read. Tombstoned records stay retrievable here
    /// for audit; only harvest listings exclude them.
    pub async fn read(&self, id: &str) -> Result<Envelope> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ArchwayError::NotFound("Document does not exist".into()))
    }

    /// Ownership check against the existing record's signer; runs before
    /// any destructive write.
    async fn authorize_mutation(&self, existing: &Envelope, ctx: &RequestContext) -> Result<()> {
        let owner = existing.key_owner().ok_or_else(|| {
            ArchwayError::Forbidden("Document has no recorded signer".into())
        })?;
        self.authz.authorize(owner, &ctx.username).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use crate::keyring::InMemoryKeyRegistry;
    use crate::signer::SignerRegistry;
    use crate::signing::SignatureService;
    use crate::store::{ByteStream, MemoryStore, ScanParams};
    use crate::validate::{EnvelopeValidator, RequiredFieldsValidator};

    struct Fixture {
        lifecycle: LifecycleManager,
        store: Arc<MemoryStore>,
    }

    fn pipeline_over(store: Arc<dyn EnvelopeStore>) -> LifecycleManager {
        let keys = Arc::new(InMemoryKeyRegistry::new());
        keys.generate_for_user("alice", vec!["Alice <alice@example.org>".into()]);
        keys.generate_for_user("bob", vec!["Bob <bob@example.org>".into()]);

        let registry = Arc::new(SignerRegistry::with_default_schemes());
        let signatures = Arc::new(SignatureService::new(registry, keys.clone()));
        let validator = Arc::new(EnvelopeValidator::new(
            Arc::new(RequiredFieldsValidator::default()),
            signatures,
            keys.clone(),
        ));
        let authz = Arc::new(OwnershipAuthorizer::new(keys));
        LifecycleManager::new(store, validator, authz)
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        Fixture {
            lifecycle: pipeline_over(store.clone()),
            store,
        }
    }

    /// Store wrapper that rejects the next N writes with a conflict, as a
    /// racing writer would cause, then delegates.
    struct ConflictingStore {
        inner: MemoryStore,
        conflicts_left: AtomicUsize,
    }

    impl ConflictingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                conflicts_left: AtomicUsize::new(0),
            }
        }

        fn inject_conflicts(&self, count: usize) {
            self.conflicts_left.store(count, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl EnvelopeStore for ConflictingStore {
        async fn contains(&self, id: &str) -> crate::types::Result<bool> {
            self.inner.contains(id).await
        }

        async fn get(&self, id: &str) -> crate::types::Result<Option<Envelope>> {
            self.inner.get(id).await
        }

        async fn put(
            &self,
            envelope: &Envelope,
            credential: Option<&str>,
        ) -> crate::types::Result<String> {
            if self
                .conflicts_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ArchwayError::StoreConflict(
                    "Document update conflict".into(),
                ));
            }
            self.inner.put(envelope, credential).await
        }

        async fn range_scan(&self, params: &ScanParams) -> crate::types::Result<ByteStream> {
            self.inner.range_scan(params).await
        }
    }

    fn ctx(username: &str) -> RequestContext {
        RequestContext {
            username: username.into(),
            session_credential: None,
            node_id: "node-1".into(),
            base_url: "http://node-1".into(),
        }
    }

    fn body(locator: &str) -> Envelope {
        Envelope::from_slice(
            format!(
                r#"{{"doc_version": "0.49.0", "resource_locator": "{}"}}"#,
                locator
            )
            .as_bytes(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_signs_and_persists() {
        let f = fixture();
        let receipt = f.lifecycle.create(body("http://r/1"), &ctx("alice")).await.unwrap();

        let stored = f.lifecycle.read(&receipt.doc_id).await.unwrap();
        assert_eq!(stored.key_owner(), Some("Alice <alice@example.org>"));
        assert!(!stored.is_tombstone());
        assert_eq!(stored.publishing_node.as_deref(), Some("node-1"));
    }

    #[tokio::test]
    async fn test_create_rejects_taken_id() {
        let f = fixture();
        let mut env = body("http://r/1");
        env.doc_id = Some("fixed".into());
        f.lifecycle.create(env, &ctx("alice")).await.unwrap();

        let mut again = body("http://r/other");
        again.doc_id = Some("fixed".into());
        let err = f.lifecycle.create(again, &ctx("alice")).await.unwrap_err();
        assert!(matches!(err, ArchwayError::DuplicateId));
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_replaces_record_and_preserves_creation_time() {
        let f = fixture();
        let receipt = f.lifecycle.create(body("http://r/1"), &ctx("alice")).await.unwrap();
        let created = f.lifecycle.read(&receipt.doc_id).await.unwrap().create_timestamp;

        f.lifecycle
            .update(&receipt.doc_id, body("http://r/1-v2"), &ctx("alice"))
            .await
            .unwrap();

        let stored = f.lifecycle.read(&receipt.doc_id).await.unwrap();
        assert!(!stored.is_tombstone());
        assert_eq!(stored.payload["resource_locator"], "http://r/1-v2");
        assert_eq!(stored.create_timestamp, created);
    }

    #[tokio::test]
    async fn test_update_by_non_owner_is_forbidden_with_zero_writes() {
        let f = fixture();
        let receipt = f.lifecycle.create(body("http://r/1"), &ctx("alice")).await.unwrap();
        let before = f.lifecycle.read(&receipt.doc_id).await.unwrap();

        let err = f
            .lifecycle
            .update(&receipt.doc_id, body("http://r/evil"), &ctx("bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchwayError::Forbidden(_)));

        let after = f.lifecycle.read(&receipt.doc_id).await.unwrap();
        assert_eq!(after.rev, before.rev);
        assert!(!after.is_tombstone());
    }

    #[tokio::test]
    async fn test_update_missing_document_is_not_found() {
        let f = fixture();
        let err = f
            .lifecycle
            .update("missing", body("http://r/1"), &ctx("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchwayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_replacement_leaves_no_tombstone() {
        let f = fixture();
        let receipt = f.lifecycle.create(body("http://r/1"), &ctx("alice")).await.unwrap();

        // Replacement missing the required payload field
        let bad = Envelope::from_slice(br#"{"doc_version": "0.49.0"}"#).unwrap();
        let err = f
            .lifecycle
            .update(&receipt.doc_id, bad, &ctx("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchwayError::SchemaInvalid(_)));

        let stored = f.lifecycle.read(&receipt.doc_id).await.unwrap();
        assert!(!stored.is_tombstone());
    }

    #[tokio::test]
    async fn test_update_retries_past_transient_conflict() {
        let store = Arc::new(ConflictingStore::new());
        let lifecycle = pipeline_over(store.clone());

        let receipt = lifecycle.create(body("http://r/1"), &ctx("alice")).await.unwrap();

        store.inject_conflicts(1);
        lifecycle
            .update(&receipt.doc_id, body("http://r/1-v2"), &ctx("alice"))
            .await
            .unwrap();

        let stored = lifecycle.read(&receipt.doc_id).await.unwrap();
        assert!(!stored.is_tombstone());
        assert_eq!(stored.payload["resource_locator"], "http://r/1-v2");
    }

    #[tokio::test]
    async fn test_update_gives_up_after_bounded_retries() {
        let store = Arc::new(ConflictingStore::new());
        let lifecycle = pipeline_over(store.clone());

        let receipt = lifecycle.create(body("http://r/1"), &ctx("alice")).await.unwrap();

        // One conflict per attempt, enough to drain every retry.
        store.inject_conflicts(MAX_CONFLICT_RETRIES);
        let err = lifecycle
            .update(&receipt.doc_id, body("http://r/1-v2"), &ctx("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchwayError::StoreConflict(ref msg) if msg.contains("Gave up")));

        // The losing writer must not have replaced the record.
        let stored = lifecycle.read(&receipt.doc_id).await.unwrap();
        assert_eq!(stored.payload["resource_locator"], "http://r/1");
    }

    #[tokio::test]
    async fn test_delete_tombstones_but_keeps_record_readable() {
        let f = fixture();
        let receipt = f.lifecycle.create(body("http://r/1"), &ctx("alice")).await.unwrap();

        f.lifecycle.delete(&receipt.doc_id, &ctx("alice")).await.unwrap();

        let stored = f.lifecycle.read(&receipt.doc_id).await.unwrap();
        assert!(stored.is_tombstone());
    }

    #[tokio::test]
    async fn test_delete_by_non_owner_is_forbidden() {
        let f = fixture();
        let receipt = f.lifecycle.create(body("http://r/1"), &ctx("alice")).await.unwrap();

        let err = f.lifecycle.delete(&receipt.doc_id, &ctx("bob")).await.unwrap_err();
        assert!(matches!(err, ArchwayError::Forbidden(_)));
        assert!(!f.lifecycle.read(&receipt.doc_id).await.unwrap().is_tombstone());
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.lifecycle.read("missing").await,
            Err(ArchwayError::NotFound(_))
        ));
    }
}
