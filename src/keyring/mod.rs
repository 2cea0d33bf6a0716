//! Key registry
//!
//! Capability seam over the cryptographic key backend. The registry answers
//! two questions: which keys does an authenticated user control, and which
//! public key belongs to a given owner identity. The concrete backend is
//! swappable; the in-memory implementation serves dev mode, tests, and
//! file-seeded deployments.

use std::path::Path;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use dashmap::DashMap;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::types::{ArchwayError, Result};

/// A registered key: identifier, bound identity strings, and key material.
///
/// The signing half is present only for keys this node custodians (i.e. keys
/// it may sign envelopes with on the user's behalf).
#[derive(Debug, Clone)]
pub struct KeyRecord {
    /// Short key identifier (hex fingerprint prefix)
    pub key_id: String,

    /// Identity strings bound to this key (e.g. "Alice <alice@example.org>")
    pub uids: Vec<String>,

    pub verifying_key: VerifyingKey,

    pub signing_key: Option<SigningKey>,
}

impl KeyRecord {
    /// The identity embedded into signatures produced with this key.
    pub fn primary_uid(&self) -> &str {
        self.uids.first().map(String::as_str).unwrap_or_default()
    }

    /// Base64 of the public key bytes, served at the key-location URL.
    pub fn public_key_b64(&self) -> String {
        BASE64.encode(self.verifying_key.as_bytes())
    }
}

/// Key backend capability.
#[async_trait]
pub trait KeyRegistry: Send + Sync {
    /// All keys registered to (controlled by) the given user.
    async fn list_keys_for_user(&self, username: &str) -> Result<Vec<KeyRecord>>;

    /// Resolve the public key for an owner identity string, across all
    /// registered keys. Used when verifying a signature whose author may
    /// not be the requester.
    async fn resolve_owner_key(&self, key_owner: &str) -> Result<Option<VerifyingKey>>;
}

/// Derive a short key id from the public key: first 8 bytes of its SHA-256
/// fingerprint, hex-encoded.
pub fn key_id_for(verifying_key: &VerifyingKey) -> String {
    let digest = Sha256::digest(verifying_key.as_bytes());
    hex::encode(&digest[..8])
}

/// Serialized form of one keys-file entry.
#[derive(Debug, Serialize, Deserialize)]
struct KeyFileEntry {
    username: String,
    uids: Vec<String>,
    /// Base64-encoded 32-byte Ed25519 seed
    signing_key: String,
}

/// In-memory key registry backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryKeyRegistry {
    keys: DashMap<String, Vec<KeyRecord>>,
}

impl InMemoryKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load key records from a JSON keys file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .map_err(|e| ArchwayError::Config(format!("Cannot read keys file: {}", e)))?;
        let entries: Vec<KeyFileEntry> = serde_json::from_slice(&raw)
            .map_err(|e| ArchwayError::Config(format!("Invalid keys file: {}", e)))?;

        let registry = Self::new();
        for entry in entries {
            let seed = BASE64
                .decode(&entry.signing_key)
                .map_err(|e| ArchwayError::Config(format!("Invalid signing key encoding: {}", e)))?;
            let seed: [u8; 32] = seed
                .try_into()
                .map_err(|_| ArchwayError::Config("Signing key must be 32 bytes".into()))?;
            let signing_key = SigningKey::from_bytes(&seed);
            registry.register_signing_key(&entry.username, entry.uids, signing_key);
        }
        info!("Loaded {} key record(s) from {}", registry.keys.len(), path.display());
        Ok(registry)
    }

    /// Register a full keypair for a user.
    pub fn register_signing_key(
        &self,
        username: &str,
        uids: Vec<String>,
        signing_key: SigningKey,
    ) -> KeyRecord {
        let verifying_key = signing_key.verifying_key();
        let record = KeyRecord {
            key_id: key_id_for(&verifying_key),
            uids,
            verifying_key,
            signing_key: Some(signing_key),
        };
        self.keys
            .entry(username.to_string())
            .or_default()
            .push(record.clone());
        record
    }

    /// Generate a fresh keypair for a user and register it.
    pub fn generate_for_user(&self, username: &str, uids: Vec<String>) -> KeyRecord {
        let signing_key = SigningKey::generate(&mut OsRng);
        self.register_signing_key(username, uids, signing_key)
    }

    pub fn user_count(&self) -> usize {
        self.keys.len()
    }
}

#[async_trait]
impl KeyRegistry for InMemoryKeyRegistry {
    async fn list_keys_for_user(&self, username: &str) -> Result<Vec<KeyRecord>> {
        Ok(self
            .keys
            .get(username)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn resolve_owner_key(&self, key_owner: &str) -> Result<Option<VerifyingKey>> {
        for entry in self.keys.iter() {
            for record in entry.value() {
                if record.uids.iter().any(|uid| uid == key_owner) {
                    return Ok(Some(record.verifying_key));
                }
            }
        }
        Ok(None)
    }
}
