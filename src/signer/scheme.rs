//! Signer schemes
//!
//! A scheme is a versioned recipe for producing and checking an envelope's
//! digital signature: which fields participate in the canonical form, and
//! how the Ed25519 signature is computed over it.
//!
//! All four supported document-format versions sign with Ed25519 and
//! exclude node-managed fields from the signed content (the serving node
//! restamps them on every write, so a client signature must not cover
//! them). The versions differ in pre-hashing:
//!
//! - `0.21.0`, `0.23.0`, `0.49.0` sign a SHA-256 digest of the canonical
//!   form.
//! - `0.51.0` signs the canonical bytes directly.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::envelope::Envelope;
use crate::types::{ArchwayError, Result};

/// Fields the store and signature layer manage; never part of signed content.
const SIGNATURE_FIELD: &str = "digital_signature";
const REV_FIELD: &str = "_rev";

/// Fields stamped by the serving node on every write; never part of signed
/// content, or restamping would break client signatures.
const NODE_FIELDS: [&str; 4] = [
    "node_timestamp",
    "create_timestamp",
    "update_timestamp",
    "publishing_node",
];

/// A versioned signature scheme.
pub trait SignerScheme: Send + Sync + std::fmt::Debug {
    /// The doc_version string this scheme serves.
    fn version(&self) -> &str;

    /// Canonical serialized form of the envelope under this scheme.
    fn canonical_form(&self, envelope: &Envelope) -> Result<Vec<u8>>;

    /// Produce a signature over the canonical form.
    fn sign(&self, canonical: &[u8], key: &SigningKey) -> Vec<u8>;

    /// Check a signature over the canonical form.
    fn verify(&self, canonical: &[u8], signature: &[u8], key: &VerifyingKey) -> Result<()>;
}

/// Ed25519 scheme parameterized per document-format version.
#[derive(Debug)]
pub struct Ed25519Scheme {
    version: &'static str,
    /// Whether to sign a SHA-256 digest instead of the raw canonical bytes
    prehash: bool,
}

impl Ed25519Scheme {
    pub const fn new(version: &'static str, prehash: bool) -> Self {
        Self { version, prehash }
    }

    fn message<'a>(&self, canonical: &'a [u8]) -> Vec<u8> {
        if self.prehash {
            Sha256::digest(canonical).to_vec()
        } else {
            canonical.to_vec()
        }
    }
}

impl SignerScheme for Ed25519Scheme {
    fn version(&self) -> &str {
        self.version
    }

    fn canonical_form(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let mut value = serde_json::to_value(envelope)
            .map_err(|e| ArchwayError::Internal(format!("Canonicalization failed: {}", e)))?;

        let obj = value
            .as_object_mut()
            .ok_or_else(|| ArchwayError::Internal("Envelope is not a JSON object".into()))?;

        obj.remove(SIGNATURE_FIELD);
        obj.remove(REV_FIELD);
        for field in NODE_FIELDS {
            obj.remove(field);
        }

        // serde_json maps are ordered by key, so serialization is canonical.
        serde_json::to_vec(&JsonValue::Object(obj.clone()))
            .map_err(|e| ArchwayError::Internal(format!("Canonicalization failed: {}", e)))
    }

    fn sign(&self, canonical: &[u8], key: &SigningKey) -> Vec<u8> {
        key.sign(&self.message(canonical)).to_bytes().to_vec()
    }

    fn verify(&self, canonical: &[u8], signature: &[u8], key: &VerifyingKey) -> Result<()> {
        let sig_bytes: [u8; 64] = signature
            .try_into()
            .map_err(|_| ArchwayError::SignatureInvalid("Signature blob has wrong length".into()))?;
        let signature = Signature::from_bytes(&sig_bytes);

        key.verify(&self.message(canonical), &signature)
            .map_err(|_| {
                ArchwayError::SignatureInvalid("Signature does not match envelope content".into())
            })
    }
}
