//! Signature service
//!
//! Signs an unsigned envelope or verifies a signature the client asserted.
//! The two paths are mutually exclusive per request: an already-signed
//! envelope is never re-signed, and a client-asserted signature is never
//! skipped.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::debug;

use crate::envelope::{DigitalSignature, Envelope};
use crate::keyring::{KeyRecord, KeyRegistry};
use crate::signer::SignerRegistry;
use crate::types::{ArchwayError, Result};

pub struct SignatureService {
    registry: Arc<SignerRegistry>,
    keys: Arc<dyn KeyRegistry>,
}

impl SignatureService {
    pub fn new(registry: Arc<SignerRegistry>, keys: Arc<dyn KeyRegistry>) -> Self {
        Self { registry, keys }
    }

    /// Attach a digital signature to an unsigned envelope.
    ///
    /// Selects the scheme by `doc_version`, signs the canonical form with
    /// the user's key, and records the key owner identity plus the public
    /// key dereference location.
    pub fn sign(&self, envelope: &mut Envelope, key: &KeyRecord, key_location: &str) -> Result<()> {
        if envelope.has_signature() {
            return Err(ArchwayError::Internal(
                "Refusing to re-sign an envelope that already carries a signature".into(),
            ));
        }

        let scheme = self.registry.select(&envelope.doc_version)?;
        let signing_key = key.signing_key.as_ref().ok_or_else(|| {
            ArchwayError::Forbidden("No signing key held for this user on this node".into())
        })?;

        let canonical = scheme.canonical_form(envelope)?;
        let blob = scheme.sign(&canonical, signing_key);

        envelope.digital_signature = Some(DigitalSignature {
            signature: BASE64.encode(blob),
            key_owner: key.primary_uid().to_string(),
            key_location: vec![key_location.to_string()],
        });

        debug!(
            doc_id = envelope.doc_id.as_deref().unwrap_or(""),
            version = %envelope.doc_version,
            "Envelope signed"
        );
        Ok(())
    }

    /// Verify a signature already present on the envelope.
    ///
    /// Checks the structure (all fields present and decodable), resolves the
    /// owner's public key through the key registry, and verifies the blob
    /// over the scheme's canonical form.
    pub async fn verify(&self, envelope: &Envelope) -> Result<()> {
        let sig = envelope.digital_signature.as_ref().ok_or_else(|| {
            ArchwayError::SignatureInvalid("Envelope carries no digital_signature".into())
        })?;

        if sig.key_owner.is_empty() {
            return Err(ArchwayError::SignatureInvalid(
                "digital_signature is missing key_owner".into(),
            ));
        }
        if sig.key_location.is_empty() {
            return Err(ArchwayError::SignatureInvalid(
                "digital_signature is missing key_location".into(),
            ));
        }

        let blob = BASE64.decode(&sig.signature).map_err(|_| {
            ArchwayError::SignatureInvalid("Signature blob is not valid base64".into())
        })?;

        let scheme = self.registry.select(&envelope.doc_version)?;

        let key = self
            .keys
            .resolve_owner_key(&sig.key_owner)
            .await?
            .ok_or_else(|| {
                ArchwayError::SignatureInvalid(format!(
                    "No public key known for key owner '{}'",
                    sig.key_owner
                ))
            })?;

        let canonical = scheme.canonical_form(envelope)?;
        scheme.verify(&canonical, &blob, &key)
    }
}
