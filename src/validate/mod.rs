//! Envelope validation
//!
//! Orchestration of the request-level accept/reject decision: external
//! schema check first, then exactly one of sign (no signature present) or
//! verify (client asserted a signature). The first failing step aborts the
//! whole operation; nothing is written on failure.

use std::sync::Arc;

use crate::envelope::Envelope;
use crate::keyring::KeyRegistry;
use crate::signing::SignatureService;
use crate::types::{ArchwayError, Result};

/// External schema validation seam.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, envelope: &Envelope) -> Result<()>;
}

/// Baseline schema check: doc_version present and the configured payload
/// fields supplied. Deployments with a full schema toolchain plug in their
/// own implementation.
pub struct RequiredFieldsValidator {
    required: Vec<String>,
}

impl RequiredFieldsValidator {
    pub fn new(required: Vec<String>) -> Self {
        Self { required }
    }
}

impl Default for RequiredFieldsValidator {
    fn default() -> Self {
        Self::new(vec!["resource_locator".into()])
    }
}

impl SchemaValidator for RequiredFieldsValidator {
    fn validate(&self, envelope: &Envelope) -> Result<()> {
        if envelope.doc_version.is_empty() {
            return Err(ArchwayError::SchemaInvalid(
                "doc_version is required".into(),
            ));
        }
        for field in &self.required {
            if !envelope.payload.contains_key(field) {
                return Err(ArchwayError::SchemaInvalid(format!(
                    "Missing required field '{}'",
                    field
                )));
            }
        }
        Ok(())
    }
}

pub struct EnvelopeValidator {
    schema: Arc<dyn SchemaValidator>,
    signatures: Arc<SignatureService>,
    keys: Arc<dyn KeyRegistry>,
}

impl EnvelopeValidator {
    pub fn new(
        schema: Arc<dyn SchemaValidator>,
        signatures: Arc<SignatureService>,
        keys: Arc<dyn KeyRegistry>,
    ) -> Self {
        Self {
            schema,
            signatures,
            keys,
        }
    }

    /// Validate an envelope for persistence, signing it with the
    /// requester's key when it carries no signature, verifying the present
    /// signature otherwise.
    pub async fn validate(
        &self,
        envelope: &mut Envelope,
        requester: &str,
        key_location: &str,
    ) -> Result<()> {
        self.schema.validate(envelope)?;

        if envelope.has_signature() {
            self.signatures.verify(envelope).await
        } else {
            let keys = self.keys.list_keys_for_user(requester).await?;
            let key = keys.first().ok_or_else(|| {
                ArchwayError::Forbidden(
                    "No signing key registered for this user on this server".into(),
                )
            })?;
            self.signatures.sign(envelope, key, key_location)
        }
    }
}
