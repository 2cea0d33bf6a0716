//! Ownership authorization
//!
//! Proves that a mutation request originates from the original signer: the
//! requester must control a registered key whose identity set contains the
//! identity recorded as the document's key owner. No separate caller-to-owner
//! mapping table is needed. Read operations never run this check.

use std::sync::Arc;

use tracing::debug;

use crate::keyring::KeyRegistry;
use crate::types::{ArchwayError, Result};

pub struct OwnershipAuthorizer {
    keys: Arc<dyn KeyRegistry>,
}

impl OwnershipAuthorizer {
    pub fn new(keys: Arc<dyn KeyRegistry>) -> Self {
        Self { keys }
    }

    /// Whether the requester controls a key bound to the claimed owner
    /// identity. A requester with no registered keys is an error, never a
    /// silent false.
    pub async fn is_owner(&self, claimed_owner: &str, requester: &str) -> Result<bool> {
        let keys = self.keys.list_keys_for_user(requester).await?;
        if keys.is_empty() {
            return Err(ArchwayError::Forbidden(
                "No key registered for this user on this server".into(),
            ));
        }

        let owned = keys
            .iter()
            .any(|key| key.uids.iter().any(|uid| uid == claimed_owner));

        debug!(requester, claimed_owner, owned, "Ownership check");
        Ok(owned)
    }

    /// Run the ownership check and fail with `Forbidden` on mismatch.
    /// Called before any destructive mutation.
    pub async fn authorize(&self, claimed_owner: &str, requester: &str) -> Result<()> {
        if self.is_owner(claimed_owner, requester).await? {
            Ok(())
        } else {
            Err(ArchwayError::Forbidden(
                "Requester does not control the key that signed this document".into(),
            ))
        }
    }
}
