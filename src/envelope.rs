//! Envelope data model
//!
//! The envelope is the unit of record: a metadata document signed by its
//! author and carried through an append-mostly store. Server-managed fields
//! (id, timestamps, publishing node) are optional on the wire so that a raw
//! client submission deserializes cleanly; they are always populated before
//! anything is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Lifecycle state of a physical envelope record.
///
/// Starts `Active`; transitions to `Tombstone` at most once and never back.
/// Tombstoned records stay readable by direct id lookup but are excluded
/// from harvest listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    #[default]
    Active,
    Tombstone,
}

/// Digital signature attached to an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitalSignature {
    /// Base64-encoded signature blob over the envelope's canonical form
    pub signature: String,

    /// Identity string bound to the signing key (the document author)
    pub key_owner: String,

    /// Dereferenceable locations of the public key
    #[serde(default)]
    pub key_location: Vec<String>,
}

/// The signed metadata document managed by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Opaque identifier, globally unique. Assigned by the server when
    /// absent on create, immutable afterwards.
    #[serde(rename = "doc_ID", skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,

    /// Document format version; selects the signer scheme
    pub doc_version: String,

    #[serde(default)]
    pub doc_type: DocType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_timestamp: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_timestamp: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_timestamp: Option<DateTime<Utc>>,

    /// Identity of the node that accepted the write; never client-supplied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publishing_node: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub digital_signature: Option<DigitalSignature>,

    /// Store revision token for optimistic concurrency. Managed by the
    /// store layer; opaque to clients.
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,

    /// Caller-supplied payload fields, validated against the schema seam
    #[serde(flatten)]
    pub payload: serde_json::Map<String, JsonValue>,
}

impl Envelope {
    /// Parse an envelope from a raw request body.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Assign server-managed fields for a fresh write: id (when absent),
    /// the three timestamps, and the publishing node identity.
    pub fn populate_node_values(&mut self, node_id: &str) {
        if self.doc_id.is_none() {
            self.doc_id = Some(Uuid::new_v4().simple().to_string());
        }
        let now = Utc::now();
        self.node_timestamp = Some(now);
        self.create_timestamp = Some(now);
        self.update_timestamp = Some(now);
        self.publishing_node = Some(node_id.to_string());
    }

    /// Retire this record: mark tombstone and refresh the write timestamps.
    /// The create timestamp is left untouched.
    pub fn mark_tombstone(&mut self) {
        self.doc_type = DocType::Tombstone;
        let now = Utc::now();
        self.node_timestamp = Some(now);
        self.update_timestamp = Some(now);
    }

    pub fn is_tombstone(&self) -> bool {
        self.doc_type == DocType::Tombstone
    }

    pub fn has_signature(&self) -> bool {
        self.digital_signature.is_some()
    }

    /// Update timestamp as epoch seconds, the key used by the store's
    /// range index.
    pub fn update_epoch_seconds(&self) -> Option<i64> {
        self.update_timestamp.map(|t| t.timestamp())
    }

    /// The identity recorded as this document's original signer.
    pub fn key_owner(&self) -> Option<&str> {
        self.digital_signature.as_ref().map(|s| s.key_owner.as_str())
    }
}
