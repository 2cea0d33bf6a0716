//! Document store collaborator
//!
//! The registry never deletes data; it delegates persistence to a
//! key-addressable store with optimistic concurrency (a revision token per
//! document) and a server-side range index over the update timestamp.
//!
//! Two implementations: [`couch::CouchStore`] speaks HTTP to a CouchDB-style
//! backend and relays range scans as byte streams without buffering;
//! [`MemoryStore`] backs dev mode and tests.

pub mod couch;

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::Stream;

pub use couch::CouchStore;

use crate::envelope::Envelope;
use crate::types::{ArchwayError, Result};

/// Staleness hint sent with every range scan: the store may serve a slightly
/// out-of-date index for lower read latency.
pub const STALE_HINT: &str = "update_after";

/// Range-scan parameters for the store's by-timestamp index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanParams {
    /// Inclusive lower bound, epoch seconds
    pub start_key: i64,
    /// Inclusive upper bound, epoch seconds
    pub end_key: i64,
    /// Pagination offset (page * page_size)
    pub skip: Option<u64>,
    /// Fixed page-size limit
    pub limit: u64,
    /// Whether to return full documents or ids only
    pub include_docs: bool,
}

impl ScanParams {
    /// The server-side list function this scan requests. The choice changes
    /// the result shape, not the range semantics.
    pub fn list_mode(&self) -> &'static str {
        if self.include_docs {
            "docs"
        } else {
            "ids"
        }
    }
}

/// Streamed scan results, relayed to the caller incrementally.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Key-addressable envelope store.
#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    async fn contains(&self, id: &str) -> Result<bool>;

    async fn get(&self, id: &str) -> Result<Option<Envelope>>;

    /// Write a document. The envelope's revision token must match the
    /// stored one (or be absent for a fresh id); mismatch is
    /// `StoreConflict`. Returns the new revision token. The caller's
    /// session credential is forwarded opaquely.
    async fn put(&self, envelope: &Envelope, credential: Option<&str>) -> Result<String>;

    /// Range-scan the by-timestamp index, excluding tombstones, streaming
    /// the backend response body.
    async fn range_scan(&self, params: &ScanParams) -> Result<ByteStream>;
}

/// In-memory store for dev mode and tests.
///
/// Range scans are materialized rather than streamed; only the HTTP store
/// relays incrementally.
#[derive(Default)]
pub struct MemoryStore {
    docs: DashMap<String, Envelope>,
    rev_counter: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn next_rev(&self) -> String {
        format!("{}-mem", self.rev_counter.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[async_trait]
impl EnvelopeStore for MemoryStore {
    async fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.docs.contains_key(id))
    }

    async fn get(&self, id: &str) -> Result<Option<Envelope>> {
        Ok(self.docs.get(id).map(|e| e.value().clone()))
    }

    async fn put(&self, envelope: &Envelope, _credential: Option<&str>) -> Result<String> {
        let id = envelope
            .doc_id
            .clone()
            .ok_or_else(|| ArchwayError::Internal("Cannot put an envelope without doc_ID".into()))?;

        let rev = self.next_rev();
        match self.docs.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().rev != envelope.rev {
                    return Err(ArchwayError::StoreConflict(
                        "Document update conflict".into(),
                    ));
                }
                let mut stored = envelope.clone();
                stored.rev = Some(rev.clone());
                occupied.insert(stored);
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                if envelope.rev.is_some() {
                    return Err(ArchwayError::StoreConflict(
                        "Revision token for a document that does not exist".into(),
                    ));
                }
                let mut stored = envelope.clone();
                stored.rev = Some(rev.clone());
                vacant.insert(stored);
            }
        }
        Ok(rev)
    }

    async fn range_scan(&self, params: &ScanParams) -> Result<ByteStream> {
        let mut hits: Vec<Envelope> = self
            .docs
            .iter()
            .filter(|entry| !entry.value().is_tombstone())
            .filter(|entry| {
                entry
                    .value()
                    .update_epoch_seconds()
                    .map(|ts| ts >= params.start_key && ts <= params.end_key)
                    .unwrap_or(false)
            })
            .map(|entry| entry.value().clone())
            .collect();
        hits.sort_by_key(|e| (e.update_epoch_seconds(), e.doc_id.clone()));

        let skip = params.skip.unwrap_or(0) as usize;
        let page: Vec<Envelope> = hits
            .into_iter()
            .skip(skip)
            .take(params.limit as usize)
            .collect();

        let body = if params.include_docs {
            serde_json::json!({ "docs": page })
        } else {
            let ids: Vec<&str> = page.iter().filter_map(|e| e.doc_id.as_deref()).collect();
            serde_json::json!({ "ids": ids })
        };
        let bytes = serde_json::to_vec(&body)
            .map_err(|e| ArchwayError::Internal(format!("Scan serialization failed: {}", e)))?;

        Ok(Box::pin(futures::stream::once(async move {
            Ok(Bytes::from(bytes))
        })))
    }
}
