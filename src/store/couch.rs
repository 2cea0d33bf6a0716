//! HTTP store client
//!
//! Speaks to a CouchDB-style document store: one resource per document id,
//! revision tokens for optimistic concurrency, and a design-document list
//! function over the by-timestamp index for harvest scans. Scan responses
//! are relayed as byte streams; dropping the stream aborts the upstream
//! request.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ByteStream, EnvelopeStore, ScanParams, STALE_HINT};
use crate::envelope::Envelope;
use crate::types::{ArchwayError, Result};

/// Store acknowledgement for a document write.
#[derive(Debug, Deserialize)]
struct PutResponse {
    rev: String,
}

pub struct CouchStore {
    client: reqwest::Client,
    base_url: String,
    db_name: String,
}

impl CouchStore {
    pub fn new(base_url: &str, db_name: &str, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| ArchwayError::Config(format!("Cannot build store client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            db_name: db_name.to_string(),
        })
    }

    fn doc_url(&self, id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            self.db_name,
            urlencoding::encode(id)
        )
    }

    fn list_url(&self, mode: &str) -> String {
        format!(
            "{}/{}/_design/registry/_list/{}/by-timestamp",
            self.base_url, self.db_name, mode
        )
    }
}

#[async_trait]
impl EnvelopeStore for CouchStore {
    async fn contains(&self, id: &str) -> Result<bool> {
        let resp = self.client.head(self.doc_url(id)).send().await?;
        match resp.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(ArchwayError::StoreUnavailable(format!(
                "Unexpected status {} from store",
                status
            ))),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Envelope>> {
        let resp = self.client.get(self.doc_url(id)).send().await?;
        match resp.status() {
            StatusCode::OK => {
                let envelope = resp.json::<Envelope>().await.map_err(|e| {
                    ArchwayError::Internal(format!("Store returned malformed document: {}", e))
                })?;
                Ok(Some(envelope))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(ArchwayError::StoreUnavailable(format!(
                "Unexpected status {} from store",
                status
            ))),
        }
    }

    async fn put(&self, envelope: &Envelope, credential: Option<&str>) -> Result<String> {
        let id = envelope
            .doc_id
            .as_deref()
            .ok_or_else(|| ArchwayError::Internal("Cannot put an envelope without doc_ID".into()))?;

        let mut request = self
            .client
            .put(self.doc_url(id))
            .header("Content-Type", "application/json")
            .json(envelope);
        if let Some(cookie) = credential {
            request = request.header("Cookie", cookie);
        }

        let resp = request.send().await?;
        match resp.status() {
            StatusCode::CREATED | StatusCode::OK | StatusCode::ACCEPTED => {
                let ack = resp.json::<PutResponse>().await.map_err(|e| {
                    ArchwayError::StoreUnavailable(format!("Malformed write acknowledgement: {}", e))
                })?;
                debug!(doc_id = id, rev = %ack.rev, "Document written");
                Ok(ack.rev)
            }
            StatusCode::CONFLICT => Err(ArchwayError::StoreConflict(format!(
                "Document update conflict for {}",
                id
            ))),
            status => {
                warn!(doc_id = id, %status, "Store write failed");
                Err(ArchwayError::StoreUnavailable(format!(
                    "Store write failed with status {}",
                    status
                )))
            }
        }
    }

    async fn range_scan(&self, params: &ScanParams) -> Result<ByteStream> {
        let mut query: Vec<(&str, String)> = vec![
            ("startkey", params.start_key.to_string()),
            ("endkey", params.end_key.to_string()),
            ("limit", params.limit.to_string()),
            ("stale", STALE_HINT.to_string()),
        ];
        if let Some(skip) = params.skip {
            query.push(("skip", skip.to_string()));
        }

        let resp = self
            .client
            .get(self.list_url(params.list_mode()))
            .query(&query)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ArchwayError::StoreUnavailable(format!(
                "Store scan failed with status {}",
                resp.status()
            )));
        }

        // Relay the body incrementally; no full buffering. Dropping the
        // stream (caller disconnect) cancels the upstream request.
        let stream = resp
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::pin(stream))
    }
}
