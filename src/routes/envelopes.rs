//! Envelope routes
//!
//! - `PUT    /envelopes`        create (auth)
//! - `POST   /envelopes/{id}`   update (auth)
//! - `DELETE /envelopes/{id}`   delete (auth)
//! - `GET    /envelopes/{id}`   direct read
//! - `GET    /envelopes?from=&until=&page=&include_docs=`  harvest (streamed)
//!
//! Validation-class failures come back as `{"OK": false, "msg": ...}`;
//! parameter and authorization failures map to HTTP status codes.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::http::HeaderMap;
use hyper::{Request, Response, StatusCode};
use tracing::debug;

use crate::auth::{extract_token_from_header, RequestContext};
use crate::envelope::Envelope;
use crate::harvest;
use crate::server::http::to_boxed;
use crate::server::{ArchBody, AppState};
use crate::types::{ArchwayError, Result};

use super::{error_response, json_response};

/// Resolve the per-request identity context from the request headers.
///
/// Production: a Bearer JWT carries the username. Dev mode: the
/// `X-Remote-User` header is trusted as-is. The Cookie header, when
/// present, is carried along as the opaque store credential.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<RequestContext> {
    let session_credential = headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let username = if state.args.dev_mode {
        headers
            .get("x-remote-user")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or_else(|| {
                ArchwayError::Unauthorized("X-Remote-User header required in dev mode".into())
            })?
    } else {
        let auth_header = headers.get("authorization").and_then(|v| v.to_str().ok());
        let token = extract_token_from_header(auth_header)
            .ok_or_else(|| ArchwayError::Unauthorized("Missing bearer token".into()))?;
        state.jwt.verify_token(token)?.sub
    };

    Ok(RequestContext {
        username,
        session_credential,
        node_id: state.args.node_id.to_string(),
        base_url: state.args.public_url(),
    })
}

/// Map a failed operation to its wire form: validation-class failures are
/// reported in the body, everything else as an HTTP error status.
fn failure_response(err: ArchwayError) -> Response<Full<Bytes>> {
    if err.is_validation_failure() {
        json_response(
            StatusCode::OK,
            &serde_json::json!({ "OK": false, "msg": err.to_string() }),
        )
    } else {
        error_response(err.status_code(), &err.to_string())
    }
}

/// Read and parse the request body as an envelope.
async fn read_envelope(req: Request<Incoming>) -> Result<Envelope> {
    let bytes = req
        .collect()
        .await
        .map_err(|e| ArchwayError::MalformedBody(format!("Failed to read body: {}", e)))?
        .to_bytes();
    Envelope::from_slice(&bytes)
        .map_err(|_| ArchwayError::MalformedBody("Body must contain valid json".into()))
}

/// PUT /envelopes
pub async fn handle_create(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let ctx = match authenticate(&state, req.headers()) {
        Ok(ctx) => ctx,
        Err(e) => return failure_response(e),
    };
    let envelope = match read_envelope(req).await {
        Ok(env) => env,
        Err(e) => return failure_response(e),
    };

    match state.lifecycle.create(envelope, &ctx).await {
        Ok(receipt) => json_response(
            StatusCode::OK,
            &serde_json::json!({ "OK": true, "doc_ID": receipt.doc_id }),
        ),
        Err(e) => failure_response(e),
    }
}

/// POST /envelopes/{id}
pub async fn handle_update(
    state: Arc<AppState>,
    doc_id: &str,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let ctx = match authenticate(&state, req.headers()) {
        Ok(ctx) => ctx,
        Err(e) => return failure_response(e),
    };
    let envelope = match read_envelope(req).await {
        Ok(env) => env,
        Err(e) => return failure_response(e),
    };

    match state.lifecycle.update(doc_id, envelope, &ctx).await {
        Ok(receipt) => json_response(
            StatusCode::OK,
            &serde_json::json!({ "OK": true, "doc_ID": receipt.doc_id }),
        ),
        Err(e) => failure_response(e),
    }
}

/// DELETE /envelopes/{id}
pub async fn handle_delete(
    state: Arc<AppState>,
    doc_id: &str,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let ctx = match authenticate(&state, req.headers()) {
        Ok(ctx) => ctx,
        Err(e) => return failure_response(e),
    };

    match state.lifecycle.delete(doc_id, &ctx).await {
        Ok(()) => json_response(StatusCode::OK, &serde_json::json!({ "OK": true })),
        Err(e) => failure_response(e),
    }
}

/// GET /envelopes/{id} - direct read; tombstones stay retrievable here.
pub async fn handle_read(state: Arc<AppState>, doc_id: &str) -> Response<Full<Bytes>> {
    match state.lifecycle.read(doc_id).await {
        Ok(envelope) => json_response(StatusCode::OK, &envelope),
        Err(e) => failure_response(e),
    }
}

/// Parse a query string into a key-value map, percent-decoding values.
/// A value that fails to decode is a client error, not a silently dropped
/// parameter.
fn parse_query_params(query: &str) -> Result<HashMap<String, String>> {
    if query.is_empty() {
        return Ok(HashMap::new());
    }

    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or("");
            let value = parts.next().unwrap_or("");
            let value = urlencoding::decode(value)
                .map_err(|_| {
                    ArchwayError::MalformedBody(format!("Invalid percent-encoding in {}", key))
                })?
                .into_owned();
            Ok((key.to_string(), value))
        })
        .collect()
}

/// GET /envelopes - time-ranged harvest, relayed from the store without
/// buffering. Dropping the response (client disconnect) aborts the
/// upstream scan.
pub async fn handle_harvest(state: Arc<AppState>, query: Option<&str>) -> Response<ArchBody> {
    let params = match parse_query_params(query.unwrap_or("")) {
        Ok(params) => params,
        Err(e) => return to_boxed(failure_response(e)),
    };

    let scan = match harvest::build_query(&params, &state.harvest) {
        Ok(scan) => scan,
        Err(e) => return to_boxed(failure_response(e)),
    };

    debug!(
        start_key = scan.start_key,
        end_key = scan.end_key,
        skip = ?scan.skip,
        mode = scan.list_mode(),
        "Harvest scan"
    );

    match state.store.range_scan(&scan).await {
        Ok(stream) => {
            let body = StreamBody::new(stream.map_ok(Frame::data));
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(ArchBody::new(body))
                .unwrap_or_else(|_| {
                    to_boxed(failure_response(ArchwayError::Internal(
                        "Response build failed".into(),
                    )))
                })
        }
        Err(e) => to_boxed(failure_response(e)),
    }
}
