//! Public key resource
//!
//! `GET /keys/{username}` serves the public halves of a user's registered
//! keys. This is the dereference target of the `key_location` URLs the
//! gateway writes into signatures it produces.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::server::AppState;

#[derive(Serialize)]
struct PublicKeyEntry {
    key_id: String,
    uids: Vec<String>,
    /// Base64-encoded Ed25519 public key
    public_key: String,
}

#[derive(Serialize)]
struct UserKeysResponse {
    username: String,
    keys: Vec<PublicKeyEntry>,
}

pub async fn handle_user_keys(state: Arc<AppState>, username: &str) -> Response<Full<Bytes>> {
    let username = match urlencoding::decode(username) {
        Ok(u) => u.into_owned(),
        Err(_) => return super::error_response(StatusCode::BAD_REQUEST, "Invalid username encoding"),
    };

    let records = match state.keys.list_keys_for_user(&username).await {
        Ok(r) => r,
        Err(e) => return super::error_response(e.status_code(), &e.to_string()),
    };

    if records.is_empty() {
        return super::error_response(StatusCode::NOT_FOUND, "No keys registered for this user");
    }

    let response = UserKeysResponse {
        username,
        keys: records
            .iter()
            .map(|r| PublicKeyEntry {
                key_id: r.key_id.clone(),
                uids: r.uids.clone(),
                public_key: r.public_key_b64(),
            })
            .collect(),
    };

    super::json_response(StatusCode::OK, &response)
}
