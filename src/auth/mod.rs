//! Authentication plumbing and the per-request identity context
//!
//! The routing/permission layer proper is outside the core; this module is
//! the thin seam that turns an inbound request into a [`RequestContext`]:
//! the authenticated username, an opaque forwarded session credential, and
//! the serving node's own identity. Tokens are HS256 JWTs; dev mode accepts
//! an `X-Remote-User` header instead.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::{ArchwayError, Result};

/// Payload stored in an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated username
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// JWT validator and generator
#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
    expiry_seconds: u64,
}

impl JwtValidator {
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self> {
        if secret.len() < 32 {
            return Err(ArchwayError::Config(
                "JWT_SECRET must be at least 32 characters".into(),
            ));
        }
        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Validator for dev mode (fixed insecure secret).
    pub fn new_dev() -> Self {
        Self {
            secret: "dev-mode-secret-not-for-production-use-123456".into(),
            expiry_seconds: 3600,
        }
    }

    /// Generate a token for an authenticated username.
    pub fn generate_token(&self, username: &str) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ArchwayError::Internal(format!("System time error: {}", e)))?
            .as_secs();

        let claims = Claims {
            sub: username.to_string(),
            iat: now,
            exp: now + self.expiry_seconds,
        };

        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?)
    }

    /// Verify and decode a token, returning its claims.
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|err| {
            use jsonwebtoken::errors::ErrorKind;
            let msg = match err.kind() {
                ErrorKind::ExpiredSignature => "Token expired",
                ErrorKind::InvalidSignature => "Invalid signature",
                _ => "Invalid token",
            };
            ArchwayError::Unauthorized(msg.into())
        })?;
        Ok(data.claims)
    }
}

/// Extract token from an Authorization header ("Bearer <token>").
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let token = auth_header?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Identity context supplied to the core per request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Authenticated username
    pub username: String,

    /// Opaque session credential forwarded to the store on writes
    pub session_credential: Option<String>,

    /// The serving node's own identifier, stamped into envelopes
    pub node_id: String,

    /// Public base URL of this node, used to build key-location links
    pub base_url: String,
}

impl RequestContext {
    /// Dereferenceable URL of the requester's public key resource.
    pub fn user_key_url(&self) -> String {
        format!(
            "{}/keys/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.username)
        )
    }

    pub fn credential(&self) -> Option<&str> {
        self.session_credential.as_deref()
    }
}
