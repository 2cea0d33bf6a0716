//! Archway - signed envelope registry gateway
//!
//! Archway fronts a CouchDB-style document store with an HTTP API for
//! publishing, retiring, and harvesting signed metadata envelopes.
//!
//! ## Services
//!
//! - **Lifecycle**: create / retire-and-replace / tombstone of envelopes
//! - **Signing**: Ed25519 signature production and verification, scheme
//!   selected by the envelope's declared doc_version
//! - **Harvest**: time-ranged, paginated listings streamed from the store
//! - **Keys**: public key resource backing signature key_location URLs

pub mod auth;
pub mod authz;
pub mod config;
pub mod envelope;
pub mod harvest;
pub mod keyring;
pub mod lifecycle;
pub mod routes;
pub mod server;
pub mod signer;
pub mod signing;
pub mod store;
pub mod types;
pub mod validate;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{ArchwayError, Result};
