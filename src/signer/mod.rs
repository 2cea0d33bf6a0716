//! Signer registry
//!
//! Maps a document-format version string to its signature scheme. Pure
//! dispatch, no I/O. Fails closed: a version without a registered scheme is
//! an error, never a default. Adding a scheme is a registry entry, not a
//! branch in callers.

pub mod scheme;

use std::collections::HashMap;
use std::sync::Arc;

pub use scheme::{Ed25519Scheme, SignerScheme};

use crate::types::{ArchwayError, Result};

/// Version-to-scheme dispatch table.
pub struct SignerRegistry {
    schemes: HashMap<String, Arc<dyn SignerScheme>>,
}

impl SignerRegistry {
    /// Empty registry; callers register schemes explicitly.
    pub fn new() -> Self {
        Self {
            schemes: HashMap::new(),
        }
    }

    /// Registry populated with the supported document-format versions.
    pub fn with_default_schemes() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Ed25519Scheme::new("0.21.0", true)));
        registry.register(Arc::new(Ed25519Scheme::new("0.23.0", true)));
        registry.register(Arc::new(Ed25519Scheme::new("0.49.0", true)));
        registry.register(Arc::new(Ed25519Scheme::new("0.51.0", false)));
        registry
    }

    pub fn register(&mut self, scheme: Arc<dyn SignerScheme>) {
        self.schemes.insert(scheme.version().to_string(), scheme);
    }

    /// Select the scheme for a document-format version.
    pub fn select(&self, version: &str) -> Result<Arc<dyn SignerScheme>> {
        self.schemes
            .get(version)
            .cloned()
            .ok_or_else(|| ArchwayError::UnsupportedSignerVersion(version.to_string()))
    }

    pub fn supported_versions(&self) -> Vec<&str> {
        self.schemes.keys().map(String::as_str).collect()
    }
}

impl Default for SignerRegistry {
    fn default() -> Self {
        Self::with_default_schemes()
    }
}
