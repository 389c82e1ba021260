//! Cache key derivation.
//!
//! Keys have the shape `{prefix}:v1:{provider}:{endpoint}:{digest}`. The digest
//! is SHA-256 over length-prefixed fields, so it is stable across processes and
//! distinct inputs cannot be spliced into the same byte stream.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::domain::RequestDescriptor;

const KEY_VERSION: &str = "v1";

/// A derived, backend-ready cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a descriptor under the given namespace prefix.
    pub fn derive(prefix: &str, descriptor: &RequestDescriptor) -> Self {
        let mut hasher = Sha256::new();
        write_field(&mut hasher, descriptor.provider().as_str().as_bytes());
        write_field(&mut hasher, descriptor.endpoint().as_str().as_bytes());
        for (name, value) in descriptor.params() {
            write_field(&mut hasher, name.as_bytes());
            write_field(&mut hasher, value.as_bytes());
        }
        // A lone trailing field; parameters always come in pairs.
        if let Some(language) = descriptor.language() {
            write_field(&mut hasher, language.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());

        Self(format!(
            "{prefix}:{KEY_VERSION}:{}:{}:{digest}",
            descriptor.provider(),
            descriptor.endpoint()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}
