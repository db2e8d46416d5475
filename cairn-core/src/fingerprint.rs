//! Argument fingerprints for the memoization cache.
//!
//! A call's positional and named arguments are canonicalized into a single
//! ordered structure, serialized through the canonical encoding, and hashed.
//! The fingerprint is the first 128 bits of the SHA-256 digest, hex-encoded,
//! giving a stable 32-character Redis hash field name.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::encoding::encode_value;
use crate::error::{Error, Result};

/// Bytes of the SHA-256 digest kept in a fingerprint.
const FINGERPRINT_BYTES: usize = 16;

/// The arguments of a single cached call.
///
/// Named arguments are held in a `BTreeMap`, so insertion order never leaks
/// into the fingerprint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    named: BTreeMap<String, Value>,
}

impl CallArgs {
    /// Create an empty argument list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the value is not representable.
    pub fn arg<T: Serialize>(mut self, value: T) -> Result<Self> {
        let value = serde_json::to_value(value).map_err(|e| Error::Encoding(e.to_string()))?;
        self.positional.push(value);
        Ok(self)
    }

    /// Set a named argument.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the value is not representable.
    pub fn named<T: Serialize>(mut self, name: impl Into<String>, value: T) -> Result<Self> {
        let value = serde_json::to_value(value).map_err(|e| Error::Encoding(e.to_string()))?;
        self.named.insert(name.into(), value);
        Ok(self)
    }

    /// Positional arguments, in call order.
    #[must_use]
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// Named arguments, sorted by name.
    #[must_use]
    pub fn named_args(&self) -> &BTreeMap<String, Value> {
        &self.named
    }

    /// The deterministic fingerprint of these arguments.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let canonical = Value::Object(
            [
                ("args".to_owned(), Value::Array(self.positional.clone())),
                (
                    "kwargs".to_owned(),
                    Value::Object(self.named.clone().into_iter().collect()),
                ),
            ]
            .into_iter()
            .collect(),
        );

        let mut hasher = Sha256::new();
        hasher.update(encode_value(&canonical).as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..FINGERPRINT_BYTES])
    }
}
