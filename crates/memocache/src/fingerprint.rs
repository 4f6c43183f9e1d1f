//! Cache key derivation
//!
//! A key is `"{operation}:{sha256}"` over a canonical JSON encoding of
//! `[operation, [positional...], {keyword...}]`. Positional order matters,
//! keyword order does not, and every object is re-emitted with sorted keys so
//! hash-ordered maps encode the same way on every call. Values the encoding
//! would collapse (non-finite floats) are rejected, and `Some(v)` is tagged
//! so it never encodes like `None`.

use std::collections::BTreeMap;

use memostore::CacheKey;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::strict::Strict;

/// Builder for a cache key
#[derive(Debug, Clone)]
pub struct Fingerprint {
    operation: String,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
}

impl Fingerprint {
    /// Start a key for `operation`
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    /// Append a positional argument
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let encoded = self.encode(value)?;
        self.args.push(encoded);
        Ok(self)
    }

    /// Add a keyword argument
    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Result<Self> {
        let encoded = self.encode(value)?;
        if self.kwargs.insert(name.to_string(), encoded).is_some() {
            return Err(Error::UnfingerprintableArgument {
                operation: self.operation,
                reason: format!("keyword '{name}' given twice"),
            });
        }
        Ok(self)
    }

    /// Produce the key
    pub fn finish(self) -> CacheKey {
        let kwargs: Map<String, Value> = self.kwargs.into_iter().collect();
        let canonical = Value::Array(vec![
            Value::String(self.operation.clone()),
            Value::Array(self.args),
            Value::Object(kwargs),
        ]);

        let digest = Sha256::digest(canonical.to_string().as_bytes());
        format!("{}:{}", self.operation, hex::encode(digest))
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Value> {
        serde_json::to_value(Strict(value))
            .map(canonicalize)
            .map_err(|e| Error::UnfingerprintableArgument {
                operation: self.operation.clone(),
                reason: e.to_string(),
            })
    }
}

/// Key for `operation` called with a single argument value
///
/// Tuples serialize as arrays, so `(a, b)` behaves like two positional
/// arguments; structs serialize as objects and so behave like keywords.
pub fn fingerprint<A: Serialize + ?Sized>(operation: &str, args: &A) -> Result<CacheKey> {
    Ok(Fingerprint::new(operation).arg(args)?.finish())
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(String, Value)> = map.into_iter().collect();
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
