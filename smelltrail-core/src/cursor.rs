//! Opaque pagination cursors.
//!
//! A cursor records which attributes a result set was sorted by and the
//! values of those attributes on one row. The JSON payload is base64-encoded
//! so clients treat it as an uninterpreted token; it is not a security
//! boundary.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::error::CursorError;

/// A record that can report the values of its sortable attributes.
pub trait CursorSource {
    /// The value of `attribute` as it would be compared in the store, or
    /// `None` if the record has no such attribute.
    fn cursor_value(&self, attribute: &str) -> Option<String>;
}

/// Attribute names a result set is ordered by, most significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortKey(&'static [&'static str]);

impl SortKey {
    pub const BY_ID: Self = Self(&["id"]);
    pub const BY_CHAIN_POSITION: Self = Self(&["lifespanId", "ordinal"]);

    pub const fn new(attributes: &'static [&'static str]) -> Self {
        Self(attributes)
    }

    pub fn attributes(&self) -> &'static [&'static str] {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The values of this key's attributes on `record`, in key order.
    pub fn values_of(&self, record: &impl CursorSource) -> Vec<Option<String>> {
        self.0.iter().map(|a| record.cursor_value(a)).collect()
    }

    fn matches(&self, names: &[String]) -> bool {
        self.0.len() == names.len() && self.0.iter().zip(names).all(|(a, b)| *a == b)
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

/// A decoded cursor: the sort key it was made for and the boundary row's values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCursor {
    pub key: SortKey,
    pub values: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct Payload {
    k: Vec<String>,
    v: Vec<Option<String>>,
}

/// Build the cursor for `record` under `key`.
pub fn encode(key: SortKey, record: &impl CursorSource) -> String {
    encode_values(key, key.values_of(record))
}

/// Build a cursor from raw attribute values.
pub fn encode_values(key: SortKey, values: Vec<Option<String>>) -> String {
    let payload = Payload {
        k: key.attributes().iter().map(ToString::to_string).collect(),
        v: values,
    };
    // Serializing a struct of strings cannot fail.
    let json = serde_json::to_vec(&payload).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode `cursor`, accepting only the sort keys in `allowed`.
pub fn decode(cursor: &str, allowed: &[SortKey]) -> Result<DecodedCursor, CursorError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor.trim())
        .map_err(|_| CursorError::Malformed)?;
    let payload: Payload = serde_json::from_slice(&bytes).map_err(|_| CursorError::Malformed)?;

    let key = allowed
        .iter()
        .copied()
        .find(|k| k.matches(&payload.k))
        .ok_or_else(|| CursorError::UnexpectedKey(payload.k.join(",")))?;

    let mut values = Vec::with_capacity(key.len());
    for (i, attribute) in key.attributes().iter().enumerate() {
        match payload.v.get(i) {
            Some(Some(v)) => values.push(v.clone()),
            _ => return Err(CursorError::MissingValue((*attribute).to_string())),
        }
    }

    Ok(DecodedCursor { key, values })
}
