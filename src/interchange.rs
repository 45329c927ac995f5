//! Canonical JSON encoding used for anything that gets hashed or signed.
//!
//! Ordinary `serde_json` output is not byte-stable across implementations (key order, whitespace,
//! float formatting), so it cannot be hashed or signed directly. Everything that needs a stable
//! byte representation goes through [`canonicalize`].

use olpc_cjson::CanonicalFormatter;
use serde::Serialize;
use serde_json::Serializer;

use crate::Result;

/// Serializes `value` to its canonical JSON byte representation.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
    value.serialize(&mut ser)?;
    Ok(buf)
}
