//! Value Codec
//!
//! Application values are stored as JSON. Integers encode as bare decimal
//! text, so values written by `set` can be moved with INCRBY/DECRBY and read
//! back by `get`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encodes a value for storage.
pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decodes a stored value.
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}
