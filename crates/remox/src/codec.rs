//! Wire codec for shipped payloads
//!
//! MessagePack is the default backend; bincode is available behind the
//! `bincode` feature for callers standardizing on it. Shipped code units and
//! values round-trip; captured context never serializes.

use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(all(feature = "bincode", not(feature = "rmp-serde")))]
use crate::error::RemoxError;
use crate::Result;

/// Encodes a value with the configured backend
#[cfg(feature = "rmp-serde")]
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(value)?)
}

/// Decodes a value with the configured backend
#[cfg(feature = "rmp-serde")]
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Encodes a value with the configured backend
#[cfg(all(feature = "bincode", not(feature = "rmp-serde")))]
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| RemoxError::Serialization(format!("bincode encode error: {}", e)))
}

/// Decodes a value with the configured backend
#[cfg(all(feature = "bincode", not(feature = "rmp-serde")))]
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| RemoxError::Serialization(format!("bincode decode error: {}", e)))
}
