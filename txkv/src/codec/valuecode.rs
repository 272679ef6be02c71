use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CResult;

/// Encodes a typed map value into its stored byte form. Values use bincode
/// rather than the key encoding: they are never compared bytewise, so the
/// compact representation wins.
pub fn encode<T: Serialize>(value: &T) -> CResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decodes a typed map value from its stored byte form.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CResult<T> {
    Ok(bincode::deserialize(bytes)?)
}
