//! Value serializers.
//!
//! The store treats values as opaque byte blobs; a [`Serializer`] turns
//! caller values into those blobs and back.

use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Pluggable value encoding.
pub trait Serializer: Send + Sync {
    /// Encode a value into bytes
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes produced by [`Serializer::encode`]
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Compact binary encoding using `bincode`. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bincode;

impl Serializer for Bincode {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|e| CodecError(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError(e.to_string()))
    }
}

/// JSON encoding using `serde_json`; larger, but readable with external tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl Serializer for Json {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
        tags: Vec<String>,
        scores: BTreeMap<String, i64>,
        nickname: Option<String>,
    }

    fn profile_strategy() -> impl Strategy<Value = Profile> {
        (
            ".*",
            any::<u32>(),
            prop::collection::vec(".*", 0..4),
            prop::collection::btree_map(".*", any::<i64>(), 0..4),
            prop::option::of(".*"),
        )
            .prop_map(|(name, age, tags, scores, nickname)| Profile {
                name,
                age,
                tags,
                scores,
                nickname,
            })
    }

    #[test]
    fn test_bincode_rejects_truncated_input() {
        let bytes = Bincode.encode(&"hello".to_string()).unwrap();
        let result: Result<String, _> = Bincode.decode(&bytes[..bytes.len() - 1]);
        assert!(result.is_err());
    }

    #[test]
    fn test_json_rejects_garbage() {
        let result: Result<u32, _> = Json.decode(b"not json");
        assert!(result.is_err());
    }

    #[test]
    fn test_json_is_text() {
        let bytes = Json.encode(&vec![1, 2, 3]).unwrap();
        assert_eq!(bytes, b"[1,2,3]");
    }

    proptest! {
        #[test]
        fn prop_bincode_roundtrip(profile in profile_strategy()) {
            let bytes = Bincode.encode(&profile).unwrap();
            let decoded: Profile = Bincode.decode(&bytes).unwrap();
            prop_assert_eq!(decoded, profile);
        }

        #[test]
        fn prop_json_roundtrip(profile in profile_strategy()) {
            let bytes = Json.encode(&profile).unwrap();
            let decoded: Profile = Json.decode(&bytes).unwrap();
            prop_assert_eq!(decoded, profile);
        }
    }
}
