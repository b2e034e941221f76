//! # StashDB Core
//!
//! Core types and traits for StashDB: the error taxonomy, key
//! canonicalization, value serializers, and the storage engine seam.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod format_version;
pub mod key;
pub mod serializer;

pub use engine::{EnvInfo, Environment, ReadTxn, WriteTxn};
pub use error::{CodecError, EngineError, EngineResult, Error, Result, ValueOrigin};
pub use key::{
    display_key, display_raw_key, AsRawKey, CanonicalKey, EncodingErrors, KeyCodec, KeyPolicy,
    NormalizationForm, OwnedKey, RawKey, TextEncoding,
};
pub use serializer::{Bincode, Json, Serializer};
