//! Key canonicalization.
//!
//! Every key entering the store, whether raw bytes or text, is mapped to
//! exactly one [`CanonicalKey`] before any lookup, comparison, or write.
//! Text keys are only accepted when a [`TextEncoding`] is configured, and
//! may be Unicode-normalized first so that visually identical strings land
//! on the same entry.

use crate::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::borrow::{Borrow, Cow};
use unicode_normalization::UnicodeNormalization;

/// Maximum number of characters of a text key shown in error messages.
const DISPLAY_TEXT_LIMIT: usize = 50;
/// Maximum number of bytes of a binary key shown in error messages.
const DISPLAY_HEX_LIMIT: usize = 16;

/// The single byte-sequence form every key is normalized to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalKey(Bytes);

impl CanonicalKey {
    /// Wraps bytes that are already canonical.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        CanonicalKey(bytes.into())
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the key in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty key.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for CanonicalKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8]> for CanonicalKey {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

/// A key as supplied by a caller, before canonicalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKey<'a> {
    /// Raw bytes, stored unchanged
    Bytes(&'a [u8]),
    /// Text, encoded with the configured [`TextEncoding`]
    Text(&'a str),
}

impl RawKey<'_> {
    /// Copies the key into its owned form, preserving bytes vs. text.
    pub fn to_owned_key(&self) -> OwnedKey {
        match self {
            RawKey::Bytes(b) => OwnedKey::Bytes(b.to_vec()),
            RawKey::Text(s) => OwnedKey::Text((*s).to_string()),
        }
    }
}

/// Types that can be used as store keys.
pub trait AsRawKey {
    /// Borrows `self` as a [`RawKey`].
    fn as_raw_key(&self) -> RawKey<'_>;
}

impl AsRawKey for [u8] {
    fn as_raw_key(&self) -> RawKey<'_> {
        RawKey::Bytes(self)
    }
}

impl<const N: usize> AsRawKey for [u8; N] {
    fn as_raw_key(&self) -> RawKey<'_> {
        RawKey::Bytes(self)
    }
}

impl AsRawKey for Vec<u8> {
    fn as_raw_key(&self) -> RawKey<'_> {
        RawKey::Bytes(self)
    }
}

impl AsRawKey for Bytes {
    fn as_raw_key(&self) -> RawKey<'_> {
        RawKey::Bytes(self)
    }
}

impl AsRawKey for str {
    fn as_raw_key(&self) -> RawKey<'_> {
        RawKey::Text(self)
    }
}

impl AsRawKey for String {
    fn as_raw_key(&self) -> RawKey<'_> {
        RawKey::Text(self)
    }
}

impl AsRawKey for RawKey<'_> {
    fn as_raw_key(&self) -> RawKey<'_> {
        *self
    }
}

impl AsRawKey for OwnedKey {
    fn as_raw_key(&self) -> RawKey<'_> {
        match self {
            OwnedKey::Bytes(b) => RawKey::Bytes(b),
            OwnedKey::Text(s) => RawKey::Text(s),
        }
    }
}

impl<T: AsRawKey + ?Sized> AsRawKey for &T {
    fn as_raw_key(&self) -> RawKey<'_> {
        (**self).as_raw_key()
    }
}

/// An owned key handed back to callers by multi-key reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OwnedKey {
    /// Byte form
    Bytes(Vec<u8>),
    /// Text form
    Text(String),
}

impl From<&str> for OwnedKey {
    fn from(s: &str) -> Self {
        OwnedKey::Text(s.to_string())
    }
}

impl From<&[u8]> for OwnedKey {
    fn from(b: &[u8]) -> Self {
        OwnedKey::Bytes(b.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for OwnedKey {
    fn from(b: &[u8; N]) -> Self {
        OwnedKey::Bytes(b.to_vec())
    }
}

/// Text encoding applied to text keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    /// UTF-8
    Utf8,
    /// ISO-8859-1: code points up to U+00FF, one byte each
    Latin1,
    /// 7-bit ASCII
    Ascii,
}

/// What to do with characters or bytes the encoding cannot represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EncodingErrors {
    /// Fail with [`Error::KeyEncode`]
    #[default]
    Strict,
    /// Substitute `?` when encoding and U+FFFD when decoding
    Replace,
    /// Drop the offending character or byte
    Ignore,
}

/// Unicode normalization form applied to text keys before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizationForm {
    /// Canonical composition
    Nfc,
    /// Canonical decomposition
    Nfd,
    /// Compatibility composition
    Nfkc,
    /// Compatibility decomposition
    Nfkd,
}

/// Key normalization policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyPolicy {
    /// Encoding for text keys; `None` rejects text keys
    pub encoding: Option<TextEncoding>,
    /// Error policy for encoding and decoding
    pub errors: EncodingErrors,
    /// Optional normalization applied before encoding
    pub normalize: Option<NormalizationForm>,
}

impl KeyPolicy {
    /// Byte keys only.
    pub fn bytes_only() -> Self {
        Self::default()
    }

    /// Accept UTF-8 text keys.
    pub fn utf8() -> Self {
        Self {
            encoding: Some(TextEncoding::Utf8),
            ..Default::default()
        }
    }

    /// Set the text encoding
    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Set the encoding error policy
    pub fn with_errors(mut self, errors: EncodingErrors) -> Self {
        self.errors = errors;
        self
    }

    /// Set the normalization form
    pub fn with_normalization(mut self, form: NormalizationForm) -> Self {
        self.normalize = Some(form);
        self
    }
}

/// Maps raw keys to canonical keys and back.
#[derive(Debug, Clone, Default)]
pub struct KeyCodec {
    policy: KeyPolicy,
}

impl KeyCodec {
    /// Creates a codec for the given policy.
    pub fn new(policy: KeyPolicy) -> Self {
        Self { policy }
    }

    /// The policy this codec applies.
    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    /// Returns true if text keys can be rendered back from canonical bytes.
    pub fn decodes_text(&self) -> bool {
        self.policy.encoding.is_some()
    }

    /// Canonicalizes a raw key.
    pub fn canonicalize(&self, key: RawKey<'_>) -> Result<CanonicalKey> {
        match key {
            RawKey::Bytes(b) => Ok(CanonicalKey(Bytes::copy_from_slice(b))),
            RawKey::Text(s) => {
                let encoding = self.policy.encoding.ok_or_else(|| {
                    Error::KeyEncode(
                        "text keys are not allowed (configure a text encoding to enable them)"
                            .to_string(),
                    )
                })?;
                let text = self.normalize(s);
                encode_text(&text, encoding, self.policy.errors).map(|b| CanonicalKey(b.into()))
            }
        }
    }

    /// Renders canonical bytes back into text with the configured encoding.
    pub fn decanonicalize(&self, key: &[u8]) -> Result<String> {
        let encoding = self.policy.encoding.ok_or_else(|| {
            Error::Config("key decoding requested but no text encoding is set".to_string())
        })?;
        decode_text(key, encoding, self.policy.errors)
    }

    fn normalize<'a>(&self, s: &'a str) -> Cow<'a, str> {
        match self.policy.normalize {
            None => Cow::Borrowed(s),
            Some(NormalizationForm::Nfc) => Cow::Owned(s.nfc().collect()),
            Some(NormalizationForm::Nfd) => Cow::Owned(s.nfd().collect()),
            Some(NormalizationForm::Nfkc) => Cow::Owned(s.nfkc().collect()),
            Some(NormalizationForm::Nfkd) => Cow::Owned(s.nfkd().collect()),
        }
    }
}

fn encode_text(s: &str, encoding: TextEncoding, errors: EncodingErrors) -> Result<Vec<u8>> {
    let limit = match encoding {
        TextEncoding::Utf8 => return Ok(s.as_bytes().to_vec()),
        TextEncoding::Latin1 => 0xFF,
        TextEncoding::Ascii => 0x7F,
    };

    let mut out = Vec::with_capacity(s.len());
    for (pos, ch) in s.chars().enumerate() {
        let code = ch as u32;
        if code <= limit {
            out.push(code as u8);
            continue;
        }
        match errors {
            EncodingErrors::Strict => {
                return Err(Error::KeyEncode(format!(
                    "{:?} cannot encode character {:?} at position {}",
                    encoding, ch, pos
                )))
            }
            EncodingErrors::Replace => out.push(b'?'),
            EncodingErrors::Ignore => {}
        }
    }
    Ok(out)
}

fn decode_text(bytes: &[u8], encoding: TextEncoding, errors: EncodingErrors) -> Result<String> {
    match encoding {
        TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        TextEncoding::Ascii => {
            let mut out = String::with_capacity(bytes.len());
            for (pos, &b) in bytes.iter().enumerate() {
                if b.is_ascii() {
                    out.push(b as char);
                    continue;
                }
                match errors {
                    EncodingErrors::Strict => {
                        return Err(Error::KeyEncode(format!(
                            "Ascii cannot decode byte 0x{:02x} at position {}",
                            b, pos
                        )))
                    }
                    EncodingErrors::Replace => out.push(char::REPLACEMENT_CHARACTER),
                    EncodingErrors::Ignore => {}
                }
            }
            Ok(out)
        }
        TextEncoding::Utf8 => {
            let mut out = String::with_capacity(bytes.len());
            for chunk in bytes.utf8_chunks() {
                out.push_str(chunk.valid());
                if chunk.invalid().is_empty() {
                    continue;
                }
                match errors {
                    EncodingErrors::Strict => {
                        return Err(Error::KeyEncode(format!(
                            "invalid UTF-8 in key {}",
                            display_key(bytes)
                        )))
                    }
                    EncodingErrors::Replace => out.push(char::REPLACEMENT_CHARACTER),
                    EncodingErrors::Ignore => {}
                }
            }
            Ok(out)
        }
    }
}

/// Human-readable rendering of canonical key bytes for error messages.
///
/// Printable UTF-8 of at most 50 characters is shown quoted; anything else
/// is shown as hex, truncated after 16 bytes.
pub fn display_key(key: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(key) {
        if text.chars().count() <= DISPLAY_TEXT_LIMIT && text.chars().all(is_printable) {
            return format!("'{}'", text);
        }
    }
    if key.len() <= DISPLAY_HEX_LIMIT {
        format!("0x{}", hex::encode(key))
    } else {
        format!("0x{}...({} bytes)", hex::encode(&key[..8]), key.len())
    }
}

/// Human-readable rendering of a raw key, keeping text keys as text.
pub fn display_raw_key(key: RawKey<'_>) -> String {
    match key {
        RawKey::Bytes(b) => display_key(b),
        RawKey::Text(s) if s.chars().count() <= DISPLAY_TEXT_LIMIT => format!("'{}'", s),
        RawKey::Text(s) => {
            let head: String = s.chars().take(DISPLAY_TEXT_LIMIT - 3).collect();
            format!("'{}...'", head)
        }
    }
}

/// Printable means not a control, separator (other than ' '), format or
/// private-use char. Every space and line/paragraph separator is whitespace.
fn is_printable(c: char) -> bool {
    if c == ' ' {
        return true;
    }
    !(c.is_control() || c.is_whitespace() || is_format(c) || is_private_use(c))
}

fn is_private_use(c: char) -> bool {
    matches!(
        c,
        '\u{E000}'..='\u{F8FF}' | '\u{F0000}'..='\u{FFFFD}' | '\u{100000}'..='\u{10FFFD}'
    )
}

// Unicode general category Cf
fn is_format(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{0600}'..='\u{0605}'
            | '\u{061C}'
            | '\u{06DD}'
            | '\u{070F}'
            | '\u{0890}'..='\u{0891}'
            | '\u{08E2}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{206F}'
            | '\u{FEFF}'
            | '\u{FFF9}'..='\u{FFFB}'
            | '\u{110BD}'
            | '\u{110CD}'
            | '\u{13430}'..='\u{1343F}'
            | '\u{1BCA0}'..='\u{1BCA3}'
            | '\u{1D173}'..='\u{1D17A}'
            | '\u{E0001}'
            | '\u{E0020}'..='\u{E007F}'
    )
}
