#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use stashdb_core::{
    EncodingErrors, KeyCodec, KeyPolicy, NormalizationForm, RawKey, TextEncoding,
};

#[derive(Arbitrary, Debug)]
struct Input {
    encoding: u8,
    errors: u8,
    normalize: u8,
    text: String,
    bytes: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let encoding = match input.encoding % 4 {
        0 => None,
        1 => Some(TextEncoding::Utf8),
        2 => Some(TextEncoding::Latin1),
        _ => Some(TextEncoding::Ascii),
    };
    let errors = match input.errors % 3 {
        0 => EncodingErrors::Strict,
        1 => EncodingErrors::Replace,
        _ => EncodingErrors::Ignore,
    };
    let normalize = match input.normalize % 5 {
        0 => None,
        1 => Some(NormalizationForm::Nfc),
        2 => Some(NormalizationForm::Nfd),
        3 => Some(NormalizationForm::Nfkc),
        _ => Some(NormalizationForm::Nfkd),
    };
    let codec = KeyCodec::new(KeyPolicy {
        encoding,
        errors,
        normalize,
    });

    // Byte keys always pass through unchanged
    let canonical = codec.canonicalize(RawKey::Bytes(&input.bytes)).unwrap();
    assert_eq!(canonical.as_bytes(), &input.bytes[..]);

    // Text keys may be rejected, but must never panic
    if let Ok(key) = codec.canonicalize(RawKey::Text(&input.text)) {
        let _ = codec.decanonicalize(key.as_bytes());
        let _ = stashdb_core::display_key(key.as_bytes());
    }
    let _ = codec.decanonicalize(&input.bytes);
});
