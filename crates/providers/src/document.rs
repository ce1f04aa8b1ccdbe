//! Text extraction from uploaded documents.

use encoding_rs::{Encoding, WINDOWS_1252};

/// Decodes raw document bytes into text.
///
/// Honors a BOM when present, otherwise tries UTF-8 and falls back to
/// Windows-1252 so legacy exports still come through readable.
pub fn decode_document(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _, _) = encoding.decode(&bytes[bom_len..]);
        return text.into_owned();
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, _) = WINDOWS_1252.decode(bytes);
            text.into_owned()
        }
    }
}
