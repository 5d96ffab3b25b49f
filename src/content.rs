//! Decoding and light normalization of fetched policy files
//!
//! Raw file bytes become catalog text here: binary payloads are rejected,
//! a leading byte-order mark is dropped, and line endings are unified so the
//! same file checked out on different platforms fingerprints identically.

const BOM: char = '\u{feff}';

/// Decodes raw file bytes into normalized text
///
/// Returns `None` for content that is not text: invalid UTF-8 or anything
/// containing NUL bytes.
pub fn decode_text(bytes: &[u8]) -> Option<String> {
    if bytes.contains(&0) {
        return None;
    }

    let text = std::str::from_utf8(bytes).ok()?;
    Some(normalize(text))
}

/// Normalizes text content: strips a BOM and converts CRLF / CR to LF
pub fn normalize(text: &str) -> String {
    let text = text.strip_prefix(BOM).unwrap_or(text);
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Detects the dominant natural language of a document by script
///
/// This is a coarse tag: documents are overwhelmingly English, so anything
/// without a clear majority of a non-Latin script is tagged `en`.
pub fn detect_language(text: &str) -> &'static str {
    let mut letters = 0usize;
    let mut han = 0usize;
    let mut kana = 0usize;
    let mut hangul = 0usize;
    let mut cyrillic = 0usize;

    for c in text.chars().filter(|c| c.is_alphabetic()) {
        letters += 1;
        match c as u32 {
            0x4E00..=0x9FFF | 0x3400..=0x4DBF => han += 1,
            0x3040..=0x30FF => kana += 1,
            0xAC00..=0xD7AF | 0x1100..=0x11FF => hangul += 1,
            0x0400..=0x04FF => cyrillic += 1,
            _ => {}
        }
    }

    if letters == 0 {
        return "en";
    }

    // A script wins once it makes up 30% of letters; code blocks and
    // identifiers keep Latin counts high even in non-English documents.
    let dominant = |count: usize| count * 10 >= letters * 3;

    if dominant(kana) || (kana > 0 && dominant(han + kana)) {
        "ja"
    } else if dominant(hangul) {
        "ko"
    } else if dominant(han) {
        "zh"
    } else if dominant(cyrillic) {
        "ru"
    } else {
        "en"
    }
}
