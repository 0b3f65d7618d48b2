//! Text normalization shared by the source parsers
//!
//! Publisher exports are full of hard line breaks inside headings, legacy
//! code pages and identifiers built from free text. These helpers turn such
//! values into something stable enough to compare across imports.

use regex::Regex;
use std::sync::OnceLock;

/// ASCII whitespace only; non-breaking spaces are content in these exports.
#[allow(clippy::expect_used)]
fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t\n\r\x0B\x0C]+").expect("static pattern"))
}

#[allow(clippy::expect_used)]
fn non_identifier_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^0-9A-Za-z_]+").expect("static pattern"))
}

/// Replace every whitespace run with a single space, without trimming.
pub fn collapse_whitespace(value: &str) -> String {
    whitespace_run().replace_all(value, " ").into_owned()
}

/// Trim and collapse internal whitespace runs to one space.
pub fn ensure_single_line(value: &str) -> String {
    collapse_whitespace(trim_ascii(value))
}

/// Trim ASCII whitespace at both ends.
pub fn trim_ascii(value: &str) -> &str {
    value.trim_matches(is_ascii_space)
}

fn is_ascii_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0B' | '\x0C')
}

/// Append a heading part that was split over several source nodes.
pub fn append_single_line(target: &mut String, part: &str) {
    let part = ensure_single_line(part);
    if part.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(&part);
}

/// True for strings made up of ASCII whitespace only (or empty).
pub fn is_blank(value: &str) -> bool {
    value.chars().all(is_ascii_space)
}

/// Fold accented Latin letters to their closest ASCII spelling.
pub fn fold_accents(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match fold_char(c) {
            Some(folded) => out.push_str(folded),
            None => out.push(c),
        }
    }
    out
}

fn fold_char(c: char) -> Option<&'static str> {
    let folded = match c {
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => "A",
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'Æ' => "AE",
        'æ' => "ae",
        'Ç' | 'Ć' | 'Ĉ' | 'Ċ' | 'Č' => "C",
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => "c",
        'Ď' | 'Đ' | 'Ð' => "D",
        'ď' | 'đ' | 'ð' => "d",
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ĕ' | 'Ė' | 'Ę' | 'Ě' => "E",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => "e",
        'Ĝ' | 'Ğ' | 'Ġ' | 'Ģ' => "G",
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => "g",
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ĩ' | 'Ī' | 'Ĭ' | 'Į' | 'İ' => "I",
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => "i",
        'Ł' | 'Ĺ' | 'Ļ' | 'Ľ' => "L",
        'ł' | 'ĺ' | 'ļ' | 'ľ' => "l",
        'Ñ' | 'Ń' | 'Ņ' | 'Ň' => "N",
        'ñ' | 'ń' | 'ņ' | 'ň' => "n",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' | 'Ŏ' | 'Ő' => "O",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => "o",
        'Œ' => "OE",
        'œ' => "oe",
        'Ŕ' | 'Ŗ' | 'Ř' => "R",
        'ŕ' | 'ŗ' | 'ř' => "r",
        'Ś' | 'Ŝ' | 'Ş' | 'Š' => "S",
        'ś' | 'ŝ' | 'ş' | 'š' => "s",
        'ß' => "ss",
        'Ţ' | 'Ť' => "T",
        'ţ' | 'ť' => "t",
        'Þ' => "TH",
        'þ' => "th",
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ũ' | 'Ū' | 'Ŭ' | 'Ů' | 'Ű' | 'Ų' => "U",
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => "u",
        'Ý' | 'Ÿ' => "Y",
        'ý' | 'ÿ' => "y",
        'Ź' | 'Ż' | 'Ž' => "Z",
        'ź' | 'ż' | 'ž' => "z",
        _ => return None,
    };
    Some(folded)
}

/// Replace every run of characters outside `[0-9A-Za-z_]` with `_`.
pub fn sanitize_identifier(value: &str) -> String {
    non_identifier_run().replace_all(value, "_").into_owned()
}

/// Cut to at most `max` bytes, backing off to a char boundary.
pub fn truncate_bytes(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Decode bytes as UTF-8, reading them as Latin-1 when they are not valid UTF-8.
pub fn decode_utf8_or_latin1(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => raw.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Code page 1252 byte for a character, if it has one.
pub fn to_cp1252_byte(c: char) -> Option<u8> {
    let byte = match c {
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        c if (c as u32) < 0x80 || (0xA0..=0xFF).contains(&(c as u32)) => c as u32 as u8,
        _ => return None,
    };
    Some(byte)
}

/// Encode a string in code page 1252; `None` when a character has no mapping.
pub fn encode_cp1252(value: &str) -> Option<Vec<u8>> {
    value.chars().map(to_cp1252_byte).collect()
}

/// ISO-8859-15 byte for a character, if it has one.
fn to_latin9_byte(c: char) -> Option<u8> {
    let byte = match c {
        '€' => 0xA4,
        'Š' => 0xA6,
        'š' => 0xA8,
        'Ž' => 0xB4,
        'ž' => 0xB8,
        'Œ' => 0xBC,
        'œ' => 0xBD,
        'Ÿ' => 0xBE,
        '\u{A4}' | '\u{A6}' | '\u{A8}' | '\u{B4}' | '\u{B8}' | '\u{BC}' | '\u{BD}' | '\u{BE}' => {
            return None
        }
        c if (c as u32) <= 0xFF => c as u32 as u8,
        _ => return None,
    };
    Some(byte)
}

/// Undo one level of UTF-8 double encoding that went through ISO-8859-15.
///
/// Returns `None` when the input cannot be narrowed to ISO-8859-15 or the
/// narrowed bytes are not valid UTF-8, i.e. the text was not double encoded.
pub fn repair_double_utf8(value: &str) -> Option<String> {
    let narrowed: Option<Vec<u8>> = value.chars().map(to_latin9_byte).collect();
    String::from_utf8(narrowed?).ok()
}

/// Repair only the double-encoded sequences of a partially double-encoded text.
///
/// Every run of characters whose ISO-8859-15 bytes form one valid UTF-8
/// sequence is replaced by the decoded character; everything else is kept.
pub fn repair_double_utf8_runs(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut out = String::with_capacity(value.len());
    let mut i = 0;
    while i < chars.len() {
        match repair_sequence(&chars[i..]) {
            Some((repaired, width)) => {
                out.push(repaired);
                i += width;
            },
            None => {
                out.push(chars[i]);
                i += 1;
            },
        }
    }
    out
}

fn repair_sequence(chars: &[char]) -> Option<(char, usize)> {
    let width = match to_latin9_byte(*chars.first()?)? {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return None,
    };
    let bytes: Vec<u8> = chars
        .get(..width)?
        .iter()
        .map(|&c| to_latin9_byte(c))
        .collect::<Option<_>>()?;
    let decoded = std::str::from_utf8(&bytes).ok()?.chars().next()?;
    Some((decoded, width))
}
