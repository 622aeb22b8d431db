//! gRPC trailers and the gRPC-Web trailer block codec.
//!
//! Over native HTTP/2, trailers arrive as header fields after the last
//! DATA frame. Over gRPC-Web they are embedded in the body as a single
//! trailer frame whose payload is an HTTP/1-style header block:
//!
//! ```text
//! grpc-status:0\r\n
//! grpc-message:ok\r\n
//! ```
//!
//! Names are case-insensitive (stored lowercased); the final CRLF is
//! optional. `grpc-message` values are percent-encoded on the wire.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use http::HeaderMap;

/// Trailer keys that must not repeat.
const SINGLE_VALUED: [&str; 2] = ["grpc-status", "grpc-message"];

/// Trailer block parse errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TrailerError {
    /// A line had no `:` separator.
    #[error("malformed trailer line {0:?}")]
    MalformedLine(String),

    /// A single-valued trailer appeared more than once.
    #[error("duplicate trailer {0:?}")]
    Duplicate(String),
}

/// Terminal key/value metadata for a call.
///
/// Keys are lowercase ASCII; repeated keys keep every value in arrival
/// order. The map is immutable once handed to callers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Trailers {
    entries: HashMap<String, Vec<String>>,
}

impl Trailers {
    /// Create an empty trailer map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key/value pair. Keys are normalized to lowercase.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().to_ascii_lowercase();
        self.entries.entry(key).or_default().push(value.into());
    }

    /// Get the first value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Get all values for a key.
    pub fn get_all(&self, key: &str) -> Option<&[String]> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    /// Check whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    /// Total number of values, counting duplicates.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Check whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    /// Build trailers from native HTTP/2 trailer headers.
    ///
    /// Non-UTF-8 values are skipped; the gRPC trailer contract is ASCII.
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let mut trailers = Trailers::new();
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                if name.as_str() == "grpc-message" {
                    trailers.insert(name.as_str(), percent_decode_message(value.as_bytes()));
                } else {
                    trailers.insert(name.as_str(), value);
                }
            }
        }
        trailers
    }

    /// Emit this map as a gRPC-Web trailer block.
    pub fn to_block(&self) -> Vec<u8> {
        let mut block = BytesMut::with_capacity(256);
        for (key, value) in self.iter() {
            block.put_slice(key.as_bytes());
            block.put_u8(b':');
            if key == "grpc-message" {
                block.put_slice(percent_encode_message(value).as_bytes());
            } else {
                block.put_slice(value.as_bytes());
            }
            block.put_slice(b"\r\n");
        }
        block.to_vec()
    }
}

/// Parse a gRPC-Web trailer block.
///
/// Lines are CRLF-delimited; each non-empty line splits on the first
/// `:`, both sides trimmed of ASCII whitespace, names lowercased. A
/// repeated `grpc-status` or `grpc-message` is rejected.
pub fn parse_trailer_block(block: &[u8]) -> Result<Trailers, TrailerError> {
    let mut trailers = Trailers::new();

    for line in block.split(|&b| b == b'\n') {
        let line = trim_ascii(strip_cr(line));
        if line.is_empty() {
            continue;
        }

        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| TrailerError::MalformedLine(String::from_utf8_lossy(line).into_owned()))?;

        let name = String::from_utf8_lossy(trim_ascii(&line[..colon])).to_ascii_lowercase();
        let raw_value = trim_ascii(&line[colon + 1..]);

        if SINGLE_VALUED.contains(&name.as_str()) && trailers.contains_key(&name) {
            return Err(TrailerError::Duplicate(name));
        }

        if name == "grpc-message" {
            trailers.insert(name, percent_decode_message(raw_value));
        } else {
            trailers.insert(name, String::from_utf8_lossy(raw_value).into_owned());
        }
    }

    Ok(trailers)
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Percent-decode a `grpc-message` value.
///
/// `%XX` sequences become raw bytes; anything else passes through. The
/// decoded bytes are interpreted as UTF-8, falling back to lossy
/// replacement so a garbled peer message still surfaces.
pub fn percent_decode_message(value: &[u8]) -> String {
    let mut decoded = Vec::with_capacity(value.len());
    let mut i = 0;

    while i < value.len() {
        if value[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                value.get(i + 1).copied().and_then(hex_value),
                value.get(i + 2).copied().and_then(hex_value),
            ) {
                decoded.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        decoded.push(value[i]);
        i += 1;
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

/// Percent-encode a `grpc-message` value for the wire.
///
/// The printable ASCII range minus `%` passes through; everything else
/// becomes `%XX`.
pub fn percent_encode_message(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        if (0x20..=0x7e).contains(&byte) && byte != b'%' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_block() {
        let trailers = parse_trailer_block(b"grpc-status:0\r\ngrpc-message:ok").unwrap();
        assert_eq!(trailers.get("grpc-status"), Some("0"));
        assert_eq!(trailers.get("grpc-message"), Some("ok"));
    }

    #[test]
    fn test_parse_trailing_crlf_optional() {
        let with = parse_trailer_block(b"grpc-status:0\r\n").unwrap();
        let without = parse_trailer_block(b"grpc-status:0").unwrap();
        assert_eq!(with, without);
    }

    #[test]
    fn test_parse_names_case_insensitive() {
        let trailers = parse_trailer_block(b"Grpc-Status: 0\r\n").unwrap();
        assert_eq!(trailers.get("grpc-status"), Some("0"));
        assert_eq!(trailers.get("GRPC-STATUS"), Some("0"));
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let trailers = parse_trailer_block(b"  grpc-status \t:  12  \r\n").unwrap();
        assert_eq!(trailers.get("grpc-status"), Some("12"));
    }

    #[test]
    fn test_parse_value_may_contain_colon() {
        let trailers = parse_trailer_block(b"x-note:a:b:c\r\n").unwrap();
        assert_eq!(trailers.get("x-note"), Some("a:b:c"));
    }

    #[test]
    fn test_parse_duplicate_status_rejected() {
        let err = parse_trailer_block(b"grpc-status:0\r\ngrpc-status:13\r\n").unwrap_err();
        assert_eq!(err, TrailerError::Duplicate("grpc-status".into()));
    }

    #[test]
    fn test_parse_duplicate_message_rejected() {
        let err =
            parse_trailer_block(b"grpc-message:a\r\nGrpc-Message:b\r\n").unwrap_err();
        assert_eq!(err, TrailerError::Duplicate("grpc-message".into()));
    }

    #[test]
    fn test_parse_repeated_custom_key_allowed() {
        let trailers = parse_trailer_block(b"x-tag:a\r\nx-tag:b\r\n").unwrap();
        assert_eq!(
            trailers.get_all("x-tag"),
            Some(&["a".to_string(), "b".to_string()][..])
        );
        assert_eq!(trailers.len(), 2);
    }

    #[test]
    fn test_parse_missing_colon_rejected() {
        let err = parse_trailer_block(b"grpc-status\r\n").unwrap_err();
        assert!(matches!(err, TrailerError::MalformedLine(_)));
    }

    #[test]
    fn test_parse_percent_decodes_message() {
        let trailers =
            parse_trailer_block(b"grpc-message:not%20found%3A%20user\r\n").unwrap();
        assert_eq!(trailers.get("grpc-message"), Some("not found: user"));
    }

    #[test]
    fn test_parse_invalid_percent_passthrough() {
        let trailers = parse_trailer_block(b"grpc-message:50%%2G\r\n").unwrap();
        assert_eq!(trailers.get("grpc-message"), Some("50%%2G"));
    }

    #[test]
    fn test_percent_decode_invalid_utf8_is_lossy() {
        let message = percent_decode_message(b"bad%FF%FEbytes");
        assert!(message.contains("bad"));
        assert!(message.contains("bytes"));
        assert!(message.contains('\u{fffd}'));
    }

    #[test]
    fn test_percent_encode_roundtrip() {
        let original = "deadline exceeded: étape 2\n";
        let encoded = percent_encode_message(original);
        assert!(encoded.is_ascii());
        assert_eq!(percent_decode_message(encoded.as_bytes()), original);
    }

    #[test]
    fn test_from_header_map() {
        let mut headers = HeaderMap::new();
        headers.insert("grpc-status", "0".parse().unwrap());
        headers.insert("Grpc-Message", "all%20good".parse().unwrap());
        headers.append("x-tag", "a".parse().unwrap());
        headers.append("x-tag", "b".parse().unwrap());

        let trailers = Trailers::from_header_map(&headers);
        assert_eq!(trailers.get("grpc-status"), Some("0"));
        assert_eq!(trailers.get("grpc-message"), Some("all good"));
        assert_eq!(trailers.get_all("x-tag").unwrap().len(), 2);
    }

    #[test]
    fn test_to_block_parses_back() {
        let mut trailers = Trailers::new();
        trailers.insert("grpc-status", "3");
        trailers.insert("grpc-message", "bad arg: naïve");

        let block = trailers.to_block();
        let parsed = parse_trailer_block(&block).unwrap();
        assert_eq!(parsed.get("grpc-status"), Some("3"));
        assert_eq!(parsed.get("grpc-message"), Some("bad arg: naïve"));
    }

    #[test]
    fn test_empty_block() {
        let trailers = parse_trailer_block(b"").unwrap();
        assert!(trailers.is_empty());
    }
}
