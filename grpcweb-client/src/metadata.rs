//! Response metadata: a typed view over HTTP headers.

use base64::Engine;
use http::HeaderMap;

/// Read-only view of response headers with gRPC metadata semantics.
///
/// Keys ending in `-bin` carry base64-encoded binary values; use
/// [`get_bin`](Metadata::get_bin) to decode them.
#[derive(Clone, Debug, Default)]
pub struct Metadata {
    headers: HeaderMap,
}

impl Metadata {
    /// Wrap a header map.
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Get the first ASCII value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    /// Get all ASCII values for a key.
    pub fn get_all<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> {
        self.headers.get_all(key).iter().filter_map(|v| v.to_str().ok())
    }

    /// Decode the binary value of a `-bin` key.
    ///
    /// Accepts both padded and unpadded base64, since peers differ.
    pub fn get_bin(&self, key: &str) -> Option<Vec<u8>> {
        let value = self.get(key)?;
        base64::engine::general_purpose::STANDARD_NO_PAD
            .decode(value)
            .or_else(|_| base64::engine::general_purpose::STANDARD.decode(value))
            .ok()
    }

    /// Check whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    /// Number of header values.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Check whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Access the underlying header map.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Consume the view and return the underlying header map.
    pub fn into_headers(self) -> HeaderMap {
        self.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_ascii() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "abc123".parse().unwrap());

        let metadata = Metadata::new(headers);
        assert_eq!(metadata.get("x-request-id"), Some("abc123"));
        assert!(metadata.get("missing").is_none());
    }

    #[test]
    fn test_get_all() {
        let mut headers = HeaderMap::new();
        headers.append("x-tag", "a".parse().unwrap());
        headers.append("x-tag", "b".parse().unwrap());

        let metadata = Metadata::new(headers);
        let values: Vec<_> = metadata.get_all("x-tag").collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn test_get_bin_unpadded() {
        let mut headers = HeaderMap::new();
        headers.insert("trace-bin", "AQID".parse().unwrap());

        let metadata = Metadata::new(headers);
        assert_eq!(metadata.get_bin("trace-bin"), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_get_bin_padded() {
        let mut headers = HeaderMap::new();
        // base64("ab") with padding
        headers.insert("blob-bin", "YWI=".parse().unwrap());

        let metadata = Metadata::new(headers);
        assert_eq!(metadata.get_bin("blob-bin"), Some(b"ab".to_vec()));
    }

    #[test]
    fn test_get_bin_invalid() {
        let mut headers = HeaderMap::new();
        headers.insert("bad-bin", "!!!".parse().unwrap());

        let metadata = Metadata::new(headers);
        assert!(metadata.get_bin("bad-bin").is_none());
    }
}
