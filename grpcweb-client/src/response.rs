//! Response wrappers and header validation.

mod decoder;

use grpcweb_core::Trailers;
use http::{HeaderMap, StatusCode};

pub use decoder::{Base64Decoder, GrpcFrameStream};

use crate::error::ClientError;
use crate::metadata::Metadata;
use crate::protocol::Protocol;

/// A successful RPC response.
///
/// Wraps the payload (a message for unary calls, a
/// [`Streaming`](crate::Streaming) for server/bidi streaming) together
/// with the response header [`Metadata`]. For unary and client-streaming
/// calls the resolved [`Trailers`] are attached; streaming calls expose
/// trailers on the stream once it is drained.
#[derive(Debug)]
pub struct GrpcResponse<T> {
    inner: T,
    metadata: Metadata,
    trailers: Option<Trailers>,
}

impl<T> GrpcResponse<T> {
    pub(crate) fn new(inner: T, metadata: Metadata, trailers: Option<Trailers>) -> Self {
        Self {
            inner,
            metadata,
            trailers,
        }
    }

    /// Consume the response and return the payload.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Get a reference to the payload.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Get a mutable reference to the payload.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Response header metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Response trailers, when already resolved.
    pub fn trailers(&self) -> Option<&Trailers> {
        self.trailers.as_ref()
    }

    /// Split the response into payload, headers, and trailers.
    pub fn into_parts(self) -> (T, Metadata, Option<Trailers>) {
        (self.inner, self.metadata, self.trailers)
    }
}

/// Validate response headers per the gRPC HTTP mapping.
///
/// The HTTP status must be 200 and the content-type must belong to the
/// protocol's family. Violations cancel the call; the returned error is
/// what every subsequent public operation surfaces.
pub(crate) fn validate_response_headers(
    status: StatusCode,
    headers: &HeaderMap,
    protocol: Protocol,
) -> Result<(), ClientError> {
    if status != StatusCode::OK {
        return Err(ClientError::Protocol(format!(
            "Bad gRPC response. Expected HTTP status code 200. Got status code: {}",
            status.as_u16()
        )));
    }

    let content_type = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ClientError::Protocol("Bad gRPC response. Response did not have a content-type header.".into())
        })?;

    if !protocol.accepts(content_type) {
        return Err(ClientError::Protocol(format!(
            "Bad gRPC response. Invalid content-type value: {content_type}"
        )));
    }

    Ok(())
}

/// Detect a trailers-only response: validated headers that already carry
/// `grpc-status`, with no message body to follow.
pub(crate) fn trailers_only(headers: &HeaderMap) -> Option<Trailers> {
    if headers.contains_key("grpc-status") {
        Some(Trailers::from_header_map(headers))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grpcweb_core::Code;

    fn grpc_headers(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, content_type.parse().unwrap());
        headers
    }

    #[test]
    fn test_validate_accepts_matching_family() {
        let headers = grpc_headers("application/grpc+proto");
        assert!(validate_response_headers(StatusCode::OK, &headers, Protocol::Grpc).is_ok());

        let headers = grpc_headers("application/grpc-web+proto");
        assert!(validate_response_headers(StatusCode::OK, &headers, Protocol::GrpcWeb).is_ok());
    }

    #[test]
    fn test_validate_rejects_non_200() {
        let headers = grpc_headers("application/grpc");
        let err = validate_response_headers(
            StatusCode::INTERNAL_SERVER_ERROR,
            &headers,
            Protocol::Grpc,
        )
        .unwrap_err();

        assert_eq!(err.code(), Code::Internal);
        assert_eq!(
            err.message().unwrap(),
            "Bad gRPC response. Expected HTTP status code 200. Got status code: 500"
        );
    }

    #[test]
    fn test_validate_rejects_missing_content_type() {
        let err =
            validate_response_headers(StatusCode::OK, &HeaderMap::new(), Protocol::Grpc)
                .unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[test]
    fn test_validate_rejects_wrong_content_type() {
        let headers = grpc_headers("text/html");
        let err =
            validate_response_headers(StatusCode::OK, &headers, Protocol::Grpc).unwrap_err();
        assert!(err.message().unwrap().contains("Invalid content-type"));
    }

    #[test]
    fn test_trailers_only_detection() {
        let mut headers = grpc_headers("application/grpc");
        assert!(trailers_only(&headers).is_none());

        headers.insert("grpc-status", "12".parse().unwrap());
        let trailers = trailers_only(&headers).unwrap();
        assert_eq!(trailers.get("grpc-status"), Some("12"));
    }

    #[test]
    fn test_response_accessors() {
        let mut headers = HeaderMap::new();
        headers.insert("x-id", "7".parse().unwrap());
        let mut trailers = Trailers::new();
        trailers.insert("grpc-status", "0");

        let response = GrpcResponse::new("payload", Metadata::new(headers), Some(trailers));
        assert_eq!(*response.get_ref(), "payload");
        assert_eq!(response.metadata().get("x-id"), Some("7"));
        assert_eq!(response.trailers().unwrap().get("grpc-status"), Some("0"));
        assert_eq!(response.into_inner(), "payload");
    }
}
