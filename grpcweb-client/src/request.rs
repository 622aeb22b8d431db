//! HTTP request assembly for RPC calls.

mod base64;

use std::time::Duration;

use ::base64::engine::general_purpose::STANDARD_NO_PAD;
use ::base64::Engine;
use grpcweb_core::encode_timeout;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, TE, USER_AGENT};
use http::{Method, Request, Version};

pub use base64::{Base64EncodeStream, Base64Encoder};

use crate::error::ClientError;
use crate::options::{CallOptions, MetadataValue};
use crate::protocol::Protocol;
use crate::transport::TransportBody;

/// Header names the caller may never override.
///
/// `grpc-timeout` in particular is always computed from the deadline for
/// this attempt, never copied from caller metadata.
fn is_reserved(name: &str) -> bool {
    name.starts_with("grpc-")
        || name == "content-type"
        || name == "content-length"
        || name == "te"
        || name == "user-agent"
}

/// Assemble the HTTP request for one RPC attempt.
///
/// `procedure` is the full method name (`package.Service/Method`); the
/// request target becomes `{base_url}/{procedure}`. The version tag is
/// HTTP/2 only when the transport is pinned to h2, since hyper's pooled
/// client rejects version-mismatched requests on HTTP/1.1 connections.
pub(crate) fn build_request(
    base_url: &str,
    procedure: &str,
    protocol: Protocol,
    user_agent: &str,
    http2: bool,
    timeout: Option<Duration>,
    options: &CallOptions,
    body: TransportBody,
) -> Result<Request<TransportBody>, ClientError> {
    let uri = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        procedure.trim_start_matches('/')
    );

    let mut builder = Request::builder().method(Method::POST).uri(uri);
    if http2 {
        builder = builder.version(Version::HTTP_2);
    }

    let mut request = builder
        .body(body)
        .map_err(|e| ClientError::InvalidOperation(format!("invalid request: {e}")))?;

    let headers = request.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(protocol.content_type()));
    // Detects incompatible proxies; required by gRPC over h2.
    headers.insert(TE, HeaderValue::from_static("trailers"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent)
            .map_err(|e| ClientError::InvalidOperation(format!("invalid user agent: {e}")))?,
    );

    // Strictly positive on the wire; a zero timeout dies client-side
    // before the header would matter.
    if let Some(timeout) = timeout.filter(|t| !t.is_zero()) {
        headers.insert(
            HeaderName::from_static("grpc-timeout"),
            HeaderValue::from_str(&encode_timeout(timeout))
                .expect("timeout encoding is ASCII"),
        );
    }

    for (name, value) in &options.metadata {
        if is_reserved(name) {
            continue;
        }
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::InvalidOperation(format!("invalid metadata key {name:?}: {e}")))?;
        let value = match value {
            MetadataValue::Ascii(value) => HeaderValue::from_str(value).map_err(|e| {
                ClientError::InvalidOperation(format!("invalid metadata value for {name:?}: {e}"))
            })?,
            MetadataValue::Binary(bytes) => {
                HeaderValue::from_str(&STANDARD_NO_PAD.encode(bytes))
                    .expect("base64 output is ASCII")
            }
        };
        request.headers_mut().append(name, value);
    }

    Ok(request)
}
