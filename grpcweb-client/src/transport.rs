//! HTTP transport layer.
//!
//! The call core needs one thing from HTTP: `send(request) → response`
//! with streaming bodies in both directions and, over native gRPC,
//! trailer fields after the body. The [`Transport`] trait captures that
//! contract; [`HyperTransport`] implements it with hyper_util's legacy
//! pooled client.

mod body;
mod hyper;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;

pub use body::TransportBody;
pub use hyper::{HyperTransport, HyperTransportBuilder};

use crate::error::ClientError;

/// The response body every transport normalizes to.
///
/// Boxed so mock transports in tests and hyper's `Incoming` share one
/// shape; native HTTP/2 trailers are delivered as trailer frames through
/// `http_body::Body::poll_frame`.
pub type ResponseBody = UnsyncBoxBody<Bytes, ClientError>;

/// Future returned by [`Transport::send`].
pub type SendFuture =
    Pin<Box<dyn Future<Output = Result<http::Response<ResponseBody>, ClientError>> + Send>>;

/// A request-response HTTP facility.
///
/// The transport pulls the request body until EOF or cancellation and
/// resolves once response headers arrive; the response body streams.
pub trait Transport: Send + Sync + 'static {
    /// Send a request, resolving with the response headers.
    fn send(&self, request: http::Request<TransportBody>) -> SendFuture;

    /// Whether requests should carry the HTTP/2 version tag.
    ///
    /// Transports pinned to h2 return `true`; the default leaves the
    /// version to the HTTP client's negotiation.
    fn prefers_http2(&self) -> bool {
        false
    }
}
