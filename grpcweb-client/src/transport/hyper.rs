//! Hyper-based HTTP transport.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tower_service::Service;

use super::body::TransportBody;
use super::{ResponseBody, SendFuture, Transport};
use crate::error::ClientError;

type HyperClient = Client<HttpConnector, TransportBody>;

/// HTTP transport using hyper_util's legacy pooled client.
///
/// Supports HTTP/1.1 and, with [`http2_only`](HyperTransportBuilder::http2_only),
/// HTTP/2 over cleartext (h2c). Native gRPC requires the latter;
/// gRPC-Web works over either.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    http2_only: bool,
}

impl HyperTransport {
    /// Create a transport builder.
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder::new()
    }

    /// Create a transport with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Whether this transport is configured for HTTP/2 only.
    pub fn is_http2_only(&self) -> bool {
        self.http2_only
    }

    /// Send a request and await the response headers.
    pub async fn request(
        &self,
        request: http::Request<TransportBody>,
    ) -> Result<http::Response<ResponseBody>, ClientError> {
        let response: http::Response<Incoming> = self
            .client
            .request(request)
            .await
            .map_err(|e| ClientError::Transport(format!("request failed: {e}")))?;

        Ok(response.map(|body| {
            body.map_err(|e| ClientError::Transport(format!("body error: {e}")))
                .boxed_unsync()
        }))
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("http2_only", &self.http2_only)
            .finish_non_exhaustive()
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: http::Request<TransportBody>) -> SendFuture {
        let this = self.clone();
        Box::pin(async move { this.request(request).await })
    }

    fn prefers_http2(&self) -> bool {
        self.http2_only
    }
}

impl Service<http::Request<TransportBody>> for HyperTransport {
    type Response = http::Response<ResponseBody>;
    type Error = ClientError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // The pooled legacy client is always ready.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<TransportBody>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.request(request).await })
    }
}

/// Builder for [`HyperTransport`].
#[derive(Debug)]
pub struct HyperTransportBuilder {
    http2_only: bool,
    pool_idle_timeout: Option<Duration>,
    pool_max_idle_per_host: usize,
    h2_initial_stream_window_size: Option<u32>,
    h2_initial_connection_window_size: Option<u32>,
    h2_keep_alive_interval: Option<Duration>,
    h2_keep_alive_timeout: Option<Duration>,
}

impl Default for HyperTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperTransportBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            http2_only: false,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
            h2_initial_stream_window_size: None,
            h2_initial_connection_window_size: None,
            h2_keep_alive_interval: None,
            h2_keep_alive_timeout: None,
        }
    }

    /// Speak HTTP/2 directly, without the HTTP/1.1 upgrade handshake.
    ///
    /// Required for native gRPC and for bidi streaming over cleartext
    /// connections (h2c).
    pub fn http2_only(mut self, enabled: bool) -> Self {
        self.http2_only = enabled;
        self
    }

    /// Close pooled connections idle for longer than this. Default 90s.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = Some(timeout);
        self
    }

    /// Never close pooled connections due to inactivity.
    pub fn pool_idle_timeout_none(mut self) -> Self {
        self.pool_idle_timeout = None;
        self
    }

    /// Maximum idle connections kept per host. Default 32.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// HTTP/2 initial stream window size.
    pub fn h2_initial_stream_window_size(mut self, size: u32) -> Self {
        self.h2_initial_stream_window_size = Some(size);
        self
    }

    /// HTTP/2 initial connection window size.
    pub fn h2_initial_connection_window_size(mut self, size: u32) -> Self {
        self.h2_initial_connection_window_size = Some(size);
        self
    }

    /// Send HTTP/2 PING frames at this interval to detect dead peers.
    pub fn h2_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.h2_keep_alive_interval = Some(interval);
        self
    }

    /// How long to wait for a PING response before closing the
    /// connection. Only effective with a keep-alive interval.
    pub fn h2_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.h2_keep_alive_timeout = Some(timeout);
        self
    }

    /// Build the transport.
    pub fn build(self) -> HyperTransport {
        let mut builder = Client::builder(TokioExecutor::new());
        builder.pool_timer(TokioTimer::new());

        if let Some(timeout) = self.pool_idle_timeout {
            builder.pool_idle_timeout(timeout);
        }
        builder.pool_max_idle_per_host(self.pool_max_idle_per_host);

        if self.http2_only {
            builder.http2_only(true);
        }
        if let Some(size) = self.h2_initial_stream_window_size {
            builder.http2_initial_stream_window_size(size);
        }
        if let Some(size) = self.h2_initial_connection_window_size {
            builder.http2_initial_connection_window_size(size);
        }
        if let Some(interval) = self.h2_keep_alive_interval {
            builder.http2_keep_alive_interval(interval);
        }
        if let Some(timeout) = self.h2_keep_alive_timeout {
            builder.http2_keep_alive_timeout(timeout);
        }

        let mut connector = HttpConnector::new();
        connector.enforce_http(true);

        HyperTransport {
            client: builder.build(connector),
            http2_only: self.http2_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = HyperTransportBuilder::new();
        assert!(!builder.http2_only);
        assert_eq!(builder.pool_max_idle_per_host, 32);
        assert_eq!(builder.pool_idle_timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_builder_settings() {
        let builder = HyperTransportBuilder::new()
            .http2_only(true)
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .h2_keep_alive_interval(Duration::from_secs(10))
            .h2_keep_alive_timeout(Duration::from_secs(5));

        assert!(builder.http2_only);
        assert_eq!(builder.pool_idle_timeout, Some(Duration::from_secs(60)));
        assert_eq!(builder.pool_max_idle_per_host, 8);
        assert_eq!(builder.h2_keep_alive_interval, Some(Duration::from_secs(10)));
        assert_eq!(builder.h2_keep_alive_timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_build_transport() {
        let transport = HyperTransportBuilder::new().http2_only(true).build();
        assert!(transport.is_http2_only());
    }
}
