//! The call invoker: typed entry points per RPC kind.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use grpcweb_core::{encode_frame, Status, Trailers, DEFAULT_MAX_MESSAGE_SIZE};
use prost::Message;
use tokio::sync::mpsc;
#[cfg(feature = "tracing")]
use tracing::info_span;

use crate::call::{CallShared, GrpcCall};
use crate::error::ClientError;
use crate::options::CallOptions;
use crate::protocol::Protocol;
use crate::request::{build_request, Base64EncodeStream, Base64Encoder};
use crate::response::{
    trailers_only, validate_response_headers, GrpcFrameStream, GrpcResponse,
};
use crate::metadata::Metadata;
use crate::streaming::{GrpcSender, ResponseFuture, Streaming};
use crate::transport::{HyperTransport, ResponseBody, Transport, TransportBody};

/// Queue depth between a stream writer and the request body.
const WRITE_CHANNEL_CAPACITY: usize = 16;

/// A gRPC / gRPC-Web client.
///
/// One instance is shared across calls; it holds the transport, the
/// protocol mode, and call defaults. Entry points are selected by RPC
/// kind, mirroring the four method types:
///
/// - [`call_unary`](GrpcClient::call_unary)
/// - [`call_client_stream`](GrpcClient::call_client_stream)
/// - [`call_server_stream`](GrpcClient::call_server_stream)
/// - [`call_bidi_stream`](GrpcClient::call_bidi_stream)
///
/// # Example
///
/// ```ignore
/// use grpcweb_client::GrpcClient;
///
/// let client = GrpcClient::builder("http://localhost:3000")
///     .grpc_web()
///     .build()?;
///
/// let response = client
///     .call_unary::<HelloRequest, HelloReply>("greeter.Greeter/SayHello", &request)
///     .await?;
/// println!("{:?}", response.into_inner());
/// ```
#[derive(Clone, Debug)]
pub struct GrpcClient<T = HyperTransport> {
    transport: Arc<T>,
    base_url: String,
    protocol: Protocol,
    default_timeout: Option<Duration>,
    max_receive_message_size: usize,
    user_agent: String,
    http2: bool,
}

impl GrpcClient<HyperTransport> {
    /// Create a builder with the given base URL.
    pub fn builder<S: Into<String>>(base_url: S) -> GrpcClientBuilder<HyperTransport> {
        GrpcClientBuilder::new(base_url)
    }
}

impl<T: Transport> GrpcClient<T> {
    /// The base URL calls are issued against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The protocol mode this client speaks.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Frame-encode a request message, base64-wrapped in text mode.
    fn encode_unary_body<Req: Message>(&self, request: &Req) -> Bytes {
        let frame = encode_frame(&request.encode_to_vec(), false);
        if !self.protocol.is_text() {
            return frame;
        }

        let mut encoder = Base64Encoder::new();
        let mut body = BytesMut::new();
        body.extend_from_slice(&encoder.encode(&frame));
        body.extend_from_slice(&encoder.finish());
        body.freeze()
    }

    fn frame_stream(&self, body: ResponseBody, shared: &Arc<CallShared>) -> GrpcFrameStream {
        GrpcFrameStream::new(
            body,
            Arc::clone(shared),
            self.protocol.is_web(),
            self.protocol.is_text(),
            self.max_receive_message_size,
        )
    }

    /// Make a unary call.
    pub async fn call_unary<Req, Res>(
        &self,
        procedure: &str,
        request: &Req,
    ) -> Result<GrpcResponse<Res>, ClientError>
    where
        Req: Message,
        Res: Message + Default,
    {
        self.call_unary_with_options(procedure, request, CallOptions::new())
            .await
    }

    /// Make a unary call with per-call options.
    pub async fn call_unary_with_options<Req, Res>(
        &self,
        procedure: &str,
        request: &Req,
        options: CallOptions,
    ) -> Result<GrpcResponse<Res>, ClientError>
    where
        Req: Message,
        Res: Message + Default,
    {
        #[cfg(feature = "tracing")]
        let _span = info_span!(
            "rpc.call",
            rpc.method = %procedure,
            rpc.type = "unary",
            otel.kind = "client",
        )
        .entered();

        let timeout = options.resolve_timeout(self.default_timeout);
        let mut call = GrpcCall::new(timeout, options.cancel.clone());

        let request = build_request(
            &self.base_url,
            procedure,
            self.protocol,
            &self.user_agent,
            self.http2,
            call.timeout(),
            &options,
            TransportBody::full(self.encode_unary_body(request)),
        )?;

        call.arm_deadline();
        let response = call.send(self.transport.as_ref(), request).await?;
        let (parts, body) = response.into_parts();
        validate_response_headers(parts.status, &parts.headers, self.protocol)?;
        let metadata = Metadata::new(parts.headers.clone());

        if let Some(trailers) = trailers_only(&parts.headers) {
            call.shared().set_trailers(trailers);
        }

        let shared = Arc::clone(call.shared());
        let mut frames = self.frame_stream(body, &shared);

        let first = next_or_cancelled(&shared, &mut frames).await;
        let message = match first {
            Some(Ok(payload)) => {
                let message = Res::decode(payload.as_ref()).map_err(|e| {
                    ClientError::Decode(format!("failed to decode response message: {e}"))
                })?;
                // Exactly one message on a unary response.
                match next_or_cancelled(&shared, &mut frames).await {
                    None => {}
                    Some(Ok(_)) => {
                        return Err(ClientError::Protocol(
                            "unary response carried more than one message".into(),
                        ));
                    }
                    Some(Err(err)) => return Err(err),
                }
                Some(message)
            }
            Some(Err(err)) => return Err(err),
            None => None,
        };

        let trailers = finish_unary(&shared)?;
        let message = message.ok_or_else(|| {
            ClientError::Protocol("unary response ended without a message".into())
        })?;

        Ok(GrpcResponse::new(message, metadata, Some(trailers)))
    }

    /// Start a server-streaming call. The returned stream yields
    /// response messages; trailers are available once it is drained.
    pub async fn call_server_stream<Req, Res>(
        &self,
        procedure: &str,
        request: &Req,
    ) -> Result<GrpcResponse<Streaming<Res>>, ClientError>
    where
        Req: Message,
        Res: Message + Default,
    {
        self.call_server_stream_with_options(procedure, request, CallOptions::new())
            .await
    }

    /// Start a server-streaming call with per-call options.
    pub async fn call_server_stream_with_options<Req, Res>(
        &self,
        procedure: &str,
        request: &Req,
        options: CallOptions,
    ) -> Result<GrpcResponse<Streaming<Res>>, ClientError>
    where
        Req: Message,
        Res: Message + Default,
    {
        #[cfg(feature = "tracing")]
        let _span = info_span!(
            "rpc.call",
            rpc.method = %procedure,
            rpc.type = "server_stream",
            otel.kind = "client",
        )
        .entered();

        let timeout = options.resolve_timeout(self.default_timeout);
        let mut call = GrpcCall::new(timeout, options.cancel.clone());

        let request = build_request(
            &self.base_url,
            procedure,
            self.protocol,
            &self.user_agent,
            self.http2,
            call.timeout(),
            &options,
            TransportBody::full(self.encode_unary_body(request)),
        )?;

        call.arm_deadline();
        let response = call.send(self.transport.as_ref(), request).await?;
        let (parts, body) = response.into_parts();
        validate_response_headers(parts.status, &parts.headers, self.protocol)?;
        let metadata = Metadata::new(parts.headers.clone());

        if let Some(trailers) = trailers_only(&parts.headers) {
            call.shared().set_trailers(trailers);
        }

        let frames = self.frame_stream(body, call.shared());
        let streaming = Streaming::new(frames, call);

        Ok(GrpcResponse::new(streaming, metadata, None))
    }

    /// Start a client-streaming call.
    ///
    /// Returns the request writer and a future resolving to the single
    /// response once the writer [finishes](GrpcSender::finish) and the
    /// server replies.
    pub async fn call_client_stream<Req, Res>(
        &self,
        procedure: &str,
    ) -> Result<(GrpcSender<Req>, ResponseFuture<GrpcResponse<Res>>), ClientError>
    where
        Req: Message,
        Res: Message + Default + 'static,
    {
        self.call_client_stream_with_options(procedure, CallOptions::new())
            .await
    }

    /// Start a client-streaming call with per-call options.
    pub async fn call_client_stream_with_options<Req, Res>(
        &self,
        procedure: &str,
        options: CallOptions,
    ) -> Result<(GrpcSender<Req>, ResponseFuture<GrpcResponse<Res>>), ClientError>
    where
        Req: Message,
        Res: Message + Default + 'static,
    {
        #[cfg(feature = "tracing")]
        let _span = info_span!(
            "rpc.call",
            rpc.method = %procedure,
            rpc.type = "client_stream",
            otel.kind = "client",
        )
        .entered();

        let (mut call, sender, send_task) = self.start_streaming_send(procedure, &options)?;
        let shared = Arc::clone(call.shared());
        let protocol = self.protocol;
        let max_receive = self.max_receive_message_size;

        let inner = Box::pin(async move {
            let response = send_task
                .await
                .map_err(|e| ClientError::Transport(format!("send task failed: {e}")))??;
            let (parts, body) = response.into_parts();
            validate_response_headers(parts.status, &parts.headers, protocol)?;
            let metadata = Metadata::new(parts.headers.clone());

            if let Some(trailers) = trailers_only(&parts.headers) {
                shared.set_trailers(trailers);
            }

            let mut frames = GrpcFrameStream::new(
                body,
                Arc::clone(&shared),
                protocol.is_web(),
                protocol.is_text(),
                max_receive,
            );

            let first = next_or_cancelled(&shared, &mut frames).await;
            let message = match first {
                Some(Ok(payload)) => {
                    let message = Res::decode(payload.as_ref()).map_err(|e| {
                        ClientError::Decode(format!("failed to decode response message: {e}"))
                    })?;
                    match next_or_cancelled(&shared, &mut frames).await {
                        None => {}
                        Some(Ok(_)) => {
                            return Err(ClientError::Protocol(
                                "client-streaming response carried more than one message".into(),
                            ));
                        }
                        Some(Err(err)) => return Err(err),
                    }
                    Some(message)
                }
                Some(Err(err)) => return Err(err),
                None => None,
            };

            let trailers = finish_unary(&shared)?;
            let message = message.ok_or_else(|| {
                ClientError::Protocol("client-streaming response ended without a message".into())
            })?;

            // Finished cleanly; dropping the call will not cancel.
            call.dispose();
            Ok(GrpcResponse::new(message, metadata, Some(trailers)))
        });

        Ok((sender, ResponseFuture { inner }))
    }

    /// Start a bidi-streaming call.
    ///
    /// Returns the request writer immediately and a future resolving to
    /// the response stream once headers arrive, so the writer can feed
    /// servers that wait for input before answering.
    pub async fn call_bidi_stream<Req, Res>(
        &self,
        procedure: &str,
    ) -> Result<(GrpcSender<Req>, ResponseFuture<GrpcResponse<Streaming<Res>>>), ClientError>
    where
        Req: Message,
        Res: Message + Default + 'static,
    {
        self.call_bidi_stream_with_options(procedure, CallOptions::new())
            .await
    }

    /// Start a bidi-streaming call with per-call options.
    pub async fn call_bidi_stream_with_options<Req, Res>(
        &self,
        procedure: &str,
        options: CallOptions,
    ) -> Result<(GrpcSender<Req>, ResponseFuture<GrpcResponse<Streaming<Res>>>), ClientError>
    where
        Req: Message,
        Res: Message + Default + 'static,
    {
        #[cfg(feature = "tracing")]
        let _span = info_span!(
            "rpc.call",
            rpc.method = %procedure,
            rpc.type = "bidi_stream",
            otel.kind = "client",
        )
        .entered();

        let (call, sender, send_task) = self.start_streaming_send(procedure, &options)?;
        let shared = Arc::clone(call.shared());
        let protocol = self.protocol;
        let max_receive = self.max_receive_message_size;

        let inner = Box::pin(async move {
            let response = send_task
                .await
                .map_err(|e| ClientError::Transport(format!("send task failed: {e}")))??;
            let (parts, body) = response.into_parts();
            validate_response_headers(parts.status, &parts.headers, protocol)?;
            let metadata = Metadata::new(parts.headers.clone());

            if let Some(trailers) = trailers_only(&parts.headers) {
                shared.set_trailers(trailers);
            }

            let frames = GrpcFrameStream::new(
                body,
                Arc::clone(&shared),
                protocol.is_web(),
                protocol.is_text(),
                max_receive,
            );
            let streaming = Streaming::new(frames, call);

            Ok(GrpcResponse::new(streaming, metadata, None))
        });

        Ok((sender, ResponseFuture { inner }))
    }

    /// Common setup for the streaming-request kinds: wire a writer
    /// channel into the request body, arm the deadline once the handles
    /// exist, and launch the HTTP send.
    #[allow(clippy::type_complexity)]
    fn start_streaming_send<Req>(
        &self,
        procedure: &str,
        options: &CallOptions,
    ) -> Result<
        (
            GrpcCall,
            GrpcSender<Req>,
            tokio::task::JoinHandle<Result<http::Response<ResponseBody>, ClientError>>,
        ),
        ClientError,
    >
    where
        Req: Message,
    {
        let timeout = options.resolve_timeout(self.default_timeout);
        let mut call = GrpcCall::new(timeout, options.cancel.clone());

        let (tx, rx) = mpsc::channel::<Result<Bytes, ClientError>>(WRITE_CHANNEL_CAPACITY);
        let frames = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let body = if self.protocol.is_text() {
            TransportBody::streaming(Base64EncodeStream::new(frames.boxed()))
        } else {
            TransportBody::streaming(frames)
        };

        let request = build_request(
            &self.base_url,
            procedure,
            self.protocol,
            &self.user_agent,
            self.http2,
            call.timeout(),
            options,
            body,
        )?;

        let sender = GrpcSender::new(tx, Arc::clone(call.shared()));
        call.arm_deadline();

        let transport = Arc::clone(&self.transport);
        let shared = Arc::clone(call.shared());
        let send_task = tokio::spawn(async move {
            let send = transport.send(request);
            tokio::select! {
                biased;
                _ = shared.cancel_token().cancelled() => Err(shared.cancellation_error()),
                response = send => response.map_err(|e| shared.map_transport_error(e)),
            }
        });

        Ok((call, sender, send_task))
    }
}

/// Await the next body item, racing the call's cancellation token.
async fn next_or_cancelled(
    shared: &Arc<CallShared>,
    frames: &mut GrpcFrameStream,
) -> Option<Result<Bytes, ClientError>> {
    tokio::select! {
        biased;
        _ = shared.cancel_token().cancelled() => Some(Err(shared.cancellation_error())),
        item = frames.next() => item,
    }
}

/// Resolve the trailers of a single-response call, raising a non-OK
/// status. The missing-trailers case surfaces as a wire violation.
fn finish_unary(shared: &Arc<CallShared>) -> Result<Trailers, ClientError> {
    shared.mark_finished();

    let trailers = shared.trailers().ok_or_else(|| {
        ClientError::Protocol("response ended without grpc-status trailers".into())
    })?;
    let status = Status::from_trailers(&trailers).ok_or_else(|| {
        ClientError::Protocol("response trailers are missing grpc-status".into())
    })?;

    if status.is_ok() {
        Ok(trailers)
    } else {
        Err(ClientError::Rpc(status))
    }
}

/// Builder for [`GrpcClient`].
#[derive(Debug)]
pub struct GrpcClientBuilder<T = HyperTransport> {
    base_url: String,
    protocol: Protocol,
    default_timeout: Option<Duration>,
    max_receive_message_size: usize,
    user_agent: Option<String>,
    http2: Option<bool>,
    transport: T,
}

impl GrpcClientBuilder<HyperTransport> {
    /// Create a builder with the default hyper transport.
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            protocol: Protocol::Grpc,
            default_timeout: None,
            max_receive_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            user_agent: None,
            http2: None,
            transport: HyperTransport::new(),
        }
    }
}

impl<T: Transport> GrpcClientBuilder<T> {
    /// Select the protocol mode.
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Speak gRPC-Web with a binary body.
    pub fn grpc_web(self) -> Self {
        self.protocol(Protocol::GrpcWeb)
    }

    /// Speak gRPC-Web with a base64 text body.
    pub fn grpc_web_text(self) -> Self {
        self.protocol(Protocol::GrpcWebText)
    }

    /// Default timeout applied to calls without their own deadline.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Largest response message accepted. Default 4 MiB.
    pub fn max_receive_message_size(mut self, size: usize) -> Self {
        self.max_receive_message_size = size;
        self
    }

    /// Override the `user-agent` header.
    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Force or suppress the HTTP/2 version tag on requests.
    ///
    /// Defaults to whatever the transport negotiates (h2c-pinned
    /// transports get HTTP/2, otherwise the version is left to hyper).
    pub fn http2(mut self, enabled: bool) -> Self {
        self.http2 = Some(enabled);
        self
    }

    /// Use a custom transport.
    pub fn transport<U: Transport>(self, transport: U) -> GrpcClientBuilder<U> {
        GrpcClientBuilder {
            base_url: self.base_url,
            protocol: self.protocol,
            default_timeout: self.default_timeout,
            max_receive_message_size: self.max_receive_message_size,
            user_agent: self.user_agent,
            http2: self.http2,
            transport,
        }
    }

    /// Build the client.
    pub fn build(self) -> Result<GrpcClient<T>, ClientError> {
        let base_url = self.base_url.trim_end_matches('/').to_string();
        base_url.parse::<http::Uri>().map_err(|e| {
            ClientError::InvalidOperation(format!("invalid base url {base_url:?}: {e}"))
        })?;

        let http2 = self.http2.unwrap_or_else(|| self.transport.prefers_http2());

        Ok(GrpcClient {
            transport: Arc::new(self.transport),
            base_url,
            protocol: self.protocol,
            default_timeout: self.default_timeout,
            max_receive_message_size: self.max_receive_message_size,
            user_agent: self
                .user_agent
                .unwrap_or_else(|| concat!("grpcweb/", env!("CARGO_PKG_VERSION")).to_string()),
            http2,
        })
    }
}
