//! gRPC and gRPC-Web client call core.
//!
//! This crate drives typed RPC invocations over a generic HTTP/1.1 or
//! HTTP/2 request-response facility: it enforces gRPC framing and
//! headers, honors per-call deadlines and external cancellation,
//! surfaces trailer-based status back to the caller, and — in gRPC-Web
//! mode — base64-re-encodes the byte stream and parses trailers embedded
//! in the response body.
//!
//! ## Features
//!
//! - Unary, client-streaming, server-streaming, and bidi-streaming calls
//! - Native gRPC (HTTP/2 trailers) and gRPC-Web / gRPC-Web-text
//!   (in-body trailer frames, base64 bodies)
//! - Per-call deadlines mapped to `grpc-timeout` plus a local one-shot
//!   timer; external cancellation via `CancellationToken`
//! - Binary (`-bin`) metadata
//!
//! ## Example
//!
//! ```ignore
//! use grpcweb_client::{CallOptions, GrpcClient};
//! use std::time::Duration;
//!
//! let client = GrpcClient::builder("http://localhost:3000")
//!     .grpc_web()
//!     .build()?;
//!
//! let options = CallOptions::new().timeout(Duration::from_secs(5));
//! let response = client
//!     .call_unary_with_options::<HelloRequest, HelloReply>(
//!         "greeter.Greeter/SayHello",
//!         &request,
//!         options,
//!     )
//!     .await?;
//!
//! println!("reply: {:?}", response.into_inner());
//! ```
//!
//! ## Streaming
//!
//! Server streams are read through [`Streaming`]; dropping one cancels
//! the call, and trailers become available once it is drained:
//!
//! ```ignore
//! let response = client
//!     .call_server_stream::<ListRequest, Item>("items.Items/List", &request)
//!     .await?;
//! let mut stream = response.into_inner();
//!
//! while let Some(item) = stream.message().await? {
//!     println!("item: {item:?}");
//! }
//! println!("trailers: {:?}", stream.trailers());
//! ```
//!
//! Client and bidi streams hand back a [`GrpcSender`] plus a future for
//! the response, so writes can start before the server answers:
//!
//! ```ignore
//! let (mut sender, response) = client
//!     .call_bidi_stream::<EchoRequest, EchoReply>("echo.Echo/Chat")
//!     .await?;
//!
//! sender.send(&EchoRequest { text: "hello".into() }).await?;
//! sender.finish();
//!
//! let mut replies = response.await?.into_inner();
//! while let Some(reply) = replies.message().await? {
//!     println!("reply: {reply:?}");
//! }
//! ```
//!
//! ## Cancellation
//!
//! Every call reconciles its triggers — external token, deadline timer,
//! disposal, header validation failure — into one internal cancellation
//! source. Suspended operations observe it promptly and surface
//! [`Code::DeadlineExceeded`] when the deadline fired, else
//! [`Code::Canceled`].
//!
//! [`Code::DeadlineExceeded`]: grpcweb_core::Code::DeadlineExceeded
//! [`Code::Canceled`]: grpcweb_core::Code::Canceled

mod call;
mod client;
mod error;
mod metadata;
mod options;
mod protocol;
pub mod request;
pub mod response;
mod streaming;
pub mod transport;

pub use client::{GrpcClient, GrpcClientBuilder};
pub use error::ClientError;
pub use metadata::Metadata;
pub use options::{CallOptions, MetadataValue};
pub use protocol::Protocol;
pub use response::GrpcResponse;
pub use streaming::{GrpcSender, ResponseFuture, Streaming};

// Re-export transport types at the top level for convenience.
pub use transport::{HyperTransport, HyperTransportBuilder, Transport, TransportBody};

// Re-export the wire-level types callers interact with.
pub use grpcweb_core::{Code, Status, Trailers};

// Re-export for generated and hand-written message plumbing.
pub use bytes::Bytes;
pub use tokio_util::sync::CancellationToken;
