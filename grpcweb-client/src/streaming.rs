//! Stream handles handed to user code.
//!
//! [`Streaming`] reads messages off a server- or bidi-streaming
//! response; [`GrpcSender`] writes messages into a client- or
//! bidi-streaming request body. Both observe the call's cancellation,
//! so a disposed call fails their operations instead of hanging them.

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{Future, Stream, StreamExt};
use grpcweb_core::{encode_frame, Status, Trailers};
use prost::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::call::{CallShared, GrpcCall};
use crate::error::ClientError;
use crate::response::GrpcFrameStream;

/// Build the future a reader polls to observe cancellation.
///
/// The caller-provided token (if any) joins the call's internal one
/// with OR semantics; the surfaced error is still disambiguated through
/// `deadline_reached` at fire time.
fn cancellation_wait(
    shared: &Arc<CallShared>,
    caller: Option<CancellationToken>,
) -> BoxFuture<'static, ()> {
    let internal = shared.cancel_token().clone();
    match caller {
        Some(caller) => Box::pin(async move {
            tokio::select! {
                _ = internal.cancelled() => {}
                _ = caller.cancelled() => {}
            }
        }),
        None => Box::pin(async move { internal.cancelled().await }),
    }
}

/// Reader for streaming response messages.
///
/// Owns the call: dropping the stream disposes it, which cancels the
/// RPC if the response had not finished. After the stream ends, the
/// resolved [`Trailers`] and [`Status`] are available.
///
/// # Example
///
/// ```ignore
/// let response = client.call_server_stream::<Req, Res>("pkg.Svc/List", &req).await?;
/// let mut stream = response.into_inner();
///
/// while let Some(item) = stream.message().await? {
///     println!("got {item:?}");
/// }
/// if let Some(trailers) = stream.trailers() {
///     println!("trailers: {trailers:?}");
/// }
/// ```
pub struct Streaming<T> {
    frames: GrpcFrameStream,
    call: GrpcCall,
    cancelled: BoxFuture<'static, ()>,
    caller_cancel: Option<CancellationToken>,
    status: Option<Status>,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Streaming<T> {
    pub(crate) fn new(frames: GrpcFrameStream, call: GrpcCall) -> Self {
        let cancelled = cancellation_wait(call.shared(), None);
        Self {
            frames,
            call,
            cancelled,
            caller_cancel: None,
            status: None,
            done: false,
            _marker: PhantomData,
        }
    }

    /// Attach an additional cancellation token honored by reads.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.caller_cancel = Some(token.clone());
        self.cancelled = cancellation_wait(self.call.shared(), Some(token));
        self
    }

    /// The trailers, once the stream has finished.
    ///
    /// `None` until the response is fully drained; the map never changes
    /// after it becomes visible.
    pub fn trailers(&self) -> Option<Trailers> {
        if self.call.shared().is_finished() {
            self.call.shared().trailers()
        } else {
            None
        }
    }

    /// The resolved status, once the stream has finished.
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    /// Read the body end: resolve trailers into a status, raising a
    /// non-OK status exactly once.
    fn finish(&mut self) -> Result<(), ClientError> {
        self.call.shared().mark_finished();

        let trailers = self.call.shared().trailers().ok_or_else(|| {
            ClientError::Protocol("response ended without grpc-status trailers".into())
        })?;
        let status = Status::from_trailers(&trailers).ok_or_else(|| {
            ClientError::Protocol("response trailers are missing grpc-status".into())
        })?;

        self.status = Some(status.clone());
        if status.is_ok() {
            Ok(())
        } else {
            Err(ClientError::Rpc(status))
        }
    }

    fn error_for_cancellation(&self) -> ClientError {
        if self.call.shared().is_cancelled() {
            self.call.shared().cancellation_error()
        } else {
            // Only the caller's own token fired.
            ClientError::cancellation(false)
        }
    }
}

impl<T> Streaming<T>
where
    T: Message + Default,
{
    /// Await the next message, or `None` at end-of-stream.
    ///
    /// End-of-stream finishes the call: a non-OK `grpc-status` is raised
    /// here, once, and the trailers become observable.
    pub async fn message(&mut self) -> Result<Option<T>, ClientError> {
        match self.next().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }

    /// Drain remaining messages, discarding them.
    ///
    /// Lets the call finish cleanly so trailers become available and the
    /// connection can be reused. Returns the number of drained messages.
    pub async fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Some(result) = self.next().await {
            if result.is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Drain with a time limit. Returns `Ok(count)` when fully drained,
    /// `Err(count)` when the timeout expired first.
    pub async fn drain_timeout(&mut self, timeout: Duration) -> Result<usize, usize> {
        let mut count = 0;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            tokio::select! {
                biased;

                _ = tokio::time::sleep_until(deadline) => return Err(count),

                item = self.next() => match item {
                    Some(Ok(_)) => count += 1,
                    Some(Err(_)) => {}
                    None => return Ok(count),
                },
            }
        }
    }
}

impl<T> Unpin for Streaming<T> {}

impl<T> Stream for Streaming<T>
where
    T: Message + Default,
{
    type Item = Result<T, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.done = true;
            return Poll::Ready(Some(Err(this.error_for_cancellation())));
        }

        match this.frames.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(payload))) => {
                let message = T::decode(payload.as_ref()).map_err(|e| {
                    ClientError::Decode(format!("failed to decode response message: {e}"))
                });
                if message.is_err() {
                    this.done = true;
                }
                Poll::Ready(Some(message))
            }
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.done = true;
                match this.finish() {
                    Ok(()) => Poll::Ready(None),
                    Err(err) => Poll::Ready(Some(Err(err))),
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for Streaming<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Streaming")
            .field("done", &self.done)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Writer for client- and bidi-streaming request messages.
///
/// Holds a non-owning back-reference to the call; when the call is
/// disposed or its deadline fires, pending and future writes fail with
/// the matching status instead of blocking.
pub struct GrpcSender<T> {
    tx: Option<mpsc::Sender<Result<Bytes, ClientError>>>,
    shared: Arc<CallShared>,
    _marker: PhantomData<fn(T)>,
}

impl<T> GrpcSender<T>
where
    T: Message,
{
    pub(crate) fn new(tx: mpsc::Sender<Result<Bytes, ClientError>>, shared: Arc<CallShared>) -> Self {
        Self {
            tx: Some(tx),
            shared,
            _marker: PhantomData,
        }
    }

    /// Serialize one message and write it as a frame into the request
    /// body.
    pub async fn send(&mut self, message: &T) -> Result<(), ClientError> {
        let Some(tx) = &self.tx else {
            return Err(ClientError::InvalidOperation(
                "cannot send a message after the request stream is finished".into(),
            ));
        };
        if self.shared.is_cancelled() {
            return Err(self.shared.cancellation_error());
        }

        let frame = encode_frame(&message.encode_to_vec(), false);

        tokio::select! {
            biased;
            _ = self.shared.cancel_token().cancelled() => Err(self.shared.cancellation_error()),
            sent = tx.send(Ok(frame)) => sent.map_err(|_| {
                // The body was dropped: the call ended underneath us.
                self.shared
                    .map_transport_error(ClientError::Transport("request body was closed".into()))
            }),
        }
    }

    /// Complete the request stream, letting the HTTP body end.
    ///
    /// Further [`send`](GrpcSender::send) calls fail deterministically.
    /// Completing twice is a no-op.
    pub fn finish(&mut self) {
        self.tx = None;
    }

    /// Whether the stream has been completed.
    pub fn is_finished(&self) -> bool {
        self.tx.is_none()
    }
}

impl<T> std::fmt::Debug for GrpcSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcSender")
            .field("finished", &self.tx.is_none())
            .finish_non_exhaustive()
    }
}

/// Future resolving to a streaming call's response.
///
/// Returned by the client- and bidi-streaming entry points so the
/// writer can be used before response headers arrive. Dropping it
/// cancels the call.
pub struct ResponseFuture<T> {
    pub(crate) inner: BoxFuture<'static, Result<T, ClientError>>,
}

impl<T> Future for ResponseFuture<T> {
    type Output = Result<T, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl<T> std::fmt::Debug for ResponseFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResponseFuture")
    }
}
