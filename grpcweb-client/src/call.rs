//! Per-call state and lifecycle.
//!
//! Every RPC owns one [`GrpcCall`], which drives the lifecycle:
//!
//! ```text
//!        ┌───────┐  send   ┌─────────┐ headers ok ┌────────┐ finish ┌──────┐
//! start→ │ Fresh ├────────▶│ Sending ├───────────▶│ Active ├───────▶│ Done │
//!        └───────┘         └────┬────┘            └───┬────┘        └──────┘
//!                               │ headers fail        │ cancel / deadline
//!                               ▼                     ▼
//!                             Fail                Cancelled
//! ```
//!
//! The shared slice of that state ([`CallShared`]) is the only part
//! touched from more than one execution context: the cancellation token,
//! the `deadline_reached` / `finished` / `disposed` bits, and the
//! trailers cell. Stream handles hold an `Arc` to it rather than owning
//! the call, so a disposed call is observed through cancellation instead
//! of a dangling reference.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use grpcweb_core::Trailers;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::transport::{ResponseBody, Transport, TransportBody};

/// Call state shared between the call, its timer, and stream handles.
#[derive(Debug)]
pub(crate) struct CallShared {
    /// The single internal cancellation join point. Triggered by the
    /// external token, the deadline timer, dispose-before-completion,
    /// and header validation failure. Triggering is idempotent.
    cancel: CancellationToken,
    /// Set only when the deadline timer fired before the call finished;
    /// distinguishes `DeadlineExceeded` from `Cancelled`.
    deadline_reached: AtomicBool,
    /// The response has been fully read and status resolved.
    finished: AtomicBool,
    /// The call has been torn down. Monotonic, set once.
    disposed: AtomicBool,
    /// Trailers, from either the HTTP/2 trailer fields or the gRPC-Web
    /// trailer frame. Written once, immutable afterwards.
    trailers: Mutex<Option<Trailers>>,
}

impl CallShared {
    pub(crate) fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline_reached: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            trailers: Mutex::new(None),
        }
    }

    /// The internal cancellation token.
    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn deadline_reached(&self) -> bool {
        self.deadline_reached.load(Ordering::SeqCst)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Mark the response finished. Returns whether this call flipped it.
    pub(crate) fn mark_finished(&self) -> bool {
        !self.finished.swap(true, Ordering::SeqCst)
    }

    /// Deadline timer fire. A no-op once the call finished, so
    /// `deadline_reached` is never set after `finished`.
    pub(crate) fn deadline_fired(&self) {
        if self.is_finished() {
            return;
        }
        self.deadline_reached.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Tear the call down. Idempotent; cancels in-flight work when the
    /// response had not finished.
    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.is_finished() {
            self.cancel.cancel();
        }
    }

    /// Store trailers. First writer wins; the map is immutable after.
    pub(crate) fn set_trailers(&self, trailers: Trailers) {
        let mut slot = self.trailers.lock().expect("trailers lock poisoned");
        if slot.is_none() {
            *slot = Some(trailers);
        }
    }

    pub(crate) fn trailers(&self) -> Option<Trailers> {
        self.trailers.lock().expect("trailers lock poisoned").clone()
    }

    /// The error a cancelled operation surfaces right now.
    pub(crate) fn cancellation_error(&self) -> ClientError {
        ClientError::cancellation(self.deadline_reached())
    }

    /// Map a transport fault per the deadline rule: once the timer fired,
    /// a broken connection is the deadline's fault, not the network's.
    pub(crate) fn map_transport_error(&self, error: ClientError) -> ClientError {
        if self.deadline_reached() {
            self.cancellation_error()
        } else {
            error
        }
    }
}

/// One RPC invocation's lifecycle driver.
///
/// Owns the shared state plus the tasks watching the deadline and the
/// external cancellation handle. Dropping the call disposes it.
#[derive(Debug)]
pub(crate) struct GrpcCall {
    shared: Arc<CallShared>,
    /// Effective timeout, already floored at zero. `None` = no deadline.
    timeout: Option<Duration>,
    timer: Option<JoinHandle<()>>,
    cancel_watcher: Option<JoinHandle<()>>,
}

impl GrpcCall {
    /// Create a call.
    ///
    /// Registers the external-cancellation relay immediately; the
    /// deadline timer is armed separately once the stream handles exist,
    /// so a zero timeout cannot race half-initialized state.
    pub(crate) fn new(
        timeout: Option<Duration>,
        external_cancel: Option<CancellationToken>,
    ) -> Self {
        let shared = Arc::new(CallShared::new());

        let cancel_watcher = external_cancel.map(|external| {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                tokio::select! {
                    _ = external.cancelled() => shared.cancel.cancel(),
                    _ = shared.cancel.cancelled() => {}
                }
            })
        });

        Self {
            shared,
            timeout,
            timer: None,
            cancel_watcher,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<CallShared> {
        &self.shared
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Arm the one-shot deadline timer. Fires at most once; a zero
    /// timeout cancels immediately.
    pub(crate) fn arm_deadline(&mut self) {
        let Some(timeout) = self.timeout else {
            return;
        };
        if self.timer.is_some() {
            return;
        }

        if timeout.is_zero() {
            self.shared.deadline_fired();
            return;
        }

        let shared = Arc::clone(&self.shared);
        self.timer = Some(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => shared.deadline_fired(),
                _ = shared.cancel.cancelled() => {}
            }
        }));
    }

    /// Launch the HTTP send and await the response headers, racing the
    /// internal cancellation token.
    pub(crate) async fn send<T: Transport + ?Sized>(
        &self,
        transport: &T,
        request: http::Request<TransportBody>,
    ) -> Result<http::Response<ResponseBody>, ClientError> {
        let send = transport.send(request);
        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Err(self.shared.cancellation_error()),
            response = send => response.map_err(|e| self.shared.map_transport_error(e)),
        }
    }

    /// Tear down the call: stop the timer and relay, cancel unfinished
    /// work. Idempotent.
    pub(crate) fn dispose(&mut self) {
        self.shared.dispose();
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(watcher) = self.cancel_watcher.take() {
            watcher.abort();
        }
    }
}

impl Drop for GrpcCall {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispose_before_finish_cancels() {
        let mut call = GrpcCall::new(None, None);
        let shared = Arc::clone(call.shared());

        call.dispose();
        assert!(shared.is_cancelled());
        assert!(!shared.deadline_reached());
    }

    #[tokio::test]
    async fn test_dispose_after_finish_does_not_cancel() {
        let mut call = GrpcCall::new(None, None);
        call.shared().mark_finished();

        call.dispose();
        assert!(!call.shared().is_cancelled());
    }

    #[tokio::test]
    async fn test_dispose_idempotent() {
        let mut call = GrpcCall::new(None, None);
        call.dispose();
        call.dispose();
        assert!(call.shared().is_cancelled());
    }

    #[tokio::test]
    async fn test_drop_disposes() {
        let shared = {
            let call = GrpcCall::new(None, None);
            Arc::clone(call.shared())
        };
        assert!(shared.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_and_marks() {
        let mut call = GrpcCall::new(Some(Duration::from_millis(50)), None);
        call.arm_deadline();

        call.shared().cancel_token().cancelled().await;
        assert!(call.shared().deadline_reached());
        assert!(matches!(
            call.shared().cancellation_error(),
            ClientError::Rpc(status) if status.code() == grpcweb_core::Code::DeadlineExceeded
        ));
    }

    #[tokio::test]
    async fn test_zero_timeout_cancels_on_arm() {
        let mut call = GrpcCall::new(Some(Duration::ZERO), None);
        assert!(!call.shared().is_cancelled());

        call.arm_deadline();
        assert!(call.shared().is_cancelled());
        assert!(call.shared().deadline_reached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_suppressed_after_finish() {
        let mut call = GrpcCall::new(Some(Duration::from_millis(50)), None);
        call.arm_deadline();
        call.shared().mark_finished();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!call.shared().deadline_reached());
        assert!(!call.shared().is_cancelled());
    }

    #[tokio::test]
    async fn test_external_cancel_relays() {
        let external = CancellationToken::new();
        let call = GrpcCall::new(None, Some(external.clone()));

        external.cancel();
        call.shared().cancel_token().cancelled().await;
        assert!(!call.shared().deadline_reached());
        assert!(matches!(
            call.shared().cancellation_error(),
            ClientError::Rpc(status) if status.code() == grpcweb_core::Code::Canceled
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_wins_over_external_cancel() {
        let external = CancellationToken::new();
        let mut call = GrpcCall::new(Some(Duration::from_millis(10)), Some(external.clone()));
        call.arm_deadline();

        call.shared().cancel_token().cancelled().await;
        // External cancel also firing must not flip the status back.
        external.cancel();
        tokio::task::yield_now().await;

        assert!(call.shared().deadline_reached());
        assert!(matches!(
            call.shared().cancellation_error(),
            ClientError::Rpc(status) if status.code() == grpcweb_core::Code::DeadlineExceeded
        ));
    }

    #[tokio::test]
    async fn test_trailers_first_writer_wins() {
        let shared = CallShared::new();

        let mut first = Trailers::new();
        first.insert("grpc-status", "0");
        shared.set_trailers(first);

        let mut second = Trailers::new();
        second.insert("grpc-status", "13");
        shared.set_trailers(second);

        assert_eq!(shared.trailers().unwrap().get("grpc-status"), Some("0"));
    }

    #[tokio::test]
    async fn test_map_transport_error() {
        let shared = CallShared::new();
        let err = shared.map_transport_error(ClientError::Transport("reset".into()));
        assert_eq!(err.code(), grpcweb_core::Code::Unavailable);

        shared.deadline_fired();
        let err = shared.map_transport_error(ClientError::Transport("reset".into()));
        assert_eq!(err.code(), grpcweb_core::Code::DeadlineExceeded);
    }
}
