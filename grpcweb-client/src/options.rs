//! Per-call configuration.

use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

/// A caller-supplied metadata value: printable ASCII or raw bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataValue {
    /// An ASCII value sent verbatim.
    Ascii(String),
    /// A binary value, base64-encoded on the wire. The key must end in
    /// `-bin`.
    Binary(Vec<u8>),
}

/// Options for configuring an individual RPC call.
///
/// # Example
///
/// ```ignore
/// use grpcweb_client::CallOptions;
/// use std::time::Duration;
///
/// let options = CallOptions::new()
///     .timeout(Duration::from_secs(5))
///     .metadata("authorization", "Bearer token123")
///     .metadata_bin("trace-bin", vec![1, 2, 3]);
/// ```
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    /// Caller metadata, in insertion order.
    pub(crate) metadata: Vec<(String, MetadataValue)>,
    /// Absolute deadline. Takes precedence over `timeout`.
    pub(crate) deadline: Option<SystemTime>,
    /// Relative timeout, resolved against the wall clock at call start.
    pub(crate) timeout: Option<Duration>,
    /// External cancellation handle for this call.
    pub(crate) cancel: Option<CancellationToken>,
}

impl CallOptions {
    /// Create default call options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an ASCII metadata entry.
    ///
    /// Names are lowercased. Reserved names (`grpc-*`, `content-type`,
    /// `te`, `user-agent`) are skipped at request build time; in
    /// particular `grpc-timeout` is always computed from the deadline,
    /// never copied from here.
    pub fn metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((
            name.into().to_ascii_lowercase(),
            MetadataValue::Ascii(value.into()),
        ));
        self
    }

    /// Add a binary metadata entry.
    ///
    /// # Panics
    ///
    /// Panics if `name` does not end in `-bin`, the gRPC marker for
    /// base64-encoded values.
    pub fn metadata_bin(mut self, name: impl Into<String>, value: Vec<u8>) -> Self {
        let name = name.into().to_ascii_lowercase();
        assert!(
            name.ends_with("-bin"),
            "binary metadata keys must end in -bin"
        );
        self.metadata.push((name, MetadataValue::Binary(value)));
        self
    }

    /// Set an absolute deadline for the call.
    pub fn deadline(mut self, deadline: SystemTime) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a relative timeout, resolved when the call starts.
    ///
    /// Ignored when a [`deadline`](CallOptions::deadline) is also set.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach an external cancellation token.
    ///
    /// Cancelling the token cancels the call; the call observes it
    /// together with its own deadline with OR semantics.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Resolve the effective timeout against the current wall clock.
    ///
    /// An already-passed deadline yields `Duration::ZERO`.
    pub(crate) fn resolve_timeout(&self, default_timeout: Option<Duration>) -> Option<Duration> {
        if let Some(deadline) = self.deadline {
            return Some(
                deadline
                    .duration_since(SystemTime::now())
                    .unwrap_or(Duration::ZERO),
            );
        }
        self.timeout.or(default_timeout)
    }
}
