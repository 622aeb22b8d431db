//! Request body types for the HTTP transport.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;

use crate::error::ClientError;

pin_project! {
    /// Request body for an RPC call.
    ///
    /// A gRPC request body is never formless: it is either the complete
    /// frame-encoded request message (unary and server-streaming calls)
    /// or a sequence of frames pulled from the call's stream writer
    /// (client- and bidi-streaming calls). The two variants mirror
    /// that split; there is no separate empty case, since even an
    /// empty message frames to a 5-byte header and a zero-length
    /// buffer simply ends the body without emitting a frame.
    #[project = TransportBodyProj]
    pub enum TransportBody {
        /// The whole frame-encoded request, handed over in one piece.
        Full { frames: Option<Bytes> },
        /// Frames produced incrementally by the call's stream writer.
        Streaming {
            #[pin]
            stream: Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>,
        },
    }
}

impl TransportBody {
    /// Create a body from the complete frame-encoded request.
    pub fn full(frames: Bytes) -> Self {
        TransportBody::Full {
            frames: Some(frames),
        }
    }

    /// Create a body fed by the call's stream writer.
    pub fn streaming<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, ClientError>> + Send + 'static,
    {
        TransportBody::Streaming {
            stream: Box::pin(stream),
        }
    }

    /// Bytes still to be sent, when knowable up front.
    fn remaining(&self) -> Option<u64> {
        match self {
            TransportBody::Full { frames } => {
                Some(frames.as_ref().map_or(0, |f| f.len() as u64))
            }
            TransportBody::Streaming { .. } => None,
        }
    }
}

impl Body for TransportBody {
    type Data = Bytes;
    type Error = ClientError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            TransportBodyProj::Full { frames } => {
                // Emit the request exactly once; a zero-length buffer
                // produces no frame at all.
                let frame = frames
                    .take()
                    .filter(|frames| !frames.is_empty())
                    .map(|frames| Ok(Frame::data(frames)));
                Poll::Ready(frame)
            }
            TransportBodyProj::Streaming { stream } => stream
                .poll_next(cx)
                .map(|next| next.map(|chunk| chunk.map(Frame::data))),
        }
    }

    fn is_end_stream(&self) -> bool {
        // A writer-fed body ends only when the writer finishes, which
        // cannot be known without polling.
        matches!(self.remaining(), Some(0))
    }

    fn size_hint(&self) -> SizeHint {
        match self.remaining() {
            Some(len) => SizeHint::with_exact(len),
            None => SizeHint::default(),
        }
    }
}

impl std::fmt::Debug for TransportBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportBody::Full { frames } => f
                .debug_struct("TransportBody::Full")
                .field("remaining", &frames.as_ref().map(Bytes::len))
                .finish(),
            TransportBody::Streaming { .. } => f.write_str("TransportBody::Streaming"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_full_body_emits_one_data_frame() {
        let frames = Bytes::from_static(&[0x00, 0x00, 0x00, 0x00, 0x02, 0xaa, 0xbb]);
        let mut body = TransportBody::full(frames.clone());
        assert!(!body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(frames.len() as u64));

        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), frames);

        assert!(body.frame().await.is_none());
        assert!(body.is_end_stream());
    }

    #[tokio::test]
    async fn test_zero_length_body_ends_immediately() {
        let mut body = TransportBody::full(Bytes::new());
        assert!(body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(0));

        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn test_streaming_body_forwards_writer_chunks() {
        let chunks = vec![
            Ok(Bytes::from_static(b"frame one")),
            Ok(Bytes::from_static(b"frame two")),
        ];
        let body = TransportBody::streaming(futures::stream::iter(chunks));
        assert!(!body.is_end_stream());
        assert!(body.size_hint().exact().is_none());

        let collected = body.collect().await.unwrap();
        assert_eq!(collected.to_bytes(), Bytes::from_static(b"frame oneframe two"));
    }

    #[tokio::test]
    async fn test_streaming_body_surfaces_writer_error() {
        let chunks = vec![
            Ok(Bytes::from_static(b"frame one")),
            Err(ClientError::Transport("writer gone".into())),
        ];
        let body = TransportBody::streaming(futures::stream::iter(chunks));

        assert!(body.collect().await.is_err());
    }
}
