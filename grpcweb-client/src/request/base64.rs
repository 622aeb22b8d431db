//! Request-side base64 encoding for gRPC-Web text mode.
//!
//! Base64 works on 3-byte groups, but the framed request body is written
//! in arbitrary chunks. [`Base64Encoder`] re-chunks: it encodes every
//! complete group as input arrives and carries a 0–2 byte remainder to
//! the next write, so the concatenated output is the canonical base64
//! encoding of the concatenated input.

use std::pin::Pin;
use std::task::{Context, Poll};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use futures::Stream;

use crate::error::ClientError;

/// Working-buffer size for encoded output.
const ENCODE_BUF_LEN: usize = 4096;

/// Largest input slice whose encoding fits the working buffer.
const MAX_GROUP_INPUT: usize = ENCODE_BUF_LEN / 4 * 3;

/// Streaming base64 encoder with 3-byte-group buffering.
#[derive(Debug, Default)]
pub struct Base64Encoder {
    /// Unencoded leading bytes held over from the previous write.
    remainder: [u8; 3],
    remainder_len: usize,
}

impl Base64Encoder {
    /// Create an encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a chunk of input.
    ///
    /// Returns the encoded bytes ready to forward, which may be empty
    /// when the input only tops up the remainder.
    pub fn encode(&mut self, mut data: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(ENCODE_BUF_LEN.min((data.len() / 3 + 2) * 4));
        let mut scratch = [0u8; ENCODE_BUF_LEN];

        // Top up the carried remainder to a full group first.
        if self.remainder_len > 0 {
            let take = data.len().min(3 - self.remainder_len);
            self.remainder[self.remainder_len..self.remainder_len + take]
                .copy_from_slice(&data[..take]);
            self.remainder_len += take;
            data = &data[take..];

            if self.remainder_len < 3 {
                return out.freeze();
            }

            let written = STANDARD
                .encode_slice(&self.remainder[..3], &mut scratch[..4])
                .expect("4-byte scratch fits one base64 group");
            out.extend_from_slice(&scratch[..written]);
            self.remainder_len = 0;
        }

        // Encode whole groups, bounded per round by the working buffer.
        while data.len() >= 3 {
            let take = (data.len() - data.len() % 3).min(MAX_GROUP_INPUT);
            let written = STANDARD
                .encode_slice(&data[..take], &mut scratch)
                .expect("scratch sized for MAX_GROUP_INPUT");
            out.extend_from_slice(&scratch[..written]);
            data = &data[take..];
        }

        // Carry the trailing partial group.
        self.remainder[..data.len()].copy_from_slice(data);
        self.remainder_len = data.len();

        out.freeze()
    }

    /// Flush the held remainder as a final padded group.
    ///
    /// Returns an empty buffer when no remainder is held.
    pub fn finish(&mut self) -> Bytes {
        if self.remainder_len == 0 {
            return Bytes::new();
        }

        let mut scratch = [0u8; 4];
        let written = STANDARD
            .encode_slice(&self.remainder[..self.remainder_len], &mut scratch)
            .expect("4-byte scratch fits one base64 group");
        self.remainder_len = 0;

        Bytes::copy_from_slice(&scratch[..written])
    }
}

/// Body adapter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodeState {
    /// Forwarding encoded chunks from the inner stream.
    Streaming,
    /// Inner stream exhausted; the padded remainder is pending.
    Flush,
    /// All bytes emitted.
    Done,
}

/// Stream adapter that base64-encodes a framed request body.
///
/// Wraps the byte stream feeding [`TransportBody::streaming`] when the
/// client speaks `application/grpc-web-text`.
///
/// [`TransportBody::streaming`]: crate::transport::TransportBody::streaming
pub struct Base64EncodeStream<S> {
    inner: S,
    encoder: Base64Encoder,
    state: EncodeState,
}

impl<S> Base64EncodeStream<S> {
    /// Wrap a byte stream.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            encoder: Base64Encoder::new(),
            state: EncodeState::Streaming,
        }
    }
}

impl<S> Unpin for Base64EncodeStream<S> where S: Unpin {}

impl<S> Stream for Base64EncodeStream<S>
where
    S: Stream<Item = Result<Bytes, ClientError>> + Unpin,
{
    type Item = Result<Bytes, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match this.state {
                EncodeState::Streaming => match Pin::new(&mut this.inner).poll_next(cx) {
                    Poll::Ready(Some(Ok(chunk))) => {
                        let encoded = this.encoder.encode(&chunk);
                        if !encoded.is_empty() {
                            return Poll::Ready(Some(Ok(encoded)));
                        }
                        // Chunk absorbed into the remainder; keep pulling.
                    }
                    Poll::Ready(Some(Err(err))) => {
                        this.state = EncodeState::Done;
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Ready(None) => {
                        this.state = EncodeState::Flush;
                    }
                    Poll::Pending => return Poll::Pending,
                },
                EncodeState::Flush => {
                    this.state = EncodeState::Done;
                    let tail = this.encoder.finish();
                    if !tail.is_empty() {
                        return Poll::Ready(Some(Ok(tail)));
                    }
                }
                EncodeState::Done => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn collect(encoder: &mut Base64Encoder, writes: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for write in writes {
            out.extend_from_slice(&encoder.encode(write));
        }
        out.extend_from_slice(&encoder.finish());
        out
    }

    #[test]
    fn test_three_chunk_streaming() {
        // "f" then "oo" encodes exactly once as "Zm9v".
        let mut encoder = Base64Encoder::new();

        let first = encoder.encode(&[0x66]);
        assert!(first.is_empty());

        let second = encoder.encode(&[0x6f, 0x6f]);
        assert_eq!(&second[..], b"Zm9v");

        assert!(encoder.finish().is_empty());
    }

    #[test]
    fn test_partial_flush_pads() {
        let mut encoder = Base64Encoder::new();
        assert!(encoder.encode(&[0x66, 0x6f]).is_empty());
        assert_eq!(&encoder.finish()[..], b"Zm8=");
    }

    #[test]
    fn test_single_byte_flush() {
        let mut encoder = Base64Encoder::new();
        assert!(encoder.encode(b"f").is_empty());
        assert_eq!(&encoder.finish()[..], b"Zg==");
    }

    #[test]
    fn test_remainder_then_whole_groups() {
        let mut encoder = Base64Encoder::new();
        let out = collect(&mut encoder, &[b"a", b"bcdefg"]);
        assert_eq!(out, STANDARD.encode(b"abcdefg").into_bytes());
    }

    #[test]
    fn test_matches_one_shot_encoding_across_splits() {
        let input: Vec<u8> = (0u8..=255).cycle().take(10_000).collect();
        let expected = STANDARD.encode(&input).into_bytes();

        for split in [1usize, 2, 3, 4, 5, 7, 64, 1000, 2999, 3000, 3001] {
            let mut encoder = Base64Encoder::new();
            let mut out = Vec::new();
            for chunk in input.chunks(split) {
                out.extend_from_slice(&encoder.encode(chunk));
            }
            out.extend_from_slice(&encoder.finish());
            assert_eq!(out, expected, "split size {split}");
        }
    }

    #[test]
    fn test_empty_writes() {
        let mut encoder = Base64Encoder::new();
        assert!(encoder.encode(b"").is_empty());
        assert!(encoder.finish().is_empty());

        let out = collect(&mut encoder, &[b"ab", b"", b"c"]);
        assert_eq!(out, b"YWJj");
    }

    #[test]
    fn test_finish_resets_remainder() {
        let mut encoder = Base64Encoder::new();
        let _ = encoder.encode(b"a");
        let _ = encoder.finish();
        // A second flush emits nothing.
        assert!(encoder.finish().is_empty());
    }

    #[tokio::test]
    async fn test_encode_stream_forwards_and_flushes() {
        let chunks = vec![
            Ok(Bytes::from_static(&[0x66])),
            Ok(Bytes::from_static(&[0x6f, 0x6f])),
            Ok(Bytes::from_static(&[0x21])),
        ];
        let mut stream = Base64EncodeStream::new(futures::stream::iter(chunks));

        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(out, STANDARD.encode(b"foo!").into_bytes());
    }

    #[tokio::test]
    async fn test_encode_stream_empty_input() {
        let mut stream =
            Base64EncodeStream::new(futures::stream::iter(Vec::<Result<Bytes, ClientError>>::new()));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_encode_stream_propagates_errors() {
        let chunks = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(ClientError::Transport("writer gone".into())),
        ];
        let mut stream = Base64EncodeStream::new(futures::stream::iter(chunks));

        assert_eq!(&stream.next().await.unwrap().unwrap()[..], b"YWJj");
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }
}
