//! gRPC message framing.
//!
//! Every message on a gRPC stream is length-prefixed:
//!
//! ```text
//! [flag:1][length:4, big-endian][payload:length]
//! ```
//!
//! Flag bit 0 marks a compressed payload. In gRPC-Web, flag bit 7
//! redefines the frame as a trailer frame whose payload is an
//! HTTP/1-style header block carrying `grpc-status` and friends.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the frame header (1 byte flag + 4 bytes length).
pub const FRAME_HEADER_LEN: usize = 5;

/// Flag bit 0: the payload is compressed.
pub const FLAG_COMPRESSED: u8 = 0x01;

/// Flag bit 7: the frame carries trailers (gRPC-Web only).
pub const FLAG_TRAILERS: u8 = 0x80;

/// Default maximum accepted message size (4 MiB, the gRPC default).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Framing errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// A frame announced a length above the configured receive limit.
    #[error("message of {length} bytes exceeds the {limit} byte receive limit")]
    Oversize { length: usize, limit: usize },

    /// The stream ended mid-frame.
    #[error("stream ended with {remaining} bytes of an incomplete frame")]
    Truncated { remaining: usize },
}

/// A single decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// The raw flag byte.
    pub flags: u8,
    /// The frame payload.
    pub payload: Bytes,
}

impl Frame {
    /// Whether the compressed bit is set.
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    /// Whether this is a gRPC-Web trailer frame.
    pub fn is_trailers(&self) -> bool {
        self.flags & FLAG_TRAILERS != 0
    }
}

/// Encode a message payload into wire format.
pub fn encode_frame(payload: &[u8], compressed: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u8(if compressed { FLAG_COMPRESSED } else { 0 });
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Encode a trailer block into a gRPC-Web trailer frame.
pub fn encode_trailers_frame(block: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + block.len());
    buf.put_u8(FLAG_TRAILERS);
    buf.put_u32(block.len() as u32);
    buf.put_slice(block);
    buf.freeze()
}

/// Stateful frame decoder.
///
/// Feed byte chunks in as they arrive off the wire; [`decode`](Self::decode)
/// yields complete frames and returns `None` while more data is needed.
/// Once the byte source is exhausted, call [`check_eof`](Self::check_eof)
/// to reject a partial frame left in the buffer.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_message_size: usize,
}

impl FrameDecoder {
    /// Create a decoder with the given receive-size limit.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_message_size,
        }
    }

    /// Feed data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame.
    pub fn decode(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let flags = self.buffer[0];
        let length = u32::from_be_bytes([
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
        ]) as usize;

        if length > self.max_message_size {
            return Err(FrameError::Oversize {
                length,
                limit: self.max_message_size,
            });
        }

        if self.buffer.len() < FRAME_HEADER_LEN + length {
            return Ok(None);
        }

        self.buffer.advance(FRAME_HEADER_LEN);
        let payload = self.buffer.split_to(length).freeze();

        Ok(Some(Frame { flags, payload }))
    }

    /// Number of buffered bytes not yet consumed by a complete frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Validate that no partial frame remains after the source ended.
    pub fn check_eof(&self) -> Result<(), FrameError> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(FrameError::Truncated {
                remaining: self.buffer.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame() {
        let frame = encode_frame(b"hello", false);
        assert_eq!(frame[0], 0x00);
        assert_eq!(u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]), 5);
        assert_eq!(&frame[5..], b"hello");
    }

    #[test]
    fn test_encode_frame_compressed() {
        let frame = encode_frame(b"hello", true);
        assert_eq!(frame[0], FLAG_COMPRESSED);
    }

    #[test]
    fn test_encode_trailers_frame() {
        let frame = encode_trailers_frame(b"grpc-status:0\r\n");
        assert_eq!(frame[0], FLAG_TRAILERS);
        assert_eq!(
            u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize,
            15
        );
    }

    #[test]
    fn test_decode_single_frame() {
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
        decoder.feed(&encode_frame(b"payload", false));

        let frame = decoder.decode().unwrap().unwrap();
        assert!(!frame.is_compressed());
        assert!(!frame.is_trailers());
        assert_eq!(frame.payload, Bytes::from_static(b"payload"));

        assert!(decoder.decode().unwrap().is_none());
        assert!(decoder.check_eof().is_ok());
    }

    #[test]
    fn test_decode_incremental() {
        let wire = encode_frame(b"split across reads", false);
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);

        // Feed one byte at a time; the frame completes only at the end.
        for (i, byte) in wire.iter().enumerate() {
            decoder.feed(&[*byte]);
            let decoded = decoder.decode().unwrap();
            if i + 1 < wire.len() {
                assert!(decoded.is_none());
            } else {
                assert_eq!(decoded.unwrap().payload, Bytes::from_static(b"split across reads"));
            }
        }
    }

    #[test]
    fn test_decode_multiple_frames() {
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
        decoder.feed(&encode_frame(b"one", false));
        decoder.feed(&encode_frame(b"two", false));

        assert_eq!(decoder.decode().unwrap().unwrap().payload, Bytes::from_static(b"one"));
        assert_eq!(decoder.decode().unwrap().unwrap().payload, Bytes::from_static(b"two"));
        assert!(decoder.decode().unwrap().is_none());
    }

    #[test]
    fn test_decode_trailer_flag() {
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
        decoder.feed(&encode_trailers_frame(b"grpc-status:0\r\n"));

        let frame = decoder.decode().unwrap().unwrap();
        assert!(frame.is_trailers());
        assert!(!frame.is_compressed());
    }

    #[test]
    fn test_decode_oversize() {
        let mut decoder = FrameDecoder::new(16);
        decoder.feed(&encode_frame(&[0u8; 32], false));

        assert_eq!(
            decoder.decode(),
            Err(FrameError::Oversize {
                length: 32,
                limit: 16
            })
        );
    }

    #[test]
    fn test_check_eof_partial_header() {
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
        decoder.feed(&[0x00, 0x00, 0x00]);

        assert!(decoder.decode().unwrap().is_none());
        assert_eq!(decoder.check_eof(), Err(FrameError::Truncated { remaining: 3 }));
    }

    #[test]
    fn test_check_eof_partial_payload() {
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
        let wire = encode_frame(b"abcdef", false);
        decoder.feed(&wire[..8]);

        assert!(decoder.decode().unwrap().is_none());
        assert!(decoder.check_eof().is_err());
    }

    #[test]
    fn test_empty_payload_frame() {
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
        decoder.feed(&encode_frame(b"", false));

        let frame = decoder.decode().unwrap().unwrap();
        assert!(frame.payload.is_empty());
    }
}
