//! Response body decoding: base64 (text mode) and frame demultiplexing.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures::Stream;
use grpcweb_core::{FrameDecoder, Status, Trailers};
use http_body::Body;

use crate::call::CallShared;
use crate::error::ClientError;
use crate::transport::ResponseBody;

/// Streaming base64 decoder.
///
/// The wire chunks a gRPC-Web-text body at arbitrary boundaries, so up
/// to three characters of an incomplete quad carry over between reads.
/// Padding is expected only at the end of the stream.
#[derive(Debug, Default)]
pub struct Base64Decoder {
    carry: Vec<u8>,
}

impl Base64Decoder {
    /// Create a decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the complete quads available after appending `chunk`.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Bytes, ClientError> {
        self.carry.extend_from_slice(chunk);
        let quads = self.carry.len() - self.carry.len() % 4;
        if quads == 0 {
            return Ok(Bytes::new());
        }

        let decoded = STANDARD
            .decode(&self.carry[..quads])
            .map_err(|e| ClientError::Protocol(format!("invalid base64 in response body: {e}")))?;
        self.carry.drain(..quads);

        Ok(Bytes::from(decoded))
    }

    /// Validate that the stream ended on a quad boundary.
    pub fn finish(&self) -> Result<(), ClientError> {
        if self.carry.is_empty() {
            Ok(())
        } else {
            Err(ClientError::Protocol(format!(
                "response body ended with {} dangling base64 characters",
                self.carry.len()
            )))
        }
    }
}

/// Demultiplexes a response body into message payloads.
///
/// Layers, bottom up: the HTTP body (data frames plus, over native
/// gRPC, trailer fields), an optional base64 decode for text mode, and
/// the gRPC frame codec. Message frames are yielded to the consumer;
/// a gRPC-Web trailer frame is parsed and deposited on the call, after
/// which any further payload bytes are a protocol violation. Native
/// trailer fields are deposited the same way, so the reader above sees
/// one trailer source either way.
pub struct GrpcFrameStream {
    body: ResponseBody,
    frames: FrameDecoder,
    base64: Option<Base64Decoder>,
    shared: Arc<CallShared>,
    /// Trailers must arrive in-body before EOF.
    web: bool,
    trailers_seen: bool,
    done: bool,
}

impl GrpcFrameStream {
    pub(crate) fn new(
        body: ResponseBody,
        shared: Arc<CallShared>,
        web: bool,
        text: bool,
        max_message_size: usize,
    ) -> Self {
        Self {
            body,
            frames: FrameDecoder::new(max_message_size),
            base64: text.then(Base64Decoder::new),
            shared,
            web,
            trailers_seen: false,
            done: false,
        }
    }

    fn fail(&mut self, error: ClientError) -> Poll<Option<Result<Bytes, ClientError>>> {
        self.done = true;
        Poll::Ready(Some(Err(error)))
    }
}

impl Unpin for GrpcFrameStream {}

impl Stream for GrpcFrameStream {
    type Item = Result<Bytes, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.done {
                return Poll::Ready(None);
            }

            // Drain complete frames from the buffer first.
            match this.frames.decode() {
                Ok(Some(frame)) => {
                    if frame.is_trailers() {
                        if !this.web {
                            return this.fail(ClientError::Protocol(
                                "received a trailers frame outside gRPC-Web mode".into(),
                            ));
                        }
                        if this.trailers_seen {
                            return this.fail(ClientError::Protocol(
                                "received a second trailers frame".into(),
                            ));
                        }
                        match grpcweb_core::parse_trailer_block(&frame.payload) {
                            Ok(trailers) => this.shared.set_trailers(trailers),
                            Err(e) => return this.fail(e.into()),
                        }
                        this.trailers_seen = true;
                        // Nothing may follow the trailer frame.
                        if this.frames.buffered_len() > 0 {
                            return this.fail(ClientError::Protocol(
                                "received data after the trailers frame".into(),
                            ));
                        }
                        continue;
                    }

                    if this.trailers_seen {
                        return this.fail(ClientError::Protocol(
                            "received a message after the trailers frame".into(),
                        ));
                    }
                    if frame.is_compressed() {
                        return this.fail(ClientError::Rpc(Status::unimplemented(
                            "message compression is not supported by this client",
                        )));
                    }
                    return Poll::Ready(Some(Ok(frame.payload)));
                }
                Ok(None) => {}
                Err(e) => return this.fail(e.into()),
            }

            // Pull more body.
            match Pin::new(&mut this.body).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                    Ok(data) => {
                        let data = match &mut this.base64 {
                            Some(decoder) => match decoder.decode(&data) {
                                Ok(decoded) => decoded,
                                Err(e) => return this.fail(e),
                            },
                            None => data,
                        };
                        if this.trailers_seen && !data.is_empty() {
                            return this.fail(ClientError::Protocol(
                                "received data after the trailers frame".into(),
                            ));
                        }
                        this.frames.feed(&data);
                    }
                    Err(frame) => {
                        // Native HTTP/2 trailer fields; nothing may follow.
                        if let Ok(headers) = frame.into_trailers() {
                            this.shared.set_trailers(Trailers::from_header_map(&headers));
                            this.trailers_seen = true;
                        }
                    }
                },
                Poll::Ready(Some(Err(e))) => {
                    let error = if this.shared.is_cancelled() {
                        this.shared.cancellation_error()
                    } else {
                        this.shared.map_transport_error(e)
                    };
                    return this.fail(error);
                }
                Poll::Ready(None) => {
                    if this.shared.is_cancelled() && !this.trailers_seen {
                        return this.fail(this.shared.cancellation_error());
                    }
                    if let Some(decoder) = &this.base64 {
                        if let Err(e) = decoder.finish() {
                            return this.fail(e);
                        }
                    }
                    if let Err(e) = this.frames.check_eof() {
                        return this.fail(e.into());
                    }
                    if this.web && !this.trailers_seen {
                        return this.fail(ClientError::Protocol(
                            "response body ended without a trailers frame".into(),
                        ));
                    }
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
