//! Protocol-level types for the grpcweb client.
//!
//! This crate holds the pieces of the gRPC wire contract that are
//! independent of any HTTP transport:
//!
//! - [`status`]: status codes and the [`Status`] carried in trailers
//! - [`frame`]: length-prefixed message framing
//! - [`timeout`]: the `grpc-timeout` header codec
//! - [`trailers`]: trailer maps and the gRPC-Web trailer block codec

mod frame;
mod status;
mod timeout;
mod trailers;

pub use frame::{
    encode_frame, encode_trailers_frame, Frame, FrameDecoder, FrameError,
    DEFAULT_MAX_MESSAGE_SIZE, FLAG_COMPRESSED, FLAG_TRAILERS, FRAME_HEADER_LEN,
};
pub use status::{Code, Status};
pub use timeout::{decode_timeout, encode_timeout, TimeoutError};
pub use trailers::{
    parse_trailer_block, percent_decode_message, percent_encode_message, TrailerError, Trailers,
};
