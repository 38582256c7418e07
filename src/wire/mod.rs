//! Wire Layer
//!
//! Binary messages of the upload protocol and the length-prefixed framing
//! that carries them over a TCP stream.

pub mod codec;
pub mod messages;

pub use codec::{read_frame, write_data_request, write_frame, MAX_FRAME_SIZE};
pub use messages::{ConfigReply, DataRequest, Opcode, Request, Response, SessionRequest};
