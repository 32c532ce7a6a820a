//! Protocol module: frame codec, message types and the payload codec.

pub mod codec;
pub mod frame;
pub mod messages;
pub mod sequence;

pub use codec::{decode_message, encode_message, ProtocolError};
pub use frame::{decode_frame, encode_frame, Decoded, Frame, FrameAssembler, FrameError};
pub use messages::*;
pub use sequence::TokenCounter;
