//! RESP wire protocol.

pub mod codec;
pub mod reply;

pub use codec::{CodecError, RespCodec};
pub use reply::Reply;
