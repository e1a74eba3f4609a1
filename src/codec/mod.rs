//! Wire value encoding and decoding.

mod cursor;
mod decode;
mod encode;
mod numeric;

pub(crate) use decode::decode_row;
pub use decode::decode_value;
pub use encode::{ParamBuffers, WireParam};
