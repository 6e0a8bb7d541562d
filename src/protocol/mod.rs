//! Logical protocol frames and the stream-transport wire codec.

pub mod frame;
pub mod wire;

pub use frame::{Frame, unix_now};
pub use wire::{RecordSplitter, encode_record};
