//! Router connections: the line transport and the serialized control channel.

mod channel;
pub(crate) mod line;

pub use channel::ControlChannel;
