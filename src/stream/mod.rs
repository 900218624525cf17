//! Reliable streams over per-connection auxiliary sockets.

mod connection;
mod listener;
mod session;

pub use connection::StreamConnection;
pub use listener::StreamListener;
pub use session::StreamSession;
