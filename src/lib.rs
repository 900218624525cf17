//! Client for the SAM v3.3 bridge of an I2P router.
//!
//! A [`ControlChannel`] carries the HELLO handshake and every session
//! command. Sessions come in four shapes:
//!
//! - [`StreamSession`] dials and accepts reliable streams, each on its own
//!   auxiliary socket.
//! - [`DatagramSession`] sends through the control channel and receives
//!   datagrams the router forwards to a local UDP socket.
//! - [`PrimarySession`] hosts stream and datagram sub-sessions behind one
//!   identity and one control channel.
//! - [`Resolver`] runs naming lookups and key generation.

pub mod config;
pub mod control;
pub mod datagram;
pub mod destination;
pub mod error;
pub mod naming;
pub mod primary;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod utils;

pub use config::SamConfig;
pub use control::ControlChannel;
pub use datagram::{DatagramKind, DatagramSession, ForwardedDatagram, PacketConn, Sender};
pub use destination::{Destination, DestinationHash};
pub use error::{ErrorKind, Result, ResultCode, SamError};
pub use naming::Resolver;
pub use primary::PrimarySession;
pub use protocol::SessionOptions;
pub use session::{DestinationSpec, Session, Style};
pub use stream::{StreamConnection, StreamListener, StreamSession};
