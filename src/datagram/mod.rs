//! Connectionless messaging: DATAGRAM, DATAGRAM2, DATAGRAM3 and RAW.

mod header;
mod queue;
mod session;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::destination::Destination;
use crate::error::Result;

pub use header::{DatagramKind, ForwardedDatagram, Sender, MAX_RAW_PAYLOAD, MAX_REPLIABLE_PAYLOAD};
pub use session::DatagramSession;

pub(crate) use session::UdpBinding;

/// Packet-socket shaped access to a datagram session, for code written
/// against `recv_from`/`send_to`.
pub trait PacketConn {
    /// Copy the next payload into `buf`, truncating what does not fit.
    fn recv_from(&self, buf: &mut [u8]) -> impl Future<Output = Result<(usize, Option<Sender>)>> + Send;

    fn send_to(&self, buf: &[u8], destination: &Destination) -> impl Future<Output = Result<usize>> + Send;

    fn local_destination(&self) -> &Arc<Destination>;

    /// Bound every later `recv_from`; `None` waits indefinitely.
    fn set_read_timeout(&self, timeout: Option<Duration>);
}
