use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::header::{parse_forwarded, DatagramKind, ForwardedDatagram, Sender};
use super::queue::{InboundQueue, Pushed};
use super::PacketConn;
use crate::config::SamConfig;
use crate::control::ControlChannel;
use crate::destination::{Destination, DestinationHash};
use crate::error::{Result, SamError};
use crate::naming;
use crate::primary::SubSession;
use crate::protocol::{Command, SessionOptions};
use crate::session::base::SessionCore;
use crate::session::{DestinationSpec, Session, Style};
use crate::utils::log::{log_debug, log_error, log_warn};

const MAX_UDP_PACKET: usize = 64 * 1024;
/// Pause after a failed socket read.
const RECV_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Consecutive failed reads before the receive loop gives up.
const MAX_RECV_FAILURES: u32 = 16;

/// A DATAGRAM, DATAGRAM2, DATAGRAM3 or RAW session.
///
/// Inbound messages arrive on a local UDP socket the router forwards to and
/// are queued by a background task. Outbound messages go over the control
/// channel and get no reply.
#[derive(Clone)]
pub struct DatagramSession {
    inner: Arc<DatagramInner>,
}

pub(crate) struct DatagramInner {
    core: SessionCore,
    kind: DatagramKind,
    local_addr: SocketAddr,
    socket: StdMutex<Option<Arc<UdpSocket>>>,
    queue: Arc<InboundQueue<ForwardedDatagram>>,
    receiver: StdMutex<Option<JoinHandle<()>>>,
    read_timeout: StdMutex<Option<Duration>>,
}

/// A UDP socket bound ahead of session creation, and the options announcing it.
pub(crate) struct UdpBinding {
    socket: UdpSocket,
    local_addr: SocketAddr,
    pub(crate) options: SessionOptions,
    raw_header: bool,
}

impl UdpBinding {
    /// Bind on `udp_host` at the requested `PORT` (0 picks one) and rewrite
    /// `PORT`/`HOST` to what the router must forward to.
    ///
    /// Binding first means nothing the router forwards right after creation
    /// is lost.
    pub(crate) async fn bind(
        config: &SamConfig,
        kind: DatagramKind,
        mut options: SessionOptions,
    ) -> Result<Self> {
        let requested = options.port("PORT")?.unwrap_or(0);
        let socket = UdpSocket::bind((config.udp_host.as_str(), requested)).await?;
        let local_addr = socket.local_addr()?;

        options.set("PORT", local_addr.port().to_string())?;
        if !options.contains("HOST") {
            options.set("HOST", config.udp_host.clone())?;
        }
        let raw_header = kind == DatagramKind::Raw
            && options
                .get("HEADER")
                .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        log_debug!("DatagramSession", "bound forwarding socket {}", local_addr);
        Ok(Self {
            socket,
            local_addr,
            options,
            raw_header,
        })
    }

    pub(crate) fn port(&self) -> u16 {
        self.local_addr.port()
    }
}

impl DatagramSession {
    pub async fn create(
        config: SamConfig,
        kind: DatagramKind,
        id: &str,
        destination: DestinationSpec,
        options: SessionOptions,
    ) -> Result<Self> {
        let channel = ControlChannel::connect(config).await?;
        let session = Self::with_channel(channel.clone(), kind, id, destination, options).await;
        if session.is_err() {
            channel.close().await;
        }
        session
    }

    /// Create the session on an existing channel, which it then owns.
    pub async fn with_channel(
        channel: Arc<ControlChannel>,
        kind: DatagramKind,
        id: &str,
        destination: DestinationSpec,
        options: SessionOptions,
    ) -> Result<Self> {
        let binding = UdpBinding::bind(channel.config(), kind, options).await?;
        let core = SessionCore::create(
            channel,
            kind.style(),
            id,
            &destination,
            binding.options.clone(),
        )
        .await?;
        Ok(Self::start(core, kind, binding))
    }

    /// Spawn the receive loop for a freshly created session.
    pub(crate) fn start(core: SessionCore, kind: DatagramKind, binding: UdpBinding) -> Self {
        let capacity = core.channel().config().datagram_queue_capacity;
        let router_ip = core.channel().router_addr().ip();
        let queue = Arc::new(InboundQueue::new(capacity));
        let socket = Arc::new(binding.socket);

        let receiver = tokio::spawn(receive_loop(ReceiveLoop {
            socket: socket.clone(),
            router_ip,
            kind,
            raw_header: binding.raw_header,
            session_id: core.id().to_string(),
            queue: queue.clone(),
        }));

        Self {
            inner: Arc::new(DatagramInner {
                core,
                kind,
                local_addr: binding.local_addr,
                socket: StdMutex::new(Some(socket)),
                queue,
                receiver: StdMutex::new(Some(receiver)),
                read_timeout: StdMutex::new(None),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<DatagramInner> {
        &self.inner
    }

    pub fn kind(&self) -> DatagramKind {
        self.inner.kind
    }

    /// Where the router forwards inbound datagrams.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn options(&self) -> &SessionOptions {
        self.inner.core.options()
    }

    /// Send `payload` to `destination`, a base64 destination or a name.
    ///
    /// Oversized payloads are refused before anything is written.
    pub async fn send(&self, payload: &[u8], destination: &str) -> Result<()> {
        let core = &self.inner.core;
        core.ensure_open()?;

        let limit = self.inner.kind.max_payload();
        if payload.len() > limit {
            return Err(SamError::PayloadTooLarge {
                size: payload.len(),
                limit,
            });
        }

        let command = Command::datagram_send(core.style(), core.id(), destination, payload.len());
        core.channel().send_with_payload(command, payload).await
    }

    pub async fn send_to(&self, payload: &[u8], destination: &Destination) -> Result<()> {
        self.send(payload, destination.to_base64()).await
    }

    /// Next inbound datagram, waiting as long as it takes.
    pub async fn receive(&self) -> Result<ForwardedDatagram> {
        let core = &self.inner.core;
        core.ensure_open()?;
        self.inner
            .queue
            .pop()
            .await
            .ok_or_else(|| core.closed_error())
    }

    pub async fn receive_timeout(&self, limit: Duration) -> Result<ForwardedDatagram> {
        timeout(limit, self.receive())
            .await
            .map_err(|_| SamError::Timeout("receive"))?
    }

    /// Full destination of a sender. Datagram3 hashes cost a naming lookup.
    pub async fn resolve_sender(&self, sender: &Sender) -> Result<Destination> {
        match sender {
            Sender::Destination(dest) => Ok(dest.clone()),
            Sender::Hash(hash) => self.resolve_hash(hash).await,
        }
    }

    pub async fn resolve_hash(&self, hash: &DestinationHash) -> Result<Destination> {
        self.inner.core.ensure_open()?;
        naming::lookup_on(self.inner.core.channel(), &hash.to_b32_address()).await
    }

    /// Datagrams queued and not yet read.
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Datagrams discarded because readers fell behind.
    pub fn dropped(&self) -> u64 {
        self.inner.queue.dropped()
    }
}

impl DatagramInner {
    /// Stop the receive loop, close the UDP socket and discard the queue.
    fn shutdown(&self) {
        if let Some(receiver) = self
            .receiver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            receiver.abort();
        }
        self.socket
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.queue.close();
    }
}

impl SubSession for DatagramInner {
    fn core(&self) -> &SessionCore {
        &self.core
    }

    fn release(&self) {
        self.shutdown();
    }
}

impl Drop for DatagramInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ReceiveLoop {
    socket: Arc<UdpSocket>,
    router_ip: IpAddr,
    kind: DatagramKind,
    raw_header: bool,
    session_id: String,
    queue: Arc<InboundQueue<ForwardedDatagram>>,
}

async fn receive_loop(ctx: ReceiveLoop) {
    let mut buf = vec![0u8; MAX_UDP_PACKET];
    let mut backoff = ErrorBackoff::default();
    loop {
        let (len, from) = match ctx.socket.recv_from(&mut buf).await {
            Ok(received) => {
                backoff.succeeded();
                received
            }
            Err(e) => {
                log_warn!("DatagramSession", "{}: receive failed: {}", ctx.session_id, e);
                match backoff.failed() {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    None => {
                        log_error!(
                            "DatagramSession",
                            "{}: socket keeps failing, no longer receiving",
                            ctx.session_id
                        );
                        ctx.queue.close();
                        return;
                    }
                }
            }
        };

        if !same_host(from.ip(), ctx.router_ip) {
            log_warn!(
                "DatagramSession",
                "{}: dropping packet from {} (router is {})",
                ctx.session_id,
                from,
                ctx.router_ip
            );
            continue;
        }

        let datagram = match parse_forwarded(ctx.kind, ctx.raw_header, &buf[..len], &ctx.session_id) {
            Ok(datagram) => datagram,
            Err(e) => {
                log_warn!("DatagramSession", "{}: unparseable packet: {}", ctx.session_id, e);
                continue;
            }
        };

        match ctx.queue.push(datagram) {
            Pushed::Queued => {}
            Pushed::Evicted => log_warn!(
                "DatagramSession",
                "{}: inbound queue full, dropped oldest datagram",
                ctx.session_id
            ),
            Pushed::Closed => return,
        }
    }
}

/// Counts back-to-back socket failures.
#[derive(Debug, Default)]
struct ErrorBackoff {
    consecutive: u32,
}

impl ErrorBackoff {
    /// Delay before the next read, or `None` once failures keep repeating.
    fn failed(&mut self) -> Option<Duration> {
        self.consecutive += 1;
        (self.consecutive < MAX_RECV_FAILURES).then_some(RECV_RETRY_DELAY)
    }

    fn succeeded(&mut self) {
        self.consecutive = 0;
    }
}

fn same_host(a: IpAddr, b: IpAddr) -> bool {
    a == b || (a.is_loopback() && b.is_loopback())
}

impl Session for DatagramSession {
    fn id(&self) -> &str {
        self.inner.core.id()
    }

    fn style(&self) -> Style {
        self.inner.core.style()
    }

    fn destination(&self) -> &Arc<Destination> {
        self.inner.core.destination()
    }

    fn is_closed(&self) -> bool {
        self.inner.core.is_closed()
    }

    async fn close(&self) -> Result<()> {
        self.inner.shutdown();
        self.inner.core.close().await
    }
}

impl PacketConn for DatagramSession {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Option<Sender>)> {
        let limit = *self
            .inner
            .read_timeout
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let datagram = match limit {
            Some(limit) => self.receive_timeout(limit).await?,
            None => self.receive().await?,
        };
        // Excess bytes are discarded, as with a UDP socket.
        let len = datagram.payload.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram.payload[..len]);
        Ok((len, datagram.sender))
    }

    async fn send_to(&self, buf: &[u8], destination: &Destination) -> Result<usize> {
        DatagramSession::send_to(self, buf, destination).await?;
        Ok(buf.len())
    }

    fn local_destination(&self) -> &Arc<Destination> {
        self.inner.core.destination()
    }

    fn set_read_timeout(&self, limit: Option<Duration>) {
        *self
            .inner
            .read_timeout
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = limit;
    }
}

impl std::fmt::Debug for DatagramSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramSession")
            .field("id", &self.inner.core.id())
            .field("kind", &self.inner.kind)
            .field("local_addr", &self.inner.local_addr)
            .field("closed", &self.inner.core.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn loopback_addresses_count_as_one_host() {
        let v4 = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        assert!(same_host(v4, v6));
        assert!(!same_host(v4, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
    }

    #[test]
    fn repeated_socket_failures_give_up() {
        let mut backoff = ErrorBackoff::default();
        for _ in 1..MAX_RECV_FAILURES {
            assert_eq!(backoff.failed(), Some(RECV_RETRY_DELAY));
        }
        assert_eq!(backoff.failed(), None);

        backoff.succeeded();
        assert_eq!(backoff.failed(), Some(RECV_RETRY_DELAY));
    }

    #[tokio::test]
    async fn binding_rewrites_port_and_host() {
        let config = SamConfig::default();
        let options = SessionOptions::parse(["PORT=0", "HEADER=true"]).unwrap();
        let binding = UdpBinding::bind(&config, DatagramKind::Raw, options).await.unwrap();

        assert_ne!(binding.port(), 0);
        assert_eq!(binding.options.get("PORT"), Some(binding.port().to_string().as_str()));
        assert_eq!(binding.options.get("HOST"), Some("127.0.0.1"));
        assert!(binding.raw_header);
    }

    #[tokio::test]
    async fn header_flag_only_applies_to_raw() {
        let config = SamConfig::default();
        let options = SessionOptions::parse(["HEADER=true"]).unwrap();
        let binding = UdpBinding::bind(&config, DatagramKind::Datagram, options).await.unwrap();
        assert!(!binding.raw_header);
    }
}
