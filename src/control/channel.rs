use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;

use super::line::LineConn;
use crate::config::SamConfig;
use crate::error::{Result, SamError};
use crate::protocol::{Command, Reply};
use crate::utils::log::{log_debug, log_error, log_info, log_warn};

/// The control socket shared by a session and, for a primary session, all of
/// its sub-sessions.
///
/// Exchanges are serialized by an async mutex, which hands out the socket in
/// FIFO order, so replies always match the request that produced them. Any
/// transport failure or deadline expiry during an exchange closes the channel
/// for good; there is no reconnection. The one exception is
/// [`ControlChannel::execute_abandonable`], whose late reply is skipped
/// instead.
pub struct ControlChannel {
    config: SamConfig,
    version: String,
    router_addr: SocketAddr,
    conn: Mutex<Option<Link>>,
    closed: AtomicBool,
    close_signal: Notify,
    ids: StdMutex<HashSet<String>>,
}

impl ControlChannel {
    /// Connect and run the HELLO handshake.
    ///
    /// A rejected handshake leaves nothing open.
    pub async fn connect(config: SamConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let mut conn = LineConn::connect(&config).await?;
        let router_addr = conn.peer_addr()?;
        let handshake = match config.command_deadline() {
            Some(limit) => timeout(limit, conn.hello(&config))
                .await
                .map_err(|_| SamError::Timeout("HELLO"))?,
            None => conn.hello(&config).await,
        };

        let version = match handshake {
            Ok(version) => version,
            Err(e) => {
                log_warn!("ControlChannel", "handshake with {} failed: {}", router_addr, e);
                conn.shutdown().await;
                return Err(e);
            }
        };
        log_info!("ControlChannel", "connected to {} with SAM {}", router_addr, version);

        Ok(Arc::new(Self {
            config,
            version,
            router_addr,
            conn: Mutex::new(Some(Link {
                conn,
                owed: VecDeque::new(),
            })),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
            ids: StdMutex::new(HashSet::new()),
        }))
    }

    /// Protocol version the router agreed to.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn config(&self) -> &SamConfig {
        &self.config
    }

    pub fn router_addr(&self) -> SocketAddr {
        self.router_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run one command/reply exchange under the configured deadline.
    pub async fn execute(&self, command: Command) -> Result<Reply> {
        self.execute_timeout(command, self.config.command_deadline())
            .await
    }

    /// Run one exchange with an explicit deadline; `None` waits forever.
    ///
    /// Expiry closes the channel: a reply may still arrive later and would be
    /// paired with the next request.
    pub async fn execute_timeout(&self, command: Command, limit: Option<Duration>) -> Result<Reply> {
        let line = command.encode()?;
        let name = command.name();
        log_debug!("ControlChannel", "-> {}", name);

        let reply = self
            .run(name, limit, Exchange::Request(&line))
            .await?
            .ok_or_else(|| SamError::protocol("no reply read"))?;
        log_debug!("ControlChannel", "<- {} {}", reply.topic(), reply.opcode().unwrap_or(""));
        Ok(reply)
    }

    /// Write a command followed by `payload`. The router sends no reply.
    pub async fn send_with_payload(&self, command: Command, payload: &[u8]) -> Result<()> {
        let line = command.encode()?;
        let name = command.name();
        self.run(name, self.config.command_deadline(), Exchange::Send(&line, payload))
            .await?;
        Ok(())
    }

    /// Best-effort exchange for commands whose outcome nobody waits on.
    ///
    /// If no reply arrives within `wait` the exchange is abandoned and
    /// `Ok(None)` returned; the channel stays open and the late reply is
    /// skipped by whichever exchange reads next.
    pub(crate) async fn execute_abandonable(
        &self,
        command: Command,
        wait: Duration,
    ) -> Result<Option<Reply>> {
        let line = command.encode()?;
        let name = command.name();
        let owed = Owed::for_command(&command);
        log_debug!("ControlChannel", "-> {} (abandonable)", name);

        // The outer deadline only guards the write.
        let limit = self.config.command_deadline().map(|d| d + wait);
        self.run(name, limit, Exchange::Abandonable(&line, wait, owed))
            .await
    }

    async fn run(
        &self,
        name: &'static str,
        limit: Option<Duration>,
        exchange: Exchange<'_>,
    ) -> Result<Option<Reply>> {
        // Registered before the flag check so a concurrent close cannot slip
        // between the two.
        let closing = self.close_signal.notified();
        tokio::pin!(closing);
        if self.is_closed() {
            return Err(SamError::ChannelClosed);
        }

        let mut guard = tokio::select! {
            guard = self.conn.lock() => guard,
            _ = &mut closing => return Err(SamError::ChannelClosed),
        };
        let link = guard.as_mut().ok_or(SamError::ChannelClosed)?;

        let io = async {
            match exchange {
                Exchange::Request(line) => {
                    link.conn.write_line(line).await?;
                    link.read_reply().await.map(Some)
                }
                Exchange::Send(line, payload) => link
                    .conn
                    .write_line_with_payload(line, payload)
                    .await
                    .map(|()| None),
                Exchange::Abandonable(line, wait, owed) => {
                    link.conn.write_line(line).await?;
                    match timeout(wait, link.read_reply()).await {
                        Ok(reply) => reply.map(Some),
                        Err(_) => {
                            log_warn!("ControlChannel", "{} unanswered, skipping its reply", name);
                            link.owed.push_back(owed);
                            Ok(None)
                        }
                    }
                }
            }
        };
        let result = tokio::select! {
            result = async {
                match limit {
                    Some(limit) => timeout(limit, io)
                        .await
                        .unwrap_or(Err(SamError::Timeout(name))),
                    None => io.await,
                }
            } => result,
            _ = &mut closing => Err(SamError::ChannelClosed),
        };

        if let Err(e) = &result {
            if e.is_fatal_to_channel() {
                if let Some(link) = guard.take() {
                    log_error!("ControlChannel", "{} failed, closing channel: {}", name, e);
                    self.mark_closed();
                    link.conn.shutdown().await;
                }
            }
        }
        result
    }

    /// Close the socket. Blocked and later exchanges fail with `ChannelClosed`.
    pub async fn close(&self) {
        if !self.mark_closed() {
            return;
        }
        // Waiters and any in-flight exchange drop out on the signal, so the
        // lock frees up promptly.
        let link = self.conn.lock().await.take();
        if let Some(link) = link {
            link.conn.shutdown().await;
        }
        log_info!("ControlChannel", "closed channel to {}", self.router_addr);
    }

    fn mark_closed(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.close_signal.notify_waiters();
        true
    }

    /// Claim a session id on this channel.
    pub(crate) fn reserve_id(&self, id: &str) -> Result<()> {
        if self.is_closed() {
            return Err(SamError::ChannelClosed);
        }
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        if !ids.insert(id.to_string()) {
            return Err(SamError::DuplicatedId(id.to_string()));
        }
        Ok(())
    }

    pub(crate) fn release_id(&self, id: &str) {
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }
}

enum Exchange<'a> {
    Request(&'a str),
    Send(&'a str, &'a [u8]),
    Abandonable(&'a str, Duration, Owed),
}

/// The control socket plus replies still owed to abandoned exchanges.
struct Link {
    conn: LineConn,
    owed: VecDeque<Owed>,
}

impl Link {
    /// Next reply for the current exchange, skipping late replies to
    /// abandoned ones.
    ///
    /// Replies come back in request order, so once a line does not look
    /// like the oldest owed reply, none of the owed replies are coming.
    async fn read_reply(&mut self) -> Result<Reply> {
        loop {
            let reply = Reply::parse(&self.conn.read_line().await?)?;
            match self.owed.front() {
                Some(owed) if owed.matches(&reply) => {
                    log_debug!("ControlChannel", "skipped late {} {}", owed.topic, owed.opcode);
                    self.owed.pop_front();
                }
                Some(_) => {
                    self.owed.clear();
                    return Ok(reply);
                }
                None => return Ok(reply),
            }
        }
    }
}

/// Shape of the reply an abandoned exchange would have received.
struct Owed {
    topic: &'static str,
    opcode: &'static str,
    id: Option<String>,
}

impl Owed {
    fn for_command(command: &Command) -> Self {
        let (topic, opcode) = command.reply_kind();
        Self {
            topic,
            opcode,
            id: command.get("ID").map(str::to_string),
        }
    }

    /// Same topic and opcode, and the same `ID` when the reply names one.
    fn matches(&self, reply: &Reply) -> bool {
        reply.topic() == self.topic
            && reply.opcode() == Some(self.opcode)
            && match (reply.get("ID"), &self.id) {
                (Some(got), Some(want)) => got == want,
                _ => true,
            }
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("router_addr", &self.router_addr)
            .field("version", &self.version)
            .field("closed", &self.is_closed())
            .finish()
    }
}
