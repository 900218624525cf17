use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};

use super::connection::{PeerInfo, StreamConnection};
use super::listener::StreamListener;
use crate::config::SamConfig;
use crate::control::line::LineConn;
use crate::control::ControlChannel;
use crate::destination::Destination;
use crate::error::{Result, SamError};
use crate::protocol::{Command, SessionOptions};
use crate::session::base::SessionCore;
use crate::session::{DestinationSpec, Session, Style};
use crate::utils::log::log_debug;

/// A `STYLE=STREAM` session.
///
/// Every dial and accept runs on its own fresh router socket, so they
/// proceed concurrently with each other and with control commands.
#[derive(Clone)]
pub struct StreamSession {
    core: Arc<SessionCore>,
    accept_gate: Arc<Mutex<()>>,
}

impl StreamSession {
    /// Connect a new control channel and create the session on it.
    pub async fn create(
        config: SamConfig,
        id: &str,
        destination: DestinationSpec,
        options: SessionOptions,
    ) -> Result<Self> {
        let channel = ControlChannel::connect(config).await?;
        let session = Self::with_channel(channel.clone(), id, destination, options).await;
        if session.is_err() {
            channel.close().await;
        }
        session
    }

    /// Create the session on an existing channel, which it then owns.
    pub async fn with_channel(
        channel: Arc<ControlChannel>,
        id: &str,
        destination: DestinationSpec,
        options: SessionOptions,
    ) -> Result<Self> {
        let core = SessionCore::create(channel, Style::Stream, id, &destination, options).await?;
        Ok(Self::from_core(Arc::new(core)))
    }

    pub(crate) fn from_core(core: Arc<SessionCore>) -> Self {
        Self {
            core,
            accept_gate: Arc::new(Mutex::new(())),
        }
    }

    pub(crate) fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    pub fn options(&self) -> &SessionOptions {
        self.core.options()
    }

    /// Open a stream to `destination`, a base64 destination or a name the
    /// router can resolve.
    pub async fn dial(&self, destination: &str) -> Result<StreamConnection> {
        self.dial_deadline(destination, None).await
    }

    pub async fn dial_timeout(&self, destination: &str, limit: Duration) -> Result<StreamConnection> {
        self.dial_deadline(destination, Some(Instant::now() + limit))
            .await
    }

    /// Dial, giving up at `deadline`.
    ///
    /// A deadline already in the past fails before any socket is opened.
    /// Expiry drops the auxiliary socket, which ends the pending handshake.
    pub async fn dial_deadline(
        &self,
        destination: &str,
        deadline: Option<Instant>,
    ) -> Result<StreamConnection> {
        self.core.ensure_open()?;
        if matches!(deadline, Some(d) if d <= Instant::now()) {
            return Err(SamError::Timeout("STREAM CONNECT"));
        }

        let connect = self.core.until_closed(self.connect(destination));
        match deadline {
            Some(deadline) => timeout_at(deadline, connect)
                .await
                .map_err(|_| SamError::Timeout("STREAM CONNECT"))?,
            None => connect.await,
        }
    }

    pub async fn dial_destination(&self, destination: &Destination) -> Result<StreamConnection> {
        self.dial(destination.to_base64()).await
    }

    async fn connect(&self, destination: &str) -> Result<StreamConnection> {
        let config = self.core.channel().config();
        let mut conn = LineConn::connect(config).await?;
        conn.hello(config).await?;
        log_debug!("StreamSession", "{}: CONNECT sent", self.core.id());

        let reply = conn
            .request(&Command::stream_connect(self.core.id(), destination))
            .await?;
        reply.expect("STREAM", "STATUS")?;
        reply.into_result("STREAM CONNECT")?;
        log_debug!("StreamSession", "{}: stream established", self.core.id());

        let info = PeerInfo {
            remote: destination.to_string(),
            peer: Destination::from_base64(destination).ok(),
            from_port: 0,
            to_port: 0,
        };
        Ok(StreamConnection::new(
            conn.into_stream(),
            self.core.id(),
            self.core.destination().clone(),
            info,
        ))
    }

    /// Start accepting inbound streams.
    ///
    /// All listeners of one session share a single accept turn, so at most
    /// one `STREAM ACCEPT` is outstanding per session id.
    pub fn listen(&self) -> Result<StreamListener> {
        self.core.ensure_open()?;
        Ok(StreamListener::new(self.core.clone(), self.accept_gate.clone()))
    }

    /// One-shot accept; a listener is cheaper for repeated use.
    pub async fn accept(&self) -> Result<StreamConnection> {
        self.listen()?.accept().await
    }
}

impl Session for StreamSession {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn style(&self) -> Style {
        self.core.style()
    }

    fn destination(&self) -> &Arc<Destination> {
        self.core.destination()
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    async fn close(&self) -> Result<()> {
        self.core.close().await
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.core.id())
            .field("destination", self.core.destination())
            .field("closed", &self.core.is_closed())
            .finish()
    }
}
