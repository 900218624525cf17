//! PRIMARY sessions: one control channel and one identity shared by many
//! sub-sessions.
//!
//! The router routes inbound streams to stream sub-sessions by
//! `LISTEN_PORT` and forwards datagrams to each datagram sub-session's own
//! UDP `PORT`, so the only bookkeeping here is keeping ids and ports unique.
//!
//! Sub-sessions of one primary cannot dial each other; traffic between them
//! has to leave through another router session.

mod registry;

use std::sync::{Arc, Weak};

use crate::config::SamConfig;
use crate::control::ControlChannel;
use crate::datagram::{DatagramKind, DatagramSession, UdpBinding};
use crate::destination::Destination;
use crate::error::Result;
use crate::protocol::SessionOptions;
use crate::session::base::SessionCore;
use crate::session::{DestinationSpec, Session, Style};
use crate::stream::StreamSession;
use crate::utils::log::log_info;

pub(crate) use registry::{Route, SubSession, SubSessionRegistry};

pub struct PrimarySession {
    core: Arc<SessionCore>,
    registry: Arc<SubSessionRegistry>,
}

impl PrimarySession {
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

    pub async fn with_channel(
        channel: Arc<ControlChannel>,
        id: &str,
        destination: DestinationSpec,
        options: SessionOptions,
    ) -> Result<Self> {
        let core = SessionCore::create(channel, Style::Primary, id, &destination, options).await?;
        Ok(Self {
            core: Arc::new(core),
            registry: Arc::new(SubSessionRegistry::default()),
        })
    }

    pub fn channel(&self) -> &Arc<ControlChannel> {
        self.core.channel()
    }

    /// Add a stream sub-session.
    ///
    /// `LISTEN_PORT` (absent means 0) must not already belong to another
    /// stream sub-session of this primary.
    pub async fn add_stream(&self, id: &str, options: SessionOptions) -> Result<StreamSession> {
        self.core.ensure_open()?;
        let listen_port = options.port("LISTEN_PORT")?.unwrap_or(0);
        self.registry.reserve(id, Route::Stream { listen_port })?;

        let added = SessionCore::add(
            self.core.channel().clone(),
            &self.registry,
            self.core.destination().clone(),
            Style::Stream,
            id,
            options,
        )
        .await;

        match added {
            Ok(core) => {
                let core = Arc::new(core);
                let handle: Weak<dyn SubSession> = Arc::downgrade(&core) as Weak<dyn SubSession>;
                self.registry.attach(id, handle);
                Ok(StreamSession::from_core(core))
            }
            Err(e) => {
                self.registry.remove(id);
                Err(e)
            }
        }
    }

    /// Add a datagram or raw sub-session with its own forwarding socket.
    pub async fn add_datagram(
        &self,
        kind: DatagramKind,
        id: &str,
        options: SessionOptions,
    ) -> Result<DatagramSession> {
        self.core.ensure_open()?;
        let requested = options.port("PORT")?.unwrap_or(0);
        self.registry.reserve(id, Route::Datagram { port: requested })?;

        let added = self.add_datagram_reserved(kind, id, options).await;
        match added {
            Ok(session) => {
                let handle: Weak<dyn SubSession> =
                    Arc::downgrade(session.inner()) as Weak<dyn SubSession>;
                self.registry.attach(id, handle);
                Ok(session)
            }
            Err(e) => {
                self.registry.remove(id);
                Err(e)
            }
        }
    }

    async fn add_datagram_reserved(
        &self,
        kind: DatagramKind,
        id: &str,
        options: SessionOptions,
    ) -> Result<DatagramSession> {
        let channel = self.core.channel();
        let binding = UdpBinding::bind(channel.config(), kind, options).await?;
        self.registry.update_route(id, Route::Datagram { port: binding.port() });

        let core = SessionCore::add(
            channel.clone(),
            &self.registry,
            self.core.destination().clone(),
            kind.style(),
            id,
            binding.options.clone(),
        )
        .await?;
        Ok(DatagramSession::start(core, kind, binding))
    }

    /// Live sub-sessions, including ones still being added.
    pub fn subsession_count(&self) -> usize {
        self.registry.len()
    }

    pub fn subsession_ids(&self) -> Vec<String> {
        self.registry.ids()
    }
}

impl Session for PrimarySession {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn style(&self) -> Style {
        Style::Primary
    }

    fn destination(&self) -> &Arc<Destination> {
        self.core.destination()
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Close the shared channel, then every sub-session.
    ///
    /// Sub-session readers woken by the release must find the channel
    /// already closed.
    async fn close(&self) -> Result<()> {
        if self.core.is_closed() {
            return Ok(());
        }
        let closed = self.core.close().await;
        let subs = self.registry.drain();
        let count = subs.len();
        for sub in subs {
            sub.release();
            sub.core().mark_closed();
        }
        log_info!("PrimarySession", "{}: closed {} sub-sessions", self.core.id(), count);
        closed
    }
}

impl std::fmt::Debug for PrimarySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimarySession")
            .field("id", &self.core.id())
            .field("subsessions", &self.registry.ids())
            .field("closed", &self.core.is_closed())
            .finish()
    }
}
