use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;

use super::connection::{PeerInfo, StreamConnection};
use crate::control::line::LineConn;
use crate::destination::Destination;
use crate::error::{Result, SamError};
use crate::protocol::{Command, Reply};
use crate::session::base::SessionCore;
use crate::utils::log::{log_debug, log_warn};

/// Blocking accept loop for one stream session.
///
/// Each `accept` opens a fresh socket, runs `STREAM ACCEPT` on it and waits
/// for the router to announce the peer. The next accept starts only after
/// that, since the router keeps a single pending accept per id.
pub struct StreamListener {
    core: Arc<SessionCore>,
    gate: Arc<Mutex<()>>,
}

impl StreamListener {
    pub(crate) fn new(core: Arc<SessionCore>, gate: Arc<Mutex<()>>) -> Self {
        Self { core, gate }
    }

    pub fn session_id(&self) -> &str {
        self.core.id()
    }

    pub fn local_destination(&self) -> &Arc<Destination> {
        self.core.destination()
    }

    /// Wait for the next inbound stream.
    pub async fn accept(&self) -> Result<StreamConnection> {
        self.core
            .until_closed(async {
                let _turn = self.gate.lock().await;
                self.accept_one().await
            })
            .await
    }

    /// `accept` bounded by `limit`; expiry abandons the pending socket.
    pub async fn accept_timeout(&self, limit: Duration) -> Result<StreamConnection> {
        timeout(limit, self.accept())
            .await
            .map_err(|_| SamError::Timeout("STREAM ACCEPT"))?
    }

    async fn accept_one(&self) -> Result<StreamConnection> {
        let config = self.core.channel().config();
        let mut conn = LineConn::connect(config).await?;
        conn.hello(config).await?;

        let reply = conn.request(&Command::stream_accept(self.core.id())).await?;
        reply.expect("STREAM", "STATUS")?;
        reply.into_result("STREAM ACCEPT")?;
        log_debug!("StreamListener", "{}: waiting for a peer", self.core.id());

        let line = conn.read_line().await?;
        let info = parse_peer_line(&line)?;
        log_debug!("StreamListener", "{}: accepted {}", self.core.id(), info.remote);

        Ok(StreamConnection::new(
            conn.into_stream(),
            self.core.id(),
            self.core.destination().clone(),
            info,
        ))
    }
}

/// `<base64 destination> [FROM_PORT=n] [TO_PORT=n]`, sent once before the
/// accepted peer's bytes.
fn parse_peer_line(line: &str) -> Result<PeerInfo> {
    let reply = Reply::parse(line)?;
    let remote = reply.status().to_string();
    let peer = match Destination::from_base64(&remote) {
        Ok(dest) => Some(dest),
        Err(e) => {
            log_warn!("StreamListener", "unparseable peer destination: {}", e);
            None
        }
    };
    Ok(PeerInfo {
        peer,
        remote,
        from_port: reply.port("FROM_PORT")?.unwrap_or(0),
        to_port: reply.port("TO_PORT")?.unwrap_or(0),
    })
}

impl std::fmt::Debug for StreamListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamListener")
            .field("session_id", &self.core.id())
            .finish()
    }
}
