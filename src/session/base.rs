use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Notify;

use super::{DestinationSpec, Style};
use crate::control::ControlChannel;
use crate::destination::Destination;
use crate::error::{Result, SamError};
use crate::primary::SubSessionRegistry;
use crate::protocol::{Command, Reply, SessionOptions};
use crate::utils::log::{log_debug, log_info, log_warn};

/// Longest a sub-session close waits for the router to confirm removal.
const REMOVE_WAIT: Duration = Duration::from_secs(5);

/// Who is responsible for the control channel.
pub(crate) enum Ownership {
    /// Standalone session: closing it closes the channel.
    Owned,
    /// Sub-session of a primary: closing it only deregisters.
    Sub(Weak<SubSessionRegistry>),
}

/// Id, identity and lifecycle common to all session styles.
pub(crate) struct SessionCore {
    id: String,
    style: Style,
    destination: Arc<Destination>,
    options: SessionOptions,
    channel: Arc<ControlChannel>,
    ownership: Ownership,
    closed: AtomicBool,
    close_signal: Notify,
}

impl SessionCore {
    /// `SESSION CREATE` on a channel this session will own.
    pub(crate) async fn create(
        channel: Arc<ControlChannel>,
        style: Style,
        id: &str,
        destination: &DestinationSpec,
        options: SessionOptions,
    ) -> Result<Self> {
        channel.reserve_id(id)?;

        let command = Command::session_create(style, id, destination, &options);
        let created = match channel.execute(command).await {
            Ok(reply) => parse_status(reply, "SESSION CREATE")
                .and_then(|reply| created_destination(&reply, destination)),
            Err(e) => Err(e),
        };

        match created {
            Ok(dest) => {
                log_info!("Session", "created {} session {} as {}", style, id, dest);
                Ok(Self::new(id, style, Arc::new(dest), options, channel, Ownership::Owned))
            }
            Err(e) => {
                log_warn!("Session", "SESSION CREATE {} failed: {}", id, e);
                channel.release_id(id);
                Err(e)
            }
        }
    }

    /// `SESSION ADD` under a primary; the identity is the primary's.
    pub(crate) async fn add(
        channel: Arc<ControlChannel>,
        registry: &Arc<SubSessionRegistry>,
        destination: Arc<Destination>,
        style: Style,
        id: &str,
        options: SessionOptions,
    ) -> Result<Self> {
        channel.reserve_id(id)?;

        let command = Command::session_add(style, id, &options);
        let added = match channel.execute(command).await {
            Ok(reply) => parse_status(reply, "SESSION ADD").map(|_| ()),
            Err(e) => Err(e),
        };

        if let Err(e) = added {
            log_warn!("Session", "SESSION ADD {} failed: {}", id, e);
            channel.release_id(id);
            return Err(e);
        }
        log_info!("Session", "added {} sub-session {}", style, id);

        let ownership = Ownership::Sub(Arc::downgrade(registry));
        Ok(Self::new(id, style, destination, options, channel, ownership))
    }

    fn new(
        id: &str,
        style: Style,
        destination: Arc<Destination>,
        options: SessionOptions,
        channel: Arc<ControlChannel>,
        ownership: Ownership,
    ) -> Self {
        Self {
            id: id.to_string(),
            style,
            destination,
            options,
            channel,
            ownership,
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn style(&self) -> Style {
        self.style
    }

    pub(crate) fn destination(&self) -> &Arc<Destination> {
        &self.destination
    }

    pub(crate) fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub(crate) fn channel(&self) -> &Arc<ControlChannel> {
        &self.channel
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() || self.channel.is_closed() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    /// A sub-session whose primary went away reports the dead channel; a
    /// session closed on purpose reports itself.
    pub(crate) fn closed_error(&self) -> SamError {
        let sub = matches!(self.ownership, Ownership::Sub(_));
        if self.channel.is_closed() && (sub || !self.is_closed()) {
            SamError::ChannelClosed
        } else {
            SamError::SessionClosed(self.id.clone())
        }
    }

    /// Drive `fut` unless the session closes first.
    pub(crate) async fn until_closed<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let closing = self.close_signal.notified();
        tokio::pin!(closing);
        self.ensure_open()?;

        tokio::select! {
            result = fut => result,
            _ = &mut closing => Err(self.closed_error()),
        }
    }

    /// Flip the closed flag and wake pending operations. False if it was
    /// already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.close_signal.notify_waiters();
        true
    }

    /// Close the router-side session.
    ///
    /// Owned sessions close their channel. Sub-sessions deregister from the
    /// primary and ask the router to drop them with `SESSION REMOVE`, leaving
    /// the shared channel open.
    pub(crate) async fn close(&self) -> Result<()> {
        if !self.mark_closed() {
            return Ok(());
        }

        match &self.ownership {
            Ownership::Owned => {
                self.channel.close().await;
                self.channel.release_id(&self.id);
            }
            Ownership::Sub(registry) => {
                if let Some(registry) = registry.upgrade() {
                    registry.remove(&self.id);
                }
                if !self.channel.is_closed() {
                    self.remove_from_router().await;
                }
                self.channel.release_id(&self.id);
            }
        }
        log_debug!("Session", "closed session {}", self.id);
        Ok(())
    }

    /// Best-effort `SESSION REMOVE`. Siblings share the channel, so a slow
    /// or missing answer is left behind instead of closing it.
    async fn remove_from_router(&self) {
        let wait = self
            .channel
            .config()
            .command_deadline()
            .map_or(REMOVE_WAIT, |limit| limit.min(REMOVE_WAIT));
        let removed = self
            .channel
            .execute_abandonable(Command::session_remove(&self.id), wait)
            .await;
        match removed {
            Ok(Some(reply)) => {
                if let Err(e) = parse_status(reply, "SESSION REMOVE") {
                    log_warn!("Session", "SESSION REMOVE {} refused: {}", self.id, e);
                }
            }
            Ok(None) => log_warn!("Session", "SESSION REMOVE {} went unanswered", self.id),
            Err(e) => log_warn!("Session", "SESSION REMOVE {} failed: {}", self.id, e),
        }
    }
}

fn parse_status(reply: Reply, command: &'static str) -> Result<Reply> {
    reply.expect("SESSION", "STATUS")?;
    reply.into_result(command)
}

/// Identity named in a `SESSION STATUS`; routers return the full private-key
/// blob, but a bare public destination is accepted as well.
fn created_destination(reply: &Reply, requested: &DestinationSpec) -> Result<Destination> {
    match (reply.get("DESTINATION"), requested) {
        (Some(value), _) => {
            Destination::from_private_base64(value).or_else(|_| Destination::from_base64(value))
        }
        (None, DestinationSpec::Keys(keys)) => Destination::from_private_base64(keys),
        (None, DestinationSpec::Transient) => Err(SamError::protocol(
            "SESSION STATUS for a transient session carries no DESTINATION",
        )),
    }
}
