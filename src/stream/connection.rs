use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{sleep, Sleep};

use crate::destination::Destination;

/// An established stream: the auxiliary socket after its STREAM handshake,
/// now a plain byte pipe.
///
/// I/O errors here concern only this connection; the session and its
/// control channel are unaffected.
pub struct StreamConnection {
    stream: BufReader<TcpStream>,
    session_id: String,
    local: Arc<Destination>,
    remote: String,
    peer: Option<Destination>,
    from_port: u16,
    to_port: u16,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    read_timer: Option<Pin<Box<Sleep>>>,
    write_timer: Option<Pin<Box<Sleep>>>,
}

pub(crate) struct PeerInfo {
    pub remote: String,
    pub peer: Option<Destination>,
    pub from_port: u16,
    pub to_port: u16,
}

impl StreamConnection {
    pub(crate) fn new(
        stream: BufReader<TcpStream>,
        session_id: &str,
        local: Arc<Destination>,
        info: PeerInfo,
    ) -> Self {
        Self {
            stream,
            session_id: session_id.to_string(),
            local,
            remote: info.remote,
            peer: info.peer,
            from_port: info.from_port,
            to_port: info.to_port,
            read_timeout: None,
            write_timeout: None,
            read_timer: None,
            write_timer: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn local_destination(&self) -> &Arc<Destination> {
        &self.local
    }

    /// The remote as dialed, or the base64 destination an accept reported.
    pub fn remote_address(&self) -> &str {
        &self.remote
    }

    /// Parsed remote identity, when the remote was given as a full destination.
    pub fn peer_destination(&self) -> Option<&Destination> {
        self.peer.as_ref()
    }

    pub fn from_port(&self) -> u16 {
        self.from_port
    }

    pub fn to_port(&self) -> u16 {
        self.to_port
    }

    /// Fail reads that wait longer than `timeout` with `TimedOut`.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
        self.read_timer = None;
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
        self.write_timer = None;
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    /// Shut the write half down and drop the socket.
    pub async fn close(mut self) -> io::Result<()> {
        match self.stream.get_mut().shutdown().await {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

/// Map an inner `Pending` to `TimedOut` once `timer` fires.
fn poll_timer(
    timer: &mut Option<Pin<Box<Sleep>>>,
    limit: Option<Duration>,
    cx: &mut Context<'_>,
) -> Poll<io::Error> {
    let Some(limit) = limit else {
        return Poll::Pending;
    };
    let timer = timer.get_or_insert_with(|| Box::pin(sleep(limit)));
    match timer.as_mut().poll(cx) {
        Poll::Ready(()) => Poll::Ready(io::Error::new(
            io::ErrorKind::TimedOut,
            "stream operation timed out",
        )),
        Poll::Pending => Poll::Pending,
    }
}

impl AsyncRead for StreamConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.stream).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.read_timer = None;
                Poll::Ready(result)
            }
            Poll::Pending => match poll_timer(&mut this.read_timer, this.read_timeout, cx) {
                Poll::Ready(err) => {
                    this.read_timer = None;
                    Poll::Ready(Err(err))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl AsyncWrite for StreamConnection {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(this.stream.get_mut()).poll_write(cx, buf) {
            Poll::Ready(result) => {
                this.write_timer = None;
                Poll::Ready(result)
            }
            Poll::Pending => match poll_timer(&mut this.write_timer, this.write_timeout, cx) {
                Poll::Ready(err) => {
                    this.write_timer = None;
                    Poll::Ready(Err(err))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(self.get_mut().stream.get_mut()).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(self.get_mut().stream.get_mut()).poll_shutdown(cx)
    }
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("session_id", &self.session_id)
            .field("remote", &self.remote)
            .field("from_port", &self.from_port)
            .field("to_port", &self.to_port)
            .finish()
    }
}
