use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::SamConfig;
use crate::error::{Result, SamError};
use crate::protocol::{Command, Reply};
use crate::utils::log::log_debug;

/// One socket to the router speaking newline-terminated SAM lines.
///
/// Used for the control channel and for every auxiliary stream socket, which
/// must repeat the HELLO handshake before issuing its single command.
#[derive(Debug)]
pub(crate) struct LineConn {
    stream: BufReader<TcpStream>,
    max_line: usize,
    /// Bytes of a line whose read was interrupted.
    partial: Vec<u8>,
}

impl LineConn {
    pub(crate) async fn connect(config: &SamConfig) -> Result<Self> {
        let addr = config.control_addr();
        let stream = timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| SamError::Timeout("connect"))??;
        stream.set_nodelay(true)?;
        log_debug!("LineConn", "connected to {}", addr);

        Ok(Self {
            stream: BufReader::new(stream),
            max_line: config.max_line_length,
            partial: Vec::new(),
        })
    }

    pub(crate) fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.get_ref().peer_addr()
    }

    /// Run `HELLO VERSION` and return the negotiated version.
    pub(crate) async fn hello(&mut self, config: &SamConfig) -> Result<String> {
        let reply = self.request(&Command::hello(config)).await?;
        reply.expect("HELLO", "REPLY")?;
        let reply = reply.into_result("HELLO")?;
        reply
            .get("VERSION")
            .map(str::to_string)
            .ok_or_else(|| SamError::protocol("HELLO REPLY without VERSION"))
    }

    /// Write one command and read exactly one reply line.
    pub(crate) async fn request(&mut self, command: &Command) -> Result<Reply> {
        let line = command.encode()?;
        self.exchange(&line).await
    }

    pub(crate) async fn exchange(&mut self, line: &str) -> Result<Reply> {
        self.write_line(line).await?;
        let response = self.read_line().await?;
        Reply::parse(&response)
    }

    pub(crate) async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.stream.get_mut().write_all(&buf).await?;
        Ok(())
    }

    /// Write a command line immediately followed by a binary payload.
    pub(crate) async fn write_line_with_payload(&mut self, line: &str, payload: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1 + payload.len());
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        buf.extend_from_slice(payload);
        self.stream.get_mut().write_all(&buf).await?;
        Ok(())
    }

    /// Read one line without its terminator.
    ///
    /// A closed socket is an `UnexpectedEof` I/O error; a line longer than
    /// `max_line_length` is a protocol error. Dropping the future part way
    /// loses nothing: the next call resumes the same line.
    pub(crate) async fn read_line(&mut self) -> Result<String> {
        let limit = (self.max_line + 1).saturating_sub(self.partial.len()) as u64;
        (&mut self.stream)
            .take(limit)
            .read_until(b'\n', &mut self.partial)
            .await?;

        if self.partial.last() != Some(&b'\n') {
            if self.partial.len() > self.max_line {
                self.partial.clear();
                return Err(SamError::protocol(format!(
                    "line exceeds {} bytes",
                    self.max_line
                )));
            }
            return Err(SamError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "router closed the connection",
            )));
        }

        let mut buf = std::mem::take(&mut self.partial);
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        String::from_utf8(buf).map_err(|_| SamError::protocol("line is not UTF-8"))
    }

    /// Hand the socket over to raw byte mode, keeping anything already buffered.
    pub(crate) fn into_stream(self) -> BufReader<TcpStream> {
        self.stream
    }

    pub(crate) async fn shutdown(mut self) {
        let _ = self.stream.get_mut().shutdown().await;
    }
}
