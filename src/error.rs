use std::fmt;
use std::io;
use std::str::FromStr;

use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T, E = SamError> = std::result::Result<T, E>;

/// `RESULT=` values a router may answer with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Ok,
    DuplicatedId,
    DuplicatedDest,
    I2pError,
    InvalidKey,
    InvalidId,
    KeyNotFound,
    CantReachPeer,
    Timeout,
    NoVersion,
    PeerNotFound,
    AlreadyAccepting,
    Other(String),
}

impl ResultCode {
    pub fn as_str(&self) -> &str {
        match self {
            ResultCode::Ok => "OK",
            ResultCode::DuplicatedId => "DUPLICATED_ID",
            ResultCode::DuplicatedDest => "DUPLICATED_DEST",
            ResultCode::I2pError => "I2P_ERROR",
            ResultCode::InvalidKey => "INVALID_KEY",
            ResultCode::InvalidId => "INVALID_ID",
            ResultCode::KeyNotFound => "KEY_NOT_FOUND",
            ResultCode::CantReachPeer => "CANT_REACH_PEER",
            ResultCode::Timeout => "TIMEOUT",
            ResultCode::NoVersion => "NOVERSION",
            ResultCode::PeerNotFound => "PEER_NOT_FOUND",
            ResultCode::AlreadyAccepting => "ALREADY_ACCEPTING",
            ResultCode::Other(s) => s,
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == ResultCode::Ok
    }
}

impl FromStr for ResultCode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "OK" => ResultCode::Ok,
            "DUPLICATED_ID" => ResultCode::DuplicatedId,
            "DUPLICATED_DEST" => ResultCode::DuplicatedDest,
            "I2P_ERROR" => ResultCode::I2pError,
            "INVALID_KEY" => ResultCode::InvalidKey,
            "INVALID_ID" => ResultCode::InvalidId,
            "KEY_NOT_FOUND" => ResultCode::KeyNotFound,
            "CANT_REACH_PEER" => ResultCode::CantReachPeer,
            "TIMEOUT" => ResultCode::Timeout,
            "NOVERSION" => ResultCode::NoVersion,
            "PEER_NOT_FOUND" => ResultCode::PeerNotFound,
            "ALREADY_ACCEPTING" => ResultCode::AlreadyAccepting,
            other => ResultCode::Other(other.to_string()),
        })
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification for callers that branch on failure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket failure or deadline expiry.
    Transport,
    /// Unparseable or unexpected reply.
    Protocol,
    /// Session creation or lookup rejected.
    Session,
    /// Connect/accept rejected; the session stays usable.
    Stream,
    /// The control channel or session is gone for good.
    Channel,
    /// The caller asked for something the engine refuses to send.
    Usage,
}

#[derive(Debug, Error)]
pub enum SamError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("control channel closed")]
    ChannelClosed,

    #[error("session {0} is closed")]
    SessionClosed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{command} failed with {code}{}", message_suffix(.message))]
    Router {
        command: &'static str,
        code: ResultCode,
        message: Option<String>,
    },

    #[error("id {0} is already registered on this control channel")]
    DuplicatedId(String),

    #[error("port {0} is already assigned to another sub-session")]
    DuplicatedPort(u16),

    #[error("payload of {size} bytes exceeds the {limit} byte datagram limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn message_suffix(message: &Option<String>) -> String {
    match message {
        Some(m) => format!(": {m}"),
        None => String::new(),
    }
}

impl SamError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        SamError::Protocol(msg.into())
    }

    /// Router result code behind this error, if any.
    ///
    /// Locally detected duplicate ids report `DuplicatedId` too, so callers
    /// need not care which side caught the reuse.
    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            SamError::Router { code, .. } => Some(code.clone()),
            SamError::DuplicatedId(_) => Some(ResultCode::DuplicatedId),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SamError::Io(_) | SamError::Timeout(_) => ErrorKind::Transport,
            SamError::Protocol(_) => ErrorKind::Protocol,
            SamError::ChannelClosed | SamError::SessionClosed(_) => ErrorKind::Channel,
            SamError::DuplicatedId(_) => ErrorKind::Session,
            SamError::Router { code, .. } => match code {
                ResultCode::CantReachPeer
                | ResultCode::Timeout
                | ResultCode::PeerNotFound
                | ResultCode::AlreadyAccepting => ErrorKind::Stream,
                ResultCode::NoVersion | ResultCode::Other(_) => ErrorKind::Protocol,
                _ => ErrorKind::Session,
            },
            SamError::DuplicatedPort(_)
            | SamError::PayloadTooLarge { .. }
            | SamError::InvalidOption(_)
            | SamError::InvalidDestination(_)
            | SamError::Config(_) => ErrorKind::Usage,
        }
    }

    /// Whether the failure leaves the control channel unusable.
    pub(crate) fn is_fatal_to_channel(&self) -> bool {
        matches!(
            self,
            SamError::Io(_) | SamError::Timeout(_) | SamError::ChannelClosed
        )
    }
}
