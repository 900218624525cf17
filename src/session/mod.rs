//! State shared by every session style.

pub(crate) mod base;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::destination::Destination;
use crate::error::Result;

/// `STYLE=` of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Style {
    Stream,
    Datagram,
    Datagram2,
    Datagram3,
    Raw,
    Primary,
}

impl Style {
    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Stream => "STREAM",
            Style::Datagram => "DATAGRAM",
            Style::Datagram2 => "DATAGRAM2",
            Style::Datagram3 => "DATAGRAM3",
            Style::Raw => "RAW",
            Style::Primary => "PRIMARY",
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity requested in `SESSION CREATE`.
#[derive(Clone, PartialEq, Eq)]
pub enum DestinationSpec {
    /// Let the router generate a fresh destination.
    Transient,
    /// Reuse a private-key blob in I2P base64.
    Keys(String),
}

impl DestinationSpec {
    /// Reuse the keys of a destination that still carries them.
    pub fn from_destination(destination: &Destination) -> Option<Self> {
        destination
            .private_keys()
            .map(|keys| DestinationSpec::Keys(keys.to_string()))
    }

    pub fn as_wire(&self) -> &str {
        match self {
            DestinationSpec::Transient => "TRANSIENT",
            DestinationSpec::Keys(keys) => keys,
        }
    }
}

impl fmt::Debug for DestinationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationSpec::Transient => f.write_str("Transient"),
            DestinationSpec::Keys(_) => f.write_str("Keys(..)"),
        }
    }
}

/// What every session exposes regardless of style.
pub trait Session {
    fn id(&self) -> &str;

    fn style(&self) -> Style;

    /// The identity this session presents. Sub-sessions share their
    /// primary's.
    fn destination(&self) -> &Arc<Destination>;

    fn is_closed(&self) -> bool;

    /// Tear the session down. Calling it again is a no-op.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}
