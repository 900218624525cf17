//! Explicit client configuration handed to every control channel.
//!
//! Nothing here reads the environment; callers build a `SamConfig` (or load
//! one from JSON) and pass it down.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SAM_PORT: u16 = 7656;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamConfig {
    /// Router SAM host.
    pub host: String,

    /// Router SAM TCP port.
    pub port: u16,

    /// Local address datagram sockets bind to; announced to the router as `HOST=`.
    pub udp_host: String,

    pub min_version: String,
    pub max_version: String,

    /// Optional HELLO credentials (SAM 3.2+).
    pub user: Option<String>,
    pub password: Option<String>,

    /// TCP connect timeout for control and auxiliary sockets.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Default deadline for one command/response exchange. Zero disables it.
    #[serde(with = "duration_serde")]
    pub command_timeout: Duration,

    /// Bound of the per-session inbound datagram queue.
    pub datagram_queue_capacity: usize,

    /// Longest protocol line accepted from the router.
    pub max_line_length: usize,
}

impl Default for SamConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_SAM_PORT,
            udp_host: "127.0.0.1".to_string(),
            min_version: "3.0".to_string(),
            max_version: "3.3".to_string(),
            user: None,
            password: None,
            connect_timeout: Duration::from_secs(10),
            // Tunnel builds routinely take tens of seconds.
            command_timeout: Duration::from_secs(180),
            datagram_queue_capacity: 256,
            max_line_length: 64 * 1024,
        }
    }
}

impl SamConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field, reporting all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.host.trim().is_empty() {
            problems.push("host must not be empty".to_string());
        }
        if self.port == 0 {
            problems.push("port must be > 0".to_string());
        }
        if self.udp_host.trim().is_empty() {
            problems.push("udp_host must not be empty".to_string());
        }
        if self.datagram_queue_capacity == 0 {
            problems.push("datagram_queue_capacity must be > 0".to_string());
        }
        if self.max_line_length < 1024 {
            problems.push("max_line_length must be at least 1024".to_string());
        }
        if self.user.is_some() != self.password.is_some() {
            problems.push("user and password must be set together".to_string());
        }

        match (parse_version(&self.min_version), parse_version(&self.max_version)) {
            (Ok(min), Ok(max)) if min > max => problems.push(format!(
                "min_version {} is above max_version {}",
                self.min_version, self.max_version
            )),
            (min, max) => problems.extend(min.err().into_iter().chain(max.err())),
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// `host:port` of the router's SAM bridge.
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn command_deadline(&self) -> Option<Duration> {
        if self.command_timeout.is_zero() {
            None
        } else {
            Some(self.command_timeout)
        }
    }
}

fn parse_version(version: &str) -> Result<(u32, u32), String> {
    let invalid = || format!("invalid protocol version: {version}");
    let (major, minor) = version.split_once('.').ok_or_else(invalid)?;
    Ok((
        major.parse().map_err(|_| invalid())?,
        minor.parse().map_err(|_| invalid())?,
    ))
}

/// Durations as `"250ms"`, `"10s"` or `"3m"`.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis();
        if millis % 60_000 == 0 && millis > 0 {
            serializer.serialize_str(&format!("{}m", millis / 60_000))
        } else if millis % 1000 == 0 {
            serializer.serialize_str(&format!("{}s", millis / 1000))
        } else {
            serializer.serialize_str(&format!("{}ms", millis))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim().to_lowercase();
        let (digits, unit) = if let Some(num) = s.strip_suffix("ms") {
            (num, 1)
        } else if let Some(num) = s.strip_suffix('s') {
            (num, 1000)
        } else if let Some(num) = s.strip_suffix('m') {
            (num, 60_000)
        } else {
            return Err(format!("unknown duration format: {s}"));
        };
        let value: u64 = digits
            .trim()
            .parse()
            .map_err(|_| format!("invalid duration: {s}"))?;
        Ok(Duration::from_millis(value * unit))
    }
}
