use std::fmt::Write as _;

use crate::config::SamConfig;
use crate::error::{Result, SamError};
use crate::protocol::options::SessionOptions;
use crate::session::{DestinationSpec, Style};

/// One request line: `<TOPIC> <OPCODE> KEY=VALUE ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    topic: &'static str,
    opcode: &'static str,
    args: Vec<(String, String)>,
}

impl Command {
    pub fn new(topic: &'static str, opcode: &'static str) -> Self {
        Self {
            topic,
            opcode,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.args.push((key.into(), value.to_string()));
        self
    }

    pub fn options(mut self, options: &SessionOptions) -> Self {
        for (key, value) in options.iter() {
            self.args.push((key.to_string(), value.to_string()));
        }
        self
    }

    /// `"TOPIC OPCODE"`, used to label errors.
    pub fn name(&self) -> &'static str {
        match (self.topic, self.opcode) {
            ("HELLO", _) => "HELLO",
            ("SESSION", "CREATE") => "SESSION CREATE",
            ("SESSION", "ADD") => "SESSION ADD",
            ("SESSION", "REMOVE") => "SESSION REMOVE",
            ("STREAM", "CONNECT") => "STREAM CONNECT",
            ("STREAM", "ACCEPT") => "STREAM ACCEPT",
            ("DATAGRAM", "SEND") => "DATAGRAM SEND",
            ("RAW", "SEND") => "RAW SEND",
            ("NAMING", "LOOKUP") => "NAMING LOOKUP",
            ("DEST", "GENERATE") => "DEST GENERATE",
            (topic, _) => topic,
        }
    }

    /// Topic and opcode of the reply the router answers this command with.
    pub fn reply_kind(&self) -> (&'static str, &'static str) {
        match self.topic {
            "HELLO" => ("HELLO", "REPLY"),
            "NAMING" => ("NAMING", "REPLY"),
            "DEST" => ("DEST", "REPLY"),
            topic => (topic, "STATUS"),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize without the trailing newline.
    ///
    /// Values with whitespace or quotes are quoted and escaped; line breaks
    /// cannot be represented and are refused rather than truncated.
    pub fn encode(&self) -> Result<String> {
        let mut line = format!("{} {}", self.topic, self.opcode);
        for (key, value) in &self.args {
            if value.contains(['\n', '\r']) {
                return Err(SamError::InvalidOption(format!(
                    "{key}: line breaks cannot be sent"
                )));
            }
            let _ = write!(line, " {}={}", key, quote_value(value));
        }
        Ok(line)
    }

    pub fn hello(config: &SamConfig) -> Self {
        let cmd = Command::new("HELLO", "VERSION")
            .arg("MIN", &config.min_version)
            .arg("MAX", &config.max_version);
        match (&config.user, &config.password) {
            (Some(user), Some(password)) => cmd.arg("USER", user).arg("PASSWORD", password),
            _ => cmd,
        }
    }

    pub fn session_create(
        style: Style,
        id: &str,
        destination: &DestinationSpec,
        options: &SessionOptions,
    ) -> Self {
        Command::new("SESSION", "CREATE")
            .arg("STYLE", style)
            .arg("ID", id)
            .arg("DESTINATION", destination.as_wire())
            .options(options)
    }

    pub fn session_add(style: Style, id: &str, options: &SessionOptions) -> Self {
        Command::new("SESSION", "ADD")
            .arg("STYLE", style)
            .arg("ID", id)
            .options(options)
    }

    pub fn session_remove(id: &str) -> Self {
        Command::new("SESSION", "REMOVE").arg("ID", id)
    }

    pub fn stream_connect(id: &str, destination: &str) -> Self {
        Command::new("STREAM", "CONNECT")
            .arg("ID", id)
            .arg("DESTINATION", destination)
            .arg("SILENT", "false")
    }

    pub fn stream_accept(id: &str) -> Self {
        Command::new("STREAM", "ACCEPT")
            .arg("ID", id)
            .arg("SILENT", "false")
    }

    /// `DATAGRAM SEND` for the repliable styles, `RAW SEND` for raw.
    pub fn datagram_send(style: Style, id: &str, destination: &str, size: usize) -> Self {
        let topic = if style == Style::Raw { "RAW" } else { "DATAGRAM" };
        Command::new(topic, "SEND")
            .arg("ID", id)
            .arg("DESTINATION", destination)
            .arg("SIZE", size)
    }

    pub fn naming_lookup(name: &str) -> Self {
        Command::new("NAMING", "LOOKUP").arg("NAME", name)
    }

    pub fn dest_generate(signature_type: Option<u16>) -> Self {
        let cmd = Command::new("DEST", "GENERATE");
        match signature_type {
            Some(sig) => cmd.arg("SIGNATURE_TYPE", sig),
            None => cmd,
        }
    }
}

fn quote_value(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || c == '"' || c == '\\');
    if !needs_quotes {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
