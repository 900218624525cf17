use std::collections::BTreeMap;

use crate::error::{Result, ResultCode, SamError};

/// A parsed response line.
///
/// `words` are the bare tokens (`["SESSION", "STATUS"]`, or a literal
/// destination on peer and datagram header lines); `fields` the `KEY=VALUE`
/// pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub words: Vec<String>,
    pub fields: BTreeMap<String, String>,
}

impl Reply {
    /// Decode one line.
    ///
    /// The first token is always a bare word taken verbatim, since literal
    /// destinations may end in `=` padding. Later tokens are pairs when they
    /// contain `=`.
    pub fn parse(line: &str) -> Result<Self> {
        let mut parser = LineParser::new(line);
        let first = parser
            .next_word()
            .ok_or_else(|| SamError::protocol("empty line"))?;

        let mut reply = Reply {
            words: vec![first],
            fields: BTreeMap::new(),
        };
        parser.parse_rest(&mut reply)?;
        Ok(reply)
    }

    /// Decode a line made only of `KEY=VALUE` pairs (raw datagram headers).
    pub fn parse_fields(line: &str) -> Result<BTreeMap<String, String>> {
        let mut parser = LineParser::new(line);
        let mut reply = Reply {
            words: Vec::new(),
            fields: BTreeMap::new(),
        };
        parser.parse_rest(&mut reply)?;
        if let Some(word) = reply.words.first() {
            return Err(SamError::protocol(format!("unexpected bare token {word:?}")));
        }
        Ok(reply.fields)
    }

    /// First bare token: the topic, or the literal status word.
    pub fn status(&self) -> &str {
        &self.words[0]
    }

    pub fn topic(&self) -> &str {
        self.status()
    }

    pub fn opcode(&self) -> Option<&str> {
        self.words.get(1).map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn message(&self) -> Option<&str> {
        self.get("MESSAGE")
    }

    pub fn result_code(&self) -> Option<ResultCode> {
        self.get("RESULT").map(|r| r.parse().unwrap_or_else(|never| match never {}))
    }

    pub fn port(&self, key: &str) -> Result<Option<u16>> {
        self.get(key)
            .map(|v| {
                v.parse::<u16>()
                    .map_err(|_| SamError::protocol(format!("{key}={v} is not a port")))
            })
            .transpose()
    }

    /// Fail unless the reply is `<topic> <opcode> ...`.
    pub fn expect(&self, topic: &str, opcode: &str) -> Result<()> {
        if self.topic() == topic && self.opcode() == Some(opcode) {
            return Ok(());
        }
        Err(SamError::protocol(format!(
            "expected {topic} {opcode} reply, got {} {}",
            self.topic(),
            self.opcode().unwrap_or("")
        )))
    }

    /// Turn a non-OK `RESULT=` into a typed router error.
    pub fn into_result(self, command: &'static str) -> Result<Reply> {
        match self.result_code() {
            Some(ResultCode::Ok) => Ok(self),
            Some(code) => Err(SamError::Router {
                command,
                code,
                message: self.message().map(str::to_string),
            }),
            None => Err(SamError::protocol(format!("{command} reply has no RESULT"))),
        }
    }
}

struct LineParser<'a> {
    input: &'a [u8],
    index: usize,
}

impl<'a> LineParser<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            input: line.as_bytes(),
            index: 0,
        }
    }

    fn parse_rest(&mut self, reply: &mut Reply) -> Result<()> {
        loop {
            self.skip_whitespace();
            if self.peek().is_none() {
                return Ok(());
            }

            let key = self.take_while(|b| !b.is_ascii_whitespace() && b != b'=');
            if self.peek() != Some(b'=') {
                reply.words.push(key);
                continue;
            }

            self.index += 1; // consume '='
            if key.is_empty() {
                return Err(SamError::protocol("token with empty key"));
            }
            let value = if self.peek() == Some(b'"') {
                self.parse_quoted()?
            } else {
                self.take_while(|b| !b.is_ascii_whitespace())
            };
            reply.fields.insert(key, value);
        }
    }

    fn next_word(&mut self) -> Option<String> {
        self.skip_whitespace();
        self.peek()?;
        Some(self.take_while(|b| !b.is_ascii_whitespace()))
    }

    fn parse_quoted(&mut self) -> Result<String> {
        self.expect_byte(b'"')?;
        let mut value = Vec::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.index += 1;
                    break;
                }
                Some(b'\\') => {
                    self.index += 1;
                    match self.peek() {
                        Some(escaped) => {
                            value.push(escaped);
                            self.index += 1;
                        }
                        None => return Err(SamError::protocol("dangling escape in quoted value")),
                    }
                }
                Some(b) => {
                    value.push(b);
                    self.index += 1;
                }
                None => return Err(SamError::protocol("unterminated quoted value")),
            }
        }
        String::from_utf8(value).map_err(|_| SamError::protocol("quoted value is not UTF-8"))
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> String {
        let start = self.index;
        while let Some(b) = self.peek() {
            if !pred(b) {
                break;
            }
            self.index += 1;
        }
        // Boundaries sit on ASCII bytes, so the slice stays valid UTF-8
        String::from_utf8_lossy(&self.input[start..self.index]).into_owned()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.index += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.index).copied()
    }

    fn expect_byte(&mut self, expected: u8) -> Result<()> {
        match self.peek() {
            Some(c) if c == expected => {
                self.index += 1;
                Ok(())
            }
            other => Err(SamError::protocol(format!(
                "expected '{}', found {:?}",
                expected as char,
                other.map(|b| b as char)
            ))),
        }
    }
}
