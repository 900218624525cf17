use crate::error::{Result, SamError};

/// Ordered `key=value` tokens appended verbatim to `SESSION CREATE`/`ADD`.
///
/// Values are opaque to the engine. The only check is that each pair stays
/// one token on the wire: no whitespace, no quotes, no `=` in keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    entries: Vec<(String, String)>,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing an earlier value in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<&mut Self> {
        let key = key.into();
        let value = value.into();
        validate_token(&key, &value)?;

        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        Ok(self)
    }

    /// Builder form of [`SessionOptions::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        self.set(key, value)?;
        Ok(self)
    }

    /// Parse `key=value` strings, e.g. from a command line.
    pub fn parse<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::new();
        for token in tokens {
            let token = token.as_ref();
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| SamError::InvalidOption(format!("{token}: expected key=value")))?;
            options.set(key, value)?;
        }
        Ok(options)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Parse a numeric port option. Absent means `None`.
    pub fn port(&self, key: &str) -> Result<Option<u16>> {
        self.get(key)
            .map(|v| {
                v.parse::<u16>()
                    .map_err(|_| SamError::InvalidOption(format!("{key}={v}: not a port number")))
            })
            .transpose()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_token(key: &str, value: &str) -> Result<()> {
    if key.is_empty() {
        return Err(SamError::InvalidOption("empty option key".to_string()));
    }
    if key.contains('=') || key.chars().any(|c| c.is_whitespace() || c == '"') {
        return Err(SamError::InvalidOption(format!("{key}: malformed key")));
    }
    if value.chars().any(|c| c.is_whitespace() || c == '"') {
        return Err(SamError::InvalidOption(format!(
            "{key}: values with whitespace or quotes are not supported"
        )));
    }
    Ok(())
}
