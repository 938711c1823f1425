//! Placeholder substitution for build command lines
//!
//! A command template is operator-authored shell text containing literal
//! tokens (`PAYLOADNAME`, `PAYLOADKEY`, `TRANSPORT`, `EXPIRATION`, and for
//! transport commands the names of the transport's configuration entries).
//! Substitution is a single left-to-right scan: at each position the longest
//! matching token wins and its replacement is emitted without being scanned
//! again, so the result never depends on table order.

use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BuildError;

pub const PAYLOAD_NAME: &str = "PAYLOADNAME";
pub const PAYLOAD_KEY: &str = "PAYLOADKEY";
pub const TRANSPORT: &str = "TRANSPORT";
pub const EXPIRATION: &str = "EXPIRATION";

/// Characters the shell would interpret inside an unquoted or double-quoted word
const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '<', '>', '"', '\'', '\\', '\n', '\r', '*', '?', '[', ']',
    '{', '}', '~', '#', '!',
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    entries: Vec<(String, String)>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, token: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(token, value);
        self
    }

    /// Adds or replaces the value for `token`. Empty tokens are ignored.
    pub fn insert(&mut self, token: impl Into<String>, value: impl Into<String>) {
        let token = token.into();
        if token.is_empty() {
            return;
        }
        let value = value.into();
        match self.entries.iter_mut().find(|(t, _)| *t == token) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((token, value)),
        }
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Substitutes every token occurrence in `template`
    pub fn apply(&self, template: &str) -> String {
        let mut tokens: Vec<&(String, String)> = self.entries.iter().collect();
        tokens.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        'scan: while let Some(ch) = rest.chars().next() {
            for (token, value) in &tokens {
                if rest.starts_with(token.as_str()) {
                    out.push_str(value);
                    rest = &rest[token.len()..];
                    continue 'scan;
                }
            }
            out.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
        out
    }
}

/// Formats an optional expiration the way toolchains receive it
pub fn expiration_value(expiration: Option<&DateTime<Utc>>) -> String {
    expiration.map(|e| e.to_rfc3339()).unwrap_or_default()
}

/// One `{"Name": ..., "Value": ...}` entry of a transport's configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransportConfigEntry {
    pub name: String,
    pub value: String,
}

pub fn parse_transport_configuration(raw: &str) -> Result<Vec<TransportConfigEntry>, BuildError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| {
        BuildError::InvalidRequest(format!("Transport configuration is not valid JSON: {}", e))
    })
}

/// Substitutions for a transport build command: every entry name becomes the
/// base64 of its value
pub fn transport_substitutions(entries: &[TransportConfigEntry]) -> Substitutions {
    entries.iter().fold(Substitutions::new(), |subs, entry| {
        subs.with(
            entry.name.clone(),
            Base64::encode_string(entry.value.as_bytes()),
        )
    })
}

/// Rejects values that would change the meaning of the shell line they are spliced into
pub fn ensure_shell_safe(field: &str, value: &str) -> Result<(), BuildError> {
    if let Some(bad) = value
        .chars()
        .find(|c| c.is_whitespace() || SHELL_METACHARACTERS.contains(c))
    {
        return Err(BuildError::InvalidRequest(format!(
            "{} contains disallowed character {:?}",
            field, bad
        )));
    }
    Ok(())
}
