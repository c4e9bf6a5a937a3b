//! Identifier types.
//!
//! A [`ConversationKey`] is the messaging platform's chat identifier, a
//! signed 64-bit integer. A [`RequestId`] is a ULID minted per completion
//! so every log line of one exchange can be grouped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when parsing a conversation key from text fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseKeyError {
    /// The text that failed to parse.
    pub input: String,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid conversation key '{}': {}", self.input, self.reason)
    }
}

impl std::error::Error for ParseKeyError {}

/// Identifies a conversational context.
///
/// In the simplest form this is the chat the message arrived on. A user
/// can switch into another key, in which case their state carries that
/// key as its active target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(i64);

impl ConversationKey {
    /// Creates a key from a raw chat identifier.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw chat identifier.
    #[must_use]
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConversationKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self).map_err(|e| ParseKeyError {
            input: s.to_string(),
            reason: e.to_string(),
        })
    }
}

impl From<i64> for ConversationKey {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl From<ConversationKey> for i64 {
    fn from(key: ConversationKey) -> Self {
        key.0
    }
}

/// Unique identifier for a single completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Ulid);

impl RequestId {
    /// Creates a new request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_integer() {
        let key: ConversationKey = "123456789".parse().expect("should parse");
        assert_eq!(key.get(), 123_456_789);
    }

    #[test]
    fn parse_negative_group_id() {
        let key: ConversationKey = "-1001234567890".parse().expect("should parse");
        assert_eq!(key.get(), -1_001_234_567_890);
    }

    #[test]
    fn parse_tolerates_surrounding_whitespace() {
        let key: ConversationKey = " 42 ".parse().expect("should parse");
        assert_eq!(key, ConversationKey::new(42));
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "42 (Project X)"
            .parse::<ConversationKey>()
            .expect_err("should fail");
        assert_eq!(err.input, "42 (Project X)");
        assert!(err.to_string().contains("invalid conversation key"));
    }

    #[test]
    fn key_display_is_raw_integer() {
        assert_eq!(ConversationKey::new(-7).to_string(), "-7");
    }

    #[test]
    fn key_serializes_transparently() {
        let json = serde_json::to_string(&ConversationKey::new(99)).expect("serialize");
        assert_eq!(json, "99");
    }

    #[test]
    fn request_id_display_format() {
        let id = RequestId::new();
        assert!(id.to_string().starts_with("req_"));
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }
}
