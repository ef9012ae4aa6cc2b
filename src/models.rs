//! Data models.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::errors::RecorderError;
use crate::grid::Locator;

/// Amateur radio callsign
///
/// Stored trimmed and upper case, so comparisons are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Callsign(String);

impl TryFrom<&str> for Callsign {
    type Error = RecorderError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_uppercase();
        let valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '/');
        if !valid {
            return Err(RecorderError::InvalidCallsign(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl Callsign {
    /// Get the normalized callsign
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Callsign {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

/// Message received from another station and addressed to the operator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectedMessage {
    /// Time of receipt, from the frame's `UTC` field when present
    pub timestamp: DateTime<Utc>,
    pub sender: Callsign,
    /// Always the operator callsign
    pub recipient: Callsign,
    pub text: String,
    /// Our SNR of their signal in dB
    pub snr: Option<i32>,
    /// Their SNR of our signal, when they report it in the text as `SNR -08`
    pub their_snr: Option<i32>,
    /// Frequency in Hz, or audio offset in Hz if only that is known
    pub freq: Option<i64>,
}

/// Most recently observed grid locator of a station
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallsignGridMapping {
    pub callsign: Callsign,
    pub grid: Locator,
    pub last_seen: DateTime<Utc>,
}

/// Why the client read loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectReason {
    /// `stop()` was called
    Stopped,
    ClosedByRemote,
    ReadFailed(String),
    WriteFailed(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::ClosedByRemote => f.write_str("connection closed by server"),
            Self::ReadFailed(e) => write!(f, "read failed: {}", e),
            Self::WriteFailed(e) => write!(f, "write failed: {}", e),
        }
    }
}

/// Events pushed by the JS8Call client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Message(DirectedMessage),
    Mapping(CallsignGridMapping),
    Disconnected(DisconnectReason),
}

/// Optional restrictions for message queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageFilter {
    pub sender: Option<Callsign>,
    /// Inclusive lower bound
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub until: Option<DateTime<Utc>>,
}

impl MessageFilter {
    pub fn sender(mut self, sender: Callsign) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }
}

/// Parse an SNR report such as `+02`, `-10` or `5`
pub fn parse_snr(value: &str) -> Option<i32> {
    let value = value.trim();
    let value = value.strip_prefix('+').unwrap_or(value);
    value.parse().ok()
}

/// Find the report that follows an `SNR` token in message text
///
/// `"W2XYZ: K1ABC SNR -08"` gives `Some(-8)`.
pub fn parse_reported_snr(text: &str) -> Option<i32> {
    let upper = text.to_ascii_uppercase();
    let (_, rest) = upper.split_once("SNR")?;
    rest.split_whitespace().next().and_then(parse_snr)
}
