// src/database/models.rs
use chrono::{DateTime, Utc};

use crate::{
    errors::RecorderError,
    grid::Locator,
    models::{Callsign, CallsignGridMapping, DirectedMessage},
};

#[derive(Debug, sqlx::FromRow)]
pub(super) struct MessageRow {
    pub timestamp: i64, // Milliseconds since Unix epoch
    pub sender: String,
    pub recipient: String,
    pub text: String,
    pub snr: Option<i64>,
    pub their_snr: Option<i64>,
    pub freq: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct GridRow {
    pub callsign: String,
    pub grid: String,
    pub last_seen: i64,
}

pub(super) fn to_millis(time: &DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, RecorderError> {
    DateTime::from_timestamp_millis(millis).ok_or(RecorderError::InvalidTimestamp(millis))
}

impl TryFrom<MessageRow> for DirectedMessage {
    type Error = RecorderError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(DirectedMessage {
            timestamp: from_millis(row.timestamp)?,
            sender: Callsign::try_from(row.sender.as_str())?,
            recipient: Callsign::try_from(row.recipient.as_str())?,
            text: row.text,
            snr: row.snr.and_then(|v| i32::try_from(v).ok()),
            their_snr: row.their_snr.and_then(|v| i32::try_from(v).ok()),
            freq: row.freq,
        })
    }
}

impl TryFrom<GridRow> for CallsignGridMapping {
    type Error = RecorderError;

    fn try_from(row: GridRow) -> Result<Self, Self::Error> {
        Ok(CallsignGridMapping {
            callsign: Callsign::try_from(row.callsign.as_str())?,
            grid: Locator::try_from(row.grid.as_str())?,
            last_seen: from_millis(row.last_seen)?,
        })
    }
}
