//! JS8Call TCP API client
//!
//! JS8Call speaks newline-delimited JSON objects of the form
//! `{"type": ..., "value": ..., "params": {...}}` in both directions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    config::ClientConfig,
    errors::RecorderError,
    grid::Locator,
    models::{
        parse_reported_snr, CallsignGridMapping, Callsign, ClientEvent, DirectedMessage,
        DisconnectReason,
    },
};
use serde_helpers::*;

pub const RX_DIRECTED: &str = "RX.DIRECTED";
pub const RX_CALL_ACTIVITY: &str = "RX.CALL_ACTIVITY";
pub const RX_GET_CALL_ACTIVITY: &str = "RX.GET_CALL_ACTIVITY";
pub const STATION_GET_STATUS: &str = "STATION.GET_STATUS";

/// Longest accepted line; longer frames are discarded up to the next newline
pub const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    params: Value,
}

/// Fields of a frame's `params` object that the recorder understands
///
/// Fields of unexpected type are treated as absent.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
struct StationParams {
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    from: Option<String>,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    to: Option<String>,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    call: Option<String>,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    grid: Option<String>,
    #[serde(default, deserialize_with = "deserialize_string")]
    text: Option<String>,
    #[serde(default, deserialize_with = "deserialize_snr")]
    snr: Option<i32>,
    /// Milliseconds since Unix epoch
    #[serde(default, deserialize_with = "deserialize_integer")]
    utc: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_integer")]
    freq: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_integer")]
    offset: Option<i64>,
}

impl StationParams {
    fn from_value(value: &Value) -> Self {
        if !value.is_object() {
            return Self::default();
        }
        Self::deserialize(value).unwrap_or_default()
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.utc.and_then(DateTime::from_timestamp_millis)
    }
}

#[derive(Debug, Serialize)]
struct Command<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    value: &'a str,
    params: serde_json::Map<String, Value>,
}

/// Encode a parameterless API request as one line
pub fn encode_command(kind: &str) -> Result<Vec<u8>, RecorderError> {
    let mut line = serde_json::to_vec(&Command {
        kind,
        value: "",
        params: serde_json::Map::new(),
    })?;
    line.push(b'\n');
    Ok(line)
}

/// Decode one line of the API stream into client events
///
/// Yields a [`ClientEvent::Message`] for `RX.DIRECTED` frames addressed to
/// `operator`, and a [`ClientEvent::Mapping`] for every station/grid pair in
/// the frame, whoever it was addressed to.
pub fn decode_frame(line: &str, operator: &Callsign) -> Result<Vec<ClientEvent>, RecorderError> {
    let frame: Frame = serde_json::from_str(line)?;
    let received = Utc::now();
    let mut events = Vec::new();

    if frame.kind == RX_CALL_ACTIVITY {
        let Value::Object(stations) = &frame.params else {
            return Err(RecorderError::InvalidFrame(format!(
                "{} without station map",
                RX_CALL_ACTIVITY
            )));
        };
        for (call, info) in stations.iter().filter(|(_, info)| info.is_object()) {
            let params = StationParams::from_value(info);
            let last_seen = params.timestamp().unwrap_or(received);
            if let Some(grid) = params.grid.as_deref() {
                events.extend(grid_mapping(call, grid, last_seen).map(ClientEvent::Mapping));
            }
        }
        return Ok(events);
    }

    let params = StationParams::from_value(&frame.params);
    let timestamp = params.timestamp().unwrap_or(received);

    if frame.kind == RX_DIRECTED {
        if let Some(message) = directed_message(&frame, &params, operator, timestamp) {
            events.push(ClientEvent::Message(message));
        }
    }

    let station = params.from.as_deref().or(params.call.as_deref());
    if let (Some(call), Some(grid)) = (station, params.grid.as_deref()) {
        events.extend(grid_mapping(call, grid, timestamp).map(ClientEvent::Mapping));
    }

    Ok(events)
}

fn directed_message(
    frame: &Frame,
    params: &StationParams,
    operator: &Callsign,
    timestamp: DateTime<Utc>,
) -> Option<DirectedMessage> {
    let recipient = Callsign::try_from(params.to.as_deref()?).ok()?;
    if &recipient != operator {
        return None;
    }

    let sender = match params.from.as_deref().map(Callsign::try_from) {
        Some(Ok(sender)) => sender,
        _ => {
            warn!("Directed message to {} without valid sender", recipient);
            return None;
        }
    };

    let text = params
        .text
        .clone()
        .or_else(|| frame.value.as_str().map(str::to_string))
        .unwrap_or_default();

    Some(DirectedMessage {
        timestamp,
        sender,
        recipient,
        their_snr: parse_reported_snr(&text),
        text,
        snr: params.snr,
        freq: params.freq.or(params.offset),
    })
}

fn grid_mapping(call: &str, grid: &str, last_seen: DateTime<Utc>) -> Option<CallsignGridMapping> {
    let callsign = Callsign::try_from(call).ok()?;
    match Locator::try_from(grid) {
        Ok(grid) if grid.precision() >= 2 => Some(CallsignGridMapping {
            callsign,
            grid,
            last_seen,
        }),
        _ => {
            debug!("Ignoring grid {:?} for {}", grid, callsign);
            None
        }
    }
}

/// Client for the JS8Call TCP API
///
/// Created connected; [`Js8Client::start`] hands the socket to a read loop
/// task that pushes decoded events into a channel until the connection ends
/// or [`Js8Client::stop`] is called. There is no automatic reconnect.
pub struct Js8Client {
    addr: String,
    operator: Callsign,
    status_interval: Duration,
    stream: Option<TcpStream>,
    worker: Option<Worker>,
}

struct Worker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Js8Client {
    /// Open a TCP connection to the API
    pub async fn connect(config: &ClientConfig) -> Result<Self, RecorderError> {
        config.validate()?;
        let operator = config.operator()?;
        let addr = config.address();

        info!("Connecting to JS8Call API at {} as {}", addr, operator);
        let stream = match timeout(config.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(origin)) => return Err(RecorderError::ConnectionError { addr, origin }),
            Err(_) => {
                return Err(RecorderError::ConnectTimeout {
                    addr,
                    timeout: config.connect_timeout,
                })
            }
        };
        info!("Connected to {}", addr);

        Ok(Self {
            addr,
            operator,
            status_interval: config.status_interval,
            stream: Some(stream),
            worker: None,
        })
    }

    /// Start the read loop, delivering events to `events`
    pub fn start(&mut self, events: mpsc::Sender<ClientEvent>) -> Result<(), RecorderError> {
        let stream = self
            .stream
            .take()
            .ok_or(RecorderError::ClientAlreadyStarted)?;
        let (shutdown, shutdown_rx) = oneshot::channel();

        let (reader, writer) = stream.into_split();
        let handle = tokio::spawn(Self::read_loop(
            BufReader::new(reader),
            writer,
            self.operator.clone(),
            self.status_interval,
            events,
            shutdown_rx,
        ));
        self.worker = Some(Worker { shutdown, handle });
        Ok(())
    }

    /// Stop the read loop and wait for it to release the socket
    pub async fn stop(&mut self) -> Result<(), RecorderError> {
        self.stream = None;
        if let Some(worker) = self.worker.take() {
            info!("Stopping JS8Call client for {}", self.addr);
            // Err means the loop has already ended on its own
            let _ = worker.shutdown.send(());
            worker.handle.await?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    async fn read_loop<R, W>(
        mut reader: R,
        mut writer: W,
        operator: Callsign,
        status_interval: Duration,
        events: mpsc::Sender<ClientEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = Vec::new();
        let mut oversized = false;

        let mut keepalive = interval(status_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = match send_command(&mut writer, RX_GET_CALL_ACTIVITY).await {
            Err(e) => DisconnectReason::WriteFailed(e.to_string()),
            Ok(()) => loop {
                tokio::select! {
                    _ = &mut shutdown => break DisconnectReason::Stopped,
                    _ = keepalive.tick() => {
                        if let Err(e) = send_command(&mut writer, STATION_GET_STATUS).await {
                            break DisconnectReason::WriteFailed(e.to_string());
                        }
                    }
                    read = read_frame(&mut reader, &mut line) => match read {
                        Ok(0) => {
                            // Unterminated last line before EOF
                            if !line.is_empty() && !oversized {
                                deliver(&line, &operator, &events).await;
                            }
                            break DisconnectReason::ClosedByRemote;
                        }
                        Ok(_) if line.last() != Some(&b'\n') => {
                            // Short read is only possible at EOF, which the next read reports
                            if line.len() >= MAX_FRAME_LEN {
                                warn!("Discarding frame longer than {} bytes", MAX_FRAME_LEN);
                                line.clear();
                                oversized = true;
                            }
                        }
                        Ok(_) if oversized => {
                            line.clear();
                            oversized = false;
                        }
                        Ok(_) => {
                            let delivered = deliver(&line, &operator, &events).await;
                            line.clear();
                            if !delivered {
                                warn!("Event receiver dropped, stopping read loop");
                                break DisconnectReason::Stopped;
                            }
                        }
                        Err(e) => break DisconnectReason::ReadFailed(e.to_string()),
                    },
                }
            },
        };

        if let Err(e) = writer.shutdown().await {
            debug!("Socket shutdown failed: {}", e);
        }
        info!("JS8Call client disconnected: {}", reason);
        let _ = events.send(ClientEvent::Disconnected(reason)).await;
    }
}

/// Read up to the next newline without letting `line` grow past [`MAX_FRAME_LEN`]
async fn read_frame<R>(reader: &mut R, line: &mut Vec<u8>) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let remaining = MAX_FRAME_LEN.saturating_sub(line.len()).max(1) as u64;
    reader.take(remaining).read_until(b'\n', line).await
}

async fn send_command<W>(writer: &mut W, kind: &str) -> Result<(), RecorderError>
where
    W: AsyncWrite + Unpin,
{
    debug!("Sending {}", kind);
    writer.write_all(&encode_command(kind)?).await?;
    Ok(())
}

/// Decode one raw line and forward its events; false if the receiver is gone
async fn deliver(raw: &[u8], operator: &Callsign, events: &mpsc::Sender<ClientEvent>) -> bool {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    if line.is_empty() {
        return true;
    }

    match decode_frame(line, operator) {
        Ok(decoded) => {
            for event in decoded {
                if events.send(event).await.is_err() {
                    return false;
                }
            }
        }
        Err(e) => warn!("Discarding malformed frame: {}: {}", e, line),
    }
    true
}

/// Lenient deserializers for `params` fields
mod serde_helpers {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use crate::models::parse_snr;

    pub fn deserialize_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => Some(s),
            _ => None,
        })
    }

    pub fn deserialize_trimmed_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = deserialize_string(deserializer)?;
        Ok(value
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    /// SNR arrives as a number or as a signed string like `"+02"`
    pub fn deserialize_snr<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.round() as i64))
                .and_then(|v| i32::try_from(v).ok()),
            Value::String(s) => parse_snr(&s),
            _ => None,
        })
    }

    pub fn deserialize_integer<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }
}
