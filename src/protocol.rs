//! Parser and decoder for the OpenSky `/states/all` JSON format.
//!
//! OpenSky sends each state vector as a positional array of mixed values
//! rather than a keyed object. Decoding is driven by [`STATE_SLOTS`], which
//! names every position together with the kind of value it must hold and
//! whether `null` is allowed there.

use crate::types::{PositionSource, Response, State};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Server returned error: {0}")]
    ServerResponse(String),
}

/// Failure to decode a single state vector, or the response timestamp.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("invalid state object at position {index}: record contains {len} values, expected {expected}")]
    TooShort {
        index: usize,
        len: usize,
        expected: usize,
    },
    #[error("invalid state object at position {index}: expected a list, got {found}")]
    NotARecord { index: usize, found: &'static str },
    #[error("invalid state object at position {index}: {reason}")]
    Malformed { index: usize, reason: String },
    #[error("invalid {slot} value at position {index}: expected {expected}, got {found}")]
    WrongType {
        index: usize,
        slot: &'static str,
        expected: &'static str,
        found: String,
    },
    #[error("invalid {slot} value at position {index}: {seconds} is outside the supported time range")]
    TimeOutOfRange {
        index: usize,
        slot: &'static str,
        seconds: i64,
    },
    #[error("invalid response time: {0}")]
    ResponseTime(String),
}

impl DecodeError {
    /// Batch position of the offending record, if the error is per-record.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::TooShort { index, .. }
            | Self::NotARecord { index, .. }
            | Self::Malformed { index, .. }
            | Self::WrongType { index, .. }
            | Self::TimeOutOfRange { index, .. } => Some(*index),
            Self::ResponseTime(_) => None,
        }
    }
}

/// Any value that may appear in a raw state vector.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<WireValue>),
    Object(serde_json::Map<String, serde_json::Value>),
}

impl WireValue {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "string",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn as_integers(&self) -> Option<Vec<i64>> {
        match self {
            Self::List(items) => items
                .iter()
                .map(|item| item.as_number().map(|n| n as i64))
                .collect(),
            _ => None,
        }
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "boolean {}", b),
            Self::Number(n) => write!(f, "number {}", n),
            Self::Text(s) => write!(f, "string {:?}", s),
            Self::List(items) => write!(f, "list of {} values", items.len()),
            Self::Object(_) => f.write_str("object"),
        }
    }
}

/// A state vector exactly as it arrives on the wire.
pub type RawState = Vec<WireValue>;

/// Body of a `/states/all` response before decoding.
///
/// Only the envelope is parsed here. The timestamp and every state vector
/// stay as raw JSON so that a malformed one is reported on its own by
/// [`decode_response`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawResponse {
    /// Epoch seconds the snapshot was taken at. `None` when missing or null.
    #[serde(default)]
    pub time: Option<Box<RawValue>>,
    /// One entry per aircraft. OpenSky sends `null` for an empty area.
    #[serde(default)]
    pub states: Option<Vec<Box<RawValue>>>,
}

impl RawResponse {
    /// Number of batch entries, well formed or not.
    pub fn record_count(&self) -> usize {
        self.states.as_ref().map_or(0, Vec::len)
    }
}

/// Kind of value a slot must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Text,
    /// Epoch seconds, truncated to whole seconds.
    Timestamp,
    Real,
    Flag,
    IntegerList,
    /// Index into the position source table.
    Code,
}

impl SlotKind {
    pub const fn expected(&self) -> &'static str {
        match self {
            Self::Text => "string",
            Self::Timestamp => "epoch seconds",
            Self::Real => "number",
            Self::Flag => "boolean",
            Self::IntegerList => "list of numbers",
            Self::Code => "position source code",
        }
    }
}

/// One position of a raw state vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub index: usize,
    pub name: &'static str,
    pub kind: SlotKind,
    pub nullable: bool,
}

const fn slot(index: usize, name: &'static str, kind: SlotKind, nullable: bool) -> Slot {
    Slot {
        index,
        name,
        kind,
        nullable,
    }
}

const ICAO24: Slot = slot(0, "icao24", SlotKind::Text, false);
const CALLSIGN: Slot = slot(1, "callsign", SlotKind::Text, true);
const ORIGIN_COUNTRY: Slot = slot(2, "origin_country", SlotKind::Text, false);
const TIME_POSITION: Slot = slot(3, "time_position", SlotKind::Timestamp, true);
const LAST_CONTACT: Slot = slot(4, "last_contact", SlotKind::Timestamp, false);
const LONGITUDE: Slot = slot(5, "longitude", SlotKind::Real, true);
const LATITUDE: Slot = slot(6, "latitude", SlotKind::Real, true);
const BARO_ALTITUDE: Slot = slot(7, "baro_altitude", SlotKind::Real, true);
const ON_GROUND: Slot = slot(8, "on_ground", SlotKind::Flag, false);
const VELOCITY: Slot = slot(9, "velocity", SlotKind::Real, true);
const TRUE_TRACK: Slot = slot(10, "true_track", SlotKind::Real, true);
const VERTICAL_RATE: Slot = slot(11, "vertical_rate", SlotKind::Real, true);
const SENSORS: Slot = slot(12, "sensors", SlotKind::IntegerList, true);
const GEO_ALTITUDE: Slot = slot(13, "geo_altitude", SlotKind::Real, true);
const SQUAWK: Slot = slot(14, "squawk", SlotKind::Text, true);
const SPI: Slot = slot(15, "spi", SlotKind::Flag, false);
const POSITION_SOURCE: Slot = slot(16, "position_source", SlotKind::Code, false);

/// Number of slots in a state vector. Trailing extras are ignored.
pub const STATE_SLOT_COUNT: usize = 17;

/// Layout of a raw state vector, in wire order.
pub const STATE_SLOTS: [Slot; STATE_SLOT_COUNT] = [
    ICAO24,
    CALLSIGN,
    ORIGIN_COUNTRY,
    TIME_POSITION,
    LAST_CONTACT,
    LONGITUDE,
    LATITUDE,
    BARO_ALTITUDE,
    ON_GROUND,
    VELOCITY,
    TRUE_TRACK,
    VERTICAL_RATE,
    SENSORS,
    GEO_ALTITUDE,
    SQUAWK,
    SPI,
    POSITION_SOURCE,
];

/// Typed access to the slots of one record.
struct SlotReader<'a> {
    record: &'a [WireValue],
    index: usize,
}

impl<'a> SlotReader<'a> {
    fn mismatch(&self, slot: Slot, value: &WireValue) -> DecodeError {
        DecodeError::WrongType {
            index: self.index,
            slot: slot.name,
            expected: slot.kind.expected(),
            found: value.to_string(),
        }
    }

    /// `None` only for a `null` in a nullable slot.
    fn optional<T>(
        &self,
        slot: Slot,
        convert: impl FnOnce(&'a WireValue) -> Option<T>,
    ) -> Result<Option<T>, DecodeError> {
        let value = self.record.get(slot.index).ok_or(DecodeError::TooShort {
            index: self.index,
            len: self.record.len(),
            expected: STATE_SLOT_COUNT,
        })?;

        match value {
            WireValue::Null if slot.nullable => Ok(None),
            value => convert(value)
                .map(Some)
                .ok_or_else(|| self.mismatch(slot, value)),
        }
    }

    fn required<T>(
        &self,
        slot: Slot,
        convert: impl FnOnce(&'a WireValue) -> Option<T>,
    ) -> Result<T, DecodeError> {
        debug_assert!(!slot.nullable, "{} is nullable", slot.name);
        self.optional(slot, convert)?
            .ok_or_else(|| self.mismatch(slot, &WireValue::Null))
    }

    fn instant(&self, slot: Slot, raw: f64) -> Result<DateTime<Utc>, DecodeError> {
        let seconds = raw as i64;
        DateTime::from_timestamp(seconds, 0).ok_or(DecodeError::TimeOutOfRange {
            index: self.index,
            slot: slot.name,
            seconds,
        })
    }
}

/// Decode one raw state vector found at `index` in its batch.
pub fn decode_state(record: &[WireValue], index: usize) -> Result<State, DecodeError> {
    if record.len() < STATE_SLOT_COUNT {
        return Err(DecodeError::TooShort {
            index,
            len: record.len(),
            expected: STATE_SLOT_COUNT,
        });
    }

    let r = SlotReader { record, index };
    let code = |raw: &WireValue| raw.as_number().map(|n| PositionSource::from(n as i64));

    let icao24 = r.required(ICAO24, WireValue::as_text)?;
    let callsign = r.optional(CALLSIGN, WireValue::as_text)?;
    let origin_country = r.required(ORIGIN_COUNTRY, WireValue::as_text)?;
    let time_position = r
        .optional(TIME_POSITION, WireValue::as_number)?
        .map(|raw| r.instant(TIME_POSITION, raw))
        .transpose()?;
    let last_contact = r.required(LAST_CONTACT, WireValue::as_number)?;
    let last_contact = r.instant(LAST_CONTACT, last_contact)?;

    Ok(State {
        icao24,
        callsign,
        origin_country,
        time_position,
        last_contact,
        longitude: r.optional(LONGITUDE, WireValue::as_number)?,
        latitude: r.optional(LATITUDE, WireValue::as_number)?,
        baro_altitude: r.optional(BARO_ALTITUDE, WireValue::as_number)?,
        on_ground: r.required(ON_GROUND, WireValue::as_flag)?,
        velocity: r.optional(VELOCITY, WireValue::as_number)?,
        true_track: r.optional(TRUE_TRACK, WireValue::as_number)?,
        vertical_rate: r.optional(VERTICAL_RATE, WireValue::as_number)?,
        sensors: r.optional(SENSORS, WireValue::as_integers)?,
        geo_altitude: r.optional(GEO_ALTITUDE, WireValue::as_number)?,
        squawk: r.optional(SQUAWK, WireValue::as_text)?,
        spi: r.required(SPI, WireValue::as_flag)?,
        position_source: r.required(POSITION_SOURCE, code)?,
    })
}

/// Result of decoding a whole response.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// States that decoded cleanly, in wire order.
    pub response: Response,
    /// One entry per dropped record, plus one for an unusable timestamp.
    pub failures: Vec<DecodeError>,
}

impl Decoded {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Convert the response timestamp. Independent of the state vectors.
fn decode_time(raw: Option<&RawValue>) -> Result<DateTime<Utc>, DecodeError> {
    let raw = raw.ok_or_else(|| DecodeError::ResponseTime("missing".to_string()))?;
    let value: WireValue = serde_json::from_str(raw.get())
        .map_err(|e| DecodeError::ResponseTime(e.to_string()))?;

    let seconds = value.as_number().ok_or_else(|| {
        DecodeError::ResponseTime(format!("expected epoch seconds, got {}", value))
    })? as i64;

    DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
        DecodeError::ResponseTime(format!("{} is outside the supported time range", seconds))
    })
}

fn decode_entry(entry: &RawValue, index: usize) -> Result<State, DecodeError> {
    let value: WireValue =
        serde_json::from_str(entry.get()).map_err(|e| DecodeError::Malformed {
            index,
            reason: e.to_string(),
        })?;

    match value {
        WireValue::List(record) => decode_state(&record, index),
        other => Err(DecodeError::NotARecord {
            index,
            found: other.kind(),
        }),
    }
}

/// Decode every state vector of a response, dropping malformed records.
///
/// Nothing here fails the whole call. A bad timestamp leaves
/// `Response::time` unset and is reported in `failures` next to the
/// dropped records.
pub fn decode_response(raw: &RawResponse) -> Decoded {
    let entries = raw.states.as_deref().unwrap_or_default();

    let mut failures = Vec::new();
    let time = match decode_time(raw.time.as_deref()) {
        Ok(time) => Some(time),
        Err(e) => {
            tracing::warn!("Response has no usable time: {}", e);
            failures.push(e);
            None
        }
    };

    let (states, failures) = entries.iter().enumerate().fold(
        (Vec::with_capacity(entries.len()), failures),
        |(mut states, mut failures), (index, entry)| {
            match decode_entry(entry, index) {
                Ok(state) => states.push(state),
                Err(e) => {
                    tracing::warn!("Dropping state vector: {}", e);
                    failures.push(e);
                }
            }

            (states, failures)
        },
    );

    Decoded {
        response: Response { time, states },
        failures,
    }
}

/// Parse a `/states/all` response body.
pub fn parse_response(data: &[u8]) -> Result<RawResponse, ParseError> {
    // Gateways answer with HTML pages on overload
    let body = data.trim_ascii_start();
    if body.starts_with(b"<!") || body.starts_with(b"<html") {
        let text = String::from_utf8_lossy(&body[..body.len().min(500)]);
        return Err(ParseError::ServerResponse(text.to_string()));
    }

    Ok(serde_json::from_slice(body)?)
}

/// Parse a response body previously saved to disk.
pub fn load_response(path: impl AsRef<Path>) -> Result<RawResponse, ParseError> {
    let data = std::fs::read(path)?;
    parse_response(&data)
}
