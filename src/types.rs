//! Core data types for OpenSky state vectors.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Origin of a state vector's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "&'static str")]
#[repr(u8)]
pub enum PositionSource {
    Adsb = 0,
    Asterix = 1,
    Mlat = 2,
    Flarm = 3,
    /// Any code outside the table published by OpenSky.
    Unknown = 255,
}

impl PositionSource {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Adsb => "ADSB",
            Self::Asterix => "ASTERIX",
            Self::Mlat => "MLAT",
            Self::Flarm => "FLARM",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl From<i64> for PositionSource {
    fn from(code: i64) -> Self {
        match code {
            0 => Self::Adsb,
            1 => Self::Asterix,
            2 => Self::Mlat,
            3 => Self::Flarm,
            _ => Self::Unknown,
        }
    }
}

impl From<PositionSource> for &'static str {
    fn from(source: PositionSource) -> Self {
        source.as_str()
    }
}

impl fmt::Display for PositionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One aircraft's state vector.
///
/// Every `Option` field is `None` when OpenSky reported `null` for it; a
/// zero is always a real reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct State {
    /// ICAO24 transponder address, lowercase hex.
    pub icao24: String,
    /// Call sign, space padded to 8 characters by OpenSky.
    pub callsign: Option<String>,
    /// Country inferred from the ICAO24 address block.
    pub origin_country: String,
    /// Time of the last position report.
    pub time_position: Option<DateTime<Utc>>,
    /// Time of the last message of any kind.
    pub last_contact: DateTime<Utc>,
    /// WGS-84 longitude in degrees.
    pub longitude: Option<f64>,
    /// WGS-84 latitude in degrees.
    pub latitude: Option<f64>,
    /// Barometric altitude in meters.
    pub baro_altitude: Option<f64>,
    pub on_ground: bool,
    /// Ground speed in m/s.
    pub velocity: Option<f64>,
    /// Heading in degrees clockwise from north.
    pub true_track: Option<f64>,
    /// Vertical rate in m/s, positive when climbing.
    pub vertical_rate: Option<f64>,
    /// Serials of the receivers that contributed to this vector.
    pub sensors: Option<Vec<i64>>,
    /// Geometric altitude in meters.
    pub geo_altitude: Option<f64>,
    pub squawk: Option<String>,
    /// Special purpose indicator.
    pub spi: bool,
    pub position_source: PositionSource,
}

impl State {
    /// Longitude and latitude together, when both were reported.
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.longitude?, self.latitude?))
    }

    /// Call sign with OpenSky's trailing padding removed.
    pub fn callsign_trimmed(&self) -> Option<&str> {
        self.callsign
            .as_deref()
            .map(str::trim_end)
            .filter(|c| !c.is_empty())
    }
}

/// Decoded snapshot of the monitored airspace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Server time of the snapshot, unset when the server sent none usable
    pub time: Option<DateTime<Utc>>,
    pub states: Vec<State>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_state() -> State {
        State {
            icao24: "7c7f38".to_string(),
            callsign: Some("ZEY     ".to_string()),
            origin_country: "Australia".to_string(),
            time_position: None,
            last_contact: DateTime::from_timestamp(1643623948, 0).unwrap(),
            longitude: Some(144.7732),
            latitude: Some(-37.9141),
            baro_altitude: None,
            on_ground: false,
            velocity: None,
            true_track: None,
            vertical_rate: None,
            sensors: None,
            geo_altitude: None,
            squawk: None,
            spi: false,
            position_source: PositionSource::Adsb,
        }
    }

    #[test]
    fn test_position_source_table() {
        assert_eq!(PositionSource::from(0), PositionSource::Adsb);
        assert_eq!(PositionSource::from(1), PositionSource::Asterix);
        assert_eq!(PositionSource::from(2), PositionSource::Mlat);
        assert_eq!(PositionSource::from(3), PositionSource::Flarm);
        assert_eq!(PositionSource::from(3).to_string(), "FLARM");
    }

    #[test]
    fn test_position_source_fallback() {
        assert_eq!(PositionSource::from(4), PositionSource::Unknown);
        assert_eq!(PositionSource::from(-1), PositionSource::Unknown);
        assert_eq!(PositionSource::Unknown.as_str(), "UNKNOWN");
    }

    #[test]
    fn test_position_source_serializes_as_label() {
        let json = serde_json::to_string(&PositionSource::Mlat).unwrap();
        assert_eq!(json, "\"MLAT\"");
    }

    #[test]
    fn test_position_requires_both_axes() {
        let mut state = make_state();
        assert_eq!(state.position(), Some((144.7732, -37.9141)));

        state.latitude = None;
        assert_eq!(state.position(), None);
    }

    #[test]
    fn test_callsign_trimmed() {
        let mut state = make_state();
        assert_eq!(state.callsign_trimmed(), Some("ZEY"));

        state.callsign = Some("        ".to_string());
        assert_eq!(state.callsign_trimmed(), None);
    }
}
