//! Seconds-precision RFC 3339 timestamps for the JSON surface.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// A UTC timestamp that serializes as RFC 3339 truncated to whole seconds
/// (`2009-11-17T00:00:00Z`).
///
/// Database timestamps carry sub-second precision; the wire format does
/// not. Round-tripping through JSON therefore preserves the instant only
/// to the second, which is what the API promises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Rfc3339Seconds(pub DateTime<Utc>);

impl From<DateTime<Utc>> for Rfc3339Seconds {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl Serialize for Rfc3339Seconds {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

impl<'de> Deserialize<'de> for Rfc3339Seconds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let parsed = DateTime::parse_from_rfc3339(&raw).map_err(de::Error::custom)?;
        Ok(Self(parsed.with_timezone(&Utc)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn serializes_without_subseconds() {
        let ts = Rfc3339Seconds(Utc.with_ymd_and_hms(2009, 11, 17, 0, 0, 0).unwrap());
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, r#""2009-11-17T00:00:00Z""#);
    }

    #[test]
    fn round_trip_preserves_instant_to_the_second() {
        let original = Rfc3339Seconds(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 45).unwrap() + chrono::Duration::milliseconds(987),
        );
        let json = serde_json::to_string(&original).unwrap();
        let back: Rfc3339Seconds = serde_json::from_str(&json).unwrap();

        assert_eq!(back.0.timestamp(), original.0.timestamp());
        assert_eq!(back.0.timestamp_subsec_millis(), 0);
    }

    #[test]
    fn parses_offset_timestamps_into_utc() {
        let back: Rfc3339Seconds = serde_json::from_str(r#""2024-06-01T15:30:45+03:00""#).unwrap();
        assert_eq!(
            back.0,
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 45).unwrap()
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(serde_json::from_str::<Rfc3339Seconds>(r#""yesterday""#).is_err());
    }
}
