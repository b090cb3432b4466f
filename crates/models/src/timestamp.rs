//! Serde adapters for the archive's `%Y-%m-%d %H:%M:%S` timestamps, which are
//! always UTC but carry no offset marker.

use chrono::NaiveDateTime;
use serde::{self, Deserialize, Deserializer, Serializer};

pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Adapter for `Option<NaiveDateTime>` fields. Absent, `null`, and
/// unparseable values all map to `None`: header timestamps in the oldest
/// buckets are unreliable and must never fail a whole measurement.
pub mod opt {
    use super::*;

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw
            .as_deref()
            .and_then(|s| NaiveDateTime::parse_from_str(s, FORMAT).ok()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Wrapper {
        #[serde(with = "opt", default)]
        at: Option<NaiveDateTime>,
    }

    #[test]
    fn round_trips_archive_timestamps() {
        let w: Wrapper = serde_json::from_str(r#"{"at": "2022-06-08 12:18:28"}"#).unwrap();
        assert_eq!(
            serde_json::to_string(&w).unwrap(),
            r#"{"at":"2022-06-08 12:18:28"}"#
        );
    }

    #[test]
    fn tolerates_null_and_garbage() {
        let w: Wrapper = serde_json::from_str(r#"{"at": null}"#).unwrap();
        assert_eq!(w.at, None);
        let w: Wrapper = serde_json::from_str(r#"{"at": "not a time"}"#).unwrap();
        assert_eq!(w.at, None);
        let w: Wrapper = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(w.at, None);
    }
}
