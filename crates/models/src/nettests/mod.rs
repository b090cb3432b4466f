//! Typed measurement variants, one per supported test.
//!
//! A raw record's `test_name` selects the variant; everything else about the
//! envelope is shared. Unrecognized test names decode into the [`Base`]
//! variant so that the caller can count and skip them without failing the
//! containing file.

mod dnscheck;
mod http_header_field_manipulation;
mod http_invalid_request_line;
mod signal;
mod stun_reachability;
mod telegram;
mod tor;
mod web_connectivity;
mod whatsapp;

pub use dnscheck::{DnsCheck, DnsCheckLookup, DnsCheckTestKeys};
pub use http_header_field_manipulation::{
    HttpHeaderFieldManipulation, HttpHeaderFieldManipulationTestKeys, TamperingReport,
};
pub use http_invalid_request_line::{HttpInvalidRequestLine, HttpInvalidRequestLineTestKeys};
pub use signal::{Signal, SignalTestKeys};
pub use stun_reachability::{StunReachability, StunReachabilityTestKeys};
pub use telegram::{Telegram, TelegramTestKeys};
pub use tor::{Tor, TorTarget, TorTestKeys};
pub use web_connectivity::{
    ControlDns, ControlHttpRequest, ControlTcpConnect, WebConnectivity, WebConnectivityControl,
    WebConnectivityTestKeys,
};
pub use whatsapp::{Whatsapp, WhatsappTestKeys};

use crate::timestamp;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Envelope fields common to every measurement, regardless of test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    /// Not part of the wire record; injected by the loader from the
    /// container-derived UID.
    pub measurement_uid: Option<String>,
    pub report_id: String,
    pub input: Option<String>,
    #[serde(with = "timestamp::opt")]
    pub measurement_start_time: Option<NaiveDateTime>,
    pub probe_asn: String,
    pub probe_cc: String,
    pub resolver_ip: Option<String>,
    pub software_name: String,
    pub software_version: String,
    pub test_name: String,
    #[serde(with = "timestamp::opt")]
    pub test_start_time: Option<NaiveDateTime>,
    pub test_runtime: f64,
    pub test_version: String,
}

impl Header {
    /// Numeric AS number parsed from the `AS1234` form.
    pub fn asn(&self) -> Option<u32> {
        self.probe_asn.strip_prefix("AS")?.parse().ok()
    }
}

/// A measurement whose test has no dedicated decoder. The payload is kept
/// opaque; transformation skips it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseMeasurement {
    #[serde(flatten)]
    pub header: Header,
    #[serde(default)]
    pub test_keys: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    WebConnectivity(WebConnectivity),
    DnsCheck(DnsCheck),
    Signal(Signal),
    Telegram(Telegram),
    Tor(Tor),
    StunReachability(StunReachability),
    Whatsapp(Whatsapp),
    HttpInvalidRequestLine(HttpInvalidRequestLine),
    HttpHeaderFieldManipulation(HttpHeaderFieldManipulation),
    Base(BaseMeasurement),
}

impl Measurement {
    pub fn header(&self) -> &Header {
        match self {
            Measurement::WebConnectivity(m) => &m.header,
            Measurement::DnsCheck(m) => &m.header,
            Measurement::Signal(m) => &m.header,
            Measurement::Telegram(m) => &m.header,
            Measurement::Tor(m) => &m.header,
            Measurement::StunReachability(m) => &m.header,
            Measurement::Whatsapp(m) => &m.header,
            Measurement::HttpInvalidRequestLine(m) => &m.header,
            Measurement::HttpHeaderFieldManipulation(m) => &m.header,
            Measurement::Base(m) => &m.header,
        }
    }

    fn header_mut(&mut self) -> &mut Header {
        match self {
            Measurement::WebConnectivity(m) => &mut m.header,
            Measurement::DnsCheck(m) => &mut m.header,
            Measurement::Signal(m) => &mut m.header,
            Measurement::Telegram(m) => &mut m.header,
            Measurement::Tor(m) => &mut m.header,
            Measurement::StunReachability(m) => &mut m.header,
            Measurement::Whatsapp(m) => &mut m.header,
            Measurement::HttpInvalidRequestLine(m) => &mut m.header,
            Measurement::HttpHeaderFieldManipulation(m) => &mut m.header,
            Measurement::Base(m) => &mut m.header,
        }
    }

    /// True when the test had no dedicated decoder.
    pub fn is_base(&self) -> bool {
        matches!(self, Measurement::Base(_))
    }
}

/// Canonical form of a test name: lowercased with underscores stripped, the
/// spelling used by archive filenames (`web_connectivity` and
/// `webconnectivity` compare equal).
pub fn canonical_test_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to decode '{test_name}' measurement: {source}")]
    Decode {
        test_name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Decodes a raw record into its typed variant, keyed by the canonical test
/// name, and stamps the container-derived `uid` into the header.
pub fn load_measurement(record: &serde_json::Value, uid: &str) -> Result<Measurement, LoadError> {
    let test_name = record
        .get("test_name")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();

    let decode = |err: serde_json::Error| LoadError::Decode {
        test_name: test_name.to_string(),
        source: err,
    };

    let mut measurement = match canonical_test_name(test_name).as_str() {
        "webconnectivity" => WebConnectivity::deserialize(record)
            .map(Measurement::WebConnectivity)
            .map_err(decode)?,
        "dnscheck" => DnsCheck::deserialize(record)
            .map(Measurement::DnsCheck)
            .map_err(decode)?,
        "signal" => Signal::deserialize(record)
            .map(Measurement::Signal)
            .map_err(decode)?,
        "telegram" => Telegram::deserialize(record)
            .map(Measurement::Telegram)
            .map_err(decode)?,
        "tor" => Tor::deserialize(record)
            .map(Measurement::Tor)
            .map_err(decode)?,
        "stunreachability" => StunReachability::deserialize(record)
            .map(Measurement::StunReachability)
            .map_err(decode)?,
        "whatsapp" => Whatsapp::deserialize(record)
            .map(Measurement::Whatsapp)
            .map_err(decode)?,
        "httpinvalidrequestline" => HttpInvalidRequestLine::deserialize(record)
            .map(Measurement::HttpInvalidRequestLine)
            .map_err(decode)?,
        "httpheaderfieldmanipulation" => HttpHeaderFieldManipulation::deserialize(record)
            .map(Measurement::HttpHeaderFieldManipulation)
            .map_err(decode)?,
        _ => BaseMeasurement::deserialize(record)
            .map(Measurement::Base)
            .map_err(decode)?,
    };
    measurement.header_mut().measurement_uid = Some(uid.to_string());
    Ok(measurement)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_names_canonicalize() {
        assert_eq!(canonical_test_name("web_connectivity"), "webconnectivity");
        assert_eq!(canonical_test_name("WebConnectivity"), "webconnectivity");
        assert_eq!(canonical_test_name("tor"), "tor");
    }

    #[test]
    fn unknown_test_decodes_as_base() {
        let record = json!({
            "test_name": "riseupvpn",
            "report_id": "20230101T000000Z_riseupvpn_IT_1234_n1_x",
            "probe_cc": "IT",
            "probe_asn": "AS30722",
            "test_keys": {"api_status": "ok"},
        });
        let msmt = load_measurement(&record, "uid-1").unwrap();
        assert!(msmt.is_base());
        assert_eq!(msmt.header().measurement_uid.as_deref(), Some("uid-1"));
        assert_eq!(msmt.header().asn(), Some(30722));
    }

    #[test]
    fn loader_stamps_uid() {
        let record = json!({
            "test_name": "telegram",
            "report_id": "r1",
            "probe_cc": "RU",
            "probe_asn": "AS1",
            "measurement_start_time": "2021-06-14 00:45:21",
            "test_keys": {"telegram_tcp_blocking": false},
        });
        let msmt = load_measurement(&record, "20210614004521.999962_JO_signal_68eb19b4").unwrap();
        match &msmt {
            Measurement::Telegram(t) => {
                assert_eq!(t.test_keys.telegram_tcp_blocking, Some(false));
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
        assert!(msmt.header().measurement_start_time.is_some());
    }
}
