use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dataformats::{
    null_as_default, DnsQuery, Failure, HttpTransaction, NetworkEvent, TcpConnect, TlsHandshake,
};
use crate::nettests::Header;

/// Control-vantage DNS result for the measured hostname.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlDns {
    pub failure: Failure,
    #[serde(deserialize_with = "null_as_default")]
    pub addrs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlTcpConnect {
    pub status: Option<bool>,
    pub failure: Failure,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlHttpRequest {
    pub body_length: Option<i64>,
    pub failure: Failure,
    pub status_code: Option<u16>,
    pub title: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConnectivityControl {
    pub dns: Option<ControlDns>,
    /// Keyed by `ip:port`.
    #[serde(deserialize_with = "null_as_default")]
    pub tcp_connect: BTreeMap<String, ControlTcpConnect>,
    pub http_request: Option<ControlHttpRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConnectivityTestKeys {
    #[serde(deserialize_with = "null_as_default")]
    pub queries: Vec<DnsQuery>,
    #[serde(deserialize_with = "null_as_default")]
    pub tcp_connect: Vec<TcpConnect>,
    #[serde(deserialize_with = "null_as_default")]
    pub tls_handshakes: Vec<TlsHandshake>,
    #[serde(deserialize_with = "null_as_default")]
    pub requests: Vec<HttpTransaction>,
    #[serde(deserialize_with = "null_as_default")]
    pub network_events: Vec<NetworkEvent>,

    pub control: Option<WebConnectivityControl>,
    pub control_failure: Failure,
    pub dns_experiment_failure: Failure,
    pub http_experiment_failure: Failure,
    pub client_resolver: Option<String>,

    /// `false`, a blocking-type string, or `null`; kept verbatim.
    pub blocking: Option<serde_json::Value>,
    pub accessible: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebConnectivity {
    #[serde(flatten)]
    pub header: Header,
    #[serde(default)]
    pub test_keys: WebConnectivityTestKeys,
}
