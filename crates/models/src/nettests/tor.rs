use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dataformats::{
    null_as_default, DnsQuery, Failure, HttpTransaction, NetworkEvent, TcpConnect, TlsHandshake,
};
use crate::nettests::Header;

/// One measured relay or directory authority.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorTarget {
    pub target_address: Option<String>,
    pub target_name: Option<String>,
    pub target_protocol: Option<String>,
    pub failure: Failure,

    #[serde(deserialize_with = "null_as_default")]
    pub network_events: Vec<NetworkEvent>,
    #[serde(deserialize_with = "null_as_default")]
    pub queries: Vec<DnsQuery>,
    #[serde(deserialize_with = "null_as_default")]
    pub requests: Vec<HttpTransaction>,
    #[serde(deserialize_with = "null_as_default")]
    pub tcp_connect: Vec<TcpConnect>,
    #[serde(deserialize_with = "null_as_default")]
    pub tls_handshakes: Vec<TlsHandshake>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorTestKeys {
    /// Keyed by target fingerprint or address.
    #[serde(deserialize_with = "null_as_default")]
    pub targets: BTreeMap<String, TorTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tor {
    #[serde(flatten)]
    pub header: Header,
    #[serde(default)]
    pub test_keys: TorTestKeys,
}
