use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dataformats::{
    null_as_default, DnsQuery, Failure, HttpTransaction, NetworkEvent, TcpConnect, TlsHandshake,
};
use crate::nettests::Header;

/// One resolver lookup. The bootstrap lookup and every entry of `lookups`
/// share this shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsCheckLookup {
    pub failure: Failure,
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
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsCheckTestKeys {
    pub bootstrap: Option<DnsCheckLookup>,
    pub bootstrap_failure: Failure,
    /// Keyed by an opaque lookup label chosen by the probe.
    #[serde(deserialize_with = "null_as_default")]
    pub lookups: BTreeMap<String, DnsCheckLookup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsCheck {
    #[serde(flatten)]
    pub header: Header,
    #[serde(default)]
    pub test_keys: DnsCheckTestKeys,
}
