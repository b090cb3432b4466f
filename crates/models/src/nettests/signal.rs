use serde::{Deserialize, Serialize};

use crate::dataformats::{
    null_as_default, DnsQuery, Failure, HttpTransaction, NetworkEvent, TcpConnect, TlsHandshake,
};
use crate::nettests::Header;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalTestKeys {
    pub failure: Failure,
    pub failed_operation: Option<String>,

    #[serde(deserialize_with = "null_as_default")]
    pub network_events: Vec<NetworkEvent>,
    #[serde(deserialize_with = "null_as_default")]
    pub tls_handshakes: Vec<TlsHandshake>,
    #[serde(deserialize_with = "null_as_default")]
    pub queries: Vec<DnsQuery>,
    #[serde(deserialize_with = "null_as_default")]
    pub tcp_connect: Vec<TcpConnect>,
    #[serde(deserialize_with = "null_as_default")]
    pub requests: Vec<HttpTransaction>,

    pub signal_backend_status: Option<String>,
    pub signal_backend_failure: Failure,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(flatten)]
    pub header: Header,
    #[serde(default)]
    pub test_keys: SignalTestKeys,
}
