use serde::{Deserialize, Serialize};

use crate::dataformats::{
    null_as_default, DnsQuery, Failure, HttpTransaction, NetworkEvent, TcpConnect, TlsHandshake,
};
use crate::nettests::Header;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsappTestKeys {
    pub failure: Failure,

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

    pub registration_server_failure: Failure,
    pub registration_server_status: Option<String>,
    pub whatsapp_endpoints_status: Option<String>,
    pub whatsapp_web_failure: Failure,
    pub whatsapp_web_status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Whatsapp {
    #[serde(flatten)]
    pub header: Header,
    #[serde(default)]
    pub test_keys: WhatsappTestKeys,
}
