//! Shared sub-event types of the measurement wire format. Every supported
//! test embeds some subset of these lists in its `test_keys`.
//!
//! The format has grown organically over years of probe releases, so nearly
//! every field is optional and lists may be `null` instead of absent. The
//! deserializers here must accept the oldest records in the archive.

use serde::{Deserialize, Deserializer, Serialize};

/// Probe-side failure string. `None` means the operation succeeded.
pub type Failure = Option<String>;

/// Deserializes `null` as `T::default()`. Old probes emit explicit nulls for
/// empty sub-event lists.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    let value: Option<T> = Option::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

/// A value that is either plain UTF-8 text or a base64 envelope
/// (`{"format": "base64", "data": "..."}`) for bytes that are not valid
/// UTF-8, such as binary response bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaybeBinaryData {
    Text(String),
    Binary { format: String, data: String },
}

impl MaybeBinaryData {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MaybeBinaryData::Text(s) => Some(s),
            MaybeBinaryData::Binary { .. } => None,
        }
    }

    /// Raw bytes of the value, decoding the base64 envelope if present.
    /// Invalid base64 yields the undecoded payload bytes.
    pub fn bytes(&self) -> Vec<u8> {
        match self {
            MaybeBinaryData::Text(s) => s.as_bytes().to_vec(),
            MaybeBinaryData::Binary { data, .. } => {
                base64::decode(data).unwrap_or_else(|_| data.as_bytes().to_vec())
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsAnswer {
    pub answer_type: Option<String>,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    /// CNAME target, when `answer_type` is `CNAME`.
    pub hostname: Option<String>,
    pub asn: Option<u32>,
    pub as_org_name: Option<String>,
    pub ttl: Option<u32>,
}

impl DnsAnswer {
    /// The observable answer value: an IP address or a CNAME target.
    pub fn value(&self) -> Option<&str> {
        self.ipv4
            .as_deref()
            .or(self.ipv6.as_deref())
            .or(self.hostname.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsQuery {
    pub hostname: Option<String>,
    pub query_type: Option<String>,
    pub engine: Option<String>,
    pub failure: Failure,
    pub resolver_hostname: Option<String>,
    pub resolver_address: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub answers: Vec<DnsAnswer>,
    pub t: Option<f64>,
    pub transaction_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConnectStatus {
    pub blocked: Option<bool>,
    pub failure: Failure,
    pub success: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConnect {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub status: TcpConnectStatus,
    pub t: Option<f64>,
    pub transaction_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsHandshake {
    /// `ip:port` of the handshake target.
    pub address: Option<String>,
    pub cipher_suite: Option<String>,
    pub failure: Failure,
    pub negotiated_protocol: Option<String>,
    pub no_tls_verify: Option<bool>,
    #[serde(deserialize_with = "null_as_default")]
    pub peer_certificates: Vec<MaybeBinaryData>,
    pub server_name: Option<String>,
    pub t: Option<f64>,
    pub t0: Option<f64>,
    pub tls_version: Option<String>,
    pub transaction_id: Option<i64>,
}

impl TlsHandshake {
    /// The IP portion of `address`, shedding the port suffix.
    pub fn target_ip(&self) -> Option<&str> {
        let address = self.address.as_deref()?;
        // IPv6 addresses are bracketed: `[::1]:443`.
        if let Some(rest) = address.strip_prefix('[') {
            return rest.split(']').next();
        }
        address.rsplit_once(':').map(|(ip, _)| ip).or(Some(address))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRequest {
    pub body: Option<MaybeBinaryData>,
    pub body_is_truncated: Option<bool>,
    #[serde(deserialize_with = "null_as_default")]
    pub headers_list: Vec<(String, MaybeBinaryData)>,
    pub method: Option<String>,
    pub url: Option<String>,
    pub x_transport: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpResponse {
    pub body: Option<MaybeBinaryData>,
    pub body_is_truncated: Option<bool>,
    pub code: Option<u16>,
    #[serde(deserialize_with = "null_as_default")]
    pub headers_list: Vec<(String, MaybeBinaryData)>,
}

impl HttpResponse {
    /// First value of the named header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers_list
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_text())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpTransaction {
    pub failure: Failure,
    pub network: Option<String>,
    pub address: Option<String>,
    pub request: Option<HttpRequest>,
    pub response: Option<HttpResponse>,
    pub t: Option<f64>,
    pub t0: Option<f64>,
    pub transaction_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkEvent {
    pub address: Option<String>,
    pub failure: Failure,
    pub num_bytes: Option<i64>,
    /// One of `read`, `write`, `connect`, `close`, ...
    pub operation: Option<String>,
    pub proto: Option<String>,
    pub t: Option<f64>,
    pub transaction_id: Option<i64>,
}
