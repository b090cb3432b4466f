use serde::{Deserialize, Serialize};

use crate::dataformats::{null_as_default, DnsQuery, Failure, HttpTransaction};
use crate::nettests::Header;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StunReachabilityTestKeys {
    pub endpoint: Option<String>,
    pub failure: Failure,

    #[serde(deserialize_with = "null_as_default")]
    pub queries: Vec<DnsQuery>,
    #[serde(deserialize_with = "null_as_default")]
    pub requests: Vec<HttpTransaction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StunReachability {
    #[serde(flatten)]
    pub header: Header,
    #[serde(default)]
    pub test_keys: StunReachabilityTestKeys,
}
