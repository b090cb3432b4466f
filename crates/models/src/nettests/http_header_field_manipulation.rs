use serde::{Deserialize, Serialize};

use crate::dataformats::{null_as_default, Failure, HttpTransaction};
use crate::nettests::Header;

/// Which aspects of the request the path tampered with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TamperingReport {
    pub header_field_name: Option<bool>,
    pub header_field_number: Option<bool>,
    pub header_field_value: Option<bool>,
    pub header_name_capitalization: Option<bool>,
    #[serde(deserialize_with = "null_as_default")]
    pub header_name_diff: Vec<String>,
    pub request_line_capitalization: Option<bool>,
    pub total: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpHeaderFieldManipulationTestKeys {
    pub failure: Failure,
    #[serde(deserialize_with = "null_as_default")]
    pub requests: Vec<HttpTransaction>,
    pub tampering: Option<TamperingReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpHeaderFieldManipulation {
    #[serde(flatten)]
    pub header: Header,
    #[serde(default)]
    pub test_keys: HttpHeaderFieldManipulationTestKeys,
}
