use serde::{Deserialize, Serialize};

use crate::dataformats::{null_as_default, Failure, MaybeBinaryData};
use crate::nettests::Header;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpInvalidRequestLineTestKeys {
    pub failure: Failure,
    /// Raw lines echoed back by the (possibly interfering) middlebox.
    #[serde(deserialize_with = "null_as_default")]
    pub received: Vec<MaybeBinaryData>,
    /// Invalid request lines sent to the helper.
    #[serde(deserialize_with = "null_as_default")]
    pub sent: Vec<String>,
    pub tampering: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpInvalidRequestLine {
    #[serde(flatten)]
    pub header: Header,
    #[serde(default)]
    pub test_keys: HttpInvalidRequestLineTestKeys,
}
