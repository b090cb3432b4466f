//! Flat observation rows, the unit of database insertion.
//!
//! Each observation type names its destination table and emits columns in
//! struct-declaration order, which is the ordering contract the database
//! writer relies on. The `observation_model!` macro keeps the struct, the
//! column list and the row serialization from drifting apart.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::timestamp;

/// A single database cell. The writer maps these onto whatever scalar
/// representation the backend wants.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    #[serde(with = "scalar_timestamp")]
    Timestamp(NaiveDateTime),
}

mod scalar_timestamp {
    use super::*;

    pub fn serialize<S>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&ts.format(timestamp::FORMAT).to_string())
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Null => Ok(()),
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Text(v) => write!(f, "{v}"),
            Scalar::Timestamp(v) => write!(f, "{}", v.format(timestamp::FORMAT)),
        }
    }
}

/// Conversion of observation field types into database cells.
pub trait ToScalar {
    fn to_scalar(&self) -> Scalar;
}

impl ToScalar for String {
    fn to_scalar(&self) -> Scalar {
        Scalar::Text(self.clone())
    }
}
impl ToScalar for bool {
    fn to_scalar(&self) -> Scalar {
        Scalar::Bool(*self)
    }
}
impl ToScalar for u16 {
    fn to_scalar(&self) -> Scalar {
        Scalar::Int(i64::from(*self))
    }
}
impl ToScalar for u32 {
    fn to_scalar(&self) -> Scalar {
        Scalar::Int(i64::from(*self))
    }
}
impl ToScalar for i64 {
    fn to_scalar(&self) -> Scalar {
        Scalar::Int(*self)
    }
}
impl ToScalar for f64 {
    fn to_scalar(&self) -> Scalar {
        Scalar::Float(*self)
    }
}
impl ToScalar for NaiveDateTime {
    fn to_scalar(&self) -> Scalar {
        Scalar::Timestamp(*self)
    }
}
impl<T: ToScalar> ToScalar for Option<T> {
    fn to_scalar(&self) -> Scalar {
        match self {
            Some(v) => v.to_scalar(),
            None => Scalar::Null,
        }
    }
}

/// Declares an observation row type: the struct, its destination table, the
/// column list and `to_row`, all from a single field declaration so that
/// column ordering is fixed by declaration order.
macro_rules! observation_model {
    (
        $(#[$meta:meta])*
        pub struct $name:ident, table $table:literal {
            $(
                $(#[$fmeta:meta])*
                pub $field:ident: $ty:ty,
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize)]
        pub struct $name {
            $(
                $(#[$fmeta])*
                pub $field: $ty,
            )*
        }

        impl $name {
            pub const DB_TABLE: &'static str = $table;

            /// Column names, in declaration order.
            pub fn columns() -> &'static [&'static str] {
                &[$(stringify!($field),)*]
            }

            /// The row as `(column, cell)` pairs, in declaration order.
            pub fn to_row(&self) -> Vec<(&'static str, Scalar)> {
                vec![$((stringify!($field), self.$field.to_scalar()),)*]
            }
        }
    };
}

observation_model! {
    /// One correlated (DNS/TCP/TLS/HTTP) sub-event of a web-style test.
    pub struct WebObservation, table "obs_web" {
        pub measurement_uid: String,
        pub report_id: String,
        pub input: Option<String>,
        pub probe_asn: Option<u32>,
        pub probe_cc: String,
        pub software_name: String,
        pub software_version: String,
        pub test_name: String,
        pub test_version: String,
        pub test_runtime: f64,
        pub measurement_start_time: Option<NaiveDateTime>,
        pub resolver_ip: Option<String>,
        pub bucket_date: String,

        pub domain_name: Option<String>,
        pub ip: Option<String>,
        pub port: Option<u16>,
        pub ip_asn: Option<u32>,
        pub ip_as_org_name: Option<String>,
        pub ip_cc: Option<String>,

        pub dns_query_type: Option<String>,
        pub dns_engine: Option<String>,
        pub dns_failure: Option<String>,
        pub dns_answer: Option<String>,
        pub dns_fingerprint_matches: Option<String>,
        pub dns_t: Option<f64>,
        pub is_tls_consistent: Option<bool>,

        pub tcp_failure: Option<String>,
        pub tcp_success: Option<bool>,
        pub tcp_t: Option<f64>,

        pub tls_server_name: Option<String>,
        pub tls_version: Option<String>,
        pub tls_cipher_suite: Option<String>,
        pub tls_is_certificate_valid: Option<bool>,
        pub tls_failure: Option<String>,
        pub tls_handshake_time: Option<f64>,
        pub tls_network_bytes_in: Option<i64>,
        pub tls_network_bytes_out: Option<i64>,
        pub tls_t: Option<f64>,

        pub http_request_url: Option<String>,
        pub http_request_method: Option<String>,
        pub http_failure: Option<String>,
        pub http_response_status_code: Option<u16>,
        pub http_response_body_length: Option<i64>,
        pub http_response_body_is_truncated: Option<bool>,
        pub http_response_body_sha256: Option<String>,
        pub http_response_headers_digest: Option<String>,
        pub http_response_header_server: Option<String>,
        pub http_response_header_location: Option<String>,
        pub http_fingerprint_matches: Option<String>,
        pub http_runtime: Option<f64>,
        pub http_t: Option<f64>,
    }
}

observation_model! {
    /// Control-vantage counterpart of a `WebObservation`, produced from the
    /// web_connectivity control response.
    pub struct WebControlObservation, table "obs_web_ctrl" {
        pub measurement_uid: String,
        pub report_id: String,
        pub input: Option<String>,
        pub probe_asn: Option<u32>,
        pub probe_cc: String,
        pub software_name: String,
        pub software_version: String,
        pub test_name: String,
        pub test_version: String,
        pub test_runtime: f64,
        pub measurement_start_time: Option<NaiveDateTime>,
        pub resolver_ip: Option<String>,
        pub bucket_date: String,

        pub hostname: Option<String>,
        pub ip: Option<String>,
        pub port: Option<u16>,

        pub dns_failure: Option<String>,
        pub dns_success: Option<bool>,
        pub tcp_failure: Option<String>,
        pub tcp_success: Option<bool>,
        pub tls_failure: Option<String>,
        pub tls_success: Option<bool>,
        pub http_request_url: Option<String>,
        pub http_failure: Option<String>,
        pub http_success: Option<bool>,
        pub http_response_body_length: Option<i64>,
        pub http_response_status_code: Option<u16>,
    }
}

observation_model! {
    /// Output of the middlebox-detection tests, one row per measurement.
    pub struct HttpMiddleboxObservation, table "obs_http_middlebox" {
        pub measurement_uid: String,
        pub report_id: String,
        pub input: Option<String>,
        pub probe_asn: Option<u32>,
        pub probe_cc: String,
        pub software_name: String,
        pub software_version: String,
        pub test_name: String,
        pub test_version: String,
        pub test_runtime: f64,
        pub measurement_start_time: Option<NaiveDateTime>,
        pub resolver_ip: Option<String>,
        pub bucket_date: String,

        pub hirl_success: Option<bool>,
        pub hirl_failure: Option<String>,
        pub hirl_tampering: Option<bool>,
        pub hirl_sent_0: Option<String>,
        pub hirl_sent_1: Option<String>,
        pub hirl_sent_2: Option<String>,
        pub hirl_sent_3: Option<String>,
        pub hirl_sent_4: Option<String>,
        pub hirl_received_0: Option<String>,
        pub hirl_received_1: Option<String>,
        pub hirl_received_2: Option<String>,
        pub hirl_received_3: Option<String>,
        pub hirl_received_4: Option<String>,

        pub hfm_success: Option<bool>,
        pub hfm_failure: Option<String>,
        pub hfm_diff: Option<String>,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn columns_follow_declaration_order() {
        let columns = WebObservation::columns();
        assert_eq!(columns[0], "measurement_uid");
        let domain_idx = columns.iter().position(|c| *c == "domain_name").unwrap();
        let tcp_idx = columns.iter().position(|c| *c == "tcp_failure").unwrap();
        let http_idx = columns
            .iter()
            .position(|c| *c == "http_request_url")
            .unwrap();
        assert!(domain_idx < tcp_idx && tcp_idx < http_idx);
        // The meta-field naming the table is not a column.
        assert!(!columns.contains(&"db_table"));
    }

    #[test]
    fn row_matches_columns() {
        let obs = WebObservation {
            measurement_uid: "uid".to_string(),
            probe_cc: "IT".to_string(),
            dns_answer: Some("1.2.3.4".to_string()),
            ..Default::default()
        };
        let row = obs.to_row();
        assert_eq!(row.len(), WebObservation::columns().len());
        for ((name, _), expect) in row.iter().zip(WebObservation::columns()) {
            assert_eq!(name, expect);
        }
        let cell = &row.iter().find(|(n, _)| *n == "dns_answer").unwrap().1;
        assert_eq!(*cell, Scalar::Text("1.2.3.4".to_string()));
    }

    #[test]
    fn rows_are_deterministic() {
        let obs = HttpMiddleboxObservation {
            measurement_uid: "uid".to_string(),
            hirl_success: Some(true),
            ..Default::default()
        };
        assert_eq!(obs.to_row(), obs.to_row());
        assert_eq!(HttpMiddleboxObservation::DB_TABLE, "obs_http_middlebox");
    }
}
