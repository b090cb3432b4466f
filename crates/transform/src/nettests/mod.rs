//! Per-test transformation entry points. Each submodule knows how one
//! test's `test_keys` decompose into observation rows.

pub(crate) mod dnscheck;
pub(crate) mod http_header_field_manipulation;
pub(crate) mod http_invalid_request_line;
pub(crate) mod signal;
pub(crate) mod stun_reachability;
pub(crate) mod telegram;
pub(crate) mod tor;
pub(crate) mod web_connectivity;
pub(crate) mod whatsapp;

use models::HttpMiddleboxObservation;

use crate::MeasurementTransformer;

/// A middlebox row carrying only the measurement header columns.
pub(crate) fn base_middlebox_observation(
    ctx: &MeasurementTransformer<'_>,
) -> HttpMiddleboxObservation {
    let header = ctx.header();
    HttpMiddleboxObservation {
        measurement_uid: header.measurement_uid.clone().unwrap_or_default(),
        report_id: header.report_id.clone(),
        input: header.input.clone(),
        probe_asn: header.asn(),
        probe_cc: header.probe_cc.clone(),
        software_name: header.software_name.clone(),
        software_version: header.software_version.clone(),
        test_name: header.test_name.clone(),
        test_version: header.test_version.clone(),
        test_runtime: header.test_runtime,
        measurement_start_time: header.measurement_start_time,
        resolver_ip: header.resolver_ip.clone(),
        bucket_date: ctx.bucket_date().to_string(),
        ..Default::default()
    }
}
