use models::nettests::WebConnectivity;
use models::WebControlObservation;

use crate::{MeasurementTransformer, ObservationBatch};

pub(crate) fn transform(
    msmt: &WebConnectivity,
    ctx: &MeasurementTransformer<'_>,
) -> ObservationBatch {
    let keys = &msmt.test_keys;
    let web = ctx.consume_web_observations(
        &keys.queries,
        &keys.tcp_connect,
        &keys.tls_handshakes,
        &keys.requests,
        &keys.network_events,
    );
    ObservationBatch {
        web,
        web_ctrl: make_control_observations(msmt, ctx),
        http_middlebox: Vec::new(),
    }
}

/// Decomposes the control response: one row per resolved control address,
/// one per probed (ip, port), one for the control HTTP request.
fn make_control_observations(
    msmt: &WebConnectivity,
    ctx: &MeasurementTransformer<'_>,
) -> Vec<WebControlObservation> {
    let Some(control) = msmt.test_keys.control.as_ref() else {
        return Vec::new();
    };
    let hostname = msmt
        .header
        .input
        .as_deref()
        .and_then(|input| url::Url::parse(input).ok())
        .and_then(|url| url.host_str().map(str::to_string));

    let base = || {
        let header = ctx.header();
        WebControlObservation {
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
            hostname: hostname.clone(),
            ..Default::default()
        }
    };

    let mut observations = Vec::new();

    if let Some(dns) = control.dns.as_ref() {
        if dns.addrs.is_empty() {
            let mut obs = base();
            obs.dns_failure = dns.failure.clone();
            obs.dns_success = Some(dns.failure.is_none());
            observations.push(obs);
        }
        for addr in &dns.addrs {
            let mut obs = base();
            obs.ip = Some(addr.clone());
            obs.dns_success = Some(true);
            observations.push(obs);
        }
    }

    for (endpoint, result) in &control.tcp_connect {
        let mut obs = base();
        let (ip, port) = split_endpoint(endpoint);
        obs.ip = ip;
        obs.port = port;
        obs.tcp_success = result.status.or(Some(result.failure.is_none()));
        obs.tcp_failure = result.failure.clone();
        observations.push(obs);
    }

    if let Some(http) = control.http_request.as_ref() {
        let mut obs = base();
        obs.http_request_url = msmt.header.input.clone();
        obs.http_failure = http.failure.clone();
        obs.http_success = Some(http.failure.is_none());
        obs.http_response_body_length = http.body_length;
        obs.http_response_status_code = http.status_code;
        observations.push(obs);
    }

    observations
}

fn split_endpoint(endpoint: &str) -> (Option<String>, Option<u16>) {
    if let Some(rest) = endpoint.strip_prefix('[') {
        // Bracketed IPv6: `[::1]:443`.
        let mut parts = rest.splitn(2, ']');
        let ip = parts.next().map(str::to_string);
        let port = parts
            .next()
            .and_then(|p| p.strip_prefix(':'))
            .and_then(|p| p.parse().ok());
        return (ip, port);
    }
    match endpoint.rsplit_once(':') {
        Some((ip, port)) => (Some(ip.to_string()), port.parse().ok()),
        None => (Some(endpoint.to_string()), None),
    }
}
