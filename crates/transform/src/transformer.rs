//! Per-sub-event extractors and the cross-linking pass that folds them into
//! a unified observation stream.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use models::{
    DnsQuery, Header, HttpTransaction, NetworkEvent, TcpConnect, TlsHandshake, WebObservation,
};

use crate::lookups::{FingerprintDb, NetinfoDb};

/// Holds the measurement header and enrichment handles while a single
/// measurement is decomposed. One transformer per measurement.
pub struct MeasurementTransformer<'a> {
    header: &'a Header,
    netinfo: &'a dyn NetinfoDb,
    fingerprints: &'a dyn FingerprintDb,
    bucket_date: &'a str,
}

impl<'a> MeasurementTransformer<'a> {
    pub fn new(
        header: &'a Header,
        netinfo: &'a dyn NetinfoDb,
        fingerprints: &'a dyn FingerprintDb,
        bucket_date: &'a str,
    ) -> MeasurementTransformer<'a> {
        MeasurementTransformer {
            header,
            netinfo,
            fingerprints,
            bucket_date,
        }
    }

    pub fn header(&self) -> &Header {
        self.header
    }

    pub fn bucket_date(&self) -> &str {
        self.bucket_date
    }

    /// A row carrying only the measurement header columns.
    pub fn base_web_observation(&self) -> WebObservation {
        WebObservation {
            measurement_uid: self.header.measurement_uid.clone().unwrap_or_default(),
            report_id: self.header.report_id.clone(),
            input: self.header.input.clone(),
            probe_asn: self.header.asn(),
            probe_cc: self.header.probe_cc.clone(),
            software_name: self.header.software_name.clone(),
            software_version: self.header.software_version.clone(),
            test_name: self.header.test_name.clone(),
            test_version: self.header.test_version.clone(),
            test_runtime: self.header.test_runtime,
            measurement_start_time: self.header.measurement_start_time,
            resolver_ip: self.header.resolver_ip.clone(),
            bucket_date: self.bucket_date.to_string(),
            ..Default::default()
        }
    }

    /// One observation per resolved answer, or one failure observation per
    /// failed query.
    pub fn make_dns_observations(&self, queries: &[DnsQuery]) -> Vec<WebObservation> {
        let mut observations = Vec::new();
        for query in queries {
            if query.answers.is_empty() {
                let mut obs = self.base_web_observation();
                obs.domain_name = query.hostname.clone();
                obs.dns_query_type = query.query_type.clone();
                obs.dns_engine = query.engine.clone();
                obs.dns_failure = query.failure.clone();
                obs.dns_t = query.t;
                observations.push(obs);
                continue;
            }
            for answer in &query.answers {
                let mut obs = self.base_web_observation();
                obs.domain_name = query.hostname.clone();
                obs.dns_query_type = query.query_type.clone();
                obs.dns_engine = query.engine.clone();
                obs.dns_failure = query.failure.clone();
                obs.dns_t = query.t;
                obs.dns_answer = answer.value().map(str::to_string);

                // CNAME answers are not addresses; only enrich IPs.
                if let Some(ip) = answer.ipv4.as_deref().or(answer.ipv6.as_deref()) {
                    obs.ip = Some(ip.to_string());
                    self.enrich_ip(&mut obs, ip);
                    let matches = self.fingerprints.match_dns(ip);
                    if !matches.is_empty() {
                        obs.dns_fingerprint_matches = Some(matches.join(","));
                    }
                }
                observations.push(obs);
            }
        }
        observations
    }

    /// One observation per attempted (ip, port); `ip_to_domain` names the
    /// domain whose resolution led here.
    pub fn make_tcp_observations(
        &self,
        connects: &[TcpConnect],
        ip_to_domain: &HashMap<String, String>,
    ) -> Vec<WebObservation> {
        let mut observations = Vec::new();
        for connect in connects {
            let mut obs = self.base_web_observation();
            obs.ip = connect.ip.clone();
            obs.port = connect.port;
            obs.tcp_failure = connect.status.failure.clone();
            obs.tcp_success = connect
                .status
                .success
                .or(Some(connect.status.failure.is_none()));
            obs.tcp_t = connect.t;
            if let Some(ip) = connect.ip.as_deref() {
                obs.domain_name = ip_to_domain.get(ip).cloned();
                self.enrich_ip(&mut obs, ip);
            }
            observations.push(obs);
        }
        observations
    }

    /// One observation per handshake, with read/write byte counters folded
    /// in from the network events that share the handshake's address and
    /// fall inside its time window.
    pub fn make_tls_observations(
        &self,
        handshakes: &[TlsHandshake],
        network_events: &[NetworkEvent],
        ip_to_domain: &HashMap<String, String>,
    ) -> Vec<WebObservation> {
        let mut observations = Vec::new();
        for handshake in handshakes {
            let mut obs = self.base_web_observation();
            obs.tls_server_name = handshake.server_name.clone();
            obs.tls_version = handshake.tls_version.clone();
            obs.tls_cipher_suite = handshake.cipher_suite.clone();
            obs.tls_failure = handshake.failure.clone();
            obs.tls_is_certificate_valid = certificate_validity(handshake);
            obs.tls_t = handshake.t;
            if let (Some(t0), Some(t)) = (handshake.t0, handshake.t) {
                obs.tls_handshake_time = Some(t - t0);
            }

            if let Some(ip) = handshake.target_ip() {
                obs.ip = Some(ip.to_string());
                obs.domain_name = ip_to_domain.get(ip).cloned();
                self.enrich_ip(&mut obs, ip);
            }
            if let Some(port) = handshake
                .address
                .as_deref()
                .and_then(|a| a.rsplit(':').next())
                .and_then(|p| p.parse().ok())
            {
                obs.port = Some(port);
            }

            let (bytes_in, bytes_out) = byte_counters(handshake, network_events);
            obs.tls_network_bytes_in = bytes_in;
            obs.tls_network_bytes_out = bytes_out;

            observations.push(obs);
        }
        observations
    }

    /// One observation per request/response pair, in source-list order.
    pub fn make_http_observations(&self, requests: &[HttpTransaction]) -> Vec<WebObservation> {
        let mut observations = Vec::new();
        for transaction in requests {
            let Some(request) = transaction.request.as_ref() else {
                continue;
            };
            let mut obs = self.base_web_observation();
            obs.http_request_url = request.url.clone();
            obs.http_request_method = request.method.clone();
            obs.http_failure = transaction.failure.clone();
            obs.http_t = transaction.t;
            if let (Some(t0), Some(t)) = (transaction.t0, transaction.t) {
                obs.http_runtime = Some(t - t0);
            }
            if let Some(url) = request.url.as_deref() {
                obs.domain_name = url::Url::parse(url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string));
            }

            if let Some(response) = transaction.response.as_ref() {
                obs.http_response_status_code = response.code;
                obs.http_response_body_is_truncated = response.body_is_truncated;
                if let Some(body) = response.body.as_ref() {
                    let bytes = body.bytes();
                    obs.http_response_body_length = Some(bytes.len() as i64);
                    obs.http_response_body_sha256 = Some(hex_digest(&bytes));
                }
                obs.http_response_headers_digest = Some(headers_digest(response));
                obs.http_response_header_server =
                    response.header("server").map(str::to_string);
                obs.http_response_header_location =
                    response.header("location").map(str::to_string);
                let matches = self.fingerprints.match_http(response);
                if !matches.is_empty() {
                    obs.http_fingerprint_matches = Some(matches.join(","));
                }
            }
            observations.push(obs);
        }
        observations
    }

    /// The cross-linking pass. Builds the DNS-derived `ip_to_domain` map,
    /// back-annotates TCP/TLS rows with their owning domain and DNS rows
    /// with the TLS validity of their answers, then folds the categories in
    /// DNS, TCP, TLS, HTTP order.
    pub fn consume_web_observations(
        &self,
        queries: &[DnsQuery],
        tcp_connect: &[TcpConnect],
        tls_handshakes: &[TlsHandshake],
        requests: &[HttpTransaction],
        network_events: &[NetworkEvent],
    ) -> Vec<WebObservation> {
        let mut dns_observations = self.make_dns_observations(queries);

        // Ties resolve to the most recently observed domain.
        let mut ip_to_domain: HashMap<String, String> = HashMap::new();
        for obs in &dns_observations {
            if let (Some(answer), Some(domain)) = (obs.dns_answer.as_ref(), obs.domain_name.as_ref())
            {
                ip_to_domain.insert(answer.clone(), domain.clone());
            }
        }

        let tcp_observations = self.make_tcp_observations(tcp_connect, &ip_to_domain);
        let tls_observations =
            self.make_tls_observations(tls_handshakes, network_events, &ip_to_domain);

        // An IP's TLS validity flows back into the DNS observation that
        // produced it. Handshakes without an address key on server name.
        let mut tls_validity: HashMap<String, bool> = HashMap::new();
        for obs in &tls_observations {
            if let Some(valid) = obs.tls_is_certificate_valid {
                if let Some(key) = obs.ip.as_ref().or(obs.tls_server_name.as_ref()) {
                    tls_validity.insert(key.clone(), valid);
                }
            }
        }
        for obs in &mut dns_observations {
            obs.is_tls_consistent = obs
                .dns_answer
                .as_ref()
                .and_then(|answer| tls_validity.get(answer))
                .copied();
        }

        let http_observations = self.make_http_observations(requests);

        let mut observations = dns_observations;
        observations.extend(tcp_observations);
        observations.extend(tls_observations);
        observations.extend(http_observations);
        observations
    }

    fn enrich_ip(&self, obs: &mut WebObservation, ip: &str) {
        if let Some(info) = self.netinfo.lookup(ip, self.header.measurement_start_time) {
            obs.ip_asn = info.asn;
            obs.ip_as_org_name = info.as_org_name;
            obs.ip_cc = info.cc;
        }
    }
}

/// Certificate validity signal of a handshake. Disabled verification gives
/// no signal, and non-TLS failures (timeouts, resets) stay indeterminate.
fn certificate_validity(handshake: &TlsHandshake) -> Option<bool> {
    if handshake.no_tls_verify == Some(true) {
        return None;
    }
    match handshake.failure.as_deref() {
        None => Some(true),
        Some(failure) if failure.starts_with("ssl_") => Some(false),
        Some(_) => None,
    }
}

/// Sums read/write bytes of the events sharing the handshake's address
/// within its `[t0, t]` window.
fn byte_counters(
    handshake: &TlsHandshake,
    network_events: &[NetworkEvent],
) -> (Option<i64>, Option<i64>) {
    let Some(address) = handshake.address.as_deref() else {
        return (None, None);
    };
    let end = handshake.t.unwrap_or(f64::MAX);
    let start = handshake.t0.unwrap_or(0.0);

    let mut bytes_in = None;
    let mut bytes_out = None;
    for event in network_events {
        if event.address.as_deref() != Some(address) {
            continue;
        }
        let t = event.t.unwrap_or(0.0);
        if t < start || t > end {
            continue;
        }
        let count = event.num_bytes.unwrap_or(0);
        match event.operation.as_deref() {
            Some("read") => *bytes_in.get_or_insert(0) += count,
            Some("write") => *bytes_out.get_or_insert(0) += count,
            _ => {}
        }
    }
    (bytes_in, bytes_out)
}

fn hex_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Digest over the response headers in wire order, `name: value` per line.
fn headers_digest(response: &models::HttpResponse) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in &response.headers_list {
        hasher.update(name.as_bytes());
        hasher.update(b": ");
        hasher.update(&value.bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
