//! Scenario coverage over whole measurements, loaded from raw JSON the way
//! the pipeline sees them.

use models::{load_measurement, Measurement};
use serde_json::json;
use transform::{measurement_to_observations, NoFingerprints, NoNetinfo, ObservationBatch};

fn observations_for(record: serde_json::Value, uid: &str, bucket_date: &str) -> ObservationBatch {
    let msmt = load_measurement(&record, uid).expect("fixture must decode");
    measurement_to_observations(&msmt, &NoNetinfo, &NoFingerprints, bucket_date)
}

#[test]
fn hirl_tampering_measurement_yields_one_middlebox_row() {
    let record = json!({
        "test_name": "http_invalid_request_line",
        "report_id": "20230907T000740Z_httpinvalidrequestline_BR_1234_n1_x",
        "probe_cc": "BR",
        "probe_asn": "AS28573",
        "software_name": "ooniprobe-android",
        "software_version": "3.8.0",
        "test_version": "0.2.0",
        "measurement_start_time": "2023-09-07 00:07:40",
        "test_keys": {
            "failure": null,
            "tampering": true,
            "sent": ["request line 1", "request line 2"],
            "received": ["mangled line 1", "request line 2"],
        },
    });
    let batch = observations_for(
        record,
        "20230907000740.785053_BR_httpinvalidrequestline_bdfe6d70dcbda5e9",
        "2023-09-07",
    );

    assert!(batch.web.is_empty());
    assert_eq!(batch.http_middlebox.len(), 1);
    let obs = &batch.http_middlebox[0];
    assert_eq!(obs.hirl_success, Some(true));
    assert_ne!(obs.hirl_sent_0, obs.hirl_received_0);
    assert_eq!(obs.hirl_sent_1, obs.hirl_received_1);
    assert_eq!(obs.hirl_tampering, Some(true));
    assert_eq!(
        obs.measurement_uid,
        "20230907000740.785053_BR_httpinvalidrequestline_bdfe6d70dcbda5e9"
    );
}

#[test]
fn dnscheck_fans_out_across_lookups() {
    // Bootstrap resolves 2 addresses; each of the 3 lookups carries 4
    // answers plus one TCP and one TLS sub-event: 2 + 3 * 6 = 20 rows.
    let answers = |a: &str, b: &str, c: &str, d: &str| {
        json!([
            {"answer_type": "A", "ipv4": a},
            {"answer_type": "A", "ipv4": b},
            {"answer_type": "A", "ipv4": c},
            {"answer_type": "A", "ipv4": d},
        ])
    };
    let lookup = |host: &str, answers: serde_json::Value, ip: &str| {
        json!({
            "queries": [
                {"hostname": host, "query_type": "A", "answers": answers},
            ],
            "tcp_connect": [
                {"ip": ip, "port": 443, "status": {"success": true, "failure": null}},
            ],
            "tls_handshakes": [
                {"address": format!("{ip}:443"), "server_name": host, "failure": null},
            ],
        })
    };
    let record = json!({
        "test_name": "dnscheck",
        "report_id": "20221013T000000Z_dnscheck_US_1234_n1_x",
        "probe_cc": "US",
        "probe_asn": "AS7922",
        "measurement_start_time": "2022-10-13 00:00:00",
        "test_keys": {
            "bootstrap": {
                "queries": [{
                    "hostname": "dns.google",
                    "query_type": "A",
                    "answers": [
                        {"answer_type": "A", "ipv4": "8.8.8.8"},
                        {"answer_type": "A", "ipv4": "8.8.4.4"},
                    ],
                }],
            },
            "lookups": {
                "dot": lookup("dns.google", answers("8.8.8.8", "8.8.4.4", "2.2.2.2", "3.3.3.3"), "8.8.8.8"),
                "doh": lookup("dns.google", answers("8.8.8.8", "8.8.4.4", "4.4.4.4", "5.5.5.5"), "8.8.4.4"),
                "udp": lookup("dns.google", answers("8.8.8.8", "8.8.4.4", "6.6.6.6", "7.7.7.7"), "8.8.8.8"),
            },
        },
    });
    let batch = observations_for(
        record,
        "20221013000000.517636_US_dnscheck_bfd6d991e70afa0e",
        "2022-10-13",
    );
    assert_eq!(batch.web.len(), 20);
    for obs in &batch.web {
        assert_eq!(obs.probe_cc, "US");
        assert_eq!(obs.bucket_date, "2022-10-13");
    }
}

#[test]
fn web_connectivity_produces_matching_control_rows() {
    let record = json!({
        "test_name": "web_connectivity",
        "report_id": "20220627T131742Z_webconnectivity_GB_1234_n1_x",
        "input": "https://ooni.org/",
        "probe_cc": "GB",
        "probe_asn": "AS5089",
        "measurement_start_time": "2022-06-27 13:17:42",
        "test_keys": {
            "queries": [{
                "hostname": "ooni.org",
                "query_type": "A",
                "answers": [{"answer_type": "A", "ipv4": "104.198.14.52"}],
            }],
            "tcp_connect": [
                {"ip": "104.198.14.52", "port": 443, "status": {"success": true, "failure": null}},
            ],
            "requests": [{
                "failure": null,
                "request": {"url": "https://ooni.org/", "method": "GET"},
                "response": {"code": 200, "body": "<html>Run OONI Probe</html>"},
            }],
            "control": {
                "dns": {"failure": null, "addrs": ["104.198.14.52"]},
                "tcp_connect": {
                    "104.198.14.52:443": {"status": true, "failure": null},
                },
                "http_request": {"status_code": 200, "failure": null, "body_length": 27},
            },
        },
    });
    let batch = observations_for(
        record,
        "20220627131742.081225_GB_webconnectivity_e1e2cf4db492b748",
        "2022-06-27",
    );

    assert_eq!(batch.web.len(), 3);
    assert_eq!(batch.web_ctrl.len(), 3);
    for obs in &batch.web_ctrl {
        assert_eq!(obs.hostname.as_deref(), Some("ooni.org"));
    }
    let http_ctrl = batch
        .web_ctrl
        .iter()
        .find(|o| o.http_success.is_some())
        .unwrap();
    assert_eq!(http_ctrl.http_response_status_code, Some(200));
    assert_eq!(http_ctrl.http_response_body_length, Some(27));
}

#[test]
fn blocked_web_connectivity_keeps_request_chain_order() {
    // Transaction lists are most-recent-first; the original request over the
    // proxy domain is listed last and must come out last.
    let record = json!({
        "test_name": "web_connectivity",
        "report_id": "20220608T121828Z_webconnectivity_RU_1234_n1_x",
        "input": "http://proxy.org/",
        "probe_cc": "RU",
        "probe_asn": "AS8402",
        "measurement_start_time": "2022-06-08 12:18:28",
        "test_keys": {
            "requests": [
                {
                    "failure": null,
                    "request": {"url": "https://proxy.org/", "method": "GET"},
                    "response": {"code": 200, "body": "ok"},
                },
                {
                    "failure": null,
                    "request": {"url": "http://proxy.org/", "method": "GET"},
                    "response": {
                        "code": 301,
                        "headers_list": [["Location", "https://proxy.org/"]],
                    },
                },
            ],
        },
    });
    let batch = observations_for(
        record,
        "20220608121828.356206_RU_webconnectivity_80e3fa60eb2cd026",
        "2022-06-08",
    );

    let last = batch.web.last().unwrap();
    assert_eq!(last.http_request_url.as_deref(), Some("http://proxy.org/"));
    assert_eq!(
        last.http_response_header_location.as_deref(),
        Some("https://proxy.org/")
    );
}

#[test]
fn whatsapp_rows_inherit_header_fields() {
    let record = json!({
        "test_name": "whatsapp",
        "report_id": "20231031T150101Z_whatsapp_VE_1234_n1_x",
        "probe_cc": "VE",
        "probe_asn": "AS8048",
        "measurement_start_time": "2023-10-31 15:01:01",
        "test_keys": {
            "queries": [{
                "hostname": "e1.whatsapp.net",
                "query_type": "A",
                "answers": [{"answer_type": "A", "ipv4": "157.240.21.53"}],
            }],
            "tcp_connect": [
                {"ip": "157.240.21.53", "port": 5222, "status": {"success": true, "failure": null}},
            ],
            "registration_server_status": "ok",
            "whatsapp_web_status": "ok",
        },
    });
    let batch = observations_for(record, "whatsapp-uid", "2023-10-31");
    assert!(batch.web.len() >= 2);
    for obs in &batch.web {
        assert_eq!(obs.probe_cc, "VE");
        assert_eq!(obs.test_name, "whatsapp");
        assert_eq!(obs.measurement_uid, "whatsapp-uid");
    }
}

#[test]
fn hhfm_report_serializes_into_diff() {
    let record = json!({
        "test_name": "http_header_field_manipulation",
        "report_id": "20231101T164544Z_httpheaderfieldmanipulation_BR_1234_n1_x",
        "probe_cc": "BR",
        "probe_asn": "AS28573",
        "test_keys": {
            "failure": null,
            "tampering": {
                "header_field_name": false,
                "header_name_diff": ["aCcePt"],
                "total": true,
            },
        },
    });
    let batch = observations_for(record, "hhfm-uid", "2023-10-31");
    assert_eq!(batch.http_middlebox.len(), 1);
    let obs = &batch.http_middlebox[0];
    assert_eq!(obs.hfm_success, Some(true));
    let diff = obs.hfm_diff.as_deref().unwrap();
    assert!(diff.contains("aCcePt"));
}

#[test]
fn tor_targets_fold_in_stable_order() {
    let target = |addr: &str| {
        json!({
            "target_address": addr,
            "tcp_connect": [
                {"ip": addr.split(':').next().unwrap(), "port": 9001,
                 "status": {"success": false, "failure": "connection_reset"}},
            ],
        })
    };
    let record = json!({
        "test_name": "tor",
        "report_id": "20231101T164649Z_tor_RU_1234_n1_x",
        "probe_cc": "RU",
        "probe_asn": "AS8402",
        "test_keys": {
            "targets": {
                "bridge-b": target("10.0.0.2:9001"),
                "bridge-a": target("10.0.0.1:9001"),
            },
        },
    });
    let batch = observations_for(record.clone(), "tor-uid", "2023-10-31");
    assert_eq!(batch.web.len(), 2);
    // BTreeMap ordering: bridge-a before bridge-b, on every run.
    assert_eq!(batch.web[0].ip.as_deref(), Some("10.0.0.1"));
    let again = observations_for(record, "tor-uid", "2023-10-31");
    assert_eq!(batch, again);
}

#[test]
fn unknown_tests_yield_empty_batches() {
    let record = json!({
        "test_name": "riseupvpn",
        "report_id": "x",
        "probe_cc": "IT",
        "probe_asn": "AS1",
        "test_keys": {"api_status": "ok"},
    });
    let msmt = load_measurement(&record, "uid").unwrap();
    assert!(matches!(msmt, Measurement::Base(_)));
    let batch = measurement_to_observations(&msmt, &NoNetinfo, &NoFingerprints, "2023-10-31");
    assert!(batch.is_empty());
}
