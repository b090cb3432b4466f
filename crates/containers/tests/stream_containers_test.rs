//! End-to-end reads of synthetic containers built in the shapes the archive
//! actually uses.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use containers::{stream_container, ContainerCounters, RawMeasurement};
use tempdir::TempDir;

fn measurement_json(cc: &str, test_name: &str, n: usize) -> String {
    format!(
        r#"{{"report_id": "report-{n}", "probe_cc": "{cc}", "test_name": "{test_name}", "test_keys": {{}}}}"#
    )
}

fn write_minican(dir: &Path, measurements: usize) -> PathBuf {
    let path = dir.join("2023103115_VE_whatsapp.n1.0.tar.gz");
    let gz = flate2::write::GzEncoder::new(
        File::create(&path).unwrap(),
        flate2::Compression::default(),
    );
    let mut builder = tar::Builder::new(gz);
    for n in 0..measurements {
        let envelope = format!(
            r#"{{"format": "json", "content": {}}}"#,
            measurement_json("VE", "whatsapp", n)
        );
        append_member(
            &mut builder,
            &format!("var/lib/2023103115_VE_whatsapp/msmt-{n}.post"),
            envelope.as_bytes(),
        );
    }
    // One yaml envelope and one junk member, both skipped by policy.
    append_member(
        &mut builder,
        "var/lib/2023103115_VE_whatsapp/legacy.post",
        br#"{"format": "yaml", "content": "---"}"#,
    );
    append_member(&mut builder, "var/lib/README", b"not a post");
    builder.into_inner().unwrap().finish().unwrap();
    path
}

fn append_member<W: Write>(builder: &mut tar::Builder<W>, name: &str, content: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, content).unwrap();
}

#[test]
fn minican_yields_filename_uids() {
    let dir = TempDir::new("containers-test").unwrap();
    let counters = Arc::new(ContainerCounters::default());
    let path = write_minican(dir.path(), 5);

    let records: Vec<RawMeasurement> = stream_container(&path, &counters)
        .unwrap()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(records.len(), 5);
    for (n, record) in records.iter().enumerate() {
        assert_eq!(record.uid, format!("msmt-{n}"));
        assert_eq!(record.record["probe_cc"], "VE");
        assert_eq!(record.record["test_name"], "whatsapp");
    }
    assert_eq!(counters.yaml_envelopes_skipped.load(Ordering::Relaxed), 1);
    assert_eq!(counters.invalid_post_envelopes.load(Ordering::Relaxed), 1);
}

#[test]
fn jsonl_gz_streams_lines() {
    let dir = TempDir::new("containers-test").unwrap();
    let path = dir.path().join("20231031_VE_whatsapp.jsonl.gz");
    let mut gz = flate2::write::GzEncoder::new(
        File::create(&path).unwrap(),
        flate2::Compression::default(),
    );
    for n in 0..3 {
        writeln!(gz, "{}", measurement_json("VE", "whatsapp", n)).unwrap();
    }
    gz.finish().unwrap();

    let counters = Arc::new(ContainerCounters::default());
    let records: Vec<RawMeasurement> = stream_container(&path, &counters)
        .unwrap()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(records.len(), 3);
    // Hash-derived UIDs: 32 hex characters, distinct per record.
    for record in &records {
        assert_eq!(record.uid.len(), 32);
    }
    assert_ne!(records[0].uid, records[1].uid);
}

#[test]
fn json_lz4_uids_stay_hash_derived() {
    let dir = TempDir::new("containers-test").unwrap();
    let path = dir
        .path()
        .join("2020-01-01-web_connectivity-0.2.0-probe.json.lz4");
    let mut encoder = lz4_flex::frame::FrameEncoder::new(File::create(&path).unwrap());
    writeln!(encoder, "{}", measurement_json("IT", "web_connectivity", 0)).unwrap();
    encoder.finish().unwrap();

    let counters = Arc::new(ContainerCounters::default());
    let first: Vec<RawMeasurement> = stream_container(&path, &counters)
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    let second: Vec<RawMeasurement> = stream_container(&path, &counters)
        .unwrap()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(first.len(), 1);
    assert_eq!(first[0].uid, second[0].uid);
    assert_eq!(first[0].uid.len(), 32);
}

#[test]
fn legacy_can_mixes_json_and_yaml_members() {
    let dir = TempDir::new("containers-test").unwrap();
    let day_dir = dir.path().join("2016-07-15");
    std::fs::create_dir_all(&day_dir).unwrap();
    let path = day_dir.join("http_requests.0.tar.lz4");

    let lz4 = lz4_flex::frame::FrameEncoder::new(File::create(&path).unwrap());
    let mut builder = tar::Builder::new(lz4);

    let mut json_member = String::new();
    for n in 0..2 {
        json_member.push_str(&measurement_json("IR", "http_requests", n));
        json_member.push('\n');
    }
    append_member(&mut builder, "report.json", json_member.as_bytes());

    let yaml_member = "---\n\
        test_name: http_requests\n\
        probe_cc: IR\n\
        probe_asn: AS12880\n\
        start_time: 1468540838.0\n\
        ---\n\
        input: http://example.com/\n\
        requests: []\n\
        ...\n";
    append_member(&mut builder, "report.yaml", yaml_member.as_bytes());
    builder.into_inner().unwrap().finish().unwrap();

    let counters = Arc::new(ContainerCounters::default());
    let records: Vec<RawMeasurement> = stream_container(&path, &counters)
        .unwrap()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(records.len(), 3);
    assert_eq!(records[2].record["test_name"], "http_requests");
    assert_eq!(records[2].record["input"], "http://example.com/");
    assert_eq!(counters.yaml_normalized.load(Ordering::Relaxed), 1);
}
