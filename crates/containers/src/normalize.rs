//! Legacy-YAML report normalization.
//!
//! The oldest reports in the archive are multi-document YAML streams: a
//! report header document followed by one document per measurement entry.
//! Each entry is merged with the header and rewritten into the modern JSON
//! record shape so that downstream loading does not care where a record came
//! from.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Lines, Read};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::reader::{ContainerCounters, ContainerError, RawMeasurement};
use crate::uid::trivial_id;

/// Entry keys that belong to the record envelope rather than `test_keys`.
const ENVELOPE_KEYS: &[&str] = &[
    "input",
    "start_time",
    "test_name",
    "test_version",
    "probe_cc",
    "probe_asn",
    "probe_ip",
    "software_name",
    "software_version",
    "report_id",
    "record_type",
    "options",
];

/// Normalizes a legacy YAML stream into modern-shaped JSON records.
/// `bucket_tstamp` is the archive day the report was filed under and seeds
/// derived report IDs; `report_filename` identifies the source report.
pub(crate) fn normalized_records<R: Read>(
    reader: R,
    bucket_tstamp: String,
    report_filename: String,
    counters: Arc<ContainerCounters>,
) -> NormalizedYaml<R> {
    NormalizedYaml {
        documents: YamlDocuments {
            lines: BufReader::new(reader).lines(),
            done: false,
        },
        header: None,
        bucket_tstamp,
        report_filename,
        counters,
    }
}

pub(crate) struct NormalizedYaml<R: Read> {
    documents: YamlDocuments<R>,
    header: Option<BTreeMap<String, serde_json::Value>>,
    bucket_tstamp: String,
    report_filename: String,
    counters: Arc<ContainerCounters>,
}

impl<R: Read> Iterator for NormalizedYaml<R> {
    type Item = Result<RawMeasurement, ContainerError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let document = match self.documents.next()? {
                Ok(document) => document,
                Err(err) => return Some(Err(ContainerError::Io(err))),
            };
            let parsed: serde_yaml::Value = match serde_yaml::from_str(&document) {
                Ok(parsed) => parsed,
                Err(err) => {
                    tracing::warn!(
                        report = %self.report_filename,
                        error = %err,
                        "skipping unparseable yaml document"
                    );
                    return Some(Err(ContainerError::YamlParse(err)));
                }
            };
            let json = yaml_to_json(parsed);
            let serde_json::Value::Object(fields) = json else {
                tracing::debug!(report = %self.report_filename, "ignoring non-mapping document");
                continue;
            };
            let fields: BTreeMap<String, serde_json::Value> = fields.into_iter().collect();

            // The first mapping document of a report is its header.
            let Some(header) = self.header.as_ref() else {
                self.header = Some(fields);
                continue;
            };

            let record = normalize_entry(
                header,
                fields,
                &self.bucket_tstamp,
                &self.report_filename,
            );
            self.counters.yaml_normalized.fetch_add(1, Ordering::Relaxed);
            let uid = trivial_id(&record);
            return Some(Ok(RawMeasurement { record, uid }));
        }
    }
}

/// Splits a stream on `---` document markers. Yields non-empty documents.
struct YamlDocuments<R: Read> {
    lines: Lines<BufReader<R>>,
    done: bool,
}

impl<R: Read> Iterator for YamlDocuments<R> {
    type Item = Result<String, std::io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut document = String::new();
        loop {
            match self.lines.next() {
                Some(Ok(line)) => {
                    if line.trim_end() == "---" {
                        if !document.trim().is_empty() {
                            return Some(Ok(document));
                        }
                        document.clear();
                    } else if line.trim_end() == "..." {
                        self.done = true;
                        if !document.trim().is_empty() {
                            return Some(Ok(document));
                        }
                        return None;
                    } else {
                        document.push_str(&line);
                        document.push('\n');
                    }
                }
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                None => {
                    self.done = true;
                    if !document.trim().is_empty() {
                        return Some(Ok(document));
                    }
                    return None;
                }
            }
        }
    }
}

/// Merges a measurement entry with its report header into the modern record
/// shape: envelope fields at the top level, everything else under
/// `test_keys`.
fn normalize_entry(
    header: &BTreeMap<String, serde_json::Value>,
    mut entry: BTreeMap<String, serde_json::Value>,
    bucket_tstamp: &str,
    report_filename: &str,
) -> serde_json::Value {
    let mut record = serde_json::Map::new();

    let lookup = |key: &str, entry: &BTreeMap<String, serde_json::Value>| {
        entry.get(key).or_else(|| header.get(key)).cloned()
    };

    for key in ["test_name", "test_version", "probe_cc", "probe_asn", "probe_ip"] {
        if let Some(value) = lookup(key, &entry) {
            record.insert(key.to_string(), value);
        }
    }
    record.insert(
        "software_name".to_string(),
        lookup("software_name", &entry).unwrap_or_else(|| "ooniprobe-legacy".into()),
    );
    if let Some(value) = lookup("software_version", &entry) {
        record.insert("software_version".to_string(), value);
    }
    if let Some(value) = entry.get("input").cloned() {
        record.insert("input".to_string(), value);
    }
    record.insert(
        "report_id".to_string(),
        lookup("report_id", &entry)
            .filter(|v| v.as_str().map_or(true, |s| !s.is_empty()))
            .unwrap_or_else(|| format!("{bucket_tstamp}_{report_filename}").into()),
    );
    if let Some(start) = lookup("start_time", &entry).and_then(|v| v.as_f64()) {
        if let Some(ts) = chrono::DateTime::from_timestamp(start as i64, 0) {
            record.insert(
                "measurement_start_time".to_string(),
                ts.naive_utc()
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
                    .into(),
            );
        }
    }

    // Anything that is not envelope metadata is the test's own payload. An
    // explicit test_keys mapping (later report generations) wins.
    let mut test_keys = serde_json::Map::new();
    if let Some(serde_json::Value::Object(explicit)) = entry.remove("test_keys") {
        test_keys.extend(explicit);
    }
    for (key, value) in entry {
        if !ENVELOPE_KEYS.contains(&key.as_str()) {
            test_keys.insert(key, value);
        }
    }
    record.insert("test_keys".to_string(), serde_json::Value::Object(test_keys));

    serde_json::Value::Object(record)
}

fn yaml_to_json(value: serde_yaml::Value) -> serde_json::Value {
    match value {
        serde_yaml::Value::Null => serde_json::Value::Null,
        serde_yaml::Value::Bool(b) => serde_json::Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                serde_json::Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null)
            }
        }
        serde_yaml::Value::String(s) => serde_json::Value::String(s),
        serde_yaml::Value::Sequence(seq) => {
            serde_json::Value::Array(seq.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| (yaml_key(k), yaml_to_json(v)))
                .collect(),
        ),
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}
