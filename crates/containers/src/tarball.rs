//! Streaming tar containers: legacy `.tar.lz4` cans and `.tar.gz` minicans.
//!
//! Tar members can only be visited through a cursor borrowing the archive,
//! which rules out handing the caller an iterator over entries directly. A
//! reader thread walks the archive instead and forwards records through a
//! bounded channel, so the public surface stays a plain iterator and resident
//! memory stays proportional to one record.

use std::io::Read;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;

use crate::compression;
use crate::normalize;
use crate::reader::{ContainerCounters, ContainerError, RawMeasurement, Records};

const CHANNEL_DEPTH: usize = 64;

type Tx = SyncSender<Result<RawMeasurement, ContainerError>>;

/// Streams a legacy can: LZ4-framed tar whose members are either
/// line-delimited JSON reports or legacy YAML reports.
pub(crate) fn stream_legacy_can(
    path: &Path,
    bucket_tstamp: String,
    report_filename: String,
    counters: Arc<ContainerCounters>,
) -> Result<Records, ContainerError> {
    let reader = compression::open_lz4(path)?;
    Ok(spawn_reader(move |tx| {
        read_legacy_can(reader, &bucket_tstamp, &report_filename, &counters, tx)
    }))
}

/// Streams a minican: gzip tar of single-measurement `.post` envelopes.
pub(crate) fn stream_minican(
    path: &Path,
    counters: Arc<ContainerCounters>,
) -> Result<Records, ContainerError> {
    let reader = compression::open_gzip(path)?;
    Ok(spawn_reader(move |tx| read_minican(reader, &counters, tx)))
}

fn spawn_reader<F>(read: F) -> Records
where
    F: FnOnce(&Tx) -> Result<(), ContainerError> + Send + 'static,
{
    let (tx, rx) = std::sync::mpsc::sync_channel(CHANNEL_DEPTH);
    std::thread::spawn(move || {
        if let Err(err) = read(&tx) {
            // Receiver may already be gone; nothing left to report to then.
            let _ = tx.send(Err(err));
        }
    });
    Box::new(rx.into_iter())
}

/// Forwards `item`, returning false when the consumer hung up and iteration
/// should stop.
fn forward(tx: &Tx, item: Result<RawMeasurement, ContainerError>) -> bool {
    tx.send(item).is_ok()
}

fn read_legacy_can(
    reader: Box<dyn Read + Send>,
    bucket_tstamp: &str,
    report_filename: &str,
    counters: &Arc<ContainerCounters>,
    tx: &Tx,
) -> Result<(), ContainerError> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let entry = entry?;
        let member = entry.path()?.to_string_lossy().into_owned();
        tracing::debug!(member = %member, "loading nested tar member");

        if member.ends_with(".json") {
            for item in crate::reader::json_line_iter(entry) {
                if !forward(tx, item) {
                    return Ok(());
                }
            }
        } else if member.ends_with(".yaml") {
            let records = normalize::normalized_records(
                entry,
                bucket_tstamp.to_string(),
                report_filename.to_string(),
                counters.clone(),
            );
            for item in records {
                if !forward(tx, item) {
                    return Ok(());
                }
            }
        } else {
            tracing::debug!(member = %member, "ignoring tar member");
        }
    }
    Ok(())
}

fn read_minican(
    reader: Box<dyn Read + Send>,
    counters: &Arc<ContainerCounters>,
    tx: &Tx,
) -> Result<(), ContainerError> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let member = entry.path()?.to_string_lossy().into_owned();

        if !member.ends_with(".post") {
            tracing::error!(member = %member, "unexpected member filename in minican");
            counters.invalid_post_envelopes.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        // A .post envelope holds exactly one measurement; buffering it keeps
        // memory at one-record scale.
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        let envelope: serde_json::Value = match serde_json::from_slice(&buf) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(member = %member, error = %err, "skipping unparseable envelope");
                if !forward(tx, Err(ContainerError::RecordParse(err))) {
                    return Ok(());
                }
                continue;
            }
        };

        match envelope.get("format").and_then(serde_json::Value::as_str) {
            Some("json") => {
                let record = envelope
                    .get("content")
                    .cloned()
                    .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
                let uid = member
                    .rsplit('/')
                    .next()
                    .unwrap_or(&member)
                    .trim_end_matches(".post")
                    .to_string();
                if !forward(tx, Ok(RawMeasurement { record, uid })) {
                    return Ok(());
                }
            }
            Some("yaml") => {
                tracing::info!(member = %member, "skipping yaml envelope");
                counters
                    .yaml_envelopes_skipped
                    .fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                tracing::info!(member = %member, "ignoring invalid post envelope");
                counters.invalid_post_envelopes.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    Ok(())
}
