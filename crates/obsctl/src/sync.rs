//! The `sync` subcommand: discover, download, stream, transform, write.
//!
//! Days are processed in order; files within a day fan out to a bounded
//! worker pool. Each file is consumed by a single cursor inside a blocking
//! task, and all workers feed one writer task through a bounded channel, so
//! the database sees a single caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use futures::{StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use archive_client::{ArchiveClient, FetchError, FileEntry, Filter};
use containers::ContainerCounters;
use models::{HttpMiddleboxObservation, Scalar, WebControlObservation, WebObservation};
use transform::{measurement_to_observations, NoFingerprints, NoNetinfo};

use crate::db::{CsvDb, Db, NullDb};

/// Download/process fan-out cap. Listing fan-out is bounded separately
/// inside the catalog because it is latency-bound, not CPU-bound.
const MAX_WORKERS: usize = 24;

const WRITE_QUEUE_DEPTH: usize = 4096;

/// The user interrupted the run; surfaces as exit code 130.
#[derive(Debug, thiserror::Error)]
#[error("interrupted")]
pub struct Interrupted;

#[derive(Debug, clap::Args)]
pub struct SyncArgs {
    /// First day of the range, inclusive (YYYY-MM-DD).
    #[arg(long = "start-day")]
    pub start_day: NaiveDate,

    /// End of the range, exclusive (YYYY-MM-DD).
    #[arg(long = "end-day")]
    pub end_day: NaiveDate,

    /// Country filter, repeatable. No filter means all countries.
    #[arg(long = "country")]
    pub countries: Vec<String>,

    /// Test-name filter, repeatable. No filter means all tests.
    #[arg(long = "test-name")]
    pub test_names: Vec<String>,

    /// Directory holding the local container cache. Must be writable.
    #[arg(long = "cache-dir")]
    pub cache_dir: PathBuf,

    /// Directory receiving one CSV per observation table.
    #[arg(long = "output-dir", required_unless_present = "dry_run")]
    pub output_dir: Option<PathBuf>,

    /// Keep downloaded containers after processing.
    #[arg(long = "keep-cache")]
    pub keep_cache: bool,

    /// Transform without writing any rows.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Concurrent downloads; defaults to min(24, CPU count).
    #[arg(long = "parallelism")]
    pub parallelism: Option<usize>,
}

/// Non-fatal events, tallied across the run and reported at the end.
#[derive(Debug, Default)]
pub struct Counters {
    pub files_processed: AtomicU64,
    pub files_failed: AtomicU64,
    pub measurements: AtomicU64,
    pub observation_rows: AtomicU64,
    pub records_skipped: AtomicU64,
    pub measurements_failed: AtomicU64,
    pub unknown_test_names: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub bytes_processed: AtomicU64,
}

struct RowMessage {
    table: &'static str,
    row: Vec<(&'static str, Scalar)>,
}

#[derive(Debug, thiserror::Error)]
enum ProcessError {
    #[error(transparent)]
    Container(#[from] containers::ContainerError),

    /// The writer task is gone, which only happens after a database write
    /// failure; that is fatal for the whole run.
    #[error("database writer terminated")]
    WriterGone,
}

pub async fn run(args: SyncArgs) -> anyhow::Result<()> {
    let filter = Filter::new(
        args.countries.clone(),
        args.test_names.clone(),
        args.start_day,
        args.end_day,
    );
    let client = ArchiveClient::new_anonymous().await;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, unwinding");
                cancel.cancel();
            }
        });
    }

    tracing::info!(start = %args.start_day, end = %args.end_day, "listing archive objects");
    let entries: Vec<FileEntry> = client.list_for_range(&filter).try_collect().await?;

    let mut by_day: BTreeMap<NaiveDate, Vec<FileEntry>> = BTreeMap::new();
    for entry in entries {
        by_day.entry(entry.day).or_default().push(entry);
    }
    let total_days = by_day.len();
    let total_files: usize = by_day.values().map(Vec::len).sum();
    let total_bytes: u64 = by_day.values().flatten().map(|e| e.size).sum();
    tracing::info!(
        days = total_days,
        files = total_files,
        total_bytes,
        "discovered archive objects"
    );

    let db: Box<dyn Db> = match (&args.output_dir, args.dry_run) {
        (Some(dir), false) => Box::new(CsvDb::new(dir.clone())),
        _ => Box::new(NullDb::default()),
    };
    let (tx, mut rx) = mpsc::channel::<RowMessage>(WRITE_QUEUE_DEPTH);
    let writer = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut db = db;
        while let Some(message) = rx.blocking_recv() {
            db.write_row(message.table, &message.row)?;
        }
        db.flush()
    });

    let counters = Arc::new(Counters::default());
    let container_counters = Arc::new(ContainerCounters::default());
    let workers = args
        .parallelism
        .unwrap_or_else(default_parallelism)
        .clamp(1, MAX_WORKERS);

    let started = Instant::now();
    let mut days_done = 0usize;
    let mut run_error: Option<anyhow::Error> = None;

    'days: for (day, day_entries) in &by_day {
        tracing::info!(day = %day, files = day_entries.len(), "processing day");
        let day_total = day_entries.len();
        let mut day_done = 0usize;

        let mut files = futures::stream::iter(day_entries.iter().cloned())
            .map(|entry| {
                let client = client.clone();
                let tx = tx.clone();
                let counters = counters.clone();
                let container_counters = container_counters.clone();
                let cancel = cancel.clone();
                let cache_dir = args.cache_dir.clone();
                let keep_cache = args.keep_cache;
                async move {
                    tokio::select! {
                        _ = cancel.cancelled() => Err(anyhow::Error::new(Interrupted)),
                        result = process_entry(
                            &client,
                            entry,
                            &cache_dir,
                            keep_cache,
                            tx,
                            counters,
                            container_counters,
                        ) => result,
                    }
                }
            })
            .buffer_unordered(workers);

        while let Some(result) = files.next().await {
            if let Err(err) = result {
                run_error = Some(err);
                break 'days;
            }
            day_done += 1;
            log_progress(
                started, &counters, total_bytes, total_days, days_done, day_done, day_total,
            );
        }
        days_done += 1;
    }

    drop(tx);
    let writer_result = writer.await?;
    match (&run_error, writer_result) {
        (None, result) => result?,
        (Some(_), Err(err)) => tracing::error!(error = ?err, "database writer failed"),
        (Some(_), Ok(())) => {}
    }

    summarize(&counters, &container_counters);

    match run_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Fetches one entry and streams it through transformation. Per-file
/// failures are counted and absorbed; the returned error is reserved for
/// conditions that must stop the run.
async fn process_entry(
    client: &ArchiveClient,
    entry: FileEntry,
    cache_dir: &Path,
    keep_cache: bool,
    tx: mpsc::Sender<RowMessage>,
    counters: Arc<Counters>,
    container_counters: Arc<ContainerCounters>,
) -> anyhow::Result<()> {
    let fetched = match client.fetch(&entry, cache_dir, |_| {}).await {
        Ok(fetched) => fetched,
        // A post-rename size mismatch means the cache can no longer be
        // trusted; storage errors have already exhausted their retries.
        Err(err @ (FetchError::SizeMismatch { .. } | FetchError::Storage(_))) => {
            return Err(err.into());
        }
        Err(err) => {
            tracing::error!(object = %entry.object_path, error = %err, "download failed, skipping file");
            counters.files_failed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
    };
    if fetched.cache_hit {
        counters.cache_hits.fetch_add(1, Ordering::Relaxed);
    } else {
        counters.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    let path = fetched.path.clone();
    let result = {
        let entry = entry.clone();
        let counters = counters.clone();
        let tx = tx.clone();
        tokio::task::spawn_blocking(move || {
            process_file(&entry, &path, &tx, &counters, &container_counters)
        })
        .await?
    };
    match result {
        Ok(()) => {
            counters.files_processed.fetch_add(1, Ordering::Relaxed);
        }
        Err(ProcessError::WriterGone) => return Err(ProcessError::WriterGone.into()),
        Err(err) => {
            tracing::error!(object = %entry.object_path, error = %err, "failed to process container, skipping");
            counters.files_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    counters
        .bytes_processed
        .fetch_add(entry.size, Ordering::Relaxed);
    if !keep_cache {
        let _ = tokio::fs::remove_file(&fetched.path).await;
    }
    Ok(())
}

/// Single-cursor consumption of one container: load, transform, enqueue.
fn process_file(
    entry: &FileEntry,
    path: &Path,
    tx: &mpsc::Sender<RowMessage>,
    counters: &Counters,
    container_counters: &Arc<ContainerCounters>,
) -> Result<(), ProcessError> {
    let records = containers::stream_container(path, container_counters)?;
    let bucket_date = entry.bucket_date();

    for item in records {
        let raw = match item {
            Ok(raw) => raw,
            Err(err) if err.is_record_scoped() => {
                counters.records_skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        let measurement = match models::load_measurement(&raw.record, &raw.uid) {
            Ok(measurement) => measurement,
            Err(err) => {
                tracing::debug!(uid = %raw.uid, error = %err, "skipping undecodable measurement");
                counters.measurements_failed.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };
        if measurement.is_base() {
            tracing::debug!(
                test_name = %measurement.header().test_name,
                uid = %raw.uid,
                "unknown test name, skipping measurement"
            );
            counters.unknown_test_names.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let batch =
            measurement_to_observations(&measurement, &NoNetinfo, &NoFingerprints, &bucket_date);
        counters.measurements.fetch_add(1, Ordering::Relaxed);
        counters
            .observation_rows
            .fetch_add(batch.len() as u64, Ordering::Relaxed);

        for obs in &batch.web {
            send_row(tx, WebObservation::DB_TABLE, obs.to_row())?;
        }
        for obs in &batch.web_ctrl {
            send_row(tx, WebControlObservation::DB_TABLE, obs.to_row())?;
        }
        for obs in &batch.http_middlebox {
            send_row(tx, HttpMiddleboxObservation::DB_TABLE, obs.to_row())?;
        }
    }
    Ok(())
}

fn send_row(
    tx: &mpsc::Sender<RowMessage>,
    table: &'static str,
    row: Vec<(&'static str, Scalar)>,
) -> Result<(), ProcessError> {
    tx.blocking_send(RowMessage { table, row })
        .map_err(|_| ProcessError::WriterGone)
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Instantaneous throughput plus the estimated time remaining, derived from
/// day-level progress: `etr = elapsed * total_days / (days_done +
/// fraction_of_current_day_done)`.
fn log_progress(
    started: Instant,
    counters: &Counters,
    total_bytes: u64,
    total_days: usize,
    days_done: usize,
    day_done: usize,
    day_total: usize,
) {
    let elapsed = started.elapsed().as_secs_f64();
    if elapsed <= 0.0 || day_total == 0 || total_days == 0 {
        return;
    }
    let processed = counters.bytes_processed.load(Ordering::Relaxed);
    let mbps = processed as f64 / elapsed / 1_000_000.0;
    let fraction_of_day = day_done as f64 / day_total as f64;
    let etr = elapsed * total_days as f64 / (days_done as f64 + fraction_of_day);
    let eta = (etr - elapsed).max(0.0);
    tracing::info!(
        speed_mbps = %format!("{mbps:.2}"),
        eta_seconds = %format!("{eta:.0}"),
        processed_bytes = processed,
        total_bytes,
        "progress"
    );
}

fn summarize(counters: &Counters, container_counters: &ContainerCounters) {
    tracing::info!(
        files_processed = counters.files_processed.load(Ordering::Relaxed),
        files_failed = counters.files_failed.load(Ordering::Relaxed),
        measurements = counters.measurements.load(Ordering::Relaxed),
        observation_rows = counters.observation_rows.load(Ordering::Relaxed),
        records_skipped = counters.records_skipped.load(Ordering::Relaxed),
        measurements_failed = counters.measurements_failed.load(Ordering::Relaxed),
        unknown_test_names = counters.unknown_test_names.load(Ordering::Relaxed),
        cache_hits = counters.cache_hits.load(Ordering::Relaxed),
        cache_misses = counters.cache_misses.load(Ordering::Relaxed),
        yaml_normalized = container_counters.yaml_normalized.load(Ordering::Relaxed),
        yaml_envelopes_skipped = container_counters
            .yaml_envelopes_skipped
            .load(Ordering::Relaxed),
        invalid_post_envelopes = container_counters
            .invalid_post_envelopes
            .load(Ordering::Relaxed),
        "run complete"
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn minican_entry(dir: &Path, measurements: usize) -> (FileEntry, PathBuf) {
        let path = dir.join("2023103115_VE_whatsapp.n1.0.tar.gz");
        let gz = flate2::write::GzEncoder::new(
            File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        let mut builder = tar::Builder::new(gz);
        for n in 0..measurements {
            let content = format!(
                r#"{{"format": "json", "content": {{"report_id": "r-{n}", "probe_cc": "VE", "test_name": "whatsapp", "test_keys": {{"queries": [{{"hostname": "e1.whatsapp.net", "query_type": "A", "answers": [{{"answer_type": "A", "ipv4": "157.240.21.53"}}]}}]}}}}}}"#
            );
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("msmt-{n}.post"), content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();

        let size = std::fs::metadata(&path).unwrap().len();
        let entry = FileEntry {
            day: chrono::NaiveDate::from_ymd_opt(2023, 10, 31).unwrap(),
            country_code: "VE".to_string(),
            test_name: "whatsapp".to_string(),
            filename: "2023103115_VE_whatsapp.n1.0.tar.gz".to_string(),
            size,
            ext: "tar.gz".to_string(),
            object_path: "raw/20231031/15/VE/whatsapp/2023103115_VE_whatsapp.n1.0.tar.gz"
                .to_string(),
            bucket_name: "ooni-data-eu-fra".to_string(),
        };
        (entry, path)
    }

    #[tokio::test]
    async fn minican_flows_through_to_rows() {
        let dir = tempdir::TempDir::new("sync-test").unwrap();
        let (entry, path) = minican_entry(dir.path(), 5);

        let (tx, mut rx) = mpsc::channel::<RowMessage>(64);
        let counters = Arc::new(Counters::default());
        let container_counters = Arc::new(ContainerCounters::default());

        let worker = {
            let counters = counters.clone();
            tokio::task::spawn_blocking(move || {
                process_file(&entry, &path, &tx, &counters, &container_counters)
            })
        };

        let mut rows = Vec::new();
        while let Some(message) = rx.recv().await {
            rows.push(message);
        }
        worker.await.unwrap().unwrap();

        assert_eq!(counters.measurements.load(Ordering::Relaxed), 5);
        assert_eq!(rows.len(), 5);
        for row in &rows {
            assert_eq!(row.table, WebObservation::DB_TABLE);
            let uid = &row.row.iter().find(|(n, _)| *n == "measurement_uid").unwrap().1;
            assert!(matches!(uid, Scalar::Text(s) if s.starts_with("msmt-")));
            let cc = &row.row.iter().find(|(n, _)| *n == "probe_cc").unwrap().1;
            assert_eq!(*cc, Scalar::Text("VE".to_string()));
            let date = &row.row.iter().find(|(n, _)| *n == "bucket_date").unwrap().1;
            assert_eq!(*date, Scalar::Text("2023-10-31".to_string()));
        }
    }

    #[tokio::test]
    async fn garbage_records_are_counted_not_fatal() {
        let dir = tempdir::TempDir::new("sync-test").unwrap();
        let path = dir.path().join("20231031_VE_whatsapp.jsonl.gz");
        let mut gz = flate2::write::GzEncoder::new(
            File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        writeln!(gz, "{{\"test_name\": \"whatsapp\", \"probe_cc\": \"VE\", \"report_id\": \"r\", \"test_keys\": {{}}}}").unwrap();
        writeln!(gz, "this is not json").unwrap();
        writeln!(gz, "{{\"test_name\": \"nonexistent_test\", \"report_id\": \"r2\", \"test_keys\": {{}}}}").unwrap();
        gz.finish().unwrap();

        let size = std::fs::metadata(&path).unwrap().len();
        let entry = FileEntry {
            day: chrono::NaiveDate::from_ymd_opt(2023, 10, 31).unwrap(),
            country_code: "VE".to_string(),
            test_name: "whatsapp".to_string(),
            filename: "20231031_VE_whatsapp.jsonl.gz".to_string(),
            size,
            ext: "jsonl.gz".to_string(),
            object_path: "jsonl/whatsapp/VE/20231031/00/20231031_VE_whatsapp.jsonl.gz".to_string(),
            bucket_name: "ooni-data-eu-fra".to_string(),
        };

        let (tx, mut rx) = mpsc::channel::<RowMessage>(64);
        let counters = Arc::new(Counters::default());
        let container_counters = Arc::new(ContainerCounters::default());
        let worker = {
            let counters = counters.clone();
            let path = path.clone();
            tokio::task::spawn_blocking(move || {
                process_file(&entry, &path, &tx, &counters, &container_counters)
            })
        };
        while rx.recv().await.is_some() {}
        worker.await.unwrap().unwrap();

        assert_eq!(counters.measurements.load(Ordering::Relaxed), 1);
        assert_eq!(counters.records_skipped.load(Ordering::Relaxed), 1);
        assert_eq!(counters.unknown_test_names.load(Ordering::Relaxed), 1);
    }
}
