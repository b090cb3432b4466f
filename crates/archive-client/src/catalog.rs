//! Archive object catalog: prefix planning, paginated listing, and filename
//! metadata parsing across the three generations of the bucket layout.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::StreamExt;

use crate::{ArchiveClient, CAN_BUCKET, MC_BUCKET};

/// Last day with legacy cans under `canned/`.
const LEGACY_LAST_DAY: NaiveDate = match NaiveDate::from_ymd_opt(2020, 10, 21) {
    Some(day) => day,
    None => unreachable!(),
};
/// First day with minicans under `raw/`.
const MINICAN_FIRST_DAY: NaiveDate = match NaiveDate::from_ymd_opt(2020, 10, 20) {
    Some(day) => day,
    None => unreachable!(),
};

/// Beyond this many test_name x country x day combinations, deep jsonl
/// prefixes cost more round trips than they save; fall back to coarse
/// per-test prefixes and filter in memory.
const MAX_PREFIX_COMBOS: usize = 1_000_000;

/// Listing is latency-bound, not CPU-bound; its fan-out is bounded
/// independently of the download workers.
const LIST_CONCURRENCY: usize = 24;

const LIST_RETRIES: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("invalid date range: start {start} must precede end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("storage listing failed: {0}")]
    Storage(#[from] aws_sdk_s3::Error),
}

/// A parsed catalog entry for one archive object.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileEntry {
    pub day: NaiveDate,
    /// Two-letter uppercase, or `XX` for legacy aggregated cans.
    pub country_code: String,
    /// Canonical (underscore-stripped) test name.
    pub test_name: String,
    pub filename: String,
    pub size: u64,
    pub ext: String,
    pub object_path: String,
    pub bucket_name: String,
}

impl FileEntry {
    /// Local cache location: `<root>/<test>/<cc>/<YYYY-MM-DD>/<filename>`.
    pub fn cache_path(&self, root: &Path) -> PathBuf {
        root.join(&self.test_name)
            .join(&self.country_code)
            .join(self.day.format("%Y-%m-%d").to_string())
            .join(&self.filename)
    }

    /// Empty filter sets are wildcards.
    pub fn matches_filter(&self, ccs: &HashSet<String>, testnames: &HashSet<String>) -> bool {
        if !self.country_code.is_empty() && !ccs.is_empty() && !ccs.contains(&self.country_code) {
            return false;
        }
        if !self.test_name.is_empty() && !testnames.is_empty() && !testnames.contains(&self.test_name)
        {
            return false;
        }
        true
    }

    /// `bucket_date` tag propagated onto every derived observation.
    pub fn bucket_date(&self) -> String {
        self.day.format("%Y-%m-%d").to_string()
    }
}

/// The caller's selection, canonicalized once at the edge.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub ccs: HashSet<String>,
    pub testnames: HashSet<String>,
    pub start_day: NaiveDate,
    pub end_day: NaiveDate,
}

impl Filter {
    pub fn new(
        ccs: impl IntoIterator<Item = String>,
        testnames: impl IntoIterator<Item = String>,
        start_day: NaiveDate,
        end_day: NaiveDate,
    ) -> Filter {
        Filter {
            ccs: ccs.into_iter().map(|cc| cc.to_uppercase()).collect(),
            testnames: testnames
                .into_iter()
                .map(|tn| canonical_test_name(&tn))
                .collect(),
            start_day,
            end_day,
        }
    }

    fn accepts(&self, entry: &FileEntry) -> bool {
        entry.day >= self.start_day
            && entry.day < self.end_day
            && entry.matches_filter(&self.ccs, &self.testnames)
    }
}

fn canonical_test_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// One remote listing unit.
#[derive(Debug, Clone)]
enum ListJob {
    /// `canned/YYYY-MM-DD/` in the legacy bucket.
    CanDay(NaiveDate),
    /// `raw/YYYYMMDD/` in the new bucket.
    RawDay(NaiveDate),
    /// A planned jsonl prefix, deep or coarse.
    Jsonl(String),
}

impl ArchiveClient {
    /// Lazily lists every archive object within the filter, spanning all
    /// prefix families. Entries are deduplicated by `(bucket, path)`; the
    /// relative order of entries from different prefixes is unspecified.
    pub fn list_for_range<'a>(
        &'a self,
        filter: &Filter,
    ) -> impl futures::Stream<Item = Result<FileEntry, CatalogError>> + 'a {
        let filter = Arc::new(clamp_to_today(filter.clone()));

        let jobs = {
            let filter = filter.clone();
            async move {
                if filter.start_day >= filter.end_day {
                    return Err(CatalogError::InvalidRange {
                        start: filter.start_day,
                        end: filter.end_day,
                    });
                }
                let mut jobs: Vec<ListJob> = Vec::new();
                let (can_days, raw_days) = plan_days(filter.start_day, filter.end_day);
                jobs.extend(can_days.into_iter().map(ListJob::CanDay));
                jobs.extend(raw_days.into_iter().map(ListJob::RawDay));
                for prefix in self.plan_jsonl_prefixes(&filter).await? {
                    jobs.push(ListJob::Jsonl(prefix));
                }
                tracing::debug!(jobs = jobs.len(), "planned listing jobs");
                Ok(jobs)
            }
        };

        futures::stream::once(jobs)
            .map(|result| match result {
                Ok(jobs) => futures::stream::iter(jobs).map(Ok).left_stream(),
                Err(err) => futures::stream::once(async move { Err(err) }).right_stream(),
            })
            .flatten()
            .map(move |job| {
                let filter = filter.clone();
                async move {
                    match job {
                        Ok(job) => self.run_list_job(job, &filter).await,
                        Err(err) => Err(err),
                    }
                }
            })
            .buffer_unordered(LIST_CONCURRENCY)
            .map(|result| match result {
                Ok(entries) => futures::stream::iter(entries).map(Ok).left_stream(),
                Err(err) => futures::stream::once(async move { Err(err) }).right_stream(),
            })
            .flatten()
            .scan(HashSet::new(), |seen, item| {
                let passed = match item {
                    Ok(entry) => seen
                        .insert((entry.bucket_name.clone(), entry.object_path.clone()))
                        .then_some(Ok(entry)),
                    Err(err) => Some(Err(err)),
                };
                futures::future::ready(Some(passed))
            })
            .filter_map(futures::future::ready)
    }

    async fn run_list_job(
        &self,
        job: ListJob,
        filter: &Filter,
    ) -> Result<Vec<FileEntry>, CatalogError> {
        let backoff = exponential_backoff::Backoff::new(
            LIST_RETRIES,
            Duration::from_millis(500),
            Some(Duration::from_secs(10)),
        );
        let mut attempt = 0;
        loop {
            let result = match &job {
                ListJob::CanDay(day) => self.list_can_day(*day, filter).await,
                ListJob::RawDay(day) => self.list_raw_day(*day, filter).await,
                ListJob::Jsonl(prefix) => self.list_jsonl_prefix(prefix, filter).await,
            };
            match result {
                Ok(entries) => return Ok(entries),
                Err(err) => {
                    attempt += 1;
                    match backoff.next(attempt) {
                        Some(delay) => {
                            tracing::warn!(?job, attempt, error = %err, "listing failed, retrying");
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(err),
                    }
                }
            }
        }
    }

    async fn list_can_day(
        &self,
        day: NaiveDate,
        filter: &Filter,
    ) -> Result<Vec<FileEntry>, CatalogError> {
        let prefix = format!("canned/{}/", day.format("%Y-%m-%d"));
        let mut entries = Vec::new();
        for (key, size) in self.list_objects(CAN_BUCKET, &prefix).await? {
            if let Some(entry) = parse_legacy_can_key(day, &key, size) {
                if filter.accepts(&entry) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    async fn list_raw_day(
        &self,
        day: NaiveDate,
        filter: &Filter,
    ) -> Result<Vec<FileEntry>, CatalogError> {
        let prefix = format!("raw/{}/", day.format("%Y%m%d"));
        let mut entries = Vec::new();
        for (key, size) in self.list_objects(MC_BUCKET, &prefix).await? {
            if let Some(entry) = parse_new_key(&key, size) {
                if entry.ext == "tar.gz" && filter.accepts(&entry) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    async fn list_jsonl_prefix(
        &self,
        prefix: &str,
        filter: &Filter,
    ) -> Result<Vec<FileEntry>, CatalogError> {
        let mut entries = Vec::new();
        for (key, size) in self.list_objects(MC_BUCKET, prefix).await? {
            if let Some(entry) = parse_new_key(&key, size) {
                if entry.ext == "jsonl.gz" && entry.size > 0 && filter.accepts(&entry) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    /// Deep `jsonl/<tn>/<cc>/<YYYYMMDD>` prefixes when the cross product is
    /// small; coarse `jsonl/<tn>/` prefixes past [`MAX_PREFIX_COMBOS`].
    /// Missing filter axes are discovered with delimiter listings.
    async fn plan_jsonl_prefixes(&self, filter: &Filter) -> Result<Vec<String>, CatalogError> {
        let testnames: BTreeSet<String> = if filter.testnames.is_empty() {
            self.list_all_testnames().await?
        } else {
            filter.testnames.iter().cloned().collect()
        };

        let mut ccs_by_testname = BTreeMap::new();
        for tn in &testnames {
            let ccs: BTreeSet<String> = if filter.ccs.is_empty() {
                self.list_testname_countries(tn).await?
            } else {
                filter.ccs.iter().cloned().collect()
            };
            ccs_by_testname.insert(tn.clone(), ccs);
        }

        let days = date_interval(filter.start_day, filter.end_day);
        Ok(jsonl_prefixes_for(&ccs_by_testname, &days))
    }

    async fn list_all_testnames(&self) -> Result<BTreeSet<String>, CatalogError> {
        let prefixes = self.list_common_prefixes(MC_BUCKET, "jsonl/").await?;
        Ok(prefixes
            .iter()
            .filter_map(|p| p.trim_end_matches('/').rsplit('/').next())
            .map(str::to_string)
            .collect())
    }

    async fn list_testname_countries(&self, testname: &str) -> Result<BTreeSet<String>, CatalogError> {
        let prefixes = self
            .list_common_prefixes(MC_BUCKET, &format!("jsonl/{testname}/"))
            .await?;
        Ok(prefixes
            .iter()
            .filter_map(|p| p.trim_end_matches('/').rsplit('/').next())
            .map(str::to_string)
            .collect())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<(String, u64)>, CatalogError> {
        let mut pages = self
            .client_for(bucket)
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();
        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(aws_sdk_s3::Error::from)?;
            for object in page.contents() {
                let key = object.key().unwrap_or_default().to_string();
                let size = object.size().unwrap_or_default().max(0) as u64;
                keys.push((key, size));
            }
        }
        tracing::trace!(bucket, prefix, objects = keys.len(), "listed prefix");
        Ok(keys)
    }

    async fn list_common_prefixes(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<String>, CatalogError> {
        let mut pages = self
            .client_for(bucket)
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .delimiter("/")
            .into_paginator()
            .send();
        let mut prefixes = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(aws_sdk_s3::Error::from)?;
            for common in page.common_prefixes() {
                if let Some(p) = common.prefix() {
                    prefixes.push(p.to_string());
                }
            }
        }
        Ok(prefixes)
    }
}

fn clamp_to_today(mut filter: Filter) -> Filter {
    let today = chrono::Utc::now().date_naive();
    if filter.end_day > today {
        filter.end_day = today;
    }
    filter
}

/// Days `[start, end)`, split into the legacy-can range and the minican
/// range. The two overlap on the 2020-10-20/21 transition days.
fn plan_days(start: NaiveDate, end: NaiveDate) -> (Vec<NaiveDate>, Vec<NaiveDate>) {
    let days = date_interval(start, end);
    let can_days = days
        .iter()
        .copied()
        .filter(|d| *d <= LEGACY_LAST_DAY)
        .collect();
    let raw_days = days
        .iter()
        .copied()
        .filter(|d| *d >= MINICAN_FIRST_DAY)
        .collect();
    (can_days, raw_days)
}

fn date_interval(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d < end).collect()
}

fn jsonl_prefixes_for(
    ccs_by_testname: &BTreeMap<String, BTreeSet<String>>,
    days: &[NaiveDate],
) -> Vec<String> {
    let combos: usize = ccs_by_testname
        .values()
        .map(|ccs| ccs.len() * days.len())
        .sum();
    if combos > MAX_PREFIX_COMBOS {
        tracing::debug!(combos, "cross product too large, listing coarse jsonl prefixes");
        return ccs_by_testname
            .keys()
            .map(|tn| format!("jsonl/{tn}/"))
            .collect();
    }
    let mut prefixes = Vec::with_capacity(combos);
    for (tn, ccs) in ccs_by_testname {
        for cc in ccs {
            for day in days {
                prefixes.push(format!("jsonl/{tn}/{cc}/{}", day.format("%Y%m%d")));
            }
        }
    }
    prefixes
}

/// Parses a key under `canned/YYYY-MM-DD/`. Three shapes: aggregated
/// `<test_name>.NN.tar.lz4` cans, per-report `*-<CC>-*-<test>-*.json.lz4` /
/// `.yaml.lz4` files, and `index.json.gz` which is silently skipped.
fn parse_legacy_can_key(day: NaiveDate, key: &str, size: u64) -> Option<FileEntry> {
    let filename = key.rsplit('/').next().unwrap_or(key);

    if filename.ends_with(".tar.lz4") {
        let test_name = canonical_test_name(filename.split('.').next().unwrap_or_default());
        return Some(FileEntry {
            day,
            country_code: "XX".to_string(),
            test_name,
            filename: filename.to_string(),
            size,
            ext: "tar.lz4".to_string(),
            object_path: key.to_string(),
            bucket_name: CAN_BUCKET.to_string(),
        });
    }

    if filename.ends_with(".json.lz4") || filename.ends_with(".yaml.lz4") {
        let parts: Vec<&str> = filename.split('-').collect();
        if parts.len() < 4 {
            tracing::warn!(filename, "unexpected legacy filename");
            return None;
        }
        let dots: Vec<&str> = filename.split('.').collect();
        let ext = dots[dots.len() - 2..].join(".");
        return Some(FileEntry {
            day,
            country_code: parts[1].to_uppercase(),
            test_name: canonical_test_name(parts[3]),
            filename: filename.to_string(),
            size,
            ext,
            object_path: key.to_string(),
            bucket_name: CAN_BUCKET.to_string(),
        });
    }

    if filename != "index.json.gz" {
        tracing::warn!(filename, "unexpected filename in legacy listing");
    }
    None
}

/// Parses a new-layout key (`raw/` minicans and `jsonl/` files):
/// `<YYYYMMDDHH...>_<CC>_<test[.suffixes]>`. The leading token is truncated
/// to its first 8 digits for the day, smoothing over historical
/// inconsistencies between the two generations of the naming scheme.
fn parse_new_key(key: &str, size: u64) -> Option<FileEntry> {
    let filename = key.rsplit('/').next().unwrap_or(key);
    let parts: Vec<&str> = filename.split('_').collect();
    let day_token = parts.first().and_then(|p| p.get(..8));
    if parts.len() < 3 || day_token.is_none() {
        tracing::warn!(filename, "unexpected filename in listing");
        return None;
    }
    let day = NaiveDate::parse_from_str(day_token.unwrap_or_default(), "%Y%m%d")
        .map_err(|err| tracing::warn!(filename, %err, "unparseable day in filename"))
        .ok()?;
    let country_code = parts[1].to_uppercase();

    let trailer = parts[2];
    let test_name = canonical_test_name(trailer.split('.').next().unwrap_or_default());
    let ext = if trailer.ends_with(".tar.gz") {
        "tar.gz".to_string()
    } else if trailer.ends_with(".jsonl.gz") {
        "jsonl.gz".to_string()
    } else {
        let dots: Vec<&str> = trailer.split('.').collect();
        if dots.len() < 3 {
            tracing::warn!(filename, "unexpected extension in filename");
            return None;
        }
        dots[dots.len() - 2..].join(".")
    };

    Some(FileEntry {
        day,
        country_code,
        test_name,
        filename: filename.to_string(),
        size,
        ext,
        object_path: key.to_string(),
        bucket_name: MC_BUCKET.to_string(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn minican_key_parses() {
        let entry = parse_new_key(
            "raw/20231031/15/VE/whatsapp/2023103115_VE_whatsapp.n1.0.tar.gz",
            52964,
        )
        .unwrap();
        assert_eq!(entry.day, date(2023, 10, 31));
        assert_eq!(entry.country_code, "VE");
        assert_eq!(entry.test_name, "whatsapp");
        assert_eq!(entry.ext, "tar.gz");
        assert_eq!(entry.size, 52964);
        assert_eq!(entry.bucket_name, MC_BUCKET);
    }

    #[test]
    fn jsonl_key_parses() {
        let entry = parse_new_key(
            "jsonl/webconnectivity/IT/20221101/00/20221101_IT_webconnectivity.n1.0.jsonl.gz",
            123,
        )
        .unwrap();
        assert_eq!(entry.test_name, "webconnectivity");
        assert_eq!(entry.ext, "jsonl.gz");
        assert_eq!(entry.day, date(2022, 11, 1));
    }

    #[test]
    fn legacy_aggregated_can_parses() {
        let entry = parse_legacy_can_key(
            date(2016, 7, 15),
            "canned/2016-07-15/http_requests.0.tar.lz4",
            999,
        )
        .unwrap();
        assert_eq!(entry.country_code, "XX");
        assert_eq!(entry.test_name, "httprequests");
        assert_eq!(entry.ext, "tar.lz4");
    }

    #[test]
    fn legacy_report_file_parses() {
        let entry = parse_legacy_can_key(
            date(2020, 1, 2),
            "canned/2020-01-02/20200102T000123Z-IR-AS12880-web_connectivity-abc-0.2.0-probe.json.lz4",
            999,
        )
        .unwrap();
        assert_eq!(entry.country_code, "IR");
        assert_eq!(entry.test_name, "webconnectivity");
        assert_eq!(entry.ext, "json.lz4");
    }

    #[test]
    fn index_files_are_silently_skipped() {
        assert!(
            parse_legacy_can_key(date(2020, 1, 2), "canned/2020-01-02/index.json.gz", 1).is_none()
        );
    }

    #[test]
    fn transition_range_spans_both_families() {
        let (can_days, raw_days) = plan_days(date(2020, 10, 20), date(2020, 10, 22));
        assert_eq!(can_days, vec![date(2020, 10, 20), date(2020, 10, 21)]);
        assert_eq!(raw_days, vec![date(2020, 10, 20), date(2020, 10, 21)]);
    }

    #[test]
    fn pre_transition_range_has_no_minicans() {
        let (can_days, raw_days) = plan_days(date(2016, 1, 1), date(2016, 1, 3));
        assert_eq!(can_days.len(), 2);
        assert!(raw_days.is_empty());
    }

    #[test]
    fn jsonl_prefixes_enumerate_the_cross_product() {
        let mut plan = BTreeMap::new();
        plan.insert(
            "whatsapp".to_string(),
            BTreeSet::from(["IT".to_string(), "VE".to_string()]),
        );
        let days = vec![date(2023, 10, 31), date(2023, 11, 1)];
        let prefixes = jsonl_prefixes_for(&plan, &days);
        assert_eq!(prefixes.len(), 4);
        assert!(prefixes.contains(&"jsonl/whatsapp/VE/20231031".to_string()));
    }

    #[test]
    fn oversized_cross_product_falls_back_to_coarse_prefixes() {
        let mut plan = BTreeMap::new();
        let ccs: BTreeSet<String> = (0..2000).map(|n| format!("C{n}")).collect();
        plan.insert("webconnectivity".to_string(), ccs);
        let days: Vec<NaiveDate> = date_interval(date(2015, 1, 1), date(2017, 1, 1));
        let prefixes = jsonl_prefixes_for(&plan, &days);
        assert_eq!(prefixes, vec!["jsonl/webconnectivity/".to_string()]);
    }

    #[test]
    fn filter_predicates_hold() {
        let entry = parse_new_key(
            "raw/20231031/15/VE/whatsapp/2023103115_VE_whatsapp.n1.0.tar.gz",
            52964,
        )
        .unwrap();
        let accept = Filter::new(
            vec!["ve".to_string()],
            vec!["whats_app".to_string()],
            date(2023, 10, 31),
            date(2023, 11, 1),
        );
        assert!(accept.accepts(&entry));

        let wrong_country = Filter::new(
            vec!["IT".to_string()],
            vec![],
            date(2023, 10, 31),
            date(2023, 11, 1),
        );
        assert!(!wrong_country.accepts(&entry));

        let out_of_range = Filter::new(vec![], vec![], date(2023, 11, 1), date(2023, 11, 2));
        assert!(!out_of_range.accepts(&entry));
    }

    #[test]
    fn cache_path_follows_the_layout() {
        let entry = parse_new_key(
            "raw/20231031/15/VE/whatsapp/2023103115_VE_whatsapp.n1.0.tar.gz",
            52964,
        )
        .unwrap();
        assert_eq!(
            entry.cache_path(Path::new("/cache")),
            PathBuf::from("/cache/whatsapp/VE/2023-10-31/2023103115_VE_whatsapp.n1.0.tar.gz")
        );
    }
}
