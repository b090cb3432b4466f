//! Local disk cache of archive containers, with size-based freshness and
//! atomic-rename commits.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{ArchiveClient, FileEntry};

/// A download that makes no progress for this long is abandoned.
const CHUNK_TIMEOUT: Duration = Duration::from_secs(60);

const CHUNK_CAPACITY: usize = 128 * 1024;

/// Disambiguates concurrent writers of the same cache entry.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("cache i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("object download failed: {0}")]
    Storage(#[from] aws_sdk_s3::Error),

    #[error("download made no progress for {0:?}")]
    Stalled(Duration),

    #[error("size mismatch for {}: expected {expected}, got {actual}", path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

/// Outcome of [`ArchiveClient::fetch`].
#[derive(Debug)]
pub struct Fetched {
    pub path: PathBuf,
    /// True when the entry was already cached and no download happened.
    pub cache_hit: bool,
}

impl ArchiveClient {
    /// Ensures `entry` is present in the cache and returns its local path.
    ///
    /// A file whose on-disk size equals the catalog size is a hit: its mtime
    /// is bumped and no bytes move. Otherwise the object is downloaded to a
    /// unique sibling `.s3tmp` file, fsynced, and committed with an atomic
    /// rename. `progress` is invoked with the byte count of every chunk.
    pub async fn fetch(
        &self,
        entry: &FileEntry,
        cache_root: &Path,
        progress: impl Fn(u64),
    ) -> Result<Fetched, FetchError> {
        let dest = entry.cache_path(cache_root);

        if let Ok(meta) = tokio::fs::metadata(&dest).await {
            if meta.len() == entry.size {
                tracing::debug!(path = %dest.display(), "cache hit");
                touch(&dest)?;
                return Ok(Fetched {
                    path: dest,
                    cache_hit: true,
                });
            }
        }

        log_download(entry);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = TmpFile::for_dest(&dest);
        let mut file = tokio::fs::File::create(&tmp.path).await?;

        let response = self
            .client_for(&entry.bucket_name)
            .get_object()
            .bucket(&entry.bucket_name)
            .key(&entry.object_path)
            .send()
            .await
            .map_err(aws_sdk_s3::Error::from)?;

        let mut reader = response.body.into_async_read();
        let mut buf = vec![0u8; CHUNK_CAPACITY];
        loop {
            let n = tokio::time::timeout(CHUNK_TIMEOUT, reader.read(&mut buf))
                .await
                .map_err(|_| FetchError::Stalled(CHUNK_TIMEOUT))??;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            progress(n as u64);
        }
        file.sync_all().await?;
        drop(file);

        // Rename is the commit point; a crash before it leaves only tmp
        // garbage that the guard unlinks.
        tokio::fs::rename(&tmp.path, &dest).await?;
        tmp.disarm();

        let actual = tokio::fs::metadata(&dest).await?.len();
        if actual != entry.size {
            return Err(FetchError::SizeMismatch {
                path: dest,
                expected: entry.size,
                actual,
            });
        }

        Ok(Fetched {
            path: dest,
            cache_hit: false,
        })
    }
}

fn touch(path: &Path) -> std::io::Result<()> {
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(std::fs::FileTimes::new().set_modified(std::time::SystemTime::now()))
}

fn log_download(entry: &FileEntry) {
    let (scaled, unit) = if entry.size >= 1024 * 1024 {
        (entry.size as f64 / 1024.0 / 1024.0, "MB")
    } else {
        (entry.size as f64 / 1024.0, "KB")
    };
    tracing::info!(
        object = %entry.object_path,
        size = %format!("{scaled:.1} {unit}"),
        "downloading container"
    );
}

/// Unlinks the tmp file on drop unless the rename committed it first. Also
/// covers cancellation: dropping the in-flight fetch future drops the guard.
struct TmpFile {
    path: PathBuf,
    armed: bool,
}

impl TmpFile {
    fn for_dest(dest: &Path) -> TmpFile {
        let filename = dest
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("container");
        let unique = format!(
            "{filename}.{}.{}.s3tmp",
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed),
        );
        TmpFile {
            path: dest.with_file_name(unique),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TmpFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDate;

    fn entry(size: u64) -> FileEntry {
        FileEntry {
            day: NaiveDate::from_ymd_opt(2023, 10, 31).unwrap(),
            country_code: "VE".to_string(),
            test_name: "whatsapp".to_string(),
            filename: "2023103115_VE_whatsapp.n1.0.tar.gz".to_string(),
            size,
            ext: "tar.gz".to_string(),
            object_path: "raw/20231031/15/VE/whatsapp/2023103115_VE_whatsapp.n1.0.tar.gz"
                .to_string(),
            bucket_name: crate::MC_BUCKET.to_string(),
        }
    }

    #[tokio::test]
    async fn populated_cache_is_a_hit_without_network() {
        let dir = tempdir::TempDir::new("fetch-test").unwrap();
        let entry = entry(5);
        let dest = entry.cache_path(dir.path());
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, b"12345").unwrap();

        let client = ArchiveClient::new_anonymous().await;
        let first = client.fetch(&entry, dir.path(), |_| {}).await.unwrap();
        assert!(first.cache_hit);
        assert_eq!(first.path, dest);

        // Idempotent: same path, still no download.
        let second = client.fetch(&entry, dir.path(), |_| {}).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.path, first.path);
    }

    #[test]
    fn tmp_guard_unlinks_on_drop() {
        let dir = tempdir::TempDir::new("fetch-test").unwrap();
        let dest = dir.path().join("container.tar.gz");
        let tmp = TmpFile::for_dest(&dest);
        std::fs::write(&tmp.path, b"partial").unwrap();
        let tmp_path = tmp.path.clone();
        drop(tmp);
        assert!(!tmp_path.exists());
    }

    #[test]
    fn tmp_names_are_unique() {
        let dest = Path::new("/cache/whatsapp/VE/2023-10-31/can.tar.gz");
        let a = TmpFile::for_dest(dest);
        let b = TmpFile::for_dest(dest);
        assert_ne!(a.path, b.path);
        let (a, b) = (a.path.clone(), b.path.clone());
        // Nothing was written; disarm not needed for nonexistent files.
        assert!(a.to_string_lossy().ends_with(".s3tmp"));
        assert_ne!(a, b);
    }
}
