//! Cross-run guards: the single-instance lock and the recent-send marker.

use crate::error::{NewsError, Result};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

/// Mutual exclusion between runs.
pub trait RunLock {
    /// Take the lock. `Ok(false)` means another run holds it.
    async fn acquire(&self) -> Result<bool>;

    async fn release(&self) -> Result<()>;
}

/// Lock file whose age decides whether it is still held.
///
/// A lock older than `stale_after` is assumed to belong to a crashed run and
/// is taken over.
#[derive(Debug, Clone)]
pub struct FileRunLock {
    path: PathBuf,
    stale_after: Duration,
}

impl FileRunLock {
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
        }
    }

    async fn is_fresh(&self) -> Result<bool> {
        let modified = fs::metadata(&self.path).await?.modified()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        Ok(age < self.stale_after)
    }

    async fn write_stamp(&self, create_new: bool) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .create_new(create_new)
            .truncate(true)
            .open(&self.path)
            .await?;
        file.write_all(Utc::now().to_rfc3339().as_bytes()).await?;
        file.flush().await
    }
}

impl RunLock for FileRunLock {
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    async fn acquire(&self) -> Result<bool> {
        match self.write_stamp(true).await {
            Ok(()) => return Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(NewsError::Io(e)),
        }
        if self.is_fresh().await? {
            warn!("Another run holds the lock");
            return Ok(false);
        }
        info!("Taking over stale lock");
        self.write_stamp(false).await?;
        Ok(true)
    }

    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    async fn release(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Lock released");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Records when the last send (or scheduled run) completed.
///
/// Stored as fractional unix seconds so older records stay readable.
#[derive(Debug, Clone)]
pub struct SendMarker {
    path: PathBuf,
}

impl SendMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn last_sent(&self) -> Result<Option<DateTime<Utc>>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let secs: f64 = raw
            .trim()
            .parse()
            .map_err(|e| NewsError::Decode(format!("bad send marker {:?}: {e}", raw.trim())))?;
        Ok(Utc.timestamp_millis_opt((secs * 1000.0) as i64).single())
    }

    /// Whether a send was recorded less than `minutes` before `now`.
    ///
    /// An unreadable marker counts as "not sent".
    pub async fn sent_within(&self, minutes: i64, now: DateTime<FixedOffset>) -> bool {
        match self.last_sent().await {
            Ok(Some(last)) => {
                let elapsed = now.with_timezone(&Utc) - last;
                let recent = elapsed < chrono::Duration::minutes(minutes);
                if recent {
                    info!(elapsed_secs = elapsed.num_seconds(), "Recent send recorded");
                }
                recent
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Could not read send marker");
                false
            }
        }
    }

    pub async fn mark(&self, now: DateTime<FixedOffset>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let secs = now.timestamp_millis() as f64 / 1000.0;
        fs::write(&self.path, secs.to_string()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kst_now() -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&FixedOffset::east_opt(9 * 3600).unwrap())
    }

    #[tokio::test]
    async fn test_lock_excludes_second_run() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileRunLock::new(dir.path().join("relay.lock"), Duration::from_secs(600));

        assert!(lock.acquire().await.unwrap());
        assert!(!lock.acquire().await.unwrap());
        lock.release().await.unwrap();
        assert!(lock.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileRunLock::new(dir.path().join("relay.lock"), Duration::ZERO);

        assert!(lock.acquire().await.unwrap());
        assert!(lock.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_release_without_lock_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileRunLock::new(dir.path().join("relay.lock"), Duration::from_secs(600));
        assert!(lock.release().await.is_ok());
    }

    #[tokio::test]
    async fn test_send_marker_window() {
        let dir = tempfile::tempdir().unwrap();
        let marker = SendMarker::new(dir.path().join("data/last_sent_time.txt"));
        let now = kst_now();

        assert!(!marker.sent_within(30, now).await);
        marker.mark(now - chrono::Duration::minutes(10)).await.unwrap();
        assert!(marker.sent_within(30, now).await);
        assert!(!marker.sent_within(5, now).await);
    }

    #[tokio::test]
    async fn test_send_marker_reads_fractional_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_sent_time.txt");
        tokio::fs::write(&path, "1746509400.25").await.unwrap();

        let marker = SendMarker::new(&path);
        let last = marker.last_sent().await.unwrap().unwrap();
        assert_eq!(last.timestamp(), 1746509400);
        assert_eq!(last.timestamp_subsec_millis(), 250);
    }

    #[tokio::test]
    async fn test_corrupt_send_marker_is_not_recent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_sent_time.txt");
        tokio::fs::write(&path, "yesterday").await.unwrap();

        let marker = SendMarker::new(&path);
        assert!(!marker.sent_within(30, kst_now()).await);
    }
}
