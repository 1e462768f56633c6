//! Watermark persistence and advancement.
//!
//! Two file formats, one per [`WatermarkMode`]:
//!
//! ```text
//! data_dir/
//! ├── last_checked_time.txt   # timestamp mode: one RFC 3339 timestamp
//! └── sent_links.json         # link-set mode: JSON array, oldest first
//! ```
//!
//! The runner reads the watermark once before fetching and only writes it
//! after the main channel confirmed delivery.

use crate::config::{Policy, WatermarkMode};
use crate::error::{NewsError, Result};
use crate::models::{FetchOutcome, LinkSet, Watermark};
use chrono::DateTime;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument, warn};

/// Persisted "already processed" marker.
pub trait WatermarkStore {
    /// Read the stored watermark; `Ok(None)` when nothing was stored yet.
    async fn load(&self) -> Result<Option<Watermark>>;

    async fn save(&self, watermark: &Watermark) -> Result<()>;
}

/// Timestamp watermark kept as a single RFC 3339 line.
#[derive(Debug, Clone)]
pub struct TimestampFileStore {
    path: PathBuf,
}

impl TimestampFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WatermarkStore for TimestampFileStore {
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Option<Watermark>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).await?;
        let ts = DateTime::parse_from_rfc3339(raw.trim())
            .map_err(|e| NewsError::Decode(format!("bad timestamp {:?}: {e}", raw.trim())))?;
        Ok(Some(Watermark::Timestamp(ts)))
    }

    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    async fn save(&self, watermark: &Watermark) -> Result<()> {
        let Watermark::Timestamp(ts) = watermark else {
            return Err(NewsError::Config(
                "timestamp store cannot hold a link set".into(),
            ));
        };
        ensure_parent(&self.path).await?;
        fs::write(&self.path, ts.to_rfc3339()).await?;
        Ok(())
    }
}

/// Delivered-link watermark kept as a JSON array, oldest first.
#[derive(Debug, Clone)]
pub struct LinkSetFileStore {
    path: PathBuf,
    cap: usize,
}

impl LinkSetFileStore {
    pub fn new(path: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            path: path.into(),
            cap,
        }
    }
}

impl WatermarkStore for LinkSetFileStore {
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Option<Watermark>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).await?;
        let links: Vec<String> = serde_json::from_str(&raw)?;
        Ok(Some(Watermark::Links(LinkSet::from_links(links, self.cap))))
    }

    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    async fn save(&self, watermark: &Watermark) -> Result<()> {
        let Watermark::Links(set) = watermark else {
            return Err(NewsError::Config(
                "link-set store cannot hold a timestamp".into(),
            ));
        };
        let links: Vec<&String> = set.iter().collect();
        ensure_parent(&self.path).await?;
        fs::write(&self.path, serde_json::to_string_pretty(&links)?).await?;
        Ok(())
    }
}

/// File store matching the configured watermark mode.
#[derive(Debug, Clone)]
pub enum FileStore {
    Timestamp(TimestampFileStore),
    LinkSet(LinkSetFileStore),
}

impl FileStore {
    pub fn for_policy(policy: &Policy, path: impl Into<PathBuf>) -> Self {
        match policy.watermark {
            WatermarkMode::Timestamp => FileStore::Timestamp(TimestampFileStore::new(path)),
            WatermarkMode::LinkSet => {
                FileStore::LinkSet(LinkSetFileStore::new(path, policy.link_cap))
            }
        }
    }
}

impl WatermarkStore for FileStore {
    async fn load(&self) -> Result<Option<Watermark>> {
        match self {
            FileStore::Timestamp(store) => store.load().await,
            FileStore::LinkSet(store) => store.load().await,
        }
    }

    async fn save(&self, watermark: &Watermark) -> Result<()> {
        match self {
            FileStore::Timestamp(store) => store.save(watermark).await,
            FileStore::LinkSet(store) => store.save(watermark).await,
        }
    }
}

/// Load the watermark, treating any read failure as "no watermark".
pub async fn load_or_none<S: WatermarkStore>(store: &S) -> Option<Watermark> {
    match store.load().await {
        Ok(watermark) => watermark,
        Err(e) => {
            warn!(error = %e, "Could not read watermark; reconsidering full history");
            None
        }
    }
}

/// The watermark to persist after `outcome` was delivered, if it moved.
///
/// Timestamps only move forward. Link sets gain the delivered links, oldest
/// first, so eviction drops the oldest deliveries.
///
/// # Arguments
///
/// * `current` - The watermark the fetch ran against
/// * `outcome` - The delivered fetch
/// * `policy` - Selects the watermark mode and the link cap
///
/// # Returns
///
/// `Some` with the new watermark, or `None` when nothing would change
/// (no dated item newer than `current`, or no new link).
pub fn advance(
    current: Option<&Watermark>,
    outcome: &FetchOutcome,
    policy: &Policy,
) -> Option<Watermark> {
    match policy.watermark {
        WatermarkMode::Timestamp => {
            let newest = outcome.newest_seen?;
            match current {
                Some(Watermark::Timestamp(ts)) if newest <= *ts => None,
                _ => Some(Watermark::Timestamp(newest)),
            }
        }
        WatermarkMode::LinkSet => {
            let mut set = match current {
                Some(Watermark::Links(set)) => set.clone(),
                _ => LinkSet::new(policy.link_cap),
            };
            let mut grew = false;
            for candidate in outcome.candidates.iter().rev() {
                grew |= set.insert(candidate.link.clone());
            }
            grew.then_some(Watermark::Links(set))
        }
    }
}

/// Advance and persist the watermark after a confirmed delivery.
///
/// Write failures are logged; the next run then simply reconsiders the batch.
///
/// # Returns
///
/// `true` if a new watermark was written.
#[instrument(level = "info", skip_all)]
pub async fn commit<S: WatermarkStore>(
    store: &S,
    current: Option<&Watermark>,
    outcome: &FetchOutcome,
    policy: &Policy,
) -> bool {
    let Some(next) = advance(current, outcome, policy) else {
        info!("Watermark unchanged");
        return false;
    };
    match store.save(&next).await {
        Ok(()) => {
            match &next {
                Watermark::Timestamp(ts) => info!(watermark = %ts.to_rfc3339(), "Watermark advanced"),
                Watermark::Links(set) => info!(links = set.len(), "Delivered links recorded"),
            }
            true
        }
        Err(e) => {
            warn!(error = %e, "Failed to persist watermark");
            false
        }
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}
