//! Keyword file loading and data directory checks.

use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument, warn};

/// Load one keyword per line, trimmed, skipping blank lines.
///
/// # Arguments
///
/// * `path` - Keyword file, UTF-8, one entry per line
///
/// # Returns
///
/// The keywords in file order. A missing or unreadable file yields an empty
/// list and a warning; whether an empty list is acceptable is the caller's
/// decision.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_keywords(path: &Path) -> Vec<String> {
    match fs::read_to_string(path).await {
        Ok(raw) => {
            let keywords = parse_keywords(&raw);
            info!(count = keywords.len(), "Loaded keywords");
            keywords
        }
        Err(e) => {
            warn!(error = %e, "Keyword file not readable; using empty list");
            Vec::new()
        }
    }
}

fn parse_keywords(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Data directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}
