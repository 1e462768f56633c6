//! Runtime configuration: the send/paging policy and the assembled settings.
//!
//! [`Policy`] carries every tunable that used to differ between deployments
//! (send threshold, forced hours, page size, ...). It is read from an optional
//! YAML file; any field left out keeps its default. [`Settings`] combines the
//! policy with credentials and paths from the command line and is built once
//! in `main`, then passed by reference.

use crate::cli::Cli;
use crate::error::{NewsError, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// The provider rejects start offsets beyond this.
pub const MAX_START_OFFSET: u32 = 1000;
/// The provider's page size ceiling.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Which watermark design is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkMode {
    /// Newest delivered publish time.
    Timestamp,
    /// Bounded set of delivered links.
    LinkSet,
}

/// What to do when a delivered link shows up in link-set mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStop {
    /// Classify the rest of the page, then stop paging.
    FinishPage,
    /// Stop classifying immediately.
    StopScan,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Policy {
    /// Minimum candidates needed to send outside forced hours.
    pub min_send_threshold: usize,
    /// Local hours in which a single candidate is enough to send.
    pub force_hours: BTreeSet<u32>,
    pub page_size: u32,
    pub max_pages: u32,
    pub watermark: WatermarkMode,
    pub link_stop: LinkStop,
    /// Maximum delivered links remembered in link-set mode.
    pub link_cap: usize,
    /// Fixed offset publish times are normalized to.
    pub utc_offset_hours: i32,
    /// Scheduled runs only proceed when the local hour is a multiple of this.
    pub cadence_hours: u32,
    /// Scheduled runs exit if a send happened within this many minutes.
    pub recent_send_minutes: i64,
    /// A lock file older than this is considered abandoned.
    pub lock_stale_secs: u64,
    pub request_timeout_secs: u64,
    /// Retries for a failed Telegram send.
    pub notify_retries: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            min_send_threshold: 3,
            force_hours: [0, 6, 12, 18].into_iter().collect(),
            page_size: 30,
            max_pages: 5,
            watermark: WatermarkMode::Timestamp,
            link_stop: LinkStop::FinishPage,
            link_cap: 100,
            utc_offset_hours: 9,
            cadence_hours: 2,
            recent_send_minutes: 30,
            lock_stale_secs: 600,
            request_timeout_secs: 30,
            notify_retries: 3,
        }
    }
}

impl Policy {
    /// Parse a policy from YAML and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let policy: Policy = serde_yaml::from_str(yaml)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Load the policy file, or the defaults when no path is given.
    #[instrument(level = "info")]
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let yaml = tokio::fs::read_to_string(path).await?;
                let policy = Self::from_yaml(&yaml)?;
                info!(path = %path.display(), "Loaded policy file");
                Ok(policy)
            }
            None => {
                info!("No policy file given; using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(NewsError::Config(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        if self.max_pages == 0 {
            return Err(NewsError::Config("max_pages must be at least 1".into()));
        }
        let last_start = (self.max_pages - 1)
            .checked_mul(self.page_size)
            .and_then(|offset| offset.checked_add(1));
        if !last_start.is_some_and(|start| start <= MAX_START_OFFSET) {
            return Err(NewsError::Config(format!(
                "max_pages {} with page_size {} pages past start offset {MAX_START_OFFSET}",
                self.max_pages, self.page_size
            )));
        }
        if self.link_cap == 0 {
            return Err(NewsError::Config("link_cap must be at least 1".into()));
        }
        if let Some(bad) = self.force_hours.iter().find(|h| **h > 23) {
            return Err(NewsError::Config(format!("force hour {bad} is not a valid hour")));
        }
        if self.cadence_hours == 0 {
            return Err(NewsError::Config("cadence_hours must be at least 1".into()));
        }
        self.timezone()?;
        Ok(())
    }

    pub fn timezone(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            NewsError::Config(format!(
                "utc_offset_hours {} is out of range",
                self.utc_offset_hours
            ))
        })
    }

    /// Whether `count` candidates are enough to send at local `hour`.
    pub fn should_send(&self, count: usize, hour: u32) -> bool {
        if self.force_hours.contains(&hour) {
            count >= 1
        } else {
            count >= self.min_send_threshold.max(1)
        }
    }

    pub fn is_cadence_hour(&self, hour: u32) -> bool {
        hour % self.cadence_hours == 0
    }
}

/// Everything a run needs, assembled once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub policy: Policy,
    pub naver_client_id: String,
    pub naver_client_secret: String,
    pub naver_api_base: String,
    pub telegram_bot_token: Option<String>,
    pub telegram_api_base: String,
    pub chat_id: Option<String>,
    pub admin_chat_id: Option<String>,
    pub search_keywords_file: PathBuf,
    pub filter_keywords_file: PathBuf,
    pub exclude_keywords_file: PathBuf,
    pub data_dir: PathBuf,
    pub lock_file: PathBuf,
    pub dry_run: bool,
}

impl Settings {
    pub fn from_cli(cli: &Cli, policy: Policy) -> Result<Self> {
        let naver_client_id = cli
            .naver_client_id
            .clone()
            .ok_or_else(|| NewsError::Config("NAVER_CLIENT_ID is not set".into()))?;
        let naver_client_secret = cli
            .naver_client_secret
            .clone()
            .ok_or_else(|| NewsError::Config("NAVER_CLIENT_SECRET is not set".into()))?;

        for base in [&cli.naver_api_base, &cli.telegram_api_base] {
            url::Url::parse(base)
                .map_err(|e| NewsError::Config(format!("invalid API base {base}: {e}")))?;
        }

        Ok(Self {
            policy,
            naver_client_id,
            naver_client_secret,
            naver_api_base: cli.naver_api_base.trim_end_matches('/').to_string(),
            telegram_bot_token: cli.telegram_bot_token.clone(),
            telegram_api_base: cli.telegram_api_base.trim_end_matches('/').to_string(),
            chat_id: cli.telegram_chat_id.clone(),
            admin_chat_id: cli.admin_chat_id.clone(),
            search_keywords_file: cli.search_keywords.clone(),
            filter_keywords_file: cli.filter_keywords.clone(),
            exclude_keywords_file: cli.exclude_keywords.clone(),
            data_dir: cli.data_dir.clone(),
            lock_file: cli.lock_file.clone(),
            dry_run: cli.dry_run,
        })
    }

    /// Where the active watermark design persists its state.
    pub fn watermark_path(&self) -> PathBuf {
        match self.policy.watermark {
            WatermarkMode::Timestamp => self.data_dir.join("last_checked_time.txt"),
            WatermarkMode::LinkSet => self.data_dir.join("sent_links.json"),
        }
    }

    pub fn send_marker_path(&self) -> PathBuf {
        self.data_dir.join("last_sent_time.txt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_default_policy_is_valid() {
        assert!(Policy::default().validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let policy = Policy::from_yaml("min_send_threshold: 5\nwatermark: link_set\n").unwrap();
        assert_eq!(policy.min_send_threshold, 5);
        assert_eq!(policy.watermark, WatermarkMode::LinkSet);
        assert_eq!(policy.page_size, 30);
        assert_eq!(policy.link_stop, LinkStop::FinishPage);
    }

    #[test]
    fn test_yaml_force_hours_and_link_stop() {
        let yaml = "force_hours: [8, 20]\nlink_stop: stop_scan\n";
        let policy = Policy::from_yaml(yaml).unwrap();
        assert!(policy.force_hours.contains(&8));
        assert!(!policy.force_hours.contains(&0));
        assert_eq!(policy.link_stop, LinkStop::StopScan);
    }

    #[test]
    fn test_invalid_page_size_rejected() {
        assert!(matches!(
            Policy::from_yaml("page_size: 0"),
            Err(NewsError::Config(_))
        ));
        assert!(matches!(
            Policy::from_yaml("page_size: 101"),
            Err(NewsError::Config(_))
        ));
    }

    #[test]
    fn test_start_offset_limit() {
        assert!(Policy::from_yaml("page_size: 100\nmax_pages: 10").is_ok());
        assert!(matches!(
            Policy::from_yaml("page_size: 100\nmax_pages: 11"),
            Err(NewsError::Config(_))
        ));
    }

    #[test]
    fn test_huge_max_pages_is_config_error() {
        assert!(matches!(
            Policy::from_yaml("page_size: 100\nmax_pages: 4294967295"),
            Err(NewsError::Config(_))
        ));
        assert!(matches!(
            Policy::from_yaml("page_size: 1\nmax_pages: 4294967295"),
            Err(NewsError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_force_hour_rejected() {
        assert!(Policy::from_yaml("force_hours: [24]").is_err());
    }

    #[test]
    fn test_bad_yaml_is_yaml_error() {
        assert!(matches!(
            Policy::from_yaml("page_size: [oops"),
            Err(NewsError::Yaml(_))
        ));
    }

    #[test]
    fn test_should_send_threshold_and_force_hours() {
        let policy = Policy::default();
        assert!(policy.should_send(1, 6));
        assert!(!policy.should_send(0, 6));
        assert!(!policy.should_send(2, 7));
        assert!(policy.should_send(3, 7));
    }

    #[test]
    fn test_cadence_hour() {
        let policy = Policy::default();
        assert!(policy.is_cadence_hour(0));
        assert!(policy.is_cadence_hour(14));
        assert!(!policy.is_cadence_hour(13));
    }

    #[test]
    fn test_timezone() {
        let tz = Policy::default().timezone().unwrap();
        assert_eq!(tz.local_minus_utc(), 9 * 3600);
        let bad = Policy {
            utc_offset_hours: 30,
            ..Policy::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_settings_from_cli() {
        let cli = Cli::parse_from([
            "news_relay",
            "--naver-client-id",
            "id",
            "--naver-client-secret",
            "secret",
            "--data-dir",
            "/tmp/relay",
        ]);
        let settings = Settings::from_cli(&cli, Policy::default()).unwrap();
        assert_eq!(settings.naver_client_id, "id");
        assert_eq!(
            settings.watermark_path(),
            PathBuf::from("/tmp/relay/last_checked_time.txt")
        );
        assert_eq!(
            settings.send_marker_path(),
            PathBuf::from("/tmp/relay/last_sent_time.txt")
        );
    }

    #[test]
    fn test_settings_link_set_path() {
        let cli = Cli::parse_from([
            "news_relay",
            "--naver-client-id",
            "id",
            "--naver-client-secret",
            "secret",
            "--data-dir",
            "/tmp/relay",
        ]);
        let policy = Policy {
            watermark: WatermarkMode::LinkSet,
            ..Policy::default()
        };
        let settings = Settings::from_cli(&cli, policy).unwrap();
        assert_eq!(
            settings.watermark_path(),
            PathBuf::from("/tmp/relay/sent_links.json")
        );
    }
}
