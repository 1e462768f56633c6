//! Command-line interface definitions for the news relay.
//!
//! Credentials and chat identifiers are usually supplied through environment
//! variables; every option can also be given as a flag.

use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;

/// What a single invocation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Scheduled run: honours the lock, cadence and send threshold.
    Run,
    /// Send now if there is at least one new article, then report.
    Force,
    /// Report to the admin channel only; nothing is delivered or recorded.
    Preview,
}

/// Command-line arguments for the news relay.
///
/// # Examples
///
/// ```sh
/// # Scheduled run (e.g. from cron every hour)
/// news_relay --data-dir /data
///
/// # Admin preview with a custom policy
/// news_relay --mode preview --policy policy.yaml
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = Mode::Run)]
    pub mode: Mode,

    /// Optional path to a YAML policy file
    #[arg(short, long)]
    pub policy: Option<PathBuf>,

    /// Directory for watermark and send-time records
    #[arg(long, env = "PERSISTENT_MOUNT", default_value = "/data")]
    pub data_dir: PathBuf,

    /// Lock file guarding against concurrent runs
    #[arg(long, default_value = "/tmp/news_relay.lock")]
    pub lock_file: PathBuf,

    /// Search query terms, one per line (joined into an AND query)
    #[arg(long, default_value = "search_keywords.txt")]
    pub search_keywords: PathBuf,

    /// Title inclusion keywords, one per line
    #[arg(long, default_value = "filter_keywords.txt")]
    pub filter_keywords: PathBuf,

    /// Title exclusion keywords, one per line
    #[arg(long, default_value = "exclude_keywords.txt")]
    pub exclude_keywords: PathBuf,

    /// Skip delivery to the main channel (admin report is still sent)
    #[arg(
        long,
        env = "TEST_MODE",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    pub dry_run: bool,

    /// Naver Open API client id
    #[arg(long, env = "NAVER_CLIENT_ID")]
    pub naver_client_id: Option<String>,

    /// Naver Open API client secret
    #[arg(long, env = "NAVER_CLIENT_SECRET", hide_env_values = true)]
    pub naver_client_secret: Option<String>,

    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// Chat id of the main delivery channel
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,

    /// Chat id of the admin report channel
    #[arg(long, env = "ADMIN_CHAT_ID")]
    pub admin_chat_id: Option<String>,

    #[arg(long, env = "NAVER_API_BASE", default_value = "https://openapi.naver.com")]
    pub naver_api_base: String,

    #[arg(long, env = "TELEGRAM_API_BASE", default_value = "https://api.telegram.org")]
    pub telegram_api_base: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["news_relay"]);
        assert_eq!(cli.mode, Mode::Run);
        assert_eq!(cli.lock_file, PathBuf::from("/tmp/news_relay.lock"));
        assert_eq!(cli.search_keywords, PathBuf::from("search_keywords.txt"));
        assert!(cli.policy.is_none());
    }

    #[test]
    fn test_cli_mode_and_paths() {
        let cli = Cli::parse_from([
            "news_relay",
            "--mode",
            "preview",
            "-p",
            "/etc/relay/policy.yaml",
            "--data-dir",
            "/tmp/data",
        ]);

        assert_eq!(cli.mode, Mode::Preview);
        assert_eq!(cli.policy, Some(PathBuf::from("/etc/relay/policy.yaml")));
        assert_eq!(cli.data_dir, PathBuf::from("/tmp/data"));
    }

    #[test]
    fn test_cli_force_with_dry_run() {
        let cli = Cli::parse_from(["news_relay", "--mode", "force", "--dry-run"]);
        assert_eq!(cli.mode, Mode::Force);
        assert!(cli.dry_run);
    }
}
