//! # News Relay
//!
//! Polls the Naver News search API for a fixed AND query, keeps the articles
//! whose titles match the configured keywords and relays the new ones to a
//! Telegram channel. Every run also posts a summary to an admin channel.
//!
//! ## Usage
//!
//! ```sh
//! # Scheduled run, typically from cron every hour
//! news_relay --data-dir /data
//!
//! # Send right away, or only preview to the admin channel
//! news_relay --mode force
//! news_relay --mode preview
//! ```
//!
//! ## Architecture
//!
//! 1. **Guarding**: Run lock, recent-send marker and cadence hour (scheduled mode)
//! 2. **Fetching**: Page through newest-first results until already-processed
//!    articles show up or the page budget is spent
//! 3. **Filtering**: Title inclusion/exclusion keywords, dedup by link
//! 4. **Delivery**: Main channel when the send policy allows; the watermark
//!    only moves after Telegram accepted the message
//! 5. **Reporting**: Per-call counters and publish-time range to the admin channel

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod error;
mod fetch;
mod filter;
mod lock;
mod models;
mod notify;
mod report;
mod runner;
mod search;
mod text;
mod utils;
mod watermark;

use cli::{Cli, Mode};
use config::{Policy, Settings};
use lock::FileRunLock;
use notify::{RetryNotify, TelegramNotifier};
use runner::{Keywords, Runner, Scheduled};
use search::NaverNewsClient;
use utils::ensure_writable_dir;
use watermark::FileStore;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "news_relay starting up");

    let args = Cli::parse();
    debug!(mode = ?args.mode, data_dir = %args.data_dir.display(), "Parsed CLI arguments");

    let policy = Policy::load(args.policy.as_deref()).await.inspect_err(|e| {
        error!(error = %e, "Invalid policy");
    })?;
    let settings = Settings::from_cli(&args, policy).inspect_err(|e| {
        error!(error = %e, "Invalid configuration");
    })?;

    if let Err(e) = ensure_writable_dir(&settings.data_dir).await {
        error!(
            path = %settings.data_dir.display(),
            error = %e,
            "Data directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let tz = settings.policy.timezone()?;
    let now = Utc::now().with_timezone(&tz);
    info!(%now, mode = ?args.mode, "Run starting");

    let keywords = Keywords::load(&settings).await;
    let timeout = Duration::from_secs(settings.policy.request_timeout_secs);
    let provider = NaverNewsClient::new(&settings)?;
    let notifier = RetryNotify::new(
        TelegramNotifier::new(
            &settings.telegram_api_base,
            settings.telegram_bot_token.clone(),
            timeout,
        )?,
        settings.policy.notify_retries,
        Duration::from_secs(1),
    );
    let store = FileStore::for_policy(&settings.policy, settings.watermark_path());
    let runner = Runner::new(&settings, provider, notifier, store);

    match args.mode {
        Mode::Run => {
            let lock = FileRunLock::new(
                &settings.lock_file,
                Duration::from_secs(settings.policy.lock_stale_secs),
            );
            match runner.scheduled(&lock, &keywords, now).await {
                Scheduled::Ran(summary) => info!(
                    candidates = summary.outcome.candidates.len(),
                    delivered = summary.delivered,
                    watermark_advanced = summary.watermark_advanced,
                    "Scheduled run finished"
                ),
                skipped => info!(reason = ?skipped, "Scheduled run skipped"),
            }
        }
        Mode::Force => {
            let summary = runner.force_send(&keywords, now).await;
            info!(
                candidates = summary.outcome.candidates.len(),
                delivered = summary.delivered,
                "Forced send finished"
            );
        }
        Mode::Preview => {
            let summary = runner.preview(&keywords, now).await;
            info!(
                candidates = summary.outcome.candidates.len(),
                admin_reported = summary.admin_reported,
                "Preview finished"
            );
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}
