//! Run modes: scheduled run, forced send and admin preview.
//!
//! The runner owns the order of side effects. In particular the watermark is
//! only committed after the main channel accepted every part of the message,
//! so an undelivered batch is offered again on the next run.

use crate::config::Settings;
use crate::fetch::fetch_candidates;
use crate::filter::{FilterRules, contains_any};
use crate::lock::{RunLock, SendMarker};
use crate::models::{Candidate, FetchOutcome, Watermark};
use crate::notify::{Notifier, deliver};
use crate::report::{delivery_message, review_report, run_report};
use crate::search::SearchProvider;
use crate::utils::load_keywords;
use crate::watermark::{self, WatermarkStore};
use chrono::{DateTime, FixedOffset, Timelike};
use std::collections::HashSet;
use tracing::{error, info, instrument, warn};

/// Keyword lists for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keywords {
    /// Query terms, joined into one AND query.
    pub search: Vec<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Keywords {
    pub async fn load(settings: &Settings) -> Self {
        Self {
            search: load_keywords(&settings.search_keywords_file).await,
            include: load_keywords(&settings.filter_keywords_file).await,
            exclude: load_keywords(&settings.exclude_keywords_file).await,
        }
    }

    pub fn rules(&self) -> FilterRules {
        FilterRules::new(&self.include, &self.exclude)
    }
}

/// What a bot run did, for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub outcome: FetchOutcome,
    pub should_send: bool,
    pub delivered: bool,
    pub watermark_advanced: bool,
    pub admin_reported: bool,
}

/// Result of a scheduled invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Scheduled {
    Locked,
    RecentlySent,
    OffCadence,
    NoSearchTerms,
    Ran(RunSummary),
}

/// New articles that an exclusion keyword kept out of `found`.
///
/// `unfiltered` comes from a fetch over the same window with no title rules.
pub fn excluded_articles(
    unfiltered: &[Candidate],
    found: &[Candidate],
    exclude: &[String],
) -> Vec<Candidate> {
    if exclude.is_empty() {
        return Vec::new();
    }
    let found_links: HashSet<&str> = found.iter().map(|c| c.link.as_str()).collect();
    unfiltered
        .iter()
        .filter(|c| !found_links.contains(c.link.as_str()))
        .filter(|c| contains_any(&c.title, exclude))
        .cloned()
        .collect()
}

pub struct Runner<'a, P, N, W> {
    settings: &'a Settings,
    provider: P,
    notifier: N,
    store: W,
    marker: SendMarker,
}

impl<'a, P, N, W> Runner<'a, P, N, W>
where
    P: SearchProvider,
    N: Notifier,
    W: WatermarkStore,
{
    pub fn new(settings: &'a Settings, provider: P, notifier: N, store: W) -> Self {
        Self {
            settings,
            provider,
            notifier,
            store,
            marker: SendMarker::new(settings.send_marker_path()),
        }
    }

    async fn admin(&self, text: &str) -> bool {
        deliver(
            &self.notifier,
            self.settings.admin_chat_id.as_deref(),
            text,
            "admin",
        )
        .await
    }

    /// Deliver `outcome` to the main channel and commit the watermark on success.
    async fn send_main(
        &self,
        outcome: &FetchOutcome,
        current: Option<&Watermark>,
    ) -> (bool, bool) {
        if self.settings.dry_run {
            info!("Dry run: main channel delivery skipped");
            return (false, false);
        }
        let message = delivery_message(&outcome.candidates);
        let delivered = deliver(
            &self.notifier,
            self.settings.chat_id.as_deref(),
            &message,
            "main",
        )
        .await;
        if !delivered {
            warn!("Main channel delivery failed; watermark left unchanged");
            return (false, false);
        }
        let advanced =
            watermark::commit(&self.store, current, outcome, &self.settings.policy).await;
        (true, advanced)
    }

    /// Fetch, send if the policy allows, and report to the admin channel.
    ///
    /// The main channel is skipped in dry-run mode. The watermark moves only
    /// when the main channel accepted the whole message.
    ///
    /// # Returns
    ///
    /// A [`RunSummary`] with the fetch outcome and which side effects
    /// happened.
    #[instrument(level = "info", skip_all, fields(now = %now))]
    pub async fn run_bot(&self, keywords: &Keywords, now: DateTime<FixedOffset>) -> RunSummary {
        let policy = &self.settings.policy;
        let current = watermark::load_or_none(&self.store).await;
        let outcome = fetch_candidates(
            &self.provider,
            &keywords.search,
            &keywords.rules(),
            current.as_ref(),
            policy,
        )
        .await;

        let count = outcome.candidates.len();
        let should_send = policy.should_send(count, now.hour());
        info!(count, should_send, hour = now.hour(), "Send decision");

        let (delivered, watermark_advanced) = if should_send && count > 0 {
            self.send_main(&outcome, current.as_ref()).await
        } else {
            (false, false)
        };

        let report = run_report(&now, should_send, &outcome);
        let admin_reported = self.admin(&report).await;

        RunSummary {
            outcome,
            should_send,
            delivered,
            watermark_advanced,
            admin_reported,
        }
    }

    /// Fetch with the real rules, plus an unfiltered pass for the excluded list.
    async fn review_fetch(
        &self,
        keywords: &Keywords,
    ) -> (FetchOutcome, Vec<Candidate>, Option<Watermark>) {
        let policy = &self.settings.policy;
        let rules = keywords.rules();
        let current = watermark::load_or_none(&self.store).await;
        let outcome = fetch_candidates(
            &self.provider,
            &keywords.search,
            &rules,
            current.as_ref(),
            policy,
        )
        .await;

        let excluded = if rules.exclude().is_empty() {
            Vec::new()
        } else {
            let unfiltered = fetch_candidates(
                &self.provider,
                &keywords.search,
                &FilterRules::match_all(),
                current.as_ref(),
                policy,
            )
            .await;
            excluded_articles(&unfiltered.candidates, &outcome.candidates, rules.exclude())
        };

        (outcome, excluded, current)
    }

    /// Send immediately if there is at least one candidate.
    #[instrument(level = "info", skip_all, fields(now = %now))]
    pub async fn force_send(&self, keywords: &Keywords, now: DateTime<FixedOffset>) -> RunSummary {
        let (outcome, excluded, current) = self.review_fetch(keywords).await;
        let should_send = !outcome.candidates.is_empty();

        let (delivered, watermark_advanced) = if should_send {
            self.send_main(&outcome, current.as_ref()).await
        } else {
            info!("Nothing to send");
            (false, false)
        };

        if delivered {
            if let Err(e) = self.marker.mark(now).await {
                warn!(error = %e, "Failed to record send time");
            }
            info!(count = outcome.candidates.len(), "Forced send delivered");
        }

        let report = review_report(&now, delivered, &outcome, &excluded);
        let admin_reported = self.admin(&report).await;

        RunSummary {
            outcome,
            should_send,
            delivered,
            watermark_advanced,
            admin_reported,
        }
    }

    /// Report what would be sent, touching nothing.
    #[instrument(level = "info", skip_all, fields(now = %now))]
    pub async fn preview(&self, keywords: &Keywords, now: DateTime<FixedOffset>) -> RunSummary {
        let (outcome, excluded, _) = self.review_fetch(keywords).await;
        let should_send = !outcome.candidates.is_empty();

        let report = review_report(&now, should_send, &outcome, &excluded);
        let admin_reported = self.admin(&report).await;
        info!(
            passed = outcome.candidates.len(),
            excluded = excluded.len(),
            "Preview reported"
        );

        RunSummary {
            outcome,
            should_send,
            delivered: false,
            watermark_advanced: false,
            admin_reported,
        }
    }

    /// One scheduled invocation: lock, duplicate-run and cadence checks, run.
    ///
    /// The lock is released on every path that acquired it.
    #[instrument(level = "info", skip_all, fields(now = %now))]
    pub async fn scheduled<L: RunLock>(
        &self,
        lock: &L,
        keywords: &Keywords,
        now: DateTime<FixedOffset>,
    ) -> Scheduled {
        match lock.acquire().await {
            Ok(true) => {}
            Ok(false) => return Scheduled::Locked,
            Err(e) => {
                error!(error = %e, "Could not take run lock");
                return Scheduled::Locked;
            }
        }

        let result = self.scheduled_locked(keywords, now).await;

        if let Err(e) = lock.release().await {
            warn!(error = %e, "Failed to release run lock");
        }
        result
    }

    async fn scheduled_locked(&self, keywords: &Keywords, now: DateTime<FixedOffset>) -> Scheduled {
        let policy = &self.settings.policy;

        if self.marker.sent_within(policy.recent_send_minutes, now).await {
            info!("Ran recently; skipping");
            return Scheduled::RecentlySent;
        }
        if !policy.is_cadence_hour(now.hour()) {
            info!(hour = now.hour(), cadence = policy.cadence_hours, "Off-cadence hour; skipping");
            return Scheduled::OffCadence;
        }
        if keywords.search.is_empty() {
            warn!("No search terms configured; skipping");
            return Scheduled::NoSearchTerms;
        }

        let summary = self.run_bot(keywords, now).await;
        if let Err(e) = self.marker.mark(now).await {
            warn!(error = %e, "Failed to record run time");
        }
        Scheduled::Ran(summary)
    }
}
