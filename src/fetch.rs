//! The incremental search-and-filter loop.
//!
//! Pages through newest-first search results, drops anything the watermark
//! says was already handled, applies the title rules and stops at the first
//! page that reaches already-processed territory.
//!
//! # Termination
//!
//! | Condition | [`StopReason`] |
//! |-----------|----------------|
//! | Provider returned an empty page | `Exhausted` |
//! | Transport error or non-success status | `ProviderFailure` |
//! | A page contained an already-processed item | `BoundaryCrossed` |
//! | `max_pages` pages fetched | `PageLimit` |
//!
//! None of these is an error for the caller: whatever was gathered before
//! the stop is returned.
//!
//! # Boundary handling
//!
//! In timestamp mode a page that contains an item at or before the watermark
//! is still scanned to the end, since the provider's date sort is not strict.
//! Paging stops after that page. In link-set mode the same applies with
//! [`LinkStop::FinishPage`]; [`LinkStop::StopScan`] abandons the page at the
//! first delivered link.

use crate::config::{LinkStop, Policy, WatermarkMode};
use crate::filter::{FilterRules, Verdict};
use crate::models::{CallReport, Candidate, FetchOutcome, StopReason, Watermark};
use crate::search::{PageRequest, SearchProvider};
use chrono::{Offset, Utc};
use itertools::{Itertools, MinMaxResult};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

/// Run one incremental fetch.
///
/// `watermark` is read once here and never written; advancing it after a
/// confirmed delivery is the caller's job.
///
/// # Arguments
///
/// * `provider` - Search backend, queried one page at a time
/// * `query_terms` - Terms joined with spaces into one AND query
/// * `rules` - Title inclusion/exclusion rules
/// * `watermark` - What earlier runs already delivered, if anything
/// * `policy` - Page size, page budget, watermark mode and timezone
///
/// # Returns
///
/// A [`FetchOutcome`] with the candidates in provider order, one
/// [`CallReport`] per processed page, the publish-time range of fresh items
/// and the reason paging stopped. Provider failures end up in
/// [`StopReason::ProviderFailure`] rather than an `Err`.
#[instrument(level = "info", skip_all, fields(terms = ?query_terms))]
pub async fn fetch_candidates<P: SearchProvider>(
    provider: &P,
    query_terms: &[String],
    rules: &FilterRules,
    watermark: Option<&Watermark>,
    policy: &Policy,
) -> FetchOutcome {
    let tz = policy.timezone().unwrap_or_else(|_| Utc.fix());
    let cutoff = match watermark {
        Some(Watermark::Timestamp(ts)) => Some(*ts),
        _ => None,
    };
    let delivered = match watermark {
        Some(Watermark::Links(set)) if !set.is_empty() => Some(set),
        _ => None,
    };

    let query = query_terms.join(" ");
    let encoded_query = urlencoding::encode(&query).into_owned();

    let mut seen_links: HashSet<String> = HashSet::new();
    let mut candidates = Vec::new();
    let mut reports = Vec::new();
    let mut published = Vec::new();
    let mut stop = StopReason::PageLimit;

    for call_no in 1..=policy.max_pages {
        let request = PageRequest {
            encoded_query: &encoded_query,
            display: policy.page_size,
            start: (call_no - 1).saturating_mul(policy.page_size).saturating_add(1),
        };

        let items = match provider.search_page(&request).await {
            Ok(items) => items,
            Err(e) => {
                warn!(call_no, start = request.start, error = %e, "Search call failed; ending pagination");
                stop = StopReason::ProviderFailure(e.to_string());
                break;
            }
        };

        let mut report = CallReport {
            call_no,
            fetched: items.len(),
            ..CallReport::default()
        };

        if items.is_empty() {
            reports.push(report);
            stop = StopReason::Exhausted;
            break;
        }

        let mut boundary_crossed = false;
        for item in &items {
            let result = item.to_result(&tz);
            if !seen_links.insert(result.link.clone()) {
                debug!(link = %result.link, "Duplicate link within run");
                continue;
            }

            match policy.watermark {
                WatermarkMode::Timestamp => {
                    let Some(published_at) = result.published_at else {
                        debug!(link = %result.link, "Missing or unparseable publish date; skipping");
                        continue;
                    };
                    if cutoff.is_some_and(|cutoff| published_at <= cutoff) {
                        boundary_crossed = true;
                        continue;
                    }
                }
                WatermarkMode::LinkSet => {
                    if delivered.is_some_and(|set| set.contains(&result.link)) {
                        boundary_crossed = true;
                        match policy.link_stop {
                            LinkStop::StopScan => break,
                            LinkStop::FinishPage => continue,
                        }
                    }
                }
            }

            report.fresh += 1;
            if let Some(ts) = result.published_at {
                published.push(ts);
            }

            match rules.classify(&result.title) {
                Verdict::Passed => {
                    report.title_passed += 1;
                    candidates.push(Candidate {
                        title: result.title,
                        link: result.link,
                    });
                }
                Verdict::Excluded => report.excluded += 1,
                Verdict::NotIncluded => {}
            }
        }

        info!(
            call_no,
            fetched = report.fetched,
            fresh = report.fresh,
            title_passed = report.title_passed,
            excluded = report.excluded,
            "Processed search page"
        );
        reports.push(report);

        if boundary_crossed {
            info!(call_no, "Reached previously processed articles; stopping");
            stop = StopReason::BoundaryCrossed;
            break;
        }
    }

    let (newest_seen, oldest_seen) = match published.iter().minmax() {
        MinMaxResult::NoElements => (None, None),
        MinMaxResult::OneElement(ts) => (Some(*ts), Some(*ts)),
        MinMaxResult::MinMax(oldest, newest) => (Some(*newest), Some(*oldest)),
    };

    info!(
        candidates = candidates.len(),
        calls = reports.len(),
        %stop,
        "Fetch complete"
    );

    FetchOutcome {
        candidates,
        reports,
        newest_seen,
        oldest_seen,
        stop,
    }
}
