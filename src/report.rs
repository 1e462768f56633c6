//! Message formatting for the main channel and the admin channel.
//!
//! Everything here is pure string building; delivery lives in
//! [`notify`](crate::notify). Titles are HTML-escaped because messages go out
//! with Telegram's HTML parse mode.
//!
//! # Admin report layout (scheduled run)
//!
//! ```text
//! ✅ Sent [4] (as of 14:00:02 +09:00)
//! (call 1) fresh 30 / fetched 30
//! (call 2) fresh 7 / fetched 30
//! (title passed) sent 4 / fresh 37
//! [05-06(13:58) ~ 05-06(12:01)]
//! stop: reached previously processed articles
//! ```

use crate::models::{Candidate, FetchOutcome};
use crate::text::{escape_html, short_time};
use chrono::{DateTime, FixedOffset};
use itertools::Itertools;

const RULE: &str = "───────────────────────────────";

/// The article list sent to the main channel.
pub fn delivery_message(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. <b>{}</b>\n{}\n", i + 1, escape_html(&c.title), c.link))
        .join("\n")
}

fn numbered(candidates: &[Candidate]) -> impl Iterator<Item = String> + '_ {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. <b>{}</b>\n{}", i + 1, escape_html(&c.title), c.link))
}

fn status_line(sent: bool, count: usize, now: &DateTime<FixedOffset>) -> String {
    let (icon, label) = if sent { ("✅", "Sent") } else { ("⏸️", "Held") };
    format!(
        "{icon} {label} [{count}] (as of {})",
        now.format("%H:%M:%S %:z")
    )
}

fn call_lines(outcome: &FetchOutcome) -> impl Iterator<Item = String> + '_ {
    outcome
        .reports
        .iter()
        .map(|r| format!("(call {}) fresh {} / fetched {}", r.call_no, r.fresh, r.fetched))
}

/// Admin summary after a scheduled run.
pub fn run_report(now: &DateTime<FixedOffset>, sent: bool, outcome: &FetchOutcome) -> String {
    let count = outcome.candidates.len();
    let mut lines = vec![status_line(sent, count, now)];
    lines.extend(call_lines(outcome));
    lines.push(format!(
        "(title passed) sent {count} / fresh {}",
        outcome.total_fresh()
    ));
    lines.push(format!(
        "[{} ~ {}]",
        short_time(outcome.newest_seen.as_ref()),
        short_time(outcome.oldest_seen.as_ref())
    ));
    lines.push(format!("stop: {}", outcome.stop));
    lines.join("\n")
}

/// Admin summary for force and preview runs, with the article lists.
///
/// `excluded` lists new articles dropped by an exclusion keyword.
pub fn review_report(
    now: &DateTime<FixedOffset>,
    sent: bool,
    outcome: &FetchOutcome,
    excluded: &[Candidate],
) -> String {
    let count = outcome.candidates.len();
    let mut lines = vec![status_line(sent, count, now)];
    lines.push(format!(
        "(excluded {}) title passed {count} / fresh {}",
        outcome.total_excluded(),
        outcome.total_fresh()
    ));
    lines.extend(call_lines(outcome));
    lines.push(format!(
        "(newest) {} ~ {}",
        short_time(outcome.newest_seen.as_ref()),
        short_time(outcome.oldest_seen.as_ref())
    ));
    lines.push(format!("stop: {}", outcome.stop));

    if !outcome.candidates.is_empty() {
        lines.push(RULE.to_string());
        lines.push("📌 Passed articles".to_string());
        lines.extend(numbered(&outcome.candidates));
    }

    if !excluded.is_empty() {
        lines.push(RULE.to_string());
        lines.push("🚫 Excluded articles".to_string());
        lines.extend(numbered(excluded));
    }

    lines.join("\n")
}
