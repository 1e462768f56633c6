//! Data models for search results, watermarks and per-call diagnostics.
//!
//! This module defines the core data structures used throughout the application:
//! - [`SearchItem`]: One raw item as returned by the news search API
//! - [`SearchResult`]: A cleaned item with a decoded title and normalized publish time
//! - [`Candidate`]: A (title, link) pair that qualified for delivery
//! - [`Watermark`]: The persisted "already processed" marker
//! - [`CallReport`] and [`FetchOutcome`]: What one fetch run hands to the reporting side

use crate::text::{clean_title, parse_pub_date};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// A raw news item as returned by the search API.
///
/// Titles still carry the provider's `<b>` highlighting and HTML entities.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SearchItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default, rename = "originallink")]
    pub original_link: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// RFC 2822 publish date, e.g. `Mon, 06 May 2025 14:30:00 +0900`.
    #[serde(default, rename = "pubDate")]
    pub pub_date: Option<String>,
}

impl SearchItem {
    /// Clean the title and normalize the publish date into `tz`.
    ///
    /// A missing or unparseable date yields `published_at: None`.
    pub fn to_result(&self, tz: &FixedOffset) -> SearchResult {
        SearchResult {
            title: clean_title(&self.title),
            link: self.link.trim().to_string(),
            published_at: self
                .pub_date
                .as_deref()
                .and_then(|raw| parse_pub_date(raw, tz)),
        }
    }
}

/// Body of one search API response page.
#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub items: Vec<SearchItem>,
}

/// A search result ready for classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<FixedOffset>>,
}

/// An article that passed every filter and is queued for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Candidate {
    pub title: String,
    pub link: String,
}

/// Counters for a single page request, in request order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallReport {
    /// 1-based page sequence number.
    pub call_no: u32,
    /// Items the provider returned for this page.
    pub fetched: usize,
    /// Items newer than the watermark (or not yet delivered, in link-set mode).
    pub fresh: usize,
    /// Fresh items that passed the inclusion and exclusion filters.
    pub title_passed: usize,
    /// Fresh items that passed inclusion but hit an exclusion keyword.
    pub excluded: usize,
}

/// Why pagination ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The provider returned an empty page.
    Exhausted,
    /// Transport error or non-success status; the message is for operators.
    ProviderFailure(String),
    /// An already-processed item was seen on the last page.
    BoundaryCrossed,
    /// The page ceiling was reached.
    PageLimit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Exhausted => write!(f, "no more results"),
            StopReason::ProviderFailure(msg) => write!(f, "provider failure: {msg}"),
            StopReason::BoundaryCrossed => write!(f, "reached previously processed articles"),
            StopReason::PageLimit => write!(f, "page limit reached"),
        }
    }
}

/// Everything one run of the fetch loop produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// Qualifying articles in provider order (newest first), unique by link.
    pub candidates: Vec<Candidate>,
    pub reports: Vec<CallReport>,
    pub newest_seen: Option<DateTime<FixedOffset>>,
    pub oldest_seen: Option<DateTime<FixedOffset>>,
    pub stop: StopReason,
}

impl FetchOutcome {
    pub fn total_fetched(&self) -> usize {
        self.reports.iter().map(|r| r.fetched).sum()
    }

    pub fn total_fresh(&self) -> usize {
        self.reports.iter().map(|r| r.fresh).sum()
    }

    pub fn total_excluded(&self) -> usize {
        self.reports.iter().map(|r| r.excluded).sum()
    }
}

/// Bounded, insertion-ordered set of delivered links.
///
/// Once `cap` is exceeded the oldest links are evicted first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSet {
    order: VecDeque<String>,
    index: HashSet<String>,
    cap: usize,
}

impl LinkSet {
    pub fn new(cap: usize) -> Self {
        Self {
            order: VecDeque::new(),
            index: HashSet::new(),
            cap: cap.max(1),
        }
    }

    /// Build from links stored oldest-first, keeping only the newest `cap`.
    pub fn from_links<I>(links: I, cap: usize) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut set = Self::new(cap);
        set.extend(links);
        set
    }

    pub fn contains(&self, link: &str) -> bool {
        self.index.contains(link)
    }

    /// Append a link unless already present. Returns `true` if it was new.
    pub fn insert(&mut self, link: String) -> bool {
        if self.index.contains(&link) {
            return false;
        }
        self.index.insert(link.clone());
        self.order.push_back(link);
        while self.order.len() > self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.index.remove(&evicted);
            }
        }
        true
    }

    pub fn extend<I>(&mut self, links: I)
    where
        I: IntoIterator<Item = String>,
    {
        for link in links {
            self.insert(link);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Links oldest-first, the order they are persisted in.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }
}

/// Persisted marker of what has already been processed.
#[derive(Debug, Clone, PartialEq)]
pub enum Watermark {
    /// Newest publish time confirmed delivered.
    Timestamp(DateTime<FixedOffset>),
    /// Links already delivered.
    Links(LinkSet),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn kst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    #[test]
    fn test_search_response_deserialization() {
        let json = r#"{
            "lastBuildDate": "Mon, 06 May 2025 15:00:00 +0900",
            "total": 2,
            "items": [
                {
                    "title": "<b>Election</b> results &quot;final&quot;",
                    "originallink": "https://news.example.com/1",
                    "link": "https://n.news.naver.com/1",
                    "description": "desc",
                    "pubDate": "Mon, 06 May 2025 14:30:00 +0900"
                },
                { "title": "No date", "link": "https://n.news.naver.com/2" }
            ]
        }"#;

        let resp: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.items.len(), 2);
        assert_eq!(resp.items[0].link, "https://n.news.naver.com/1");
        assert_eq!(
            resp.items[0].original_link.as_deref(),
            Some("https://news.example.com/1")
        );
        assert!(resp.items[1].pub_date.is_none());
    }

    #[test]
    fn test_search_response_without_items() {
        let resp: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.items.is_empty());
    }

    #[test]
    fn test_to_result_cleans_title_and_normalizes_date() {
        let item = SearchItem {
            title: "<b>Election</b> results &quot;final&quot;".to_string(),
            link: "  https://n.news.naver.com/1 ".to_string(),
            pub_date: Some("Mon, 06 May 2025 05:30:00 +0000".to_string()),
            ..Default::default()
        };
        let result = item.to_result(&kst());
        assert_eq!(result.title, "Election results \"final\"");
        assert_eq!(result.link, "https://n.news.naver.com/1");
        assert_eq!(
            result.published_at,
            Some(kst().with_ymd_and_hms(2025, 5, 6, 14, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_to_result_bad_date_is_none() {
        let item = SearchItem {
            title: "x".to_string(),
            link: "l".to_string(),
            pub_date: Some("yesterday-ish".to_string()),
            ..Default::default()
        };
        assert!(item.to_result(&kst()).published_at.is_none());
    }

    #[test]
    fn test_link_set_evicts_oldest() {
        let mut set = LinkSet::new(3);
        for link in ["a", "b", "c", "d"] {
            set.insert(link.to_string());
        }
        assert_eq!(set.len(), 3);
        assert!(!set.contains("a"));
        assert!(set.contains("d"));
        assert_eq!(
            set.iter().cloned().collect::<Vec<_>>(),
            vec!["b".to_string(), "c".to_string(), "d".to_string()]
        );
    }

    #[test]
    fn test_link_set_ignores_duplicates() {
        let mut set = LinkSet::new(2);
        assert!(set.insert("a".to_string()));
        assert!(!set.insert("a".to_string()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_link_set_from_links_keeps_newest() {
        let links = (0..150).map(|i| format!("link-{i}"));
        let set = LinkSet::from_links(links, 100);
        assert_eq!(set.len(), 100);
        assert!(!set.contains("link-49"));
        assert!(set.contains("link-50"));
        assert!(set.contains("link-149"));
    }

    #[test]
    fn test_outcome_totals() {
        let outcome = FetchOutcome {
            candidates: vec![],
            reports: vec![
                CallReport { call_no: 1, fetched: 30, fresh: 30, title_passed: 4, excluded: 1 },
                CallReport { call_no: 2, fetched: 30, fresh: 12, title_passed: 2, excluded: 0 },
            ],
            newest_seen: None,
            oldest_seen: None,
            stop: StopReason::BoundaryCrossed,
        };
        assert_eq!(outcome.total_fetched(), 60);
        assert_eq!(outcome.total_fresh(), 42);
        assert_eq!(outcome.total_excluded(), 1);
    }
}
