//! News search provider abstraction and the Naver News client.
//!
//! The fetch loop only depends on the [`SearchProvider`] trait, so tests can
//! drive it with canned pages while production uses [`NaverNewsClient`].

use crate::config::Settings;
use crate::error::{NewsError, Result};
use crate::models::{SearchItem, SearchResponse};
use crate::text::truncate_for_log;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; news_relay/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// One page request, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest<'a> {
    /// Query string, already URL-encoded.
    pub encoded_query: &'a str,
    /// Page size.
    pub display: u32,
    /// 1-based offset of the first item.
    pub start: u32,
}

/// A paged, date-sorted keyword search endpoint.
pub trait SearchProvider {
    /// Fetch one page of results sorted newest-first.
    ///
    /// Transport failures and non-success statuses are errors; an exhausted
    /// result set is an empty `Vec`.
    async fn search_page(&self, request: &PageRequest<'_>) -> Result<Vec<SearchItem>>;
}

/// Client for the Naver Open API news search.
#[derive(Debug, Clone)]
pub struct NaverNewsClient {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl NaverNewsClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.policy.request_timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: settings.naver_api_base.clone(),
            client_id: settings.naver_client_id.clone(),
            client_secret: settings.naver_client_secret.clone(),
        })
    }

    fn page_url(&self, request: &PageRequest<'_>) -> String {
        format!(
            "{}/v1/search/news.json?query={}&display={}&start={}&sort=date",
            self.base_url, request.encoded_query, request.display, request.start
        )
    }
}

impl SearchProvider for NaverNewsClient {
    #[instrument(level = "info", skip_all, fields(start = request.start, display = request.display))]
    async fn search_page(&self, request: &PageRequest<'_>) -> Result<Vec<SearchItem>> {
        let t0 = Instant::now();
        let response = self
            .client
            .get(self.page_url(request))
            .header("X-Naver-Client-Id", &self.client_id)
            .header("X-Naver-Client-Secret", &self.client_secret)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                body = %truncate_for_log(&body, 300),
                "Search request rejected"
            );
            return Err(NewsError::Api {
                status: status.as_u16(),
                message: truncate_for_log(&body, 300),
            });
        }

        let page: SearchResponse = response.json().await?;
        debug!(
            items = page.items.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched search page"
        );
        Ok(page.items)
    }
}
