//! Telegram delivery with exponential backoff retry logic.
//!
//! # Architecture
//!
//! - [`Notifier`]: Core trait for sending one message to one chat
//! - [`TelegramNotifier`]: Bot API `sendMessage` implementation
//! - [`RetryNotify`]: Decorator that adds retry logic to any `Notifier`
//! - [`deliver`]: Splits long texts and reports whether every part went out
//!
//! # Retry Strategy
//!
//! - Configurable attempts (`notify_retries` in the policy)
//! - Exponential backoff starting at 1 second, capped at 30 seconds
//! - Random jitter (0-250ms) added to each delay

use crate::error::{NewsError, Result};
use rand::{Rng, rng};
use reqwest::Client;
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// Telegram rejects messages longer than this.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Sends one HTML-formatted message to one chat.
pub trait Notifier {
    async fn notify(&self, chat_id: &str, text: &str) -> Result<()>;
}

/// Telegram Bot API client.
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl TelegramNotifier {
    pub fn new(api_base: &str, token: Option<String>, timeout: StdDuration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }
}

impl fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("api_base", &self.api_base)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Notifier for TelegramNotifier {
    #[instrument(level = "info", skip_all, fields(%chat_id, chars = text.chars().count()))]
    async fn notify(&self, chat_id: &str, text: &str) -> Result<()> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| NewsError::Config("TELEGRAM_BOT_TOKEN is not set".into()))?;
        let url = format!("{}/bot{}/sendMessage", self.api_base, token);
        let form = [
            ("chat_id", chat_id),
            ("text", text),
            ("parse_mode", "HTML"),
            ("disable_web_page_preview", "true"),
        ];

        let response = self.client.post(url).form(&form).send().await?;
        let status = response.status();
        if status.is_success() {
            info!("Telegram message sent");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(NewsError::Api {
                status: status.as_u16(),
                message: body,
            })
        }
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`Notifier`].
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
///
/// Client errors (4xx other than 429) are not retried: a bad chat id or
/// malformed HTML will not fix itself.
pub struct RetryNotify<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T> RetryNotify<T>
where
    T: Notifier,
{
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetryNotify<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryNotify")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

fn is_retryable(e: &NewsError) -> bool {
    match e {
        NewsError::Api { status, .. } => *status == 429 || *status >= 500,
        NewsError::Network(_) => true,
        _ => false,
    }
}

impl<T> Notifier for RetryNotify<T>
where
    T: Notifier,
{
    #[instrument(level = "info", skip_all, fields(%chat_id))]
    async fn notify(&self, chat_id: &str, text: &str) -> Result<()> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.notify(chat_id, text).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries || !is_retryable(&e) {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "notify() giving up"
                        );
                        return Err(e);
                    }

                    let mut delay = self
                        .base_delay
                        .saturating_mul(1u32 << (attempt - 1).min(16));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "notify() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Split `text` into chunks of at most `limit` characters.
///
/// Splits on line boundaries where possible. A single line longer than the
/// limit is cut on character boundaries, moving each cut back before an
/// unterminated `<tag` or `&entity` so no chunk ends in a partial tag or
/// entity. A `<b>...</b>` pair that straddles a cut is still split across
/// chunks; delivery messages keep their tags on short title lines, so only
/// a single title longer than the limit can hit that.
///
/// # Arguments
///
/// * `text` - The full HTML message
/// * `limit` - Maximum characters per chunk (values below 1 are treated as 1)
///
/// # Returns
///
/// The chunks in order. Empty input yields no chunks.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        let sep = usize::from(!current.is_empty());

        if current_len + sep + line_len <= limit {
            if sep == 1 {
                current.push('\n');
            }
            current.push_str(line);
            current_len += sep + line_len;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len <= limit {
            current.push_str(line);
            current_len = line_len;
        } else {
            let chars: Vec<char> = line.chars().collect();
            let mut rest = chars.as_slice();
            while rest.len() > limit {
                let cut = markup_safe_cut(&rest[..limit]);
                chunks.push(rest[..cut].iter().collect());
                rest = &rest[cut..];
            }
            current = rest.iter().collect();
            current_len = rest.len();
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Length of `window` that avoids ending inside a tag or entity.
fn markup_safe_cut(window: &[char]) -> usize {
    let open = window.iter().rposition(|c| *c == '<' || *c == '&');
    match open {
        Some(at) if at > 0 => {
            let close = if window[at] == '<' { '>' } else { ';' };
            if window[at..].contains(&close) {
                window.len()
            } else {
                at
            }
        }
        _ => window.len(),
    }
}

/// Send `text` to `chat_id`, splitting it to fit Telegram's limit.
///
/// # Arguments
///
/// * `notifier` - Transport, usually a [`RetryNotify`]
/// * `chat_id` - Target chat; `None` or blank is logged and counts as failure
/// * `text` - HTML message body
/// * `label` - Channel name for logs (`main`, `admin`)
///
/// # Returns
///
/// `true` only if every part was accepted. Parts after the first failure
/// are not sent.
#[instrument(level = "info", skip_all, fields(%label))]
pub async fn deliver<N: Notifier>(
    notifier: &N,
    chat_id: Option<&str>,
    text: &str,
    label: &str,
) -> bool {
    let Some(chat_id) = chat_id.filter(|c| !c.trim().is_empty()) else {
        warn!(label, "No chat id configured; message not sent");
        return false;
    };

    let parts = split_message(text, MAX_MESSAGE_CHARS);
    let total = parts.len();
    for (i, part) in parts.iter().enumerate() {
        if let Err(e) = notifier.notify(chat_id, part).await {
            error!(label, part = i + 1, total, error = %e, "Delivery failed");
            return false;
        }
    }
    info!(label, parts = total, "Delivered");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Fails the first `failures` calls with `error`, then succeeds.
    struct FlakyNotifier {
        failures: usize,
        status: u16,
        calls: Mutex<Vec<String>>,
    }

    impl FlakyNotifier {
        fn new(failures: usize, status: u16) -> Self {
            Self {
                failures,
                status,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Notifier for FlakyNotifier {
        async fn notify(&self, _chat_id: &str, text: &str) -> Result<()> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(text.to_string());
            if calls.len() <= self.failures {
                Err(NewsError::Api {
                    status: self.status,
                    message: "nope".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_server_errors() {
        let notifier = RetryNotify::new(FlakyNotifier::new(2, 502), 3, StdDuration::from_millis(1));
        assert!(notifier.notify("chat", "hello").await.is_ok());
        assert_eq!(notifier.inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max() {
        let notifier = RetryNotify::new(FlakyNotifier::new(10, 500), 2, StdDuration::from_millis(1));
        assert!(notifier.notify("chat", "hello").await.is_err());
        assert_eq!(notifier.inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_client_errors_not_retried() {
        let notifier = RetryNotify::new(FlakyNotifier::new(1, 400), 3, StdDuration::from_millis(1));
        assert!(notifier.notify("chat", "hello").await.is_err());
        assert_eq!(notifier.inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_deliver_without_chat_id() {
        let notifier = FlakyNotifier::new(0, 500);
        assert!(!deliver(&notifier, None, "hi", "main").await);
        assert!(!deliver(&notifier, Some("  "), "hi", "main").await);
        assert_eq!(notifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_deliver_splits_long_messages() {
        let notifier = FlakyNotifier::new(0, 500);
        let line = "x".repeat(3000);
        let text = format!("{line}\n{line}");
        assert!(deliver(&notifier, Some("chat"), &text, "main").await);
        assert_eq!(notifier.calls(), 2);
    }

    #[tokio::test]
    async fn test_deliver_reports_failure() {
        let notifier = FlakyNotifier::new(1, 500);
        assert!(!deliver(&notifier, Some("chat"), "hi", "main").await);
    }

    #[test]
    fn test_split_short_message_untouched() {
        assert_eq!(split_message("a\nb", 10), vec!["a\nb".to_string()]);
    }

    #[test]
    fn test_split_on_line_boundaries() {
        let chunks = split_message("aaaa\nbbbb\ncccc", 9);
        assert_eq!(chunks, vec!["aaaa\nbbbb".to_string(), "cccc".to_string()]);
    }

    #[test]
    fn test_split_overlong_line() {
        let chunks = split_message("abcdefg\nhi", 3);
        assert_eq!(
            chunks,
            vec![
                "abc".to_string(),
                "def".to_string(),
                "g".to_string(),
                "hi".to_string()
            ]
        );
    }

    #[test]
    fn test_split_never_cuts_inside_entity_or_tag() {
        assert_eq!(
            split_message("aa&amp;bb", 5),
            vec!["aa".to_string(), "&amp;".to_string(), "bb".to_string()]
        );
        assert_eq!(
            split_message("xyz<b>t</b>", 5),
            vec!["xyz".to_string(), "<b>t".to_string(), "</b>".to_string()]
        );
    }

    #[test]
    fn test_split_counts_characters_not_bytes() {
        let text = "가".repeat(5);
        assert_eq!(split_message(&text, 5), vec![text.clone()]);
    }

    #[test]
    fn test_telegram_notifier_debug_redacts_token() {
        let notifier = TelegramNotifier::new(
            "https://api.telegram.org",
            Some("secret-token".to_string()),
            StdDuration::from_secs(5),
        )
        .unwrap();
        let debug = format!("{notifier:?}");
        assert!(!debug.contains("secret-token"));
    }
}
