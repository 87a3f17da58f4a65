//! Claim notifications
//!
//! Delivery is best effort. `NotificationDispatcher` runs each message on a
//! detached task with a bounded number of attempts; a message that still
//! fails is logged and counted, never reported to the claimant.

use crate::chain::truncate_address;
use crate::metrics::Metrics;
use crate::redact::Redacted;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Notification delivery errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Telegram request failed: {0}")]
    Http(String),

    #[error("Telegram API error: {0}")]
    Api(String),
}

/// A channel that can deliver a text message.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

/// Telegram Bot API `sendMessage` client.
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    bot_token: Redacted<String>,
    chat_id: String,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(api_base: &str, bot_token: Redacted<String>, chat_id: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token,
            chat_id,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token.expose());
        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        // The request URL embeds the bot token, so it is stripped from errors.
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.without_url().to_string()))?;

        let status = response.status();
        let body: Option<TelegramResponse> = response.json().await.ok();

        match body {
            Some(body) if status.is_success() && body.ok => Ok(()),
            Some(body) => Err(NotifyError::Api(
                body.description
                    .unwrap_or_else(|| "Unknown error".to_string()),
            )),
            None => Err(NotifyError::Api(format!("unexpected response ({})", status))),
        }
    }
}

/// Details of a completed claim, rendered into the chat message.
#[derive(Debug, Clone)]
pub struct ClaimNotice {
    pub amount: String,
    pub symbol: String,
    pub recipient: String,
    pub tx_hash: String,
    pub explorer_url: String,
    /// Formatted faucet token balance after the transfer, when known
    pub remaining: Option<String>,
}

impl ClaimNotice {
    pub fn render(&self) -> String {
        let mut text = format!(
            "💧 *{} {} Claimed!*\n\n👤 *User:* `{}`\n🔗 [View Transaction]({}/tx/{})",
            self.amount,
            self.symbol,
            truncate_address(&self.recipient),
            self.explorer_url.trim_end_matches('/'),
            self.tx_hash,
        );
        if let Some(remaining) = &self.remaining {
            text.push_str(&format!(
                "\n\n🏦 *Remaining Faucet Balance:* {} {}",
                remaining, self.symbol
            ));
        }
        text
    }
}

/// Message sent by the notification self-test.
pub fn test_message(symbol: &str) -> String {
    format!(
        "🧪 *{} Faucet Bot Test*\n\n✅ Telegram connection working!\n\nTime: {}",
        symbol,
        chrono::Utc::now().to_rfc2822()
    )
}

/// Fire-and-forget delivery with bounded retry.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    max_attempts: u32,
    initial_backoff: Duration,
    metrics: Metrics,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, max_attempts: u32, metrics: Metrics) -> Self {
        Self {
            notifier,
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::from_millis(500),
            metrics,
        }
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Send `text`, retrying with exponential backoff. Returns whether the
    /// message was delivered.
    pub async fn deliver(&self, text: &str) -> bool {
        for attempt in 1..=self.max_attempts {
            match self.notifier.send(text).await {
                Ok(()) => {
                    debug!(attempt, "Notification delivered");
                    return true;
                }
                Err(e) if attempt < self.max_attempts => {
                    let backoff = self.backoff_for_attempt(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "Notification failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        attempts = self.max_attempts,
                        "Notification dropped"
                    );
                }
            }
        }
        self.metrics.notifications_failed_total.inc();
        false
    }

    /// Build the message on a detached task, then deliver it.
    pub fn spawn<F>(&self, message: F) -> JoinHandle<bool>
    where
        F: Future<Output = String> + Send + 'static,
    {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let text = message.await;
            dispatcher.deliver(&text).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Request, Json, Router};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` sends, then succeeds.
    struct FlakyNotifier {
        failures: u32,
        calls: AtomicU32,
        sent: Mutex<Vec<String>>,
    }

    impl FlakyNotifier {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn send(&self, text: &str) -> Result<(), NotifyError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(NotifyError::Api("Too Many Requests".to_string()));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn dispatcher(notifier: Arc<FlakyNotifier>, metrics: Metrics) -> NotificationDispatcher {
        NotificationDispatcher::new(notifier, 3, metrics)
            .with_initial_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_dispatcher_retries_until_delivered() {
        let notifier = Arc::new(FlakyNotifier::new(2));
        let metrics = Metrics::new();
        let delivered = dispatcher(notifier.clone(), metrics.clone())
            .spawn(async { "hello".to_string() })
            .await
            .unwrap();

        assert!(delivered);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(*notifier.sent.lock().unwrap(), vec!["hello".to_string()]);
        assert_eq!(metrics.notifications_failed_total.get(), 0);
    }

    #[tokio::test]
    async fn test_dispatcher_gives_up_after_max_attempts() {
        let notifier = Arc::new(FlakyNotifier::new(10));
        let metrics = Metrics::new();
        let delivered = dispatcher(notifier.clone(), metrics.clone())
            .deliver("hello")
            .await;

        assert!(!delivered);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.notifications_failed_total.get(), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let dispatcher = NotificationDispatcher::new(
            Arc::new(FlakyNotifier::new(0)),
            3,
            Metrics::new(),
        );
        assert_eq!(dispatcher.backoff_for_attempt(1), Duration::from_millis(500));
        assert_eq!(dispatcher.backoff_for_attempt(2), Duration::from_millis(1000));
    }

    #[test]
    fn test_claim_notice_rendering() {
        let notice = ClaimNotice {
            amount: "50,000".to_string(),
            symbol: "ZEUS".to_string(),
            recipient: "0x66e97838a985cf070b9f955c4025f1c7825de44f".to_string(),
            tx_hash: "0xabc".to_string(),
            explorer_url: "https://blockscout.com/etc/mainnet/".to_string(),
            remaining: Some("845,000.00".to_string()),
        };
        let text = notice.render();
        assert!(text.contains("50,000 ZEUS Claimed!"));
        assert!(text.contains("`0x66e9...e44f`"));
        assert!(text.contains("(https://blockscout.com/etc/mainnet/tx/0xabc)"));
        assert!(text.contains("845,000.00 ZEUS"));

        let text = ClaimNotice {
            remaining: None,
            ..notice
        }
        .render();
        assert!(!text.contains("Remaining"));
    }

    async fn fake_telegram(reply: serde_json::Value) -> (String, Arc<Mutex<Vec<(String, serde_json::Value)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();
        let app = Router::new().fallback(move |request: Request| {
            let recorded = recorded.clone();
            let reply = reply.clone();
            async move {
                let path = request.uri().path().to_string();
                let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
                    .await
                    .unwrap();
                let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
                recorded.lock().unwrap().push((path, body));
                Json(reply)
            }
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), seen)
    }

    #[tokio::test]
    async fn test_telegram_notifier_posts_markdown_message() {
        let (base, seen) = fake_telegram(json!({"ok": true, "result": {}})).await;
        let notifier = TelegramNotifier::new(&base, Redacted("123:abc".to_string()), "-1001".to_string());

        notifier.send("*hi*").await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "/bot123:abc/sendMessage");
        assert_eq!(seen[0].1["chat_id"], "-1001");
        assert_eq!(seen[0].1["text"], "*hi*");
        assert_eq!(seen[0].1["parse_mode"], "Markdown");
    }

    #[tokio::test]
    async fn test_telegram_notifier_surfaces_api_description() {
        let (base, _) = fake_telegram(json!({"ok": false, "description": "Bad Request: chat not found"})).await;
        let notifier = TelegramNotifier::new(&base, Redacted("123:abc".to_string()), "-1".to_string());

        let err = notifier.send("hi").await.unwrap_err();
        assert_eq!(err, NotifyError::Api("Bad Request: chat not found".to_string()));
        assert_eq!(err.to_string(), "Telegram API error: Bad Request: chat not found");
    }
}
