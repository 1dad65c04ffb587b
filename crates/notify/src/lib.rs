//! Operator notification channel.
//!
//! Every user-facing event the bot produces goes through [`Notifier`].
//! Delivery is best-effort by contract: a failed notification is logged and
//! swallowed, it never aborts the engine tick that produced it.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

/// Outbound messaging to the bot operator.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Informational message (rule outcomes, lifecycle events).
    async fn send(&self, message: &str);

    /// Error report. Same channel, flagged so the operator can filter.
    async fn report_error(&self, message: &str);
}

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendMessagePayload<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Notifier delivering to a Telegram chat via the bot API.
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: TELEGRAM_API_BASE.to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn deliver(&self, text: &str) {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let payload = SendMessagePayload { chat_id: &self.chat_id, text };
        match self.client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(status = %response.status(), "telegram rejected notification");
            }
            Err(e) => {
                warn!(error = %e, "telegram notification failed");
            }
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) {
        info!(message, "notify");
        self.deliver(message).await;
    }

    async fn report_error(&self, message: &str) {
        error!(message, "notify");
        self.deliver(&format!("ERROR: {message}")).await;
    }
}

/// Notifier that only writes to the process log. Default when no Telegram
/// credentials are configured.
#[derive(Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) {
        info!(message, "notify");
    }

    async fn report_error(&self, message: &str) {
        error!(message, "notify");
    }
}

/// Notifier that records messages in memory, for tests.
#[derive(Default)]
pub struct CapturingNotifier {
    messages: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl CapturingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn send(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }

    async fn report_error(&self, message: &str) {
        self.errors.lock().push(message.to_string());
    }
}
