#[cfg(test)]
use std::sync::Mutex;

use serde::Serialize;
use tracing::{debug, warn};

/// Out-of-band channel for one-time codes.
///
/// `deliver` must not block: implementations hand the message off and return.
/// Failures are theirs to log; the login flow never sees them.
pub trait CodeDelivery: Send + Sync {
    fn deliver(&self, chat_id: &str, text: String);
}

#[derive(Debug, Serialize)]
struct SendMessage {
    chat_id: String,
    text: String,
}

/// Sends messages through the Bale Bot API (`POST /bot<token>/sendMessage`).
pub struct BaleBot {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl BaleBot {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn send_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.token)
    }
}

impl CodeDelivery for BaleBot {
    fn deliver(&self, chat_id: &str, text: String) {
        let client = self.client.clone();
        let url = self.send_url();
        let payload = SendMessage {
            chat_id: chat_id.to_string(),
            text,
        };

        // Fire-and-forget; not retried.
        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("Bale delivery to chat {} accepted", payload.chat_id);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        "Bale delivery to chat {} rejected: {} {}",
                        payload.chat_id, status, body
                    );
                }
                Err(e) => {
                    // reqwest errors carry the URL, which contains the bot token
                    warn!(
                        "Bale delivery to chat {} failed: {}",
                        payload.chat_id,
                        e.without_url()
                    );
                }
            }
        });
    }
}

/// Used when no bot token is configured: the code is dropped with a warning.
pub struct DisabledDelivery;

impl CodeDelivery for DisabledDelivery {
    fn deliver(&self, chat_id: &str, _text: String) {
        warn!("No bot token configured, code for chat {} not delivered", chat_id);
    }
}

/// Keeps every message in memory instead of sending it.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingDelivery {
    sent: Mutex<Vec<(String, String)>>,
}

#[cfg(test)]
impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(chat_id, text)` pairs in delivery order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// The six-digit code from the most recent message.
    pub fn last_code(&self) -> Option<String> {
        let sent = self.sent();
        let (_, text) = sent.last()?;
        text.split(|c: char| !c.is_ascii_digit())
            .find(|word| word.len() == 6)
            .map(str::to_string)
    }
}

#[cfg(test)]
impl CodeDelivery for RecordingDelivery {
    fn deliver(&self, chat_id: &str, text: String) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((chat_id.to_string(), text));
        }
    }
}
