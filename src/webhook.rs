//! # Webhook Delivery
//!
//! Outbound notification queue drained on a scheduler-driven interval.
//!
//! Messages are JSON payloads POSTed to a configured URL. Delivery is
//! at-most-once per drain pass and deliberately conservative about the
//! queue head: a busy endpoint (429/504) keeps the task queued for the
//! next pass, any other failure drops it with a full diagnostic so one
//! poisoned payload cannot wedge the queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;
use tracing::{debug, error, warn};

use crate::config::WebhookConfig;
use crate::scheduler::Scheduler;

/// What to do with the queue head after a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Delivered,
    Retry,
    Drop,
}

fn classify_response(status: u16) -> Delivery {
    match status {
        429 | 504 => Delivery::Retry,
        code if code >= 300 => Delivery::Drop,
        _ => Delivery::Delivered,
    }
}

#[derive(Debug, Clone)]
struct WebhookTask {
    payload: String,
    url: String,
}

struct Inner {
    queue: Mutex<VecDeque<WebhookTask>>,
    client: reqwest::Client,
    config: WebhookConfig,
}

/// Shared webhook queue; clone freely, all clones feed one queue.
#[derive(Clone)]
pub struct Webhook {
    inner: Arc<Inner>,
}

impl Webhook {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                client: reqwest::Client::new(),
                config,
            }),
        }
    }

    /// Begin the periodic drain. Each pass sends at most the queue head,
    /// then re-arms itself for the configured interval.
    pub fn start(&self, scheduler: &Scheduler) {
        Self::arm(Arc::clone(&self.inner), scheduler.clone());
    }

    fn arm(inner: Arc<Inner>, scheduler: Scheduler) {
        let interval = inner.config.interval;
        scheduler.clone().schedule(interval, move || {
            let worker = Arc::clone(&inner);
            tokio::spawn(async move { Inner::send_pending(worker).await });
            Self::arm(inner, scheduler.clone());
        });
    }

    /// Queue an embed-style message. An empty URL falls back to the
    /// configured one; messages with no destination or no content are
    /// dropped silently, matching the fire-and-forget contract.
    pub fn send_message(&self, title: &str, message: &str, color: Option<u32>) {
        let url = self.inner.config.url.clone();
        if url.is_empty() || title.is_empty() || message.is_empty() {
            return;
        }
        self.send_payload(self.build_embed_payload(title, message, color), url);
    }

    /// Queue a plain-content message.
    pub fn send_plain(&self, message: &str) {
        let url = self.inner.config.url.clone();
        if url.is_empty() || message.is_empty() {
            return;
        }
        self.send_payload(self.build_plain_payload(message), url);
    }

    /// Queue a prebuilt payload for an explicit URL.
    pub fn send_payload(&self, payload: String, url: String) {
        self.inner
            .queue
            .lock()
            .expect("webhook queue poisoned")
            .push_back(WebhookTask { payload, url });
    }

    pub fn queued_count(&self) -> usize {
        self.inner
            .queue
            .lock()
            .expect("webhook queue poisoned")
            .len()
    }

    fn build_embed_payload(&self, title: &str, message: &str, color: Option<u32>) -> String {
        let mut embed = json!({
            "title": title,
            "description": message,
        });
        if self.inner.config.send_footer {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            embed["footer"] = json!({
                "text": format!("{} | {}", self.inner.config.server_name, now),
            });
        }
        if let Some(color) = color {
            embed["color"] = json!(color);
        }
        json!({ "embeds": [embed] }).to_string()
    }

    fn build_plain_payload(&self, message: &str) -> String {
        json!({ "content": message }).to_string()
    }
}

impl Inner {
    async fn send_pending(inner: Arc<Inner>) {
        let task = {
            let queue = inner.queue.lock().expect("webhook queue poisoned");
            queue.front().cloned()
        };
        let Some(task) = task else {
            return;
        };

        let response = inner
            .client
            .post(&task.url)
            .header("content-type", "application/json")
            .header("accept", "application/json")
            .body(task.payload.clone())
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                // transport failure: leave the task queued for the next pass
                error!(url = %task.url, error = %e, "failed to send webhook message");
                return;
            }
        };

        let status = response.status().as_u16();
        match classify_response(status) {
            Delivery::Retry => {
                warn!(status, "webhook endpoint returned {status}, re-queueing task");
            }
            Delivery::Drop => {
                let body = response.text().await.unwrap_or_default();
                error!(
                    status,
                    response_body = %body,
                    request_body = %task.payload,
                    "failed to send webhook message"
                );
                inner.pop_front();
            }
            Delivery::Delivered => {
                debug!(url = %task.url, "webhook delivered");
                inner.pop_front();
            }
        }
    }

    fn pop_front(&self) {
        self.queue
            .lock()
            .expect("webhook queue poisoned")
            .pop_front();
    }
}
