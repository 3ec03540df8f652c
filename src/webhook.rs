//! Outbound webhook dispatcher collaborator. Grounded on
//! `internal/webhook/dispatcher.go`: a buffered queue drained by one
//! background worker, non-blocking `dispatch` that drops events rather
//! than back-pressuring callers when the queue is full.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

const QUEUE_CAPACITY: usize = 1000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
struct EventPayload<T: Serialize> {
    event: String,
    timestamp_us: i64,
    payload: T,
}

pub struct WebhookDispatcher {
    sender: Option<mpsc::Sender<(String, serde_json::Value)>>,
}

impl WebhookDispatcher {
    /// `url` empty disables dispatch entirely; `dispatch` then becomes a
    /// no-op, matching the Go original's "return a Dispatcher that
    /// basically no-ops safely".
    pub fn new(url: Option<String>) -> Self {
        let Some(url) = url.filter(|u| !u.is_empty()) else {
            return Self { sender: None };
        };

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(Self::worker(url, rx));
        Self { sender: Some(tx) }
    }

    /// Non-blocking. If the queue is full the event is dropped and a
    /// warning is logged; server stability takes priority over webhook
    /// delivery.
    pub fn dispatch(&self, event: &str, payload: impl Serialize) {
        let Some(sender) = &self.sender else {
            return;
        };
        let value = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "webhook_marshal_failed");
                return;
            }
        };
        if sender.try_send((event.to_string(), value)).is_err() {
            tracing::warn!(event, "webhook_queue_full");
        }
    }

    async fn worker(url: String, mut rx: mpsc::Receiver<(String, serde_json::Value)>) {
        let client = match reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "webhook_client_build_failed");
                return;
            }
        };

        while let Some((event, payload)) = rx.recv().await {
            let timestamp_us = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_micros() as i64)
                .unwrap_or_default();
            let body = EventPayload {
                event: event.clone(),
                timestamp_us,
                payload,
            };
            match client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_client_error() || resp.status().is_server_error() => {
                    tracing::warn!(status = %resp.status(), "webhook_returned_error");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "webhook_send_failed"),
            }
        }
    }
}
