//! Terminal-run notification sinks.
//!
//! Every run that reaches a terminal state is reported once through a
//! [`Notifier`]. Delivery failures are reported back to the pipeline,
//! which records them on the notification stage and moves on.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use modelops_platform::http::HttpClient;
use modelops_types::event::RunNotification;
use modelops_types::run::RunStatus;

use crate::error::{Result, ServiceError};

/// A destination for run notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short sink name used in logs (`"webhook"`, `"log"`, ...).
    fn name(&self) -> &str;

    async fn notify(&self, notification: &RunNotification) -> Result<()>;
}

/// POSTs the notification as JSON to a webhook URL.
pub struct WebhookNotifier {
    http: Arc<dyn HttpClient>,
    url: String,
    headers: HashMap<String, String>,
}

impl WebhookNotifier {
    pub fn new(http: Arc<dyn HttpClient>, url: impl Into<String>, headers: HashMap<String, String>) -> Self {
        Self {
            http,
            url: url.into(),
            headers,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, notification: &RunNotification) -> Result<()> {
        let body = serde_json::to_value(notification)?;
        let resp = self
            .http
            .post_json(&self.url, &self.headers, &body)
            .await
            .map_err(|e| ServiceError::NotificationFailed(format!("webhook request failed: {e}")))?;

        if !resp.is_success() {
            return Err(ServiceError::NotificationFailed(format!(
                "webhook returned HTTP {}: {}",
                resp.status,
                resp.snippet()
            )));
        }
        info!(run_id = %notification.run_id, status = resp.status, "webhook notified");
        Ok(())
    }
}

/// Writes the run headline to the tracing log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, notification: &RunNotification) -> Result<()> {
        let headline = notification.summary.headline(notification.status);
        match notification.status {
            RunStatus::Succeeded => info!(run_id = %notification.run_id, "{headline}"),
            _ => warn!(run_id = %notification.run_id, "{headline}"),
        }
        Ok(())
    }
}

/// Forwards notifications to an in-process channel.
pub struct ChannelNotifier {
    tx: mpsc::Sender<RunNotification>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::Sender<RunNotification>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    fn name(&self) -> &str {
        "channel"
    }

    async fn notify(&self, notification: &RunNotification) -> Result<()> {
        self.tx
            .send(notification.clone())
            .await
            .map_err(|_| ServiceError::ChannelClosed)
    }
}

/// Delivers to every sink. Every sink is attempted; the delivery fails,
/// naming each sink that failed, if any of them does. An empty fanout
/// always succeeds.
#[derive(Default)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn notify(&self, notification: &RunNotification) -> Result<()> {
        let mut errors = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.notify(notification).await {
                warn!(run_id = %notification.run_id, sink = sink.name(), error = %e, "notification sink failed");
                errors.push(format!("{}: {e}", sink.name()));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::NotificationFailed(errors.join("; ")))
        }
    }
}
