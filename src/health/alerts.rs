//! Alert channel dispatch.
//!
//! Channel kinds are a closed enum, so routing an event to a handler is an
//! exhaustive match instead of a string comparison. Delivery is best-effort:
//! one failing channel is logged and never blocks the others.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::AlertChannelConfig;

use super::state::{HealthEvent, Severity};

/// Supported alert channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Chat,
    Pager,
}

#[derive(Debug, Error)]
#[error("alert delivery failed: {0}")]
pub struct AlertError(pub String);

/// Delivers one event to one configured channel.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(
        &self,
        channel: &AlertChannelConfig,
        event: &HealthEvent,
    ) -> Result<(), AlertError>;
}

/// Default sink that writes the event through tracing.
///
/// Stands in for real transports in tests and single-node setups.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn deliver(
        &self,
        channel: &AlertChannelConfig,
        event: &HealthEvent,
    ) -> Result<(), AlertError> {
        info!(
            channel = %channel.name,
            kind = ?channel.kind,
            event = ?event.event_type,
            instance = %event.instance_id,
            message = %event.message,
            "Alert delivered"
        );
        Ok(())
    }
}

/// Fans one event out to every configured channel.
pub struct AlertDispatcher {
    channels: Vec<AlertChannelConfig>,
    email: Arc<dyn AlertSink>,
    chat: Arc<dyn AlertSink>,
    pager: Arc<dyn AlertSink>,
}

impl AlertDispatcher {
    /// Dispatcher with the log sink behind every kind.
    pub fn new(channels: Vec<AlertChannelConfig>) -> Self {
        let log: Arc<dyn AlertSink> = Arc::new(LogAlertSink);
        Self {
            channels,
            email: log.clone(),
            chat: log.clone(),
            pager: log,
        }
    }

    /// Replace the handler for one channel kind.
    pub fn with_sink(mut self, kind: ChannelKind, sink: Arc<dyn AlertSink>) -> Self {
        match kind {
            ChannelKind::Email => self.email = sink,
            ChannelKind::Chat => self.chat = sink,
            ChannelKind::Pager => self.pager = sink,
        }
        self
    }

    fn sink_for(&self, kind: ChannelKind) -> &Arc<dyn AlertSink> {
        match kind {
            ChannelKind::Email => &self.email,
            ChannelKind::Chat => &self.chat,
            ChannelKind::Pager => &self.pager,
        }
    }

    /// Log the event and deliver it to all channels concurrently.
    pub async fn dispatch(&self, event: &HealthEvent) {
        match event.severity {
            Severity::Critical => error!(
                event = ?event.event_type,
                instance = %event.instance_id,
                message = %event.message,
                "Health event"
            ),
            Severity::Warning => warn!(
                event = ?event.event_type,
                instance = %event.instance_id,
                message = %event.message,
                "Health event"
            ),
            Severity::Info => info!(
                event = ?event.event_type,
                instance = %event.instance_id,
                message = %event.message,
                "Health event"
            ),
        }

        let deliveries = self.channels.iter().map(|channel| async move {
            let sink = self.sink_for(channel.kind);
            if let Err(e) = sink.deliver(channel, event).await {
                warn!(channel = %channel.name, error = %e, "Alert delivery failed");
            }
        });
        join_all(deliveries).await;
    }
}
