//! Bridges engine events to the alert webhook.
//!
//! `EngineReporter::report` is synchronous while webhook delivery is
//! async, so messages are handed to a background drain task over an
//! unbounded channel. Delivery stays best-effort either way.

use magpie_client::alert::WebhookAlerter;
use magpie_core::events::{EngineEvent, EngineReporter, TracingReporter};
use tokio::sync::mpsc;

pub struct AlertingReporter {
    heading: String,
    tx: mpsc::UnboundedSender<String>,
}

impl AlertingReporter {
    /// Launch the drain task and return the reporter. Without a webhook
    /// the messages are only logged.
    pub fn spawn(heading: impl Into<String>, alerter: Option<WebhookAlerter>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match &alerter {
                    Some(alerter) => alerter.notify(&message).await,
                    None => tracing::warn!(%message, "Alert (no webhook configured)"),
                }
            }
        });
        Self {
            heading: heading.into(),
            tx,
        }
    }

    fn send(&self, body: String) {
        // Drain task gone means shutdown is already underway.
        let _ = self.tx.send(format!("{} {}", self.heading, body));
    }
}

impl EngineReporter for AlertingReporter {
    fn report(&self, event: EngineEvent<'_>) {
        match &event {
            EngineEvent::Fatal { worker, error } => {
                self.send(format!(
                    "Fatal error on worker {worker}: {error}. Stopping all workers."
                ));
            }
            EngineEvent::WorkerRestarted { worker, error } => {
                self.send(format!("Worker {worker} died: {error}. Restarting."));
            }
            _ => {}
        }
        TracingReporter.report(event);
    }
}
