use anyhow::{Result, anyhow};
use reqwest::Client;
use tracing::{info, warn};

use crate::flow::{FlowVariant, MonitorResult};

/// Pushes human-readable alerts over ntfy: POST the body to
/// `{endpoint}/{topic}` with the title in a `Title` header. Single shot,
/// no retry; delivery failure is logged and swallowed so it can never be
/// mistaken for a monitoring failure.
pub struct Notifier {
    client: Client,
    endpoint: String,
    topic: String,
}

impl Notifier {
    pub fn new(endpoint: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            topic: topic.into(),
        }
    }

    /// Announce the run's result. A `NoSlots` reached through the
    /// early-exit probe is a non-event and sends nothing.
    pub async fn announce(&self, result: &MonitorResult, variant: FlowVariant) {
        let Some((title, body)) = message_for(result, variant) else {
            info!("nothing to announce for this outcome");
            return;
        };

        match self.send(&title, &body).await {
            Ok(()) => info!(%title, "notification sent"),
            Err(err) => warn!(%err, "failed to send notification"),
        }
    }

    async fn send(&self, title: &str, body: &str) -> Result<()> {
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), self.topic);
        let response = self
            .client
            .post(&url)
            .header("Title", title)
            .body(body.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("ntfy returned {status}"));
        }
        Ok(())
    }
}

/// Dispatch table from outcome to (title, body). `None` means no
/// notification should go out.
pub fn message_for(result: &MonitorResult, variant: FlowVariant) -> Option<(String, String)> {
    match result {
        MonitorResult::SlotsFound(dates) => Some((
            "Appointment slots available".to_string(),
            format!("Slots are open on: {}", dates.join(", ")),
        )),
        MonitorResult::NoSlots => match variant {
            FlowVariant::AlwaysDeep => Some((
                "Calendar empty".to_string(),
                "The booking calendar loaded but no dates are marked available.".to_string(),
            )),
            FlowVariant::EarlyExit => None,
        },
        MonitorResult::ExhaustedRetries { attempts, last } => Some((
            "Monitoring failed".to_string(),
            format!("The check did not complete after {attempts} attempt(s). Last error: {last}"),
        )),
    }
}
