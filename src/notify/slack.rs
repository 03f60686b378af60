use crate::config::SlackDestination;
use crate::engine::alert::{AlertEvent, Notifier, NotifyError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

const USERNAME: &str = "trialbench";
const MAX_ERROR_BODY_BYTES: usize = 8 * 1024;

#[derive(Debug, Serialize)]
struct SlackMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    username: &'a str,
    text: String,
}

/// Posts alerts to a Slack incoming webhook.
pub struct SlackNotifier {
    client: Client,
    destination: SlackDestination,
}

impl SlackNotifier {
    pub fn new(destination: SlackDestination) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            destination,
        })
    }
}

fn alert_text(event: &AlertEvent) -> String {
    if event.kind.is_latency() {
        format!(
            ":warning: {} {} latency {:.3}ms exceeded the {}ms threshold",
            event.method, event.kind, event.observed, event.threshold
        )
    } else {
        format!(
            ":warning: {} throughput {:.3} rps fell below the {} rps threshold",
            event.method, event.observed, event.threshold
        )
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifyError> {
        let message = SlackMessage {
            channel: self.destination.channel.as_deref(),
            username: USERNAME,
            text: alert_text(event),
        };

        let response = self
            .client
            .post(&self.destination.webhook_url)
            .json(&message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let capped = &body.as_bytes()[..body.len().min(MAX_ERROR_BODY_BYTES)];
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body: String::from_utf8_lossy(capped).to_string(),
            });
        }

        tracing::info!(channel = ?self.destination.channel, "alert sent to slack");
        Ok(())
    }
}
