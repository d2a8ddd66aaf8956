use serde::Serialize;
use std::time::Duration;
use tracing::warn;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(3);

/// Cluster events pushed to the configured webhook endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotifyEvent {
    NodeDropped { node: String },
    SupervisorDown { node: String },
    SupervisorRecovered { node: String },
}

/// Fire-and-forget HTTP callback sender. Failures are logged, never retried;
/// an unconfigured endpoint turns every call into a no-op.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    endpoint: Option<String>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Fails only when the HTTP client itself cannot be built; the request
    /// timeout is part of the client, so a fallback without it is not offered.
    pub fn new(endpoint: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(WebhookNotifier { endpoint, client })
    }

    pub async fn notify(&self, event: NotifyEvent) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };

        match self.client.post(endpoint).json(&event).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(
                    status = %response.status(),
                    event = ?event,
                    "webhook endpoint rejected notification"
                );
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, event = ?event, "failed to deliver webhook notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests webhook client construction
    /// Purpose: Validates the notifier builds its client with the request
    ///          timeout instead of falling back to an untimed default
    /// Expected: Construction succeeds with and without an endpoint
    #[test]
    fn test_notifier_construction() {
        assert!(WebhookNotifier::new(None).is_ok());
        assert!(WebhookNotifier::new(Some("http://127.0.0.1:1".to_owned())).is_ok());
    }
}
