//! Fires a typed failure message when the failsafe circuit breaker trips (§4.8). Rate limiting
//! itself lives on [`replicator_core::state::ScalingState::should_notify`]; this module only
//! delivers the message once the caller has decided one is due.

use enum_dispatch::enum_dispatch;
use replicator_core::ResourceType;
use reqwest::Client;
use serde::Serialize;
use snafu::{ensure, ResultExt, Snafu};
use tracing::info;
use url::Url;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to send webhook notification to {url}"))]
    SendWebhook { source: reqwest::Error, url: Url },

    #[snafu(display("Webhook notifier got status {status} from {url}"))]
    UnexpectedStatus { status: reqwest::StatusCode, url: Url },
}

#[derive(Clone, Debug, Serialize)]
pub struct NotificationMessage<'a> {
    pub alert_uid: Option<&'a str>,
    pub resource_id: &'a str,
    pub resource_type: ResourceType,
    pub reason: &'a str,
}

#[trait_variant::make(SendNotifier: Send)]
#[enum_dispatch(NotifierImplementation)]
pub trait Notifier {
    async fn notify(&self, message: &NotificationMessage<'_>) -> Result<(), Error>;
}

#[enum_dispatch]
pub enum NotifierImplementation {
    Log(LogNotifier),
    Webhook(WebhookNotifier),
}

#[derive(Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify(&self, message: &NotificationMessage<'_>) -> Result<(), Error> {
        info!(
            alert_uid = message.alert_uid,
            resource_id = message.resource_id,
            resource_type = ?message.resource_type,
            reason = message.reason,
            "Failsafe notification"
        );
        Ok(())
    }
}

pub struct WebhookNotifier {
    client: Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: Url) -> Self {
        Self { client: Client::new(), url }
    }
}

impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &NotificationMessage<'_>) -> Result<(), Error> {
        let response = self
            .client
            .post(self.url.clone())
            .json(message)
            .send()
            .await
            .context(SendWebhookSnafu { url: self.url.clone() })?;

        ensure!(
            response.status().is_success(),
            UnexpectedStatusSnafu { status: response.status(), url: self.url.clone() }
        );
        Ok(())
    }
}
