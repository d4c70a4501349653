//! Best-effort notification delivery for lease transitions.
//!
//! The dispatcher owns injected transport clients built once at startup.
//! Nothing in here returns an error to the caller: every failure is logged,
//! counted, and folded into a [`DeliveryOutcome`].

mod relay;
mod template;

pub use relay::{LettreRelay, RelayConfig, RelaySettings};
pub use template::{HttpTemplateMailer, DEFAULT_API_URL as DEFAULT_TEMPLATE_API_URL};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::NotifierConfig;
use crate::model::Reservation;
use crate::observability::NOTIFICATIONS_TOTAL;
use crate::store::{LeaseStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notifier misconfigured: {0}")]
    Configuration(String),
    #[error("{channel} delivery failed: {reason}")]
    Delivery { channel: &'static str, reason: String },
    #[error("{0} delivery timed out")]
    Timeout(&'static str),
}

/// Read-only lookup of the administrator who receives lease alerts.
#[async_trait]
pub trait AdminDirectory: Send + Sync {
    async fn active_admin_email(&self) -> Result<Option<String>, StoreError>;
}

/// Fixed directory answer, for deployments without an admin table.
pub struct StaticDirectory(pub Option<String>);

#[async_trait]
impl AdminDirectory for StaticDirectory {
    async fn active_admin_email(&self) -> Result<Option<String>, StoreError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMessage {
    pub from: String,
    pub to: String,
    pub cc: Vec<String>,
    pub template_id: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    pub from: String,
    pub to: String,
    pub cc: Vec<String>,
    pub subject: String,
    pub text: String,
}

/// Transactional template API.
#[async_trait]
pub trait TemplateMailer: Send + Sync {
    async fn send_template(&self, message: &TemplateMessage) -> Result<(), NotifyError>;
}

/// Direct relay (SMTP submission or local sendmail pipe).
#[async_trait]
pub trait RelayMailer: Send + Sync {
    async fn send_text(&self, message: &TextMessage) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Template,
    Relay,
    /// Nothing was attempted (no admin address, no usable channel).
    Skipped(String),
    /// Every configured channel failed.
    Failed(String),
}

/// `To` is always the admin; everyone else is `Cc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipients {
    pub to: String,
    pub cc: Vec<String>,
}

impl Recipients {
    /// Contact address plus watchers, deduplicated case-insensitively in
    /// first-seen order, never repeating the admin.
    pub fn resolve<'a>(
        admin: &str,
        contact: Option<&'a str>,
        watchers: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut seen = HashSet::new();
        seen.insert(admin.trim().to_lowercase());
        let cc = contact
            .into_iter()
            .chain(watchers)
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .filter(|addr| seen.insert(addr.to_lowercase()))
            .map(str::to_string)
            .collect();
        Self {
            to: admin.trim().to_string(),
            cc,
        }
    }
}

pub struct Dispatcher {
    admin_email: Option<String>,
    directory: Option<Arc<dyn AdminDirectory>>,
    template: Option<(Arc<dyn TemplateMailer>, String)>,
    relay: Option<Arc<dyn RelayMailer>>,
    subscriptions: Arc<dyn LeaseStore>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(subscriptions: Arc<dyn LeaseStore>, timeout: Duration) -> Self {
        Self {
            admin_email: None,
            directory: None,
            template: None,
            relay: None,
            subscriptions,
            timeout,
        }
    }

    /// Build the production transports once. A channel whose configuration is
    /// unusable is left out and logged; it never falls back to a weaker mode.
    pub fn from_config(
        config: &NotifierConfig,
        subscriptions: Arc<dyn LeaseStore>,
        directory: Option<Arc<dyn AdminDirectory>>,
    ) -> Self {
        let mut dispatcher = Self::new(subscriptions, config.timeout);
        if let Some(email) = &config.admin_email {
            dispatcher = dispatcher.with_admin_email(email.clone());
        }
        if let Some(directory) = directory {
            dispatcher = dispatcher.with_directory(directory);
        }

        if let Some(template_id) = &config.template_id {
            let mailer = match &config.template_api_key {
                Some(key) => HttpTemplateMailer::new(&config.template_api_url, key, config.timeout),
                None => Err(NotifyError::Configuration(
                    "template id set without NOTIFY_TEMPLATE_API_KEY".into(),
                )),
            };
            match mailer {
                Ok(mailer) => dispatcher = dispatcher.with_template(Arc::new(mailer), template_id.clone()),
                Err(e) => warn!("template channel disabled: {e}"),
            }
        }

        match config
            .relay
            .resolve()
            .and_then(|relay| LettreRelay::new(relay, config.timeout))
        {
            Ok(relay) => {
                info!(sendmail = relay.is_sendmail(), "relay channel ready");
                dispatcher = dispatcher.with_relay(Arc::new(relay));
            }
            Err(e) => warn!("relay channel disabled: {e}"),
        }
        dispatcher
    }

    /// Explicit admin address; takes precedence over the directory.
    pub fn with_admin_email(mut self, email: impl Into<String>) -> Self {
        let email = email.into();
        self.admin_email = (!email.trim().is_empty()).then_some(email);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn AdminDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_template(mut self, mailer: Arc<dyn TemplateMailer>, template_id: impl Into<String>) -> Self {
        self.template = Some((mailer, template_id.into()));
        self
    }

    pub fn with_relay(mut self, relay: Arc<dyn RelayMailer>) -> Self {
        self.relay = Some(relay);
        self
    }

    async fn admin_address(&self) -> Option<String> {
        if let Some(email) = &self.admin_email {
            return Some(email.clone());
        }
        let directory = self.directory.as_ref()?;
        match directory.active_admin_email().await {
            Ok(found) => found.filter(|e| !e.trim().is_empty()),
            Err(e) => {
                warn!("admin directory lookup failed: {e}");
                None
            }
        }
    }

    /// Deliver a notice about `reservation`. Never fails; the outcome is
    /// informational.
    pub async fn notify(&self, reservation: &Reservation, subject: &str, body: &str) -> DeliveryOutcome {
        let Some(admin) = self.admin_address().await else {
            info!(reservation = reservation.id, "no admin address resolved, skipping notification");
            return self.record(DeliveryOutcome::Skipped("no admin address".into()));
        };

        let watchers = match self.subscriptions.watchers(reservation.id).await {
            Ok(w) => w,
            Err(e) => {
                warn!(reservation = reservation.id, "watcher lookup failed, notifying contact only: {e}");
                Vec::new()
            }
        };
        let recipients = Recipients::resolve(
            &admin,
            reservation.contact_email.as_deref(),
            watchers.iter().map(String::as_str),
        );

        if let Some((mailer, template_id)) = &self.template {
            let message = TemplateMessage {
                from: admin.clone(),
                to: recipients.to.clone(),
                cc: recipients.cc.clone(),
                template_id: template_id.clone(),
                data: template_data(reservation, subject, body),
            };
            match bounded(self.timeout, "template", mailer.send_template(&message)).await {
                Ok(()) => {
                    info!(reservation = reservation.id, "notification sent via template API");
                    return self.record(DeliveryOutcome::Template);
                }
                Err(e) => {
                    count("template", "error");
                    warn!(reservation = reservation.id, "{e}; falling back to relay");
                }
            }
        }

        let Some(relay) = &self.relay else {
            warn!(reservation = reservation.id, "no usable relay configured, notification dropped");
            return self.record(if self.template.is_some() {
                DeliveryOutcome::Failed("template failed and no relay configured".into())
            } else {
                DeliveryOutcome::Skipped("no delivery channel configured".into())
            });
        };

        let message = TextMessage {
            from: admin,
            to: recipients.to,
            cc: recipients.cc,
            subject: subject.to_string(),
            text: render_text(reservation, body),
        };
        match bounded(self.timeout, "relay", relay.send_text(&message)).await {
            Ok(()) => {
                info!(reservation = reservation.id, "notification sent via relay");
                self.record(DeliveryOutcome::Relay)
            }
            Err(e) => {
                count("relay", "error");
                warn!(reservation = reservation.id, "{e}; notification dropped");
                self.record(DeliveryOutcome::Failed(e.to_string()))
            }
        }
    }

    fn record(&self, outcome: DeliveryOutcome) -> DeliveryOutcome {
        match &outcome {
            DeliveryOutcome::Template => count("template", "ok"),
            DeliveryOutcome::Relay => count("relay", "ok"),
            DeliveryOutcome::Skipped(_) => count("none", "skipped"),
            // Already counted against the channel whose attempt failed.
            DeliveryOutcome::Failed(_) => {}
        }
        debug!(?outcome, "notification finished");
        outcome
    }
}

fn count(channel: &'static str, status: &'static str) {
    metrics::counter!(NOTIFICATIONS_TOTAL, "channel" => channel, "status" => status).increment(1);
}

async fn bounded<F>(timeout: Duration, channel: &'static str, send: F) -> Result<(), NotifyError>
where
    F: std::future::Future<Output = Result<(), NotifyError>>,
{
    tokio::time::timeout(timeout, send)
        .await
        .unwrap_or(Err(NotifyError::Timeout(channel)))
}

fn template_data(reservation: &Reservation, subject: &str, body: &str) -> serde_json::Value {
    json!({
        "subject": subject,
        "body": body,
        "reservation_type": reservation.kind,
        "reference_code": reservation.reference_code,
        "status": reservation.status.as_str(),
        "requester_name": reservation.requester_name,
        "requester_employee_id": reservation.requester_employee_id,
        "contact_email": reservation.contact_email,
        "reject_reason": reservation.reject_reason,
    })
}

/// Plain-text rendering of the template fields for the relay channel.
pub fn render_text(reservation: &Reservation, body: &str) -> String {
    let dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    let mut text = String::new();
    text.push_str(body);
    text.push_str("\n\n");
    text.push_str(&format!("Type: {}\n", reservation.kind));
    text.push_str(&format!("Reference: {}\n", reservation.reference_code));
    text.push_str(&format!("Status: {}\n", reservation.status));
    text.push_str(&format!(
        "Requester: {} ({})\n",
        dash(&reservation.requester_name),
        dash(&reservation.requester_employee_id)
    ));
    text.push_str(&format!("Contact: {}\n", dash(&reservation.contact_email)));
    if let Some(reason) = &reservation.reject_reason {
        text.push_str(&format!("Reason: {reason}\n"));
    }
    text
}
