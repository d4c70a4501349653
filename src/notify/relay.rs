use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSendmailTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::warn;

use super::{NotifyError, RelayMailer, TextMessage};

pub const DEFAULT_SMTP_PORT: u16 = 587;
const IMPLICIT_TLS_PORT: u16 = 465;

/// Relay settings as read from the environment, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelaySettings {
    pub host: Option<String>,
    pub port: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayConfig {
    /// Authenticated submission. Credentials are mandatory.
    Smtp {
        host: String,
        port: u16,
        user: String,
        pass: String,
    },
    /// Local `sendmail` pipe.
    Sendmail,
}

fn non_empty(v: &Option<String>) -> Option<String> {
    v.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl RelaySettings {
    /// Validate into a usable mode. A configured host without a complete
    /// credential pair is refused rather than sent unauthenticated.
    pub fn resolve(&self) -> Result<RelayConfig, NotifyError> {
        let Some(host) = non_empty(&self.host) else {
            return Ok(RelayConfig::Sendmail);
        };
        let port = match non_empty(&self.port) {
            None => DEFAULT_SMTP_PORT,
            Some(p) => p
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| NotifyError::Configuration(format!("invalid SMTP port {p:?}")))?,
        };
        match (non_empty(&self.user), non_empty(&self.pass)) {
            (Some(user), Some(pass)) => Ok(RelayConfig::Smtp { host, port, user, pass }),
            (None, None) => Err(NotifyError::Configuration(format!(
                "SMTP host {host} configured without credentials"
            ))),
            _ => Err(NotifyError::Configuration(
                "SMTP credentials partially supplied".into(),
            )),
        }
    }
}

enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    Sendmail(AsyncSendmailTransport<Tokio1Executor>),
}

/// Plain-text relay delivery through `lettre`.
pub struct LettreRelay {
    transport: Transport,
}

impl LettreRelay {
    pub fn new(config: RelayConfig, timeout: Duration) -> Result<Self, NotifyError> {
        let transport = match config {
            RelayConfig::Smtp { host, port, user, pass } => {
                let builder = if port == IMPLICIT_TLS_PORT {
                    AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
                } else {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
                }
                .map_err(|e| NotifyError::Configuration(format!("SMTP relay {host}: {e}")))?;
                Transport::Smtp(
                    builder
                        .port(port)
                        .credentials(Credentials::new(user, pass))
                        .timeout(Some(timeout))
                        .build(),
                )
            }
            RelayConfig::Sendmail => Transport::Sendmail(AsyncSendmailTransport::<Tokio1Executor>::new()),
        };
        Ok(Self { transport })
    }

    pub fn is_sendmail(&self) -> bool {
        matches!(self.transport, Transport::Sendmail(_))
    }
}

fn mailbox(addr: &str) -> Result<Mailbox, NotifyError> {
    addr.parse::<Mailbox>()
        .map_err(|e| NotifyError::Configuration(format!("bad address {addr:?}: {e}")))
}

pub(super) fn build_message(message: &TextMessage) -> Result<Message, NotifyError> {
    let mut builder = Message::builder()
        .from(mailbox(&message.from)?)
        .to(mailbox(&message.to)?)
        .subject(message.subject.clone());
    // Copies come from booking data; a bad one must not cost the admin the notice.
    for cc in &message.cc {
        match mailbox(cc) {
            Ok(addr) => builder = builder.cc(addr),
            Err(e) => warn!("dropping cc recipient: {e}"),
        }
    }
    builder
        .header(ContentType::TEXT_PLAIN)
        .body(message.text.clone())
        .map_err(|e| NotifyError::Delivery {
            channel: "relay",
            reason: e.to_string(),
        })
}

#[async_trait]
impl RelayMailer for LettreRelay {
    async fn send_text(&self, message: &TextMessage) -> Result<(), NotifyError> {
        let email = build_message(message)?;
        let result = match &self.transport {
            Transport::Smtp(t) => t.send(email).await.map(|_| ()).map_err(|e| e.to_string()),
            Transport::Sendmail(t) => t.send(email).await.map_err(|e| e.to_string()),
        };
        result.map_err(|reason| NotifyError::Delivery {
            channel: "relay",
            reason,
        })
    }
}
