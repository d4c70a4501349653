use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{NotifyError, TemplateMailer, TemplateMessage};

pub const DEFAULT_API_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// Transactional template delivery over HTTP (SendGrid-compatible payload).
pub struct HttpTemplateMailer {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpTemplateMailer {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Configuration(format!("template client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
        })
    }
}

pub(super) fn payload(message: &TemplateMessage) -> Value {
    let mut personalization = json!({
        "to": [{ "email": message.to }],
        "dynamic_template_data": message.data,
    });
    // The API rejects an empty cc list.
    if !message.cc.is_empty() {
        personalization["cc"] = message.cc.iter().map(|email| json!({ "email": email })).collect();
    }
    json!({
        "from": { "email": message.from },
        "template_id": message.template_id,
        "personalizations": [personalization],
    })
}

#[async_trait]
impl TemplateMailer for HttpTemplateMailer {
    async fn send_template(&self, message: &TemplateMessage) -> Result<(), NotifyError> {
        let failed = |reason: String| NotifyError::Delivery {
            channel: "template",
            reason,
        };
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&payload(message))
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {status}: {body}")));
        }
        Ok(())
    }
}
