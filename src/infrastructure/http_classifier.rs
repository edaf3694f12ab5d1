use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::application::{AppError, AppResult, Classifier};
use crate::domain::{InboundEvent, PriorityLabel};

/// Asks an external service (an LLM gateway, a rules engine, ...) for the
/// priority of a mail.
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpClassifier {
    pub fn new(endpoint: String, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            token,
        }
    }
}

#[derive(Debug, Serialize)]
struct ClassifyReq<'a> {
    id: &'a str,
    sender: Option<&'a str>,
    recipients: &'a [String],
    subject: Option<&'a str>,
    has_attachments: bool,
}

#[derive(Debug, Deserialize)]
struct ClassifyResp {
    priority: String,
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, event: &InboundEvent) -> AppResult<PriorityLabel> {
        let body = ClassifyReq {
            id: &event.id,
            sender: event.sender.as_deref(),
            recipients: &event.recipients,
            subject: event.subject.as_deref(),
            has_attachments: event.has_attachments,
        };

        let mut req = self
            .client
            .post(&self.endpoint)
            .header(USER_AGENT, "inboxpulse")
            .json(&body);

        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AppError::Classifier(e.to_string()))?
            .error_for_status()
            .map_err(|e| AppError::Classifier(e.to_string()))?;

        let parsed: ClassifyResp = resp
            .json()
            .await
            .map_err(|e| AppError::Classifier(e.to_string()))?;

        parsed
            .priority
            .parse()
            .map_err(|e: crate::domain::UnknownPriority| AppError::Classifier(e.to_string()))
    }
}
