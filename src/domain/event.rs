use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLabel {
    High,
    Medium,
    Low,
}

impl PriorityLabel {
    pub fn base_score(self) -> u64 {
        match self {
            PriorityLabel::High => 5,
            PriorityLabel::Medium => 2,
            PriorityLabel::Low => 1,
        }
    }
}

impl fmt::Display for PriorityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityLabel::High => write!(f, "high"),
            PriorityLabel::Medium => write!(f, "medium"),
            PriorityLabel::Low => write!(f, "low"),
        }
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("unknown priority label: {0} (expected high/medium/low)")]
pub struct UnknownPriority(pub String);

impl FromStr for PriorityLabel {
    type Err = UnknownPriority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(PriorityLabel::High),
            "medium" => Ok(PriorityLabel::Medium),
            "low" => Ok(PriorityLabel::Low),
            other => Err(UnknownPriority(other.to_string())),
        }
    }
}

/// One classified-mail notification pulled off the queue.
///
/// Field aliases accept flat mail names (`message_id`, `user_id`, `from`,
/// `to`, `date`). Full mail-ingest messages with a `headers` object are
/// handled by [`InboundEvent::from_payload`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(alias = "message_id")]
    pub id: String, // idempotency key
    #[serde(alias = "user_id")]
    pub scope_id: String,
    #[serde(default, alias = "from")]
    pub sender: Option<String>,
    #[serde(default, alias = "to")]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    /// Free text straight from the mail header; may not parse.
    #[serde(default, alias = "date")]
    pub sent_at: Option<String>,
    #[serde(default)]
    pub has_attachments: bool,
}

#[derive(Debug, Deserialize)]
struct MailHeaders {
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Vec<String>,
    #[serde(default)]
    cc: Vec<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
}

/// Message as written by the mail ingester; body text is not needed here.
#[derive(Debug, Deserialize)]
struct MailMessage {
    uid: u64,
    user_id: String,
    #[serde(default)]
    account: String,
    headers: MailHeaders,
    #[serde(default)]
    has_attachments: bool,
    #[serde(default)]
    attachments: Vec<serde_json::Value>,
}

impl From<MailMessage> for InboundEvent {
    fn from(m: MailMessage) -> Self {
        // uids are only unique per mailbox
        let id = match m.headers.message_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None if m.account.is_empty() => m.uid.to_string(),
            None => format!("{}:{}", m.account, m.uid),
        };
        let mut recipients = m.headers.to;
        recipients.extend(m.headers.cc);
        InboundEvent {
            id,
            scope_id: m.user_id,
            sender: m.headers.from,
            recipients,
            subject: m.headers.subject,
            sent_at: m.headers.date,
            has_attachments: m.has_attachments || !m.attachments.is_empty(),
        }
    }
}

impl InboundEvent {
    /// Parse a queue payload: either the flat event shape or a full
    /// mail-ingest message (recognised by its `headers` object).
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        let event = if value.get("headers").is_some_and(|h| h.is_object()) {
            InboundEvent::from(serde_json::from_value::<MailMessage>(value)?)
        } else {
            serde_json::from_value::<InboundEvent>(value)?
        };
        if event.id.trim().is_empty() {
            return Err(serde::de::Error::custom("event id must not be empty"));
        }
        Ok(event)
    }

    pub fn subject_or_empty(&self) -> &str {
        self.subject.as_deref().unwrap_or("")
    }
}
