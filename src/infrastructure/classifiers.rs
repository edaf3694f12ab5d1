use async_trait::async_trait;

use crate::application::{AppResult, Classifier};
use crate::domain::{InboundEvent, PriorityLabel};

/// Always answers the same label. Useful while no real classifier is wired.
pub struct FixedClassifier {
    label: PriorityLabel,
}

impl FixedClassifier {
    pub fn new(label: PriorityLabel) -> Self {
        Self { label }
    }
}

#[async_trait]
impl Classifier for FixedClassifier {
    async fn classify(&self, _event: &InboundEvent) -> AppResult<PriorityLabel> {
        Ok(self.label)
    }
}

const HIGH_KEYWORDS: &[&str] = &[
    "urgent",
    "asap",
    "immediately",
    "critical",
    "action required",
    "overdue",
    "final notice",
];

const MEDIUM_KEYWORDS: &[&str] = &[
    "invoice",
    "meeting",
    "deadline",
    "reminder",
    "review",
    "request",
    "follow up",
];

/// Subject-line heuristic. Attachments bump an otherwise low mail to medium.
#[derive(Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn label_for(event: &InboundEvent) -> PriorityLabel {
        let subject = event.subject_or_empty().to_lowercase();
        if HIGH_KEYWORDS.iter().any(|k| subject.contains(k)) {
            PriorityLabel::High
        } else if event.has_attachments || MEDIUM_KEYWORDS.iter().any(|k| subject.contains(k)) {
            PriorityLabel::Medium
        } else {
            PriorityLabel::Low
        }
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, event: &InboundEvent) -> AppResult<PriorityLabel> {
        Ok(Self::label_for(event))
    }
}
