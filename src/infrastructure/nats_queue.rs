//! JetStream-backed [`MessageSource`]: durable stream, explicit acks,
//! `max_ack_pending` as the prefetch bound.

use async_nats::jetstream::{self, AckKind, consumer::AckPolicy, consumer::pull};
use async_trait::async_trait;
use futures::StreamExt;

use crate::application::{AppError, AppResult, Delivery, MessageSource};

#[derive(Clone, Debug)]
pub struct JetStreamSettings {
    pub url: String,
    pub stream: String,
    pub subject: String,
    pub consumer: String,
    pub dead_letter_subject: Option<String>,
    pub prefetch: usize,
    pub max_deliveries: u32,
}

fn queue_err(e: impl std::fmt::Display) -> AppError {
    AppError::Queue(e.to_string())
}

pub struct JetStreamSource {
    messages: pull::Stream,
    context: jetstream::Context,
    dead_letter_subject: Option<String>,
}

impl JetStreamSource {
    pub async fn connect(settings: &JetStreamSettings) -> AppResult<Self> {
        let client = async_nats::connect(&settings.url)
            .await
            .map_err(queue_err)?;
        let context = jetstream::new(client);

        let stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: settings.stream.clone(),
                subjects: vec![settings.subject.clone()],
                ..Default::default()
            })
            .await
            .map_err(queue_err)?;

        let consumer: jetstream::consumer::PullConsumer = stream
            .get_or_create_consumer(
                &settings.consumer,
                pull::Config {
                    durable_name: Some(settings.consumer.clone()),
                    ack_policy: AckPolicy::Explicit,
                    max_ack_pending: settings.prefetch as i64,
                    // one extra so the final attempt can still be dead-lettered by us
                    max_deliver: i64::from(settings.max_deliveries) + 1,
                    ..Default::default()
                },
            )
            .await
            .map_err(queue_err)?;

        let messages = consumer.messages().await.map_err(queue_err)?;
        tracing::info!(
            url = %settings.url,
            stream = %settings.stream,
            consumer = %settings.consumer,
            "jetstream consumer attached"
        );

        Ok(Self {
            messages,
            context,
            dead_letter_subject: settings.dead_letter_subject.clone(),
        })
    }
}

#[async_trait]
impl MessageSource for JetStreamSource {
    async fn next(&mut self) -> AppResult<Option<Box<dyn Delivery>>> {
        match self.messages.next().await {
            Some(Ok(message)) => Ok(Some(Box::new(JetStreamDelivery {
                message,
                context: self.context.clone(),
                dead_letter_subject: self.dead_letter_subject.clone(),
            }))),
            Some(Err(e)) => Err(queue_err(e)),
            None => Ok(None),
        }
    }
}

struct JetStreamDelivery {
    message: jetstream::Message,
    context: jetstream::Context,
    dead_letter_subject: Option<String>,
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn attempt(&self) -> u32 {
        self.message
            .info()
            .map(|info| u32::try_from(info.delivered).unwrap_or(u32::MAX))
            .unwrap_or(1)
    }

    async fn ack(&self) -> AppResult<()> {
        self.message.ack().await.map_err(queue_err)
    }

    async fn nack(&self, requeue: bool) -> AppResult<()> {
        let kind = if requeue { AckKind::Nak(None) } else { AckKind::Term };
        self.message.ack_with(kind).await.map_err(queue_err)
    }

    async fn dead_letter(&self, reason: &str) -> AppResult<()> {
        if let Some(subject) = &self.dead_letter_subject {
            let mut headers = async_nats::HeaderMap::new();
            headers.insert("Inboxpulse-Dead-Letter-Reason", reason);
            self.context
                .publish_with_headers(subject.clone(), headers, self.message.payload.clone())
                .await
                .map_err(queue_err)?
                .await
                .map_err(queue_err)?;
        } else {
            tracing::warn!(reason, "no dead-letter subject configured, terminating message");
        }
        self.message.ack_with(AckKind::Term).await.map_err(queue_err)
    }
}
