//! Durable, subject-addressed message log.
//!
//! Every chat message is appended to the per-address subject
//! `MESSAGES.{address}` of a single JetStream stream. Sessions replay their
//! own subject from sequence 1 on every connect, so the log is the only
//! source of truth for delivery and the gateway keeps no message state of
//! its own.
//!
//! The [`MessageLog`] trait is the seam between the session orchestration
//! and the broker; [`NatsMessageLog`] is the production implementation,
//! tests substitute an in-memory one.

use std::sync::Arc;

use async_nats::jetstream::{self, consumer, stream};
use async_trait::async_trait;
use bytes::Bytes;
use eyre::Context as _;
use futures::StreamExt as _;
use relay_types::Address;

/// Name of the JetStream stream holding every chat message.
pub const STREAM_NAME: &str = "MESSAGES";
/// Subject pattern the stream is bound to.
pub const SUBJECT_PATTERN: &str = "MESSAGES.*";

/// The per-address subject a message is filed under.
pub fn subject(address: &Address) -> String {
    format!("MESSAGES.{address}")
}

/// All errors surfaced by the message log.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The broker rejected or never acknowledged a publish.
    #[error("could not publish to {subject}: {reason}")]
    Publish {
        /// The subject the record was destined for.
        subject: String,
        /// The broker-side failure.
        reason: String,
    },
    /// The per-subject subscription could not be created.
    #[error("could not subscribe to {subject}: {reason}")]
    Subscribe {
        /// The subject of the failed subscription.
        subject: String,
        /// The broker-side failure.
        reason: String,
    },
    /// A delivery could not be read from the subscription.
    #[error("could not read from subscription: {0}")]
    Delivery(String),
    /// A delivery could not be acknowledged.
    #[error("could not acknowledge delivery: {0}")]
    Ack(String),
    /// The subscription ended without being drained.
    #[error("subscription ended unexpectedly")]
    SubscriptionEnded,
}

/// Settles the broker-side acknowledgment of one delivery.
#[async_trait]
pub trait DeliveryAck: Send {
    /// Acknowledges the delivery with the broker.
    async fn ack(self: Box<Self>) -> Result<(), LogError>;
}

/// A single durable record handed to the subscribe pump.
pub struct LogDelivery {
    payload: Bytes,
    stream_sequence: u64,
    acker: Box<dyn DeliveryAck>,
}

impl LogDelivery {
    /// Builds a delivery; `acker` settles the broker acknowledgment.
    pub fn new(payload: Bytes, stream_sequence: u64, acker: Box<dyn DeliveryAck>) -> Self {
        Self {
            payload,
            stream_sequence,
            acker,
        }
    }

    /// The raw record bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The broker-assigned position of the record within its subject.
    pub fn stream_sequence(&self) -> u64 {
        self.stream_sequence
    }

    /// Acknowledges the delivery. The broker redelivers unacknowledged
    /// records, so every consumed delivery must be acked exactly once.
    pub async fn ack(self) -> Result<(), LogError> {
        self.acker.ack().await
    }
}

/// An open per-subject subscription, replaying from the beginning.
#[async_trait]
pub trait LogSubscription: Send {
    /// The next record, in strictly increasing stream-sequence order.
    /// `None` means the subscription ended on the broker side.
    async fn next(&mut self) -> Option<Result<LogDelivery, LogError>>;

    /// Stops delivery and releases broker-side subscription state.
    async fn drain(self: Box<Self>);
}

/// The durable log shared by all sessions.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Appends `payload` to the subject of `address`. Returns only once the
    /// broker has persisted the record.
    async fn publish(&self, address: &Address, payload: Bytes) -> Result<(), LogError>;

    /// Opens a subscription over the subject of `address`, delivering every
    /// record from sequence 1 with explicit per-delivery acknowledgment.
    async fn subscribe(&self, address: &Address) -> Result<Box<dyn LogSubscription>, LogError>;
}

/// Shared handle to the process-wide message log.
pub type MessageLogService = Arc<dyn MessageLog>;

/// [`MessageLog`] backed by a NATS JetStream stream.
pub struct NatsMessageLog {
    jetstream: jetstream::Context,
    stream: stream::Stream,
}

impl NatsMessageLog {
    /// Connects to the broker at `url` and idempotently creates the
    /// `MESSAGES` stream bound to `MESSAGES.*`.
    pub async fn connect(url: &str) -> eyre::Result<Self> {
        tracing::info!(url, "connecting to message broker..");
        let client = async_nats::connect(url)
            .await
            .context("while connecting to NATS")?;
        let jetstream = jetstream::new(client);
        let stream = jetstream
            .get_or_create_stream(stream::Config {
                name: STREAM_NAME.to_owned(),
                subjects: vec![SUBJECT_PATTERN.to_owned()],
                ..Default::default()
            })
            .await
            .context("while creating the MESSAGES stream")?;
        tracing::info!("stream {STREAM_NAME} ready");
        Ok(Self { jetstream, stream })
    }
}

#[async_trait]
impl MessageLog for NatsMessageLog {
    async fn publish(&self, address: &Address, payload: Bytes) -> Result<(), LogError> {
        let subject = subject(address);
        let ack = self
            .jetstream
            .publish(subject.clone(), payload)
            .await
            .map_err(|err| LogError::Publish {
                subject: subject.clone(),
                reason: err.to_string(),
            })?;
        // the publish only counts once the broker confirms persistence
        ack.await.map_err(|err| LogError::Publish {
            subject,
            reason: err.to_string(),
        })?;
        Ok(())
    }

    async fn subscribe(&self, address: &Address) -> Result<Box<dyn LogSubscription>, LogError> {
        let subject = subject(address);
        let consumer = self
            .stream
            .create_consumer(consumer::pull::Config {
                deliver_policy: consumer::DeliverPolicy::All,
                ack_policy: consumer::AckPolicy::Explicit,
                filter_subject: subject.clone(),
                ..Default::default()
            })
            .await
            .map_err(|err| LogError::Subscribe {
                subject: subject.clone(),
                reason: err.to_string(),
            })?;
        let name = consumer.cached_info().name.clone();
        let messages = consumer
            .messages()
            .await
            .map_err(|err| LogError::Subscribe {
                subject,
                reason: err.to_string(),
            })?;
        Ok(Box::new(NatsLogSubscription {
            stream: self.stream.clone(),
            name,
            messages,
        }))
    }
}

struct NatsLogSubscription {
    stream: stream::Stream,
    name: String,
    messages: consumer::pull::Stream,
}

#[async_trait]
impl LogSubscription for NatsLogSubscription {
    async fn next(&mut self) -> Option<Result<LogDelivery, LogError>> {
        match self.messages.next().await? {
            Ok(message) => {
                let stream_sequence = match message.info() {
                    Ok(info) => info.stream_sequence,
                    Err(err) => return Some(Err(LogError::Delivery(err.to_string()))),
                };
                let payload = message.payload.clone();
                Some(Ok(LogDelivery::new(
                    payload,
                    stream_sequence,
                    Box::new(NatsDeliveryAck(message)),
                )))
            }
            Err(err) => Some(Err(LogError::Delivery(err.to_string()))),
        }
    }

    async fn drain(self: Box<Self>) {
        let NatsLogSubscription {
            stream,
            name,
            messages,
        } = *self;
        drop(messages);
        // release the ephemeral consumer instead of waiting for the broker
        // to expire it
        if let Err(err) = stream.delete_consumer(&name).await {
            tracing::debug!("could not delete consumer {name}: {err}");
        }
    }
}

struct NatsDeliveryAck(jetstream::Message);

#[async_trait]
impl DeliveryAck for NatsDeliveryAck {
    async fn ack(self: Box<Self>) -> Result<(), LogError> {
        self.0
            .ack()
            .await
            .map_err(|err| LogError::Ack(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_use_the_normalized_address() {
        let address: Address = "0x33A8122F5C41EEE796DE9DA8D63AF7670F310964".parse().unwrap();
        assert_eq!(
            subject(&address),
            "MESSAGES.0x33a8122f5c41eee796de9da8d63af7670f310964"
        );
    }
}
