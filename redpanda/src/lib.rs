//! Redpanda message broker for the Neighborly reservation queue.
//!
//! Implements [`MessageBroker`] over any Kafka-compatible log using rdkafka.
//! A queue maps to a single-partition topic, which keeps payloads in publish
//! order. Every subscription joins the same consumer group, so concurrent
//! consumers of a queue compete for payloads instead of each seeing all of
//! them.
//!
//! # Delivery Semantics
//!
//! **Acknowledged on receipt**:
//! - A payload's offset is committed once the consumer task has queued it in
//!   the subscription's channel buffer, before the subscriber reads it
//! - Payloads still sitting in that buffer when the stream is dropped are
//!   already committed and are lost; a smaller `buffer_size` narrows this
//! - A payload the consumer task could not queue is not committed and will be
//!   redelivered to the next subscriber
//! - Subscribers must be idempotent
//!
//! # Example
//!
//! ```no_run
//! use neighborly_core::broker::MessageBroker;
//! use neighborly_redpanda::RedpandaBroker;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = RedpandaBroker::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("neighborly-reservations")
//!     .build()?;
//!
//! broker.declare_queue("reservations").await?;
//! broker.publish("reservations", "12,5").await?;
//!
//! let mut stream = broker.subscribe("reservations").await?;
//! while let Some(payload) = stream.next().await {
//!     println!("Received: {}", payload?);
//! }
//! # Ok(())
//! # }
//! ```

use neighborly_core::broker::{BrokerFuture, MessageBroker, MessageStream};
use neighborly_core::error::BrokerError;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

/// Redpanda-backed message broker.
pub struct RedpandaBroker {
    /// Kafka producer for publishing payloads
    producer: FutureProducer,
    /// Broker addresses (comma-separated)
    brokers: String,
    /// Timeout for publish and admin operations
    timeout: Duration,
    /// Consumer group shared by every subscription
    consumer_group: String,
    /// Buffer between the consumer task and the stream
    buffer_size: usize,
    /// Where a new consumer group starts reading
    auto_offset_reset: String,
    /// Replication factor for declared queues
    replication: i32,
}

impl RedpandaBroker {
    /// Create a broker with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder.
    #[must_use]
    pub fn builder() -> RedpandaBrokerBuilder {
        RedpandaBrokerBuilder::default()
    }

    /// Broker addresses this instance talks to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group shared by every subscription.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }
}

/// Builder for [`RedpandaBroker`].
#[derive(Default)]
pub struct RedpandaBrokerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
    replication: Option<i32>,
}

impl RedpandaBrokerBuilder {
    /// Broker addresses, comma-separated (e.g., "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment level: "0", "1" or "all" (default "all").
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Publish and admin timeout (default 5 seconds).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group id (default "neighborly").
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Stream buffer size (default 256). Zero is treated as one.
    #[must_use]
    pub const fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Offset reset policy for a new group (default "earliest").
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Replication factor used by `declare_queue` (default 1).
    #[must_use]
    pub const fn replication(mut self, replication: i32) -> Self {
        self.replication = Some(replication);
        self
    }

    /// Build the broker.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if brokers are not configured
    /// or the producer cannot be created.
    pub fn build(self) -> Result<RedpandaBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", &acks)
            .create()
            .map_err(|e| {
                BrokerError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let broker = RedpandaBroker {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group.unwrap_or_else(|| "neighborly".to_string()),
            buffer_size: self.buffer_size.unwrap_or(256).max(1),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
            replication: self.replication.unwrap_or(1),
        };

        tracing::info!(
            brokers = %broker.brokers,
            acks = %acks,
            consumer_group = %broker.consumer_group,
            buffer_size = broker.buffer_size,
            "RedpandaBroker created"
        );

        Ok(broker)
    }
}

impl MessageBroker for RedpandaBroker {
    fn declare_queue(&self, queue: &str) -> BrokerFuture<'_, ()> {
        let queue = queue.to_string();

        Box::pin(async move {
            let declare_failed = |reason: String| BrokerError::DeclareFailed {
                queue: queue.clone(),
                reason,
            };

            let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .create()
                .map_err(|e| declare_failed(format!("Failed to create admin client: {e}")))?;

            let topic = NewTopic::new(&queue, 1, TopicReplication::Fixed(self.replication));
            let options = AdminOptions::new().operation_timeout(Some(Timeout::After(self.timeout)));

            let results = admin
                .create_topics([&topic], &options)
                .await
                .map_err(|e| declare_failed(e.to_string()))?;

            for result in results {
                match result {
                    Ok(_) | Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {},
                    Err((_, code)) => return Err(declare_failed(code.to_string())),
                }
            }

            tracing::debug!(queue = %queue, "Queue declared");
            Ok(())
        })
    }

    fn publish(&self, queue: &str, payload: &str) -> BrokerFuture<'_, ()> {
        let queue = queue.to_string();
        let payload = payload.to_string();
        let timeout = self.timeout;

        Box::pin(async move {
            let record: FutureRecord<'_, (), str> = FutureRecord::to(&queue).payload(&payload);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        queue = %queue,
                        partition = partition,
                        offset = offset,
                        "Payload published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        queue = %queue,
                        error = %kafka_error,
                        "Failed to publish payload"
                    );
                    Err(BrokerError::PublishFailed {
                        queue,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(&self, queue: &str) -> BrokerFuture<'_, MessageStream> {
        let queue = queue.to_string();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BrokerError::SubscriptionFailed {
                    queue: queue.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[queue.as_str()])
                .map_err(|e| BrokerError::SubscriptionFailed {
                    queue: queue.clone(),
                    reason: format!("Failed to subscribe: {e}"),
                })?;

            tracing::info!(
                queue = %queue,
                consumer_group = %consumer_group,
                "Subscribed to queue"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            // The task owns the consumer; it leaves the group once the stream
            // side of the channel is dropped
            tokio::spawn(async move {
                use futures::StreamExt;

                let mut messages = consumer.stream();

                loop {
                    let received = tokio::select! {
                        () = tx.closed() => break,
                        received = messages.next() => received,
                    };
                    let Some(received) = received else { break };

                    let message = match received {
                        Ok(message) => message,
                        Err(e) => {
                            let err = BrokerError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                            continue;
                        },
                    };

                    let payload = match message.payload_view::<str>() {
                        Some(Ok(text)) => Ok(text.to_string()),
                        Some(Err(e)) => Err(BrokerError::Undecodable(e.to_string())),
                        None => Err(BrokerError::Undecodable("Message has no payload".to_string())),
                    };

                    // Not queued: leave uncommitted for the next subscriber
                    if tx.send(payload).await.is_err() {
                        break;
                    }

                    if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                        tracing::warn!(
                            topic = message.topic(),
                            offset = message.offset(),
                            error = %e,
                            "Failed to commit offset (payload may be redelivered)"
                        );
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_broker_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaBroker>();
        assert_sync::<RedpandaBroker>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = RedpandaBroker::builder().consumer_group("g").build();
        assert!(matches!(result, Err(BrokerError::ConnectionFailed(_))));
    }
}
