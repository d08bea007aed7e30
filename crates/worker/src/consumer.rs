//! AMQP job source.
//!
//! Declares a durable direct exchange, a durable queue and a binding that
//! all share one name, then consumes from the queue with a prefetch of one
//! so the broker never hands this worker a second job while the first is
//! still running.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};

use scanny_pipeline::{AckError, Acknowledger, Delivery, JobSource};

/// Name the connection shows up under in the broker's management UI.
const CONNECTION_NAME: &str = "scanny-worker";

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to connect to broker: {0}")]
    Connect(#[source] lapin::Error),

    #[error("Failed to declare {what}: {source}")]
    Declare {
        what: String,
        #[source]
        source: lapin::Error,
    },

    #[error("Consumer failed: {0}")]
    Consume(#[source] lapin::Error),
}

/// Consumes job descriptors from one queue, one at a time.
pub struct QueueConsumer {
    // Dropping the connection closes the consumer.
    _connection: Connection,
    _channel: Channel,
    consumer: Consumer,
    queue: String,
}

impl QueueConsumer {
    /// Connect to `url` and start consuming from `queue`.
    pub async fn connect(url: &str, queue: &str) -> Result<Self, QueueError> {
        let connection = Connection::connect(
            url,
            ConnectionProperties::default().with_connection_name(CONNECTION_NAME.into()),
        )
        .await
        .map_err(QueueError::Connect)?;

        let channel = connection
            .create_channel()
            .await
            .map_err(QueueError::Connect)?;

        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|source| declare_error("prefetch", source))?;

        channel
            .exchange_declare(
                queue,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|source| declare_error(&format!("exchange {queue}"), source))?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|source| declare_error(&format!("queue {queue}"), source))?;

        channel
            .queue_bind(
                queue,
                queue,
                queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| declare_error(&format!("binding {queue}"), source))?;

        let tag = consumer_tag();
        let consumer = channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(QueueError::Consume)?;

        tracing::info!(queue, consumer_tag = %tag, "Consuming jobs");

        Ok(Self {
            _connection: connection,
            _channel: channel,
            consumer,
            queue: queue.to_string(),
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

#[async_trait]
impl JobSource for QueueConsumer {
    type Error = QueueError;

    async fn next_delivery(&mut self) -> Result<Option<Delivery>, Self::Error> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => {
                tracing::debug!(
                    queue = %self.queue,
                    delivery_tag = delivery.delivery_tag,
                    bytes = delivery.data.len(),
                    "Job received"
                );
                Ok(Some(Delivery::new(
                    delivery.data,
                    Box::new(AmqpAck(delivery.acker)),
                )))
            }
            Some(Err(e)) => Err(QueueError::Consume(e)),
            None => Ok(None),
        }
    }
}

/// Settles one AMQP delivery: `ack`, or `nack` with requeue.
struct AmqpAck(lapin::acker::Acker);

#[async_trait]
impl Acknowledger for AmqpAck {
    async fn ack(self: Box<Self>) -> Result<(), AckError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| AckError(e.to_string()))
    }

    async fn requeue(self: Box<Self>) -> Result<(), AckError> {
        self.0
            .nack(BasicNackOptions {
                requeue: true,
                ..Default::default()
            })
            .await
            .map_err(|e| AckError(e.to_string()))
    }
}

fn declare_error(what: &str, source: lapin::Error) -> QueueError {
    QueueError::Declare {
        what: what.to_string(),
        source,
    }
}

fn consumer_tag() -> String {
    format!("{CONNECTION_NAME}-{}", uuid::Uuid::new_v4().simple())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
