//! RabbitMQ broker over AMQP 0-9-1.
//!
//! One connection, one channel in confirm mode. Topics are durable fanout exchanges, queues are
//! durable and bound with an empty routing key, messages are published persistent (delivery
//! mode 2) and each publish waits for the broker's confirm. Connection errors are never
//! retried: they are reported on the fatal signal.

use crate::block::{Block, Height};
use crate::broker::{Broker, BrokerError, QueueFeed, QueueSource, HEIGHT_HEADER};
use crate::fatal::FatalSignal;
use crate::feed::{AckError, Acknowledgement, Delivery, Feed};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};

const PERSISTENT_DELIVERY_MODE: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
}

impl AmqpBroker {
    /// Connect to `amqp://host:port/%2f`. Any later connection error is reported on `fatal`.
    pub async fn connect(host: &str, port: u16, fatal: FatalSignal) -> Result<Self, BrokerError> {
        let uri = format!("amqp://{}:{}/%2f", host, port);
        let connection = Connection::connect(&uri, ConnectionProperties::default()).await?;
        connection.on_error(move |err| {
            tracing::error!(reason = %err, "RMQ connection error");
            fatal.report(BrokerError::ConnectionLost(err.to_string()));
        });
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        tracing::info!(host, port, "connected to RMQ");
        Ok(Self {
            connection,
            channel,
        })
    }
}

fn block_headers(height: Height) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(HEIGHT_HEADER.into(), AMQPValue::LongLongInt(height as i64));
    headers
}

fn height_from_headers(properties: &BasicProperties) -> Option<Height> {
    let headers = properties.headers().as_ref()?;
    let (_, value) = headers
        .inner()
        .iter()
        .find(|(k, _)| k.as_str() == HEIGHT_HEADER)?;
    match value {
        AMQPValue::LongLongInt(h) => u64::try_from(*h).ok(),
        AMQPValue::LongUInt(h) => Some(u64::from(*h)),
        AMQPValue::LongInt(h) => u64::try_from(*h).ok(),
        _ => None,
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_topic(&self, topic: &str) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                topic,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn bind(&self, queue: &str, topic: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(
                queue,
                topic,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, block: &Block) -> Result<(), BrokerError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_headers(block_headers(block.height));
        let confirm = self
            .channel
            .basic_publish(
                topic,
                "",
                BasicPublishOptions::default(),
                block.payload(),
                properties,
            )
            .await?
            .await?;
        if confirm.is_nack() {
            return Err(BrokerError::NotConfirmed(block.height));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.channel.close(REPLY_SUCCESS, "OK").await?;
        self.connection.close(REPLY_SUCCESS, "OK").await?;
        Ok(())
    }
}

#[async_trait]
impl QueueSource for AmqpBroker {
    async fn consume(&self, queue: &str, auto_ack: bool) -> Result<QueueFeed, BrokerError> {
        if !auto_ack {
            self.channel
                .basic_qos(1, BasicQosOptions::default())
                .await?;
        }
        let mut consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_ack: auto_ack,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        let (tx, feed) = Feed::channel();
        let task = tokio::spawn(async move {
            while let Some(item) = consumer.next().await {
                let delivery = match item {
                    Ok(d) => d,
                    Err(e) => {
                        let _ = tx.send(Err(BrokerError::from(e)));
                        return;
                    }
                };
                let Some(height) = height_from_headers(&delivery.properties) else {
                    let _ = tx.send(Err(BrokerError::MissingHeight));
                    return;
                };
                let block = Block::new(height, delivery.data);
                let item = if auto_ack {
                    Delivery::auto(block)
                } else {
                    let acker = delivery.acker;
                    Delivery::manual(
                        block,
                        Acknowledgement::new(async move {
                            acker
                                .ack(BasicAckOptions::default())
                                .await
                                .map_err(|e| AckError(e.to_string()))
                        }),
                    )
                };
                if tx.send(Ok(item)).is_err() {
                    return;
                }
            }
            let _ = tx.send(Err(BrokerError::ConnectionLost("consumer cancelled".into())));
        });
        Ok(feed.with_task(task))
    }
}
