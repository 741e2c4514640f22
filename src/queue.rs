use async_trait::async_trait;
use derive_more::{Display, Error, From};
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions,
    QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub const CHAPTER_UPLOADED_QUEUE: &str = "book.chapter_uploaded";
const CONSUMER_TAG: &str = "notification-worker";

const CONTENT_TYPE_JSON: &str = "application/json";
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Envelope carried by `book.chapter_uploaded`. The message is fixed when the
/// chapter commits so every redelivery writes the same notification text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterUploadedEvent {
    #[serde(rename = "BookID")]
    pub book_id: Uuid,
    #[serde(rename = "Message")]
    pub message: String,
}

impl ChapterUploadedEvent {
    pub fn new(book_id: Uuid, book_name: &str, chapter_no: i32) -> Self {
        Self {
            book_id,
            message: format!("{} chapter {}", book_name, chapter_no),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &ChapterUploadedEvent) -> Result<(), Error>;
}

pub struct RabbitPublisher {
    channel: Channel,
}

impl RabbitPublisher {
    /// Puts the channel in confirm mode so every publish waits for the broker.
    pub async fn new(channel: Channel) -> Result<Self, Error> {
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        Ok(Self { channel })
    }
}

fn check_confirmation(confirmation: Confirmation) -> Result<(), Error> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(Error::Rejected),
        Confirmation::NotRequested => Err(Error::Unconfirmed),
    }
}

#[async_trait]
impl EventPublisher for RabbitPublisher {
    #[tracing::instrument(
        name = "Publishing chapter uploaded event.",
        err,
        level = "info",
        skip(self, event),
        fields(book_id = %event.book_id)
    )]
    async fn publish(&self, event: &ChapterUploadedEvent) -> Result<(), Error> {
        let payload = event.to_bytes()?;
        let properties = BasicProperties::default()
            .with_content_type(CONTENT_TYPE_JSON.into())
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT);
        let confirmation = self
            .channel
            .basic_publish(
                "",
                CHAPTER_UPLOADED_QUEUE,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?
            .await?;
        check_confirmation(confirmation)
    }
}

#[tracing::instrument(name = "Connecting to RabbitMQ.", err, level = "info", skip(uri))]
pub async fn open_channel(uri: &str) -> Result<(Connection, Channel), Error> {
    let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;
    info!(channel_id = channel.id(), "Opened AMQP channel.");
    Ok((connection, channel))
}

pub async fn declare_queue(channel: &Channel) -> Result<(), Error> {
    channel
        .queue_declare(
            CHAPTER_UPLOADED_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// Restricts the channel to one unacknowledged delivery at a time.
pub async fn set_prefetch_one(channel: &Channel) -> Result<(), Error> {
    channel.basic_qos(1, BasicQosOptions::default()).await?;
    Ok(())
}

/// Starts consuming `book.chapter_uploaded` with manual acknowledgement.
pub async fn start_consumer(channel: &Channel) -> Result<Consumer, Error> {
    let consumer = channel
        .basic_consume(
            CHAPTER_UPLOADED_QUEUE,
            CONSUMER_TAG,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;
    info!(queue = CHAPTER_UPLOADED_QUEUE, "Consuming.");
    Ok(consumer)
}

#[derive(Debug, Display, From, Error)]
pub enum Error {
    #[display(fmt = "Amqp: {}", "_0")]
    Amqp(lapin::Error),
    #[display(fmt = "Serialization: {}", "_0")]
    Serialization(serde_json::Error),
    #[display(fmt = "Broker rejected the message.")]
    Rejected,
    #[display(fmt = "Publish was not confirmed; channel is not in confirm mode.")]
    Unconfirmed,
}
