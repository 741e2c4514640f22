use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use derive_more::{Display, Error, From};
use futures::StreamExt;
use itertools::Itertools;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use lapin::Consumer;
use tokio::time::timeout;
use tracing::{error, info, warn, Span};

use crate::models::NewNotification;
use crate::queue::ChapterUploadedEvent;
use crate::store::{self, NotificationRepository};

/// How a delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ack,
    Nack { requeue: bool },
}

impl Outcome {
    const REQUEUE: Outcome = Outcome::Nack { requeue: true };
    const DROP: Outcome = Outcome::Nack { requeue: false };
}

/// Turns `book.chapter_uploaded` envelopes into notification rows.
///
/// Safe to run in several processes at once and to feed the same envelope
/// more than once: the insert skips rows that already exist.
pub struct NotificationWorker {
    store: Arc<dyn NotificationRepository>,
    db_timeout: Duration,
}

impl NotificationWorker {
    pub fn new(store: Arc<dyn NotificationRepository>, db_timeout: Duration) -> Self {
        Self { store, db_timeout }
    }

    #[tracing::instrument(
    name = "Processing a chapter upload.",
    level = "info",
    skip(self, body),
    fields(book_id = tracing::field::Empty)
    )]
    pub async fn process(&self, body: &[u8]) -> Outcome {
        let event = match ChapterUploadedEvent::from_bytes(body) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "Dropping undecodable envelope.");
                return Outcome::DROP;
            }
        };
        Span::current().record("book_id", &tracing::field::display(event.book_id));

        // One deadline covers every DB call made for this delivery.
        match timeout(self.db_timeout, self.store_notifications(&event)).await {
            Ok(Ok(None)) => {
                info!("Book has no library subscribers.");
                Outcome::Ack
            }
            Ok(Ok(Some((subscriber_count, inserted)))) => {
                info!(subscriber_count, inserted, "Notifications stored.");
                Outcome::Ack
            }
            Ok(Err(err)) => {
                error!(error = %err, "Failed to store notifications, requeueing.");
                Outcome::REQUEUE
            }
            Err(elapsed) => {
                error!(error = %elapsed, "Delivery ran out of time, requeueing.");
                Outcome::REQUEUE
            }
        }
    }

    /// Returns `None` when nobody has the book in their library, otherwise
    /// the subscriber count and the number of rows actually written.
    async fn store_notifications(
        &self,
        event: &ChapterUploadedEvent,
    ) -> Result<Option<(usize, usize)>, store::Error> {
        let subscribers = self.store.list_library_subscribers(event.book_id).await?;
        if subscribers.is_empty() {
            return Ok(None);
        }
        let rows = subscribers
            .into_iter()
            .unique()
            .map(|user_id| NewNotification {
                user_id,
                book_id: event.book_id,
                message: event.message.clone(),
            })
            .collect_vec();
        let subscriber_count = rows.len();
        let inserted = self.store.insert_notifications(rows).await?;
        Ok(Some((subscriber_count, inserted)))
    }
}

/// Feeds deliveries to the worker one at a time until `shutdown` resolves.
/// Returns an error if the broker stops delivering or refuses a settlement.
pub async fn consume_chapter_uploads_loop(
    mut consumer: Consumer,
    worker: NotificationWorker,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Error> {
    tokio::pin!(shutdown);
    loop {
        let delivery = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, leaving consume loop.");
                return Ok(());
            }
            next = consumer.next() => match next {
                Some(delivery) => delivery?,
                None => return Err(Error::ConsumerClosed),
            },
        };
        let outcome = worker.process(&delivery.data).await;
        settle(&delivery, outcome).await?;
    }
}

async fn settle(delivery: &Delivery, outcome: Outcome) -> Result<(), lapin::Error> {
    match outcome {
        Outcome::Ack => delivery.acker.ack(BasicAckOptions::default()).await,
        Outcome::Nack { requeue } => {
            delivery
                .acker
                .nack(BasicNackOptions {
                    requeue,
                    ..BasicNackOptions::default()
                })
                .await
        }
    }
}

#[derive(Debug, Display, From, Error)]
pub enum Error {
    #[display(fmt = "Amqp: {}", "_0")]
    Amqp(lapin::Error),
    #[display(fmt = "Consumer stream closed.")]
    ConsumerClosed,
}
