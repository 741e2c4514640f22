//! Shared fixtures for the integration tests.
//!
//! `MemoryStore` and `RecordingPublisher` stand in for Postgres and RabbitMQ
//! behind the same traits the binaries wire to the real backends.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use nonzero_ext::nonzero;
use uuid::Uuid;

use chapter_notify::auth::{Claims, AUTH_COOKIE};
use chapter_notify::controllers::AppContext;
use chapter_notify::hub::{self, HubHandle};
use chapter_notify::models::{
    ChapterDraft, InsertedChapter, LibraryEntry, NewNotification, Notification,
};
use chapter_notify::queue::{self, ChapterUploadedEvent, EventPublisher};
use chapter_notify::store::{self, ChapterRepository, LibraryRepository, NotificationRepository};
use chapter_notify::tasks::{NotificationWorker, Outcome};

pub const JWT_SECRET: &str = "integration-test-secret";

#[derive(Debug, Clone)]
pub struct Book {
    pub id: Uuid,
    pub author_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChapter {
    pub id: Uuid,
    pub book_id: Uuid,
    pub chapter_no: i32,
    pub title: String,
}

#[derive(Default)]
struct State {
    books: Vec<Book>,
    chapters: Vec<StoredChapter>,
    library: Vec<LibraryEntry>,
    notifications: Vec<Notification>,
    next_notification_id: i64,
}

/// Postgres double that keeps the constraints the real schema enforces.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    failing_inserts: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn add_book(&self, author_id: Uuid, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().books.push(Book {
            id,
            author_id,
            name: name.into(),
        });
        id
    }

    pub fn subscribe(&self, user_id: Uuid, book_id: Uuid) {
        self.state
            .lock()
            .unwrap()
            .library
            .push(LibraryEntry { user_id, book_id });
    }

    /// The next `count` notification inserts fail before writing anything.
    pub fn fail_next_inserts(&self, count: usize) {
        self.failing_inserts.store(count, Ordering::SeqCst);
    }

    /// Every repository call sleeps this long first.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn chapters(&self) -> Vec<StoredChapter> {
        self.state.lock().unwrap().chapters.clone()
    }

    pub fn all_notifications(&self) -> Vec<Notification> {
        self.state.lock().unwrap().notifications.clone()
    }

    pub fn notifications_for_book(&self, book_id: Uuid) -> Vec<Notification> {
        self.all_notifications()
            .into_iter()
            .filter(|n| n.book_id == book_id)
            .collect()
    }

    async fn wait(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn transient() -> store::Error {
    store::Error::QueryResult(diesel::result::Error::RollbackTransaction)
}

#[async_trait]
impl ChapterRepository for MemoryStore {
    async fn insert_chapter(
        &self,
        book_id: Uuid,
        author_id: Uuid,
        draft: ChapterDraft,
        timeout: Duration,
    ) -> Result<InsertedChapter, store::Error> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(store::Error::DeadlineExceeded);
            }
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        let book_name = state
            .books
            .iter()
            .find(|book| book.id == book_id && book.author_id == author_id)
            .map(|book| book.name.clone())
            .ok_or(store::Error::BookNotFound)?;
        if state
            .chapters
            .iter()
            .any(|c| c.book_id == book_id && c.chapter_no == draft.chapter_no)
        {
            return Err(store::Error::ChapterExists);
        }
        let id = Uuid::new_v4();
        state.chapters.push(StoredChapter {
            id,
            book_id,
            chapter_no: draft.chapter_no,
            title: draft.title,
        });
        Ok(InsertedChapter { id, book_name })
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn list_library_subscribers(&self, book_id: Uuid) -> Result<Vec<Uuid>, store::Error> {
        self.wait().await;
        Ok(self
            .state
            .lock()
            .unwrap()
            .library
            .iter()
            .filter(|entry| entry.book_id == book_id)
            .map(|entry| entry.user_id)
            .collect())
    }

    async fn insert_notifications(&self, rows: Vec<NewNotification>) -> Result<usize, store::Error> {
        self.wait().await;
        if self
            .failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(transient());
        }
        let mut state = self.state.lock().unwrap();
        let mut inserted = 0;
        for row in rows {
            let exists = state.notifications.iter().any(|n| {
                n.user_id == row.user_id && n.book_id == row.book_id && n.message == row.message
            });
            if exists {
                continue;
            }
            state.next_notification_id += 1;
            let id = state.next_notification_id;
            state.notifications.push(Notification {
                id,
                user_id: row.user_id,
                book_id: row.book_id,
                message: row.message,
                created_at: Utc::now(),
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, store::Error> {
        self.wait().await;
        Ok(self
            .state
            .lock()
            .unwrap()
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LibraryRepository for MemoryStore {
    async fn add_to_library(&self, entry: LibraryEntry) -> Result<(), store::Error> {
        self.wait().await;
        let mut state = self.state.lock().unwrap();
        if !state.books.iter().any(|book| book.id == entry.book_id) {
            return Err(store::Error::BookNotFound);
        }
        if !state.library.contains(&entry) {
            state.library.push(entry);
        }
        Ok(())
    }

    async fn remove_from_library(&self, entry: LibraryEntry) -> Result<(), store::Error> {
        self.wait().await;
        let mut state = self.state.lock().unwrap();
        let before = state.library.len();
        state.library.retain(|existing| existing != &entry);
        if state.library.len() == before {
            return Err(store::Error::LibraryEntryNotFound);
        }
        Ok(())
    }
}

/// Queue double: remembers what was published, in order.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<ChapterUploadedEvent>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<ChapterUploadedEvent> {
        self.published.lock().unwrap().clone()
    }

    /// Published envelopes as the broker would hand them to the worker.
    pub fn queue(&self) -> VecDeque<Vec<u8>> {
        self.published()
            .iter()
            .map(|event| event.to_bytes().unwrap())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &ChapterUploadedEvent) -> Result<(), queue::Error> {
        if self.failing.load(Ordering::SeqCst) {
            let err = serde_json::from_str::<serde_json::Value>("").unwrap_err();
            return Err(queue::Error::Serialization(err));
        }
        self.published.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Runs the worker over `queue` the way a prefetch-one consumer would:
/// acked and dropped deliveries leave, requeued ones go to the back.
pub async fn drain(worker: &NotificationWorker, queue: &mut VecDeque<Vec<u8>>) -> Vec<Outcome> {
    let mut outcomes = Vec::new();
    while let Some(body) = queue.pop_front() {
        assert!(outcomes.len() < 100, "queue never drained");
        let outcome = worker.process(&body).await;
        if outcome == (Outcome::Nack { requeue: true }) {
            queue.push_back(body);
        }
        outcomes.push(outcome);
    }
    outcomes
}

/// The scenario fixture: "Sunrise" by A1 in U1's and U2's libraries, U3
/// following a different book, and A3's "Nightfall" with no readers.
pub struct Seed {
    pub a1: Uuid,
    pub a2: Uuid,
    pub a3: Uuid,
    pub u1: Uuid,
    pub u2: Uuid,
    pub u3: Uuid,
    pub b1: Uuid,
    pub b2: Uuid,
    pub b3: Uuid,
}

pub fn seed(store: &MemoryStore) -> Seed {
    let (a1, a2, a3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (u1, u2, u3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let b1 = store.add_book(a1, "Sunrise");
    let b2 = store.add_book(a2, "Moonrise");
    let b3 = store.add_book(a3, "Nightfall");
    store.subscribe(u1, b1);
    store.subscribe(u2, b1);
    store.subscribe(u3, b2);
    Seed {
        a1,
        a2,
        a3,
        u1,
        u2,
        u3,
        b1,
        b2,
        b3,
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub hub: HubHandle,
    pub ctx: Arc<AppContext>,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::spawn_with_timeout(Duration::from_secs(15))
    }

    pub fn spawn_with_timeout(db_timeout: Duration) -> Self {
        let store = Arc::new(MemoryStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let (hub, hub_handle) = hub::channel(64);
        tokio::spawn(hub.run());
        let ctx = Arc::new(AppContext {
            chapters: store.clone(),
            notifications: store.clone(),
            library: store.clone(),
            publisher: publisher.clone(),
            hub: hub_handle.clone(),
            jwt_secret: Arc::from(JWT_SECRET),
            db_timeout,
            requests_per_second: nonzero!(1000u32),
        });
        Self {
            store,
            publisher,
            hub: hub_handle,
            ctx,
        }
    }

    pub fn worker(&self) -> NotificationWorker {
        NotificationWorker::new(self.store.clone(), Duration::from_secs(15))
    }
}

pub fn token_for(user_id: Uuid, admin: bool) -> String {
    let claims = Claims {
        sub: user_id,
        admin,
        exp: (Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn cookie_for(user_id: Uuid, admin: bool) -> String {
    format!("{}={}", AUTH_COOKIE, token_for(user_id, admin))
}

pub fn chapter_body(chapter_no: i64) -> serde_json::Value {
    serde_json::json!({ "title": "Dawn", "chapterNo": chapter_no, "content": "..." })
}

pub fn chapters_path(book_id: impl std::fmt::Display) -> String {
    format!("/api/v1/books/{}/chapters", book_id)
}
