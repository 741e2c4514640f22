use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use derive_more::{Display, Error, From};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::{
    Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl,
};
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::connection_pool::PgPool;
use crate::models::{
    ChapterDraft, InsertedChapter, LibraryEntry, NewChapter, NewNotification, Notification,
};
use crate::schema::{books, chapters, library, notifications};

embed_migrations!();

#[async_trait]
pub trait ChapterRepository: Send + Sync {
    /// Inserts the chapter if, and only if, `author_id` owns `book_id`.
    ///
    /// Nothing is committed unless the insert finishes within `timeout` and
    /// the returned future is still being polled when it does.
    async fn insert_chapter(
        &self,
        book_id: Uuid,
        author_id: Uuid,
        draft: ChapterDraft,
        timeout: Duration,
    ) -> Result<InsertedChapter, Error>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn list_library_subscribers(&self, book_id: Uuid) -> Result<Vec<Uuid>, Error>;

    /// Returns the number of rows actually written. Rows that collide with an
    /// existing `(user_id, book_id, message)` are skipped.
    async fn insert_notifications(&self, rows: Vec<NewNotification>) -> Result<usize, Error>;

    async fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, Error>;
}

#[async_trait]
pub trait LibraryRepository: Send + Sync {
    async fn add_to_library(&self, entry: LibraryEntry) -> Result<(), Error>;
    async fn remove_from_library(&self, entry: LibraryEntry) -> Result<(), Error>;
}

#[derive(Clone)]
pub struct DieselStore {
    pool: PgPool,
}

impl DieselStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_connection<T, F>(&self, operation: &'static str, f: F) -> Result<T, Error>
    where
        F: FnOnce(&PgConnection) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .instrument(tracing::info_span!("Acquiring a DB Connection."))
            .await?;
        Self::run_blocking(conn, operation, f).await
    }

    async fn run_blocking<T, F>(
        conn: mobc::Connection<crate::connection_pool::PgConnectionManager>,
        operation: &'static str,
        f: F,
    ) -> Result<T, Error>
    where
        F: FnOnce(&PgConnection) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let span = tracing::info_span!("Running DB operation.", operation);
        tokio::task::spawn_blocking(move || {
            let _a = span.enter();
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl ChapterRepository for DieselStore {
    #[tracing::instrument(name = "Inserting a chapter.", err, level = "info", skip(self, draft))]
    async fn insert_chapter(
        &self,
        book_id: Uuid,
        author_id: Uuid,
        draft: ChapterDraft,
        timeout: Duration,
    ) -> Result<InsertedChapter, Error> {
        let deadline = Instant::now() + timeout;
        let conn = tokio::time::timeout(
            timeout,
            self.pool
                .get()
                .instrument(tracing::info_span!("Acquiring a DB Connection.")),
        )
        .await
        .map_err(|_| Error::DeadlineExceeded)??;

        // Set when this future is dropped, so an abandoned upload rolls back.
        let abandoned = AbandonOnDrop::default();
        let abandoned_flag = abandoned.flag();
        let result = Self::run_blocking(conn, "insert_chapter", move |conn| {
            conn.transaction::<_, Error, _>(|| {
                limit_transaction(conn, deadline)?;
                // The row lock keeps the book alive until commit and makes a
                // second upload to the same book wait for this one to commit.
                let book_name: String = books::table
                    .filter(books::id.eq(book_id))
                    .filter(books::author_id.eq(author_id))
                    .select(books::name)
                    .for_update()
                    .first(conn)
                    .optional()?
                    .ok_or(Error::BookNotFound)?;
                let id: Uuid = diesel::insert_into(chapters::table)
                    .values(&NewChapter::from_draft(book_id, &draft))
                    .returning(chapters::id)
                    .get_result(conn)
                    .map_err(|err| match err {
                        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                            Error::ChapterExists
                        }
                        other => Error::QueryResult(other),
                    })?;
                if abandoned_flag.load(Ordering::SeqCst) {
                    return Err(Error::Abandoned);
                }
                if Instant::now() >= deadline {
                    return Err(Error::DeadlineExceeded);
                }
                Ok(InsertedChapter { id, book_name })
            })
        })
        .await;
        drop(abandoned);
        result
    }
}

#[async_trait]
impl NotificationRepository for DieselStore {
    #[tracing::instrument(name = "Listing library subscribers.", err, level = "info", skip(self))]
    async fn list_library_subscribers(&self, book_id: Uuid) -> Result<Vec<Uuid>, Error> {
        self.with_connection("list_library_subscribers", move |conn| {
            Ok(library::table
                .filter(library::book_id.eq(book_id))
                .select(library::user_id)
                .load::<Uuid>(conn)?)
        })
        .await
    }

    #[tracing::instrument(
        name = "Inserting notifications.",
        err,
        level = "info",
        skip(self, rows),
        fields(rows = rows.len())
    )]
    async fn insert_notifications(&self, rows: Vec<NewNotification>) -> Result<usize, Error> {
        if rows.is_empty() {
            return Ok(0);
        }
        let inserted = self
            .with_connection("insert_notifications", move |conn| {
                Ok(diesel::insert_into(notifications::table)
                    .values(&rows)
                    .on_conflict_do_nothing()
                    .execute(conn)?)
            })
            .await?;
        info!(inserted, "Inserted notifications.");
        Ok(inserted)
    }

    #[tracing::instrument(name = "Listing notifications.", err, level = "info", skip(self))]
    async fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, Error> {
        self.with_connection("list_notifications", move |conn| {
            Ok(notifications::table
                .filter(notifications::user_id.eq(user_id))
                .order_by(notifications::id.asc())
                .load::<Notification>(conn)?)
        })
        .await
    }
}

#[async_trait]
impl LibraryRepository for DieselStore {
    #[tracing::instrument(name = "Adding a book to a library.", err, level = "info", skip(self))]
    async fn add_to_library(&self, entry: LibraryEntry) -> Result<(), Error> {
        self.with_connection("add_to_library", move |conn| {
            diesel::insert_into(library::table)
                .values(&entry)
                .on_conflict_do_nothing()
                .execute(conn)
                .map_err(|err| match err {
                    DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                        Error::BookNotFound
                    }
                    other => Error::QueryResult(other),
                })?;
            Ok(())
        })
        .await
    }

    #[tracing::instrument(name = "Removing a book from a library.", err, level = "info", skip(self))]
    async fn remove_from_library(&self, entry: LibraryEntry) -> Result<(), Error> {
        self.with_connection("remove_from_library", move |conn| {
            let deleted =
                diesel::delete(library::table.find((entry.user_id, entry.book_id))).execute(conn)?;
            if deleted == 0 {
                return Err(Error::LibraryEntryNotFound);
            }
            Ok(())
        })
        .await
    }
}

/// Bounds every statement and lock wait in the current transaction by what is
/// left until `deadline`.
fn limit_transaction(conn: &PgConnection, deadline: Instant) -> Result<(), Error> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(Error::DeadlineExceeded);
    }
    let millis = remaining.as_millis().max(1);
    conn.execute(&format!("SET LOCAL statement_timeout = {}", millis))?;
    conn.execute(&format!("SET LOCAL lock_timeout = {}", millis))?;
    Ok(())
}

#[derive(Default)]
struct AbandonOnDrop {
    flag: Arc<AtomicBool>,
}

impl AbandonOnDrop {
    fn flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }
}

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

#[tracing::instrument(name = "Running pending migrations.", err, level = "info", skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> Result<(), Error> {
    let conn = pool.get().await?;
    tokio::task::spawn_blocking(move || embedded_migrations::run(&*conn)).await??;
    Ok(())
}

#[derive(Debug, Display, From, Error)]
pub enum Error {
    #[display(fmt = "EstablishConnection: {}", "_0")]
    EstablishConnection(mobc::Error<diesel::ConnectionError>),
    #[display(fmt = "QueryResult: {}", "_0")]
    QueryResult(diesel::result::Error),
    #[display(fmt = "Migration: {}", "_0")]
    Migration(diesel_migrations::RunMigrationsError),
    #[display(fmt = "BlockingTask: {}", "_0")]
    BlockingTask(tokio::task::JoinError),
    #[display(fmt = "Book not found.")]
    BookNotFound,
    #[display(fmt = "Chapter already exists.")]
    ChapterExists,
    #[display(fmt = "Library entry not found.")]
    LibraryEntryNotFound,
    #[display(fmt = "Deadline exceeded.")]
    DeadlineExceeded,
    #[display(fmt = "Caller went away before commit.")]
    Abandoned,
}
