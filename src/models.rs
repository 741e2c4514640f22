use crate::schema::{chapters, library, notifications};

use chrono::{DateTime, Utc};
use diesel::Queryable;
use serde::Serialize;
use uuid::Uuid;

/// Chapter fields supplied by the author. Validation happens in the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterDraft {
    pub title: String,
    pub chapter_no: i32,
    pub content: String,
}

#[derive(Insertable, Debug)]
#[table_name = "chapters"]
pub struct NewChapter<'a> {
    pub id: Uuid,
    pub book_id: Uuid,
    pub chapter_no: i32,
    pub title: &'a str,
    pub content: &'a str,
}

impl<'a> NewChapter<'a> {
    pub fn from_draft(book_id: Uuid, draft: &'a ChapterDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            book_id,
            chapter_no: draft.chapter_no,
            title: &draft.title,
            content: &draft.content,
        }
    }
}

/// Result of a committed chapter insert. `book_name` is read inside the same
/// transaction, so it is the name the notification message is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedChapter {
    pub id: Uuid,
    pub book_name: String,
}

#[derive(Insertable, Debug, Clone, PartialEq, Eq)]
#[table_name = "library"]
pub struct LibraryEntry {
    pub user_id: Uuid,
    pub book_id: Uuid,
}

#[derive(Insertable, Debug, Clone, PartialEq, Eq, Hash)]
#[table_name = "notifications"]
pub struct NewNotification {
    pub user_id: Uuid,
    pub book_id: Uuid,
    pub message: String,
}

#[derive(Queryable, PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    #[serde(skip)]
    pub user_id: Uuid,
    pub book_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
