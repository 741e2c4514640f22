use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::{Filter, Reply};

use super::errors::{map_result, Error};
use super::{with_context, AppContext, MAX_BODY_BYTES};
use crate::auth::{self, Identity};
use crate::hub::{Broadcast, HubEvent};
use crate::models::ChapterDraft;
use crate::queue::ChapterUploadedEvent;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChapterRequest {
    pub title: String,
    pub chapter_no: i64,
    pub content: String,
}

impl UploadChapterRequest {
    fn into_draft(self) -> Result<ChapterDraft, Error> {
        if self.title.trim().is_empty() {
            return Err(Error::bad_request("title must not be empty"));
        }
        if self.content.trim().is_empty() {
            return Err(Error::bad_request("content must not be empty"));
        }
        let chapter_no = i32::try_from(self.chapter_no)
            .ok()
            .filter(|no| *no > 0)
            .ok_or_else(|| Error::bad_request("chapterNo must be a positive integer"))?;
        Ok(ChapterDraft {
            title: self.title,
            chapter_no,
            content: self.content,
        })
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ChapterCreated {
    pub id: Uuid,
}

/// Commits the chapter, enqueues the notification event and pushes a live
/// event to the hub, in that order.
///
/// Nothing is published unless the insert committed. The store rolls the
/// insert back if it cannot commit within `db_timeout` or if this future is
/// dropped first. A publish failure after the commit is reported as an
/// internal error and the chapter stays.
#[tracing::instrument(
name = "Uploading a chapter.",
err,
level = "info",
skip(ctx, request),
fields(
    request_id = %Uuid::new_v4(),
)
)]
pub async fn upload_chapter(
    ctx: &AppContext,
    book_id: &str,
    actor_id: Uuid,
    request: UploadChapterRequest,
) -> Result<ChapterCreated, Error> {
    let book_id =
        Uuid::parse_str(book_id).map_err(|_| Error::bad_request("book id must be a uuid"))?;
    let draft = request.into_draft()?;
    let chapter_no = draft.chapter_no;

    let inserted = ctx
        .chapters
        .insert_chapter(book_id, actor_id, draft, ctx.db_timeout)
        .await?;
    info!(chapter_id = %inserted.id, "Chapter committed.");

    let event = ChapterUploadedEvent::new(book_id, &inserted.book_name, chapter_no);
    ctx.publisher.publish(&event).await?;

    let live = Broadcast {
        event: HubEvent::chapter_uploaded(book_id, event.message),
        target: Some(actor_id),
    };
    if let Err(err) = ctx.hub.broadcast(live) {
        warn!(error = %err, "Live push skipped.");
    }

    Ok(ChapterCreated { id: inserted.id })
}

async fn upload_chapter_handler(
    book_id: String,
    actor: Option<Identity>,
    body: Bytes,
    ctx: Arc<AppContext>,
) -> Result<ChapterCreated, Error> {
    let actor = actor.ok_or(Error::Unauthenticated)?;
    let request: UploadChapterRequest = serde_json::from_slice(&body)
        .map_err(|err| Error::bad_request(format!("invalid request body: {}", err)))?;
    upload_chapter(&ctx, &book_id, actor.user_id, request).await
}

pub fn get_filters(
    ctx: Arc<AppContext>,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "v1" / "books" / String / "chapters")
        .and(warp::post())
        .and(auth::identity(ctx.jwt_secret.clone()))
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_context(ctx))
        .then(upload_chapter_handler)
        .map(|result: Result<ChapterCreated, Error>| {
            map_result(result, StatusCode::CREATED)
        })
}
