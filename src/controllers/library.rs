use std::sync::Arc;

use serde_json::Value;
use tokio::time::timeout;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Filter, Reply};

use super::errors::{map_result, Error};
use super::{with_context, AppContext};
use crate::auth::{self, Identity};
use crate::models::LibraryEntry;

fn library_entry(book_id: &str, actor: Option<Identity>) -> Result<LibraryEntry, Error> {
    let actor = actor.ok_or(Error::Unauthenticated)?;
    let book_id =
        Uuid::parse_str(book_id).map_err(|_| Error::bad_request("book id must be a uuid"))?;
    Ok(LibraryEntry {
        user_id: actor.user_id,
        book_id,
    })
}

#[tracing::instrument(
name = "Adding a book to the library.",
err,
level = "info",
skip(ctx),
fields(
    request_id = %Uuid::new_v4(),
)
)]
pub async fn add_to_library(
    book_id: String,
    actor: Option<Identity>,
    ctx: Arc<AppContext>,
) -> Result<serde_json::Map<String, Value>, Error> {
    let entry = library_entry(&book_id, actor)?;
    timeout(ctx.db_timeout, ctx.library.add_to_library(entry)).await??;
    Ok(serde_json::Map::new())
}

#[tracing::instrument(
name = "Removing a book from the library.",
err,
level = "info",
skip(ctx),
fields(
    request_id = %Uuid::new_v4(),
)
)]
pub async fn remove_from_library(
    book_id: String,
    actor: Option<Identity>,
    ctx: Arc<AppContext>,
) -> Result<serde_json::Map<String, Value>, Error> {
    let entry = library_entry(&book_id, actor)?;
    timeout(ctx.db_timeout, ctx.library.remove_from_library(entry)).await??;
    Ok(serde_json::Map::new())
}

pub fn get_filters(
    ctx: Arc<AppContext>,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    let add_ctx = ctx.clone();
    let add_filter = warp::path!("api" / "v1" / "library" / String)
        .and(warp::post())
        .and(auth::identity(ctx.jwt_secret.clone()))
        .and(with_context(add_ctx))
        .then(add_to_library)
        .map(|result: Result<serde_json::Map<String, Value>, Error>| {
            map_result(result, StatusCode::CREATED)
        });
    let remove_filter = warp::path!("api" / "v1" / "library" / String)
        .and(warp::delete())
        .and(auth::identity(ctx.jwt_secret.clone()))
        .and(with_context(ctx))
        .then(remove_from_library)
        .map(|result: Result<serde_json::Map<String, Value>, Error>| {
            map_result(result, StatusCode::OK)
        });
    add_filter.or(remove_filter)
}
