use std::sync::Arc;

use tokio::time::timeout;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Filter, Reply};

use super::errors::{map_result, Error};
use super::{with_context, AppContext};
use crate::auth::{self, Identity};
use crate::models::Notification;

/// The caller's notifications, oldest first. Clients call this after a
/// reconnect to catch up on anything the live push missed.
#[tracing::instrument(
name = "Listing notifications.",
err,
level = "info",
skip(ctx),
fields(
    request_id = %Uuid::new_v4(),
)
)]
pub async fn list_notifications(
    actor: Option<Identity>,
    ctx: Arc<AppContext>,
) -> Result<Vec<Notification>, Error> {
    let actor = actor.ok_or(Error::Unauthenticated)?;
    Ok(timeout(ctx.db_timeout, ctx.notifications.list_notifications(actor.user_id)).await??)
}

pub fn get_filters(
    ctx: Arc<AppContext>,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "v1" / "notifications")
        .and(warp::get())
        .and(auth::identity(ctx.jwt_secret.clone()))
        .and(with_context(ctx))
        .then(list_notifications)
        .map(|result: Result<Vec<Notification>, Error>| map_result(result, StatusCode::OK))
}
