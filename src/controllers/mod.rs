use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use serde_json::json;
use tracing::error;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::hub::HubHandle;
use crate::queue::EventPublisher;
use crate::rate_limit::ip_rate_limit_filter;
use crate::store::{ChapterRepository, LibraryRepository, NotificationRepository};
use crate::util::error_reply;

pub mod chapters;
pub mod errors;
pub mod library;
pub mod notifications;
pub mod websocket;

pub use errors::Error;

pub const MAX_BODY_BYTES: u64 = 1024 * 1024;

/// Everything a request handler may touch.
pub struct AppContext {
    pub chapters: Arc<dyn ChapterRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub library: Arc<dyn LibraryRepository>,
    pub publisher: Arc<dyn EventPublisher>,
    pub hub: HubHandle,
    pub jwt_secret: Arc<str>,
    pub db_timeout: Duration,
    pub requests_per_second: NonZeroU32,
}

pub(crate) fn with_context(
    ctx: Arc<AppContext>,
) -> impl Filter<Extract = (Arc<AppContext>,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

pub fn routes(ctx: Arc<AppContext>) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let ip_limiter = Arc::new(RateLimiter::keyed(Quota::per_second(
        ctx.requests_per_second,
    )));
    let ip_rate_limiter = ip_rate_limit_filter(ip_limiter);

    let health_hub = ctx.hub.clone();
    let health_route = warp::path!("health")
        .and(warp::get())
        .map(move || {
            warp::reply::json(&json!({
                "status": "ok",
                "connections": health_hub.connection_counts(),
            }))
        });

    let chapter_routes = chapters::get_filters(ctx.clone());
    let library_routes = library::get_filters(ctx.clone());
    let notification_routes = notifications::get_filters(ctx.clone());
    let websocket_routes = websocket::get_filters(ctx);

    health_route
        .or(ip_rate_limiter)
        .or(chapter_routes)
        .or(library_routes)
        .or(notification_routes)
        .or(websocket_routes)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not found")
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
    } else if rejection.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "content length required")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else if rejection.find::<warp::reject::MissingHeader>().is_some()
        || rejection.find::<warp::reject::InvalidHeader>().is_some()
    {
        (StatusCode::BAD_REQUEST, "invalid request headers")
    } else {
        error!(?rejection, "Unhandled rejection.");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    };
    Ok(error_reply(status, message))
}

pub fn get_server_future(
    ctx: Arc<AppContext>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, impl Future<Output = ()>), warp::Error> {
    warp::serve(routes(ctx)).try_bind_with_graceful_shutdown(([0, 0, 0, 0], port), shutdown)
}
