use std::{net::SocketAddr, sync::Arc};

use governor::{clock, state::keyed::DefaultKeyedStateStore, RateLimiter};
use warp::{
    filters::BoxedFilter,
    http::StatusCode,
    reply::{Json, WithStatus},
    Filter, Rejection, Reply,
};

use crate::util::error_reply;

pub type IpLimiter = Arc<
    RateLimiter<Option<SocketAddr>, DefaultKeyedStateStore<Option<SocketAddr>>, clock::DefaultClock>,
>;

/// Answers 429 once a remote address exceeds its quota. Under quota the
/// filter rejects, so the request falls through to the routes after it.
pub fn ip_rate_limit_filter(limiter: IpLimiter) -> BoxedFilter<(impl Reply,)> {
    warp::addr::remote()
        .and(warp::any().map(move || limiter.clone()))
        .and_then(check_ip_limiter)
        .boxed()
}

async fn check_ip_limiter(
    ip: Option<SocketAddr>,
    limiter: IpLimiter,
) -> Result<WithStatus<Json>, Rejection> {
    match limiter.check_key(&ip) {
        Ok(_) => Err(warp::reject()),
        Err(_) => Ok(error_reply(
            StatusCode::TOO_MANY_REQUESTS,
            "rate limit exceeded",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nonzero_ext::nonzero;

    #[tokio::test]
    async fn rejects_under_quota_and_replies_429_over_it() {
        let limiter: IpLimiter = Arc::new(RateLimiter::keyed(governor::Quota::per_second(
            nonzero!(1u32),
        )));
        let filter = ip_rate_limit_filter(limiter);

        assert!(warp::test::request().filter(&filter).await.is_err());
        let response = warp::test::request().reply(&filter).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
