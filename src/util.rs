use derive_more::From;
use serde::Serialize;
use warp::http::StatusCode;
use warp::reply::{self, Json, WithStatus};

/// Body of every failed API response.
#[derive(Serialize, From, Debug)]
pub struct ErrorMessage {
    pub error: String,
}

impl From<&str> for ErrorMessage {
    fn from(x: &str) -> Self {
        x.to_owned().into()
    }
}

pub fn error_reply(status: StatusCode, message: impl Into<ErrorMessage>) -> WithStatus<Json> {
    reply::with_status(reply::json(&message.into()), status)
}
