use derive_more::{Display, Error, From};
use serde::Serialize;
use tracing::error;
use warp::http::StatusCode;
use warp::reply::{self, Json, WithStatus};

use crate::util::error_reply;
use crate::{queue, store};

#[derive(Debug, Display, From, Error)]
pub enum Error {
    #[display(fmt = "BadRequest: {}", "_0")]
    #[from(ignore)]
    BadRequest(#[error(not(source))] String),
    #[display(fmt = "Unauthenticated")]
    Unauthenticated,
    #[display(fmt = "BookNotFound")]
    BookNotFound,
    #[display(fmt = "LibraryEntryNotFound")]
    LibraryEntryNotFound,
    #[display(fmt = "ChapterExists")]
    ChapterExists,
    #[display(fmt = "Store: {}", "_0")]
    #[from(ignore)]
    Store(store::Error),
    #[display(fmt = "Publish: {}", "_0")]
    Publish(queue::Error),
    #[display(fmt = "Timeout: {}", "_0")]
    Timeout(tokio::time::error::Elapsed),
}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Self {
        match err {
            store::Error::BookNotFound => Error::BookNotFound,
            store::Error::ChapterExists => Error::ChapterExists,
            store::Error::LibraryEntryNotFound => Error::LibraryEntryNotFound,
            other => Error::Store(other),
        }
    }
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::BookNotFound | Error::LibraryEntryNotFound => StatusCode::NOT_FOUND,
            Error::ChapterExists => StatusCode::CONFLICT,
            Error::Store(_) | Error::Publish(_) | Error::Timeout(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn public_message(&self) -> String {
        match self {
            Error::BadRequest(message) => message.clone(),
            Error::Unauthenticated => "unauthenticated".into(),
            Error::BookNotFound => "book not found".into(),
            Error::LibraryEntryNotFound => "library entry not found".into(),
            Error::ChapterExists => "chapter already exists".into(),
            Error::Store(_) | Error::Publish(_) | Error::Timeout(_) => {
                "internal server error".into()
            }
        }
    }

    pub fn into_reply(self) -> WithStatus<Json> {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, %status, "Request failed.");
        }
        error_reply(status, self.public_message())
    }
}

pub fn map_result<T: Serialize>(result: Result<T, Error>, success: StatusCode) -> WithStatus<Json> {
    match result {
        Ok(body) => reply::with_status(reply::json(&body), success),
        Err(err) => err.into_reply(),
    }
}
