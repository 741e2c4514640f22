use std::convert::Infallible;
use std::sync::Arc;

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use warp::Filter;

use crate::hub::Role;

pub const AUTH_COOKIE: &str = "token";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default)]
    pub admin: bool,
    pub exp: usize,
}

/// The authenticated caller, as carried by the auth cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            role: if claims.admin {
                Role::Admin
            } else {
                Role::Regular
            },
        }
    }
}

pub fn verify_token(token: &str, secret: &str) -> Option<Identity> {
    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(data) => Some(data.claims.into()),
        Err(err) => {
            debug!(error = %err, "Rejected auth cookie.");
            None
        }
    }
}

/// Extracts the caller from the auth cookie. Never rejects: a missing or
/// invalid token yields `None` and the handler decides what that means.
pub fn identity(
    secret: Arc<str>,
) -> impl Filter<Extract = (Option<Identity>,), Error = Infallible> + Clone {
    warp::cookie::optional::<String>(AUTH_COOKIE).map(move |token: Option<String>| {
        token.and_then(|token| verify_token(&token, &secret))
    })
}
