use std::env;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use derive_more::{Display, Error};
use nonzero_ext::nonzero;

#[derive(Debug, Clone)]
pub struct Configuration {
    pub database_url: String,
    pub rabbit_mq_url: String,
    pub jwt_secret: String,
    pub http_port: u16,
    pub db_pool_max_open: u64,
    pub db_timeout: Duration,
    pub requests_per_second: NonZeroU32,
    pub honeycomb: Option<HoneycombConfiguration>,
}

#[derive(Debug, Clone)]
pub struct HoneycombConfiguration {
    pub api_key: String,
    pub dataset: String,
}

impl Configuration {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Configuration, Error> {
        dotenv::dotenv().ok();
        Ok(Configuration {
            database_url: required("DB_CONN")?,
            rabbit_mq_url: required("RABBIT_MQ_CONN")?,
            jwt_secret: required("JWT_SECRET")?,
            http_port: parsed_or("HTTP_PORT", 3000)?,
            db_pool_max_open: parsed_or("DB_POOL_MAX_OPEN", 16)?,
            db_timeout: Duration::from_secs(parsed_or("DB_TIMEOUT_SECS", 15)?),
            requests_per_second: parsed_or("RATE_LIMIT_PER_SECOND", nonzero!(20u32))?,
            honeycomb: match (env::var("HONEYCOMB_API_KEY"), env::var("HONEYCOMB_DATASET")) {
                (Ok(api_key), Ok(dataset)) => Some(HoneycombConfiguration { api_key, dataset }),
                _ => None,
            },
        })
    }
}

fn required(name: &'static str) -> Result<String, Error> {
    env::var(name).map_err(|_| Error::Missing { name })
}

fn parsed_or<T: FromStr>(name: &'static str, default: T) -> Result<T, Error> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| Error::Invalid { name, raw }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Display, Error)]
pub enum Error {
    #[display(fmt = "Environment variable {} must be set.", name)]
    Missing { name: &'static str },
    #[display(fmt = "Environment variable {} has invalid value {:?}.", name, raw)]
    Invalid { name: &'static str, raw: String },
}
