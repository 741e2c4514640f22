#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;

pub mod auth;
pub mod configuration;
pub mod connection_pool;
pub mod controllers;
pub mod honeycomb;
pub mod hub;
pub mod models;
pub mod queue;
pub mod rate_limit;
pub mod schema;
pub mod shutdown;
pub mod store;
pub mod tasks;
pub mod telemetry;
pub mod util;
