use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use chapter_notify::configuration::Configuration;
use chapter_notify::connection_pool::establish_connection_pool;
use chapter_notify::store::DieselStore;
use chapter_notify::tasks::{consume_chapter_uploads_loop, NotificationWorker};
use chapter_notify::{queue, shutdown, telemetry};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = ?err, "Notification worker stopped.");
            eprintln!("notification-worker: {:?}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Configuration::from_env()?;
    telemetry::init(config.honeycomb.as_ref())?;

    let pool = establish_connection_pool(&config.database_url, config.db_pool_max_open);
    pool.get()
        .await
        .context("Failed to connect to the database.")?;

    let (amqp_connection, channel) = queue::open_channel(&config.rabbit_mq_url)
        .await
        .context("Failed to connect to RabbitMQ.")?;
    queue::declare_queue(&channel).await?;
    queue::set_prefetch_one(&channel).await?;
    let consumer = queue::start_consumer(&channel)
        .await
        .context("Failed to start consuming.")?;

    let worker = NotificationWorker::new(Arc::new(DieselStore::new(pool)), config.db_timeout);
    consume_chapter_uploads_loop(consumer, worker, shutdown::signal()).await?;

    amqp_connection.close(200, "worker shutdown").await?;
    info!("Notification worker shut down cleanly.");
    Ok(())
}
