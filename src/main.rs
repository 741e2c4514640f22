use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use chapter_notify::configuration::Configuration;
use chapter_notify::connection_pool::establish_connection_pool;
use chapter_notify::controllers::{get_server_future, AppContext};
use chapter_notify::queue::{self, RabbitPublisher};
use chapter_notify::store::{run_migrations, DieselStore};
use chapter_notify::{hub, shutdown, telemetry};

/// Messages the hub may hold between handler and hub task.
const HUB_INBOX: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Configuration::from_env()?;
    telemetry::init(config.honeycomb.as_ref())?;

    let pool = establish_connection_pool(&config.database_url, config.db_pool_max_open);
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations.")?;

    let (amqp_connection, channel) = queue::open_channel(&config.rabbit_mq_url)
        .await
        .context("Failed to connect to RabbitMQ.")?;
    queue::declare_queue(&channel).await?;
    let publisher = RabbitPublisher::new(channel)
        .await
        .context("Failed to enable publisher confirms.")?;

    let (hub, hub_handle) = hub::channel(HUB_INBOX);
    let hub_task = tokio::spawn(hub.run());

    let store = Arc::new(DieselStore::new(pool));
    let ctx = Arc::new(AppContext {
        chapters: store.clone(),
        notifications: store.clone(),
        library: store,
        publisher: Arc::new(publisher),
        hub: hub_handle,
        jwt_secret: config.jwt_secret.as_str().into(),
        db_timeout: config.db_timeout,
        requests_per_second: config.requests_per_second,
    });

    let (addr, server) = get_server_future(ctx, config.http_port, shutdown::signal())?;
    info!(%addr, "Listening.");
    server.await;

    // Upgraded sockets outlive the server future and keep hub handles alive.
    hub_task.abort();
    amqp_connection.close(200, "server shutdown").await?;
    info!("Shut down cleanly.");
    Ok(())
}
