use std::sync::Arc;

use tracing::info;

use bookings::config::Config;
use bookings::engine::{Engine, run_compactor};
use bookings::mail::{LogTransport, MailQueue, run_mailer};
use bookings::Bookings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    bookings::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(Engine::open(config.wal_path())?);
    let (mail, mail_rx) = MailQueue::new(config.mail_queue_capacity);
    let mailer = tokio::spawn(run_mailer(mail_rx, Arc::new(LogTransport)));
    let compactor = tokio::spawn(run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    let bookings = Bookings::new(engine, &config, mail);
    let seeded = bookings.seed_rooms(&config.seed_rooms).await?;
    let rooms = bookings.catalog.list().await?;

    info!("bookings engine ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  rooms: {} ({seeded} seeded)", rooms.len());
    info!("  op_timeout: {:?}", config.op_timeout);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await?;
        }
        Ok::<(), std::io::Error>(())
    };
    shutdown.await?;
    info!("shutdown signal received");

    // Dropping the last queue handle lets the mailer drain and exit.
    compactor.abort();
    drop(bookings);
    if tokio::time::timeout(std::time::Duration::from_secs(10), mailer)
        .await
        .is_err()
    {
        tracing::warn!("mail queue not drained before shutdown");
    }

    info!("bookings stopped");
    Ok(())
}
