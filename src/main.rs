#![allow(clippy::result_large_err)]

use dotenvy::dotenv;
use session_ledger::{
    config::{database, settings},
    errors::Result,
    service::BookingService,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; variables may also be set externally
    dotenv().ok();

    // 3. Load the application configuration
    let app_config = settings::load_app_configuration()
        .inspect_err(|e| error!("Failed to load configuration: {}", e))?;

    // 4. Connect and make sure the tables exist
    let database_url = database::get_database_url(app_config.database_url.as_deref());
    let db = database::create_connection(&database_url)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database initialized successfully."))?;

    let service = BookingService::from_config(db, &app_config);

    // 5. Seed an empty store, then repair any balance left behind by a crash
    service
        .seed_if_empty(&app_config.seed)
        .await
        .inspect_err(|e| error!("Failed to seed store: {}", e))?;
    let corrections = service.reconcile_balances().await?;
    if !corrections.is_empty() {
        warn!(count = corrections.len(), "restored member balances from the ledger");
    }

    // 6. Log change notifications until Ctrl-C
    let mut changes = service.subscribe();
    info!("Session ledger ready. Press Ctrl-C to stop.");
    loop {
        tokio::select! {
            received = changes.recv() => match received {
                Ok(change_set) => {
                    for collection in change_set.collections() {
                        let ids: Vec<_> = change_set.ids(collection).collect();
                        info!(%collection, ?ids, "records changed");
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "change listener lagged"),
                Err(RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutting down.");
                break;
            }
        }
    }

    Ok(())
}
