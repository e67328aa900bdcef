use std::sync::Arc;

use tokio::{signal, sync::mpsc};
use tracing::info;

use packhouse_api as api;
use packhouse_api::services::{
    packing::PackingService, picking::PickingService, reaper::SessionReaper,
    sessions::SessionService, stock::StockLedgerService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&pool).await?;
    }
    let db = Arc::new(pool);

    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    let sessions = Arc::new(SessionService::new(db.clone(), event_sender.clone()));
    let services = api::AppServices {
        picking: Arc::new(PickingService::new(db.clone(), event_sender.clone())),
        packing: Arc::new(PackingService::new(
            db.clone(),
            event_sender.clone(),
            &cfg.warehouse,
        )),
        stock: Arc::new(StockLedgerService::new(db.clone(), event_sender.clone())),
        reaper: Arc::new(SessionReaper::new(db.clone(), sessions.clone())),
        sessions,
    };

    let addr = cfg.server_addr()?;
    let state = api::AppState {
        db,
        config: cfg,
        event_sender,
        services,
    };
    let app = api::app_router(state);

    info!("packhouse-api listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("failed to install ctrl-c handler: {}", e);
        return;
    }
    info!("shutdown signal received");
}
