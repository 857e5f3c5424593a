use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use checkout_engine as engine;
use engine::{
    metrics::{CommerceMetrics, InMemoryMetrics},
    services::{commerce::StaticCouponResolver, payments::PaymentGateways},
};

const SWEEP_BATCH_SIZE: u64 = 100;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = engine::config::load_config().context("failed to load configuration")?;
    engine::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = engine::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate {
        engine::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = Arc::new(engine::events::EventSender::new(event_tx));
    tokio::spawn(engine::events::process_events(event_rx));

    let metrics = Arc::new(InMemoryMetrics::new());
    let settings = cfg.commerce_settings();

    // Aggregate app services used by HTTP handlers
    let services = engine::handlers::AppServices::new(
        db_arc.clone(),
        event_sender,
        metrics.clone() as Arc<dyn CommerceMetrics>,
        Arc::new(StaticCouponResolver::default()),
        PaymentGateways::default(),
        settings,
    );

    if let Some(interval) = cfg.cart_sweep_interval() {
        let carts = services.cart.clone();
        info!(?interval, "Starting expired cart sweep");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = carts.sweep_expired_carts(SWEEP_BATCH_SIZE).await {
                    warn!(error = %e, "Expired cart sweep failed");
                }
            }
        });
    }

    let app_state = Arc::new(engine::AppState {
        db: db_arc,
        config: cfg.clone(),
        services,
        metrics,
    });

    let app = engine::app_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive());

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid listen address")?;
    info!("checkout-engine listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => error!("failed to install signal handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
