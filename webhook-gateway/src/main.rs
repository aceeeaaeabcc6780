use actix_web::{web, App, HttpServer};
use affiliate_engine::CommissionEngine;
use ledger_core::{LedgerStore, TransactionApplier, WithdrawService};
use tracing::info;
use webhook_gateway::handlers::{configure_routes, AppState};
use webhook_gateway::{Config, Dispatcher, GatewayMetrics};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::from_env()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    info!(
        "🚀 Webhook Gateway starting on {}:{}",
        config.server.host, config.server.http_port
    );

    let store = LedgerStore::open(&config.database)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    info!("✅ Database connected and migrations applied");

    let metrics = GatewayMetrics::new()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    let applier = TransactionApplier::new(store.pool().clone(), config.ledger.clone());
    let commission = CommissionEngine::new(store.pool().clone(), config.commission.clone());
    let withdraw = WithdrawService::new(store.pool().clone(), config.withdrawal.clone());
    let dispatcher = Dispatcher::new(
        store.clone(),
        applier,
        commission,
        metrics.clone(),
        &config.ledger,
    );

    let state = AppState {
        config: config.clone(),
        store,
        dispatcher,
        withdraw,
        metrics,
    };

    let bind_address = format!("{}:{}", config.server.host, config.server.http_port);
    info!("🔄 Accepting provider webhooks at {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
