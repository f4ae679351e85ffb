//! skins-api: REST front end for the skins exchange.
//!
//! Wires the engine to the in-memory ledger, store and price source, starts
//! the periodic liquidation sweep, and serves the axum router.

use anyhow::Context;
use skins_core::api::{self, AppState};
use skins_core::{Exchange, ExchangeConfig, InMemoryLedger, MemoryStore, Price, Quote, StaticPriceSource};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ExchangeConfig::from_env().context("loading configuration")?;

    let ledger = Arc::new(InMemoryLedger::new());
    for account in &config.demo_accounts {
        ledger.credit(account.user_id, Quote::new(account.balance));
    }

    let prices = Arc::new(StaticPriceSource::new());
    for seed in &config.instruments {
        let price = Price::new(seed.reference_price)
            .with_context(|| format!("reference price for instrument {}", seed.id))?;
        prices.set_price(seed.id, price);
    }

    let seeds = config.instruments.clone();
    let bind_addr = config.server.bind_addr.clone();
    let request_timeout = Duration::from_millis(config.server.request_timeout_ms);
    let sweep_interval = config.liquidation_interval_ms;

    let exchange = Arc::new(Exchange::new(config, Arc::new(MemoryStore::new()), ledger, prices));
    for seed in seeds {
        exchange.register_instrument(seed.id, seed.name);
    }

    if sweep_interval > 0 {
        tokio::spawn(liquidation_sweep(exchange.clone(), Duration::from_millis(sweep_interval)));
    }

    let app = api::router(AppState::new(exchange, request_timeout));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!(addr = %bind_addr, "skins-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("skins-api stopped");
    Ok(())
}

async fn liquidation_sweep(exchange: Arc<Exchange>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let engine = exchange.clone();
        match tokio::task::spawn_blocking(move || engine.run_liquidations(None)).await {
            // the engine logs passes that did something
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(error = %err, "liquidation sweep failed"),
            Err(err) => warn!(error = %err, "liquidation sweep task panicked"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        // without a signal handler, run until killed
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
