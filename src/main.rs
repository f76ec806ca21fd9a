use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use curve_trading_agent::blacklist::Blacklist;
use curve_trading_agent::config::Config;
use curve_trading_agent::endpoint_pool::EndpointPool;
use curve_trading_agent::exposure_manager::ExposureManager;
use curve_trading_agent::listener::Listener;
use curve_trading_agent::log_summary::LogSummaryRecorder;
use curve_trading_agent::mint_cache::MintCache;
use curve_trading_agent::pipeline::PipelineEngine;
use curve_trading_agent::position_monitor::PositionMonitor;
use curve_trading_agent::snapshot::SnapshotAggregator;
use curve_trading_agent::store::Store;
use curve_trading_agent::trade_audit::TradeAuditRing;
use curve_trading_agent::transaction::TransactionLayer;
use curve_trading_agent::wallet::Wallet;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const MINT_CACHE_TTL: Duration = Duration::from_secs(600);
const SUMMARY_TICK_INTERVAL: Duration = Duration::from_secs(60);
const WALLET_BALANCE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("starting in {:?} mode", config.bot_mode);

    // Construction order follows the dependency graph: wallet, endpoint
    // pool, store (with startup recovery), blacklist, mint cache, exposure
    // manager, trade audit ring, snapshot aggregator, transaction layer,
    // pipeline engine, position monitor.
    let wallet = match Wallet::from_config(&config) {
        Ok(w) => Arc::new(w),
        Err(err) => {
            error!("failed to load wallet: {err}");
            std::process::exit(1);
        }
    };

    let endpoint_pool = match EndpointPool::new(
        config.rpc_endpoints.clone(),
        config.rpc_websocket_url.clone(),
        config.commitment_level,
        config.endpoint_pool.max_failures,
        Duration::from_millis(config.endpoint_pool.recovery_window_ms),
        config.endpoint_pool.max_attempts,
    ) {
        Ok(pool) => Arc::new(pool),
        Err(err) => {
            error!("failed to build endpoint pool: {err}");
            std::process::exit(1);
        }
    };

    let store = match Store::open(&config.data_dir).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!("failed to open persistent store: {err}");
            std::process::exit(1);
        }
    };

    let blacklist = match Blacklist::load(store.connection()).await {
        Ok(blacklist) => Arc::new(blacklist),
        Err(err) => {
            error!("failed to load blacklist: {err}");
            std::process::exit(1);
        }
    };

    let mint_cache = MintCache::new(MINT_CACHE_TTL);
    let exposure = Arc::new(ExposureManager::new(config.exposure.clone()));
    let trade_audit = Arc::new(TradeAuditRing::new());
    let log_summary = Arc::new(LogSummaryRecorder::new());

    let transactions = match TransactionLayer::new(endpoint_pool.clone(), wallet.clone(), config.fees.clone()) {
        Ok(layer) => Arc::new(layer),
        Err(err) => {
            error!("failed to build transaction layer: {err}");
            std::process::exit(1);
        }
    };

    reconcile_positions_on_startup(&store, &transactions).await;

    match transactions.get_wallet_balance_lamports().await {
        Ok(lamports) => exposure.refresh_wallet_balance(lamports),
        Err(err) => warn!("failed initial wallet balance refresh: {err}"),
    }

    let pipeline = Arc::new(PipelineEngine::new(
        config.clone(),
        store.clone(),
        blacklist.clone(),
        exposure.clone(),
        endpoint_pool.clone(),
        transactions.clone(),
        trade_audit.clone(),
        log_summary.clone(),
    ));

    let position_monitor = Arc::new(PositionMonitor::new(
        config.clone(),
        store.clone(),
        transactions.clone(),
        exposure.clone(),
        endpoint_pool.clone(),
        trade_audit.clone(),
        log_summary.clone(),
    ));

    let shutdown = Arc::new(AtomicBool::new(false));

    let snapshot = Arc::new(SnapshotAggregator::new(
        store.clone(),
        pipeline.clone(),
        position_monitor.clone(),
        trade_audit.clone(),
        log_summary.clone(),
        shutdown.clone(),
    ));
    let _ = &snapshot; // held for the dashboard collaborator to consume; this binary exposes no HTTP surface itself

    let listener = match Listener::new(endpoint_pool.clone(), mint_cache.clone()) {
        Ok(listener) => Arc::new(listener),
        Err(err) => {
            error!("failed to build listener: {err}");
            std::process::exit(1);
        }
    };

    let (detected_tx, mut detected_rx) = mpsc::unbounded_channel();

    let listener_handle = {
        let listener = listener.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = listener.run(shutdown, detected_tx).await {
                error!("listener exited: {err}");
            }
        })
    };

    let pipeline_dispatch_handle = {
        let pipeline = pipeline.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            while let Some(token) = detected_rx.recv().await {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let pipeline = pipeline.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pipeline.process(token, shutdown).await });
            }
        })
    };

    let monitor_handle = {
        let position_monitor = position_monitor.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { position_monitor.run(shutdown).await })
    };

    let summary_handle = {
        let pipeline = pipeline.clone();
        let position_monitor = position_monitor.clone();
        let trade_audit = trade_audit.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SUMMARY_TICK_INTERVAL);
            loop {
                interval.tick().await;
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                let pipeline_stats = pipeline.stats();
                let monitor_stats = position_monitor.stats();
                info!(
                    "heartbeat: detected={} bought={} rejected={} buy_rate={:.2} open_positions_checks={} exits={} sells_abandoned={} trade_audit={}",
                    pipeline_stats.tokens_detected,
                    pipeline_stats.tokens_bought,
                    pipeline_stats.tokens_rejected,
                    pipeline_stats.buy_rate(),
                    monitor_stats.checks_performed,
                    monitor_stats.exits_triggered,
                    monitor_stats.sells_abandoned,
                    trade_audit.compact_report()
                );
            }
        })
    };

    let balance_refresh_handle = {
        let transactions = transactions.clone();
        let exposure = exposure.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(WALLET_BALANCE_REFRESH_INTERVAL);
            loop {
                interval.tick().await;
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                match transactions.get_wallet_balance_lamports().await {
                    Ok(lamports) => exposure.refresh_wallet_balance(lamports),
                    Err(err) => warn!("failed to refresh wallet balance: {err}"),
                }
            }
        })
    };

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("shutdown signal received");
                shutdown.store(true, Ordering::SeqCst);
            }
        }
    });

    let _ =
        tokio::join!(listener_handle, pipeline_dispatch_handle, monitor_handle, summary_handle, balance_refresh_handle);

    // Tear down singletons in the reverse order they were constructed.
    mint_cache.stop();
    info!("shutdown complete");
}

/// Reconciles the store's open positions against actual wallet holdings.
/// A position can survive in the store with no matching tokens in the
/// wallet if the process crashed between a sell confirming on-chain and
/// `close_position` committing, or if tokens left the wallet by some other
/// means entirely. Either way the store's view is now wrong and the
/// position is force-closed rather than left to mislead the monitor.
async fn reconcile_positions_on_startup(store: &Store, transactions: &TransactionLayer) {
    let positions = match store.open_positions().await {
        Ok(positions) => positions,
        Err(err) => {
            error!("failed to list open positions for startup reconciliation: {err}");
            return;
        }
    };

    let mut closed = 0u32;
    for position in positions {
        let mint = match Pubkey::from_str(&position.token_mint) {
            Ok(mint) => mint,
            Err(err) => {
                error!("position {} has an unparseable mint {}: {err}", position.id, position.token_mint);
                continue;
            }
        };

        if transactions.token_balance_for_mint(&mint).await > 0 {
            continue;
        }

        match store.close_position(position.id, "not in wallet on recovery", None).await {
            Ok(()) => closed += 1,
            Err(err) => error!("failed to close position {} during startup recovery: {err}", position.id),
        }
    }

    if closed > 0 {
        warn!("startup recovery closed {closed} position(s) not found in wallet");
    }
}
