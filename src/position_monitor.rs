//! Polls open positions on an interval and exits them on take-profit,
//! stop-loss, max-hold-duration, or bonding-curve graduation. Grounded on
//! `migration_manager.rs`'s interval-loop/`Mutex<HashMap>`/exit-triggered-once
//! shape, restructured around real bonding-curve re-quotes instead of a
//! simulated migration check.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::bonding_curve::{self, BondingCurveState};
use crate::config::Config;
use crate::constants::now_ms;
use crate::endpoint_pool::EndpointPool;
use crate::exposure_manager::ExposureManager;
use crate::log_summary::{LogLevel, LogSummaryRecorder};
use crate::store::{Store, TradeSide};
use crate::trade_audit::TradeAuditRing;
use crate::transaction::TransactionLayer;

const SELL_RETRY_ATTEMPTS: u32 = 3;
const SELL_RETRY_BACKOFF_MS: u64 = 2_000;
const SELL_RETRY_EXPANDED_SLIPPAGE_BPS: u64 = 5_000; // 50%, used on the final attempt

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTrigger {
    TakeProfit,
    StopLoss,
    TimeExit,
    Graduated,
}

impl ExitTrigger {
    fn reason(&self) -> &'static str {
        match self {
            ExitTrigger::TakeProfit => "take_profit",
            ExitTrigger::StopLoss => "stop_loss",
            ExitTrigger::TimeExit => "time_exit",
            ExitTrigger::Graduated => "graduated",
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct PositionMonitorStats {
    pub checks_performed: u64,
    pub exits_triggered: u64,
    pub sells_abandoned: u64,
}

pub struct PositionMonitor {
    config: Arc<Config>,
    store: Arc<Store>,
    transactions: Arc<TransactionLayer>,
    exposure: Arc<ExposureManager>,
    endpoint_pool: Arc<EndpointPool>,
    trade_audit: Arc<TradeAuditRing>,
    log_summary: Arc<LogSummaryRecorder>,
    /// Positions currently being exited; prevents a slow sell from being
    /// picked up again by the next tick before it settles.
    in_flight: Mutex<HashSet<i64>>,
    checks_performed: AtomicU64,
    exits_triggered: AtomicU64,
    sells_abandoned: AtomicU64,
}

impl PositionMonitor {
    pub fn new(
        config: Arc<Config>,
        store: Arc<Store>,
        transactions: Arc<TransactionLayer>,
        exposure: Arc<ExposureManager>,
        endpoint_pool: Arc<EndpointPool>,
        trade_audit: Arc<TradeAuditRing>,
        log_summary: Arc<LogSummaryRecorder>,
    ) -> Self {
        Self {
            config,
            store,
            transactions,
            exposure,
            endpoint_pool,
            trade_audit,
            log_summary,
            in_flight: Mutex::new(HashSet::new()),
            checks_performed: AtomicU64::new(0),
            exits_triggered: AtomicU64::new(0),
            sells_abandoned: AtomicU64::new(0),
        }
    }

    /// Positions currently mid-exit (quoted, sold, or retrying). Does not
    /// include positions merely being watched — only those with a trigger
    /// already in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn stats(&self) -> PositionMonitorStats {
        PositionMonitorStats {
            checks_performed: self.checks_performed.load(Ordering::Relaxed),
            exits_triggered: self.exits_triggered.load(Ordering::Relaxed),
            sells_abandoned: self.sells_abandoned.load(Ordering::Relaxed),
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: Arc<AtomicBool>) {
        let interval = self.config.position_check_interval();
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            if let Err(err) = self.tick().await {
                self.log_summary.record(LogLevel::Warn);
                warn!("position monitor tick failed: {err}");
            }
            sleep(interval).await;
        }
    }

    async fn tick(&self) -> Result<()> {
        let positions = self.store.open_positions().await?;
        for position in positions {
            if !self.in_flight.lock().insert(position.id) {
                continue; // already being exited by a prior tick
            }

            self.checks_performed.fetch_add(1, Ordering::Relaxed);
            let bonding_curve = match solana_sdk::pubkey::Pubkey::from_str(&position.bonding_curve_address) {
                Ok(pk) => pk,
                Err(_) => {
                    self.in_flight.lock().remove(&position.id);
                    continue;
                }
            };

            let mint = match solana_sdk::pubkey::Pubkey::from_str(&position.token_mint) {
                Ok(m) => m,
                Err(_) => {
                    self.in_flight.lock().remove(&position.id);
                    continue;
                }
            };

            let state = match self.fetch_bonding_curve(&bonding_curve).await {
                Ok(state) => state,
                Err(err) => {
                    warn!("position {}: failed to fetch bonding curve: {err}", position.id);
                    self.in_flight.lock().remove(&position.id);
                    continue;
                }
            };

            let token_program = self.transactions.mint_token_program(&mint).await;
            let transfer_fee = self.transactions.current_transfer_fee(&mint, token_program).await;

            let quote = bonding_curve::quote_sell(position.amount_token as u64, &state, self.config.trading.sell_slippage_bps, transfer_fee);
            let current_value_sol = quote.as_ref().map(|q| crate::constants::lamports_to_sol(q.sol_out)).unwrap_or(position.amount_sol);
            let _ = self.store.update_position_check(position.id, current_value_sol).await;

            let trigger = self.evaluate_trigger(&position, current_value_sol, &state);
            let Some(trigger) = trigger else {
                self.in_flight.lock().remove(&position.id);
                continue;
            };

            self.exits_triggered.fetch_add(1, Ordering::Relaxed);
            self.log_summary.record(LogLevel::Info);
            info!("position {} ({}) exiting on {}", position.id, position.token_mint, trigger.reason());

            let position_id = position.id;
            let token_mint = position.token_mint.clone();
            let amount_token = position.amount_token as u64;
            let bonding_curve_str = position.bonding_curve_address.clone();
            self.run_sell_retry_loop(position_id, &token_mint, &bonding_curve_str, bonding_curve, state, amount_token, trigger, token_program, transfer_fee)
                .await;
            self.in_flight.lock().remove(&position.id);
        }
        Ok(())
    }

    fn evaluate_trigger(&self, position: &crate::store::Position, current_value_sol: f64, state: &BondingCurveState) -> Option<ExitTrigger> {
        let held_ms = now_ms().saturating_sub(position.entry_ts as u64);
        // Take-profit/stop-loss fire on trading PnL — current value against
        // the intended entry SOL, not the actual (slippage-affected) spend.
        compute_trigger(
            position.intended_sol,
            current_value_sol,
            self.config.trading.take_profit_pct,
            self.config.trading.stop_loss_pct,
            held_ms,
            self.config.trading.max_hold_duration_ms,
            state.complete,
        )
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_sell_retry_loop(
        &self,
        position_id: i64,
        token_mint: &str,
        pool_id: &str,
        bonding_curve: solana_sdk::pubkey::Pubkey,
        mut state: BondingCurveState,
        amount_token: u64,
        trigger: ExitTrigger,
        token_program: crate::listener::TokenProgramVariant,
        transfer_fee: Option<crate::bonding_curve::TransferFeeConfig>,
    ) {
        let mint = match solana_sdk::pubkey::Pubkey::from_str(token_mint) {
            Ok(m) => m,
            Err(_) => {
                warn!("position {position_id}: invalid mint string {token_mint}");
                return;
            }
        };
        let associated_curve = spl_associated_token_account::get_associated_token_address(&bonding_curve, &mint);
        let creator = state.creator;

        for attempt in 1..=SELL_RETRY_ATTEMPTS {
            let slippage_bps = if attempt == SELL_RETRY_ATTEMPTS {
                self.config.trading.sell_slippage_bps.max(SELL_RETRY_EXPANDED_SLIPPAGE_BPS)
            } else {
                self.config.trading.sell_slippage_bps
            };

            let quote = match bonding_curve::quote_sell(amount_token, &state, slippage_bps, transfer_fee) {
                Ok(q) => q,
                Err(err) => {
                    warn!("position {position_id}: sell quote failed on attempt {attempt}: {err}");
                    sleep(std::time::Duration::from_millis(SELL_RETRY_BACKOFF_MS)).await;
                    continue;
                }
            };

            let trade_id = self
                .store
                .insert_trade_intent(Some(position_id), TradeSide::Sell, token_mint, 0.0, amount_token as i64, 0.0, Some(pool_id))
                .await;
            let trade_id = match trade_id {
                Ok(id) => id,
                Err(err) => {
                    warn!("position {position_id}: could not record sell intent on attempt {attempt}: {err}");
                    sleep(std::time::Duration::from_millis(SELL_RETRY_BACKOFF_MS)).await;
                    continue;
                }
            };

            match self.transactions.sell(mint, bonding_curve, associated_curve, creator, amount_token, quote.min_sol_out, token_program).await {
                Ok(outcome) if outcome.success => {
                    let signature = outcome.signature.clone().unwrap_or_default();
                    let _ = self.store.confirm_trade(trade_id, &signature).await;
                    let expected_sol = crate::constants::lamports_to_sol(quote.sol_out);
                    self.trade_audit.record_sell(token_mint, amount_token, expected_sol, outcome.actual_sol_received, outcome.verified, outcome.signature.clone());
                    let _ = self.store.close_position(position_id, trigger.reason(), Some(outcome.actual_sol_received)).await;
                    self.exposure.record_position_closed(token_mint);
                    self.exposure.record_trade_executed();
                    return;
                }
                Ok(outcome) => {
                    let reason = outcome.error.unwrap_or_else(|| "unknown_sell_failure".to_string());
                    let _ = self.store.fail_trade(trade_id, &reason).await;
                    warn!("position {position_id}: sell attempt {attempt}/{SELL_RETRY_ATTEMPTS} failed: {reason}");
                }
                Err(err) => {
                    let _ = self.store.fail_trade(trade_id, &err.to_string()).await;
                    warn!("position {position_id}: sell attempt {attempt}/{SELL_RETRY_ATTEMPTS} errored: {err}");
                }
            }

            if attempt < SELL_RETRY_ATTEMPTS {
                sleep(std::time::Duration::from_millis(SELL_RETRY_BACKOFF_MS)).await;
                if let Ok(fresh) = self.fetch_bonding_curve(&bonding_curve).await {
                    state = fresh;
                }
            }
        }

        self.sells_abandoned.fetch_add(1, Ordering::Relaxed);
        self.log_summary.record(LogLevel::Warn);
        warn!("position {position_id}: sell abandoned after {SELL_RETRY_ATTEMPTS} failed attempts");
        let _ = self.store.close_position(position_id, "sell_abandoned", None).await;
        self.exposure.record_position_closed(token_mint);
    }

    async fn fetch_bonding_curve(&self, bonding_curve: &solana_sdk::pubkey::Pubkey) -> Result<BondingCurveState> {
        let client = solana_rpc_client::nonblocking::rpc_client::RpcClient::new(self.endpoint_pool.current());
        let account = client.get_account(bonding_curve).await?;
        bonding_curve::decode(&account.data)
    }
}

/// Graduation always wins, then take-profit/stop-loss on the current quoted
/// value, then a max-hold timeout. Pulled out of `PositionMonitor` so the
/// four trigger conditions can be tested without standing up the full
/// dependency graph.
#[allow(clippy::too_many_arguments)]
fn compute_trigger(
    entry_sol: f64,
    current_value_sol: f64,
    take_profit_pct: f64,
    stop_loss_pct: f64,
    held_ms: u64,
    max_hold_ms: u64,
    complete: bool,
) -> Option<ExitTrigger> {
    if complete {
        return Some(ExitTrigger::Graduated);
    }

    let take_profit_threshold = entry_sol * (1.0 + take_profit_pct / 100.0);
    if current_value_sol >= take_profit_threshold {
        return Some(ExitTrigger::TakeProfit);
    }

    let stop_loss_threshold = entry_sol * (1.0 - stop_loss_pct / 100.0);
    if current_value_sol <= stop_loss_threshold {
        return Some(ExitTrigger::StopLoss);
    }

    if max_hold_ms > 0 && held_ms >= max_hold_ms {
        return Some(ExitTrigger::TimeExit);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graduation_wins_over_every_other_trigger() {
        assert_eq!(compute_trigger(1.0, 5.0, 40.0, 20.0, 0, 0, true), Some(ExitTrigger::Graduated));
    }

    #[test]
    fn take_profit_fires_above_threshold() {
        assert_eq!(compute_trigger(1.0, 1.41, 40.0, 20.0, 0, 0, false), Some(ExitTrigger::TakeProfit));
    }

    #[test]
    fn stop_loss_fires_below_threshold() {
        assert_eq!(compute_trigger(1.0, 0.79, 40.0, 20.0, 0, 0, false), Some(ExitTrigger::StopLoss));
    }

    #[test]
    fn time_exit_fires_after_max_hold_elapses() {
        assert_eq!(compute_trigger(1.0, 1.0, 40.0, 20.0, 10_000, 5_000, false), Some(ExitTrigger::TimeExit));
    }

    #[test]
    fn time_exit_disabled_when_max_hold_is_zero() {
        assert_eq!(compute_trigger(1.0, 1.0, 40.0, 20.0, 999_999, 0, false), None);
    }

    #[test]
    fn no_trigger_within_all_bands() {
        assert_eq!(compute_trigger(1.0, 1.05, 40.0, 20.0, 1_000, 60_000, false), None);
    }
}
