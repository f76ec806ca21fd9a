//! Gates every buy against portfolio-wide risk limits: total SOL at risk,
//! trade frequency, and the wallet's spendable buffer. Tracks open positions
//! and a rolling window of trade timestamps; the pending-trade check is the
//! caller's responsibility since that state lives in the persistent store.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::ExposureConfig;
use crate::constants::{lamports_to_sol, now_ms};

const ROLLING_WINDOW_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone)]
struct TrackedPosition {
    entry_sol: f64,
    current_value_sol: f64,
    entry_ts: u64,
    pool_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExposureRejection {
    ExposureLimitExceeded { current: f64, requested: f64, max: f64 },
    TradeFrequencyLimitReached { count: u32, max: u32 },
    InsufficientWalletBuffer { balance: f64, requested: f64, min_buffer: f64 },
    PendingTradeExists,
}

impl ExposureRejection {
    pub fn reason(&self) -> String {
        match self {
            ExposureRejection::ExposureLimitExceeded { current, requested, max } => format!(
                "exposure limit exceeded: {current:.4} SOL open + {requested:.4} SOL requested > {max:.4} SOL max"
            ),
            ExposureRejection::TradeFrequencyLimitReached { count, max } => {
                format!("trade frequency limit reached: {count} trades in the last hour (max {max})")
            }
            ExposureRejection::InsufficientWalletBuffer { balance, requested, min_buffer } => format!(
                "insufficient wallet buffer: {balance:.4} SOL balance - {requested:.4} SOL requested < {min_buffer:.4} SOL minimum buffer"
            ),
            ExposureRejection::PendingTradeExists => "a trade is already pending for this mint".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExposureSnapshot {
    pub open_position_count: usize,
    pub current_exposure_sol: f64,
    pub trades_in_last_hour: u32,
    pub wallet_balance_sol: f64,
}

pub struct ExposureManager {
    config: ExposureConfig,
    positions: Mutex<HashMap<String, TrackedPosition>>,
    trade_timestamps: Mutex<VecDeque<u64>>,
    wallet_balance_lamports: AtomicU64,
}

impl ExposureManager {
    pub fn new(config: ExposureConfig) -> Self {
        Self {
            config,
            positions: Mutex::new(HashMap::new()),
            trade_timestamps: Mutex::new(VecDeque::new()),
            wallet_balance_lamports: AtomicU64::new(0),
        }
    }

    pub fn refresh_wallet_balance(&self, lamports: u64) {
        self.wallet_balance_lamports.store(lamports, Ordering::Relaxed);
    }

    fn wallet_balance_sol(&self) -> f64 {
        lamports_to_sol(self.wallet_balance_lamports.load(Ordering::Relaxed))
    }

    fn current_exposure_sol(&self) -> f64 {
        self.positions.lock().values().map(|p| p.entry_sol).sum()
    }

    fn trades_in_last_hour(&self) -> u32 {
        let mut timestamps = self.trade_timestamps.lock();
        let cutoff = now_ms().saturating_sub(ROLLING_WINDOW_MS);
        while timestamps.front().is_some_and(|&ts| ts < cutoff) {
            timestamps.pop_front();
        }
        timestamps.len() as u32
    }

    /// Runs every check required before a buy may proceed. `has_pending_trade`
    /// is supplied by the caller, which owns the store query for it.
    pub fn check_buy(&self, requested_sol: f64, has_pending_trade: bool) -> Result<(), ExposureRejection> {
        if has_pending_trade {
            return Err(ExposureRejection::PendingTradeExists);
        }

        let current = self.current_exposure_sol();
        if current + requested_sol > self.config.max_total_exposure_sol {
            return Err(ExposureRejection::ExposureLimitExceeded {
                current,
                requested: requested_sol,
                max: self.config.max_total_exposure_sol,
            });
        }

        let trades = self.trades_in_last_hour();
        if trades >= self.config.max_trades_per_hour {
            return Err(ExposureRejection::TradeFrequencyLimitReached { count: trades, max: self.config.max_trades_per_hour });
        }

        let balance = self.wallet_balance_sol();
        if balance - requested_sol < self.config.min_wallet_buffer_sol {
            return Err(ExposureRejection::InsufficientWalletBuffer {
                balance,
                requested: requested_sol,
                min_buffer: self.config.min_wallet_buffer_sol,
            });
        }

        Ok(())
    }

    /// Records a buy fill: adds the position to the exposure map and pushes a
    /// timestamp onto the rolling trade-frequency window.
    pub fn record_position_opened(&self, mint: &str, entry_sol: f64, pool_id: Option<String>) {
        self.positions.lock().insert(
            mint.to_string(),
            TrackedPosition { entry_sol, current_value_sol: entry_sol, entry_ts: now_ms(), pool_id },
        );
        self.trade_timestamps.lock().push_back(now_ms());
    }

    /// Records a sell fill; also counts against the trade-frequency window.
    pub fn record_trade_executed(&self) {
        self.trade_timestamps.lock().push_back(now_ms());
    }

    pub fn update_position_value(&self, mint: &str, current_value_sol: f64) {
        if let Some(position) = self.positions.lock().get_mut(mint) {
            position.current_value_sol = current_value_sol;
        }
    }

    pub fn record_position_closed(&self, mint: &str) {
        self.positions.lock().remove(mint);
    }

    pub fn snapshot(&self) -> ExposureSnapshot {
        let positions = self.positions.lock();
        ExposureSnapshot {
            open_position_count: positions.len(),
            current_exposure_sol: positions.values().map(|p| p.entry_sol).sum(),
            trades_in_last_hour: self.trades_in_last_hour(),
            wallet_balance_sol: self.wallet_balance_sol(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExposureConfig {
        ExposureConfig { max_total_exposure_sol: 1.0, max_trades_per_hour: 3, min_wallet_buffer_sol: 0.1 }
    }

    #[test]
    fn rejects_when_exposure_limit_exceeded() {
        let manager = ExposureManager::new(config());
        manager.refresh_wallet_balance(crate::constants::sol_to_lamports(5.0));
        manager.record_position_opened("mintA", 0.8, None);

        let result = manager.check_buy(0.5, false);
        assert_eq!(
            result,
            Err(ExposureRejection::ExposureLimitExceeded { current: 0.8, requested: 0.5, max: 1.0 })
        );
    }

    #[test]
    fn rejects_when_trade_frequency_limit_reached() {
        let manager = ExposureManager::new(config());
        manager.refresh_wallet_balance(crate::constants::sol_to_lamports(5.0));
        manager.record_trade_executed();
        manager.record_trade_executed();
        manager.record_trade_executed();

        let result = manager.check_buy(0.1, false);
        assert_eq!(result, Err(ExposureRejection::TradeFrequencyLimitReached { count: 3, max: 3 }));
    }

    #[test]
    fn rejects_when_wallet_buffer_insufficient() {
        let manager = ExposureManager::new(config());
        manager.refresh_wallet_balance(crate::constants::sol_to_lamports(0.15));

        let result = manager.check_buy(0.1, false);
        assert_eq!(
            result,
            Err(ExposureRejection::InsufficientWalletBuffer { balance: 0.15, requested: 0.1, min_buffer: 0.1 })
        );
    }

    #[test]
    fn rejects_when_pending_trade_exists() {
        let manager = ExposureManager::new(config());
        manager.refresh_wallet_balance(crate::constants::sol_to_lamports(5.0));
        assert_eq!(manager.check_buy(0.1, true), Err(ExposureRejection::PendingTradeExists));
    }

    #[test]
    fn allows_buy_within_all_limits() {
        let manager = ExposureManager::new(config());
        manager.refresh_wallet_balance(crate::constants::sol_to_lamports(5.0));
        assert!(manager.check_buy(0.2, false).is_ok());
    }

    #[test]
    fn closing_a_position_frees_its_exposure() {
        let manager = ExposureManager::new(config());
        manager.refresh_wallet_balance(crate::constants::sol_to_lamports(5.0));
        manager.record_position_opened("mintA", 0.9, None);
        assert!(manager.check_buy(0.5, false).is_err());

        manager.record_position_closed("mintA");
        assert!(manager.check_buy(0.5, false).is_ok());
    }

    #[test]
    fn snapshot_reflects_tracked_state() {
        let manager = ExposureManager::new(config());
        manager.refresh_wallet_balance(crate::constants::sol_to_lamports(2.0));
        manager.record_position_opened("mintA", 0.4, Some("poolA".to_string()));

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.open_position_count, 1);
        assert_eq!(snapshot.current_exposure_sol, 0.4);
        assert_eq!(snapshot.trades_in_last_hour, 1);
        assert_eq!(snapshot.wallet_balance_sol, 2.0);
    }
}
