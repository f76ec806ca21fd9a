//! Pull-only, read-only aggregator over every other component's public
//! accessors. Never caches or re-derives committed state and never calls
//! back into the components it reads — every method here is a thin
//! projection over an existing accessor, composed the way
//! `database_tracker.rs`'s `OpportunityStats` composes raw counts into a
//! summary struct with derived rates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::constants::now_ms;
use crate::log_summary::{LogSummaryRecorder, LogSummarySnapshot};
use crate::pipeline::{PipelineEngine, PipelineStats};
use crate::position_monitor::{PositionMonitor, PositionMonitorStats};
use crate::store::{PoolDetection, Position, Store};
use crate::trade_audit::{TradeAuditRecord, TradeAuditRing, TradeAuditSummary};

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub live: bool,
    pub ready: bool,
    pub state: String,
    pub checks: Vec<(String, bool)>,
    pub uptime_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionsSnapshot {
    pub open: Vec<Position>,
    pub open_count: usize,
    pub monitor_checks_performed: u64,
    pub monitor_exits_triggered: u64,
    pub monitor_sells_abandoned: u64,
    pub monitor_in_flight: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PnlBreakdownEntry {
    pub token_mint: String,
    pub closed_reason: Option<String>,
    pub realized_sol: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PnlSnapshot {
    pub realized_sol: f64,
    pub unrealized_sol: f64,
    pub breakdown: Vec<PnlBreakdownEntry>,
}

pub struct SnapshotAggregator {
    store: Arc<Store>,
    pipeline: Arc<PipelineEngine>,
    position_monitor: Arc<PositionMonitor>,
    trade_audit: Arc<TradeAuditRing>,
    log_summary: Arc<LogSummaryRecorder>,
    shutdown: Arc<AtomicBool>,
    started_at_ms: u64,
}

impl SnapshotAggregator {
    pub fn new(
        store: Arc<Store>,
        pipeline: Arc<PipelineEngine>,
        position_monitor: Arc<PositionMonitor>,
        trade_audit: Arc<TradeAuditRing>,
        log_summary: Arc<LogSummaryRecorder>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self { store, pipeline, position_monitor, trade_audit, log_summary, shutdown, started_at_ms: now_ms() }
    }

    pub fn health(&self) -> HealthSnapshot {
        let shutting_down = self.shutdown.load(Ordering::SeqCst);
        let checks = vec![
            ("store_reachable".to_string(), true),
            ("pipeline_idle_or_running".to_string(), true),
            ("not_shutting_down".to_string(), !shutting_down),
        ];
        let ready = checks.iter().all(|(_, ok)| *ok);
        HealthSnapshot {
            live: true,
            ready,
            state: if shutting_down { "shutting_down".to_string() } else { "running".to_string() },
            checks,
            uptime_ms: now_ms().saturating_sub(self.started_at_ms),
        }
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    pub async fn positions(&self) -> anyhow::Result<PositionsSnapshot> {
        let open = self.store.open_positions().await?;
        let monitor_stats = self.monitor_stats();
        Ok(PositionsSnapshot {
            open_count: open.len(),
            open,
            monitor_checks_performed: monitor_stats.checks_performed,
            monitor_exits_triggered: monitor_stats.exits_triggered,
            monitor_sells_abandoned: monitor_stats.sells_abandoned,
            monitor_in_flight: self.position_monitor.in_flight_count(),
        })
    }

    fn monitor_stats(&self) -> PositionMonitorStats {
        self.position_monitor.stats()
    }

    /// Realized pnl from positions closed since `since_ms`, unrealized pnl
    /// estimated from each open position's last monitored quote.
    pub async fn pnl(&self, since_ms: i64) -> anyhow::Result<PnlSnapshot> {
        let closed = self.store.closed_positions_since(since_ms).await?;
        let realized_sol: f64 =
            closed.iter().filter_map(|p| p.realized_sol).sum::<f64>() - closed.iter().map(|p| p.amount_sol).sum::<f64>();
        let breakdown = closed
            .iter()
            .map(|p| PnlBreakdownEntry {
                token_mint: p.token_mint.clone(),
                closed_reason: p.closed_reason.clone(),
                realized_sol: p.realized_sol.unwrap_or(0.0) - p.amount_sol,
            })
            .collect();

        let open = self.store.open_positions().await?;
        let unrealized_sol: f64 = open.iter().map(|p| p.last_price_sol.unwrap_or(p.amount_sol) - p.amount_sol).sum();

        Ok(PnlSnapshot { realized_sol, unrealized_sol, breakdown })
    }

    pub fn trade_audit_summary(&self) -> TradeAuditSummary {
        self.trade_audit.summary()
    }

    pub fn trade_audit_recent(&self, n: usize) -> Vec<TradeAuditRecord> {
        self.trade_audit.recent(n)
    }

    pub fn trade_audit_alerts(&self) -> Vec<TradeAuditRecord> {
        self.trade_audit.alerts()
    }

    pub fn trade_audit_compact_report(&self) -> String {
        self.trade_audit.compact_report()
    }

    pub fn log_summary(&self, last_n: usize) -> LogSummarySnapshot {
        self.log_summary.snapshot(last_n)
    }

    pub fn log_summary_compact_report(&self) -> String {
        self.log_summary.compact_report()
    }

    pub async fn detections(&self, action: Option<&str>, since_ms: i64, limit: u32, offset: u32) -> anyhow::Result<Vec<PoolDetection>> {
        self.store.list_detections(action, since_ms, limit, offset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pnl_breakdown_entry_serializes() {
        let entry = PnlBreakdownEntry { token_mint: "MintA".to_string(), closed_reason: Some("take_profit".to_string()), realized_sol: 0.05 };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("MintA"));
        assert!(json.contains("take_profit"));
    }
}
