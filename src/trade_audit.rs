//! Bounded ring buffer of buy/sell confirmations with intended-vs-actual
//! discrepancy tracking. Shape informed by `route_cache.rs`'s
//! stats-struct-over-a-bounded-collection texture, applied to trade audit
//! records instead of cached routes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::constants::now_ms;

const RING_CAPACITY: usize = 200;
const MISMATCH_THRESHOLD_PCT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditSide {
    Buy,
    Sell,
}

/// One buy or sell confirmation. Buy and sell fill in different subsets of
/// the token-amount fields: a buy's `expected_tokens`/`actual_tokens` are the
/// quoted vs. received token amount; a sell's `expected_tokens` is the
/// intended token amount sold (it has no separate "actual tokens" figure,
/// since what a sell verifies against is SOL received, not tokens).
#[derive(Debug, Clone, Serialize)]
pub struct TradeAuditRecord {
    pub id: u64,
    pub side: AuditSide,
    pub token_mint: String,
    pub intended_sol: f64,
    /// Raw lamport amount baked into the instruction (buy only; 0 for sell).
    pub instruction_sol_lamports: u64,
    pub actual_sol: f64,
    pub expected_tokens: u64,
    pub actual_tokens: u64,
    pub discrepancy_pct: f64,
    pub token_slippage_pct: f64,
    pub verified: bool,
    pub has_mismatch: bool,
    pub ts_ms: u64,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeAuditSummary {
    pub total_records: usize,
    pub avg_discrepancy_pct: f64,
    pub avg_slippage_pct: f64,
    pub mismatch_count: usize,
    pub last_audit_ts: Option<u64>,
}

pub struct TradeAuditRing {
    records: Mutex<VecDeque<TradeAuditRecord>>,
    next_id: AtomicU64,
}

impl TradeAuditRing {
    pub fn new() -> Self {
        Self { records: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)), next_id: AtomicU64::new(1) }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_buy(
        &self,
        token_mint: &str,
        intended_sol: f64,
        instruction_sol_lamports: u64,
        actual_sol: f64,
        expected_tokens: u64,
        actual_tokens: u64,
        verified: bool,
        signature: Option<String>,
    ) -> TradeAuditRecord {
        self.push(AuditSide::Buy, token_mint, intended_sol, instruction_sol_lamports, actual_sol, expected_tokens, actual_tokens, verified, signature)
    }

    pub fn record_sell(
        &self,
        token_mint: &str,
        intended_tokens: u64,
        expected_sol: f64,
        actual_sol: f64,
        verified: bool,
        signature: Option<String>,
    ) -> TradeAuditRecord {
        self.push(AuditSide::Sell, token_mint, expected_sol, 0, actual_sol, intended_tokens, 0, verified, signature)
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &self,
        side: AuditSide,
        token_mint: &str,
        intended_sol: f64,
        instruction_sol_lamports: u64,
        actual_sol: f64,
        expected_tokens: u64,
        actual_tokens: u64,
        verified: bool,
        signature: Option<String>,
    ) -> TradeAuditRecord {
        let discrepancy_pct = if intended_sol.abs() > f64::EPSILON {
            (actual_sol - intended_sol) / intended_sol * 100.0
        } else {
            0.0
        };
        let token_slippage_pct = if side == AuditSide::Buy && expected_tokens > 0 {
            (actual_tokens as f64 - expected_tokens as f64) / expected_tokens as f64 * 100.0
        } else {
            0.0
        };
        let has_mismatch = discrepancy_pct.abs() > MISMATCH_THRESHOLD_PCT || token_slippage_pct.abs() > MISMATCH_THRESHOLD_PCT;
        let record = TradeAuditRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            side,
            token_mint: token_mint.to_string(),
            intended_sol,
            instruction_sol_lamports,
            actual_sol,
            expected_tokens,
            actual_tokens,
            discrepancy_pct,
            token_slippage_pct,
            verified,
            has_mismatch,
            ts_ms: now_ms(),
            signature,
        };

        let mut records = self.records.lock();
        if records.len() >= RING_CAPACITY {
            records.pop_front();
        }
        records.push_back(record.clone());
        record
    }

    pub fn summary(&self) -> TradeAuditSummary {
        let records = self.records.lock();
        let total_records = records.len();
        if total_records == 0 {
            return TradeAuditSummary { total_records: 0, avg_discrepancy_pct: 0.0, avg_slippage_pct: 0.0, mismatch_count: 0, last_audit_ts: None };
        }

        let sum_discrepancy: f64 = records.iter().map(|r| r.discrepancy_pct).sum();
        let sum_slippage: f64 = records.iter().map(|r| r.discrepancy_pct.abs()).sum();
        let mismatch_count = records.iter().filter(|r| r.has_mismatch).count();
        let last_audit_ts = records.back().map(|r| r.ts_ms);

        TradeAuditSummary {
            total_records,
            avg_discrepancy_pct: sum_discrepancy / total_records as f64,
            avg_slippage_pct: sum_slippage / total_records as f64,
            mismatch_count,
            last_audit_ts,
        }
    }

    pub fn recent(&self, n: usize) -> Vec<TradeAuditRecord> {
        let records = self.records.lock();
        records.iter().rev().take(n).cloned().collect()
    }

    pub fn alerts(&self) -> Vec<TradeAuditRecord> {
        self.records.lock().iter().filter(|r| r.has_mismatch).cloned().collect()
    }

    pub fn compact_report(&self) -> String {
        let summary = self.summary();
        format!(
            "trades={} avg_discrepancy={:.2}% avg_slippage={:.2}% mismatches={} last_audit_ts={}",
            summary.total_records,
            summary.avg_discrepancy_pct,
            summary.avg_slippage_pct,
            summary.mismatch_count,
            summary.last_audit_ts.map(|ts| ts.to_string()).unwrap_or_else(|| "never".to_string())
        )
    }
}

impl Default for TradeAuditRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_within_tolerance_has_no_mismatch() {
        let ring = TradeAuditRing::new();
        let record = ring.record_buy("MintA", 1.0, 1_000_000_000, 1.02, 1_000, 1_000, true, Some("sig1".to_string()));
        assert!(!record.has_mismatch);
        assert!((record.discrepancy_pct - 2.0).abs() < 1e-9);
    }

    #[test]
    fn sell_beyond_five_percent_is_flagged() {
        let ring = TradeAuditRing::new();
        let record = ring.record_sell("MintA", 1_000, 1.0, 0.9, true, None);
        assert!(record.has_mismatch);
        assert!(ring.alerts().len() == 1);
    }

    #[test]
    fn buy_token_slippage_beyond_threshold_is_flagged() {
        let ring = TradeAuditRing::new();
        let record = ring.record_buy("MintA", 1.0, 1_000_000_000, 1.0, 1_000, 900, true, None);
        assert!(record.has_mismatch);
        assert!((record.token_slippage_pct - (-10.0)).abs() < 1e-9);
    }

    #[test]
    fn ring_evicts_oldest_past_capacity() {
        let ring = TradeAuditRing::new();
        for i in 0..(RING_CAPACITY + 10) {
            ring.record_buy(&format!("Mint{i}"), 1.0, 1_000_000_000, 1.0, 1_000, 1_000, true, None);
        }
        let summary = ring.summary();
        assert_eq!(summary.total_records, RING_CAPACITY);
        let recent = ring.recent(1);
        assert_eq!(recent[0].token_mint, format!("Mint{}", RING_CAPACITY + 9));
    }

    #[test]
    fn summary_on_empty_ring_does_not_divide_by_zero() {
        let ring = TradeAuditRing::new();
        let summary = ring.summary();
        assert_eq!(summary.total_records, 0);
        assert_eq!(summary.avg_discrepancy_pct, 0.0);
        assert!(summary.last_audit_ts.is_none());
    }

    #[test]
    fn compact_report_is_human_readable() {
        let ring = TradeAuditRing::new();
        ring.record_buy("MintA", 1.0, 1_000_000_000, 1.0, 1_000, 1_000, true, None);
        let report = ring.compact_report();
        assert!(report.contains("trades=1"));
    }
}
