//! Per-token state machine: cheap gates → deep filters → momentum gate → buy.
//! Grounded on `pumpfun_new_coin_detector.rs`'s additive quality-score shape
//! and `dynamic_fee_model.rs`'s tiered-config texture, restructured around
//! real RPC fetches instead of synthetic/simulated detection data.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use tokio::time::sleep;
use tracing::info;

use crate::bonding_curve::{self, BondingCurveState};
use crate::config::Config;
use crate::constants::{lamports_to_sol, sol_to_lamports};
use crate::endpoint_pool::EndpointPool;
use crate::exposure_manager::ExposureManager;
use crate::listener::DetectedToken;
use crate::log_summary::{LogLevel, LogSummaryRecorder};
use crate::store::{Store, TradeSide};
use crate::trade_audit::TradeAuditRing;
use crate::transaction::TransactionLayer;

#[derive(Debug, Clone, Serialize)]
pub struct FilterResult {
    pub name: String,
    pub checked: bool,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRejection {
    pub stage: String,
    pub reason: String,
    pub duration_ms: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct PipelineStats {
    pub tokens_detected: u64,
    pub tokens_bought: u64,
    pub tokens_rejected: u64,
    pub total_duration_ms: u64,
    pub rejection_counts: HashMap<String, u64>,
}

impl PipelineStats {
    pub fn avg_duration_ms(&self) -> f64 {
        let completed = self.tokens_bought + self.tokens_rejected;
        if completed == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / completed as f64
        }
    }

    pub fn buy_rate(&self) -> f64 {
        if self.tokens_detected == 0 {
            0.0
        } else {
            self.tokens_bought as f64 / self.tokens_detected as f64
        }
    }

    pub fn top_rejection_reasons(&self, n: usize) -> Vec<(String, u64)> {
        let mut pairs: Vec<(String, u64)> = self.rejection_counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1));
        pairs.truncate(n);
        pairs
    }
}

pub struct PipelineEngine {
    config: Arc<Config>,
    store: Arc<Store>,
    blacklist: Arc<crate::blacklist::Blacklist>,
    exposure: Arc<ExposureManager>,
    endpoint_pool: Arc<EndpointPool>,
    transactions: Arc<TransactionLayer>,
    trade_audit: Arc<TradeAuditRing>,
    log_summary: Arc<LogSummaryRecorder>,
    single_slot_busy: AtomicBool,
    stats: Mutex<PipelineStats>,
    active_context_count: AtomicU64,
}

impl PipelineEngine {
    pub fn new(
        config: Arc<Config>,
        store: Arc<Store>,
        blacklist: Arc<crate::blacklist::Blacklist>,
        exposure: Arc<ExposureManager>,
        endpoint_pool: Arc<EndpointPool>,
        transactions: Arc<TransactionLayer>,
        trade_audit: Arc<TradeAuditRing>,
        log_summary: Arc<LogSummaryRecorder>,
    ) -> Self {
        Self {
            config,
            store,
            blacklist,
            exposure,
            endpoint_pool,
            transactions,
            trade_audit,
            log_summary,
            single_slot_busy: AtomicBool::new(false),
            stats: Mutex::new(PipelineStats::default()),
            active_context_count: AtomicU64::new(0),
        }
    }

    pub fn active_context_count(&self) -> u64 {
        self.active_context_count.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PipelineStats {
        let guard = self.stats.lock();
        PipelineStats {
            tokens_detected: guard.tokens_detected,
            tokens_bought: guard.tokens_bought,
            tokens_rejected: guard.tokens_rejected,
            total_duration_ms: guard.total_duration_ms,
            rejection_counts: guard.rejection_counts.clone(),
        }
    }

    /// Runs the full pipeline for one detected token. Never panics: every
    /// outcome — accepted, rejected, or errored mid-flight — is folded into
    /// a single buffered log block emitted atomically at the end.
    pub async fn process(self: Arc<Self>, token: DetectedToken, shutdown: Arc<AtomicBool>) {
        let start = Instant::now();
        self.stats.lock().tokens_detected += 1;
        let mut log_lines = vec![format!("pipeline: {} ({})", token.mint, token.signature)];

        self.active_context_count.fetch_add(1, Ordering::SeqCst);
        let result = self.run_stages(&token, &shutdown, &mut log_lines).await;
        self.active_context_count.fetch_sub(1, Ordering::SeqCst);

        // Releases the single-slot gate once this attempt resolves, however
        // it resolves — bought, rejected downstream, or errored. Only stage1
        // ever sets it, but the reset belongs here rather than scattered
        // across stage2/3/4's rejection paths.
        if self.config.trading.single_slot_mode {
            self.single_slot_busy.store(false, Ordering::SeqCst);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        self.stats.lock().total_duration_ms += duration_ms;

        let level = match result {
            Ok(()) => {
                self.stats.lock().tokens_bought += 1;
                log_lines.push(format!("outcome: bought ({duration_ms}ms)"));
                LogLevel::Info
            }
            Err(rejection) => {
                self.stats.lock().tokens_rejected += 1;
                *self.stats.lock().rejection_counts.entry(rejection.reason.clone()).or_insert(0) += 1;
                log_lines.push(format!(
                    "outcome: rejected at {} — {} ({duration_ms}ms, stage took {}ms)",
                    rejection.stage, rejection.reason, rejection.duration_ms
                ));
                let _ = self
                    .store
                    .record_seen_pool(&token.bonding_curve.to_string(), &token.mint.to_string(), "filtered", Some(rejection.reason.as_str()))
                    .await;
                LogLevel::Info
            }
        };

        self.log_summary.record(level);
        info!("{}", log_lines.join("\n  "));
    }

    async fn run_stages(&self, token: &DetectedToken, shutdown: &Arc<AtomicBool>, log: &mut Vec<String>) -> Result<(), StageRejection> {
        self.stage1_cheap_gates(token, log).await?;
        let state = self.stage2_deep_filters(token, log).await?;
        self.stage3_momentum_gate(token, &state, shutdown, log).await?;
        self.stage4_buy(token, &state, log).await
    }

    async fn stage1_cheap_gates(&self, token: &DetectedToken, log: &mut Vec<String>) -> Result<(), StageRejection> {
        let started = Instant::now();
        let reject = |reason: &str, started: Instant| StageRejection { stage: "cheap_gates".to_string(), reason: reason.to_string(), duration_ms: started.elapsed().as_millis() as u64 };

        let pool_id = token.bonding_curve.to_string();
        let mint = token.mint.to_string();

        if self.store.has_seen_pool(&pool_id).await.unwrap_or(false) {
            return Err(reject("already_seen_pool", started));
        }
        if self.blacklist.is_blacklisted(&mint) || self.blacklist.is_blacklisted(&token.creator.to_string()) {
            return Err(reject("blacklisted", started));
        }
        if self.store.get_open_position(&mint).await.unwrap_or(None).is_some() {
            return Err(reject("already_held", started));
        }
        if self.config.trading.single_slot_mode && self.single_slot_busy.load(Ordering::SeqCst) {
            return Err(reject("single_slot_busy", started));
        }

        let has_pending_trade = self.store.has_pending_trade(&mint).await.unwrap_or(true);
        let requested_sol = lamports_to_sol(self.config.trading.quote_amount_lamports);
        if let Err(rejection) = self.exposure.check_buy(requested_sol, has_pending_trade) {
            return Err(reject(&rejection.reason(), started));
        }

        if self.config.trading.single_slot_mode {
            self.single_slot_busy.store(true, Ordering::SeqCst);
        }
        log.push("stage1: cheap gates passed".to_string());
        Ok(())
    }

    async fn stage2_deep_filters(&self, token: &DetectedToken, log: &mut Vec<String>) -> Result<BondingCurveState, StageRejection> {
        let started = Instant::now();
        let reject = |reason: &str, started: Instant| StageRejection { stage: "deep_filters".to_string(), reason: reason.to_string(), duration_ms: started.elapsed().as_millis() as u64 };

        let state = match self.fetch_bonding_curve(&token.bonding_curve).await {
            Ok(state) => state,
            Err(err) => return Err(reject(&format!("bonding_curve_fetch_failed: {err}"), started)),
        };

        let mut filters = Vec::new();
        if state.complete {
            filters.push(FilterResult { name: "graduation_check".to_string(), checked: true, passed: false, detail: "complete=true".to_string() });
            self.persist_filter_results(token, &filters, false, Some("already_graduated")).await;
            return Err(reject("already_graduated", started));
        }
        filters.push(FilterResult { name: "graduation_check".to_string(), checked: true, passed: true, detail: "complete=false".to_string() });

        let sol_in_curve = state.sol_in_curve();
        let cfg = &self.config.deep_filters;
        if let Some(min) = cfg.min_sol_in_curve {
            let passed = sol_in_curve >= min;
            filters.push(FilterResult { name: "min_sol_in_curve".to_string(), checked: true, passed, detail: format!("{sol_in_curve:.4} >= {min}") });
            if !passed {
                self.persist_filter_results(token, &filters, false, Some("sol_in_curve_below_min")).await;
                return Err(reject("sol_in_curve_below_min", started));
            }
        }
        if let Some(max) = cfg.max_sol_in_curve {
            let passed = sol_in_curve <= max;
            filters.push(FilterResult { name: "max_sol_in_curve".to_string(), checked: true, passed, detail: format!("{sol_in_curve:.4} <= {max}") });
            if !passed {
                self.persist_filter_results(token, &filters, false, Some("sol_in_curve_above_max")).await;
                return Err(reject("sol_in_curve_above_max", started));
            }
        }

        let score = score_token(token, &state, cfg);
        let passed = score >= cfg.min_score_required;
        filters.push(FilterResult { name: "score_threshold".to_string(), checked: true, passed, detail: format!("{score:.1} >= {}", cfg.min_score_required) });
        if !passed {
            self.persist_filter_results(token, &filters, false, Some("score_below_minimum")).await;
            return Err(reject("score_below_minimum", started));
        }

        self.persist_filter_results(token, &filters, true, None).await;
        log.push(format!("stage2: deep filters passed (sol_in_curve={sol_in_curve:.4}, score={score:.1})"));
        Ok(state)
    }

    async fn persist_filter_results(&self, token: &DetectedToken, filters: &[FilterResult], risk_check_passed: bool, risk_check_reason: Option<&str>) {
        let json = serde_json::to_string(filters).unwrap_or_else(|_| "[]".to_string());
        let summary = format!("{} filter(s) evaluated, passed={risk_check_passed}", filters.len());
        let _ = self
            .store
            .record_detection(
                &token.bonding_curve.to_string(),
                &token.mint.to_string(),
                if risk_check_passed { "candidate" } else { "filtered" },
                &json,
                risk_check_passed,
                risk_check_reason,
                None,
                &summary,
            )
            .await;
    }

    async fn stage3_momentum_gate(&self, token: &DetectedToken, state: &BondingCurveState, shutdown: &Arc<AtomicBool>, log: &mut Vec<String>) -> Result<(), StageRejection> {
        let started = Instant::now();
        let momentum = &self.config.momentum;

        if !momentum.enabled {
            log.push("stage3: momentum gate disabled".to_string());
            return Ok(());
        }

        sleep(std::time::Duration::from_millis(momentum.initial_delay_ms)).await;
        if shutdown.load(Ordering::SeqCst) {
            return Err(StageRejection { stage: "momentum_gate".to_string(), reason: "shutdown".to_string(), duration_ms: started.elapsed().as_millis() as u64 });
        }

        let mut checks = 0u32;
        loop {
            checks += 1;
            let total_buys = self.count_buys_since_detection(&token.bonding_curve, &token.signature).await.unwrap_or(0);
            if total_buys >= momentum.min_total_buys {
                log.push(format!("stage3: momentum gate passed ({total_buys} buys after {checks} check(s))"));
                let _ = state; // state carried through but not re-queried here; re-fetch happens at buy time if needed.
                return Ok(());
            }
            if checks >= momentum.max_checks {
                return Err(StageRejection {
                    stage: "momentum_gate".to_string(),
                    reason: format!("insufficient_momentum ({total_buys} buys after {checks} checks)"),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
            sleep(std::time::Duration::from_millis(momentum.recheck_interval_ms)).await;
            if shutdown.load(Ordering::SeqCst) {
                return Err(StageRejection { stage: "momentum_gate".to_string(), reason: "shutdown".to_string(), duration_ms: started.elapsed().as_millis() as u64 });
            }
        }
    }

    async fn stage4_buy(&self, token: &DetectedToken, state: &BondingCurveState, log: &mut Vec<String>) -> Result<(), StageRejection> {
        let started = Instant::now();
        let reject = |reason: String, started: Instant| StageRejection { stage: "buy".to_string(), reason, duration_ms: started.elapsed().as_millis() as u64 };

        // Re-fetch state right before buying; the momentum gate can run for
        // up to ~2s and the curve may have moved.
        let fresh_state = self.fetch_bonding_curve(&token.bonding_curve).await.unwrap_or(*state);

        let lamports_in = self.config.trading.quote_amount_lamports;
        let (fee_bps, protocol_bps, creator_bps) = bonding_curve::default_fee_split();
        let transfer_fee = self.transactions.current_transfer_fee(&token.mint, token.token_program).await;
        let quote = bonding_curve::quote_buy(
            lamports_in,
            &fresh_state,
            self.config.trading.buy_slippage_bps,
            fee_bps,
            protocol_bps,
            creator_bps,
            transfer_fee,
        )
        .map_err(|e| reject(e.to_string(), started))?;

        let mint = token.mint.to_string();
        let pool_id = token.bonding_curve.to_string();
        let intended_sol = lamports_to_sol(lamports_in);

        let trade_id = self
            .store
            .insert_trade_intent(None, TradeSide::Buy, &mint, intended_sol, quote.tokens_out as i64, intended_sol / lamports_to_sol(quote.tokens_out.max(1)), Some(pool_id.as_str()))
            .await
            .map_err(|e| reject(format!("trade_intent_failed: {e}"), started))?;

        let outcome = self
            .transactions
            .buy(token.mint, token.bonding_curve, token.associated_curve, token.creator, lamports_in, quote.min_tokens_out, token.token_program)
            .await
            .map_err(|e| reject(format!("send_failed: {e}"), started))?;

        if !outcome.success {
            let reason = outcome.error.unwrap_or_else(|| "unknown_buy_failure".to_string());
            let _ = self.store.fail_trade(trade_id, &reason).await;
            return Err(reject(reason, started));
        }

        let signature = outcome.signature.clone().unwrap_or_default();
        let _ = self.store.confirm_trade(trade_id, &signature).await;
        self.trade_audit.record_buy(
            &mint,
            intended_sol,
            lamports_in,
            outcome.actual_sol_spent,
            quote.tokens_out,
            outcome.actual_tokens_received,
            outcome.verified,
            outcome.signature.clone(),
        );

        let entry_price = if outcome.actual_tokens_received > 0 {
            outcome.actual_sol_spent / lamports_to_sol(outcome.actual_tokens_received)
        } else {
            0.0
        };
        let position_id = self
            .store
            .insert_position(&mint, &pool_id, Some(pool_id.as_str()), entry_price, intended_sol, outcome.actual_sol_spent, outcome.actual_tokens_received as i64)
            .await
            .map_err(|e| reject(format!("position_insert_failed: {e}"), started))?;

        self.exposure.record_position_opened(&mint, outcome.actual_sol_spent, Some(pool_id.clone()));
        let _ = self.store.record_seen_pool(&pool_id, &mint, "bought", None).await;

        log.push(format!(
            "stage4: bought {} tokens for {:.6} SOL, signature={signature}, position_id={position_id}",
            outcome.actual_tokens_received, outcome.actual_sol_spent
        ));
        Ok(())
    }

    async fn fetch_bonding_curve(&self, bonding_curve: &Pubkey) -> anyhow::Result<BondingCurveState> {
        let client = solana_rpc_client::nonblocking::rpc_client::RpcClient::new(self.endpoint_pool.current());
        let account = client.get_account(bonding_curve).await?;
        bonding_curve::decode(&account.data)
    }

    /// Approximates "buys since creation" by counting confirmed signatures
    /// against the bonding-curve address, scoped with an `until` cursor
    /// pinned to the detection signature. Monotonic within a pipeline
    /// context because the cursor never moves.
    async fn count_buys_since_detection(&self, bonding_curve: &Pubkey, detection_signature: &str) -> anyhow::Result<u32> {
        use std::str::FromStr;
        let until = solana_sdk::signature::Signature::from_str(detection_signature)?;
        let client = solana_rpc_client::nonblocking::rpc_client::RpcClient::new(self.endpoint_pool.current());
        let config = solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config {
            before: None,
            until: Some(until),
            limit: None,
            commitment: Some(self.endpoint_pool.commitment().to_commitment_config()),
        };
        let signatures = client.get_signatures_for_address_with_config(bonding_curve, config).await?;
        Ok(signatures.len() as u32)
    }
}

/// Additive 0-100 quality score: a base score plus bonuses for having
/// complete metadata and for sitting comfortably inside the configured
/// SOL-in-curve band, mirroring the base-plus-bonus shape used elsewhere in
/// the corpus for "is this worth a deeper look" scoring.
fn score_token(token: &DetectedToken, state: &BondingCurveState, cfg: &crate::config::DeepFilterConfig) -> f64 {
    let mut score: f64 = 50.0;
    if token.name.is_some() {
        score += 10.0;
    }
    if token.symbol.is_some() {
        score += 10.0;
    }
    if token.uri.is_some() {
        score += 10.0;
    }

    let sol_in_curve = state.sol_in_curve();
    match (cfg.min_sol_in_curve, cfg.max_sol_in_curve) {
        (Some(min), Some(max)) if max > min => {
            let midpoint_distance = ((sol_in_curve - (min + max) / 2.0) / (max - min)).abs();
            score += (1.0 - midpoint_distance.min(1.0)) * 20.0;
        }
        _ => score += 10.0,
    }

    score.clamp(0.0, 100.0)
}

#[allow(dead_code)]
fn quote_amount_to_lamports(sol: f64) -> u64 {
    sol_to_lamports(sol)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state(complete: bool, real_sol_reserves: u64) -> BondingCurveState {
        BondingCurveState {
            virtual_token_reserves: 1_073_000_000_000_000,
            virtual_sol_reserves: 30_000_000_000,
            real_token_reserves: 793_100_000_000_000,
            real_sol_reserves,
            token_total_supply: 1_000_000_000_000_000,
            complete,
            creator: Pubkey::new_unique(),
        }
    }

    fn sample_token() -> DetectedToken {
        DetectedToken {
            mint: Pubkey::new_unique(),
            bonding_curve: Pubkey::new_unique(),
            associated_curve: Pubkey::new_unique(),
            creator: Pubkey::new_unique(),
            token_program: crate::listener::TokenProgramVariant::Legacy,
            name: Some("Alpha".to_string()),
            symbol: Some("A".to_string()),
            uri: Some("https://example.com".to_string()),
            signature: "sig".to_string(),
            detected_at_ms: 0,
        }
    }

    #[test]
    fn score_rewards_complete_metadata() {
        let cfg = crate::config::DeepFilterConfig { min_sol_in_curve: Some(5.0), max_sol_in_curve: Some(300.0), min_score_required: 0.0 };
        let with_metadata = score_token(&sample_token(), &sample_state(false, 6_000_000_000), &cfg);

        let mut bare = sample_token();
        bare.name = None;
        bare.symbol = None;
        bare.uri = None;
        let without_metadata = score_token(&bare, &sample_state(false, 6_000_000_000), &cfg);

        assert!(with_metadata > without_metadata);
    }

    #[test]
    fn score_stays_within_bounds() {
        let cfg = crate::config::DeepFilterConfig { min_sol_in_curve: None, max_sol_in_curve: None, min_score_required: 0.0 };
        let score = score_token(&sample_token(), &sample_state(false, 1), &cfg);
        assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn pipeline_stats_compute_rates_and_top_reasons() {
        let mut stats = PipelineStats::default();
        stats.tokens_detected = 10;
        stats.tokens_bought = 3;
        stats.tokens_rejected = 7;
        stats.total_duration_ms = 1_000;
        stats.rejection_counts.insert("blacklisted".to_string(), 5);
        stats.rejection_counts.insert("already_seen_pool".to_string(), 2);

        assert_eq!(stats.buy_rate(), 0.3);
        assert_eq!(stats.avg_duration_ms(), 100.0);
        assert_eq!(stats.top_rejection_reasons(1), vec![("blacklisted".to_string(), 5)]);
    }
}
