//! Typed, validated configuration loaded once from the process environment.
//!
//! Every field is parsed independently so that a single run surfaces every
//! problem at once, rather than failing on the first bad variable and leaving
//! the rest undiagnosed.

use std::env;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotMode {
    Production,
    DryRun,
    Smoke,
    Ab,
    Standby,
}

impl BotMode {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "production" => Some(Self::Production),
            "dry_run" => Some(Self::DryRun),
            "smoke" => Some(Self::Smoke),
            "ab" => Some(Self::Ab),
            "standby" => Some(Self::Standby),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitmentLevel {
    Processed,
    Confirmed,
    Finalized,
}

impl CommitmentLevel {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "processed" => Some(Self::Processed),
            "confirmed" => Some(Self::Confirmed),
            "finalized" => Some(Self::Finalized),
            _ => None,
        }
    }

    pub fn to_commitment_config(self) -> solana_sdk::commitment_config::CommitmentConfig {
        use solana_sdk::commitment_config::CommitmentConfig;
        match self {
            CommitmentLevel::Processed => CommitmentConfig::processed(),
            CommitmentLevel::Confirmed => CommitmentConfig::confirmed(),
            CommitmentLevel::Finalized => CommitmentConfig::finalized(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TradingConfig {
    pub quote_amount_lamports: u64,
    pub buy_slippage_bps: u64,
    pub sell_slippage_bps: u64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub max_hold_duration_ms: u64,
    /// When set, only one pipeline context may be active at a time; all other
    /// detections are rejected at stage 1 while a buy is in flight.
    pub single_slot_mode: bool,
}

#[derive(Debug, Clone)]
pub struct ExposureConfig {
    pub max_total_exposure_sol: f64,
    pub max_trades_per_hour: u32,
    pub min_wallet_buffer_sol: f64,
}

#[derive(Debug, Clone)]
pub struct DeepFilterConfig {
    pub min_sol_in_curve: Option<f64>,
    pub max_sol_in_curve: Option<f64>,
    pub min_score_required: f64,
}

#[derive(Debug, Clone)]
pub struct MomentumConfig {
    pub enabled: bool,
    pub initial_delay_ms: u64,
    pub recheck_interval_ms: u64,
    pub max_checks: u32,
    pub min_total_buys: u32,
}

#[derive(Debug, Clone)]
pub struct EndpointPoolConfig {
    pub max_failures: u32,
    pub recovery_window_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct FeeConfig {
    pub use_dynamic_fee: bool,
    pub priority_fee_percentile: u8,
    pub min_priority_fee_lamports: u64,
    pub max_priority_fee_lamports: u64,
    pub static_priority_fee_lamports: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_mode: BotMode,
    pub commitment_level: CommitmentLevel,
    pub rpc_endpoints: Vec<String>,
    pub rpc_websocket_url: Option<String>,
    pub data_dir: String,
    pub wallet_private_key: String,
    pub paper_trading: bool,
    pub position_check_interval_ms: u64,
    pub trading: TradingConfig,
    pub exposure: ExposureConfig,
    pub deep_filters: DeepFilterConfig,
    pub momentum: MomentumConfig,
    pub fees: FeeConfig,
    pub endpoint_pool: EndpointPoolConfig,
}

#[derive(Debug)]
pub struct ConfigError {
    pub problems: Vec<String>,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "configuration invalid ({} problem(s)):", self.problems.len())?;
        for p in &self.problems {
            writeln!(f, "  - {p}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

/// Collects parse/range failures instead of bailing on the first one, so the
/// caller can report every problem in a single diagnostic bundle.
struct Collector {
    problems: Vec<String>,
}

impl Collector {
    fn new() -> Self {
        Self { problems: Vec::new() }
    }

    fn required(&mut self, name: &str) -> Option<String> {
        match env::var(name) {
            Ok(v) if !v.trim().is_empty() => Some(v),
            _ => {
                self.problems.push(format!("{name} is required but not set"));
                None
            }
        }
    }

    fn optional(&self, name: &str, default: &str) -> String {
        env::var(name).unwrap_or_else(|_| default.to_string())
    }

    fn parse_optional<T: std::str::FromStr>(&mut self, name: &str, default: T) -> T
    where
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Err(_) => default,
            Ok(v) => match v.parse::<T>() {
                Ok(parsed) => parsed,
                Err(e) => {
                    self.problems.push(format!("{name}={v:?} is invalid: {e}"));
                    default
                }
            },
        }
    }

    fn parse_optional_opt<T: std::str::FromStr>(&mut self, name: &str) -> Option<T>
    where
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Err(_) => None,
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => match v.parse::<T>() {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    self.problems.push(format!("{name}={v:?} is invalid: {e}"));
                    None
                }
            },
        }
    }

    fn in_range(&mut self, name: &str, value: f64, lo: f64, hi: f64) -> f64 {
        if value < lo || value > hi {
            self.problems
                .push(format!("{name}={value} must be between {lo} and {hi}"));
        }
        value
    }

    fn positive(&mut self, name: &str, value: u64) -> u64 {
        if value == 0 {
            self.problems.push(format!("{name} must be > 0"));
        }
        value
    }
}

impl Config {
    /// Parse every variable independently and surface all failures together.
    pub fn from_env() -> Result<Config, ConfigError> {
        let mut c = Collector::new();

        let bot_mode_raw = c.optional("BOT_MODE", "dry_run");
        let bot_mode = BotMode::parse(&bot_mode_raw).unwrap_or_else(|| {
            c.problems.push(format!(
                "BOT_MODE={bot_mode_raw:?} must be one of production|dry_run|smoke|ab|standby"
            ));
            BotMode::DryRun
        });

        let commitment_raw = c.optional("COMMITMENT_LEVEL", "confirmed");
        let commitment_level = CommitmentLevel::parse(&commitment_raw).unwrap_or_else(|| {
            c.problems.push(format!(
                "COMMITMENT_LEVEL={commitment_raw:?} must be one of processed|confirmed|finalized"
            ));
            CommitmentLevel::Confirmed
        });

        let rpc_endpoints: Vec<String> = match c.required("RPC_ENDPOINTS") {
            Some(raw) => raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
            None => Vec::new(),
        };
        if rpc_endpoints.is_empty() {
            c.problems.push("RPC_ENDPOINTS must contain at least one endpoint".to_string());
        }
        let rpc_websocket_url = env::var("RPC_WEBSOCKET_URL").ok().filter(|s| !s.is_empty());

        let data_dir = c.optional("DATA_DIR", "./data");
        let wallet_private_key = c.required("WALLET_PRIVATE_KEY").unwrap_or_default();
        let paper_trading = c.parse_optional("PAPER_TRADING", true);

        let position_check_interval_ms_raw = c.parse_optional("POSITION_CHECK_INTERVAL_MS", 500u64);
        let position_check_interval_ms = c.positive("POSITION_CHECK_INTERVAL_MS", position_check_interval_ms_raw);

        let quote_amount_raw = c.parse_optional("QUOTE_AMOUNT", 1_000_000u64);
        let quote_amount_lamports = c.positive("QUOTE_AMOUNT", quote_amount_raw);
        let buy_slippage_raw = c.parse_optional("BUY_SLIPPAGE", 10.0);
        let buy_slippage_pct = c.in_range("BUY_SLIPPAGE", buy_slippage_raw, 0.0, 100.0);
        let sell_slippage_raw = c.parse_optional("SELL_SLIPPAGE", 10.0);
        let sell_slippage_pct = c.in_range("SELL_SLIPPAGE", sell_slippage_raw, 0.0, 100.0);
        let take_profit_pct = c.parse_optional("TAKE_PROFIT", 40.0);
        let stop_loss_pct = c.parse_optional("STOP_LOSS", 20.0);
        let max_hold_duration_ms = c.parse_optional("MAX_HOLD_DURATION_MS", 0u64);

        let trading = TradingConfig {
            quote_amount_lamports,
            buy_slippage_bps: (buy_slippage_pct * 100.0) as u64,
            sell_slippage_bps: (sell_slippage_pct * 100.0) as u64,
            take_profit_pct,
            stop_loss_pct,
            max_hold_duration_ms,
            single_slot_mode: c.parse_optional("SINGLE_SLOT_MODE", true),
        };

        let exposure = ExposureConfig {
            max_total_exposure_sol: c.parse_optional("MAX_TOTAL_EXPOSURE_SOL", 1.0),
            max_trades_per_hour: c.parse_optional("MAX_TRADES_PER_HOUR", 20u32),
            min_wallet_buffer_sol: c.parse_optional("MIN_WALLET_BUFFER_SOL", 0.05),
        };

        let deep_filters = DeepFilterConfig {
            min_sol_in_curve: if c.parse_optional("PUMPFUN_ENABLE_MIN_SOL", false) {
                Some(c.parse_optional("PUMPFUN_MIN_SOL_IN_CURVE", 5.0))
            } else {
                None
            },
            max_sol_in_curve: if c.parse_optional("PUMPFUN_ENABLE_MAX_SOL", false) {
                Some(c.parse_optional("PUMPFUN_MAX_SOL_IN_CURVE", 300.0))
            } else {
                None
            },
            min_score_required: c.parse_optional("PUMPFUN_MIN_SCORE_REQUIRED", 0.0),
        };

        let momentum = MomentumConfig {
            enabled: c.parse_optional("MOMENTUM_ENABLED", true),
            initial_delay_ms: c.parse_optional("MOMENTUM_INITIAL_DELAY_MS", 500u64),
            recheck_interval_ms: c.parse_optional("MOMENTUM_RECHECK_INTERVAL_MS", 300u64),
            max_checks: c.parse_optional("MOMENTUM_MAX_CHECKS", 5u32),
            min_total_buys: c.parse_optional("MOMENTUM_MIN_TOTAL_BUYS", 2u32),
        };

        let percentile = c.parse_optional("PRIORITY_FEE_PERCENTILE", 75u8);
        if percentile as f64 > 100.0 {
            c.problems.push(format!("PRIORITY_FEE_PERCENTILE={percentile} must be <= 100"));
        }
        let fees = FeeConfig {
            use_dynamic_fee: c.parse_optional("USE_DYNAMIC_FEE", true),
            priority_fee_percentile: percentile,
            min_priority_fee_lamports: c.parse_optional("MIN_PRIORITY_FEE", 1_000u64),
            max_priority_fee_lamports: c.parse_optional("MAX_PRIORITY_FEE", 500_000u64),
            static_priority_fee_lamports: c.parse_optional_opt("STATIC_PRIORITY_FEE").unwrap_or(10_000),
        };

        let endpoint_pool = EndpointPoolConfig {
            max_failures: c.parse_optional("RPC_MAX_FAILURES", 3u32),
            recovery_window_ms: c.parse_optional("RPC_RECOVERY_WINDOW_MS", 30_000u64),
            max_attempts: c.parse_optional("RPC_MAX_ATTEMPTS", 5u32),
        };

        if !c.problems.is_empty() {
            return Err(ConfigError { problems: c.problems });
        }

        Ok(Config {
            bot_mode,
            commitment_level,
            rpc_endpoints,
            rpc_websocket_url,
            data_dir,
            wallet_private_key,
            paper_trading,
            position_check_interval_ms,
            trading,
            exposure,
            deep_filters,
            momentum,
            fees,
            endpoint_pool,
        })
    }

    pub fn position_check_interval(&self) -> Duration {
        Duration::from_millis(self.position_check_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for (k, _) in env::vars() {
            if k.starts_with("RPC_")
                || k.starts_with("WALLET_")
                || k.starts_with("PAPER_")
                || k.starts_with("BOT_MODE")
                || k.starts_with("QUOTE_")
                || k.starts_with("MAX_")
                || k.starts_with("MIN_")
                || k.starts_with("PUMPFUN_")
                || k.starts_with("MOMENTUM_")
                || k.starts_with("TAKE_")
                || k.starts_with("STOP_")
                || k.starts_with("COMMITMENT_")
                || k.starts_with("PRIORITY_")
                || k.starts_with("USE_DYNAMIC_")
                || k.starts_with("POSITION_")
                || k.starts_with("DATA_DIR")
                || k.starts_with("BUY_")
                || k.starts_with("SELL_")
                || k.starts_with("STATIC_")
            {
                env::remove_var(k);
            }
        }
    }

    #[test]
    fn missing_required_vars_are_aggregated() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let err = Config::from_env().unwrap_err();
        assert!(err.problems.iter().any(|p| p.contains("RPC_ENDPOINTS")));
        assert!(err.problems.iter().any(|p| p.contains("WALLET_PRIVATE_KEY")));
    }

    #[test]
    fn minimal_valid_env_parses() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("RPC_ENDPOINTS", "https://api.mainnet-beta.solana.com");
        env::set_var("WALLET_PRIVATE_KEY", "dummykey");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.rpc_endpoints.len(), 1);
        assert!(cfg.paper_trading);
        assert_eq!(cfg.bot_mode, BotMode::DryRun);
        clear_env();
    }

    #[test]
    fn out_of_range_slippage_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("RPC_ENDPOINTS", "https://api.mainnet-beta.solana.com");
        env::set_var("WALLET_PRIVATE_KEY", "dummykey");
        env::set_var("BUY_SLIPPAGE", "150");
        let err = Config::from_env().unwrap_err();
        assert!(err.problems.iter().any(|p| p.contains("BUY_SLIPPAGE")));
        clear_env();
    }

    #[test]
    fn zero_check_interval_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("RPC_ENDPOINTS", "https://api.mainnet-beta.solana.com");
        env::set_var("WALLET_PRIVATE_KEY", "dummykey");
        env::set_var("POSITION_CHECK_INTERVAL_MS", "0");
        let err = Config::from_env().unwrap_err();
        assert!(err.problems.iter().any(|p| p.contains("POSITION_CHECK_INTERVAL_MS")));
        clear_env();
    }
}
