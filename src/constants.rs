//! Centralizes the fixed, non-configurable constants of the pump.fun bonding-curve
//! protocol and a handful of conservative transaction-fee defaults.
//!
//! Everything a deployment is allowed to tune lives in [`crate::config::Config`]
//! instead; this module holds only what the on-chain program itself fixes.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ============================================================================
// SOLANA BLOCKCHAIN CONSTANTS
// ============================================================================

/// 1 SOL = 1 billion lamports
pub const SOL_DECIMALS: u64 = 1_000_000_000;

pub const fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / SOL_DECIMALS as f64
}

pub const fn sol_to_lamports(sol: f64) -> u64 {
    (sol * SOL_DECIMALS as f64) as u64
}

/// Approximate Solana slot time.
pub const SOLANA_SLOT_TIME_MS: u64 = 400;

pub const DEFAULT_TX_TIMEOUT_SECONDS: u64 = 30;

// ============================================================================
// TRANSACTION FEE CONSTANTS
// ============================================================================

pub const BASE_SIGNATURE_FEE_LAMPORTS: u64 = 5_000;
pub const SAFETY_BUFFER_LAMPORTS: u64 = 5_000_000;
pub const MAX_COMPUTE_UNITS: u32 = 1_400_000;

/// Rent-exempt minimum for a freshly-created associated token account.
pub const ATA_RENT_LAMPORTS: u64 = 2_039_280;

// ============================================================================
// PUMP.FUN PROGRAM ADDRESSES
// ============================================================================

pub const PUMPFUN_PROGRAM_ID: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";
pub const PUMPFUN_GLOBAL: &str = "4wTV1YmiEkRvAtNtsSGPtUrqRYQMe5SKy2uB4Jjaxnjf";
pub const PUMPFUN_FEE_RECIPIENT: &str = "CebN5WGQ4jvEPvsVU4EoHEpgzq1VV7AbicfhtW4xC9iM";
pub const PUMPFUN_EVENT_AUTHORITY: &str = "Ce6TQqeHC9p8KetsN6JsjHK7UTZk7nasjjnr7XxXp9F1";

pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

/// PDA seed for a mint's bonding-curve account: `[SEED, mint]`.
pub const BONDING_CURVE_SEED: &[u8] = b"bonding-curve";
pub const GLOBAL_VOLUME_ACCUMULATOR_SEED: &[u8] = b"global_volume_accumulator";
pub const USER_VOLUME_ACCUMULATOR_SEED: &[u8] = b"user_volume_accumulator";
pub const CREATOR_VAULT_SEED: &[u8] = b"creator-vault";

/// Instruction discriminators: first 8 bytes of SHA-256("global:<name>"), reinterpreted
/// here as little-endian u64s so they can be spliced directly into instruction data.
pub const BUY_DISCRIMINATOR: u64 = 16_927_863_322_537_952_870;
pub const SELL_DISCRIMINATOR: u64 = 12_502_976_635_542_562_355;

/// Minimum account data length for a bonding-curve account that predates the
/// creator-rewards extension: 8-byte discriminator + 6 u64 fields (48 bytes) +
/// 1 bool byte. Accounts at or above this length but below
/// `BONDING_CURVE_MIN_ACCOUNT_LEN_WITH_CREATOR` decode with a default creator.
pub const BONDING_CURVE_MIN_ACCOUNT_LEN: usize = 49;

/// Minimum account data length for a bonding-curve account carrying the
/// 32-byte creator pubkey appended after the bool field.
pub const BONDING_CURVE_MIN_ACCOUNT_LEN_WITH_CREATOR: usize = 81;

/// A curve is considered graduated once real SOL reserves cross this many lamports,
/// independent of the `complete` flag (used only as a defensive cross-check).
pub const BONDING_CURVE_MIGRATION_LAMPORTS: u64 = 85_000_000_000;

/// Default pump.fun total fee, split between protocol and creator, in basis points.
pub const DEFAULT_TOTAL_FEE_BPS: u64 = 125;
pub const DEFAULT_PROTOCOL_FEE_BPS: u64 = 95;
pub const DEFAULT_CREATOR_FEE_BPS: u64 = 30;

pub const DEFAULT_BUY_COMPUTE_UNITS: u32 = 150_000;
pub const DEFAULT_SELL_COMPUTE_UNITS: u32 = 120_000;

// ============================================================================
// RETRY & BACK-OFF DEFAULTS
// ============================================================================

pub const RPC_MAX_RETRIES: u32 = 4;
pub const RATE_LIMIT_BACKOFF_START_MS: u64 = 1_000;
pub const RATE_LIMIT_BACKOFF_CAP_MS: u64 = 8_000;

// ============================================================================
// HELPERS
// ============================================================================

pub const fn bps_to_fraction(bps: u64) -> f64 {
    bps as f64 / 10_000.0
}

pub const fn duration_from_ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Wall-clock milliseconds since the Unix epoch. All persisted and in-memory
/// timestamps use this unit.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sol_lamports_round_trip() {
        assert_eq!(sol_to_lamports(1.0), SOL_DECIMALS);
        assert_eq!(lamports_to_sol(SOL_DECIMALS), 1.0);
        assert_eq!(sol_to_lamports(0.5), 500_000_000);
    }

    #[test]
    fn fee_split_matches_total() {
        assert_eq!(DEFAULT_PROTOCOL_FEE_BPS + DEFAULT_CREATOR_FEE_BPS, DEFAULT_TOTAL_FEE_BPS);
    }

    #[test]
    fn bps_to_fraction_is_sane() {
        assert!((bps_to_fraction(125) - 0.0125).abs() < 1e-12);
    }
}
