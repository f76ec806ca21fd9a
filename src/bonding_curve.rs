//! Decodes the fixed-layout pump.fun bonding-curve account and computes
//! buy/sell quotes under the on-chain constant-product formula, including the
//! exact rounding conventions the program itself applies.

use anyhow::{anyhow, Result};
use solana_sdk::pubkey::Pubkey;

use crate::constants::{
    BONDING_CURVE_MIN_ACCOUNT_LEN, BONDING_CURVE_MIN_ACCOUNT_LEN_WITH_CREATOR, BONDING_CURVE_SEED,
    DEFAULT_CREATOR_FEE_BPS, DEFAULT_PROTOCOL_FEE_BPS, DEFAULT_TOTAL_FEE_BPS, PUMPFUN_PROGRAM_ID,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BondingCurveState {
    pub virtual_token_reserves: u64,
    pub virtual_sol_reserves: u64,
    pub real_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub token_total_supply: u64,
    pub complete: bool,
    pub creator: Pubkey,
}

impl BondingCurveState {
    pub fn sol_in_curve(&self) -> f64 {
        crate::constants::lamports_to_sol(self.real_sol_reserves)
    }
}

/// Account layout after the 8-byte Anchor discriminator: six little-endian
/// u64 fields, a 1-byte bool, then (when present) a 32-byte creator pubkey.
pub fn decode(data: &[u8]) -> Result<BondingCurveState> {
    if data.len() < BONDING_CURVE_MIN_ACCOUNT_LEN {
        return Err(anyhow!(
            "bonding curve account too short: {} bytes (minimum {})",
            data.len(),
            BONDING_CURVE_MIN_ACCOUNT_LEN
        ));
    }

    let body = &data[8..];
    let read_u64 = |offset: usize| -> u64 { u64::from_le_bytes(body[offset..offset + 8].try_into().unwrap()) };

    let virtual_token_reserves = read_u64(0);
    let virtual_sol_reserves = read_u64(8);
    let real_token_reserves = read_u64(16);
    let real_sol_reserves = read_u64(24);
    let token_total_supply = read_u64(32);
    let complete = body[40] != 0;

    let creator = if data.len() >= BONDING_CURVE_MIN_ACCOUNT_LEN_WITH_CREATOR {
        Pubkey::try_from(&body[41..41 + 32]).unwrap_or_default()
    } else {
        Pubkey::default()
    };

    Ok(BondingCurveState {
        virtual_token_reserves,
        virtual_sol_reserves,
        real_token_reserves,
        real_sol_reserves,
        token_total_supply,
        complete,
        creator,
    })
}

/// Encodes a state back into the same layout. Used only by round-trip tests.
#[cfg(test)]
pub fn encode(state: &BondingCurveState, discriminator: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(81);
    out.extend_from_slice(&discriminator.to_le_bytes());
    out.extend_from_slice(&state.virtual_token_reserves.to_le_bytes());
    out.extend_from_slice(&state.virtual_sol_reserves.to_le_bytes());
    out.extend_from_slice(&state.real_token_reserves.to_le_bytes());
    out.extend_from_slice(&state.real_sol_reserves.to_le_bytes());
    out.extend_from_slice(&state.token_total_supply.to_le_bytes());
    out.push(state.complete as u8);
    out.extend_from_slice(state.creator.as_ref());
    out
}

pub fn bonding_curve_pda(mint: &Pubkey) -> Result<Pubkey> {
    let program_id: Pubkey = PUMPFUN_PROGRAM_ID.parse().map_err(|_| anyhow!("invalid pump.fun program id constant"))?;
    let (pda, _bump) = Pubkey::find_program_address(&[BONDING_CURVE_SEED, mint.as_ref()], &program_id);
    Ok(pda)
}

fn ceil_div(numerator: u128, denominator: u128) -> u128 {
    (numerator + denominator - 1) / denominator
}

/// A Token-2022 mint's transfer-fee extension, for the epoch currently in
/// effect. `basis_points` and `maximum_fee` are the two halves of the fee
/// formula the token program itself applies on every transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferFeeConfig {
    pub basis_points: u16,
    pub maximum_fee: u64,
}

impl TransferFeeConfig {
    fn fee_for(&self, amount: u64) -> u64 {
        let raw = (amount as u128 * self.basis_points as u128) / 10_000;
        (raw as u64).min(self.maximum_fee)
    }
}

const MINT_ACCOUNT_TYPE_OFFSET: usize = 165;
const MINT_ACCOUNT_TYPE_MINT: u8 = 1;
const EXTENSION_TYPE_TRANSFER_FEE_CONFIG: u16 = 1;

/// Parses a Token-2022 mint account's TLV extension data and returns the
/// transfer-fee schedule in effect at `current_epoch`, if the mint carries
/// the TransferFeeConfig extension at all. Layout follows spl-token-2022's
/// `PodStateWithExtensions`: 82-byte base mint, padded to 165 bytes, then a
/// 1-byte account-type marker, then `(type: u16, len: u16, data)` TLV
/// records.
pub fn decode_current_transfer_fee(mint_data: &[u8], current_epoch: u64) -> Option<TransferFeeConfig> {
    if mint_data.len() <= MINT_ACCOUNT_TYPE_OFFSET || mint_data[MINT_ACCOUNT_TYPE_OFFSET] != MINT_ACCOUNT_TYPE_MINT {
        return None;
    }

    let mut offset = MINT_ACCOUNT_TYPE_OFFSET + 1;
    while offset + 4 <= mint_data.len() {
        let ext_type = u16::from_le_bytes(mint_data[offset..offset + 2].try_into().ok()?);
        let ext_len = u16::from_le_bytes(mint_data[offset + 2..offset + 4].try_into().ok()?) as usize;
        let data_start = offset + 4;
        let data_end = data_start + ext_len;
        if data_end > mint_data.len() {
            return None;
        }

        if ext_type == EXTENSION_TYPE_TRANSFER_FEE_CONFIG {
            let ext = &mint_data[data_start..data_end];
            // transfer_fee_config_authority (32) + withdraw_withheld_authority (32)
            // + withheld_amount (8) = 72 bytes, then older_transfer_fee (18 bytes:
            // epoch u64, maximum_fee u64, basis_points u16), then newer_transfer_fee.
            if ext.len() < 72 + 18 + 18 {
                return None;
            }
            let older = parse_transfer_fee(&ext[72..90]);
            let newer = parse_transfer_fee(&ext[90..108]);
            return Some(if current_epoch >= newer.0 { newer.1 } else { older.1 });
        }

        offset = data_end;
    }

    None
}

fn parse_transfer_fee(bytes: &[u8]) -> (u64, TransferFeeConfig) {
    let epoch = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let maximum_fee = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
    let basis_points = u16::from_le_bytes(bytes[16..18].try_into().unwrap());
    (epoch, TransferFeeConfig { basis_points, maximum_fee })
}

#[derive(Debug, Clone, Copy)]
pub struct BuyQuote {
    pub tokens_out: u64,
    pub min_tokens_out: u64,
}

/// Buy quote for an exact-SOL-in swap. `fee_bps` is the total protocol+creator
/// fee; `protocol_fee_bps`/`creator_fee_bps` are its split, used only to
/// reproduce the on-chain rounding adjustment.
pub fn quote_buy(
    lamports_in: u64,
    state: &BondingCurveState,
    slippage_bps: u64,
    fee_bps: u64,
    protocol_fee_bps: u64,
    creator_fee_bps: u64,
    transfer_fee: Option<TransferFeeConfig>,
) -> Result<BuyQuote> {
    let a = lamports_in as u128;
    let f = fee_bps as u128;

    let mut net = (a * 10_000) / (10_000 + f);

    for _ in 0..8 {
        let protocol_fee = ceil_div(net * protocol_fee_bps as u128, 10_000);
        let creator_fee = ceil_div(net * creator_fee_bps as u128, 10_000);
        if net + protocol_fee + creator_fee <= a {
            break;
        }
        net = net.saturating_sub(1);
    }

    if net == 0 {
        return Err(anyhow!("buy amount too small to cover fees"));
    }

    let effective = net - 1;
    let vt = state.virtual_token_reserves as u128;
    let vs = state.virtual_sol_reserves as u128;

    if vt == 0 || vs == 0 {
        return Err(anyhow!("bonding curve has zero virtual reserves"));
    }

    let raw_tokens_out = (effective * vt) / (vs + effective);
    let tokens_out = raw_tokens_out.min(state.real_token_reserves as u128) as u64;

    if tokens_out == 0 {
        return Err(anyhow!("tokens_out is zero"));
    }

    // Token-2022 mints can levy a transfer fee on the curve's payout to the
    // buyer; that fee never reaches the buyer's wallet, so slippage must be
    // computed against what's left after it, not the curve's raw output.
    let tokens_out = match transfer_fee {
        Some(tf) => tokens_out.saturating_sub(tf.fee_for(tokens_out)),
        None => tokens_out,
    };
    if tokens_out == 0 {
        return Err(anyhow!("tokens_out is zero after transfer fee"));
    }

    let min_tokens_out = (tokens_out as u128 * (10_000 - slippage_bps.min(10_000) as u128) / 10_000) as u64;
    if min_tokens_out == 0 {
        return Err(anyhow!("minTokensOut=0"));
    }

    Ok(BuyQuote { tokens_out, min_tokens_out })
}

#[derive(Debug, Clone, Copy)]
pub struct SellQuote {
    pub sol_out: u64,
    pub min_sol_out: u64,
}

pub fn quote_sell(
    tokens_in: u64,
    state: &BondingCurveState,
    slippage_bps: u64,
    transfer_fee: Option<TransferFeeConfig>,
) -> Result<SellQuote> {
    let vt = state.virtual_token_reserves as u128;
    let vs = state.virtual_sol_reserves as u128;

    // The seller's transfer into the curve is itself subject to the
    // Token-2022 transfer fee, so the curve only ever receives the
    // post-fee amount; the swap math must run on that, not the gross
    // tokens_in the wallet sends.
    let tokens_in = match transfer_fee {
        Some(tf) => tokens_in.saturating_sub(tf.fee_for(tokens_in)),
        None => tokens_in,
    };
    let tokens_in = tokens_in as u128;

    if vt + tokens_in == 0 {
        return Err(anyhow!("bonding curve has zero reserves for sell quote"));
    }

    let sol_out = vs.saturating_sub((vt * vs) / (vt + tokens_in));
    let min_sol_out = (sol_out * (10_000 - slippage_bps.min(10_000) as u128)) / 10_000;

    Ok(SellQuote { sol_out: sol_out as u64, min_sol_out: min_sol_out as u64 })
}

/// Default pump.fun fee split, used when no dynamic fee schedule is read
/// on-chain.
pub fn default_fee_split() -> (u64, u64, u64) {
    (DEFAULT_TOTAL_FEE_BPS, DEFAULT_PROTOCOL_FEE_BPS, DEFAULT_CREATOR_FEE_BPS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> BondingCurveState {
        BondingCurveState {
            virtual_token_reserves: 1_073_000_000_000_000,
            virtual_sol_reserves: 30_000_000_000,
            real_token_reserves: 793_100_000_000_000,
            real_sol_reserves: 6_000_000_000,
            token_total_supply: 1_000_000_000_000_000,
            complete: false,
            creator: Pubkey::new_unique(),
        }
    }

    #[test]
    fn decode_rejects_short_accounts() {
        assert!(decode(&[0u8; 40]).is_err());
    }

    #[test]
    fn decode_encode_round_trips_numeric_fields() {
        let state = sample_state();
        let bytes = encode(&state, 123);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.virtual_token_reserves, state.virtual_token_reserves);
        assert_eq!(decoded.virtual_sol_reserves, state.virtual_sol_reserves);
        assert_eq!(decoded.real_token_reserves, state.real_token_reserves);
        assert_eq!(decoded.real_sol_reserves, state.real_sol_reserves);
        assert_eq!(decoded.token_total_supply, state.token_total_supply);
        assert_eq!(decoded.complete, state.complete);
        assert_eq!(decoded.creator, state.creator);
    }

    #[test]
    fn happy_path_buy_quote_matches_scenario() {
        let state = sample_state();
        let (fee_bps, protocol_bps, creator_bps) = default_fee_split();
        let quote = quote_buy(1_000_000, &state, 2_000, fee_bps, protocol_bps, creator_bps, None).unwrap();
        // Order-of-magnitude check against the curve's reserve ratio; exact
        // value depends on the fee split, which is itself configurable.
        assert!(quote.tokens_out > 30_000_000_000);
        assert!(quote.tokens_out < 40_000_000_000);
        assert!(quote.min_tokens_out < quote.tokens_out);
    }

    #[test]
    fn buy_quote_rejects_when_slippage_collapses_to_zero() {
        let state = sample_state();
        let (fee_bps, protocol_bps, creator_bps) = default_fee_split();
        let result = quote_buy(1, &state, 10_000, fee_bps, protocol_bps, creator_bps, None);
        assert!(result.is_err());
    }

    #[test]
    fn sell_quote_applies_downward_slippage() {
        let state = sample_state();
        let quote = quote_sell(34_000_000_000, &state, 1_000, None).unwrap();
        assert!(quote.min_sol_out < quote.sol_out);
    }

    #[test]
    fn tokens_out_never_exceeds_real_reserves() {
        let mut state = sample_state();
        state.real_token_reserves = 1_000;
        let (fee_bps, protocol_bps, creator_bps) = default_fee_split();
        let quote = quote_buy(1_000_000, &state, 0, fee_bps, protocol_bps, creator_bps, None).unwrap();
        assert!(quote.tokens_out <= 1_000);
    }

    #[test]
    fn buy_quote_applies_transfer_fee_before_slippage() {
        let state = sample_state();
        let (fee_bps, protocol_bps, creator_bps) = default_fee_split();
        let without_fee = quote_buy(1_000_000, &state, 0, fee_bps, protocol_bps, creator_bps, None).unwrap();
        let with_fee = quote_buy(
            1_000_000,
            &state,
            0,
            fee_bps,
            protocol_bps,
            creator_bps,
            Some(TransferFeeConfig { basis_points: 500, maximum_fee: u64::MAX }),
        )
        .unwrap();
        assert!(with_fee.tokens_out < without_fee.tokens_out);
    }

    #[test]
    fn transfer_fee_decode_picks_epoch_appropriate_schedule() {
        let mut data = vec![0u8; MINT_ACCOUNT_TYPE_OFFSET + 1 + 4 + 108];
        data[MINT_ACCOUNT_TYPE_OFFSET] = MINT_ACCOUNT_TYPE_MINT;
        let tlv_start = MINT_ACCOUNT_TYPE_OFFSET + 1;
        data[tlv_start..tlv_start + 2].copy_from_slice(&EXTENSION_TYPE_TRANSFER_FEE_CONFIG.to_le_bytes());
        data[tlv_start + 2..tlv_start + 4].copy_from_slice(&108u16.to_le_bytes());
        let ext_start = tlv_start + 4;
        // older: epoch 0, max_fee 1_000, bps 100
        data[ext_start + 72..ext_start + 80].copy_from_slice(&0u64.to_le_bytes());
        data[ext_start + 80..ext_start + 88].copy_from_slice(&1_000u64.to_le_bytes());
        data[ext_start + 88..ext_start + 90].copy_from_slice(&100u16.to_le_bytes());
        // newer: epoch 500, max_fee 2_000, bps 200
        data[ext_start + 90..ext_start + 98].copy_from_slice(&500u64.to_le_bytes());
        data[ext_start + 98..ext_start + 106].copy_from_slice(&2_000u64.to_le_bytes());
        data[ext_start + 106..ext_start + 108].copy_from_slice(&200u16.to_le_bytes());

        let before = decode_current_transfer_fee(&data, 100).unwrap();
        assert_eq!(before, TransferFeeConfig { basis_points: 100, maximum_fee: 1_000 });

        let after = decode_current_transfer_fee(&data, 500).unwrap();
        assert_eq!(after, TransferFeeConfig { basis_points: 200, maximum_fee: 2_000 });
    }

    #[test]
    fn transfer_fee_decode_returns_none_for_legacy_mint() {
        let data = vec![0u8; MINT_ACCOUNT_TYPE_OFFSET];
        assert!(decode_current_transfer_fee(&data, 100).is_none());
    }
}
