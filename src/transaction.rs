//! Builds, signs, submits, and balance-verifies pump.fun buy/sell
//! transactions. Grounded on `pumpfun_integration.rs`'s
//! `PumpFunTransactionBuilder` (compute-budget prepending) generalized with
//! the real account ordering and discriminators from
//! `other_examples/02b48b38_..._pump_fun.rs.rs`.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_rpc_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_program;
use solana_sdk::transaction::Transaction;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::UiTransactionEncoding;
use tracing::{debug, warn};

use crate::bonding_curve::TransferFeeConfig;
use crate::config::{Config, FeeConfig};
use crate::constants::{
    lamports_to_sol, BASE_SIGNATURE_FEE_LAMPORTS, BUY_DISCRIMINATOR, CREATOR_VAULT_SEED, DEFAULT_BUY_COMPUTE_UNITS,
    DEFAULT_SELL_COMPUTE_UNITS, GLOBAL_VOLUME_ACCUMULATOR_SEED, PUMPFUN_EVENT_AUTHORITY, PUMPFUN_FEE_RECIPIENT,
    PUMPFUN_GLOBAL, PUMPFUN_PROGRAM_ID, SAFETY_BUFFER_LAMPORTS, SELL_DISCRIMINATOR, TOKEN_2022_PROGRAM_ID,
    TOKEN_PROGRAM_ID, USER_VOLUME_ACCUMULATOR_SEED,
};
use crate::endpoint_pool::{EndpointError, EndpointPool};
use crate::listener::TokenProgramVariant;
use crate::wallet::Wallet;

fn token_program_id(variant: TokenProgramVariant) -> Result<Pubkey> {
    let raw = match variant {
        TokenProgramVariant::Legacy => TOKEN_PROGRAM_ID,
        TokenProgramVariant::Token2022 => TOKEN_2022_PROGRAM_ID,
    };
    Pubkey::from_str(raw).context("invalid token program id constant")
}

const BUY_SLIPPAGE_WARN_BPS: f64 = 500.0; // 5%
const OUTFLOW_FINGERPRINT_FACTOR: f64 = 1.2; // > 20% over estimate
const SEND_RETRIES: usize = 3;
const BALANCE_READ_RETRIES: u32 = 3;

/// Structured outcome of a buy attempt. Never panics or throws across the
/// pipeline boundary; a rejection is just `success = false` with `error` set.
#[derive(Debug, Clone)]
pub struct BuyOutcome {
    pub success: bool,
    pub signature: Option<String>,
    pub actual_sol_spent: f64,
    pub actual_tokens_received: u64,
    pub verified: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SellOutcome {
    pub success: bool,
    pub signature: Option<String>,
    pub actual_sol_received: f64,
    pub verified: bool,
    pub error: Option<String>,
}

pub struct TransactionLayer {
    endpoint_pool: Arc<EndpointPool>,
    wallet: Arc<Wallet>,
    fees: FeeConfig,
    program_id: Pubkey,
}

impl TransactionLayer {
    pub fn new(endpoint_pool: Arc<EndpointPool>, wallet: Arc<Wallet>, fees: FeeConfig) -> Result<Self> {
        let program_id = Pubkey::from_str(PUMPFUN_PROGRAM_ID).context("invalid pump.fun program id constant")?;
        Ok(Self { endpoint_pool, wallet, fees, program_id })
    }

    pub fn from_config(config: &Config, endpoint_pool: Arc<EndpointPool>, wallet: Arc<Wallet>) -> Result<Self> {
        Self::new(endpoint_pool, wallet, config.fees.clone())
    }

    fn client(&self) -> RpcClient {
        RpcClient::new(self.endpoint_pool.current())
    }

    /// Samples recent prioritization fees for the percentile configured in
    /// `fees`, dropping zero samples; falls back to the static configured
    /// price if dynamic fees are disabled or no non-zero sample exists.
    async fn estimate_priority_fee(&self, accounts: &[Pubkey]) -> u64 {
        if !self.fees.use_dynamic_fee {
            return self.fees.static_priority_fee_lamports;
        }

        let client = self.client();
        let samples = match client.get_recent_prioritization_fees(accounts).await {
            Ok(samples) => samples,
            Err(err) => {
                debug!("failed to fetch recent prioritization fees, using static fee: {err}");
                return self.fees.static_priority_fee_lamports;
            }
        };

        let mut nonzero: Vec<u64> = samples.into_iter().map(|s| s.prioritization_fee).filter(|&f| f > 0).collect();
        if nonzero.is_empty() {
            return self.fees.static_priority_fee_lamports;
        }
        nonzero.sort_unstable();

        let idx = ((nonzero.len() - 1) * self.fees.priority_fee_percentile as usize) / 100;
        let sampled = nonzero[idx];
        sampled.clamp(self.fees.min_priority_fee_lamports, self.fees.max_priority_fee_lamports)
    }

    async fn ata_exists(&self, ata: &Pubkey) -> bool {
        self.client().get_account(ata).await.is_ok()
    }

    async fn latest_blockhash(&self) -> Result<solana_sdk::hash::Hash> {
        self.client().get_latest_blockhash().await.context("failed to fetch latest blockhash")
    }

    /// Current wallet SOL balance in lamports, used to keep the exposure
    /// manager's spendable-buffer check current.
    pub async fn get_wallet_balance_lamports(&self) -> Result<u64> {
        self.client().get_balance(&self.wallet.pubkey()).await.context("failed to fetch wallet balance")
    }

    /// On-chain balance of `mint`'s associated token account for the wallet,
    /// or 0 if the account doesn't exist. Used on startup to detect
    /// positions the store still considers open but the wallet no longer
    /// holds tokens for.
    pub async fn token_balance_for_mint(&self, mint: &Pubkey) -> u64 {
        let ata = spl_associated_token_account::get_associated_token_address(&self.wallet.pubkey(), mint);
        read_token_balance(&self.client(), &ata).await.unwrap_or(0)
    }

    /// Identifies which SPL token program owns `mint`'s account, for
    /// positions whose detection-time variant isn't otherwise on hand (e.g.
    /// the position monitor re-deriving it before a sell quote).
    pub async fn mint_token_program(&self, mint: &Pubkey) -> TokenProgramVariant {
        match self.client().get_account(mint).await {
            Ok(account) if account.owner.to_string() == TOKEN_2022_PROGRAM_ID => TokenProgramVariant::Token2022,
            _ => TokenProgramVariant::Legacy,
        }
    }

    /// Current transfer-fee schedule for `mint`, if it's a Token-2022 mint
    /// with the TransferFeeConfig extension. Legacy mints never pay a
    /// transfer fee, so this skips the RPC round trip entirely for them.
    pub async fn current_transfer_fee(&self, mint: &Pubkey, variant: TokenProgramVariant) -> Option<TransferFeeConfig> {
        if variant == TokenProgramVariant::Legacy {
            return None;
        }

        let client = self.client();
        let account = client.get_account(mint).await.ok()?;
        let epoch = client.get_epoch_info().await.ok()?.epoch;
        crate::bonding_curve::decode_current_transfer_fee(&account.data, epoch)
    }

    /// Submits, confirms, and re-reads balances around `transaction`, the way
    /// the hardest part of the spec demands: pre/post SOL and token balance
    /// deltas, with a metadata-parse fallback if a balance read itself fails.
    async fn send_and_verify(
        &self,
        mut transaction: Transaction,
        token_account: Pubkey,
    ) -> Result<(String, i64, i64)> {
        let client = self.client();

        let pre_sol = client.get_balance(&self.wallet.pubkey()).await.unwrap_or(0);
        let pre_token = read_token_balance(&client, &token_account).await.unwrap_or(0);

        let blockhash = self.latest_blockhash().await?;
        transaction.message.recent_blockhash = blockhash;
        self.wallet.sign_transaction(&mut transaction)?;

        if self.wallet.is_paper_trading() {
            return Ok(("PAPER".to_string(), 0, 0));
        }

        let signature = self
            .endpoint_pool
            .execute_with_retry("transaction.send", || async {
                client
                    .send_transaction_with_config(
                        &transaction,
                        RpcSendTransactionConfig { skip_preflight: false, max_retries: Some(SEND_RETRIES), ..Default::default() },
                    )
                    .await
                    .map_err(|err| {
                        let message = err.to_string();
                        if message.contains("429") {
                            EndpointError::RateLimited(message)
                        } else {
                            EndpointError::Other(message)
                        }
                    })
            })
            .await
            .map_err(|message| anyhow::anyhow!(message))?;

        client
            .confirm_transaction_with_commitment(&signature, self.endpoint_pool.commitment().to_commitment_config())
            .await
            .context("failed waiting for confirmation")?;

        let (post_sol, post_token) = match read_both_balances(&client, &self.wallet.pubkey(), &token_account, BALANCE_READ_RETRIES).await {
            Some(pair) => pair,
            None => {
                warn!("balance read failed after retries, falling back to parsed transaction metadata for {signature}");
                fallback_from_parsed_tx(&client, &signature, &self.wallet.pubkey()).await.unwrap_or((pre_sol, pre_token))
            }
        };

        Ok((signature.to_string(), post_sol as i64 - pre_sol as i64, post_token as i64 - pre_token as i64))
    }

    /// Pre-submission outflow guard plus the full buy flow. `fee_split` is
    /// `(total_bps, protocol_bps, creator_bps)` from the bonding-curve module.
    #[allow(clippy::too_many_arguments)]
    pub async fn buy(
        &self,
        mint: Pubkey,
        bonding_curve: Pubkey,
        associated_curve: Pubkey,
        creator: Pubkey,
        lamports_in: u64,
        min_tokens_out: u64,
        token_program: TokenProgramVariant,
    ) -> Result<BuyOutcome> {
        if min_tokens_out == 0 {
            return Ok(BuyOutcome {
                success: false,
                signature: None,
                actual_sol_spent: 0.0,
                actual_tokens_received: 0,
                verified: false,
                error: Some("minTokensOut=0".to_string()),
            });
        }

        let owner = self.wallet.pubkey();
        let out_ata = spl_associated_token_account::get_associated_token_address(&owner, &mint);
        let ata_absent = !self.ata_exists(&out_ata).await;

        let priority_fee_micro_lamports = self.estimate_priority_fee(&[bonding_curve]).await;
        let priority_fee_lamports = micro_lamports_to_lamports(priority_fee_micro_lamports, DEFAULT_BUY_COMPUTE_UNITS);
        let expected_outflow = lamports_in
            + if ata_absent { crate::constants::ATA_RENT_LAMPORTS } else { 0 }
            + BASE_SIGNATURE_FEE_LAMPORTS
            + priority_fee_lamports
            + SAFETY_BUFFER_LAMPORTS;

        let balance = self.client().get_balance(&owner).await.unwrap_or(0);
        if balance < expected_outflow {
            return Ok(BuyOutcome {
                success: false,
                signature: None,
                actual_sol_spent: 0.0,
                actual_tokens_received: 0,
                verified: false,
                error: Some("outflow_guard".to_string()),
            });
        }

        let mut instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_limit(DEFAULT_BUY_COMPUTE_UNITS),
            ComputeBudgetInstruction::set_compute_unit_price(priority_fee_micro_lamports),
        ];
        if ata_absent {
            instructions.push(spl_associated_token_account::instruction::create_associated_token_account(
                &owner,
                &owner,
                &mint,
                &token_program_id(token_program)?,
            ));
        }
        instructions.push(self.build_buy_instruction(
            &mint,
            &bonding_curve,
            &associated_curve,
            &out_ata,
            &owner,
            &creator,
            lamports_in,
            min_tokens_out,
            token_program,
        )?);

        let message = solana_sdk::message::Message::new(&instructions, Some(&owner));
        let transaction = Transaction::new_unsigned(message);

        let (signature, sol_delta, token_delta) = self.send_and_verify(transaction, out_ata).await?;

        let actual_sol_spent = lamports_to_sol((-sol_delta).max(0) as u64);
        let actual_tokens_received = token_delta.max(0) as u64;

        let intended_sol = lamports_to_sol(lamports_in);
        if intended_sol > 0.0 {
            let slippage_bps = ((actual_sol_spent - intended_sol) / intended_sol * 10_000.0).abs();
            if slippage_bps > BUY_SLIPPAGE_WARN_BPS {
                warn!("buy slippage {:.2}% exceeds 5% for {mint}: intended {intended_sol} SOL, actual {actual_sol_spent} SOL", slippage_bps / 100.0);
            }
        }
        if actual_sol_spent > lamports_to_sol(expected_outflow) * OUTFLOW_FINGERPRINT_FACTOR {
            warn!(
                "fingerprint check: actual spend {actual_sol_spent} SOL exceeds outflow-guard estimate {} SOL by >20%, possible concurrent transaction in the balance window",
                lamports_to_sol(expected_outflow)
            );
        }

        Ok(BuyOutcome { success: true, signature: Some(signature), actual_sol_spent, actual_tokens_received, verified: true, error: None })
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn sell(
        &self,
        mint: Pubkey,
        bonding_curve: Pubkey,
        associated_curve: Pubkey,
        creator: Pubkey,
        tokens_in: u64,
        min_sol_out: u64,
        token_program: TokenProgramVariant,
    ) -> Result<SellOutcome> {
        let owner = self.wallet.pubkey();
        let in_ata = spl_associated_token_account::get_associated_token_address(&owner, &mint);

        let priority_fee_micro_lamports = self.estimate_priority_fee(&[bonding_curve]).await;
        let instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_limit(DEFAULT_SELL_COMPUTE_UNITS),
            ComputeBudgetInstruction::set_compute_unit_price(priority_fee_micro_lamports),
            self.build_sell_instruction(&mint, &bonding_curve, &associated_curve, &in_ata, &owner, &creator, tokens_in, min_sol_out, token_program)?,
        ];

        let message = solana_sdk::message::Message::new(&instructions, Some(&owner));
        let transaction = Transaction::new_unsigned(message);

        let (signature, sol_delta, _token_delta) = self.send_and_verify(transaction, in_ata).await?;
        // Sell proceeds are (post_sol - pre_sol) adjusted by adding back the
        // signature/priority fee the transaction itself consumed.
        let fee_paid = BASE_SIGNATURE_FEE_LAMPORTS + micro_lamports_to_lamports(priority_fee_micro_lamports, DEFAULT_SELL_COMPUTE_UNITS);
        let actual_sol_received = lamports_to_sol((sol_delta + fee_paid as i64).max(0) as u64);

        Ok(SellOutcome { success: true, signature: Some(signature), actual_sol_received, verified: true, error: None })
    }

    fn pda(&self, seeds: &[&[u8]]) -> Pubkey {
        Pubkey::find_program_address(seeds, &self.program_id).0
    }

    #[allow(clippy::too_many_arguments)]
    fn build_buy_instruction(
        &self,
        mint: &Pubkey,
        bonding_curve: &Pubkey,
        associated_curve: &Pubkey,
        user_ata: &Pubkey,
        owner: &Pubkey,
        creator: &Pubkey,
        lamports_in: u64,
        min_tokens_out: u64,
        token_program: TokenProgramVariant,
    ) -> Result<Instruction> {
        let creator_vault = self.pda(&[CREATOR_VAULT_SEED, creator.as_ref()]);
        let global_volume_accumulator = self.pda(&[GLOBAL_VOLUME_ACCUMULATOR_SEED]);
        let user_volume_accumulator = self.pda(&[USER_VOLUME_ACCUMULATOR_SEED, owner.as_ref()]);
        let token_program = token_program_id(token_program)?;

        let accounts = vec![
            AccountMeta::new_readonly(Pubkey::from_str(PUMPFUN_GLOBAL)?, false),
            AccountMeta::new(Pubkey::from_str(PUMPFUN_FEE_RECIPIENT)?, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new(*bonding_curve, false),
            AccountMeta::new(*associated_curve, false),
            AccountMeta::new(*user_ata, false),
            AccountMeta::new(*owner, true),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(token_program, false),
            AccountMeta::new(creator_vault, false),
            AccountMeta::new_readonly(Pubkey::from_str(PUMPFUN_EVENT_AUTHORITY)?, false),
            AccountMeta::new_readonly(self.program_id, false),
            AccountMeta::new(global_volume_accumulator, false),
            AccountMeta::new(user_volume_accumulator, false),
        ];

        Ok(Instruction { program_id: self.program_id, accounts, data: encode_swap_data(BUY_DISCRIMINATOR, lamports_in, min_tokens_out) })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_sell_instruction(
        &self,
        mint: &Pubkey,
        bonding_curve: &Pubkey,
        associated_curve: &Pubkey,
        user_ata: &Pubkey,
        owner: &Pubkey,
        creator: &Pubkey,
        tokens_in: u64,
        min_sol_out: u64,
        token_program: TokenProgramVariant,
    ) -> Result<Instruction> {
        let creator_vault = self.pda(&[CREATOR_VAULT_SEED, creator.as_ref()]);
        let token_program = token_program_id(token_program)?;

        // No volume-accumulator or fee-config accounts on sell; the
        // creator-vault account moves ahead of the token program, unlike buy.
        let accounts = vec![
            AccountMeta::new_readonly(Pubkey::from_str(PUMPFUN_GLOBAL)?, false),
            AccountMeta::new(Pubkey::from_str(PUMPFUN_FEE_RECIPIENT)?, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new(*bonding_curve, false),
            AccountMeta::new(*associated_curve, false),
            AccountMeta::new(*user_ata, false),
            AccountMeta::new(*owner, true),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new(creator_vault, false),
            AccountMeta::new_readonly(token_program, false),
            AccountMeta::new_readonly(Pubkey::from_str(PUMPFUN_EVENT_AUTHORITY)?, false),
            AccountMeta::new_readonly(self.program_id, false),
        ];

        Ok(Instruction { program_id: self.program_id, accounts, data: encode_swap_data(SELL_DISCRIMINATOR, tokens_in, min_sol_out) })
    }
}

/// `get_recent_prioritization_fees` and `set_compute_unit_price` both deal in
/// micro-lamports per compute unit; converts that rate to an actual lamport
/// fee for the compute budget actually requested, rounding up.
fn micro_lamports_to_lamports(micro_lamports_per_cu: u64, compute_units: u32) -> u64 {
    let total_micro_lamports = micro_lamports_per_cu as u128 * compute_units as u128;
    ((total_micro_lamports + 999_999) / 1_000_000) as u64
}

fn encode_swap_data(discriminator: u64, amount: u64, min_counter_amount: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(24);
    data.extend_from_slice(&discriminator.to_le_bytes());
    data.extend_from_slice(&amount.to_le_bytes());
    data.extend_from_slice(&min_counter_amount.to_le_bytes());
    data
}

async fn read_token_balance(client: &RpcClient, token_account: &Pubkey) -> Option<u64> {
    client.get_token_account_balance(token_account).await.ok().and_then(|b| b.amount.parse::<u64>().ok())
}

async fn read_both_balances(client: &RpcClient, owner: &Pubkey, token_account: &Pubkey, retries: u32) -> Option<(u64, u64)> {
    for attempt in 0..retries {
        if let (Ok(sol), Some(token)) = (client.get_balance(owner).await, read_token_balance(client, token_account).await) {
            return Some((sol, token));
        }
        if attempt + 1 < retries {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }
    }
    None
}

/// Fallback when a direct balance re-read fails: parse the confirmed
/// transaction's own `pre/postBalances` and `pre/postTokenBalances`
/// metadata, filtered down to the wallet's own entries.
async fn fallback_from_parsed_tx(client: &RpcClient, signature: &solana_sdk::signature::Signature, owner: &Pubkey) -> Option<(u64, u64)> {
    let config = solana_client::rpc_config::RpcTransactionConfig {
        encoding: Some(UiTransactionEncoding::JsonParsed),
        commitment: Some(CommitmentConfig::confirmed()),
        max_supported_transaction_version: Some(0),
    };
    let tx = client.get_transaction_with_config(signature, config).await.ok()?;
    let meta = tx.transaction.meta?;

    let owner_str = owner.to_string();
    let post_sol = match (&meta.pre_balances, &meta.post_balances) {
        (pre, post) if !pre.is_empty() && !post.is_empty() => post.first().copied(),
        _ => None,
    }?;

    let post_token = match &meta.post_token_balances {
        OptionSerializer::Some(balances) => balances
            .iter()
            .find(|b| matches!(&b.owner, OptionSerializer::Some(o) if o == &owner_str))
            .and_then(|b| b.ui_token_amount.amount.parse::<u64>().ok())
            .unwrap_or(0),
        _ => 0,
    };

    Some((post_sol, post_token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_data_is_24_bytes_discriminator_plus_two_u64s() {
        let data = encode_swap_data(BUY_DISCRIMINATOR, 1_000_000, 900_000);
        assert_eq!(data.len(), 24);
        assert_eq!(u64::from_le_bytes(data[0..8].try_into().unwrap()), BUY_DISCRIMINATOR);
        assert_eq!(u64::from_le_bytes(data[8..16].try_into().unwrap()), 1_000_000);
        assert_eq!(u64::from_le_bytes(data[16..24].try_into().unwrap()), 900_000);
    }

    #[test]
    fn buy_instruction_account_order_matches_protocol() {
        let pool = Arc::new(
            EndpointPool::new(vec!["https://example.com".to_string()], None, crate::config::CommitmentLevel::Confirmed, 3, std::time::Duration::from_secs(30), 5).unwrap(),
        );
        let wallet = Arc::new(Wallet::default());
        let fees = FeeConfig {
            use_dynamic_fee: false,
            priority_fee_percentile: 75,
            min_priority_fee_lamports: 1_000,
            max_priority_fee_lamports: 500_000,
            static_priority_fee_lamports: 10_000,
        };
        let layer = TransactionLayer::new(pool, wallet.clone(), fees).unwrap();

        let mint = Pubkey::new_unique();
        let bonding_curve = Pubkey::new_unique();
        let associated_curve = Pubkey::new_unique();
        let user_ata = Pubkey::new_unique();
        let creator = Pubkey::new_unique();

        let ix = layer
            .build_buy_instruction(&mint, &bonding_curve, &associated_curve, &user_ata, &wallet.pubkey(), &creator, 1_000_000, 900_000, TokenProgramVariant::Legacy)
            .unwrap();
        assert_eq!(ix.accounts.len(), 14);
        assert_eq!(ix.accounts[6].pubkey, wallet.pubkey());
        assert!(ix.accounts[6].is_signer);

        let sell_ix = layer
            .build_sell_instruction(&mint, &bonding_curve, &associated_curve, &user_ata, &wallet.pubkey(), &creator, 1_000_000, 900_000, TokenProgramVariant::Legacy)
            .unwrap();
        assert_eq!(sell_ix.accounts.len(), 12);
    }

    #[tokio::test]
    async fn zero_min_tokens_out_is_rejected_without_sending() {
        // quote_buy already refuses to produce a zero min_tokens_out; this
        // exercises the transaction layer's own guard for the same case,
        // which must reject before any RPC call is made.
        let pool = Arc::new(
            EndpointPool::new(vec!["https://example.com".to_string()], None, crate::config::CommitmentLevel::Confirmed, 3, std::time::Duration::from_secs(30), 5).unwrap(),
        );
        let wallet = Arc::new(Wallet::default());
        let fees = FeeConfig {
            use_dynamic_fee: false,
            priority_fee_percentile: 75,
            min_priority_fee_lamports: 1_000,
            max_priority_fee_lamports: 500_000,
            static_priority_fee_lamports: 10_000,
        };
        let layer = TransactionLayer::new(pool, wallet, fees).unwrap();

        let outcome = layer
            .buy(Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique(), 1_000_000, 0, TokenProgramVariant::Legacy)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("minTokensOut=0"));
    }
}
