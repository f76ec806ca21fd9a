//! Subscribes to program-log notifications for the pump.fun program and turns
//! `Create` events into [`DetectedToken`]s, deduplicated by signature.

use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use parking_lot::Mutex;
use solana_pubsub_client::pubsub_client::PubsubClient;
use solana_rpc_client_api::config::{RpcTransactionLogsConfig, RpcTransactionLogsFilter};
use solana_sdk::pubkey::Pubkey;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{UiMessage, UiTransactionEncoding};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::constants::{now_ms, PUMPFUN_PROGRAM_ID, TOKEN_2022_PROGRAM_ID};
use crate::endpoint_pool::{EndpointError, EndpointPool};
use crate::mint_cache::{DetectionSource, MintCache};

const DEDUP_CAPACITY: usize = 10_000;
const DEDUP_EVICT_FRACTION: usize = 5; // evict the oldest 1/5th (20%) on overflow
const CREATE_LOG_MARKER: &str = "Instruction: Create";

/// FIFO signature set bounded at `DEDUP_CAPACITY`; evicts the oldest 20% once
/// full rather than one-in-one-out, so a burst of new signatures doesn't
/// thrash eviction on every insert.
struct SignatureDedup {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl SignatureDedup {
    fn new() -> Self {
        Self { order: VecDeque::with_capacity(DEDUP_CAPACITY), seen: HashSet::with_capacity(DEDUP_CAPACITY) }
    }

    fn contains(&self, signature: &str) -> bool {
        self.seen.contains(signature)
    }

    fn insert(&mut self, signature: String) {
        if self.seen.contains(&signature) {
            return;
        }
        if self.order.len() >= DEDUP_CAPACITY {
            let evict_count = DEDUP_CAPACITY / DEDUP_EVICT_FRACTION;
            for _ in 0..evict_count {
                if let Some(old) = self.order.pop_front() {
                    self.seen.remove(&old);
                } else {
                    break;
                }
            }
        }
        self.seen.insert(signature.clone());
        self.order.push_back(signature);
    }

    fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

/// Which SPL token program mints the detected token. Pump.fun supports both
/// legacy SPL Token and Token-2022 (Token Extensions) mints; Token-2022
/// mints may carry a transfer fee extension that `bonding_curve::quote_buy`/
/// `quote_sell` must account for and that the transaction layer must use the
/// correct program id to build instructions against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenProgramVariant {
    Legacy,
    Token2022,
}

#[derive(Debug, Clone)]
pub struct DetectedToken {
    pub mint: Pubkey,
    pub bonding_curve: Pubkey,
    pub associated_curve: Pubkey,
    pub creator: Pubkey,
    pub token_program: TokenProgramVariant,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub uri: Option<String>,
    pub signature: String,
    pub detected_at_ms: u64,
}

pub struct Listener {
    endpoint_pool: Arc<EndpointPool>,
    mint_cache: Arc<MintCache>,
    program_id: Pubkey,
    dedup: Mutex<SignatureDedup>,
}

impl Listener {
    pub fn new(endpoint_pool: Arc<EndpointPool>, mint_cache: Arc<MintCache>) -> Result<Self> {
        let program_id = Pubkey::from_str(PUMPFUN_PROGRAM_ID).context("invalid pump.fun program id constant")?;
        Ok(Self { endpoint_pool, mint_cache, program_id, dedup: Mutex::new(SignatureDedup::new()) })
    }

    /// Runs until `shutdown` is observed true. Resubscribes (and clears the
    /// dedup set) on any subscription-level failure.
    pub async fn run(self: Arc<Self>, shutdown: Arc<AtomicBool>, out: mpsc::UnboundedSender<DetectedToken>) -> Result<()> {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }

            match self.clone().run_once(&shutdown, &out).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if shutdown.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    warn!("listener subscription failed, restarting: {err}");
                    self.dedup.lock().clear();
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }

    async fn run_once(self: Arc<Self>, shutdown: &Arc<AtomicBool>, out: &mpsc::UnboundedSender<DetectedToken>) -> Result<()> {
        let ws_url = self.endpoint_pool.websocket_url().ok_or_else(|| anyhow!("no websocket URL configured"))?.to_string();
        let program_id_str = self.program_id.to_string();
        let commitment = self.endpoint_pool.commitment().to_commitment_config();

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<solana_rpc_client_api::response::RpcLogsResponse>();

        // PubsubClient::logs_subscribe blocks the calling thread for its
        // lifetime; run it on a dedicated OS thread and bridge messages over.
        let subscribe_result: Arc<Mutex<Option<Result<()>>>> = Arc::new(Mutex::new(None));
        let subscribe_result_clone = subscribe_result.clone();
        let join = std::thread::spawn(move || {
            let subscription = PubsubClient::logs_subscribe(
                &ws_url,
                RpcTransactionLogsFilter::Mentions(vec![program_id_str]),
                RpcTransactionLogsConfig { commitment: Some(commitment) },
            );

            let (_subscription_handle, receiver) = match subscription {
                Ok(pair) => pair,
                Err(err) => {
                    *subscribe_result_clone.lock() = Some(Err(anyhow!("logs_subscribe failed: {err}")));
                    return;
                }
            };

            while let Ok(update) = receiver.recv() {
                if raw_tx.send(update.value).is_err() {
                    break;
                }
            }
            *subscribe_result_clone.lock() = Some(Ok(()));
        });

        info!("listener subscribed to pump.fun program logs");

        while let Some(log_response) = raw_rx.recv().await {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            let listener = self.clone();
            let out = out.clone();
            tokio::spawn(async move {
                listener.handle_log(log_response, out).await;
            });
        }

        let _ = join.join();
        let result = match subscribe_result.lock().take() {
            Some(result) => result,
            None => Ok(()),
        };
        result
    }

    async fn handle_log(self: Arc<Self>, log: solana_rpc_client_api::response::RpcLogsResponse, out: mpsc::UnboundedSender<DetectedToken>) {
        if log.err.is_some() {
            return;
        }

        {
            let mut dedup = self.dedup.lock();
            if dedup.contains(&log.signature) {
                return;
            }
            dedup.insert(log.signature.clone());
        }

        if !log.logs.iter().any(|line| line.contains(CREATE_LOG_MARKER)) {
            return;
        }

        match self.process_create(&log.signature, &log.logs).await {
            Ok(Some(token)) => {
                self.mint_cache.add(&token.mint.to_string(), DetectionSource::PrimaryFeed, Some(token.signature.clone()));
                if out.send(token).is_err() {
                    debug!("detected-token channel closed, dropping event");
                }
            }
            Ok(None) => debug!("signature {} carried a Create marker but no token could be extracted", log.signature),
            Err(err) => debug!("failed to process create for {}: {err}", log.signature),
        }
    }

    async fn process_create(&self, signature: &str, logs: &[String]) -> Result<Option<DetectedToken>> {
        let tx = self.fetch_transaction_with_retry(signature).await?;
        let Some(tx) = tx else {
            return Ok(None);
        };

        let accounts = extract_create_accounts(&tx)?;
        let Some(accounts) = accounts else {
            return Ok(None);
        };

        let (name, symbol, uri) = harvest_metadata(logs);

        Ok(Some(DetectedToken {
            mint: accounts.mint,
            bonding_curve: accounts.bonding_curve,
            associated_curve: accounts.associated_curve,
            creator: accounts.creator,
            token_program: accounts.token_program,
            name,
            symbol,
            uri,
            signature: signature.to_string(),
            detected_at_ms: now_ms(),
        }))
    }

    async fn fetch_transaction_with_retry(
        &self,
        signature: &str,
    ) -> Result<Option<solana_transaction_status::EncodedConfirmedTransactionWithStatusMeta>> {
        let sig = solana_sdk::signature::Signature::from_str(signature).context("invalid signature")?;
        let result = self
            .endpoint_pool
            .execute_with_retry("listener.get_transaction", || async {
                let client = solana_rpc_client::nonblocking::rpc_client::RpcClient::new(self.endpoint_pool.current());
                let config = solana_client::rpc_config::RpcTransactionConfig {
                    encoding: Some(UiTransactionEncoding::JsonParsed),
                    commitment: Some(self.endpoint_pool.commitment().to_commitment_config()),
                    max_supported_transaction_version: Some(0),
                };
                client.get_transaction_with_config(&sig, config).await.map_err(|err| {
                    let message = err.to_string();
                    if message.contains("429") {
                        EndpointError::RateLimited(message)
                    } else {
                        EndpointError::Other(message)
                    }
                })
            })
            .await;

        match result {
            Ok(tx) => Ok(Some(tx)),
            Err(message) => {
                warn!("giving up fetching transaction {signature} after retries exhausted: {message}");
                Ok(None)
            }
        }
    }
}

struct CreateAccounts {
    mint: Pubkey,
    bonding_curve: Pubkey,
    associated_curve: Pubkey,
    creator: Pubkey,
    token_program: TokenProgramVariant,
}

/// Pump.fun's `create` instruction account ordinals, from the published IDL:
/// 0=mint, 2=bonding_curve, 3=associated_bonding_curve, 7=user (creator),
/// 9=token_program.
const CREATE_ACCOUNT_MINT_IDX: usize = 0;
const CREATE_ACCOUNT_BONDING_CURVE_IDX: usize = 2;
const CREATE_ACCOUNT_ASSOCIATED_CURVE_IDX: usize = 3;
const CREATE_ACCOUNT_CREATOR_IDX: usize = 7;
const CREATE_ACCOUNT_TOKEN_PROGRAM_IDX: usize = 9;

fn extract_create_accounts(
    tx: &solana_transaction_status::EncodedConfirmedTransactionWithStatusMeta,
) -> Result<Option<CreateAccounts>> {
    let program_id = PUMPFUN_PROGRAM_ID;

    if let solana_transaction_status::EncodedTransaction::Json(ui_tx) = &tx.transaction.transaction {
        if let UiMessage::Parsed(message) = &ui_tx.message {
            for instruction in &message.instructions {
                if let solana_transaction_status::UiInstruction::Compiled(compiled) = instruction {
                    let program_key = message.account_keys.get(compiled.program_id_index as usize);
                    if program_key.map(|k| k.pubkey.as_str()) != Some(program_id) {
                        continue;
                    }
                    if let Some(accounts) = accounts_from_indices(&message.account_keys, &compiled.accounts) {
                        return Ok(Some(accounts));
                    }
                }
            }

            // Fall back to inner instructions.
            let inner_groups = tx.transaction.meta.as_ref().and_then(|m| match &m.inner_instructions {
                OptionSerializer::Some(groups) => Some(groups),
                _ => None,
            });
            if let Some(inner_groups) = inner_groups {
                for group in inner_groups {
                    for instruction in &group.instructions {
                        if let solana_transaction_status::UiInstruction::Compiled(compiled) = instruction {
                            let program_key = message.account_keys.get(compiled.program_id_index as usize);
                            if program_key.map(|k| k.pubkey.as_str()) != Some(program_id) {
                                continue;
                            }
                            if let Some(accounts) = accounts_from_indices(&message.account_keys, &compiled.accounts) {
                                return Ok(Some(accounts));
                            }
                        }
                    }
                }
            }
        }
    }

    // Last resort: derive the mint from the first new postTokenBalances entry
    // and recompute the bonding-curve PDA from it.
    if let Some(meta) = &tx.transaction.meta {
        if let OptionSerializer::Some(post_balances) = &meta.post_token_balances {
            if let Some(balance) = post_balances.first() {
                let mint = Pubkey::from_str(&balance.mint).context("invalid mint in postTokenBalances")?;
                let bonding_curve = crate::bonding_curve::bonding_curve_pda(&mint)?;
                let associated_curve = spl_associated_token_account::get_associated_token_address(&bonding_curve, &mint);
                let creator = match &balance.owner {
                    OptionSerializer::Some(owner) => Pubkey::from_str(owner).ok(),
                    _ => None,
                }
                .unwrap_or_default();
                // postTokenBalances doesn't carry the owning token program directly,
                // but it does report which one minted the balance.
                let token_program = match &balance.program_id {
                    OptionSerializer::Some(program_id) if program_id == TOKEN_2022_PROGRAM_ID => {
                        TokenProgramVariant::Token2022
                    }
                    _ => TokenProgramVariant::Legacy,
                };
                return Ok(Some(CreateAccounts { mint, bonding_curve, associated_curve, creator, token_program }));
            }
        }
    }

    Ok(None)
}

fn accounts_from_indices(
    account_keys: &[solana_transaction_status::parse_accounts::ParsedAccount],
    indices: &[u8],
) -> Option<CreateAccounts> {
    let key_at = |ordinal: usize| -> Option<Pubkey> {
        let idx = *indices.get(ordinal)? as usize;
        account_keys.get(idx).and_then(|a| Pubkey::from_str(&a.pubkey).ok())
    };

    let token_program = match key_at(CREATE_ACCOUNT_TOKEN_PROGRAM_IDX) {
        Some(key) if key.to_string() == TOKEN_2022_PROGRAM_ID => TokenProgramVariant::Token2022,
        _ => TokenProgramVariant::Legacy,
    };

    Some(CreateAccounts {
        mint: key_at(CREATE_ACCOUNT_MINT_IDX)?,
        bonding_curve: key_at(CREATE_ACCOUNT_BONDING_CURVE_IDX)?,
        associated_curve: key_at(CREATE_ACCOUNT_ASSOCIATED_CURVE_IDX)?,
        creator: key_at(CREATE_ACCOUNT_CREATOR_IDX).unwrap_or_default(),
        token_program,
    })
}

/// Pulls name/symbol/URI out of the `Create` event's base64-encoded "Program
/// data:" log line. Anchor events are `[8-byte discriminator][borsh fields]`;
/// the `Create` event's first three fields are length-prefixed UTF-8 strings
/// in `name, symbol, uri` order. Falls back to scanning for a bare quoted
/// URL if the borsh layout doesn't decode cleanly, rather than pulling in a
/// regex engine.
fn harvest_metadata(logs: &[String]) -> (Option<String>, Option<String>, Option<String>) {
    for line in logs {
        let Some(encoded) = line.strip_prefix("Program data: ") else { continue };
        let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else { continue };

        if let Some(fields) = decode_create_event_strings(&decoded) {
            return fields;
        }

        if let Ok(text) = String::from_utf8(decoded) {
            let printable: String = text.chars().filter(|c| c.is_ascii_graphic() || c.is_ascii_whitespace()).collect();
            if let Some(uri) = printable.split_whitespace().find(|t| t.starts_with("http")) {
                return (None, None, Some(uri.to_string()));
            }
        }
    }
    (None, None, None)
}

fn read_len_prefixed_string(data: &[u8], offset: &mut usize) -> Option<String> {
    if *offset + 4 > data.len() {
        return None;
    }
    let len = u32::from_le_bytes(data[*offset..*offset + 4].try_into().ok()?) as usize;
    *offset += 4;
    if *offset + len > data.len() || len > 256 {
        return None;
    }
    let s = String::from_utf8(data[*offset..*offset + len].to_vec()).ok()?;
    *offset += len;
    Some(s)
}

fn decode_create_event_strings(data: &[u8]) -> Option<(Option<String>, Option<String>, Option<String>)> {
    if data.len() < 8 {
        return None;
    }
    let mut offset = 8;
    let name = read_len_prefixed_string(data, &mut offset)?;
    let symbol = read_len_prefixed_string(data, &mut offset)?;
    let uri = read_len_prefixed_string(data, &mut offset)?;
    if name.is_empty() && symbol.is_empty() && uri.is_empty() {
        return None;
    }
    Some((Some(name), Some(symbol), Some(uri)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_rejects_repeat_signatures() {
        let mut dedup = SignatureDedup::new();
        dedup.insert("sig1".to_string());
        assert!(dedup.contains("sig1"));
        dedup.insert("sig1".to_string());
        assert_eq!(dedup.order.len(), 1);
    }

    #[test]
    fn dedup_evicts_oldest_twenty_percent_on_overflow() {
        let mut dedup = SignatureDedup::new();
        for i in 0..DEDUP_CAPACITY {
            dedup.insert(format!("sig{i}"));
        }
        assert_eq!(dedup.order.len(), DEDUP_CAPACITY);

        dedup.insert("overflow".to_string());
        let expected_evicted = DEDUP_CAPACITY / DEDUP_EVICT_FRACTION;
        assert_eq!(dedup.order.len(), DEDUP_CAPACITY - expected_evicted + 1);
        assert!(!dedup.contains("sig0"));
        assert!(dedup.contains("overflow"));
    }

    #[test]
    fn clear_resets_dedup_state() {
        let mut dedup = SignatureDedup::new();
        dedup.insert("sig1".to_string());
        dedup.clear();
        assert!(!dedup.contains("sig1"));
    }

    fn encode_create_event(name: &str, symbol: &str, uri: &str) -> Vec<u8> {
        let mut bytes = vec![0u8; 8]; // discriminator, contents irrelevant here
        for field in [name, symbol, uri] {
            bytes.extend_from_slice(&(field.len() as u32).to_le_bytes());
            bytes.extend_from_slice(field.as_bytes());
        }
        bytes
    }

    #[test]
    fn harvest_metadata_decodes_borsh_encoded_create_event() {
        let event = encode_create_event("TokenName", "TKN", "https://example.com/metadata.json");
        let encoded = base64::engine::general_purpose::STANDARD.encode(event);
        let logs = vec![format!("Program data: {encoded}")];
        let (name, symbol, uri) = harvest_metadata(&logs);
        assert_eq!(name.as_deref(), Some("TokenName"));
        assert_eq!(symbol.as_deref(), Some("TKN"));
        assert_eq!(uri.as_deref(), Some("https://example.com/metadata.json"));
    }

    #[test]
    fn harvest_metadata_falls_back_to_plain_uri_scan() {
        let payload = "garbage prefix https://example.com/metadata.json";
        let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
        let logs = vec![format!("Program data: {encoded}")];
        let (_name, _symbol, uri) = harvest_metadata(&logs);
        assert_eq!(uri.as_deref(), Some("https://example.com/metadata.json"));
    }

    #[test]
    fn harvest_metadata_returns_none_without_program_data() {
        let logs = vec!["Program log: Instruction: Create".to_string()];
        assert_eq!(harvest_metadata(&logs), (None, None, None));
    }
}
