//! Holds the trading keypair. Read-only after construction; shared via `Arc`
//! with the transaction layer and position monitor.

use anyhow::Result;
use solana_sdk::{pubkey::Pubkey, signature::Keypair, signer::Signer, transaction::Transaction};
use tracing::{debug, info, warn};

use crate::config::Config;

pub struct Wallet {
    keypair: Keypair,
    paper_trading: bool,
}

impl Wallet {
    pub fn from_config(config: &Config) -> Result<Self> {
        let keypair = Self::keypair_from_base58(&config.wallet_private_key)?;
        info!("wallet initialized: {}", keypair.pubkey());
        info!("paper trading: {}", config.paper_trading);
        Ok(Self {
            keypair,
            paper_trading: config.paper_trading,
        })
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn is_paper_trading(&self) -> bool {
        self.paper_trading
    }

    /// Signs with the trading keypair. A no-op under paper trading so the
    /// transaction layer can build and log a transaction without a live send.
    pub fn sign_transaction(&self, transaction: &mut Transaction) -> Result<()> {
        if self.paper_trading {
            debug!("paper trading: skipping transaction signing");
            return Ok(());
        }
        transaction.sign(&[&self.keypair], transaction.message.recent_blockhash);
        Ok(())
    }

    fn keypair_from_base58(private_key: &str) -> Result<Keypair> {
        let decoded = bs58::decode(private_key)
            .into_vec()
            .map_err(|e| anyhow::anyhow!("failed to decode base58 private key: {e}"))?;

        if decoded.len() != 64 {
            return Err(anyhow::anyhow!(
                "invalid private key length: expected 64 bytes, got {}",
                decoded.len()
            ));
        }

        Keypair::from_bytes(&decoded).map_err(|e| anyhow::anyhow!("failed to create keypair from bytes: {e}"))
    }
}

impl Default for Wallet {
    fn default() -> Self {
        let keypair = Keypair::new();
        warn!("using ephemeral test wallet: {}", keypair.pubkey());
        Self {
            keypair,
            paper_trading: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_from_base58_round_trips() {
        let original = Keypair::new();
        let encoded = bs58::encode(original.to_bytes()).into_string();
        let decoded = Wallet::keypair_from_base58(&encoded).unwrap();
        assert_eq!(original.pubkey(), decoded.pubkey());
    }

    #[test]
    fn rejects_wrong_length_keys() {
        let bad = bs58::encode([0u8; 32]).into_string();
        assert!(Wallet::keypair_from_base58(&bad).is_err());
    }

    #[test]
    fn default_wallet_is_paper_trading() {
        let wallet = Wallet::default();
        assert!(wallet.is_paper_trading());
    }
}
