//! Collaborator traits consumed by the rebalancing engine.
//!
//! All reads within one tick must be treated as a consistent snapshot by
//! callers; implementations are free to serve each call independently.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::error::LedgerError;
use crate::types::{
    ActivePrice, ContinuationToken, ObservedConfig, Operation, PoolSnapshot, SubmitReceipt,
    VaultData,
};

/// Vault state and valuation reads.
#[async_trait]
pub trait VaultReader: Send + Sync {
    /// Fetch the raw vault view. Fails with [`LedgerError::VaultNotActive`]
    /// when the vault is in liquidation.
    async fn vault(&self, vault_id: &str) -> Result<VaultData, LedgerError>;
}

/// Liquidity pool reads.
#[async_trait]
pub trait PoolReader: Send + Sync {
    /// Look up a pool by its pair symbol (either leg order).
    async fn pool_by_pair(&self, pair: &str) -> Result<Option<PoolSnapshot>, LedgerError>;
}

/// Oracle price reads.
#[async_trait]
pub trait PriceReader: Send + Sync {
    /// Current and next-block oracle prices for a token, if a feed exists.
    async fn active_price(&self, symbol: &str) -> Result<Option<ActivePrice>, LedgerError>;
}

/// Wallet balance reads.
#[async_trait]
pub trait BalanceReader: Send + Sync {
    /// Account balance for one token (pool-share tokens included).
    async fn token_balance(&self, symbol: &str) -> Result<Decimal, LedgerError>;

    /// All account balances keyed by symbol.
    async fn all_balances(&self) -> Result<BTreeMap<String, Decimal>, LedgerError>;

    /// Unspent native output balance (not yet account balance).
    async fn utxo_balance(&self) -> Result<Decimal, LedgerError>;
}

/// Block metadata reads.
#[async_trait]
pub trait BlockReader: Send + Sync {
    async fn block_height(&self) -> Result<u64, LedgerError>;

    /// Unix time of the chain tip.
    async fn block_time(&self) -> Result<i64, LedgerError>;

    /// Suspend until the chain advances past `from`, returning the new height.
    async fn wait_for_next_block(&self, from: u64) -> Result<u64, LedgerError>;
}

/// Transaction submission with continuation-token chaining.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Submit an operation, optionally spending the unconfirmed output of a
    /// prior submission. Returns a receipt whose token the next dependent
    /// operation may consume.
    async fn submit(
        &self,
        operation: Operation,
        token: Option<ContinuationToken>,
    ) -> Result<SubmitReceipt, LedgerError>;
}

/// Source of the most recently observed bot configuration.
#[async_trait]
pub trait ConfigurationSource: Send + Sync {
    /// The last configuration seen on the ledger, or `None` if the user has
    /// never published one.
    async fn current(&self) -> Result<Option<ObservedConfig>, LedgerError>;
}
