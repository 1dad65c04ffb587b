//! Ledger access layer for the vault rebalancer.
//!
//! This crate defines the narrow collaborator interfaces the rebalancing
//! engine consumes:
//! - Read traits for vaults, liquidity pools, oracle prices, wallet
//!   balances and block metadata
//! - Transaction submission with continuation-token chaining
//! - Observed bot configuration
//!
//! Two implementations ship with the crate: an HTTP client for Ocean-style
//! REST endpoints (read-only) and an in-memory ledger used by tests and the
//! dry-run submitter.

mod error;
mod memory;
mod ocean;
mod traits;
mod types;

pub use error::LedgerError;
pub use memory::{DryRunSubmitter, MemoryLedger, StaticConfigSource};
pub use ocean::OceanClient;
pub use traits::{
    BalanceReader, BlockReader, ConfigurationSource, PoolReader, PriceReader,
    TransactionSubmitter, VaultReader,
};
pub use types::{
    ActivePrice, CompoundingMessage, ConfigMessage, ContinuationToken, LiquidityLeg,
    ObservedConfig, Operation, PoolLeg, PoolShareQuantity, PoolSnapshot, PriceRatio,
    RatioRulesMessage, SubmitReceipt, TokenAmount, TokenQuantity, VaultData, VaultState,
};
