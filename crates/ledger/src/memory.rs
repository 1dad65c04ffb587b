//! In-memory ledger for tests and paper-trading runs.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::info;

use crate::error::LedgerError;
use crate::traits::{
    BalanceReader, BlockReader, ConfigurationSource, PoolReader, PriceReader,
    TransactionSubmitter, VaultReader,
};
use crate::types::{
    ActivePrice, ContinuationToken, ObservedConfig, Operation, PoolSnapshot, SubmitReceipt,
    VaultData,
};

/// A fully in-process ledger implementing every collaborator trait.
///
/// Submitted operations are recorded instead of broadcast; `wait_for_next_block`
/// advances the height immediately so chained action sets can run without a
/// real chain behind them.
#[derive(Default)]
pub struct MemoryLedger {
    vault: RwLock<Option<VaultData>>,
    pools: DashMap<String, PoolSnapshot>,
    prices: DashMap<String, ActivePrice>,
    balances: DashMap<String, Decimal>,
    utxo: RwLock<Decimal>,
    height: AtomicU64,
    time: AtomicI64,
    config: RwLock<Option<ObservedConfig>>,
    submitted: Mutex<Vec<(Operation, Option<ContinuationToken>)>>,
    seq: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_vault(&self, vault: VaultData) {
        *self.vault.write() = Some(vault);
    }

    pub fn set_pool(&self, pool: PoolSnapshot) {
        self.pools.insert(pool.pair.clone(), pool);
    }

    pub fn set_price(&self, symbol: impl Into<String>, price: ActivePrice) {
        self.prices.insert(symbol.into(), price);
    }

    pub fn set_balance(&self, symbol: impl Into<String>, amount: Decimal) {
        self.balances.insert(symbol.into(), amount);
    }

    pub fn set_utxo_balance(&self, amount: Decimal) {
        *self.utxo.write() = amount;
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn set_block_time(&self, time: i64) {
        self.time.store(time, Ordering::SeqCst);
    }

    pub fn set_config(&self, observed: ObservedConfig) {
        *self.config.write() = Some(observed);
    }

    /// Everything submitted so far, in order, with the token each submission
    /// consumed.
    pub fn submissions(&self) -> Vec<(Operation, Option<ContinuationToken>)> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl VaultReader for MemoryLedger {
    async fn vault(&self, vault_id: &str) -> Result<VaultData, LedgerError> {
        let guard = self.vault.read();
        let vault = guard
            .as_ref()
            .ok_or_else(|| LedgerError::VaultNotFound(vault_id.to_string()))?;
        if !vault.state.is_operable() {
            return Err(LedgerError::VaultNotActive {
                vault_id: vault_id.to_string(),
                state: vault.state,
            });
        }
        Ok(vault.clone())
    }
}

#[async_trait]
impl PoolReader for MemoryLedger {
    async fn pool_by_pair(&self, pair: &str) -> Result<Option<PoolSnapshot>, LedgerError> {
        if let Some(pool) = self.pools.get(pair) {
            return Ok(Some(pool.clone()));
        }
        // accept the reversed leg order as well
        let reversed: String = match pair.split_once('-') {
            Some((a, b)) => format!("{b}-{a}"),
            None => return Ok(None),
        };
        Ok(self.pools.get(&reversed).map(|p| p.clone()))
    }
}

#[async_trait]
impl PriceReader for MemoryLedger {
    async fn active_price(&self, symbol: &str) -> Result<Option<ActivePrice>, LedgerError> {
        Ok(self.prices.get(symbol).map(|p| p.clone()))
    }
}

#[async_trait]
impl BalanceReader for MemoryLedger {
    async fn token_balance(&self, symbol: &str) -> Result<Decimal, LedgerError> {
        Ok(self.balances.get(symbol).map(|b| *b).unwrap_or(Decimal::ZERO))
    }

    async fn all_balances(&self) -> Result<BTreeMap<String, Decimal>, LedgerError> {
        Ok(self
            .balances
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect())
    }

    async fn utxo_balance(&self) -> Result<Decimal, LedgerError> {
        Ok(*self.utxo.read())
    }
}

#[async_trait]
impl BlockReader for MemoryLedger {
    async fn block_height(&self) -> Result<u64, LedgerError> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn block_time(&self) -> Result<i64, LedgerError> {
        Ok(self.time.load(Ordering::SeqCst))
    }

    async fn wait_for_next_block(&self, from: u64) -> Result<u64, LedgerError> {
        // no chain to wait for; advance immediately
        let next = from + 1;
        self.height.fetch_max(next, Ordering::SeqCst);
        Ok(self.height.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl TransactionSubmitter for MemoryLedger {
    async fn submit(
        &self,
        operation: Operation,
        token: Option<ContinuationToken>,
    ) -> Result<SubmitReceipt, LedgerError> {
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        self.submitted.lock().push((operation, token));
        Ok(SubmitReceipt {
            txid: format!("memtx-{n}"),
            token: ContinuationToken::new(format!("memtx-{n}:0")),
        })
    }
}

#[async_trait]
impl ConfigurationSource for MemoryLedger {
    async fn current(&self) -> Result<Option<ObservedConfig>, LedgerError> {
        Ok(self.config.read().clone())
    }
}

/// Submitter that logs operations instead of broadcasting them.
///
/// Used when the process runs without key custody: sizing and rule decisions
/// execute for real, transactions do not leave the process.
#[derive(Default)]
pub struct DryRunSubmitter {
    seq: AtomicU64,
}

impl DryRunSubmitter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionSubmitter for DryRunSubmitter {
    async fn submit(
        &self,
        operation: Operation,
        token: Option<ContinuationToken>,
    ) -> Result<SubmitReceipt, LedgerError> {
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        info!(
            kind = operation.kind(),
            chained = token.is_some(),
            payload = %serde_json::to_string(&operation).unwrap_or_default(),
            "dry-run: operation not broadcast"
        );
        Ok(SubmitReceipt {
            txid: format!("dryrun-{n}"),
            token: ContinuationToken::new(format!("dryrun-{n}:0")),
        })
    }
}

/// Configuration source backed by a fixed, in-process value.
#[derive(Default)]
pub struct StaticConfigSource {
    observed: RwLock<Option<ObservedConfig>>,
}

impl StaticConfigSource {
    pub fn new(observed: ObservedConfig) -> Self {
        Self { observed: RwLock::new(Some(observed)) }
    }

    pub fn replace(&self, observed: ObservedConfig) {
        *self.observed.write() = Some(observed);
    }
}

#[async_trait]
impl ConfigurationSource for StaticConfigSource {
    async fn current(&self) -> Result<Option<ObservedConfig>, LedgerError> {
        Ok(self.observed.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TokenQuantity, VaultState};
    use rust_decimal_macros::dec;
    use smallvec::smallvec;

    fn sample_vault() -> VaultData {
        VaultData {
            vault_id: "v1".to_string(),
            state: VaultState::Active,
            collateral_amounts: smallvec![],
            loan_amounts: smallvec![],
            interest_amounts: smallvec![],
            collateral_value: dec!(1000),
            loan_value: dec!(400),
            informative_ratio: dec!(250),
            scheme_min_ratio: dec!(150),
        }
    }

    #[tokio::test]
    async fn vault_read_rejects_liquidated_state() {
        let ledger = MemoryLedger::new();
        let mut vault = sample_vault();
        vault.state = VaultState::InLiquidation;
        ledger.set_vault(vault);

        let err = ledger.vault("v1").await.unwrap_err();
        assert!(matches!(err, LedgerError::VaultNotActive { .. }));
    }

    #[tokio::test]
    async fn submissions_record_order_and_tokens() {
        let ledger = MemoryLedger::new();
        let op = Operation::TakeLoan {
            vault_id: "v1".to_string(),
            amounts: vec![TokenQuantity::new("DUSD", dec!(10))],
        };
        let first = ledger.submit(op.clone(), None).await.unwrap();
        let second = ledger
            .submit(op.clone(), Some(first.token.clone()))
            .await
            .unwrap();
        assert_ne!(first.token, second.token);

        let log = ledger.submissions();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].1, None);
        assert_eq!(log[1].1, Some(first.token));
    }

    #[tokio::test]
    async fn pool_lookup_accepts_reversed_pair() {
        use crate::types::{PoolLeg, PriceRatio};
        let ledger = MemoryLedger::new();
        ledger.set_pool(PoolSnapshot {
            pair: "TSLA-DUSD".to_string(),
            asset: PoolLeg { id: "1".into(), symbol: "TSLA".into(), reserve: dec!(10) },
            stable: PoolLeg { id: "2".into(), symbol: "DUSD".into(), reserve: dec!(100) },
            price: PriceRatio::from_asset_per_stable(dec!(0.1)),
            total_shares: dec!(30),
        });
        assert!(ledger.pool_by_pair("DUSD-TSLA").await.unwrap().is_some());
        assert!(ledger.pool_by_pair("BTC-DUSD").await.unwrap().is_none());
    }
}
