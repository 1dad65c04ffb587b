//! Advisory safety evaluator.
//!
//! Before any rule runs in a cycle, this checks that repaying back to a
//! comfortable ratio is actually reachable with what the wallet holds.
//! Policy: violations are reported, never enforced. The caller stays
//! available and keeps executing rules (fail open); the check is telemetry
//! about reachable safety, not an execution guard.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use rebalancer_ledger::BalanceReader;

use crate::constants::{SAFETY_RATIO_MARGIN, STABLE_SYMBOL};
use crate::sizing::{AllocationWeights, Sizer, SizingError};
use crate::vault::VaultSnapshot;

#[derive(Debug, thiserror::Error)]
pub enum SafetyViolation {
    #[error("wallet holds {held} {pair} shares, repaying to safety needs {required}")]
    InsufficientBalance {
        pair: String,
        required: Decimal,
        held: Decimal,
    },

    #[error("withdrawing for {token} would repay {expected}, only {loan} is owed")]
    Overpayment {
        token: String,
        expected: Decimal,
        loan: Decimal,
    },

    #[error(transparent)]
    Sizing(#[from] SizingError),
}

/// How the safety check passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyOutcome {
    /// Both current and projected ratios already exceed the safety target.
    AboveTarget,
    /// The safety target is reachable by repaying with held balances.
    Reachable,
}

pub struct SafetyEvaluator {
    sizer: Sizer,
    balances: Arc<dyn BalanceReader>,
}

impl SafetyEvaluator {
    pub fn new(sizer: Sizer, balances: Arc<dyn BalanceReader>) -> Self {
        Self { sizer, balances }
    }

    /// Dry-run a repay to `scheme minimum + margin` and verify the wallet
    /// could execute it without overpaying any loan.
    pub async fn check(
        &self,
        weights: &AllocationWeights,
        vault: &VaultSnapshot,
    ) -> Result<SafetyOutcome, SafetyViolation> {
        let target = vault.scheme_min_ratio() + SAFETY_RATIO_MARGIN;
        if vault.current_ratio() > target && vault.next_ratio() > target {
            debug!(%target, "ratios above safety target");
            return Ok(SafetyOutcome::AboveTarget);
        }

        let withdrawals = self.sizer.repay_requirements(target, weights, vault).await?;
        for withdrawal in &withdrawals {
            let held = self
                .balances
                .token_balance(&withdrawal.pair)
                .await
                .map_err(SizingError::from)?;
            if withdrawal.share_amount > held {
                return Err(SafetyViolation::InsufficientBalance {
                    pair: withdrawal.pair.clone(),
                    required: withdrawal.share_amount,
                    held,
                });
            }
        }

        let payback = self.sizer.expected_payback(&withdrawals, vault).await?;
        for quantity in &payback.token_amounts {
            let loan = vault
                .loan_amount(&quantity.symbol)
                .map(|t| t.amount)
                .unwrap_or_default();
            if quantity.amount > loan {
                return Err(SafetyViolation::Overpayment {
                    token: quantity.symbol.clone(),
                    expected: quantity.amount,
                    loan,
                });
            }
        }
        // sum-check across all stable-denominated repayments
        let stable_loan = vault
            .loan_amount(STABLE_SYMBOL)
            .map(|t| t.amount)
            .unwrap_or_default();
        if payback.stable_amount > stable_loan {
            return Err(SafetyViolation::Overpayment {
                token: STABLE_SYMBOL.to_string(),
                expected: payback.stable_amount,
                loan: stable_loan,
            });
        }

        Ok(SafetyOutcome::Reachable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sizing::pair_symbol;
    use rebalancer_ledger::{
        ActivePrice, MemoryLedger, PoolLeg, PoolSnapshot, PriceRatio, TokenAmount, VaultData,
        VaultState,
    };
    use rust_decimal_macros::dec;
    use smallvec::smallvec;
    use std::collections::BTreeMap;

    fn weights() -> AllocationWeights {
        AllocationWeights::new(BTreeMap::from([("TSLA".to_string(), dec!(100))])).unwrap()
    }

    fn ledger() -> Arc<MemoryLedger> {
        let ledger = MemoryLedger::new();
        ledger.set_pool(PoolSnapshot {
            pair: pair_symbol("TSLA"),
            asset: PoolLeg { id: "1".to_string(), symbol: "TSLA".to_string(), reserve: dec!(100) },
            stable: PoolLeg {
                id: "2".to_string(),
                symbol: STABLE_SYMBOL.to_string(),
                reserve: dec!(1000),
            },
            price: PriceRatio::from_asset_per_stable(dec!(0.1)),
            total_shares: dec!(300),
        });
        ledger.set_price("TSLA", ActivePrice { active: Some(dec!(10)), next: Some(dec!(10)) });
        Arc::new(ledger)
    }

    fn vault(collateral_value: Decimal, loan_value: Decimal) -> VaultSnapshot {
        VaultSnapshot::new(
            VaultData {
                vault_id: "v1".to_string(),
                state: VaultState::Active,
                collateral_amounts: smallvec![TokenAmount::new("DFI", collateral_value)
                    .with_price(ActivePrice {
                        active: Some(Decimal::ONE),
                        next: Some(Decimal::ONE)
                    })],
                loan_amounts: smallvec![
                    TokenAmount::new("TSLA", dec!(100)),
                    TokenAmount::new(STABLE_SYMBOL, loan_value),
                ],
                interest_amounts: smallvec![],
                collateral_value,
                loan_value,
                informative_ratio: collateral_value / loan_value * dec!(100),
                scheme_min_ratio: dec!(150),
            },
            1,
        )
    }

    fn evaluator(ledger: Arc<MemoryLedger>) -> SafetyEvaluator {
        let sizer = Sizer::new(ledger.clone(), ledger.clone(), ledger.clone());
        SafetyEvaluator::new(sizer, ledger)
    }

    #[tokio::test]
    async fn passes_trivially_above_target() {
        // scheme 150 + margin 100 = 250; ratio 400 clears it
        let outcome = evaluator(ledger())
            .check(&weights(), &vault(dec!(2000), dec!(500)))
            .await
            .unwrap();
        assert_eq!(outcome, SafetyOutcome::AboveTarget);
    }

    #[tokio::test]
    async fn reachable_with_held_shares() {
        let ledger = ledger();
        ledger.set_balance(pair_symbol("TSLA"), dec!(100));
        // ratio 200 below target 250: must size the repay
        let outcome = evaluator(ledger)
            .check(&weights(), &vault(dec!(1000), dec!(500)))
            .await
            .unwrap();
        assert_eq!(outcome, SafetyOutcome::Reachable);
    }

    #[tokio::test]
    async fn sizing_failure_surfaces_as_violation() {
        // drop the oracle so repay sizing fails
        let ledger = Arc::new(MemoryLedger::new());
        let err = evaluator(ledger)
            .check(&weights(), &vault(dec!(1000), dec!(500)))
            .await
            .unwrap_err();
        assert!(matches!(err, SafetyViolation::Sizing(_)));
    }
}
