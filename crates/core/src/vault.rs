//! Read-only valuation view over raw vault data.
//!
//! The ledger reports totals and a ratio for the current block; everything
//! about the next block (projected values, projected ratio) and the derived
//! READY/EMPTY states is computed here.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use rebalancer_ledger::{TokenAmount, VaultData, VaultState};

use crate::constants::{
    RATIO_UNDEFINED, STABLE_COLLATERAL_VALUE_EARLY, STABLE_COLLATERAL_VALUE_LATE,
    STABLE_REPRICE_HEIGHT, STABLE_SYMBOL,
};
use crate::math::floor_sized;

/// Immutable per-fetch vault view.
///
/// Pinned to the block height it was taken at, because the stable asset's
/// fallback collateral price is height-dependent.
#[derive(Debug, Clone)]
pub struct VaultSnapshot {
    data: VaultData,
    block_height: u64,
}

impl VaultSnapshot {
    pub fn new(data: VaultData, block_height: u64) -> Self {
        Self { data, block_height }
    }

    pub fn vault_id(&self) -> &str {
        &self.data.vault_id
    }

    pub fn block_height(&self) -> u64 {
        self.block_height
    }

    /// Vault state with the READY/EMPTY refinements applied.
    ///
    /// The ledger reports ACTIVE with a `-1` ratio both for a vault holding
    /// no collateral and for one holding no loans; the collateral value
    /// disambiguates.
    pub fn state(&self) -> VaultState {
        if self.data.state == VaultState::Active && self.data.informative_ratio == RATIO_UNDEFINED {
            if floor_sized(self.data.collateral_value).is_zero() {
                return VaultState::Empty;
            }
            return VaultState::Ready;
        }
        self.data.state
    }

    /// Collateral ratio in percent. Only meaningful when [`Self::state`] is
    /// neither READY nor EMPTY.
    pub fn current_ratio(&self) -> Decimal {
        self.data.informative_ratio
    }

    pub fn collateral_value(&self) -> Decimal {
        self.data.collateral_value
    }

    pub fn loan_value(&self) -> Decimal {
        self.data.loan_value
    }

    pub fn scheme_min_ratio(&self) -> Decimal {
        self.data.scheme_min_ratio
    }

    pub fn collateral_amounts(&self) -> &[TokenAmount] {
        &self.data.collateral_amounts
    }

    pub fn collateral_amount(&self, symbol: &str) -> Option<&TokenAmount> {
        self.data.collateral_amounts.iter().find(|t| t.symbol == symbol)
    }

    pub fn loan_amount(&self, symbol: &str) -> Option<&TokenAmount> {
        self.data.loan_amounts.iter().find(|t| t.symbol == symbol)
    }

    pub fn loan_amounts(&self) -> &[TokenAmount] {
        &self.data.loan_amounts
    }

    /// Accrued interest for one loan token. Negative for loans with a
    /// negative interest rate.
    pub fn interest_amount(&self, symbol: &str) -> Option<&TokenAmount> {
        self.data.interest_amounts.iter().find(|t| t.symbol == symbol)
    }

    fn stable_collateral_fallback(&self) -> Decimal {
        if self.block_height < STABLE_REPRICE_HEIGHT {
            STABLE_COLLATERAL_VALUE_EARLY
        } else {
            STABLE_COLLATERAL_VALUE_LATE
        }
    }

    /// Collateral value at the projected next-block oracle prices.
    ///
    /// The stable asset has no oracle feed as collateral and falls back to
    /// its height-dependent protocol price; any other asset without a
    /// projection contributes nothing.
    pub fn next_collateral_value(&self) -> Decimal {
        self.data
            .collateral_amounts
            .iter()
            .map(|c| {
                let price = c
                    .active_price
                    .as_ref()
                    .and_then(|p| p.next)
                    .unwrap_or_else(|| {
                        if c.symbol == STABLE_SYMBOL {
                            self.stable_collateral_fallback()
                        } else {
                            Decimal::ZERO
                        }
                    });
                c.amount * price
            })
            .sum()
    }

    /// Loan value at the projected next-block oracle prices. The stable
    /// asset's debt is always valued at par.
    pub fn next_loan_value(&self) -> Decimal {
        self.data
            .loan_amounts
            .iter()
            .map(|l| {
                let price = l
                    .active_price
                    .as_ref()
                    .and_then(|p| p.next)
                    .unwrap_or_else(|| {
                        if l.symbol == STABLE_SYMBOL {
                            Decimal::ONE
                        } else {
                            Decimal::ZERO
                        }
                    });
                l.amount * price
            })
            .sum()
    }

    /// Projected next-block collateral ratio in percent, or the undefined
    /// sentinel when the projected loan value is zero.
    pub fn next_ratio(&self) -> Decimal {
        let next_loan = self.next_loan_value();
        if next_loan.is_zero() {
            return RATIO_UNDEFINED;
        }
        self.next_collateral_value() / next_loan * dec!(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebalancer_ledger::ActivePrice;
    use smallvec::smallvec;

    fn amount(symbol: &str, qty: Decimal, next: Option<Decimal>) -> TokenAmount {
        let mut t = TokenAmount::new(symbol, qty);
        if let Some(next) = next {
            t = t.with_price(ActivePrice { active: Some(next), next: Some(next) });
        }
        t
    }

    fn vault(collateral: Vec<TokenAmount>, loans: Vec<TokenAmount>) -> VaultData {
        let collateral_value = collateral
            .iter()
            .map(|c| c.amount * c.active_price.as_ref().and_then(|p| p.active).unwrap_or_default())
            .sum();
        let loan_value = loans
            .iter()
            .map(|l| {
                l.amount
                    * l.active_price
                        .as_ref()
                        .and_then(|p| p.active)
                        .unwrap_or(Decimal::ONE)
            })
            .sum();
        VaultData {
            vault_id: "v1".to_string(),
            state: VaultState::Active,
            collateral_amounts: collateral.into_iter().collect(),
            loan_amounts: loans.into_iter().collect(),
            interest_amounts: smallvec![],
            collateral_value,
            loan_value,
            informative_ratio: dec!(200),
            scheme_min_ratio: dec!(150),
        }
    }

    #[test]
    fn derives_ready_and_empty_from_undefined_ratio() {
        let mut data = vault(vec![amount("DFI", dec!(100), Some(dec!(5)))], vec![]);
        data.informative_ratio = RATIO_UNDEFINED;
        assert_eq!(VaultSnapshot::new(data.clone(), 1).state(), VaultState::Ready);

        data.collateral_amounts = smallvec![];
        data.collateral_value = Decimal::ZERO;
        assert_eq!(VaultSnapshot::new(data.clone(), 1).state(), VaultState::Empty);

        // defined ratio: state passes through untouched
        data.informative_ratio = dec!(180);
        assert_eq!(VaultSnapshot::new(data, 1).state(), VaultState::Active);
    }

    #[test]
    fn next_values_use_projected_prices_and_fallbacks() {
        let data = vault(
            vec![
                amount("DFI", dec!(100), Some(dec!(5))),
                amount("DUSD", dec!(10), None),
                amount("OBSCURE", dec!(7), None),
            ],
            vec![amount("DUSD", dec!(200), None)],
        );

        let early = VaultSnapshot::new(data.clone(), STABLE_REPRICE_HEIGHT - 1);
        assert_eq!(early.next_collateral_value(), dec!(500) + dec!(10) * dec!(0.99));

        let late = VaultSnapshot::new(data, STABLE_REPRICE_HEIGHT);
        assert_eq!(late.next_collateral_value(), dec!(500) + dec!(10) * dec!(1.2));
        assert_eq!(late.next_loan_value(), dec!(200));
        assert_eq!(late.next_ratio(), dec!(512) / dec!(200) * dec!(100));
    }

    #[test]
    fn next_ratio_undefined_without_loans() {
        let data = vault(vec![amount("DFI", dec!(100), Some(dec!(5)))], vec![]);
        assert_eq!(VaultSnapshot::new(data, 1).next_ratio(), RATIO_UNDEFINED);
    }
}
