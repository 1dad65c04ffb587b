//! Builds the three rules (compounding, keep-minimum, keep-maximum) from a
//! validated configuration.
//!
//! Parameters re-read the ledger on every evaluation; actions recompute
//! their sizing when they run. Within one tick the ledger is treated as a
//! consistent snapshot, so an action recomputing what a sibling action
//! computed moments earlier arrives at the same quantities.

use rust_decimal::Decimal;
use std::sync::Arc;

use rebalancer_ledger::{
    BalanceReader, BlockReader, LiquidityLeg, Operation, PoolReader, PoolShareQuantity,
    PriceReader, TokenQuantity, TransactionSubmitter, VaultReader, VaultState,
};
use rebalancer_notify::Notifier;

use crate::config::{BotConfig, CompoundingMode};
use crate::constants::{
    NATIVE_SYMBOL, SAFETY_RATIO_MARGIN, STABLE_SYMBOL, SUPPRESS_FINISH_MESSAGE, UTXO_FEE_RESERVE,
};
use crate::math::floor_chain;
use crate::rules::{
    Action, ActionOutcome, ActionSet, CompareOp, Condition, ConditionSet, ParamValue, Parameter,
    Rule,
};
use crate::sizing::{pair_symbol, AllocationWeights, Sizer};
use crate::vault::VaultSnapshot;

async fn snapshot(
    vaults: &Arc<dyn VaultReader>,
    blocks: &Arc<dyn BlockReader>,
    vault_id: &str,
) -> anyhow::Result<VaultSnapshot> {
    let height = blocks.block_height().await?;
    let data = vaults.vault(vault_id).await?;
    Ok(VaultSnapshot::new(data, height))
}

async fn spendable_native(balances: &Arc<dyn BalanceReader>) -> anyhow::Result<Decimal> {
    let account = balances.token_balance(NATIVE_SYMBOL).await?;
    let surplus = (balances.utxo_balance().await? - UTXO_FEE_RESERVE).max(Decimal::ZERO);
    Ok(account + surplus)
}

/// Constructs parameters, conditions, actions and rules over the shared
/// collaborators.
pub struct RuleFactory {
    vaults: Arc<dyn VaultReader>,
    balances: Arc<dyn BalanceReader>,
    blocks: Arc<dyn BlockReader>,
    submitter: Arc<dyn TransactionSubmitter>,
    notifier: Arc<dyn Notifier>,
    sizer: Sizer,
}

impl RuleFactory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vaults: Arc<dyn VaultReader>,
        pools: Arc<dyn PoolReader>,
        prices: Arc<dyn PriceReader>,
        balances: Arc<dyn BalanceReader>,
        blocks: Arc<dyn BlockReader>,
        submitter: Arc<dyn TransactionSubmitter>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let sizer = Sizer::new(pools, prices, balances.clone());
        Self { vaults, balances, blocks, submitter, notifier, sizer }
    }

    /// The three rules of one tick, in execution order.
    pub fn rules_from_config(&self, config: &BotConfig) -> anyhow::Result<Vec<Rule>> {
        Ok(vec![
            self.compound_rule(config)?,
            self.keep_min_rule(config)?,
            self.keep_max_rule(config)?,
        ])
    }

    // ---- parameters ----

    fn current_ratio_parameter(&self, vault_id: &str) -> Parameter {
        let vaults = self.vaults.clone();
        let vault_id = vault_id.to_string();
        Parameter::new("vault-ratio", move || {
            let vaults = vaults.clone();
            let vault_id = vault_id.clone();
            async move {
                let data = vaults.vault(&vault_id).await?;
                Ok(ParamValue::Number(data.informative_ratio))
            }
        })
    }

    fn next_ratio_parameter(&self, vault_id: &str) -> Parameter {
        let vaults = self.vaults.clone();
        let blocks = self.blocks.clone();
        let vault_id = vault_id.to_string();
        Parameter::new("vault-next-ratio", move || {
            let vaults = vaults.clone();
            let blocks = blocks.clone();
            let vault_id = vault_id.clone();
            async move {
                let vault = snapshot(&vaults, &blocks, &vault_id).await?;
                Ok(ParamValue::Number(vault.next_ratio()))
            }
        })
    }

    fn vault_state_parameter(&self, vault_id: &str) -> Parameter {
        let vaults = self.vaults.clone();
        let blocks = self.blocks.clone();
        let vault_id = vault_id.to_string();
        Parameter::new("vault-state", move || {
            let vaults = vaults.clone();
            let blocks = blocks.clone();
            let vault_id = vault_id.clone();
            async move {
                let vault = snapshot(&vaults, &blocks, &vault_id).await?;
                Ok(ParamValue::category(vault.state().to_string()))
            }
        })
    }

    fn native_balance_parameter(&self) -> Parameter {
        let balances = self.balances.clone();
        Parameter::new("native-balance", move || {
            let balances = balances.clone();
            async move { Ok(ParamValue::Number(spendable_native(&balances).await?)) }
        })
    }

    // ---- conditions ----

    fn operable_state_conditions(&self, vault_id: &str) -> anyhow::Result<ConditionSet> {
        let state = self.vault_state_parameter(vault_id);
        Ok(ConditionSet::any(vec![
            Condition::new(
                state.clone(),
                CompareOp::Eq,
                ParamValue::category(VaultState::Active.to_string()),
            )?
            .into(),
            Condition::new(
                state,
                CompareOp::Eq,
                ParamValue::category(VaultState::MayLiquidate.to_string()),
            )?
            .into(),
        ]))
    }

    fn keep_min_conditions(&self, config: &BotConfig) -> anyhow::Result<ConditionSet> {
        let min = config.keep_min_ratio;
        Ok(ConditionSet::all(vec![
            self.operable_state_conditions(&config.vault_id)?.into(),
            ConditionSet::any(vec![
                Condition::new(
                    self.current_ratio_parameter(&config.vault_id),
                    CompareOp::Less,
                    ParamValue::Number(min),
                )?
                .into(),
                Condition::new(
                    self.next_ratio_parameter(&config.vault_id),
                    CompareOp::Less,
                    ParamValue::Number(min),
                )?
                .into(),
            ])
            .into(),
        ]))
    }

    fn keep_max_conditions(&self, config: &BotConfig) -> anyhow::Result<ConditionSet> {
        let max = config.keep_max_ratio;
        let both_above = ConditionSet::all(vec![
            self.operable_state_conditions(&config.vault_id)?.into(),
            Condition::new(
                self.current_ratio_parameter(&config.vault_id),
                CompareOp::GreaterEq,
                ParamValue::Number(max),
            )?
            .into(),
            Condition::new(
                self.next_ratio_parameter(&config.vault_id),
                CompareOp::GreaterEq,
                ParamValue::Number(max),
            )?
            .into(),
        ]);
        // a vault with collateral but no loans has an undefined ratio and
        // must still be leveraged up
        let ready = Condition::new(
            self.vault_state_parameter(&config.vault_id),
            CompareOp::Eq,
            ParamValue::category(VaultState::Ready.to_string()),
        )?;
        Ok(ConditionSet::any(vec![both_above.into(), ready.into()]))
    }

    fn compounding_conditions(&self, config: &BotConfig) -> anyhow::Result<ConditionSet> {
        if config.compounding.mode == CompoundingMode::Off {
            // empty OR never holds
            return Ok(ConditionSet::any(vec![]));
        }
        Ok(ConditionSet::all(vec![Condition::new(
            self.native_balance_parameter(),
            CompareOp::GreaterEq,
            ParamValue::Number(config.compounding.threshold),
        )?
        .into()]))
    }

    // ---- actions ----

    /// Convert surplus UTXO balance into spendable account balance, keeping
    /// the fee reserve untouched. A no-op success when nothing is surplus.
    fn convert_utxo_action(&self) -> Action {
        let balances = self.balances.clone();
        let submitter = self.submitter.clone();
        Action::new("convert-utxo", self.notifier.clone(), move |token| {
            let balances = balances.clone();
            let submitter = submitter.clone();
            async move {
                let surplus = balances.utxo_balance().await? - UTXO_FEE_RESERVE;
                if surplus <= Decimal::ZERO {
                    return Ok(ActionOutcome::ok());
                }
                let receipt = submitter
                    .submit(Operation::ConvertUtxo { amount: floor_chain(surplus) }, token)
                    .await?;
                Ok(ActionOutcome::sent(receipt.token))
            }
        })
    }

    fn deposit_native_action(&self, vault_id: &str) -> Action {
        let balances = self.balances.clone();
        let submitter = self.submitter.clone();
        let vault_id = vault_id.to_string();
        Action::new("deposit-native", self.notifier.clone(), move |token| {
            let balances = balances.clone();
            let submitter = submitter.clone();
            let vault_id = vault_id.clone();
            async move {
                let amount = floor_chain(spendable_native(&balances).await?);
                if amount <= Decimal::ZERO {
                    return Ok(ActionOutcome::ok());
                }
                let receipt = submitter
                    .submit(
                        Operation::DepositCollateral {
                            vault_id,
                            token: TokenQuantity::new(NATIVE_SYMBOL, amount),
                        },
                        token,
                    )
                    .await?;
                Ok(ActionOutcome::sent(receipt.token))
            }
        })
    }

    fn swap_native_action(&self, target: &str) -> Action {
        let balances = self.balances.clone();
        let submitter = self.submitter.clone();
        let target = target.to_string();
        Action::new("swap-native", self.notifier.clone(), move |token| {
            let balances = balances.clone();
            let submitter = submitter.clone();
            let target = target.clone();
            async move {
                let amount = floor_chain(spendable_native(&balances).await?);
                if amount <= Decimal::ZERO {
                    return Ok(ActionOutcome::ok());
                }
                let receipt = submitter
                    .submit(
                        Operation::Swap {
                            from: TokenQuantity::new(NATIVE_SYMBOL, amount),
                            to_symbol: target,
                        },
                        token,
                    )
                    .await?;
                Ok(ActionOutcome::sent(receipt.token))
            }
        })
    }

    /// Suspend until the chain advances one block, so a later action can
    /// read balances that include an earlier action's confirmed effects.
    fn wait_for_block_action(&self) -> Action {
        let blocks = self.blocks.clone();
        Action::new("wait-for-block", self.notifier.clone(), move |_token| {
            let blocks = blocks.clone();
            async move {
                let from = blocks.block_height().await?;
                blocks.wait_for_next_block(from).await?;
                Ok(ActionOutcome::ok())
            }
        })
    }

    fn deposit_token_action(&self, vault_id: &str, symbol: &str) -> Action {
        let balances = self.balances.clone();
        let submitter = self.submitter.clone();
        let vault_id = vault_id.to_string();
        let symbol = symbol.to_string();
        Action::new("deposit-token", self.notifier.clone(), move |token| {
            let balances = balances.clone();
            let submitter = submitter.clone();
            let vault_id = vault_id.clone();
            let symbol = symbol.clone();
            async move {
                let amount = floor_chain(balances.token_balance(&symbol).await?);
                if amount <= Decimal::ZERO {
                    return Ok(ActionOutcome::ok());
                }
                let receipt = submitter
                    .submit(
                        Operation::DepositCollateral {
                            vault_id,
                            token: TokenQuantity::new(symbol, amount),
                        },
                        token,
                    )
                    .await?;
                Ok(ActionOutcome::sent(receipt.token))
            }
        })
    }

    /// Withdraw the pool shares the repay sizing calls for.
    fn withdraw_liquidity_action(
        &self,
        vault_id: &str,
        target_ratio: Decimal,
        weights: AllocationWeights,
    ) -> Action {
        let vaults = self.vaults.clone();
        let blocks = self.blocks.clone();
        let submitter = self.submitter.clone();
        let sizer = self.sizer.clone();
        let vault_id = vault_id.to_string();
        Action::new("withdraw-liquidity", self.notifier.clone(), move |token| {
            let vaults = vaults.clone();
            let blocks = blocks.clone();
            let submitter = submitter.clone();
            let sizer = sizer.clone();
            let vault_id = vault_id.clone();
            let weights = weights.clone();
            async move {
                let vault = snapshot(&vaults, &blocks, &vault_id).await?;
                let withdrawals = sizer
                    .repay_requirements(target_ratio, &weights, &vault)
                    .await?;
                let shares: Vec<PoolShareQuantity> = withdrawals
                    .iter()
                    .filter(|w| w.share_amount > Decimal::ZERO)
                    .map(|w| PoolShareQuantity { pair: w.pair.clone(), amount: w.share_amount })
                    .collect();
                if shares.is_empty() {
                    // nothing to withdraw: silent if the vault is still
                    // comfortably safe, a failure the operator must hear
                    // about otherwise
                    let floor = vault.scheme_min_ratio() + SAFETY_RATIO_MARGIN;
                    if vault.current_ratio().min(vault.next_ratio()) > floor {
                        return Ok(
                            ActionOutcome::ok().with_finish_message(SUPPRESS_FINISH_MESSAGE)
                        );
                    }
                    return Ok(ActionOutcome::failed("no pool shares held to repay with"));
                }
                let receipt = submitter
                    .submit(Operation::RemoveLiquidity { shares }, token)
                    .await?;
                Ok(ActionOutcome::sent(receipt.token))
            }
        })
    }

    /// Pay the loan back with what the withdrawal is expected to release.
    fn payback_loan_action(
        &self,
        vault_id: &str,
        target_ratio: Decimal,
        weights: AllocationWeights,
    ) -> Action {
        let vaults = self.vaults.clone();
        let blocks = self.blocks.clone();
        let submitter = self.submitter.clone();
        let sizer = self.sizer.clone();
        let vault_id = vault_id.to_string();
        Action::new("payback-loan", self.notifier.clone(), move |token| {
            let vaults = vaults.clone();
            let blocks = blocks.clone();
            let submitter = submitter.clone();
            let sizer = sizer.clone();
            let vault_id = vault_id.clone();
            let weights = weights.clone();
            async move {
                let vault = snapshot(&vaults, &blocks, &vault_id).await?;
                let withdrawals = sizer
                    .repay_requirements(target_ratio, &weights, &vault)
                    .await?;
                let payback = sizer.expected_payback(&withdrawals, &vault).await?;
                let mut amounts: Vec<TokenQuantity> = payback
                    .token_amounts
                    .into_iter()
                    .filter(|q| q.amount > Decimal::ZERO)
                    .collect();
                if payback.stable_amount > Decimal::ZERO {
                    amounts.push(TokenQuantity::new(STABLE_SYMBOL, payback.stable_amount));
                }
                if amounts.is_empty() {
                    return Ok(ActionOutcome::ok());
                }
                let receipt = submitter
                    .submit(Operation::PaybackLoan { vault_id, amounts }, token)
                    .await?;
                Ok(ActionOutcome::sent(receipt.token))
            }
        })
    }

    /// Borrow both legs of every allocation toward the target ratio.
    fn take_loan_action(
        &self,
        vault_id: &str,
        target_ratio: Decimal,
        weights: AllocationWeights,
    ) -> Action {
        let vaults = self.vaults.clone();
        let blocks = self.blocks.clone();
        let submitter = self.submitter.clone();
        let sizer = self.sizer.clone();
        let vault_id = vault_id.to_string();
        Action::new("take-loan", self.notifier.clone(), move |token| {
            let vaults = vaults.clone();
            let blocks = blocks.clone();
            let submitter = submitter.clone();
            let sizer = sizer.clone();
            let vault_id = vault_id.clone();
            let weights = weights.clone();
            async move {
                let vault = snapshot(&vaults, &blocks, &vault_id).await?;
                let quotas = sizer.borrow_quotas(target_ratio, &weights, &vault).await?;
                let mut amounts = Vec::new();
                let mut stable_total = Decimal::ZERO;
                for quota in &quotas {
                    if quota.asset_amount > Decimal::ZERO {
                        amounts.push(TokenQuantity::new(quota.token.clone(), quota.asset_amount));
                    }
                    stable_total += quota.stable_amount;
                }
                if stable_total > Decimal::ZERO {
                    amounts.push(TokenQuantity::new(STABLE_SYMBOL, stable_total));
                }
                if amounts.is_empty() {
                    return Ok(ActionOutcome::ok());
                }
                let receipt = submitter
                    .submit(Operation::TakeLoan { vault_id, amounts }, token)
                    .await?;
                Ok(ActionOutcome::sent(receipt.token))
            }
        })
    }

    /// Provide the borrowed legs as pool liquidity.
    fn add_liquidity_action(
        &self,
        vault_id: &str,
        target_ratio: Decimal,
        weights: AllocationWeights,
    ) -> Action {
        let vaults = self.vaults.clone();
        let blocks = self.blocks.clone();
        let submitter = self.submitter.clone();
        let sizer = self.sizer.clone();
        let vault_id = vault_id.to_string();
        Action::new("add-liquidity", self.notifier.clone(), move |token| {
            let vaults = vaults.clone();
            let blocks = blocks.clone();
            let submitter = submitter.clone();
            let sizer = sizer.clone();
            let vault_id = vault_id.clone();
            let weights = weights.clone();
            async move {
                let vault = snapshot(&vaults, &blocks, &vault_id).await?;
                let quotas = sizer.borrow_quotas(target_ratio, &weights, &vault).await?;
                let legs: Vec<LiquidityLeg> = quotas
                    .iter()
                    .filter(|q| q.asset_amount > Decimal::ZERO && q.stable_amount > Decimal::ZERO)
                    .map(|q| LiquidityLeg {
                        pair: pair_symbol(&q.token),
                        asset_amount: q.asset_amount,
                        stable_amount: q.stable_amount,
                    })
                    .collect();
                if legs.is_empty() {
                    return Ok(ActionOutcome::ok());
                }
                let receipt = submitter
                    .submit(Operation::AddLiquidity { legs }, token)
                    .await?;
                Ok(ActionOutcome::sent(receipt.token))
            }
        })
    }

    // ---- rules ----

    fn compound_rule(&self, config: &BotConfig) -> anyhow::Result<Rule> {
        let vault_id = &config.vault_id;
        let (actions, finish): (Vec<Action>, String) = match &config.compounding.mode {
            CompoundingMode::Off => (vec![], SUPPRESS_FINISH_MESSAGE.to_string()),
            CompoundingMode::DepositCollateral => (
                vec![self.convert_utxo_action(), self.deposit_native_action(vault_id)],
                "compounded: deposited native balance as collateral".to_string(),
            ),
            CompoundingMode::SwapOnly => {
                let target = config.compounding.token.as_deref().unwrap_or(NATIVE_SYMBOL);
                (
                    vec![self.convert_utxo_action(), self.swap_native_action(target)],
                    format!("compounded: swapped native balance to {target}"),
                )
            }
            CompoundingMode::SwapAndDeposit => {
                let target = config.compounding.token.as_deref().unwrap_or(NATIVE_SYMBOL);
                (
                    vec![
                        self.convert_utxo_action(),
                        self.swap_native_action(target),
                        self.wait_for_block_action(),
                        self.deposit_token_action(vault_id, target),
                    ],
                    format!("compounded: swapped and deposited {target} as collateral"),
                )
            }
        };
        Ok(Rule::new(
            "compound",
            "reinvest idle native balance above the configured threshold",
            self.compounding_conditions(config)?,
            ActionSet::new("compound", finish, actions, self.notifier.clone()),
        ))
    }

    fn keep_min_rule(&self, config: &BotConfig) -> anyhow::Result<Rule> {
        let target = config.target_ratio();
        let actions = ActionSet::new(
            "increase-ratio",
            format!("repaid loans to bring the vault ratio back toward {target}"),
            vec![
                self.withdraw_liquidity_action(&config.vault_id, target, config.weights.clone()),
                self.payback_loan_action(&config.vault_id, target, config.weights.clone()),
            ],
            self.notifier.clone(),
        );
        Ok(Rule::new(
            "keep-min-ratio",
            "repay debt when the vault ratio falls below the configured minimum",
            self.keep_min_conditions(config)?,
            actions,
        ))
    }

    fn keep_max_rule(&self, config: &BotConfig) -> anyhow::Result<Rule> {
        let target = config.target_ratio();
        let actions = ActionSet::new(
            "decrease-ratio",
            format!("borrowed and provided liquidity to bring the vault ratio toward {target}"),
            vec![
                self.take_loan_action(&config.vault_id, target, config.weights.clone()),
                self.add_liquidity_action(&config.vault_id, target, config.weights.clone()),
            ],
            self.notifier.clone(),
        );
        Ok(Rule::new(
            "keep-max-ratio",
            "lever up when the vault ratio sits above the configured maximum",
            self.keep_max_conditions(config)?,
            actions,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebalancer_ledger::{ActivePrice, MemoryLedger, TokenAmount, VaultData};
    use rebalancer_notify::CapturingNotifier;
    use rust_decimal_macros::dec;
    use smallvec::smallvec;
    use std::collections::BTreeMap;

    fn factory(ledger: Arc<MemoryLedger>, notifier: Arc<CapturingNotifier>) -> RuleFactory {
        RuleFactory::new(
            ledger.clone(),
            ledger.clone(),
            ledger.clone(),
            ledger.clone(),
            ledger.clone(),
            ledger,
            notifier,
        )
    }

    fn config(mode: u8) -> BotConfig {
        BotConfig {
            vault_id: "v1".to_string(),
            keep_min_ratio: dec!(170),
            keep_max_ratio: dec!(190),
            weights: AllocationWeights::new(BTreeMap::from([("TSLA".to_string(), dec!(100))]))
                .unwrap(),
            compounding: crate::config::CompoundingConfig {
                mode: CompoundingMode::from_raw(mode).unwrap(),
                threshold: dec!(5),
                token: Some("BTC".to_string()),
            },
            pause: crate::config::PauseState::Active,
        }
    }

    #[tokio::test]
    async fn native_balance_parameter_keeps_fee_reserve() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.set_balance(NATIVE_SYMBOL, dec!(10));
        ledger.set_utxo_balance(dec!(2));
        let notifier = Arc::new(CapturingNotifier::new());

        let param = factory(ledger.clone(), notifier.clone()).native_balance_parameter();
        assert_eq!(
            param.current_value().await.unwrap(),
            ParamValue::Number(dec!(11.9))
        );

        // reserve never drives the balance negative
        ledger.set_utxo_balance(dec!(0.05));
        assert_eq!(
            param.current_value().await.unwrap(),
            ParamValue::Number(dec!(10))
        );
    }

    #[tokio::test]
    async fn ready_vault_opens_the_max_gate() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.set_vault(VaultData {
            vault_id: "v1".to_string(),
            state: VaultState::Active,
            collateral_amounts: smallvec![TokenAmount::new(NATIVE_SYMBOL, dec!(100)).with_price(
                ActivePrice { active: Some(dec!(5)), next: Some(dec!(5)) }
            )],
            loan_amounts: smallvec![],
            interest_amounts: smallvec![],
            collateral_value: dec!(500),
            loan_value: dec!(0),
            informative_ratio: dec!(-1),
            scheme_min_ratio: dec!(150),
        });
        ledger.set_height(10);
        let notifier = Arc::new(CapturingNotifier::new());
        let factory = factory(ledger, notifier);

        let gate = factory.keep_max_conditions(&config(0)).unwrap();
        assert!(gate.is_fulfilled().await.unwrap());

        // no loans means nothing to repay: the min gate stays closed
        let gate = factory.keep_min_conditions(&config(0)).unwrap();
        assert!(!gate.is_fulfilled().await.unwrap());
    }

    #[tokio::test]
    async fn compounding_off_never_fires() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.set_balance(NATIVE_SYMBOL, dec!(1000));
        let notifier = Arc::new(CapturingNotifier::new());
        let factory = factory(ledger, notifier);

        let gate = factory.compounding_conditions(&config(0)).unwrap();
        assert!(!gate.is_fulfilled().await.unwrap());

        let gate = factory.compounding_conditions(&config(1)).unwrap();
        assert!(gate.is_fulfilled().await.unwrap());
    }

    #[tokio::test]
    async fn rules_come_in_execution_order() {
        let ledger = Arc::new(MemoryLedger::new());
        let notifier = Arc::new(CapturingNotifier::new());
        let rules = factory(ledger, notifier)
            .rules_from_config(&config(1))
            .unwrap();
        let names: Vec<&str> = rules.iter().map(Rule::name).collect();
        assert_eq!(names, ["compound", "keep-min-ratio", "keep-max-ratio"]);
    }
}
