//! Rebalancer core logic.
//!
//! This crate provides the vault rebalancing engine:
//! - Declarative rule engine (parameters, conditions, actions, rules)
//! - Sizing engine for borrow/repay/withdrawal quantities
//! - Advisory safety evaluator
//! - Vault snapshot valuation (projected values, derived states)
//! - Configuration validation and per-tick orchestration
//!
//! Ledger access and notification delivery are consumed through the traits
//! in `rebalancer-ledger` and `rebalancer-notify`.

pub mod constants;
mod config;
mod engine;
mod factory;
mod math;
pub mod rules;
mod safety;
mod sizing;
mod vault;

pub use config::{
    BotConfig, CompoundingConfig, CompoundingMode, ConfigError, PauseState, SchedulerState,
};
pub use engine::{Engine, TickOutcome};
pub use factory::RuleFactory;
pub use math::{floor_chain, floor_sized};
pub use safety::{SafetyEvaluator, SafetyOutcome, SafetyViolation};
pub use sizing::{
    pair_symbol, AllocationWeights, BorrowQuota, ExpectedPayback, PoolWithdrawal, Sizer,
    SizingError,
};
pub use vault::VaultSnapshot;
