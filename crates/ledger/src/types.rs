//! Shared data model for ledger reads and transaction submission.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of a collateralized vault as reported by the ledger,
/// plus the two derived refinements (`Ready`, `Empty`) that the valuation
/// layer computes when the ledger reports an undefined ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VaultState {
    /// Healthy, collateral and loans present
    Active,
    /// Ratio close to the liquidation threshold
    MayLiquidate,
    /// Collateral is being auctioned off
    InLiquidation,
    /// No outstanding loan (derived: loan value rounds to zero)
    Ready,
    /// No collateral (derived: collateral value rounds to zero)
    Empty,
    /// State not recognized by this client
    Unknown,
}

impl VaultState {
    /// Parse the ledger's wire representation.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "ACTIVE" => Self::Active,
            "MAY_LIQUIDATE" => Self::MayLiquidate,
            "IN_LIQUIDATION" | "LIQUIDATED" => Self::InLiquidation,
            _ => Self::Unknown,
        }
    }

    /// States in which vault valuation fields are meaningful.
    pub fn is_operable(&self) -> bool {
        matches!(self, Self::Active | Self::MayLiquidate | Self::Unknown)
    }
}

impl fmt::Display for VaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::MayLiquidate => "MAY_LIQUIDATE",
            Self::InLiquidation => "IN_LIQUIDATION",
            Self::Ready => "READY",
            Self::Empty => "EMPTY",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Oracle price pair: the currently attested value and the projection that
/// becomes active on the next block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivePrice {
    pub active: Option<Decimal>,
    pub next: Option<Decimal>,
}

/// A token position inside a vault (collateral, loan or accrued interest).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub symbol: String,
    pub amount: Decimal,
    /// Oracle price attached by the ledger, absent for tokens without a feed
    pub active_price: Option<ActivePrice>,
}

impl TokenAmount {
    pub fn new(symbol: impl Into<String>, amount: Decimal) -> Self {
        Self { symbol: symbol.into(), amount, active_price: None }
    }

    pub fn with_price(mut self, price: ActivePrice) -> Self {
        self.active_price = Some(price);
        self
    }
}

/// Raw per-fetch view of a vault as the ledger reports it.
///
/// Valuation (projected values, derived states, ratios) lives in the core
/// crate; this struct only carries what came over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultData {
    pub vault_id: String,
    pub state: VaultState,
    pub collateral_amounts: SmallVec<[TokenAmount; 4]>,
    pub loan_amounts: SmallVec<[TokenAmount; 4]>,
    pub interest_amounts: SmallVec<[TokenAmount; 4]>,
    /// Total collateral value in USD
    pub collateral_value: Decimal,
    /// Total loan value in USD
    pub loan_value: Decimal,
    /// Collateral ratio in percent; `-1` sentinel when undefined
    pub informative_ratio: Decimal,
    /// Minimum collateral ratio of the vault's loan scheme
    pub scheme_min_ratio: Decimal,
}

/// One reserve leg of a liquidity pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolLeg {
    pub id: String,
    pub symbol: String,
    pub reserve: Decimal,
}

/// Bidirectional pool price ratio. Invariant: the legs are reciprocal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRatio {
    /// Units of the non-stable asset one stable unit buys
    pub asset_per_stable: Decimal,
    /// Units of stable one asset unit buys
    pub stable_per_asset: Decimal,
}

impl PriceRatio {
    /// Build both legs from the asset-per-stable ratio.
    pub fn from_asset_per_stable(asset_per_stable: Decimal) -> Self {
        let stable_per_asset = if asset_per_stable.is_zero() {
            Decimal::ZERO
        } else {
            Decimal::ONE / asset_per_stable
        };
        Self { asset_per_stable, stable_per_asset }
    }
}

/// Snapshot of a two-asset liquidity pool keyed by its pair symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Pair symbol, e.g. `TSLA-DUSD`
    pub pair: String,
    /// Non-stable reserve leg
    pub asset: PoolLeg,
    /// Stable reserve leg
    pub stable: PoolLeg,
    pub price: PriceRatio,
    /// Total outstanding pool-share token quantity
    pub total_shares: Decimal,
}

/// Opaque reference to the unspent output of an unconfirmed transaction.
///
/// Produced by exactly one submitted operation and consumed by at most the
/// next operation in the same action set; never retained across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A token symbol with a quantity, as used in operation payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenQuantity {
    pub symbol: String,
    pub amount: Decimal,
}

impl TokenQuantity {
    pub fn new(symbol: impl Into<String>, amount: Decimal) -> Self {
        Self { symbol: symbol.into(), amount }
    }
}

/// A pool-share token quantity keyed by pair symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolShareQuantity {
    pub pair: String,
    pub amount: Decimal,
}

/// Both legs of a liquidity deposit for one pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityLeg {
    pub pair: String,
    pub asset_amount: Decimal,
    pub stable_amount: Decimal,
}

/// Ledger operation description handed to the transaction submitter.
///
/// The submitter owns signing and wire encoding; the engine only describes
/// intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    DepositCollateral { vault_id: String, token: TokenQuantity },
    TakeLoan { vault_id: String, amounts: Vec<TokenQuantity> },
    PaybackLoan { vault_id: String, amounts: Vec<TokenQuantity> },
    AddLiquidity { legs: Vec<LiquidityLeg> },
    RemoveLiquidity { shares: Vec<PoolShareQuantity> },
    Swap { from: TokenQuantity, to_symbol: String },
    /// Convert unspent native outputs into spendable account balance
    ConvertUtxo { amount: Decimal },
}

impl Operation {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DepositCollateral { .. } => "deposit_collateral",
            Self::TakeLoan { .. } => "take_loan",
            Self::PaybackLoan { .. } => "payback_loan",
            Self::AddLiquidity { .. } => "add_liquidity",
            Self::RemoveLiquidity { .. } => "remove_liquidity",
            Self::Swap { .. } => "swap",
            Self::ConvertUtxo { .. } => "convert_utxo",
        }
    }
}

/// Receipt for a submitted (not yet confirmed) transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReceipt {
    pub txid: String,
    /// Token a dependent operation may spend before confirmation
    pub token: ContinuationToken,
}

/// Ratio bounds of a bot configuration as observed on the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioRulesMessage {
    pub keep_min_ratio: Decimal,
    pub keep_max_ratio: Decimal,
}

/// Compounding settings of a bot configuration as observed on the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundingMessage {
    pub mode: u8,
    pub threshold: Decimal,
    #[serde(default)]
    pub token: Option<String>,
}

/// Raw bot configuration message, unvalidated.
///
/// The core crate turns this into a checked configuration; callers never
/// consume it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMessage {
    pub version: String,
    pub vault_id: String,
    pub rules: RatioRulesMessage,
    /// Relative allocation share per non-stable asset symbol
    pub weights: BTreeMap<String, Decimal>,
    pub compounding: CompoundingMessage,
    /// `-1` = indefinite pause, `0` = active, `>0` = pause minutes
    pub pause: i64,
}

/// A configuration message together with where it was observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedConfig {
    pub message: ConfigMessage,
    pub block_height: u64,
    /// Unix time of the block carrying the configuration
    pub block_time: i64,
}
