//! Validated bot configuration and per-tick scheduler state.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

use rebalancer_ledger::ConfigMessage;

use crate::constants::SUPPORTED_CONFIG_VERSION;
use crate::sizing::{AllocationWeights, SizingError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unsupported configuration version {0:?}")]
    UnsupportedVersion(String),

    #[error("unknown compounding mode {0}")]
    InvalidCompoundingMode(u8),

    #[error("compounding mode {0} requires a target token")]
    MissingSwapToken(u8),

    #[error(transparent)]
    Weights(#[from] SizingError),
}

/// What the bot does with idle native balance above the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundingMode {
    Off,
    /// Deposit the native balance as vault collateral.
    DepositCollateral,
    /// Swap the native balance to the target token and keep it.
    SwapOnly,
    /// Swap, wait one block for the swap to land, then deposit.
    SwapAndDeposit,
}

impl CompoundingMode {
    pub fn from_raw(raw: u8) -> Result<Self, ConfigError> {
        match raw {
            0 => Ok(Self::Off),
            1 => Ok(Self::DepositCollateral),
            2 => Ok(Self::SwapOnly),
            3 => Ok(Self::SwapAndDeposit),
            other => Err(ConfigError::InvalidCompoundingMode(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompoundingConfig {
    pub mode: CompoundingMode,
    /// Native balance that must accumulate before compounding fires.
    pub threshold: Decimal,
    /// Swap target for the swap modes.
    pub token: Option<String>,
}

/// Pause directive carried by the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseState {
    /// Run normally.
    Active,
    /// Hold until a new configuration says otherwise.
    Indefinite,
    /// Hold for this many minutes from the configuration's block time.
    Minutes(i64),
}

impl PauseState {
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            -1 => Self::Indefinite,
            n if n > 0 => Self::Minutes(n),
            _ => Self::Active,
        }
    }
}

/// Checked, normalized bot configuration.
///
/// Built from a raw observed message; replaced wholesale whenever a newer
/// message appears on the ledger, never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct BotConfig {
    pub vault_id: String,
    pub keep_min_ratio: Decimal,
    pub keep_max_ratio: Decimal,
    pub weights: AllocationWeights,
    pub compounding: CompoundingConfig,
    pub pause: PauseState,
}

impl BotConfig {
    /// Validate and normalize a raw message against the vault's scheme.
    ///
    /// Normalization fixes the threshold combinations a user can plausibly
    /// get wrong instead of rejecting them: a minimum below the scheme's
    /// floor is raised, inverted bounds are swapped, equal bounds are
    /// spread apart.
    pub fn from_message(
        message: &ConfigMessage,
        scheme_min_ratio: Decimal,
    ) -> Result<Self, ConfigError> {
        if message.version != SUPPORTED_CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(message.version.clone()));
        }

        let mut min = message.rules.keep_min_ratio;
        let mut max = message.rules.keep_max_ratio;
        if min < scheme_min_ratio {
            warn!(%min, %scheme_min_ratio, "minimum ratio below scheme floor, raising");
            min = scheme_min_ratio;
        }
        if min > max {
            warn!(%min, %max, "inverted ratio bounds, swapping");
            std::mem::swap(&mut min, &mut max);
        }
        if min == max {
            warn!(%min, "equal ratio bounds, spreading");
            max = min + dec!(2);
        }

        let mode = CompoundingMode::from_raw(message.compounding.mode)?;
        let token = message.compounding.token.clone();
        if matches!(mode, CompoundingMode::SwapOnly | CompoundingMode::SwapAndDeposit)
            && token.is_none()
        {
            return Err(ConfigError::MissingSwapToken(message.compounding.mode));
        }

        Ok(Self {
            vault_id: message.vault_id.clone(),
            keep_min_ratio: min,
            keep_max_ratio: max,
            weights: AllocationWeights::new(message.weights.clone())?,
            compounding: CompoundingConfig {
                mode,
                threshold: message.compounding.threshold,
                token,
            },
            pause: PauseState::from_raw(message.pause),
        })
    }

    /// Ratio the sizing engine steers toward: the midpoint of the band.
    pub fn target_ratio(&self) -> Decimal {
        (self.keep_min_ratio + self.keep_max_ratio) / dec!(2)
    }
}

/// Mutable per-loop state owned by the outer scheduler.
///
/// The engine reads and updates it only at tick boundaries; nothing in here
/// is shared across concurrent ticks because ticks never overlap.
#[derive(Debug, Default)]
pub struct SchedulerState {
    /// Height of the last block a tick ran against.
    pub last_block_height: u64,
    /// Block height of the configuration currently in effect.
    pub last_config_block: u64,
    /// Block time of the configuration currently in effect.
    pub last_config_block_time: i64,
    /// Whether the one-shot "pause elapsed" notification went out.
    pub pause_elapsed_notified: bool,
    /// Raw pause value of the last observed configuration, for transition
    /// messages.
    pub last_pause_raw: Option<i64>,
    /// Last known good configuration; survives an invalid update.
    pub config: Option<BotConfig>,
}
