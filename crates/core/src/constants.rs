//! Protocol and policy constants.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Symbol of the stable asset every loan pool pairs against.
pub const STABLE_SYMBOL: &str = "DUSD";

/// Symbol of the chain-native asset.
pub const NATIVE_SYMBOL: &str = "DFI";

/// Fractional digits of every public sizing output.
pub const SIZING_SCALE: u32 = 6;

/// Fractional digits of on-chain transfer amounts.
pub const CHAIN_SCALE: u32 = 8;

/// Margin in percentage points added to the scheme's minimum collateral
/// ratio when evaluating reachable safety.
pub const SAFETY_RATIO_MARGIN: Decimal = dec!(100);

/// Native balance kept unconverted to cover transaction fees.
pub const UTXO_FEE_RESERVE: Decimal = dec!(0.1);

/// Block height at which the stable asset's fallback collateral price
/// changed.
pub const STABLE_REPRICE_HEIGHT: u64 = 2_257_500;

/// Stable collateral fallback price below [`STABLE_REPRICE_HEIGHT`].
pub const STABLE_COLLATERAL_VALUE_EARLY: Decimal = dec!(0.99);

/// Stable collateral fallback price at or above [`STABLE_REPRICE_HEIGHT`].
pub const STABLE_COLLATERAL_VALUE_LATE: Decimal = dec!(1.2);

/// The only configuration message version this build understands.
pub const SUPPORTED_CONFIG_VERSION: &str = "1.0";

/// Finish-message sentinel that suppresses the user notification.
pub const SUPPRESS_FINISH_MESSAGE: &str = "n/a";

/// Sentinel the ledger reports when a vault's ratio is undefined.
pub const RATIO_UNDEFINED: Decimal = dec!(-1);
