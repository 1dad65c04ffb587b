//! Error taxonomy for ledger access.

use crate::types::VaultState;

/// Errors surfaced by ledger collaborators.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The vault exists but is not in an operable state (e.g. liquidated)
    #[error("vault {vault_id} is not operable (state: {state})")]
    VaultNotActive { vault_id: String, state: VaultState },

    #[error("vault {0} not found")]
    VaultNotFound(String),

    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("malformed ledger response: {0}")]
    Malformed(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
