//! Sequential action execution with continuation-token threading.

use std::sync::Arc;
use tracing::{debug, info};

use rebalancer_ledger::ContinuationToken;
use rebalancer_notify::Notifier;

use super::action::{Action, ActionOutcome};
use crate::constants::SUPPRESS_FINISH_MESSAGE;

/// What to do with the remaining actions after one fails.
///
/// Continuing is the default: partial progress (e.g. liquidity already
/// withdrawn) is usually better than none, and every failure is reported
/// either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    ContinueOnFailure,
    AbortOnFailure,
}

/// An ordered list of actions run strictly in sequence.
///
/// Ordering is required, not cosmetic: later actions may spend unconfirmed
/// outputs of earlier ones. After each action that submitted a transaction,
/// its continuation token replaces the one handed to the next action; an
/// action that sent nothing leaves the token untouched so a no-op cannot
/// break the chain.
pub struct ActionSet {
    name: String,
    finish_message: String,
    actions: Vec<Action>,
    policy: FailurePolicy,
    notifier: Arc<dyn Notifier>,
}

impl ActionSet {
    pub fn new(
        name: impl Into<String>,
        finish_message: impl Into<String>,
        actions: Vec<Action>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            name: name.into(),
            finish_message: finish_message.into(),
            actions,
            policy: FailurePolicy::default(),
            notifier,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn run(&self) -> ActionOutcome {
        let mut token: Option<ContinuationToken> = None;
        let mut finish = self.finish_message.clone();
        let mut all_ok = true;
        let mut any_sent = false;
        let mut last_failure = None;

        for action in &self.actions {
            let outcome = action.run(token.clone()).await;
            if outcome.tx_sent {
                token = outcome.token.clone();
                any_sent = true;
            }
            if let Some(message) = &outcome.finish_message {
                // last writer wins
                finish = message.clone();
            }
            if !outcome.success {
                all_ok = false;
                last_failure = outcome
                    .failure
                    .clone()
                    .or_else(|| Some(format!("action '{}' failed", action.name())));
                if self.policy == FailurePolicy::AbortOnFailure {
                    debug!(set = %self.name, action = %action.name(), "aborting after failure");
                    break;
                }
            }
        }

        if all_ok && finish != SUPPRESS_FINISH_MESSAGE {
            self.notifier.send(&finish).await;
        }
        info!(set = %self.name, success = all_ok, tx_sent = any_sent, "action set finished");

        ActionOutcome {
            success: all_ok,
            tx_sent: any_sent,
            token,
            finish_message: Some(finish),
            failure: last_failure,
        }
    }
}

impl std::fmt::Debug for ActionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSet")
            .field("name", &self.name)
            .field("actions", &self.actions.len())
            .field("policy", &self.policy)
            .finish()
    }
}
