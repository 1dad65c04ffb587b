//! Side-effecting units of work with a never-throw contract.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use rebalancer_ledger::ContinuationToken;
use rebalancer_notify::Notifier;

/// Result of running one action.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActionOutcome {
    pub success: bool,
    /// Whether a transaction was submitted to the ledger.
    pub tx_sent: bool,
    /// Continuation token of the submitted transaction, for the next
    /// dependent action.
    pub token: Option<ContinuationToken>,
    /// Overrides the enclosing set's finish message when present.
    pub finish_message: Option<String>,
    /// Failure reason; part of the result so callers and tests can assert
    /// on it instead of relying on the notification side channel.
    pub failure: Option<String>,
}

impl ActionOutcome {
    /// Success without a submitted transaction.
    pub fn ok() -> Self {
        Self { success: true, ..Self::default() }
    }

    /// Success with a submitted transaction and its continuation token.
    pub fn sent(token: ContinuationToken) -> Self {
        Self {
            success: true,
            tx_sent: true,
            token: Some(token),
            ..Self::default()
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self { failure: Some(reason.into()), ..Self::default() }
    }

    pub fn with_finish_message(mut self, message: impl Into<String>) -> Self {
        self.finish_message = Some(message.into());
        self
    }
}

type ActionFn =
    dyn Fn(Option<ContinuationToken>) -> BoxFuture<'static, anyhow::Result<ActionOutcome>>
        + Send
        + Sync;

/// A named asynchronous unit of work.
///
/// Contract: [`Action::run`] never propagates an error. Anything the body
/// raises is reported through the notifier and normalized into a failed
/// outcome, so a caught error and a reported failure look identical to the
/// caller.
#[derive(Clone)]
pub struct Action {
    name: String,
    notifier: Arc<dyn Notifier>,
    body: Arc<ActionFn>,
}

impl Action {
    pub fn new<F, Fut>(name: impl Into<String>, notifier: Arc<dyn Notifier>, body: F) -> Self
    where
        F: Fn(Option<ContinuationToken>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ActionOutcome>> + Send + 'static,
    {
        Self {
            name: name.into(),
            notifier,
            body: Arc::new(move |token| Box::pin(body(token))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(&self, token: Option<ContinuationToken>) -> ActionOutcome {
        debug!(action = %self.name, chained = token.is_some(), "running action");
        match (self.body)(token).await {
            Ok(outcome) => {
                if !outcome.success {
                    let reason = outcome.failure.as_deref().unwrap_or("unspecified failure");
                    warn!(action = %self.name, reason, "action reported failure");
                    self.notifier
                        .report_error(&format!("action '{}' failed: {reason}", self.name))
                        .await;
                }
                // returned as-is: a failed action may still have sent a
                // transaction the caller must chain on
                outcome
            }
            Err(e) => {
                warn!(action = %self.name, error = %e, "action raised");
                self.notifier
                    .report_error(&format!("action '{}' failed: {e:#}", self.name))
                    .await;
                ActionOutcome::failed(e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebalancer_notify::CapturingNotifier;

    #[tokio::test]
    async fn raised_error_becomes_failed_outcome() {
        let notifier = Arc::new(CapturingNotifier::new());
        let action = Action::new("explode", notifier.clone(), |_token| async {
            anyhow::bail!("pool missing")
        });

        let outcome = action.run(None).await;
        assert!(!outcome.success);
        assert!(!outcome.tx_sent);
        assert_eq!(outcome.failure.as_deref(), Some("pool missing"));
        assert_eq!(notifier.errors().len(), 1);
        assert!(notifier.errors()[0].contains("pool missing"));
    }

    #[tokio::test]
    async fn reported_failure_keeps_tx_sent_flag() {
        let notifier = Arc::new(CapturingNotifier::new());
        let action = Action::new("partial", notifier.clone(), |_token| async {
            let mut outcome = ActionOutcome::sent(ContinuationToken::new("tx:0"));
            outcome.success = false;
            outcome.failure = Some("second submit rejected".to_string());
            Ok(outcome)
        });

        let outcome = action.run(None).await;
        assert!(!outcome.success);
        assert!(outcome.tx_sent);
        assert_eq!(outcome.token, Some(ContinuationToken::new("tx:0")));
        assert_eq!(notifier.errors().len(), 1);
    }

    #[tokio::test]
    async fn success_is_silent() {
        let notifier = Arc::new(CapturingNotifier::new());
        let action = Action::new("noop", notifier.clone(), |_token| async {
            Ok(ActionOutcome::ok())
        });

        let outcome = action.run(None).await;
        assert!(outcome.success);
        assert!(notifier.errors().is_empty());
        assert!(notifier.messages().is_empty());
    }
}
