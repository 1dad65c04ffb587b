//! A gate bound to an effect.

use tracing::{debug, info};

use super::action::ActionOutcome;
use super::action_set::ActionSet;
use super::condition_set::ConditionSet;

/// Binds one condition set (when to act) to one action set (what to do).
pub struct Rule {
    name: String,
    description: String,
    conditions: ConditionSet,
    actions: ActionSet,
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        conditions: ConditionSet,
        actions: ActionSet,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            conditions,
            actions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Evaluate the gate and, when it holds, run the actions.
    ///
    /// A skipped rule is a success without a transaction. Gate evaluation
    /// errors (failed parameter reads) propagate to the tick handler.
    pub async fn run(&self) -> anyhow::Result<ActionOutcome> {
        if !self.conditions.is_fulfilled().await? {
            debug!(rule = %self.name, "gate not met, skipping");
            return Ok(ActionOutcome::ok());
        }
        info!(rule = %self.name, "gate met, executing actions");
        Ok(self.actions.run().await)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::action::Action;
    use crate::rules::condition::{CompareOp, Condition};
    use crate::rules::parameter::{ParamValue, Parameter};
    use parking_lot::Mutex;
    use rebalancer_notify::CapturingNotifier;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn gate(holds: bool) -> ConditionSet {
        let param = Parameter::new("gate", move || async move {
            Ok(ParamValue::Number(if holds { dec!(1) } else { dec!(0) }))
        });
        ConditionSet::all(vec![Condition::new(
            param,
            CompareOp::Eq,
            ParamValue::Number(dec!(1)),
        )
        .unwrap()
        .into()])
    }

    #[tokio::test]
    async fn closed_gate_is_success_without_effect() {
        let notifier = Arc::new(CapturingNotifier::new());
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        let actions = ActionSet::new(
            "effect",
            "did it",
            vec![Action::new("mark", notifier.clone(), move |_| {
                let flag = flag.clone();
                async move {
                    *flag.lock() = true;
                    Ok(ActionOutcome::ok())
                }
            })],
            notifier.clone(),
        );

        let rule = Rule::new("r", "test rule", gate(false), actions);
        let outcome = rule.run().await.unwrap();
        assert!(outcome.success);
        assert!(!outcome.tx_sent);
        assert!(!*ran.lock());
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn open_gate_delegates_to_actions() {
        let notifier = Arc::new(CapturingNotifier::new());
        let actions = ActionSet::new(
            "effect",
            "did it",
            vec![Action::new("noop", notifier.clone(), |_| async {
                Ok(ActionOutcome::ok())
            })],
            notifier.clone(),
        );

        let rule = Rule::new("r", "test rule", gate(true), actions);
        let outcome = rule.run().await.unwrap();
        assert!(outcome.success);
        assert_eq!(notifier.messages(), vec!["did it".to_string()]);
    }
}
