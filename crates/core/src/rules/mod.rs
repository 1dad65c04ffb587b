//! Declarative rule engine: parameters, conditions, actions, rules.
//!
//! The building blocks decouple "when to act" (parameters compared by
//! conditions, folded into boolean trees) from "what to do" (actions run in
//! sequence with continuation-token threading). Rules bind the two.

mod action;
mod action_set;
mod condition;
mod condition_set;
mod parameter;
mod rule;

pub use action::{Action, ActionOutcome};
pub use action_set::{ActionSet, FailurePolicy};
pub use condition::{CompareOp, Condition, ConditionError};
pub use condition_set::{BoolOp, ConditionNode, ConditionSet};
pub use parameter::{ParamValue, Parameter};
pub use rule::Rule;
