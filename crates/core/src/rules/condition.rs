//! Single comparison of a parameter against a threshold.

use std::fmt;
use tracing::warn;

use super::parameter::{ParamValue, Parameter};

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Less,
    LessEq,
    GreaterEq,
    Greater,
    Eq,
    NotEq,
}

impl CompareOp {
    /// Whether the operator requires ordered operands.
    pub fn is_ordering(&self) -> bool {
        !matches!(self, Self::Eq | Self::NotEq)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Less => "<",
            Self::LessEq => "<=",
            Self::GreaterEq => ">=",
            Self::Greater => ">",
            Self::Eq => "==",
            Self::NotEq => "!=",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    #[error("operator {op} cannot order categorical threshold {threshold:?}")]
    CategoricalOrdering { op: CompareOp, threshold: String },
}

/// Compares one parameter's current value to a fixed threshold.
#[derive(Debug, Clone)]
pub struct Condition {
    parameter: Parameter,
    op: CompareOp,
    threshold: ParamValue,
}

impl Condition {
    /// Build a condition. Fails fast when an ordering operator is paired
    /// with a categorical threshold; only `==`/`!=` order-free comparisons
    /// are legal for categories.
    pub fn new(
        parameter: Parameter,
        op: CompareOp,
        threshold: ParamValue,
    ) -> Result<Self, ConditionError> {
        if op.is_ordering() {
            if let ParamValue::Category(ref threshold) = threshold {
                return Err(ConditionError::CategoricalOrdering {
                    op,
                    threshold: threshold.clone(),
                });
            }
        }
        Ok(Self { parameter, op, threshold })
    }

    /// Fetch the parameter and apply the operator.
    ///
    /// The type check from construction is repeated against the value the
    /// parameter actually returned, because a source can change shape
    /// between construction and evaluation. Degenerate combinations
    /// (category under an ordering operator, or a type mismatch) evaluate
    /// to `false` rather than erroring.
    pub async fn is_fulfilled(&self) -> anyhow::Result<bool> {
        let value = self.parameter.current_value().await?;
        let result = match (&value, &self.threshold) {
            (ParamValue::Number(value), ParamValue::Number(threshold)) => match self.op {
                CompareOp::Less => value < threshold,
                CompareOp::LessEq => value <= threshold,
                CompareOp::GreaterEq => value >= threshold,
                CompareOp::Greater => value > threshold,
                CompareOp::Eq => value == threshold,
                CompareOp::NotEq => value != threshold,
            },
            (ParamValue::Category(value), ParamValue::Category(threshold)) => match self.op {
                CompareOp::Eq => value == threshold,
                CompareOp::NotEq => value != threshold,
                op => {
                    warn!(
                        parameter = self.parameter.name(),
                        %op,
                        "categorical value under ordering operator, treating as false"
                    );
                    false
                }
            },
            _ => {
                warn!(
                    parameter = self.parameter.name(),
                    "parameter value and threshold differ in kind, treating as false"
                );
                false
            }
        };
        Ok(result)
    }
}
