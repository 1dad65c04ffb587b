//! Boolean trees of conditions.

use futures::future::{try_join_all, BoxFuture};

use super::condition::Condition;

/// Fold operator of a condition set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoolOp {
    #[default]
    And,
    Or,
}

/// One node of the tree: a leaf comparison or a nested set.
#[derive(Debug, Clone)]
pub enum ConditionNode {
    Leaf(Condition),
    Group(ConditionSet),
}

impl ConditionNode {
    fn is_fulfilled(&self) -> BoxFuture<'_, anyhow::Result<bool>> {
        match self {
            Self::Leaf(condition) => Box::pin(condition.is_fulfilled()),
            Self::Group(set) => Box::pin(set.is_fulfilled()),
        }
    }
}

impl From<Condition> for ConditionNode {
    fn from(condition: Condition) -> Self {
        Self::Leaf(condition)
    }
}

impl From<ConditionSet> for ConditionNode {
    fn from(set: ConditionSet) -> Self {
        Self::Group(set)
    }
}

/// Conditions and nested sets folded with AND or OR.
///
/// Children are independent read-only checks, so they are evaluated
/// concurrently; the fold happens after all results are in. Nesting depth
/// is unbounded.
#[derive(Debug, Clone)]
pub struct ConditionSet {
    nodes: Vec<ConditionNode>,
    op: BoolOp,
}

impl ConditionSet {
    pub fn new(nodes: Vec<ConditionNode>, op: BoolOp) -> Self {
        Self { nodes, op }
    }

    /// All children must hold.
    pub fn all(nodes: Vec<ConditionNode>) -> Self {
        Self::new(nodes, BoolOp::And)
    }

    /// At least one child must hold.
    pub fn any(nodes: Vec<ConditionNode>) -> Self {
        Self::new(nodes, BoolOp::Or)
    }

    pub async fn is_fulfilled(&self) -> anyhow::Result<bool> {
        let results = try_join_all(self.nodes.iter().map(ConditionNode::is_fulfilled)).await?;
        Ok(match self.op {
            BoolOp::And => results.iter().all(|fulfilled| *fulfilled),
            BoolOp::Or => results.iter().any(|fulfilled| *fulfilled),
        })
    }
}
