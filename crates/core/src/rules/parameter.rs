//! Named, lazily evaluated scalars backed by external reads.

use futures::future::BoxFuture;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;

/// Value a parameter can take: numeric or categorical.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Number(Decimal),
    Category(String),
}

impl ParamValue {
    pub fn category(value: impl Into<String>) -> Self {
        Self::Category(value.into())
    }
}

impl From<Decimal> for ParamValue {
    fn from(value: Decimal) -> Self {
        Self::Number(value)
    }
}

type FetchFn = dyn Fn() -> BoxFuture<'static, anyhow::Result<ParamValue>> + Send + Sync;

/// A named scalar re-fetched from its source on every read.
///
/// No caching: conditions care about freshness, not read cost. Cloning the
/// parameter shares the underlying fetch closure.
#[derive(Clone)]
pub struct Parameter {
    name: String,
    fetch: Arc<FetchFn>,
}

impl Parameter {
    pub fn new<F, Fut>(name: impl Into<String>, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ParamValue>> + Send + 'static,
    {
        Self {
            name: name.into(),
            fetch: Arc::new(move || Box::pin(fetch())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch the value as of now.
    pub async fn current_value(&self) -> anyhow::Result<ParamValue> {
        (self.fetch)().await
    }
}

impl std::fmt::Debug for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parameter").field("name", &self.name).finish()
    }
}
