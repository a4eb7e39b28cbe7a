//! Predicates that tighten while a scan is being planned.

use std::collections::HashSet;
use std::fmt::Debug;

use async_trait::async_trait;

use crate::predicate::EffectivePredicate;

/// A source of predicate domains that may narrow over time, typically fed by
/// the build side of a join executing elsewhere.
///
/// Implementations must only ever narrow: once a value is excluded by
/// [`current_predicate`](Self::current_predicate) it must stay excluded, and
/// once [`is_complete`](Self::is_complete) returns `true` the predicate must
/// not change again. The enumerator snapshots the predicate per batch, so a
/// narrowing between batches is picked up on the next call.
#[async_trait]
pub trait DynamicFilter: Send + Sync + Debug {
    /// Columns this filter can ever constrain. Used to decide whether
    /// waiting for it can pay off at all.
    fn columns_covered(&self) -> HashSet<String>;

    /// Resolves when the filter has new information: either it completed or
    /// its predicate narrowed since the last call. May be waited on
    /// repeatedly.
    async fn is_blocked(&self);

    /// Whether the predicate has reached its final form.
    fn is_complete(&self) -> bool;

    /// Whether waiting on [`is_blocked`](Self::is_blocked) can make
    /// progress. A filter that is complete, or abandoned by its producer, is
    /// no longer awaitable.
    fn is_awaitable(&self) -> bool;

    /// The current predicate. Must be monotonically narrowing across calls.
    fn current_predicate(&self) -> EffectivePredicate;
}

/// A filter that is already in its final form.
#[derive(Debug, Clone)]
pub struct CompletedFilter {
    predicate: EffectivePredicate,
}

impl CompletedFilter {
    pub fn new(predicate: EffectivePredicate) -> Self {
        Self { predicate }
    }
}

#[async_trait]
impl DynamicFilter for CompletedFilter {
    fn columns_covered(&self) -> HashSet<String> {
        self.predicate.columns()
    }

    async fn is_blocked(&self) {}

    fn is_complete(&self) -> bool {
        true
    }

    fn is_awaitable(&self) -> bool {
        false
    }

    fn current_predicate(&self) -> EffectivePredicate {
        self.predicate.clone()
    }
}
