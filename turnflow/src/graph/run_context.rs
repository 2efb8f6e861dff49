//! Run-scoped context threaded through node execution: turn deadline and a
//! free-form correlation id for logging.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

/// Context passed to each node for one graph run.
///
/// Carries the turn's absolute deadline (see [`RunContext::remaining`] and
/// [`RunContext::is_expired`]) so that nodes issuing LLM, embedding, or DB
/// calls can bound them with whatever remains of the turn budget.
pub struct RunContext<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Correlation id for this run (e.g. an execution id), used only for logging.
    pub run_id: String,
    deadline: Option<Instant>,
    _marker: PhantomData<S>,
}

impl<S> RunContext<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Creates a context with no deadline.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            deadline: None,
            _marker: PhantomData,
        }
    }

    /// Creates a context whose deadline is `timeout` from now.
    pub fn with_timeout(run_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            run_id: run_id.into(),
            deadline: Some(Instant::now() + timeout),
            _marker: PhantomData,
        }
    }

    /// Time left before the turn deadline, or `None` if there is no deadline.
    /// Returns `Duration::ZERO` if the deadline has already passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// True once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }
}

impl<S> Clone for RunContext<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    fn clone(&self) -> Self {
        Self {
            run_id: self.run_id.clone(),
            deadline: self.deadline,
            _marker: PhantomData,
        }
    }
}
