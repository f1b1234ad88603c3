//! Ordered cleanup actions
//!
//! Actions are registered as resources come up and run in reverse order once
//! the work is done, whether it succeeded or not. A failing action does not
//! stop the ones after it.

use log::{debug, error};

use crate::{BoxError, BoxFuture};

type Action<R> = Box<dyn for<'a> FnOnce(&'a mut R) -> BoxFuture<'a, Result<(), BoxError>> + Send>;

/// A cleanup action that failed
#[derive(Debug)]
pub struct TeardownFailure {
    pub label: String,
    pub error: BoxError,
}

impl std::fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.label, self.error)
    }
}

/// Cleanup actions over a shared resource `R`, run last-in first-out
pub struct Teardown<R> {
    actions: Vec<(String, Action<R>)>,
}

impl<R> Default for Teardown<R> {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
        }
    }
}

impl<R> Teardown<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, label: impl Into<String>, f: F)
    where
        F: for<'a> FnOnce(&'a mut R) -> BoxFuture<'a, Result<(), BoxError>> + Send + 'static,
    {
        self.actions.push((label.into(), Box::new(f)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every action in reverse registration order and collect failures
    pub async fn run(self, resource: &mut R) -> Vec<TeardownFailure> {
        let mut failures = Vec::new();
        for (label, action) in self.actions.into_iter().rev() {
            debug!("Running teardown: {}", label);
            if let Err(e) = action(resource).await {
                error!("Teardown {} failed: {}", label, e);
                failures.push(TeardownFailure { label, error: e });
            }
        }
        failures
    }
}
