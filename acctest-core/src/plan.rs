//! Plan convergence oracle
//!
//! Re-planning immediately after an apply must produce nothing but no-op
//! actions. This module answers that question for a JSON plan.

use std::fmt;

use crate::tfjson::{Action, JsonPlan, ResourceChange};

/// Returns true if every resource change in the plan is a no-op
pub fn plan_is_empty(plan: &JsonPlan) -> bool {
    plan.resource_changes.iter().all(is_no_op)
}

fn is_no_op(change: &ResourceChange) -> bool {
    change.change.actions.iter().all(|a| *a == Action::NoOp)
}

/// Addresses of resources with at least one action other than no-op
pub fn pending_changes(plan: &JsonPlan) -> Vec<&str> {
    plan.resource_changes
        .iter()
        .filter(|rc| !is_no_op(rc))
        .map(|rc| rc.address.as_str())
        .collect()
}

/// Counts of planned actions
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub read: usize,
    pub create: usize,
    pub update: usize,
    pub delete: usize,
}

impl PlanSummary {
    /// Summarize a plan; a replacement counts as one create and one delete
    pub fn from_plan(plan: &JsonPlan) -> Self {
        let mut summary = Self::default();
        for rc in &plan.resource_changes {
            for action in &rc.change.actions {
                match action {
                    Action::NoOp => {}
                    Action::Read => summary.read += 1,
                    Action::Create => summary.create += 1,
                    Action::Update => summary.update += 1,
                    Action::Delete => summary.delete += 1,
                }
            }
        }
        summary
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plan: {} to create, {} to update, {} to delete",
            self.create, self.update, self.delete
        )
    }
}
