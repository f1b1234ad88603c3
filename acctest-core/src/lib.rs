//! Acctest Core
//!
//! Primitives for acceptance testing infrastructure providers: the CLI's JSON
//! state and plan documents, the legacy flat state handed to check functions,
//! and the comparisons used to verify convergence and imports.

use std::future::Future;
use std::pin::Pin;

pub mod check;
pub mod compare;
pub mod env;
pub mod plan;
pub mod reattach;
pub mod shim;
pub mod state;
pub mod teardown;
pub mod tfjson;

/// Return type for async callbacks
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error type returned by user-supplied callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
