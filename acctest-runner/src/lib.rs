//! Acctest
//!
//! Acceptance test driver for infrastructure providers. A [`TestCase`] is a
//! list of [`TestStep`]s; each step applies a configuration, imports a
//! resource or refreshes state through the CLI, with the provider under test
//! served in-process. Whatever the steps create is destroyed afterwards.
//!
//! ```ignore
//! let case = TestCase {
//!     provider_factories: ProviderFactories::new().proto_v5("example", || Ok(Arc::new(MyProvider))),
//!     steps: vec![TestStep {
//!         check: Some(check_resource_attr("example_thing.foo", "name", "web")),
//!         ..TestStep::config(r#"resource "example_thing" "foo" { name = "web" }"#)
//!     }],
//!     ..Default::default()
//! };
//! acctest::test("TestAccThing_basic", &case).await?;
//! ```

pub mod error;
mod id_refresh;
pub mod parallel;
mod provider_command;
pub mod run;
mod step_config;
mod step_import;
mod step_refresh;
pub mod sweeper;
pub mod testcase;
pub mod teststep;

#[cfg(test)]
mod testing;

pub use acctest_core::check;
pub use acctest_core::state::State;
pub use acctest_plugin::{ProviderFactories, ProviderFactory, ProviderServer, Shutdown};

pub use error::{StepError, StepValidationError, TestError, ValidationError};
pub use parallel::{CaseResult, run_parallel};
pub use provider_command::{get_state, run_provider_command};
pub use run::{TestOutcome, TestRunner, test, unit_test};
pub use sweeper::{SweepArgs, SweepError, Sweeper, SweeperRegistry, sweep_main};
pub use testcase::{ExternalProvider, TestCase};
pub use teststep::{StepMode, TestStep};
