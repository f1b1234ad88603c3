//! Drives a TestCase through its steps and cleans up afterwards

use std::sync::Arc;

use acctest_core::BoxError;
use acctest_core::check::TestCheckFunc;
use acctest_core::env::{AccConfig, ENV_ACC};
use acctest_core::teardown::Teardown;
use acctest_plugin::ProviderFactories;
use acctest_workdir::{CommandRunner, Helper, WorkingDir};
use log::{debug, error, info, trace, warn};

use crate::error::{StepError, TestError};
use crate::provider_command::{get_state, run_provider_command};
use crate::step_config::run_config_step;
use crate::step_import::run_import_step;
use crate::step_refresh::run_refresh_step;
use crate::testcase::TestCase;
use crate::teststep::{StepMode, TestStep};

/// What a step routine needs besides the working directory it mutates
pub(crate) struct StepContext<'a> {
    pub case: &'a TestCase,
    pub acc: &'a AccConfig,
    pub helper: &'a Helper,
    pub providers: &'a ProviderFactories,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    /// Acceptance tests are not enabled
    Skipped,
}

/// Everything the post-test teardown operates on
struct TestRun {
    wd: WorkingDir,
    helper: Helper,
    /// Providers of the most recent step, used for the final destroy
    providers: ProviderFactories,
    acc: AccConfig,
    check_destroy: Option<TestCheckFunc>,
}

impl TestRun {
    async fn destroy_remaining(&mut self) -> Result<(), TestError> {
        let state = get_state(&mut self.wd, &self.providers, &self.acc)
            .await
            .map_err(TestError::DanglingState)?;
        if state.is_empty() {
            debug!("State is empty, skipping post-test destroy");
            return Ok(());
        }

        debug!("Running post-test destroy");
        run_provider_command(&mut self.wd, &self.providers, &self.acc, |wd| {
            Box::pin(wd.destroy())
        })
        .await
        .map_err(TestError::DanglingDestroy)?;

        if let Some(check) = &self.check_destroy {
            debug!("Calling TestCase CheckDestroy");
            check(&state).map_err(|e| TestError::DanglingDestroy(StepError::Check(e)))?;
        }
        Ok(())
    }
}

/// Runs TestCases against the CLI
pub struct TestRunner {
    config: AccConfig,
    command_runner: Option<Arc<dyn CommandRunner>>,
}

impl TestRunner {
    pub fn new(config: AccConfig) -> Self {
        Self {
            config,
            command_runner: None,
        }
    }

    pub fn from_env() -> Self {
        Self::new(AccConfig::from_env())
    }

    /// Run CLI invocations through `runner` instead of the located binary
    pub fn with_command_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.command_runner = Some(runner);
        self
    }

    pub fn config(&self) -> &AccConfig {
        &self.config
    }

    fn helper(&self, name: &str) -> Result<Helper, TestError> {
        let helper = match &self.command_runner {
            Some(runner) => Helper::with_runner(&self.config, name, Arc::clone(runner)),
            None => Helper::from_config(&self.config, name),
        };
        helper.map_err(|e| TestError::setup("Failed to create plugin test helper", e))
    }

    /// Validate and run `case`, destroying whatever it created
    pub async fn run(&self, name: &str, case: &TestCase) -> Result<TestOutcome, TestError> {
        case.validate()?;

        if !self.config.acceptance_enabled && !case.is_unit_test {
            warn!(
                "Acceptance tests skipped unless env '{}' set: {}",
                ENV_ACC, name
            );
            return Ok(TestOutcome::Skipped);
        }

        if let Some(pre_check) = &case.pre_check {
            debug!("Calling TestCase PreCheck");
            pre_check();
        }

        let helper = self.helper(name)?;
        let wd = match helper.new_working_dir() {
            Ok(wd) => wd,
            Err(e) => {
                if let Err(close_err) = helper.close() {
                    error!("Unable to clean up temporary test files: {}", close_err);
                }
                return Err(TestError::setup("Failed to create working directory", e));
            }
        };

        let mut run = TestRun {
            wd,
            helper,
            providers: case.provider_factories.clone(),
            acc: self.config.clone(),
            check_destroy: case.check_destroy.clone(),
        };

        let mut teardown: Teardown<TestRun> = Teardown::new();
        teardown.push("remove base directory", |run| {
            Box::pin(async move { run.helper.close().map_err(BoxError::from) })
        });
        teardown.push("remove working directory", |run| {
            Box::pin(async move { run.wd.close().map_err(BoxError::from) })
        });
        teardown.push("post-test destroy", |run| {
            Box::pin(async move { run.destroy_remaining().await.map_err(BoxError::from) })
        });

        info!("Running {} ({} steps)", name, case.steps.len());
        let result = run_steps(case, &mut run).await;

        let failures = teardown.run(&mut run).await;
        let mut dangling = None;
        for failure in failures {
            match failure.error.downcast::<TestError>() {
                Ok(e) if dangling.is_none() => dangling = Some(*e),
                Ok(e) => error!("{}", e),
                Err(e) => error!("Unable to clean up temporary test files: {}", e),
            }
        }

        match (result, dangling) {
            (Ok(()), None) => Ok(TestOutcome::Passed),
            (Ok(()), Some(teardown)) => Err(teardown),
            (Err(step), None) => Err(step),
            (Err(step), Some(teardown)) => Err(TestError::WithDanglingResources {
                step: Box::new(step),
                teardown: Box::new(teardown),
            }),
        }
    }
}

/// Run `case` with a runner configured from the environment
pub async fn test(name: &str, case: &TestCase) -> Result<TestOutcome, TestError> {
    TestRunner::from_env().run(name, case).await
}

/// Run `case` whether or not acceptance tests are enabled
pub async fn unit_test(name: &str, case: &TestCase) -> Result<TestOutcome, TestError> {
    let mut case = case.clone();
    case.is_unit_test = true;
    TestRunner::from_env().run(name, &case).await
}

async fn run_steps(case: &TestCase, run: &mut TestRun) -> Result<(), TestError> {
    if case.has_providers() {
        run.wd
            .set_config(&case.provider_config(false))
            .map_err(|e| TestError::setup("Error setting test config", e))?;
        run_provider_command(&mut run.wd, &run.providers, &run.acc, |wd| {
            Box::pin(wd.init())
        })
        .await
        .map_err(|e| TestError::setup("Error running init", e))?;
    }

    let total = case.steps.len();
    let mut applied_config = String::new();

    for (i, step) in case.steps.iter().enumerate() {
        let n = i + 1;
        debug!("Starting TestStep {}/{}", n, total);

        if let Some(pre_config) = &step.pre_config {
            debug!("Calling TestStep PreConfig");
            pre_config();
        }

        if let Some(skip_func) = &step.skip_func {
            debug!("Calling TestStep SkipFunc");
            let skip = skip_func().map_err(|e| TestError::Step {
                step: n,
                total,
                message: format!("Error calling TestStep SkipFunc: {}", e),
                source: None,
            })?;
            if skip {
                warn!("Skipping step {}/{} due to SkipFunc", n, total);
                continue;
            }
        }

        if step.has_providers() {
            run.providers = case.provider_factories.merge(&step.provider_factories);
        }

        // Validation guarantees a mode
        let mode = step.mode().unwrap_or(StepMode::Config);
        let ctx = StepContext {
            case,
            acc: &run.acc,
            helper: &run.helper,
            providers: &run.providers,
        };
        let result = run_step(&ctx, &mut run.wd, step, mode, &applied_config).await;
        step_outcome(case, step, mode, n, total, result)?;

        if mode == StepMode::Config {
            applied_config = case.merged_config(step);
        }
    }

    Ok(())
}

async fn run_step(
    ctx: &StepContext<'_>,
    wd: &mut WorkingDir,
    step: &TestStep,
    mode: StepMode,
    applied_config: &str,
) -> Result<(), StepError> {
    if step.has_providers() {
        wd.set_config(&step.provider_config(step.config_has_provider_block()))
            .map_err(|e| StepError::fatal(format!("Error setting test config: {}", e)))?;
        run_provider_command(wd, ctx.providers, ctx.acc, |wd| Box::pin(wd.init()))
            .await
            .map_err(|e| StepError::fatal(format!("Error running init: {}", e)))?;
    }

    match mode {
        StepMode::ImportState => {
            trace!("TestStep is ImportState mode");
            run_import_step(ctx, wd, step, applied_config).await
        }
        StepMode::RefreshState => {
            trace!("TestStep is RefreshState mode");
            run_refresh_step(ctx, wd, step).await
        }
        StepMode::Config => {
            trace!("TestStep is Config mode");
            run_config_step(ctx, wd, step).await
        }
    }
}

/// Apply ExpectError and ErrorCheck to the result of one step
fn step_outcome(
    case: &TestCase,
    step: &TestStep,
    mode: StepMode,
    n: usize,
    total: usize,
    result: Result<(), StepError>,
) -> Result<(), TestError> {
    let fail = |message: String, source: Option<StepError>| TestError::Step {
        step: n,
        total,
        message,
        source,
    };
    let action = match mode {
        StepMode::ImportState => Some("import"),
        StepMode::RefreshState => Some("refresh"),
        StepMode::Config => None,
    };

    let err = match result {
        Err(e) if e.is_fatal() => {
            return Err(fail(format!("Step {}/{} error: {}", n, total, e), Some(e)));
        }
        Err(e) => Some(e),
        Ok(()) => None,
    };

    if let Some(expected) = &step.expect_error {
        return match (err, action) {
            (None, Some(action)) => Err(fail(
                format!(
                    "Step {}/{} error running {}: expected an error but got none",
                    n, total, action
                ),
                None,
            )),
            (None, None) => Err(fail(
                format!("Step {}/{}, expected an error but got none", n, total),
                None,
            )),
            (Some(e), _) if expected.is_match(&e.to_string()) => {
                debug!("Step {}/{} failed with the expected error", n, total);
                Ok(())
            }
            (Some(e), Some(action)) => Err(fail(
                format!(
                    "Step {}/{} error running {}, expected an error with pattern ({}), no match on: {}",
                    n, total, action, expected, e
                ),
                Some(e),
            )),
            (Some(e), None) => Err(fail(
                format!(
                    "Step {}/{}, expected an error with pattern, no match on: {}",
                    n, total, e
                ),
                Some(e),
            )),
        };
    }

    let Some(mut e) = err else {
        return Ok(());
    };
    if let Some(error_check) = &case.error_check {
        debug!("Calling TestCase ErrorCheck");
        match error_check(e) {
            Ok(()) => return Ok(()),
            Err(reclassified) => e = reclassified,
        }
    }

    let message = match action {
        Some(action) => format!("Step {}/{} error running {}: {}", n, total, action, e),
        None => format!("Step {}/{} error: {}", n, total, e),
    };
    Err(fail(message, Some(e)))
}
