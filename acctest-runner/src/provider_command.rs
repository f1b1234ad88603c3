//! Runs one CLI command against freshly started provider servers

use acctest_core::BoxFuture;
use acctest_core::env::AccConfig;
use acctest_core::shim::shim_state_from_json;
use acctest_core::state::State;
use acctest_plugin::{ProviderFactories, launch};
use acctest_workdir::{WorkdirError, WorkingDir};
use log::warn;

use crate::error::StepError;

/// Start the providers, run `f` with their reattach info set, then shut them down
///
/// The servers live exactly as long as the command. Shutdown happens whether
/// or not the command succeeded; a command error takes precedence over a
/// shutdown error.
pub async fn run_provider_command<T, F>(
    wd: &mut WorkingDir,
    providers: &ProviderFactories,
    config: &AccConfig,
    f: F,
) -> Result<T, StepError>
where
    F: for<'a> FnOnce(&'a WorkingDir) -> BoxFuture<'a, Result<T, WorkdirError>>,
{
    let running = launch(providers, config).await?;
    wd.set_reattach_info(running.reattach_info().clone());

    let result = f(&*wd).await;

    wd.unset_reattach_info();
    let mut shutdown_errors = running.shutdown().await;

    let value = result?;
    if !shutdown_errors.is_empty() {
        for e in shutdown_errors.iter().skip(1) {
            warn!("Provider shutdown error: {}", e);
        }
        return Err(shutdown_errors.swap_remove(0).into());
    }
    Ok(value)
}

/// Current state of the working directory in flat form
pub async fn get_state(
    wd: &mut WorkingDir,
    providers: &ProviderFactories,
    config: &AccConfig,
) -> Result<State, StepError> {
    let json = run_provider_command(wd, providers, config, |wd| Box::pin(wd.state())).await?;
    Ok(shim_state_from_json(&json)?)
}
