//! ID-only refresh test
//!
//! Refreshing a resource against a configuration that no longer declares it
//! must read back the same attributes the apply produced.

use acctest_core::compare::{difference, remove_prefixed};
use acctest_core::state::ResourceState;
use acctest_workdir::WorkingDir;
use log::debug;

use crate::error::StepError;
use crate::provider_command::{get_state, run_provider_command};
use crate::run::StepContext;

pub(crate) async fn test_id_refresh(
    ctx: &StepContext<'_>,
    wd: &mut WorkingDir,
    step_config: &str,
    expected: &ResourceState,
) -> Result<(), StepError> {
    let name = &ctx.case.id_refresh_name;
    debug!("Running ID-only refresh for {}", name);

    wd.set_config(&ctx.case.provider_config(false))
        .map_err(|e| StepError::fatal(format!("Error setting import test config: {}", e)))?;

    let result = refresh_and_compare(ctx, wd, expected).await;

    wd.set_config(step_config)
        .map_err(|e| StepError::fatal(format!("Error resetting test config: {}", e)))?;

    result
}

async fn refresh_and_compare(
    ctx: &StepContext<'_>,
    wd: &mut WorkingDir,
    expected: &ResourceState,
) -> Result<(), StepError> {
    let name = &ctx.case.id_refresh_name;

    run_provider_command(wd, ctx.providers, ctx.acc, |wd| Box::pin(wd.refresh()))
        .await
        .map_err(|e| StepError::fatal(format!("Error running terraform refresh: {}", e)))?;
    let state = get_state(wd, ctx.providers, ctx.acc).await?;

    let actual = state
        .root_module()
        .and_then(|m| m.resources.get(name))
        .ok_or_else(|| StepError::failed("Resource gone!"))?;
    let actual = actual
        .primary
        .as_ref()
        .ok_or_else(|| StepError::failed("Resource has no primary instance"))?;
    let expected = expected
        .primary
        .as_ref()
        .ok_or_else(|| StepError::failed("Resource has no primary instance"))?;

    let mut actual = actual.attributes.clone();
    let mut expected = expected.attributes.clone();
    remove_prefixed(&mut actual, &ctx.case.id_refresh_ignore);
    remove_prefixed(&mut expected, &ctx.case.id_refresh_ignore);

    match difference(expected, actual) {
        None => Ok(()),
        Some(diff) => Err(StepError::failed(format!(
            "Attributes not equivalent. Difference is shown below. The - symbol indicates expected attributes, the + symbol actual ones.\n\n{}",
            diff.render()
        ))),
    }
}
