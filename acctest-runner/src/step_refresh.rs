//! RefreshState step: refresh without applying and check the result

use acctest_core::plan::plan_is_empty;
use acctest_workdir::WorkingDir;
use log::debug;

use crate::error::StepError;
use crate::provider_command::{get_state, run_provider_command};
use crate::run::StepContext;
use crate::step_config::saved_plan_raw_stdout;
use crate::teststep::TestStep;

pub(crate) async fn run_refresh_step(
    ctx: &StepContext<'_>,
    wd: &mut WorkingDir,
    step: &TestStep,
) -> Result<(), StepError> {
    run_provider_command(wd, ctx.providers, ctx.acc, |wd| Box::pin(wd.refresh())).await?;

    let mut state = get_state(wd, ctx.providers, ctx.acc).await?;

    if let Some(check) = &step.check {
        debug!("Calling TestStep Check for RefreshState");
        state.is_binary_driven_test = true;
        check(&state).map_err(|e| StepError::fatal(e.to_string()))?;
    }

    run_provider_command(wd, ctx.providers, ctx.acc, |wd| Box::pin(wd.create_plan())).await?;
    let plan = run_provider_command(wd, ctx.providers, ctx.acc, |wd| Box::pin(wd.saved_plan())).await?;

    if !plan_is_empty(&plan) && !step.expect_non_empty_plan {
        let stdout = saved_plan_raw_stdout(ctx, wd).await?;
        return Err(StepError::failed(format!(
            "After refreshing state during this test step, a followup plan was not empty.\nstdout:\n\n{}",
            stdout
        )));
    }

    Ok(())
}
