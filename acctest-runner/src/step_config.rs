//! Config step: apply a configuration and verify it converges

use acctest_core::plan::{pending_changes, plan_is_empty};
use acctest_workdir::WorkingDir;
use log::{debug, trace, warn};

use crate::error::StepError;
use crate::id_refresh::test_id_refresh;
use crate::provider_command::{get_state, run_provider_command};
use crate::run::StepContext;
use crate::teststep::TestStep;

pub(crate) async fn run_config_step(
    ctx: &StepContext<'_>,
    wd: &mut WorkingDir,
    step: &TestStep,
) -> Result<(), StepError> {
    if !step.destroy {
        taint_resources(ctx, wd, step).await?;
    }

    let merged = ctx.case.merged_config(step);
    wd.set_config(&merged)?;

    // Data sources are only updated by a refresh
    trace!("Running pre-apply refresh");
    run_provider_command(wd, ctx.providers, ctx.acc, |wd| Box::pin(wd.refresh())).await?;

    if !step.plan_only {
        create_plan(ctx, wd, step.destroy).await?;

        // Destroy steps check the state as it was before the destroy
        let state_before_apply = get_state(wd, ctx.providers, ctx.acc).await?;

        trace!("Running apply");
        run_provider_command(wd, ctx.providers, ctx.acc, |wd| Box::pin(wd.apply())).await?;

        let state = get_state(wd, ctx.providers, ctx.acc).await?;

        if let Some(check) = &step.check {
            debug!("Calling TestStep Check");
            let mut checked = if step.destroy {
                state_before_apply
            } else {
                state
            };
            checked.is_binary_driven_test = true;
            check(&checked).map_err(StepError::Check)?;
        }
    }

    // Plan, refresh, plan again: both plans must be empty
    create_plan(ctx, wd, step.destroy).await?;
    let plan = run_provider_command(wd, ctx.providers, ctx.acc, |wd| Box::pin(wd.saved_plan())).await?;
    if !plan_is_empty(&plan) && !step.expect_non_empty_plan {
        let stdout = saved_plan_raw_stdout(ctx, wd).await?;
        warn!("Pending changes after apply: {:?}", pending_changes(&plan));
        return Err(StepError::failed(format!(
            "After applying this test step, the plan was not empty.\nstdout:\n\n{}",
            stdout
        )));
    }

    if !step.plan_only {
        trace!("Running post-apply refresh");
        run_provider_command(wd, ctx.providers, ctx.acc, |wd| Box::pin(wd.refresh())).await?;
    }

    create_plan(ctx, wd, step.destroy).await?;
    let plan = run_provider_command(wd, ctx.providers, ctx.acc, |wd| Box::pin(wd.saved_plan())).await?;
    let empty = plan_is_empty(&plan);
    if !empty && !step.expect_non_empty_plan {
        let stdout = saved_plan_raw_stdout(ctx, wd).await?;
        return Err(StepError::failed(format!(
            "After applying this test step and performing a `terraform refresh`, the plan was not empty.\nstdout\n\n{}",
            stdout
        )));
    }
    if empty && step.expect_non_empty_plan {
        return Err(StepError::failed(
            "Expected a non-empty plan, but got an empty plan",
        ));
    }

    if !ctx.case.id_refresh_name.is_empty() {
        let state = get_state(wd, ctx.providers, ctx.acc).await?;
        if state.is_empty() {
            return Ok(());
        }
        let resource = state
            .root_module()
            .and_then(|m| m.resources.get(&ctx.case.id_refresh_name))
            .cloned();
        if let Some(resource) = resource {
            test_id_refresh(ctx, wd, &merged, &resource)
                .await
                .map_err(|e| StepError::failed(format!("[ERROR] Test: ID-only test failed: {}", e)))?;
        }
    }

    Ok(())
}

async fn create_plan(
    ctx: &StepContext<'_>,
    wd: &mut WorkingDir,
    destroy: bool,
) -> Result<(), StepError> {
    trace!("Creating plan (destroy: {})", destroy);
    if destroy {
        run_provider_command(wd, ctx.providers, ctx.acc, |wd| Box::pin(wd.create_destroy_plan())).await
    } else {
        run_provider_command(wd, ctx.providers, ctx.acc, |wd| Box::pin(wd.create_plan())).await
    }
}

pub(crate) async fn saved_plan_raw_stdout(
    ctx: &StepContext<'_>,
    wd: &mut WorkingDir,
) -> Result<String, StepError> {
    run_provider_command(wd, ctx.providers, ctx.acc, |wd| Box::pin(wd.saved_plan_raw_stdout())).await
}

async fn taint_resources(
    ctx: &StepContext<'_>,
    wd: &mut WorkingDir,
    step: &TestStep,
) -> Result<(), StepError> {
    if step.taint.is_empty() {
        return Ok(());
    }

    let state = get_state(wd, ctx.providers, ctx.acc).await?;
    for address in &step.taint {
        let found = state
            .root_module()
            .is_some_and(|m| m.resources.contains_key(address));
        if !found {
            return Err(StepError::failed(format!(
                "resource {:?} not found in state",
                address
            )));
        }

        warn!("Explicitly tainting resource {:?}", address);
        let address = address.clone();
        run_provider_command(wd, ctx.providers, ctx.acc, move |wd| {
            Box::pin(async move { wd.taint(&address).await })
        })
        .await?;
    }
    Ok(())
}
