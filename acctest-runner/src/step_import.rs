//! ImportState step: import an existing resource and compare it with state

use acctest_core::check::CheckError;
use acctest_core::compare::{difference, import_verify_view};
use acctest_core::state::{InstanceState, State, is_data_source_key};
use acctest_workdir::WorkingDir;
use log::{debug, error, trace};

use crate::error::StepError;
use crate::provider_command::{get_state, run_provider_command};
use crate::run::StepContext;
use crate::teststep::TestStep;

pub(crate) async fn run_import_step(
    ctx: &StepContext<'_>,
    wd: &mut WorkingDir,
    step: &TestStep,
    applied_config: &str,
) -> Result<(), StepError> {
    let config = if step.config.is_empty() {
        trace!("Using last applied config for import");
        applied_config.to_string()
    } else {
        ctx.case.merged_config(step)
    };
    if config.is_empty() {
        return Err(StepError::fatal(
            "Cannot import state with no specified config",
        ));
    }

    let state = get_state(wd, ctx.providers, ctx.acc).await?;
    let import_id = import_id(step, &state)?;
    debug!("Importing {} with ID {}", step.resource_name, import_id);

    if step.import_state_persist {
        let imported = import_into(ctx, wd, step, &config, &import_id).await?;
        verify_import(step, &state, &imported)
    } else {
        let mut import_wd = ctx
            .helper
            .new_working_dir()
            .map_err(|e| StepError::fatal(format!("Error creating import working directory: {}", e)))?;
        let result = match import_into(ctx, &mut import_wd, step, &config, &import_id).await {
            Ok(imported) => verify_import(step, &state, &imported),
            Err(e) => Err(e),
        };
        if let Err(e) = import_wd.close() {
            error!("Unable to clean up import working directory: {}", e);
        }
        result
    }
}

/// Identifier to import, by precedence: id function, literal id, resource ID in state
fn import_id(step: &TestStep, state: &State) -> Result<String, StepError> {
    let id = if let Some(f) = &step.import_state_id_func {
        f(state).map_err(|e| StepError::fatal(e.to_string()))?
    } else if !step.import_state_id.is_empty() {
        step.import_state_id.clone()
    } else {
        let resource = state
            .modules
            .iter()
            .find_map(|m| m.resources.get(&step.resource_name))
            .ok_or_else(|| {
                StepError::fatal(format!(
                    "Resource specified by ResourceName couldn't be found: {}",
                    step.resource_name
                ))
            })?;
        resource
            .primary
            .as_ref()
            .map(|p| p.id.clone())
            .ok_or_else(|| {
                StepError::fatal(format!(
                    "Resource specified by ResourceName has no primary instance: {}",
                    step.resource_name
                ))
            })?
    };

    Ok(format!("{}{}", step.import_state_id_prefix, id))
}

async fn import_into(
    ctx: &StepContext<'_>,
    wd: &mut WorkingDir,
    step: &TestStep,
    config: &str,
    import_id: &str,
) -> Result<State, StepError> {
    wd.set_config(config)
        .map_err(|e| StepError::fatal(format!("Error setting test config: {}", e)))?;

    run_provider_command(wd, ctx.providers, ctx.acc, |wd| Box::pin(wd.init()))
        .await
        .map_err(|e| StepError::fatal(format!("Error running init: {}", e)))?;

    let address = step.resource_name.clone();
    let id = import_id.to_string();
    run_provider_command(wd, ctx.providers, ctx.acc, move |wd| {
        Box::pin(async move { wd.import(&address, &id).await })
    })
    .await?;

    get_state(wd, ctx.providers, ctx.acc).await
}

fn verify_import(step: &TestStep, old: &State, imported: &State) -> Result<(), StepError> {
    let Some(new_module) = imported.root_module() else {
        return Ok(());
    };

    if let Some(check) = &step.import_state_check {
        let instances: Vec<InstanceState> = new_module
            .managed_resources()
            .filter_map(|(_, r)| {
                r.primary.clone().map(|mut is| {
                    is.resource_type = r.resource_type.clone();
                    is
                })
            })
            .collect();
        check(&instances).map_err(|e: CheckError| StepError::fatal(e.to_string()))?;
    }

    if !step.import_state_verify {
        return Ok(());
    }

    let old_resources: Vec<_> = old
        .root_module()
        .map(|m| m.managed_resources().map(|(_, r)| r).collect())
        .unwrap_or_default();

    for (key, new_resource) in new_module.resources.iter() {
        if is_data_source_key(key) {
            continue;
        }
        let Some(new_primary) = &new_resource.primary else {
            continue;
        };

        let old_primary = old_resources
            .iter()
            .filter(|r| {
                r.resource_type == new_resource.resource_type
                    && r.provider == new_resource.provider
            })
            .filter_map(|r| r.primary.as_ref())
            .find(|p| p.id == new_primary.id)
            .ok_or_else(|| {
                StepError::fatal(format!(
                    "Failed state verification, resource with ID {} not found",
                    new_primary.id
                ))
            })?;

        let ignore = &step.import_state_verify_ignore;
        let actual = import_verify_view(&new_primary.attributes, ignore);
        let expected = import_verify_view(&old_primary.attributes, ignore);

        if let Some(diff) = difference(expected, actual) {
            return Err(StepError::failed(format!(
                "ImportStateVerify attributes not equivalent. Difference is shown below. The - symbol indicates attributes missing after import.\n\n{}",
                diff.render()
            )));
        }
    }

    Ok(())
}
