//! A scratch directory holding one test's configuration, state and plan

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use acctest_core::reattach::{ENV_REATTACH_PROVIDERS, ReattachInfo};
use acctest_core::tfjson::{JsonPlan, JsonState, ProviderSchemas};
use log::{debug, trace, warn};
use serde::de::DeserializeOwned;

use crate::runner::{CommandOutput, CommandRunner, Invocation};
use crate::{CONFIG_FILE, CONFIG_FILE_JSON, PLAN_FILE, STATE_FILE, WorkdirError};

pub struct WorkingDir {
    dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
    env: BTreeMap<String, String>,
    /// File the last configuration was written to
    config_file: Option<PathBuf>,
    reattach_info: Option<ReattachInfo>,
    persist: bool,
}

impl WorkingDir {
    pub(crate) fn new(
        dir: PathBuf,
        runner: Arc<dyn CommandRunner>,
        env: BTreeMap<String, String>,
        persist: bool,
    ) -> Self {
        Self {
            dir,
            runner,
            env,
            config_file: None,
            reattach_info: None,
            persist,
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Replace the configuration; any saved plan is discarded
    ///
    /// Text that parses as JSON is written in JSON syntax, anything else as
    /// native syntax. Only one of the two files exists at a time.
    pub fn set_config(&mut self, config: &str) -> Result<(), WorkdirError> {
        let is_json = serde_json::from_str::<serde_json::Value>(config).is_ok();
        let (name, other) = if is_json {
            (CONFIG_FILE_JSON, CONFIG_FILE)
        } else {
            (CONFIG_FILE, CONFIG_FILE_JSON)
        };

        remove_if_exists(&self.dir.join(other))?;

        let path = self.dir.join(name);
        std::fs::write(&path, config)
            .map_err(|e| WorkdirError::io("failed to write config", &path, e))?;
        trace!("Wrote config to {}", path.display());
        self.config_file = Some(path);

        self.clear_plan()
    }

    pub fn clear_plan(&self) -> Result<(), WorkdirError> {
        remove_if_exists(&self.dir.join(PLAN_FILE))
    }

    pub fn clear_state(&self) -> Result<(), WorkdirError> {
        remove_if_exists(&self.dir.join(STATE_FILE))
    }

    pub fn has_saved_plan(&self) -> bool {
        self.dir.join(PLAN_FILE).exists()
    }

    /// Reattach records passed to subsequent commands
    pub fn set_reattach_info(&mut self, info: ReattachInfo) {
        self.reattach_info = Some(info);
    }

    pub fn unset_reattach_info(&mut self) {
        self.reattach_info = None;
    }

    fn invocation(&self, args: &[&str]) -> Result<Invocation, WorkdirError> {
        let mut env = self.env.clone();
        if let Some(info) = &self.reattach_info {
            let value = info.to_env_value().map_err(WorkdirError::Reattach)?;
            env.insert(ENV_REATTACH_PROVIDERS.to_string(), value);
        }
        Ok(Invocation {
            dir: self.dir.clone(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env,
        })
    }

    async fn run(&self, args: &[&str]) -> Result<CommandOutput, WorkdirError> {
        let invocation = self.invocation(args)?;
        trace!("terraform {}", invocation.args.join(" "));
        self.runner.run(&invocation).await
    }

    async fn run_json<T: DeserializeOwned>(&self, args: &[&str], what: &str) -> Result<T, WorkdirError> {
        let output = self.run(args).await?;
        serde_json::from_str(&output.stdout).map_err(|source| WorkdirError::Json {
            what: what.to_string(),
            source,
        })
    }

    pub async fn init(&self) -> Result<(), WorkdirError> {
        match &self.config_file {
            Some(path) if path.exists() => {}
            _ => return Err(WorkdirError::ConfigNotSet),
        }
        debug!("Running terraform init in {}", self.dir.display());
        self.run(&["init", "-no-color", "-input=false", "-upgrade=true"])
            .await?;
        Ok(())
    }

    /// Save a plan for the current configuration
    pub async fn create_plan(&self) -> Result<(), WorkdirError> {
        self.run(&[
            "plan",
            "-no-color",
            "-input=false",
            "-refresh=false",
            "-out=tfplan",
        ])
        .await?;
        Ok(())
    }

    /// Save a plan that destroys everything in state
    pub async fn create_destroy_plan(&self) -> Result<(), WorkdirError> {
        self.run(&[
            "plan",
            "-no-color",
            "-input=false",
            "-refresh=false",
            "-out=tfplan",
            "-destroy",
        ])
        .await?;
        Ok(())
    }

    /// Apply the saved plan, creating one first if there is none
    pub async fn apply(&self) -> Result<(), WorkdirError> {
        if !self.has_saved_plan() {
            self.create_plan().await?;
        }
        self.run(&[
            "apply",
            "-no-color",
            "-input=false",
            "-auto-approve",
            "-refresh=false",
            PLAN_FILE,
        ])
        .await?;
        self.clear_plan()
    }

    pub async fn destroy(&self) -> Result<(), WorkdirError> {
        self.run(&[
            "destroy",
            "-no-color",
            "-input=false",
            "-auto-approve",
            "-refresh=false",
        ])
        .await?;
        Ok(())
    }

    pub async fn refresh(&self) -> Result<(), WorkdirError> {
        self.run(&["refresh", "-no-color", "-input=false"]).await?;
        Ok(())
    }

    pub async fn import(&self, address: &str, id: &str) -> Result<(), WorkdirError> {
        let config_dir = format!("-config={}", self.dir.display());
        self.run(&[
            "import",
            "-no-color",
            "-input=false",
            &config_dir,
            address,
            id,
        ])
        .await?;
        Ok(())
    }

    pub async fn taint(&self, address: &str) -> Result<(), WorkdirError> {
        self.run(&["taint", "-no-color", address]).await?;
        Ok(())
    }

    /// Current state as reported by `show -json`
    pub async fn state(&self) -> Result<JsonState, WorkdirError> {
        self.run_json(&["show", "-json", "-no-color"], "state").await
    }

    pub async fn saved_plan(&self) -> Result<JsonPlan, WorkdirError> {
        self.run_json(&["show", "-json", "-no-color", PLAN_FILE], "plan")
            .await
    }

    /// Human-readable rendering of the saved plan
    pub async fn saved_plan_raw_stdout(&self) -> Result<String, WorkdirError> {
        let output = self.run(&["show", "-no-color", PLAN_FILE]).await?;
        Ok(output.stdout)
    }

    pub async fn schemas(&self) -> Result<ProviderSchemas, WorkdirError> {
        self.run_json(&["providers", "schema", "-json", "-no-color"], "provider schemas")
            .await
    }

    /// Remove the directory unless working directories are persisted
    pub fn close(&self) -> Result<(), WorkdirError> {
        if self.persist {
            warn!("Persisting working directory {}", self.dir.display());
            return Ok(());
        }
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)
                .map_err(|e| WorkdirError::io("failed to remove", &self.dir, e))?;
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<(), WorkdirError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(WorkdirError::io("failed to remove", path, e)),
    }
}
