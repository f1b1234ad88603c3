//! Base directory and CLI shared by the working directories of one test

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use acctest_core::env::AccConfig;
use log::{debug, warn};
use uuid::Uuid;

use crate::WorkdirError;
use crate::runner::{CommandRunner, ProcessRunner};
use crate::working_dir::WorkingDir;

/// Environment set on every CLI invocation
pub(crate) fn automation_env() -> BTreeMap<String, String> {
    [
        ("TF_IN_AUTOMATION", "1"),
        ("CHECKPOINT_DISABLE", "1"),
        ("TF_DISABLE_PLUGIN_TLS", "1"),
        ("TF_SKIP_PROVIDER_VERIFY", "1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Owns a base temp directory and hands out working directories inside it
pub struct Helper {
    base_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
    env: BTreeMap<String, String>,
    persist: bool,
}

impl Helper {
    /// Helper running the real CLI
    pub fn from_config(config: &AccConfig, test_name: &str) -> Result<Self, WorkdirError> {
        let runner = ProcessRunner::locate(config)?;
        Self::with_runner(config, test_name, Arc::new(runner))
    }

    /// Helper running commands through `runner`
    pub fn with_runner(
        config: &AccConfig,
        test_name: &str,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, WorkdirError> {
        let parent = config.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
        let base_dir = parent.join(format!("plugintest-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&base_dir)
            .map_err(|e| WorkdirError::io("failed to create base directory", &base_dir, e))?;
        debug!("Created base directory {}", base_dir.display());

        let mut env = automation_env();
        env.extend(config.cli_env(test_name));

        Ok(Self {
            base_dir,
            runner,
            env,
            persist: config.persist_working_dir,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create an empty working directory under the base directory
    pub fn new_working_dir(&self) -> Result<WorkingDir, WorkdirError> {
        let dir = self.base_dir.join(format!("work{}", Uuid::new_v4().simple()));
        std::fs::create_dir_all(&dir)
            .map_err(|e| WorkdirError::io("failed to create working directory", &dir, e))?;
        debug!("Created working directory {}", dir.display());

        Ok(WorkingDir::new(
            dir,
            Arc::clone(&self.runner),
            self.env.clone(),
            self.persist,
        ))
    }

    /// Remove the base directory unless working directories are persisted
    pub fn close(&self) -> Result<(), WorkdirError> {
        if self.persist {
            warn!("Persisting base directory {}", self.base_dir.display());
            return Ok(());
        }
        if self.base_dir.exists() {
            std::fs::remove_dir_all(&self.base_dir)
                .map_err(|e| WorkdirError::io("failed to remove", &self.base_dir, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, Invocation};
    use async_trait::async_trait;

    struct NoopRunner;

    #[async_trait]
    impl CommandRunner for NoopRunner {
        async fn run(&self, _invocation: &Invocation) -> Result<CommandOutput, WorkdirError> {
            Ok(CommandOutput::default())
        }
    }

    fn config(temp: &Path, persist: bool) -> AccConfig {
        AccConfig {
            temp_dir: Some(temp.to_path_buf()),
            persist_working_dir: persist,
            ..Default::default()
        }
    }

    #[test]
    fn close_removes_base_dir() {
        let temp = tempfile::tempdir().unwrap();
        let helper = Helper::with_runner(&config(temp.path(), false), "t", Arc::new(NoopRunner)).unwrap();
        assert!(helper.base_dir().starts_with(temp.path()));

        let wd = helper.new_working_dir().unwrap();
        assert!(wd.path().starts_with(helper.base_dir()));
        assert!(wd.path().is_dir());

        helper.close().unwrap();
        assert!(!helper.base_dir().exists());
    }

    #[test]
    fn close_keeps_persisted_dirs() {
        let temp = tempfile::tempdir().unwrap();
        let helper = Helper::with_runner(&config(temp.path(), true), "t", Arc::new(NoopRunner)).unwrap();
        helper.close().unwrap();
        assert!(helper.base_dir().exists());
    }
}
