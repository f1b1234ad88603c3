//! Seam between working directories and the CLI subprocess

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use acctest_core::env::AccConfig;
use async_trait::async_trait;
use log::{debug, trace, warn};

use crate::WorkdirError;

/// One CLI invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub dir: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Invocation {
    /// First argument, e.g. `plan` or `show`
    pub fn subcommand(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Runs CLI invocations
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion; a non-zero exit is an error
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, WorkdirError>;
}

/// Runs the real CLI binary
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    exec_path: PathBuf,
}

impl ProcessRunner {
    pub fn new(exec_path: impl Into<PathBuf>) -> Self {
        Self {
            exec_path: exec_path.into(),
        }
    }

    /// Use `TF_ACC_TERRAFORM_PATH`, or find `terraform` on `PATH`
    pub fn locate(config: &AccConfig) -> Result<Self, WorkdirError> {
        if let Some(path) = &config.terraform_path {
            if !path.exists() {
                return Err(WorkdirError::CliNotFound(format!(
                    "{} does not exist",
                    path.display()
                )));
            }
            return Ok(Self::new(path.clone()));
        }

        let path = which::which("terraform").map_err(|e| {
            WorkdirError::CliNotFound(format!(
                "terraform not found in PATH: {}. Set TF_ACC_TERRAFORM_PATH to point at the binary",
                e
            ))
        })?;
        debug!("Using terraform binary at: {:?}", path);
        Ok(Self::new(path))
    }

    pub fn exec_path(&self) -> &Path {
        &self.exec_path
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, WorkdirError> {
        let command = invocation.args.join(" ");
        trace!("Running terraform {} in {}", command, invocation.dir.display());

        let output = tokio::process::Command::new(&self.exec_path)
            .args(&invocation.args)
            .current_dir(&invocation.dir)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| WorkdirError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            warn!("terraform {} exited with {}", command, output.status);
            return Err(WorkdirError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}
