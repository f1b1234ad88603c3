//! Acctest Workdir
//!
//! Scratch directories holding a configuration, state and saved plan, and the
//! CLI invocations that operate on them.

pub mod helper;
pub mod runner;
pub mod working_dir;

use std::path::Path;

pub use helper::Helper;
pub use runner::{CommandOutput, CommandRunner, Invocation, ProcessRunner};
pub use working_dir::WorkingDir;

pub const CONFIG_FILE: &str = "terraform_plugin_test.tf";
pub const CONFIG_FILE_JSON: &str = "terraform_plugin_test.tf.json";
pub const PLAN_FILE: &str = "tfplan";
pub const STATE_FILE: &str = "terraform.tfstate";

#[derive(Debug, thiserror::Error)]
pub enum WorkdirError {
    #[error("must call SetConfig before Init")]
    ConfigNotSet,

    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    #[error("unable to locate terraform CLI: {0}")]
    CliNotFound(String),

    #[error("failed to run terraform {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("terraform {command} failed ({status}):\n{stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("failed to parse {what}: {source}")]
    Json {
        what: String,
        source: serde_json::Error,
    },

    #[error("failed to encode reattach info: {0}")]
    Reattach(serde_json::Error),
}

impl WorkdirError {
    pub(crate) fn io(context: impl Into<String>, path: &Path, source: std::io::Error) -> Self {
        WorkdirError::Io {
            context: format!("{} {}", context.into(), path.display()),
            source,
        }
    }
}
