//! In-process stand-ins for the CLI and a provider server

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use acctest_plugin::{PluginError, ProviderFactories, ProviderServer, Shutdown};
use acctest_workdir::{
    CONFIG_FILE, CONFIG_FILE_JSON, CommandOutput, CommandRunner, Invocation, PLAN_FILE,
    WorkdirError,
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;

pub(crate) const RESOURCE_CONFIG: &str = "resource \"example_thing\" \"foo\" {\n  name = \"web\"\n}\n";

/// Holds its listener open until told to stop
pub(crate) struct IdleServer;

#[async_trait]
impl ProviderServer for IdleServer {
    async fn serve(&self, listener: TcpListener, mut shutdown: Shutdown) -> Result<(), PluginError> {
        let _listener = listener;
        shutdown.wait().await;
        Ok(())
    }
}

pub(crate) fn example_providers() -> ProviderFactories {
    ProviderFactories::new().proto_v5("example", || Ok(Arc::new(IdleServer)))
}

/// Simulates one `example_thing.foo` resource per directory
///
/// A configuration mentioning `example_thing` wants the resource to exist.
pub(crate) struct FakeCli {
    pub(crate) remote: Map<String, Value>,
    pub(crate) dirs: Mutex<HashMap<PathBuf, Option<Map<String, Value>>>>,
    pub(crate) calls: Mutex<Vec<(PathBuf, String)>>,
    /// Directories whose resource is marked for replacement
    pub(crate) tainted: Mutex<Vec<PathBuf>>,
    /// Every plan proposes an update
    pub drift: bool,
    pub apply_error: Option<String>,
    /// Attributes the provider cannot read back on import
    pub import_drops: Vec<String>,
}

impl Default for FakeCli {
    fn default() -> Self {
        let remote = json!({"id": "thing-1", "name": "web", "tags": {}});
        Self {
            remote: remote.as_object().cloned().unwrap_or_default(),
            dirs: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            tainted: Mutex::new(Vec::new()),
            drift: false,
            apply_error: None,
            import_drops: Vec::new(),
        }
    }
}

impl FakeCli {
    pub(crate) fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, args)| args.clone())
            .collect()
    }

    /// Directories `subcommand` ran in, in call order
    pub(crate) fn dirs_of(&self, subcommand: &str) -> Vec<PathBuf> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, args)| args.split(' ').next() == Some(subcommand))
            .map(|(dir, _)| dir.clone())
            .collect()
    }

    fn is_tainted(&self, dir: &Path) -> bool {
        self.tainted.lock().unwrap().iter().any(|d| d == dir)
    }

    pub(crate) fn count(&self, subcommand: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.split(' ').next() == Some(subcommand))
            .count()
    }

    /// Whether any directory still holds the resource
    pub(crate) fn has_resources(&self) -> bool {
        self.dirs.lock().unwrap().values().any(Option::is_some)
    }

    fn current(&self, dir: &Path) -> Option<Map<String, Value>> {
        self.dirs.lock().unwrap().get(dir).cloned().flatten()
    }

    fn set_current(&self, dir: &Path, resource: Option<Map<String, Value>>) {
        self.dirs.lock().unwrap().insert(dir.to_path_buf(), resource);
    }

    fn wants_resource(dir: &Path) -> bool {
        [CONFIG_FILE, CONFIG_FILE_JSON]
            .iter()
            .filter_map(|f| std::fs::read_to_string(dir.join(f)).ok())
            .any(|c| c.contains("example_thing"))
    }

    fn failed(invocation: &Invocation, stderr: &str) -> WorkdirError {
        WorkdirError::CommandFailed {
            command: invocation.subcommand().to_string(),
            status: "exit status: 1".to_string(),
            stderr: stderr.to_string(),
        }
    }

    fn plan(&self, invocation: &Invocation) -> Value {
        let current = self.current(&invocation.dir);
        let action = if invocation.has_arg("-destroy") {
            current.as_ref().map(|_| "delete")
        } else {
            match (Self::wants_resource(&invocation.dir), &current) {
                (true, None) => Some("create"),
                (false, Some(_)) => Some("delete"),
                (true, Some(_)) if self.is_tainted(&invocation.dir) => Some("replace"),
                (true, Some(_)) if self.drift => Some("update"),
                (true, Some(_)) => Some("no-op"),
                (false, None) => None,
            }
        };

        let changes: Vec<Value> = action
            .map(|a| {
                let actions = match a {
                    "replace" => json!(["delete", "create"]),
                    a => json!([a]),
                };
                json!({
                    "address": "example_thing.foo",
                    "mode": "managed",
                    "type": "example_thing",
                    "name": "foo",
                    "provider_name": "registry.terraform.io/hashicorp/example",
                    "change": {"actions": actions},
                })
            })
            .into_iter()
            .collect();
        json!({"format_version": "1.1", "resource_changes": changes})
    }

    fn state(&self, dir: &Path) -> Value {
        match self.current(dir) {
            None => json!({"format_version": "1.0", "terraform_version": "1.5.0"}),
            Some(values) => json!({
                "format_version": "1.0",
                "terraform_version": "1.5.0",
                "values": {
                    "root_module": {
                        "resources": [{
                            "address": "example_thing.foo",
                            "mode": "managed",
                            "type": "example_thing",
                            "name": "foo",
                            "provider_name": "registry.terraform.io/hashicorp/example",
                            "values": values,
                        }]
                    }
                }
            }),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeCli {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, WorkdirError> {
        self.calls
            .lock()
            .unwrap()
            .push((invocation.dir.clone(), invocation.args.join(" ")));
        let dir = &invocation.dir;
        let plan_file = dir.join(PLAN_FILE);

        match invocation.subcommand() {
            "plan" => {
                std::fs::write(&plan_file, self.plan(invocation).to_string()).unwrap();
                Ok(CommandOutput::default())
            }
            "apply" => {
                if let Some(message) = &self.apply_error {
                    return Err(Self::failed(invocation, message));
                }
                let plan: Value =
                    serde_json::from_str(&std::fs::read_to_string(&plan_file).unwrap()).unwrap();
                let actions: Vec<&str> = plan["resource_changes"][0]["change"]["actions"]
                    .as_array()
                    .map(|a| a.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                if actions.iter().any(|a| *a == "create" || *a == "update") {
                    self.set_current(dir, Some(self.remote.clone()));
                    self.tainted.lock().unwrap().retain(|d| d != dir);
                } else if actions.contains(&"delete") {
                    self.set_current(dir, None);
                }
                Ok(CommandOutput::default())
            }
            "destroy" => {
                self.set_current(dir, None);
                Ok(CommandOutput::default())
            }
            "taint" => {
                if self.current(dir).is_none() {
                    return Err(Self::failed(invocation, "No such resource instance"));
                }
                self.tainted.lock().unwrap().push(dir.clone());
                Ok(CommandOutput::default())
            }
            "import" => {
                let id = invocation.args.last().cloned().unwrap_or_default();
                if self.remote.get("id").and_then(Value::as_str) != Some(id.as_str()) {
                    return Err(Self::failed(
                        invocation,
                        "Cannot import non-existent remote object",
                    ));
                }
                let mut imported = self.remote.clone();
                for key in &self.import_drops {
                    imported.remove(key);
                }
                self.set_current(dir, Some(imported));
                Ok(CommandOutput::default())
            }
            "show" if invocation.has_arg(PLAN_FILE) => {
                let plan = std::fs::read_to_string(&plan_file).unwrap();
                if invocation.has_arg("-json") {
                    Ok(CommandOutput::stdout(plan))
                } else {
                    Ok(CommandOutput::stdout(format!("Terraform will perform the following actions:\n{}", plan)))
                }
            }
            "show" => Ok(CommandOutput::stdout(self.state(dir).to_string())),
            _ => Ok(CommandOutput::default()),
        }
    }
}
