//! Legacy flat state handed to check functions
//!
//! Nested attribute values are flattened into string keys (`tags.Name`,
//! `ports.0`) with `.#` and `.%` sentinel keys holding list and map lengths.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

/// First element of every module path
pub const ROOT_MODULE: &str = "root";

/// Flat attribute map of one resource instance
pub type Attributes = BTreeMap<String, String>;

/// Snapshot of everything the CLI tracks, in flat form
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    /// Version of the CLI that produced the state
    pub terraform_version: String,
    pub modules: Vec<ModuleState>,
    /// True when the state came from a CLI run rather than a hand-built value
    pub is_binary_driven_test: bool,
}

impl State {
    /// Create a state holding only an empty root module
    pub fn new() -> Self {
        Self {
            terraform_version: String::new(),
            modules: vec![ModuleState::new(vec![ROOT_MODULE.to_string()])],
            is_binary_driven_test: false,
        }
    }

    pub fn root_module(&self) -> Option<&ModuleState> {
        self.modules.iter().find(|m| m.is_root())
    }

    /// Root module, created if missing
    pub fn root_module_mut(&mut self) -> &mut ModuleState {
        self.add_module(vec![ROOT_MODULE.to_string()])
    }

    pub fn module_by_path(&self, path: &[String]) -> Option<&ModuleState> {
        self.modules.iter().find(|m| m.path == path)
    }

    /// Add a module at `path`, returning the existing one if already present
    pub fn add_module(&mut self, path: Vec<String>) -> &mut ModuleState {
        match self.modules.iter().position(|m| m.path == path) {
            Some(pos) => &mut self.modules[pos],
            None => {
                self.modules.push(ModuleState::new(path));
                let last = self.modules.len() - 1;
                &mut self.modules[last]
            }
        }
    }

    /// Returns true if any module holds a resource
    pub fn has_resources(&self) -> bool {
        self.modules.iter().any(|m| !m.resources.is_empty())
    }

    /// Returns true if there is nothing left to destroy
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty() || !self.has_resources()
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// Resources and outputs of one module
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleState {
    pub path: Vec<String>,
    pub outputs: BTreeMap<String, OutputState>,
    /// Keyed by [`ResourceStateKey`] in its string form
    pub resources: BTreeMap<String, ResourceState>,
}

impl ModuleState {
    pub fn new(path: Vec<String>) -> Self {
        Self {
            path,
            outputs: BTreeMap::new(),
            resources: BTreeMap::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.path.len() == 1 && self.path[0] == ROOT_MODULE
    }

    /// Module address as written in configuration (`module.a.module.b`)
    pub fn address(&self) -> String {
        self.path
            .iter()
            .skip(1)
            .map(|p| format!("module.{}", p))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Managed resources only, skipping data sources
    pub fn managed_resources(&self) -> impl Iterator<Item = (&String, &ResourceState)> {
        self.resources
            .iter()
            .filter(|(key, _)| !is_data_source_key(key))
    }
}

/// Value of a root module output
#[derive(Debug, Clone, PartialEq)]
pub struct OutputState {
    pub sensitive: bool,
    /// "string", "list" or "map"
    pub output_type: String,
    pub value: Value,
}

impl OutputState {
    /// String value of the output, if it is a string
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState {
    pub resource_type: String,
    /// Fully qualified provider address
    pub provider: String,
    pub dependencies: Vec<String>,
    pub primary: Option<InstanceState>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceState {
    pub id: String,
    pub attributes: Attributes,
    pub schema_version: u64,
    pub tainted: bool,
    /// Resource type, carried so that import checks can see it
    pub resource_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceMode {
    Managed,
    Data,
}

/// Key of a resource inside a module (`data.type.name.index`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceStateKey {
    pub mode: ResourceMode,
    pub resource_type: String,
    pub name: String,
    /// Only set for numeric (`count`) instances
    pub index: Option<i64>,
}

impl fmt::Display for ResourceStateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mode == ResourceMode::Data {
            write!(f, "data.")?;
        }
        write!(f, "{}.{}", self.resource_type, self.name)?;
        if let Some(index) = self.index {
            write!(f, ".{}", index)?;
        }
        Ok(())
    }
}

/// Returns true if a module resource key belongs to a data source
pub fn is_data_source_key(key: &str) -> bool {
    key.starts_with("data.")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(id: &str) -> ResourceState {
        ResourceState {
            resource_type: "example_thing".to_string(),
            provider: "registry.terraform.io/hashicorp/example".to_string(),
            dependencies: vec![],
            primary: Some(InstanceState {
                id: id.to_string(),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn new_state_is_empty() {
        let state = State::new();
        assert!(state.root_module().is_some());
        assert!(!state.has_resources());
        assert!(state.is_empty());
    }

    #[test]
    fn state_with_resource_is_not_empty() {
        let mut state = State::new();
        state
            .root_module_mut()
            .resources
            .insert("example_thing.foo".to_string(), resource("abc"));
        assert!(state.has_resources());
        assert!(!state.is_empty());
    }

    #[test]
    fn add_module_returns_existing() {
        let mut state = State::new();
        let path = vec![ROOT_MODULE.to_string(), "child".to_string()];
        state.add_module(path.clone());
        state.add_module(path.clone());
        assert_eq!(state.modules.len(), 2);
        assert_eq!(state.module_by_path(&path).unwrap().address(), "module.child");
    }

    #[test]
    fn resource_state_key_display() {
        let managed = ResourceStateKey {
            mode: ResourceMode::Managed,
            resource_type: "example_thing".to_string(),
            name: "foo".to_string(),
            index: None,
        };
        assert_eq!(managed.to_string(), "example_thing.foo");

        let data = ResourceStateKey {
            mode: ResourceMode::Data,
            resource_type: "example_thing".to_string(),
            name: "bar".to_string(),
            index: Some(2),
        };
        assert_eq!(data.to_string(), "data.example_thing.bar.2");
        assert!(is_data_source_key(&data.to_string()));
    }

    #[test]
    fn managed_resources_skip_data_sources() {
        let mut module = ModuleState::new(vec![ROOT_MODULE.to_string()]);
        module
            .resources
            .insert("example_thing.foo".to_string(), resource("a"));
        module
            .resources
            .insert("data.example_thing.foo".to_string(), resource("b"));

        let keys: Vec<_> = module.managed_resources().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["example_thing.foo"]);
    }
}
