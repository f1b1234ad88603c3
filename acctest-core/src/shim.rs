//! Conversion of the CLI's JSON state into the legacy flat state
//!
//! Every scalar becomes one key. Lists contribute `prefix.N` entries plus a
//! `prefix.#` count, maps contribute `prefix.key` entries plus a `prefix.%`
//! count. `null` values are omitted but still counted by their parent map.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::state::{
    InstanceState, OutputState, ROOT_MODULE, ResourceMode, ResourceState, ResourceStateKey, State,
};
use crate::tfjson::{
    DATA_RESOURCE_MODE, JsonState, MANAGED_RESOURCE_MODE, StateModule, StateOutput, StateResource,
};

/// Errors raised while shimming a JSON state
#[derive(Debug, Error)]
pub enum ShimError {
    #[error("Modules are not supported. Found {0} modules.")]
    ChildModules(usize),

    #[error("unexpected resource mode {mode:?} for {address:?}")]
    UnexpectedMode { address: String, mode: String },

    #[error("unexpected index value ({index}) for {address:?}")]
    UnexpectedIndex { address: String, index: String },

    #[error("no \"id\" found in attributes of {0:?}")]
    MissingId(String),

    #[error("unexpected element type in output {name:?}: {found}")]
    UnexpectedOutputElement { name: String, found: &'static str },

    #[error("unexpected type in output {name:?}: {found}")]
    UnexpectedOutputType { name: String, found: &'static str },
}

/// Convert a JSON state document into the legacy flat state
pub fn shim_state_from_json(json: &JsonState) -> Result<State, ShimError> {
    let mut state = State::new();
    state.terraform_version = json.terraform_version.clone();

    let Some(values) = &json.values else {
        return Ok(state);
    };

    for (name, output) in &values.outputs {
        let shimmed = shim_output_state(name, output)?;
        state
            .root_module_mut()
            .outputs
            .insert(name.clone(), shimmed);
    }

    shim_state_module(&mut state, &values.root_module)?;

    Ok(state)
}

fn shim_output_state(name: &str, output: &StateOutput) -> Result<OutputState, ShimError> {
    let (output_type, value) = match &output.value {
        Value::String(_) => ("string", output.value.clone()),
        Value::Bool(b) => ("string", Value::String(b.to_string())),
        Value::Number(n) => ("string", Value::String(n.to_string())),
        Value::Object(_) => ("map", output.value.clone()),
        Value::Array(elements) => {
            if let Some(Value::Null) = elements.first() {
                return Err(ShimError::UnexpectedOutputElement {
                    name: name.to_string(),
                    found: "null",
                });
            }
            ("list", output.value.clone())
        }
        Value::Null => {
            return Err(ShimError::UnexpectedOutputType {
                name: name.to_string(),
                found: "null",
            });
        }
    };

    Ok(OutputState {
        sensitive: output.sensitive,
        output_type: output_type.to_string(),
        value,
    })
}

fn shim_state_module(state: &mut State, module: &StateModule) -> Result<(), ShimError> {
    let path = module_path(&module.address);
    let shimmed = state.add_module(path);

    for resource in &module.resources {
        let resource_state = shim_resource_state(resource)?;
        let key = shim_resource_state_key(resource)?;
        shimmed.resources.insert(key.to_string(), resource_state);
    }

    if !module.child_modules.is_empty() {
        return Err(ShimError::ChildModules(module.child_modules.len()));
    }

    Ok(())
}

/// Module path from a module address such as `module.a.module.b`
fn module_path(address: &str) -> Vec<String> {
    let mut path = vec![ROOT_MODULE.to_string()];
    path.extend(
        address
            .split('.')
            .filter(|part| !part.is_empty() && *part != "module")
            .map(str::to_string),
    );
    path
}

/// Key under which a JSON resource is stored in its module
pub fn shim_resource_state_key(resource: &StateResource) -> Result<ResourceStateKey, ShimError> {
    let mode = match resource.mode.as_str() {
        MANAGED_RESOURCE_MODE => ResourceMode::Managed,
        DATA_RESOURCE_MODE => ResourceMode::Data,
        other => {
            return Err(ShimError::UnexpectedMode {
                address: resource.address.clone(),
                mode: other.to_string(),
            });
        }
    };

    // String (for_each) keys are not representable in the legacy key
    let index = match &resource.index {
        Some(Value::Number(n)) => Some(n.as_i64().ok_or_else(|| ShimError::UnexpectedIndex {
            address: resource.address.clone(),
            index: n.to_string(),
        })?),
        _ => None,
    };

    Ok(ResourceStateKey {
        mode,
        resource_type: resource.resource_type.clone(),
        name: resource.name.clone(),
        index,
    })
}

/// Flatten one JSON resource into a legacy resource state
pub fn shim_resource_state(resource: &StateResource) -> Result<ResourceState, ShimError> {
    let attributes = Flatmap::from_map(&resource.attribute_values).into_inner();

    let Some(id) = attributes.get("id").cloned() else {
        return Err(ShimError::MissingId(resource.address.clone()));
    };

    Ok(ResourceState {
        resource_type: resource.resource_type.clone(),
        provider: resource.provider_name.clone(),
        dependencies: resource.depends_on.clone(),
        primary: Some(InstanceState {
            id,
            attributes,
            schema_version: resource.schema_version,
            tainted: resource.tainted,
            resource_type: resource.resource_type.clone(),
        }),
    })
}

/// Builder for flat attribute maps
#[derive(Debug, Default)]
pub struct Flatmap {
    entries: BTreeMap<String, String>,
}

impl Flatmap {
    /// Flatten a top-level attribute object
    pub fn from_map(attributes: &Map<String, Value>) -> Self {
        let mut flatmap = Self::default();
        flatmap.add_map("", attributes);
        flatmap
    }

    fn add_map(&mut self, prefix: &str, map: &Map<String, Value>) {
        for (key, value) in map {
            let k = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            self.add_entry(k, value);
        }

        let length_key = if prefix.is_empty() {
            "%".to_string()
        } else {
            format!("{}.%", prefix)
        };
        self.entries.insert(length_key, map.len().to_string());
    }

    fn add_slice(&mut self, name: &str, elements: &[Value]) {
        for (i, element) in elements.iter().enumerate() {
            self.add_entry(format!("{}.{}", name, i), element);
        }
        self.entries
            .insert(format!("{}.#", name), elements.len().to_string());
    }

    fn add_entry(&mut self, key: String, value: &Value) {
        match value {
            Value::Null => {}
            Value::Bool(b) => {
                self.entries.insert(key, b.to_string());
            }
            // Display keeps the original text of the number
            Value::Number(n) => {
                self.entries.insert(key, n.to_string());
            }
            Value::String(s) => {
                self.entries.insert(key, s.clone());
            }
            Value::Object(map) => self.add_map(&key, map),
            Value::Array(elements) => self.add_slice(&key, elements),
        }
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.entries
    }
}
