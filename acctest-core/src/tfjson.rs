//! JSON documents emitted by the CLI's `show -json` and `providers schema -json`
//!
//! Only the fields the test driver reads are modelled. Attribute values stay
//! as `serde_json::Value` so that numbers keep their exact textual form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Resource mode of a managed resource
pub const MANAGED_RESOURCE_MODE: &str = "managed";
/// Resource mode of a data source
pub const DATA_RESOURCE_MODE: &str = "data";

/// Output of `show -json` without a plan file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonState {
    #[serde(default)]
    pub format_version: String,
    #[serde(default)]
    pub terraform_version: String,
    /// Absent when the state holds nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<StateValues>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateValues {
    #[serde(default)]
    pub outputs: BTreeMap<String, StateOutput>,
    #[serde(default)]
    pub root_module: StateModule,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateOutput {
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateModule {
    /// Empty for the root module
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default)]
    pub resources: Vec<StateResource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_modules: Vec<StateModule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateResource {
    pub address: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    /// Number for `count`, string for `for_each`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<Value>,
    #[serde(default)]
    pub provider_name: String,
    #[serde(default)]
    pub schema_version: u64,
    #[serde(default, rename = "values")]
    pub attribute_values: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tainted: bool,
}

/// Output of `show -json <planfile>`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonPlan {
    #[serde(default)]
    pub format_version: String,
    #[serde(default)]
    pub resource_changes: Vec<ResourceChange>,
    #[serde(default)]
    pub output_changes: BTreeMap<String, Change>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceChange {
    pub address: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default, rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub provider_name: String,
    pub change: Change,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Planned action on a single object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    NoOp,
    Create,
    Read,
    Update,
    Delete,
}

/// Output of `providers schema -json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSchemas {
    #[serde(default)]
    pub format_version: String,
    #[serde(default)]
    pub provider_schemas: BTreeMap<String, Value>,
}
