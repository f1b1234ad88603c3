//! Check functions run against state after a test step
//!
//! A check receives the flat [`State`] and fails with a [`CheckError`]. The
//! attribute checks here cover the common cases; anything else can be written
//! as a closure.

use std::sync::Arc;

use regex::Regex;

use crate::state::{InstanceState, State};

/// Error returned by a failing check
#[derive(Debug)]
pub struct CheckError {
    pub message: String,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for CheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl CheckError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

pub type CheckResult = Result<(), CheckError>;

/// Check run against the state after a step
pub type TestCheckFunc = Arc<dyn Fn(&State) -> CheckResult + Send + Sync>;

/// Check run against the instances produced by an import
pub type ImportStateCheckFunc = Arc<dyn Fn(&[InstanceState]) -> CheckResult + Send + Sync>;

/// Wrap a closure as a [`TestCheckFunc`]
pub fn check_fn(f: impl Fn(&State) -> CheckResult + Send + Sync + 'static) -> TestCheckFunc {
    Arc::new(f)
}

/// Run checks in order, stopping at the first failure
pub fn compose(checks: Vec<TestCheckFunc>) -> TestCheckFunc {
    Arc::new(move |state| {
        let total = checks.len();
        for (i, check) in checks.iter().enumerate() {
            if let Err(e) = check(state) {
                return Err(CheckError::new(format!(
                    "Check {}/{} error: {}",
                    i + 1,
                    total,
                    e
                )));
            }
        }
        Ok(())
    })
}

/// Run every check and report all failures together
pub fn compose_aggregate(checks: Vec<TestCheckFunc>) -> TestCheckFunc {
    Arc::new(move |state| {
        let total = checks.len();
        let failures: Vec<String> = checks
            .iter()
            .enumerate()
            .filter_map(|(i, check)| {
                check(state)
                    .err()
                    .map(|e| format!("Check {}/{} error: {}", i + 1, total, e))
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CheckError::new(failures.join("\n")))
        }
    })
}

/// Attribute `key` of resource `name` must equal `value`
pub fn check_resource_attr(
    name: impl Into<String>,
    key: impl Into<String>,
    value: impl Into<String>,
) -> TestCheckFunc {
    let (name, key, value) = (name.into(), key.into(), value.into());
    indexes_into_type_set_guard(key.clone(), move |state| {
        let is = primary_instance_state(state, &name)?;
        check_attr_equals(is, &name, &key, &value)
    })
}

/// Attribute `key` of resource `name` must be present and non-empty
pub fn check_resource_attr_set(name: impl Into<String>, key: impl Into<String>) -> TestCheckFunc {
    let (name, key) = (name.into(), key.into());
    indexes_into_type_set_guard(key.clone(), move |state| {
        let is = primary_instance_state(state, &name)?;
        check_attr_set(is, &name, &key)
    })
}

/// Attribute `key` of resource `name` must be absent
pub fn check_no_resource_attr(name: impl Into<String>, key: impl Into<String>) -> TestCheckFunc {
    let (name, key) = (name.into(), key.into());
    indexes_into_type_set_guard(key.clone(), move |state| {
        let is = primary_instance_state(state, &name)?;
        check_attr_absent(is, &name, &key)
    })
}

/// Attribute `key` of resource `name` must match `pattern`
pub fn match_resource_attr(
    name: impl Into<String>,
    key: impl Into<String>,
    pattern: Regex,
) -> TestCheckFunc {
    let (name, key) = (name.into(), key.into());
    indexes_into_type_set_guard(key.clone(), move |state| {
        let is = primary_instance_state(state, &name)?;
        let value = is.attributes.get(&key).map(String::as_str).unwrap_or("");
        if pattern.is_match(value) {
            Ok(())
        } else {
            Err(CheckError::new(format!(
                "{}: Attribute '{}' didn't match {:?}, got {:?}",
                name,
                key,
                pattern.as_str(),
                value
            )))
        }
    })
}

/// Attribute `key` of resource `name` must be set and accepted by `check`
pub fn check_resource_attr_with<F>(
    name: impl Into<String>,
    key: impl Into<String>,
    check: F,
) -> TestCheckFunc
where
    F: Fn(&str) -> CheckResult + Send + Sync + 'static,
{
    let (name, key) = (name.into(), key.into());
    indexes_into_type_set_guard(key.clone(), move |state| {
        let is = primary_instance_state(state, &name)?;
        check_attr_set(is, &name, &key)?;
        check(&is.attributes[&key]).map_err(|e| {
            CheckError::new(format!("{}: Attribute {:?} value: {}", name, key, e))
        })
    })
}

/// Two attributes, possibly on different resources, must hold the same value
pub fn check_resource_attr_pair(
    name_first: impl Into<String>,
    key_first: impl Into<String>,
    name_second: impl Into<String>,
    key_second: impl Into<String>,
) -> TestCheckFunc {
    let (name_first, key_first) = (name_first.into(), key_first.into());
    let (name_second, key_second) = (name_second.into(), key_second.into());
    let guard_keys = [key_first.clone(), key_second.clone()];

    let inner = move |state: &State| {
        let first = primary_instance_state(state, &name_first)?;
        let second = primary_instance_state(state, &name_second)?;
        check_attr_pair(first, &name_first, &key_first, second, &name_second, &key_second)
    };

    Arc::new(move |state| {
        inner(state).map_err(|e| {
            if state.is_binary_driven_test && guard_keys.iter().any(|k| indexes_into_type_set(k)) {
                CheckError::new(format!(
                    "Error in test check: {}\nTest check address {:?} or {:?} likely indexes into TypeSet\nThis is currently not supported",
                    e, guard_keys[0], guard_keys[1]
                ))
            } else {
                e
            }
        })
    })
}

/// Root module output `name` must equal `value`
pub fn check_output(name: impl Into<String>, value: impl Into<String>) -> TestCheckFunc {
    let (name, value) = (name.into(), value.into());
    Arc::new(move |state| {
        let output = state
            .root_module()
            .and_then(|m| m.outputs.get(&name))
            .ok_or_else(|| CheckError::new(format!("Not found: {}", name)))?;

        if output.as_str() == Some(value.as_str()) {
            Ok(())
        } else {
            Err(CheckError::new(format!(
                "Output '{}': expected {:?}, got {}",
                name, value, output.value
            )))
        }
    })
}

/// Root module output `name` must be a string matching `pattern`
pub fn match_output(name: impl Into<String>, pattern: Regex) -> TestCheckFunc {
    let name = name.into();
    Arc::new(move |state| {
        let output = state
            .root_module()
            .and_then(|m| m.outputs.get(&name))
            .ok_or_else(|| CheckError::new(format!("Not found: {}", name)))?;

        match output.as_str() {
            Some(value) if pattern.is_match(value) => Ok(()),
            _ => Err(CheckError::new(format!(
                "Output '{}': {} didn't match {:?}",
                name,
                output.value,
                pattern.as_str()
            ))),
        }
    })
}

/// Primary instance of a root module resource
pub fn primary_instance_state<'a>(
    state: &'a State,
    name: &str,
) -> Result<&'a InstanceState, CheckError> {
    let module = state
        .root_module()
        .ok_or_else(|| CheckError::new(format!("Not found: {} in root", name)))?;
    let resource = module
        .resources
        .get(name)
        .ok_or_else(|| CheckError::new(format!("Not found: {} in {}", name, module.path.join("."))))?;
    resource.primary.as_ref().ok_or_else(|| {
        CheckError::new(format!(
            "No primary instance: {} in {}",
            name,
            module.path.join(".")
        ))
    })
}

/// Returns true if a key has a numeric segment large enough to be a set hash
///
/// Best effort only: a list genuinely longer than 100 elements matches too.
pub fn indexes_into_type_set(key: &str) -> bool {
    key.split('.')
        .any(|part| part.parse::<i64>().is_ok_and(|i| i > 100))
}

/// Re-report failures of checks addressing set elements with a hint
fn indexes_into_type_set_guard<F>(key: String, f: F) -> TestCheckFunc
where
    F: Fn(&State) -> CheckResult + Send + Sync + 'static,
{
    Arc::new(move |state| {
        f(state).map_err(|e| {
            if state.is_binary_driven_test && indexes_into_type_set(&key) {
                CheckError::new(format!(
                    "Error in test check: {}\nTest check address {:?} likely indexes into TypeSet\nThis is currently not supported",
                    e, key
                ))
            } else {
                e
            }
        })
    })
}

fn container_hint(is: &InstanceState, name: &str, key: &str) -> Option<CheckError> {
    if is.attributes.contains_key(&format!("{}.#", key)) {
        return Some(CheckError::new(format!(
            "{}: list or set attribute '{}' must be checked by element count key ({}.#) or element value keys (e.g. {}.0)",
            name, key, key, key
        )));
    }
    if is.attributes.contains_key(&format!("{}.%", key)) {
        return Some(CheckError::new(format!(
            "{}: map attribute '{}' must be checked by element count key ({}.%) or element value keys (e.g. {}.examplekey)",
            name, key, key, key
        )));
    }
    None
}

fn is_count_key(key: &str) -> bool {
    key.ends_with(".#") || key.ends_with(".%")
}

fn check_attr_set(is: &InstanceState, name: &str, key: &str) -> CheckResult {
    if is.attributes.get(key).is_some_and(|v| !v.is_empty()) {
        return Ok(());
    }
    if let Some(hint) = container_hint(is, name, key) {
        return Err(hint);
    }
    Err(CheckError::new(format!(
        "{}: Attribute '{}' expected to be set",
        name, key
    )))
}

fn check_attr_equals(is: &InstanceState, name: &str, key: &str, value: &str) -> CheckResult {
    let Some(actual) = is.attributes.get(key) else {
        // Empty containers are not always written
        if value == "0" && is_count_key(key) {
            return Ok(());
        }
        if let Some(hint) = container_hint(is, name, key) {
            return Err(hint);
        }
        return Err(CheckError::new(format!(
            "{}: Attribute '{}' not found",
            name, key
        )));
    };

    if actual != value {
        return Err(CheckError::new(format!(
            "{}: Attribute '{}' expected {:?}, got {:?}",
            name, key, value, actual
        )));
    }
    Ok(())
}

fn check_attr_absent(is: &InstanceState, name: &str, key: &str) -> CheckResult {
    match is.attributes.get(key) {
        Some(v) if v == "0" && is_count_key(key) => Ok(()),
        Some(_) => Err(CheckError::new(format!(
            "{}: Attribute '{}' found when not expected",
            name, key
        ))),
        None => container_hint(is, name, key).map_or(Ok(()), Err),
    }
}

fn check_attr_pair(
    first: &InstanceState,
    name_first: &str,
    key_first: &str,
    second: &InstanceState,
    name_second: &str,
    key_second: &str,
) -> CheckResult {
    if name_first == name_second && key_first == key_second {
        return Err(CheckError::new(format!(
            "comparing self: resource {} attribute {}",
            name_first, key_first
        )));
    }

    let v_first = first.attributes.get(key_first);
    let v_second = second.attributes.get(key_second);

    // Empty container counts are treated as unset on both sides
    let same_count_suffix = is_count_key(key_first)
        && key_first.len() > 2
        && key_second.len() > 2
        && key_first[key_first.len() - 2..] == key_second[key_second.len() - 2..];
    let v_first = v_first.filter(|v| !(same_count_suffix && (*v == "0" || v.is_empty())));
    let v_second = v_second.filter(|v| !(same_count_suffix && (*v == "0" || v.is_empty())));

    match (v_first, v_second) {
        (None, None) => Ok(()),
        (None, Some(second_value)) => Err(CheckError::new(format!(
            "{}: Attribute {:?} not set, but {:?} is set in {} as {:?}",
            name_first, key_first, key_second, name_second, second_value
        ))),
        (Some(first_value), None) => Err(CheckError::new(format!(
            "{}: Attribute {:?} is {:?}, but {:?} is not set in {}",
            name_first, key_first, first_value, key_second, name_second
        ))),
        (Some(first_value), Some(second_value)) if first_value != second_value => {
            Err(CheckError::new(format!(
                "{}: Attribute '{}' expected {:?}, got {:?}",
                name_first, key_first, second_value, first_value
            )))
        }
        _ => Ok(()),
    }
}
