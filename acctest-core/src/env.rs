//! Environment configuration for acceptance test runs

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Acceptance tests only run when this is set to a non-empty value
pub const ENV_ACC: &str = "TF_ACC";
pub const ENV_PROVIDER_HOST: &str = "TF_ACC_PROVIDER_HOST";
pub const ENV_PROVIDER_NAMESPACE: &str = "TF_ACC_PROVIDER_NAMESPACE";
pub const ENV_TERRAFORM_PATH: &str = "TF_ACC_TERRAFORM_PATH";
pub const ENV_TEMP_DIR: &str = "TF_ACC_TEMP_DIR";
pub const ENV_PERSIST_WORKING_DIR: &str = "TF_ACC_PERSIST_WORKING_DIR";
pub const ENV_LOG: &str = "TF_ACC_LOG";
pub const ENV_LOG_PATH: &str = "TF_ACC_LOG_PATH";
pub const ENV_LOG_PATH_MASK: &str = "TF_LOG_PATH_MASK";
pub const ENV_LOG_CORE: &str = "TF_LOG_CORE";
pub const ENV_LOG_PROVIDER: &str = "TF_LOG_PROVIDER";

pub const DEFAULT_PROVIDER_HOST: &str = "registry.terraform.io";
/// Namespaces a provider is reachable under when no override is given
pub const DEFAULT_PROVIDER_NAMESPACES: [&str; 2] = ["-", "hashicorp"];

const PROVIDER_BINARY_PREFIX: &str = "terraform-provider-";

/// Settings that control how the CLI subprocess logs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogConfig {
    pub level: Option<String>,
    pub path: Option<String>,
    /// Per-test log path with `%s` standing in for the test name
    pub path_mask: Option<String>,
    pub core_level: Option<String>,
    pub provider_level: Option<String>,
}

impl LogConfig {
    /// `TF_LOG*` variables for the subprocess of one test
    pub fn cli_env(&self, test_name: &str) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        let path = match (&self.path_mask, &self.path) {
            (Some(mask), _) => Some(mask.replace("%s", &test_name.replace('/', "__"))),
            (None, Some(path)) => Some(path.clone()),
            (None, None) => None,
        };

        if let Some(path) = path {
            let level = self.level.clone().unwrap_or_else(|| "TRACE".to_string());
            env.insert("TF_LOG".to_string(), level);
            env.insert("TF_LOG_PATH".to_string(), path);
        } else if let Some(level) = &self.level {
            env.insert("TF_LOG".to_string(), level.clone());
        }
        if let Some(level) = &self.core_level {
            env.insert("TF_LOG_CORE".to_string(), level.clone());
        }
        if let Some(level) = &self.provider_level {
            env.insert("TF_LOG_PROVIDER".to_string(), level.clone());
        }

        env
    }
}

/// Configuration read from the environment once per run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccConfig {
    pub acceptance_enabled: bool,
    pub provider_host: Option<String>,
    pub provider_namespace: Option<String>,
    pub terraform_path: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub persist_working_dir: bool,
    pub log: LogConfig,
}

impl AccConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        Self {
            acceptance_enabled: get(ENV_ACC).is_some(),
            provider_host: get(ENV_PROVIDER_HOST),
            provider_namespace: get(ENV_PROVIDER_NAMESPACE),
            terraform_path: get(ENV_TERRAFORM_PATH).map(PathBuf::from),
            temp_dir: get(ENV_TEMP_DIR).map(PathBuf::from),
            persist_working_dir: get(ENV_PERSIST_WORKING_DIR).is_some(),
            log: LogConfig {
                level: get(ENV_LOG),
                path: get(ENV_LOG_PATH),
                path_mask: get(ENV_LOG_PATH_MASK),
                core_level: get(ENV_LOG_CORE),
                provider_level: get(ENV_LOG_PROVIDER),
            },
        }
    }

    pub fn provider_host(&self) -> &str {
        self.provider_host.as_deref().unwrap_or(DEFAULT_PROVIDER_HOST)
    }

    pub fn provider_namespaces(&self) -> Vec<&str> {
        match &self.provider_namespace {
            Some(ns) => vec![ns.as_str()],
            None => DEFAULT_PROVIDER_NAMESPACES.to_vec(),
        }
    }

    /// Reattach keys a provider is registered under, one per namespace
    pub fn reattach_addresses(&self, name: &str) -> Vec<String> {
        let name = provider_type_name(name);
        self.provider_namespaces()
            .into_iter()
            .map(|ns| format!("{}/{}/{}", self.provider_host(), ns, name))
            .collect()
    }

    /// Address of a provider in the first configured namespace
    pub fn provider_address(&self, name: &str) -> String {
        let ns = self.provider_namespaces()[0];
        format!("{}/{}/{}", self.provider_host(), ns, provider_type_name(name))
    }

    pub fn cli_env(&self, test_name: &str) -> BTreeMap<String, String> {
        self.log.cli_env(test_name)
    }
}

/// Provider type name with any binary name prefix removed
pub fn provider_type_name(name: &str) -> &str {
    name.strip_prefix(PROVIDER_BINARY_PREFIX).unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> AccConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AccConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]);
        assert!(!config.acceptance_enabled);
        assert!(!config.persist_working_dir);
        assert_eq!(config.provider_host(), "registry.terraform.io");
        assert_eq!(config.provider_namespaces(), vec!["-", "hashicorp"]);
    }

    #[test]
    fn empty_values_are_unset() {
        let config = config(&[("TF_ACC", ""), ("TF_ACC_PROVIDER_HOST", "")]);
        assert!(!config.acceptance_enabled);
        assert_eq!(config.provider_host(), "registry.terraform.io");
    }

    #[test]
    fn reattach_addresses_per_namespace() {
        let config = config(&[("TF_ACC", "1")]);
        assert!(config.acceptance_enabled);
        assert_eq!(
            config.reattach_addresses("terraform-provider-example"),
            vec![
                "registry.terraform.io/-/example",
                "registry.terraform.io/hashicorp/example",
            ]
        );
    }

    #[test]
    fn namespace_and_host_overrides() {
        let config = config(&[
            ("TF_ACC_PROVIDER_HOST", "example.com"),
            ("TF_ACC_PROVIDER_NAMESPACE", "acme"),
        ]);
        assert_eq!(
            config.reattach_addresses("example"),
            vec!["example.com/acme/example"]
        );
        assert_eq!(config.provider_address("example"), "example.com/acme/example");
    }

    #[test]
    fn log_path_defaults_level_to_trace() {
        let config = config(&[("TF_ACC_LOG_PATH", "/tmp/tf.log")]);
        let env = config.cli_env("TestAccThing_basic");
        assert_eq!(env.get("TF_LOG").map(String::as_str), Some("TRACE"));
        assert_eq!(env.get("TF_LOG_PATH").map(String::as_str), Some("/tmp/tf.log"));
    }

    #[test]
    fn log_path_mask_uses_test_name() {
        let config = config(&[
            ("TF_LOG_PATH_MASK", "/tmp/%s.log"),
            ("TF_ACC_LOG", "DEBUG"),
            ("TF_LOG_PROVIDER", "INFO"),
        ]);
        let env = config.cli_env("TestAccThing/basic");
        assert_eq!(env.get("TF_LOG").map(String::as_str), Some("DEBUG"));
        assert_eq!(
            env.get("TF_LOG_PATH").map(String::as_str),
            Some("/tmp/TestAccThing__basic.log")
        );
        assert_eq!(env.get("TF_LOG_PROVIDER").map(String::as_str), Some("INFO"));
        assert!(!env.contains_key("TF_LOG_CORE"));
    }

    #[test]
    fn no_logging_by_default() {
        assert!(config(&[]).cli_env("t").is_empty());
    }
}
