//! TestCase definition and the configuration derived from it

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use acctest_core::check::TestCheckFunc;
use acctest_plugin::ProviderFactories;

use crate::error::{StepError, ValidationError};
use crate::teststep::TestStep;

/// Side effect run once before any step
pub type PreCheckFunc = Arc<dyn Fn() + Send + Sync>;

/// Reclassifies a step error; `Ok(())` turns the failure into a pass
pub type ErrorCheckFunc = Arc<dyn Fn(StepError) -> Result<(), StepError> + Send + Sync>;

/// A provider downloaded from a registry rather than served in-process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalProvider {
    pub source: String,
    pub version_constraint: String,
}

/// One acceptance test: an ordered list of steps and the providers they use
#[derive(Clone, Default)]
pub struct TestCase {
    /// Run even when acceptance tests are not enabled
    pub is_unit_test: bool,
    pub pre_check: Option<PreCheckFunc>,
    pub provider_factories: ProviderFactories,
    pub external_providers: BTreeMap<String, ExternalProvider>,
    /// Runs against the last state before the post-test destroy
    pub check_destroy: Option<TestCheckFunc>,
    pub error_check: Option<ErrorCheckFunc>,
    pub steps: Vec<TestStep>,
    /// Resource used for the ID-only refresh test
    pub id_refresh_name: String,
    pub id_refresh_ignore: Vec<String>,
}

impl TestCase {
    pub fn has_providers(&self) -> bool {
        !self.provider_factories.is_empty() || !self.external_providers.is_empty()
    }

    /// Provider-only configuration built from the TestCase's providers
    pub fn provider_config(&self, skip_provider_block: bool) -> String {
        provider_config(&self.external_providers, skip_provider_block)
    }

    /// Configuration written for a step: provider blocks followed by the step config
    ///
    /// Configurations with their own `terraform` block, and JSON
    /// configurations, are used as they are.
    pub fn merged_config(&self, step: &TestStep) -> String {
        if step.config_has_terraform_block() || is_json(&step.config) {
            return step.config.clone();
        }

        let skip_provider_block = step.config_has_provider_block();
        let mut config = if self.has_providers() {
            self.provider_config(skip_provider_block)
        } else {
            step.provider_config(skip_provider_block)
        };
        config.push_str(&step.config);
        config
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.steps.is_empty() {
            return Err(ValidationError::MissingSteps);
        }

        if let Some(name) = self
            .external_providers
            .keys()
            .find(|name| self.provider_factories.contains(name))
        {
            return Err(ValidationError::CaseExternalOverlap(name.clone()));
        }

        let has_providers = self.has_providers();
        let total = self.steps.len();
        for (i, step) in self.steps.iter().enumerate() {
            step.validate(i + 1, has_providers)
                .map_err(|source| ValidationError::Step {
                    step: i + 1,
                    total,
                    source,
                })?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase")
            .field("is_unit_test", &self.is_unit_test)
            .field("provider_factories", &self.provider_factories)
            .field("external_providers", &self.external_providers)
            .field("steps", &self.steps)
            .field("id_refresh_name", &self.id_refresh_name)
            .finish_non_exhaustive()
    }
}

fn is_json(config: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(config).is_ok()
}

/// `provider` and `required_providers` blocks for external providers
pub(crate) fn provider_config(
    external_providers: &BTreeMap<String, ExternalProvider>,
    skip_provider_block: bool,
) -> String {
    let mut provider_blocks = String::new();
    let mut required_providers = String::new();

    for (name, provider) in external_providers {
        if !skip_provider_block {
            let _ = writeln!(provider_blocks, "provider {:?} {{}}", name);
        }

        if provider.source.is_empty() && provider.version_constraint.is_empty() {
            continue;
        }

        let _ = writeln!(required_providers, "    {} = {{", name);
        if !provider.source.is_empty() {
            let _ = writeln!(required_providers, "      source = {:?}", provider.source);
        }
        if !provider.version_constraint.is_empty() {
            let _ = writeln!(
                required_providers,
                "      version = {:?}",
                provider.version_constraint
            );
        }
        required_providers.push_str("    }\n");
    }

    if required_providers.is_empty() {
        return provider_blocks;
    }

    format!(
        "\nterraform {{\n  required_providers {{\n{}\n  }}\n}}\n\n{}\n",
        required_providers.trim_end_matches('\n'),
        provider_blocks
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepValidationError;

    fn external(source: &str, version: &str) -> ExternalProvider {
        ExternalProvider {
            source: source.to_string(),
            version_constraint: version.to_string(),
        }
    }

    fn case_with_external() -> TestCase {
        let mut case = TestCase::default();
        case.external_providers
            .insert("random".to_string(), external("hashicorp/random", "3.1.0"));
        case
    }

    #[test]
    fn provider_config_renders_required_providers() {
        let case = case_with_external();
        assert_eq!(
            case.provider_config(false),
            "\nterraform {\n  required_providers {\n    random = {\n      source = \"hashicorp/random\"\n      version = \"3.1.0\"\n    }\n  }\n}\n\nprovider \"random\" {}\n\n"
        );
    }

    #[test]
    fn provider_config_without_source_or_version() {
        let mut case = TestCase::default();
        case.external_providers
            .insert("null".to_string(), ExternalProvider::default());
        assert_eq!(case.provider_config(false), "provider \"null\" {}\n");
        assert_eq!(case.provider_config(true), "");
    }

    #[test]
    fn merged_config_prefixes_provider_blocks() {
        let case = case_with_external();
        let step = TestStep::config("resource \"random_id\" \"x\" {}\n");
        let merged = case.merged_config(&step);
        assert!(merged.contains("provider \"random\" {}"));
        assert!(merged.ends_with("resource \"random_id\" \"x\" {}\n"));
    }

    #[test]
    fn merged_config_skips_provider_block_when_configured() {
        let case = case_with_external();
        let step = TestStep::config("provider \"random\" {\n}\n");
        let merged = case.merged_config(&step);
        assert_eq!(merged.matches("provider \"random\"").count(), 1);
    }

    #[test]
    fn merged_config_keeps_terraform_block_configs() {
        let case = case_with_external();
        let step = TestStep::config("terraform {\n}\n");
        assert_eq!(case.merged_config(&step), "terraform {\n}\n");
    }

    #[test]
    fn merged_config_keeps_json() {
        let case = case_with_external();
        let step = TestStep::config(r#"{"resource":{}}"#);
        assert_eq!(case.merged_config(&step), r#"{"resource":{}}"#);
    }

    #[test]
    fn validate_requires_steps() {
        let err = TestCase::default().validate().unwrap_err();
        assert_eq!(err.to_string(), "TestCase missing Steps");
    }

    #[test]
    fn validate_numbers_step_errors() {
        let mut case = case_with_external();
        case.steps = vec![TestStep::config("x"), TestStep::default()];
        match case.validate().unwrap_err() {
            ValidationError::Step { step, total, source } => {
                assert_eq!((step, total), (2, 2));
                assert_eq!(source, StepValidationError::MissingMode);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
