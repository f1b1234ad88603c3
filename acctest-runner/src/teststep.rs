//! TestStep definition

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use acctest_core::BoxError;
use acctest_core::check::{ImportStateCheckFunc, TestCheckFunc};
use acctest_core::state::State;
use acctest_plugin::ProviderFactories;
use regex::Regex;

use crate::error::StepValidationError;
use crate::testcase::{ExternalProvider, provider_config};

static PROVIDER_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"provider "?[a-zA-Z0-9_-]+"? \{"#).expect("valid regex"));
static TERRAFORM_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"terraform \{").expect("valid regex"));

/// Side effect run before a step
pub type PreConfigFunc = Arc<dyn Fn() + Send + Sync>;

/// Decides whether a step is skipped
pub type SkipFunc = Arc<dyn Fn() -> Result<bool, BoxError> + Send + Sync>;

/// Computes the import identifier from the current state
pub type ImportStateIdFunc = Arc<dyn Fn(&State) -> Result<String, BoxError> + Send + Sync>;

/// What a step does, derived from which fields are set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    Config,
    ImportState,
    RefreshState,
}

/// One unit of work in a TestCase
#[derive(Clone, Default)]
pub struct TestStep {
    /// Configuration to apply; may be native syntax or JSON
    pub config: String,
    pub check: Option<TestCheckFunc>,
    /// Plan and apply a destroy instead of the configuration
    pub destroy: bool,
    pub expect_non_empty_plan: bool,
    /// The step passes only if it fails with an error matching this pattern
    pub expect_error: Option<Regex>,
    /// Skip the initial apply and only verify the plan
    pub plan_only: bool,
    pub pre_config: Option<PreConfigFunc>,
    pub skip_func: Option<SkipFunc>,
    /// Resource addresses to taint before applying
    pub taint: Vec<String>,

    /// Resource address to import or to derive the import ID from
    pub resource_name: String,
    pub import_state: bool,
    pub import_state_id: String,
    pub import_state_id_prefix: String,
    pub import_state_id_func: Option<ImportStateIdFunc>,
    pub import_state_check: Option<ImportStateCheckFunc>,
    pub import_state_verify: bool,
    pub import_state_verify_ignore: Vec<String>,
    /// Import into the main working directory instead of a throwaway one
    pub import_state_persist: bool,

    pub refresh_state: bool,

    pub provider_factories: ProviderFactories,
    pub external_providers: BTreeMap<String, ExternalProvider>,
}

impl TestStep {
    /// Config step applying `config`
    pub fn config(config: impl Into<String>) -> Self {
        Self {
            config: config.into(),
            ..Default::default()
        }
    }

    pub fn mode(&self) -> Option<StepMode> {
        if self.import_state {
            Some(StepMode::ImportState)
        } else if self.refresh_state {
            Some(StepMode::RefreshState)
        } else if !self.config.is_empty() {
            Some(StepMode::Config)
        } else {
            None
        }
    }

    pub fn has_providers(&self) -> bool {
        !self.provider_factories.is_empty() || !self.external_providers.is_empty()
    }

    pub fn config_has_provider_block(&self) -> bool {
        PROVIDER_BLOCK.is_match(&self.config)
    }

    pub fn config_has_terraform_block(&self) -> bool {
        TERRAFORM_BLOCK.is_match(&self.config)
    }

    /// Provider-only configuration built from this step's providers
    pub fn provider_config(&self, skip_provider_block: bool) -> String {
        provider_config(&self.external_providers, skip_provider_block)
    }

    pub(crate) fn validate(
        &self,
        step_number: usize,
        case_has_providers: bool,
    ) -> Result<(), StepValidationError> {
        if self.config.is_empty() && !self.import_state && !self.refresh_state {
            return Err(StepValidationError::MissingMode);
        }
        if !self.config.is_empty() && self.refresh_state {
            return Err(StepValidationError::ConfigAndRefresh);
        }
        if self.refresh_state && self.destroy {
            return Err(StepValidationError::RefreshAndDestroy);
        }
        if self.refresh_state && step_number == 1 {
            return Err(StepValidationError::RefreshFirst);
        }
        if self.import_state && self.refresh_state {
            return Err(StepValidationError::ImportAndRefresh);
        }
        if let Some(name) = self
            .external_providers
            .keys()
            .find(|name| self.provider_factories.contains(name))
        {
            return Err(StepValidationError::ExternalOverlap(name.clone()));
        }

        match (case_has_providers, self.has_providers()) {
            (true, true) => Err(StepValidationError::ProvidersAtBothLevels),
            (false, false) => Err(StepValidationError::ProvidersMissing),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for TestStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestStep")
            .field("mode", &self.mode())
            .field("config", &self.config)
            .field("destroy", &self.destroy)
            .field("plan_only", &self.plan_only)
            .field("resource_name", &self.resource_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(f: impl FnOnce(&mut TestStep)) -> TestStep {
        let mut step = TestStep::default();
        f(&mut step);
        step
    }

    #[test]
    fn mode_selection() {
        assert_eq!(TestStep::config("x").mode(), Some(StepMode::Config));
        assert_eq!(
            step(|s| {
                s.config = "x".into();
                s.import_state = true;
            })
            .mode(),
            Some(StepMode::ImportState)
        );
        assert_eq!(step(|s| s.refresh_state = true).mode(), Some(StepMode::RefreshState));
        assert_eq!(TestStep::default().mode(), None);
    }

    #[test]
    fn validation_rules() {
        assert_eq!(
            TestStep::default().validate(1, true),
            Err(StepValidationError::MissingMode)
        );
        assert_eq!(
            step(|s| {
                s.config = "x".into();
                s.refresh_state = true;
            })
            .validate(2, true),
            Err(StepValidationError::ConfigAndRefresh)
        );
        assert_eq!(
            step(|s| {
                s.refresh_state = true;
                s.destroy = true;
            })
            .validate(2, true),
            Err(StepValidationError::RefreshAndDestroy)
        );
        assert_eq!(
            step(|s| s.refresh_state = true).validate(1, true),
            Err(StepValidationError::RefreshFirst)
        );
        assert_eq!(
            step(|s| {
                s.import_state = true;
                s.refresh_state = true;
            })
            .validate(2, true),
            Err(StepValidationError::ImportAndRefresh)
        );
        assert_eq!(
            TestStep::config("x").validate(1, false),
            Err(StepValidationError::ProvidersMissing)
        );
        assert!(TestStep::config("x").validate(1, true).is_ok());
    }

    #[test]
    fn step_level_providers_conflict_with_case_level() {
        let s = step(|s| {
            s.config = "x".into();
            s.external_providers
                .insert("random".into(), ExternalProvider::default());
        });
        assert_eq!(
            s.validate(1, true),
            Err(StepValidationError::ProvidersAtBothLevels)
        );
        assert!(s.validate(1, false).is_ok());
    }

    #[test]
    fn detects_blocks() {
        let s = TestStep::config("provider \"aws\" {\n}\nresource \"x\" \"y\" {}");
        assert!(s.config_has_provider_block());
        assert!(!s.config_has_terraform_block());

        let s = TestStep::config("terraform {\n  required_version = \">= 1.0\"\n}");
        assert!(s.config_has_terraform_block());
    }
}
