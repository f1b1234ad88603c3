//! Error types for test cases, steps and validation

use acctest_core::check::CheckError;
use acctest_core::shim::ShimError;
use acctest_core::BoxError;
use acctest_plugin::PluginError;
use acctest_workdir::WorkdirError;
use thiserror::Error;

/// A TestCase that cannot run as written
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("TestCase missing Steps")]
    MissingSteps,

    #[error("TestCase provider {0:?} set in both ExternalProviders and provider factories")]
    CaseExternalOverlap(String),

    #[error("TestStep {step}/{total} validation error: {source}")]
    Step {
        step: usize,
        total: usize,
        source: StepValidationError,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StepValidationError {
    #[error("TestStep missing Config or ImportState or RefreshState")]
    MissingMode,

    #[error("TestStep cannot have Config and RefreshState")]
    ConfigAndRefresh,

    #[error("TestStep cannot have RefreshState and Destroy")]
    RefreshAndDestroy,

    #[error("TestStep cannot have RefreshState as first step")]
    RefreshFirst,

    #[error("TestStep cannot have ImportState and RefreshState in same step")]
    ImportAndRefresh,

    #[error("TestStep provider {0:?} set in both ExternalProviders and provider factories")]
    ExternalOverlap(String),

    #[error("Providers must only be specified either at the TestCase or TestStep level")]
    ProvidersAtBothLevels,

    #[error("Providers must be specified at the TestCase level or in all TestStep")]
    ProvidersMissing,
}

/// Failure inside a step routine
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Workdir(#[from] WorkdirError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Shim(#[from] ShimError),

    #[error("Check failed: {0}")]
    Check(CheckError),

    /// An assertion about the plan or state did not hold
    #[error("{0}")]
    Failed(String),

    /// Fails the test regardless of ExpectError and ErrorCheck
    #[error("{0}")]
    Fatal(String),
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        StepError::Fatal(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StepError::Fatal(_))
    }
}

/// Why a TestCase failed
#[derive(Debug, Error)]
pub enum TestError {
    #[error("Test validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Failure before the first step ran
    #[error("{message}: {source}")]
    Setup { message: String, source: BoxError },

    #[error("{message}")]
    Step {
        step: usize,
        total: usize,
        message: String,
        #[source]
        source: Option<StepError>,
    },

    #[error("Error retrieving state, there may be dangling resources: {0}")]
    DanglingState(StepError),

    #[error("Error running post-test destroy, there may be dangling resources: {0}")]
    DanglingDestroy(StepError),

    /// A step failed and the cleanup afterwards failed too
    #[error("{step}\n{teardown}")]
    WithDanglingResources {
        step: Box<TestError>,
        teardown: Box<TestError>,
    },
}

impl TestError {
    pub(crate) fn setup(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        TestError::Setup {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Returns true if resources may have been left behind
    pub fn is_dangling(&self) -> bool {
        matches!(
            self,
            TestError::DanglingState(_)
                | TestError::DanglingDestroy(_)
                | TestError::WithDanglingResources { .. }
        )
    }
}
