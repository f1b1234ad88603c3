//! Sweepers: cleanup functions that delete leaked test resources per region
//!
//! Sweepers are registered by name with optional dependencies. A dependency
//! runs before the sweeper that names it, and every sweeper runs at most once
//! per region.

use std::collections::BTreeMap;
use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use acctest_core::{BoxError, BoxFuture};
use clap::{Args, Parser};
use log::{debug, error, info, warn};
use thiserror::Error;

/// Deletes leaked resources in one region
pub type SweeperFunc = Arc<dyn Fn(String) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Error adding ({0}) to sweepers: function already exists")]
    Duplicate(String),

    #[error("sweeper ({sweeper}) has dependency ({dependency}), but that sweeper was not found")]
    MissingDependency { sweeper: String, dependency: String },

    #[error("Error running Sweeper ({sweeper}) in region ({region}): {source}")]
    Sweeper {
        sweeper: String,
        region: String,
        source: BoxError,
    },

    #[error("sweeper ({sweeper}) for region ({region}) failed: {source}")]
    Region {
        sweeper: String,
        region: String,
        source: Box<SweepError>,
    },

    #[error("at least one sweeper failed")]
    Failures,
}

#[derive(Clone)]
pub struct Sweeper {
    pub name: String,
    /// Sweepers that must run before this one
    pub dependencies: Vec<String>,
    pub f: SweeperFunc,
}

impl Sweeper {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            f: Arc::new(move |region| -> BoxFuture<'static, Result<(), BoxError>> {
                Box::pin(f(region))
            }),
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperStatus {
    pub duration: Duration,
    pub failed: bool,
}

/// Sweeper statuses keyed by region, then sweeper name
pub type SweepReport = BTreeMap<String, BTreeMap<String, SweeperStatus>>;

/// Command-line flags selecting what to sweep
#[derive(Debug, Clone, Default, Args)]
pub struct SweepArgs {
    /// Comma-separated regions to sweep
    #[arg(long = "sweep", default_value = "")]
    pub regions: String,

    /// Comma-separated sweeper name filter, matched case-insensitively as a substring
    #[arg(long = "sweep-run", default_value = "")]
    pub run: String,

    /// Keep sweeping after a sweeper fails
    #[arg(long = "sweep-allow-failures")]
    pub allow_failures: bool,
}

impl SweepArgs {
    pub fn regions(&self) -> Vec<String> {
        split_list(&self.regions)
    }
}

#[derive(Parser)]
#[command(about = "Remove resources leaked by acceptance tests")]
struct SweepCli {
    #[command(flatten)]
    sweep: SweepArgs,
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct SweeperRegistry {
    sweepers: BTreeMap<String, Sweeper>,
}

impl SweeperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sweeper: Sweeper) -> Result<(), SweepError> {
        if self.sweepers.contains_key(&sweeper.name) {
            return Err(SweepError::Duplicate(sweeper.name));
        }
        self.sweepers.insert(sweeper.name.clone(), sweeper);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Sweeper> {
        self.sweepers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sweepers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sweepers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sweepers.is_empty()
    }

    /// Sweepers whose name contains one of the comma-separated filters, plus
    /// everything they depend on
    pub fn filter(&self, filter: &str) -> BTreeMap<String, Sweeper> {
        let filters: Vec<String> = split_list(filter)
            .into_iter()
            .map(|f| f.to_lowercase())
            .collect();
        if filters.is_empty() {
            return self.sweepers.clone();
        }

        let mut selected = BTreeMap::new();
        for (name, sweeper) in &self.sweepers {
            let lower = name.to_lowercase();
            if filters.iter().any(|f| lower.contains(f.as_str())) {
                selected.insert(name.clone(), sweeper.clone());
                self.add_dependencies(sweeper, &mut selected);
            }
        }
        selected
    }

    fn add_dependencies(&self, sweeper: &Sweeper, selected: &mut BTreeMap<String, Sweeper>) {
        for dependency in &sweeper.dependencies {
            match self.sweepers.get(dependency) {
                Some(dep) => {
                    if selected.insert(dependency.clone(), dep.clone()).is_none() {
                        self.add_dependencies(dep, selected);
                    }
                }
                None => warn!(
                    "Sweeper ({}) has dependency ({}), but that sweeper was not found",
                    sweeper.name, dependency
                ),
            }
        }
    }

    /// Run the selected sweepers in every region
    ///
    /// Without `allow_failures` the first failure stops the sweep.
    pub async fn run(&self, args: &SweepArgs) -> Result<SweepReport, SweepError> {
        let selected = self.filter(&args.run);
        let mut report = SweepReport::new();

        for region in args.regions() {
            info!("Running sweepers for region ({})", region);
            let mut ran = BTreeMap::new();
            for sweeper in selected.values() {
                let result = run_in_region(&region, sweeper, &selected, &mut ran, args.allow_failures).await;
                if let Err(e) = result {
                    if args.allow_failures {
                        continue;
                    }
                    return Err(SweepError::Region {
                        sweeper: sweeper.name.clone(),
                        region,
                        source: Box::new(e),
                    });
                }
            }
            report.insert(region, ran);
        }

        Ok(report)
    }
}

fn run_in_region<'a>(
    region: &'a str,
    sweeper: &'a Sweeper,
    sweepers: &'a BTreeMap<String, Sweeper>,
    ran: &'a mut BTreeMap<String, SweeperStatus>,
    allow_failures: bool,
) -> BoxFuture<'a, Result<(), SweepError>> {
    Box::pin(async move {
        if ran.contains_key(&sweeper.name) {
            debug!("Sweeper ({}) already ran in region ({})", sweeper.name, region);
            return Ok(());
        }

        for dependency in &sweeper.dependencies {
            let dep = sweepers
                .get(dependency)
                .ok_or_else(|| SweepError::MissingDependency {
                    sweeper: sweeper.name.clone(),
                    dependency: dependency.clone(),
                })?;
            debug!("Sweeper ({}) running dependency: {}", sweeper.name, dep.name);
            if let Err(e) = run_in_region(region, dep, sweepers, &mut *ran, allow_failures).await {
                if !allow_failures {
                    return Err(e);
                }
                error!("{}", e);
            }
        }

        debug!("Running Sweeper ({}) in region ({})", sweeper.name, region);
        let start = Instant::now();
        let result = (sweeper.f)(region.to_string()).await;
        let duration = start.elapsed();
        debug!(
            "Completed Sweeper ({}) in region ({}) in {:?}",
            sweeper.name, region, duration
        );

        ran.insert(
            sweeper.name.clone(),
            SweeperStatus {
                duration,
                failed: result.is_err(),
            },
        );

        result.map_err(|source| {
            let e = SweepError::Sweeper {
                sweeper: sweeper.name.clone(),
                region: region.to_string(),
                source,
            };
            error!("{}", e);
            e
        })
    })
}

/// Print one block per region listing how each sweeper went
pub fn print_report(report: &SweepReport) {
    for (region, statuses) in report {
        let failed = statuses.values().any(|s| s.failed);
        if failed {
            println!("Sweeper Tests for region ({}) ran unsuccessfully:", region);
        } else {
            println!("Sweeper Tests for region ({}) ran successfully:", region);
        }
        for (name, status) in statuses {
            let outcome = if status.failed { "failed" } else { "passed" };
            println!("\t- {} ({}) [{:?}]", name, outcome, status.duration);
        }
    }
}

/// Returns `SweepError::Failures` if any sweeper in the report failed
pub fn check_report(report: &SweepReport) -> Result<(), SweepError> {
    if report.values().flat_map(|r| r.values()).any(|s| s.failed) {
        return Err(SweepError::Failures);
    }
    Ok(())
}

/// Entry point for a sweeper binary: parse the flags, sweep and report
pub async fn sweep_main(registry: &SweeperRegistry) -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = SweepCli::parse();
    if cli.sweep.regions().is_empty() {
        error!("No regions to sweep: pass --sweep=<region>[,<region>...]");
        return ExitCode::FAILURE;
    }

    let report = match registry.run(&cli.sweep).await {
        Ok(report) => report,
        Err(e) => {
            error!("Error running sweepers: {}", e);
            return ExitCode::FAILURE;
        }
    };

    print_report(&report);
    match check_report(&report) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
