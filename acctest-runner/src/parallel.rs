//! Runs independent TestCases concurrently

use std::sync::Arc;

use log::{debug, error};
use tokio::task::JoinSet;

use crate::error::TestError;
use crate::run::{TestOutcome, TestRunner};
use crate::testcase::TestCase;

#[derive(Debug)]
pub struct CaseResult {
    pub name: String,
    pub result: Result<TestOutcome, TestError>,
}

/// Run every case on its own task and return the results in input order
///
/// Each case gets its own helper and working directory. A panicking case
/// panics the caller once every other case has finished.
pub async fn run_parallel(runner: Arc<TestRunner>, cases: Vec<(String, TestCase)>) -> Vec<CaseResult> {
    let mut set = JoinSet::new();
    for (index, (name, case)) in cases.into_iter().enumerate() {
        let runner = Arc::clone(&runner);
        debug!("Spawning {}", name);
        set.spawn(async move {
            let result = runner.run(&name, &case).await;
            (index, CaseResult { name, result })
        });
    }

    let mut results = Vec::with_capacity(set.len());
    let mut panic = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) if e.is_panic() => panic = Some(e.into_panic()),
            Err(e) => error!("Test task failed: {}", e),
        }
    }
    if let Some(payload) = panic {
        std::panic::resume_unwind(payload);
    }

    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCli, RESOURCE_CONFIG, example_providers};
    use crate::teststep::TestStep;
    use acctest_core::env::AccConfig;

    #[tokio::test]
    async fn cases_run_independently() {
        let temp = tempfile::tempdir().unwrap();
        let cli = Arc::new(FakeCli::default());
        let runner = Arc::new(
            TestRunner::new(AccConfig {
                acceptance_enabled: true,
                temp_dir: Some(temp.path().to_path_buf()),
                ..Default::default()
            })
            .with_command_runner(cli.clone()),
        );

        let good = TestCase {
            provider_factories: example_providers(),
            steps: vec![TestStep::config(RESOURCE_CONFIG)],
            ..Default::default()
        };
        let invalid = TestCase {
            provider_factories: example_providers(),
            ..Default::default()
        };
        let cases = vec![
            ("TestAccThing_one".to_string(), good.clone()),
            ("TestAccThing_invalid".to_string(), invalid),
            ("TestAccThing_two".to_string(), good),
        ];

        let results = run_parallel(runner, cases).await;

        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["TestAccThing_one", "TestAccThing_invalid", "TestAccThing_two"]
        );
        assert!(matches!(results[0].result, Ok(TestOutcome::Passed)));
        assert!(matches!(results[1].result, Err(TestError::Validation(_))));
        assert!(matches!(results[2].result, Ok(TestOutcome::Passed)));
        assert_eq!(cli.count("destroy"), 2);
        assert!(!cli.has_resources());
    }
}
