use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::debug;

use acctest_core::compare::{AttributeDiff, ChangeTag, difference, import_verify_view, sign};
use acctest_core::plan::{PlanSummary, pending_changes, plan_is_empty};
use acctest_core::shim::shim_state_from_json;
use acctest_core::state::{State, is_data_source_key};
use acctest_core::tfjson::{JsonPlan, JsonState};

#[derive(Parser)]
#[command(name = "acctest")]
#[command(about = "Inspect CLI state and plan documents the way acceptance tests do", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the flat attributes of every resource in a state
    Flatmap {
        /// Output of `terraform show -json`
        state: PathBuf,
    },
    /// Check that a saved plan has no pending changes
    Plan {
        /// Output of `terraform show -json <planfile>`
        plan: PathBuf,
    },
    /// Compare resources in two states the way import verification does
    Verify {
        /// State the resources were created in
        before: PathBuf,
        /// State after importing the resources
        after: PathBuf,

        /// Attribute prefix to leave out of the comparison
        #[arg(long)]
        ignore: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Flatmap { state } => run_flatmap(&state),
        Commands::Plan { plan } => run_plan(&plan),
        Commands::Verify {
            before,
            after,
            ignore,
        } => run_verify(&before, &after, &ignore),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn read_state(path: &Path) -> Result<State, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let json: JsonState = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse state {}: {}", path.display(), e))?;
    shim_state_from_json(&json).map_err(|e| format!("{}: {}", path.display(), e))
}

fn read_plan(path: &Path) -> Result<JsonPlan, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse plan {}: {}", path.display(), e))
}

fn run_flatmap(path: &Path) -> Result<(), String> {
    let state = read_state(path)?;

    for module in &state.modules {
        for (key, resource) in &module.resources {
            println!("{}", key.cyan().bold());
            let Some(primary) = &resource.primary else {
                continue;
            };
            println!("  {} = {}", "ID".bold(), primary.id);
            for (k, v) in &primary.attributes {
                println!("  {} = {}", k, v);
            }
        }
        for (name, output) in &module.outputs {
            println!("{} {} ({})", "output".cyan().bold(), name, output.output_type);
            println!("  {}", output.value);
        }
    }
    Ok(())
}

fn run_plan(path: &Path) -> Result<(), String> {
    let plan = read_plan(path)?;
    let summary = PlanSummary::from_plan(&plan);

    if plan_is_empty(&plan) {
        println!("{}", "No changes. The plan is empty.".green().bold());
        return Ok(());
    }

    for address in pending_changes(&plan) {
        println!("  {} {}", "~".yellow(), address);
    }
    println!("{}", summary.to_string().bold());
    Err("the plan was not empty".to_string())
}

/// Differences per resource key, for managed resources present in `after`
fn verify_states(before: &State, after: &State, ignore: &[String]) -> Result<Vec<(String, AttributeDiff)>, String> {
    let old_resources: Vec<_> = before
        .modules
        .iter()
        .flat_map(|m| m.managed_resources())
        .collect();

    let mut diffs = Vec::new();
    for module in &after.modules {
        for (key, resource) in &module.resources {
            if is_data_source_key(key) {
                continue;
            }
            let Some(new_primary) = &resource.primary else {
                continue;
            };
            debug!("Verifying {} ({})", key, new_primary.id);

            let old_primary = old_resources
                .iter()
                .filter(|(_, r)| {
                    r.resource_type == resource.resource_type && r.provider == resource.provider
                })
                .filter_map(|(_, r)| r.primary.as_ref())
                .find(|p| p.id == new_primary.id)
                .ok_or_else(|| format!("resource with ID {} not found in {}", new_primary.id, key))?;

            let expected = import_verify_view(&old_primary.attributes, ignore);
            let actual = import_verify_view(&new_primary.attributes, ignore);
            if let Some(diff) = difference(expected, actual) {
                diffs.push((key.clone(), diff));
            }
        }
    }
    Ok(diffs)
}

fn run_verify(before: &Path, after: &Path, ignore: &[String]) -> Result<(), String> {
    let before = read_state(before)?;
    let after = read_state(after)?;

    let diffs = verify_states(&before, &after, ignore)?;
    if diffs.is_empty() {
        println!("{}", "✓ Attributes are equivalent.".green().bold());
        return Ok(());
    }

    for (key, diff) in &diffs {
        print_diff(key, diff);
    }
    Err(format!("{} resource(s) not equivalent", diffs.len()))
}

fn print_diff(key: &str, diff: &AttributeDiff) {
    println!("\n{} {}:", "Diff for".cyan().bold(), key);

    for (tag, line) in diff.lines() {
        let sign = match tag {
            ChangeTag::Delete => sign(tag).red(),
            ChangeTag::Insert => sign(tag).green(),
            ChangeTag::Equal => sign(tag).normal(),
        };
        print!("{}{}", sign, line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BEFORE: &str = r#"{
        "format_version": "1.0",
        "values": {"root_module": {"resources": [{
            "address": "example_thing.foo",
            "mode": "managed",
            "type": "example_thing",
            "name": "foo",
            "provider_name": "registry.terraform.io/hashicorp/example",
            "values": {"id": "thing-1", "name": "web", "password": "secret", "timeouts": {"create": "10m"}}
        }]}}
    }"#;

    const AFTER: &str = r#"{
        "format_version": "1.0",
        "values": {"root_module": {"resources": [{
            "address": "example_thing.foo",
            "mode": "managed",
            "type": "example_thing",
            "name": "foo",
            "provider_name": "registry.terraform.io/hashicorp/example",
            "values": {"id": "thing-1", "name": "web"}
        }]}}
    }"#;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn verify_reports_missing_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let before = read_state(&write(&dir, "before.json", BEFORE)).unwrap();
        let after = read_state(&write(&dir, "after.json", AFTER)).unwrap();

        let diffs = verify_states(&before, &after, &[]).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].0, "example_thing.foo");
        assert!(diffs[0].1.expected.contains_key("password"));

        let diffs = verify_states(&before, &after, &["password".to_string()]).unwrap();
        assert!(diffs.is_empty());
    }

    #[test]
    fn plan_with_changes_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "plan.json",
            r#"{"format_version":"1.1","resource_changes":[{"address":"example_thing.foo","change":{"actions":["update"]}}]}"#,
        );
        assert_eq!(run_plan(&path).unwrap_err(), "the plan was not empty");

        let path = write(&dir, "empty.json", r#"{"format_version":"1.1","resource_changes":[]}"#);
        assert!(run_plan(&path).is_ok());
    }

    #[test]
    fn unreadable_state_is_reported() {
        let err = read_state(Path::new("/nonexistent/state.json")).unwrap_err();
        assert!(err.starts_with("Failed to read /nonexistent/state.json"));
    }
}
