//! List command - show the scenarios a catalog would run

use std::path::PathBuf;

use clap::Args;

use shipcheck_harness::{GateConfig, Scenario};

use super::{catalog_path, select_scenarios, DEFAULT_FIXTURES_DIR};
use crate::Result;

/// List the scenarios in a catalog
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Directory holding the resource templates and scenarios.yaml
    #[arg(long, env = "SHIPCHECK_FIXTURES", default_value = DEFAULT_FIXTURES_DIR)]
    pub fixtures: PathBuf,

    /// Catalog file (defaults to scenarios.yaml in the fixtures directory)
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Only list scenarios whose label contains this string
    #[arg(long)]
    pub filter: Option<String>,
}

pub fn run(args: ListArgs) -> Result<()> {
    let path = catalog_path(&args.fixtures, args.catalog.as_deref());
    let scenarios = select_scenarios(&path, args.filter.as_deref())?;
    print!("{}", render_table(&scenarios, &GateConfig::from_env()));
    Ok(())
}

/// One row per scenario: label, expectation and whether it would run
fn render_table(scenarios: &[Scenario], gates: &GateConfig) -> String {
    let width = scenarios
        .iter()
        .map(|s| s.label.len())
        .max()
        .unwrap_or(0)
        .max("LABEL".len());

    let mut out = format!("{:<width$}  {:<6}  EXPECT\n", "LABEL", "RUNS");
    for scenario in scenarios {
        let runs = match scenario.requires {
            Some(gate) if gates.skip_reason(gate).is_some() => "no",
            _ => "yes",
        };
        out.push_str(&format!(
            "{:<width$}  {:<6}  {}\n",
            scenario.label, runs, scenario.expected
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipcheck_harness::{ExpectedOutcome, Gate};

    fn scenario(label: &str, expected: ExpectedOutcome, requires: Option<Gate>) -> Scenario {
        Scenario {
            label: label.to_string(),
            definition_template: PathBuf::from("build/build_kaniko_cr.yaml"),
            execution_template: PathBuf::from("buildrun/buildrun_kaniko_cr.yaml"),
            expected,
            requires,
        }
    }

    #[test]
    fn table_marks_gated_scenarios() {
        let scenarios = vec![
            scenario("kaniko", ExpectedOutcome::Succeed, None),
            scenario(
                "kaniko-timeout",
                ExpectedOutcome::Fail {
                    message_pattern: "failed to finish".to_string(),
                },
                None,
            ),
            scenario(
                "private-github-kaniko",
                ExpectedOutcome::Succeed,
                Some(Gate::PrivateRepositories),
            ),
        ];

        let closed = render_table(&scenarios, &GateConfig::default());
        let lines: Vec<_> = closed.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("LABEL"));
        assert!(lines[1].contains("yes") && lines[1].contains("Succeeded"));
        assert!(lines[2].contains("/failed to finish/"));
        assert!(lines[3].starts_with("private-github-kaniko  no"));

        let open = render_table(
            &scenarios,
            &GateConfig {
                private_repositories: true,
            },
        );
        assert!(open.lines().nth(3).unwrap().starts_with("private-github-kaniko  yes"));
    }
}
