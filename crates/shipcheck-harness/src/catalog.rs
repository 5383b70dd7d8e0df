//! Scenario catalogs
//!
//! A catalog is a YAML file listing scenarios as data:
//!
//! ```yaml
//! scenarios:
//!   - label: kaniko-timeout
//!     definitionTemplate: build/build_timeout.yaml
//!     executionTemplate: buildrun/buildrun_timeout.yaml
//!     expect:
//!       outcome: fail
//!       messagePattern: 'kaniko-timeout.*failed to finish within "15s"'
//!   - label: private-github-kaniko
//!     definitionTemplate: build/build_kaniko_cr_private_github.yaml
//!     executionTemplate: buildrun/buildrun_kaniko_cr.yaml
//!     requires: private-repositories
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use shipcheck_common::yaml::from_yaml;
use shipcheck_common::Error;

use crate::scenario::Scenario;

#[derive(Debug, Deserialize)]
struct CatalogFile {
    scenarios: Vec<Scenario>,
}

/// Read and validate a catalog file.
///
/// An unreadable catalog is a [`Error::Template`] like any other fixture.
pub fn load(path: &Path) -> Result<Vec<Scenario>, Error> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        Error::template(path.display().to_string(), format!("failed to read catalog: {e}"))
    })?;
    let scenarios = parse(&source)?;
    debug!(path = %path.display(), count = scenarios.len(), "Loaded scenario catalog");
    Ok(scenarios)
}

/// Parse and validate catalog YAML
pub fn parse(source: &str) -> Result<Vec<Scenario>, Error> {
    let file: CatalogFile = from_yaml(source)
        .map_err(|e| Error::validation_for_field("scenarios", format!("invalid catalog: {e}")))?;

    let mut labels = HashSet::new();
    for scenario in &file.scenarios {
        if scenario.label.trim().is_empty() {
            return Err(Error::validation_for_field("label", "scenario label is empty"));
        }
        if !labels.insert(scenario.label.as_str()) {
            return Err(Error::validation_for_field(
                "label",
                format!("duplicate scenario label {:?}", scenario.label),
            ));
        }
        scenario.expected.validate()?;
    }
    Ok(file.scenarios)
}

/// Keep scenarios whose label contains `pattern`; all of them for `None`
pub fn filter(scenarios: Vec<Scenario>, pattern: Option<&str>) -> Vec<Scenario> {
    match pattern {
        Some(p) => scenarios
            .into_iter()
            .filter(|s| s.label.contains(p))
            .collect(),
        None => scenarios,
    }
}
