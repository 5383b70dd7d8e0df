//! CLI commands

use std::path::{Path, PathBuf};

use shipcheck_harness::{catalog, Scenario};

use crate::{Error, Result};

pub mod list;
pub mod run;

/// Directory holding the bundled templates and catalog
pub const DEFAULT_FIXTURES_DIR: &str = "fixtures";

/// Catalog file name inside the fixtures directory
pub const CATALOG_FILE: &str = "scenarios.yaml";

/// Catalog path: explicit, or `scenarios.yaml` inside `fixtures`
pub fn catalog_path(fixtures: &Path, catalog: Option<&Path>) -> PathBuf {
    catalog
        .map(Path::to_path_buf)
        .unwrap_or_else(|| fixtures.join(CATALOG_FILE))
}

/// Load a catalog and keep the scenarios whose label contains `filter`
pub fn select_scenarios(path: &Path, filter: Option<&str>) -> Result<Vec<Scenario>> {
    let scenarios = catalog::filter(catalog::load(path)?, filter);
    if scenarios.is_empty() {
        return Err(Error::validation(match filter {
            Some(f) => format!("no scenario in {} matches '{f}'", path.display()),
            None => format!("{} contains no scenarios", path.display()),
        }));
    }
    Ok(scenarios)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
scenarios:
  - label: kaniko
    definitionTemplate: build/build_kaniko_cr.yaml
    executionTemplate: buildrun/buildrun_kaniko_cr.yaml
  - label: kaniko-timeout
    definitionTemplate: build/build_timeout.yaml
    executionTemplate: buildrun/buildrun_timeout_cr.yaml
    expect:
      outcome: fail
      messagePattern: 'failed to finish within "15s"'
"#;

    fn write_catalog() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CATALOG_FILE), CATALOG).unwrap();
        dir
    }

    #[test]
    fn catalog_defaults_to_fixtures_dir() {
        assert_eq!(
            catalog_path(Path::new("fixtures"), None),
            PathBuf::from("fixtures/scenarios.yaml")
        );
        assert_eq!(
            catalog_path(Path::new("fixtures"), Some(Path::new("/tmp/ci.yaml"))),
            PathBuf::from("/tmp/ci.yaml")
        );
    }

    #[test]
    fn filter_selects_by_label_substring() {
        let dir = write_catalog();
        let path = dir.path().join(CATALOG_FILE);
        assert_eq!(select_scenarios(&path, None).unwrap().len(), 2);
        let timeout = select_scenarios(&path, Some("timeout")).unwrap();
        assert_eq!(timeout.len(), 1);
        assert_eq!(timeout[0].label, "kaniko-timeout");
    }

    #[test]
    fn empty_selection_is_an_error() {
        let dir = write_catalog();
        let err = select_scenarios(&dir.path().join(CATALOG_FILE), Some("buildah")).unwrap_err();
        assert!(err.to_string().contains("matches 'buildah'"));
    }
}
