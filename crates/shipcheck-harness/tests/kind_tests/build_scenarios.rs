//! Build scenarios against a live controller
//!
//! Each test tells one story a platform operator relies on: a strategy
//! builds and pushes an image and cleans up after itself, a build that
//! cannot finish in time fails with a clear message, and scenarios that
//! need private credentials stay out of the way when those are missing.

use shipcheck_harness::{ScenarioState, Verdict};

use super::helpers::{bundled_catalog, bundled_scenario, test_runner};

#[tokio::test]
#[ignore = "requires a cluster with the build controller installed"]
async fn story_kaniko_build_succeeds_and_removes_its_service_account() {
    let runner = test_runner().await;
    let report = runner.run(&bundled_scenario("kaniko")).await;

    println!("{report}");
    assert!(report.passed(), "kaniko scenario should pass");
    assert_eq!(report.state, ScenarioState::CleanedUp);
}

#[tokio::test]
#[ignore = "requires a cluster with the build controller installed"]
async fn story_build_exceeding_its_timeout_fails_with_a_clear_message() {
    let runner = test_runner().await;
    let report = runner.run(&bundled_scenario("kaniko-timeout")).await;

    println!("{report}");
    assert!(report.passed(), "timeout scenario should fail as expected");
    assert_eq!(report.state, ScenarioState::Failed);
    let actual = report.actual.expect("terminal status should be recorded");
    assert!(actual.message.contains("failed to finish within"));
}

#[tokio::test]
#[ignore = "requires a cluster with the build controller installed"]
async fn story_private_scenarios_skip_without_credentials() {
    if std::env::var(shipcheck_common::PRIVATE_REPOS_ENV).as_deref() == Ok("true") {
        println!("private repositories enabled, nothing to check");
        return;
    }
    let runner = test_runner().await;
    let report = runner.run(&bundled_scenario("private-github-kaniko")).await;

    assert!(matches!(report.verdict, Verdict::Skipped { .. }));
    assert!(report.identifier.is_none());
}

#[tokio::test]
#[ignore = "runs every bundled scenario, takes a long time"]
async fn story_full_catalog_passes() {
    let runner = test_runner().await;
    let suite = runner.run_suite(&bundled_catalog(), 4).await;

    suite.log_summary();
    println!("{suite}");
    assert!(suite.is_success(), "{} scenario(s) failed", suite.failed());
}
