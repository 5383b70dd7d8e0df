//! Scenario tests that talk to a real cluster
//!
//! - `build_scenarios`: single strategies end to end, the expected-failure
//!   path, gating, and the full bundled catalog

mod build_scenarios;
mod helpers;
