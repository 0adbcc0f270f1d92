//! BDD scenarios for nightly release discovery.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LocateContext, locate_context};

#[scenario(
    path = "tests/features/locate.feature",
    name = "Skip newer releases that lack the architecture"
)]
fn scenario_skip_releases_without_architecture(locate_context: LocateContext) {
    let _ = locate_context;
}

#[scenario(
    path = "tests/features/locate.feature",
    name = "Skip releases with an empty listing"
)]
fn scenario_skip_empty_listing(locate_context: LocateContext) {
    let _ = locate_context;
}

#[scenario(
    path = "tests/features/locate.feature",
    name = "Prefer the newest release carrying the architecture"
)]
fn scenario_prefer_newest_release(locate_context: LocateContext) {
    let _ = locate_context;
}

#[scenario(
    path = "tests/features/locate.feature",
    name = "Report a missing architecture"
)]
fn scenario_missing_architecture(locate_context: LocateContext) {
    let _ = locate_context;
}
