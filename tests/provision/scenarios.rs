//! BDD scenarios for the provisioning session.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ProvisionContext, provision_context};

#[scenario(
    path = "tests/features/provision.feature",
    name = "Provision an amd64 guest as a build agent"
)]
fn scenario_provision_build_agent(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Abort on the first failing command"
)]
fn scenario_abort_on_failure(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Continue past failing commands when requested"
)]
fn scenario_continue_on_failure(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Ignore halt failures after a successful run"
)]
fn scenario_ignore_halt_failure(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Halt the guest when login fails"
)]
fn scenario_login_failure_halts(provision_context: ProvisionContext) {
    let _ = provision_context;
}
