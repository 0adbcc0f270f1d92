//! Shared fixtures for provisioning BDD scenarios.

use nbvm::test_support::ScriptedGuest;
use nbvm::{FailurePolicy, ProvisionReport};
use rstest::fixture;

#[derive(Clone, Debug)]
pub struct ProvisionContext {
    pub guest: ScriptedGuest,
    pub architecture: String,
    pub release: String,
    pub policy: FailurePolicy,
    pub outcome: Option<ProvisionResult>,
}

#[derive(Clone, Debug)]
pub enum ProvisionResult {
    Success(ProvisionReport),
    Failure(String),
}

#[fixture]
pub fn provision_context() -> ProvisionContext {
    ProvisionContext {
        guest: ScriptedGuest::new(),
        architecture: String::from("amd64"),
        release: String::from("HEAD"),
        policy: FailurePolicy::Abort,
        outcome: None,
    }
}
