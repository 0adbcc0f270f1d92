//! BDD step definitions for the provisioning session.

use nbvm::{
    Architecture, BootSpec, CommandScript, FailurePolicy, ProvisioningSession, ReleaseToken,
    ScriptSettings, TokenError,
};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{ProvisionContext, ProvisionResult};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a scripted guest for \"{architecture}\" release \"{release}\"")]
fn scripted_guest(
    mut provision_context: ProvisionContext,
    architecture: String,
    release: String,
) -> ProvisionContext {
    provision_context.architecture = architecture;
    provision_context.release = release;
    provision_context
}

#[given("step \"{position}\" exits with \"{code}\"")]
fn step_exits_with(
    mut provision_context: ProvisionContext,
    position: usize,
    code: i32,
) -> ProvisionContext {
    provision_context.guest = provision_context
        .guest
        .with_exit_code(position.saturating_sub(1), code);
    provision_context
}

#[given("failing commands are tolerated")]
fn failures_tolerated(mut provision_context: ProvisionContext) -> ProvisionContext {
    provision_context.policy = FailurePolicy::Continue;
    provision_context
}

#[given("the guest fails to halt")]
fn guest_fails_halt(mut provision_context: ProvisionContext) -> ProvisionContext {
    provision_context.guest = provision_context.guest.failing_halt();
    provision_context
}

#[given("the guest rejects the login")]
fn guest_rejects_login(mut provision_context: ProvisionContext) -> ProvisionContext {
    provision_context.guest = provision_context.guest.failing_login();
    provision_context
}

#[when("I provision the guest")]
fn provision(provision_context: ProvisionContext) -> Result<ProvisionContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let architecture = Architecture::new(&provision_context.architecture)?;
    let release = ReleaseToken::new(&provision_context.release)?;

    let script = CommandScript::build_agent(&architecture, &release, &ScriptSettings::default());
    let spec = BootSpec::for_architecture(
        format!("ftp://mirror.invalid/HEAD/201601010000Z/{architecture}/"),
        &architecture,
    );
    let session = ProvisioningSession::new(provision_context.guest.clone())
        .with_failure_policy(provision_context.policy);

    let result = runtime.block_on(async { session.run(&spec, &script).await });
    let outcome = match result {
        Ok(report) => ProvisionResult::Success(report),
        Err(err) => ProvisionResult::Failure(err.to_string()),
    };

    Ok(ProvisionContext {
        outcome: Some(outcome),
        ..provision_context
    })
}

#[then("the provisioning succeeds")]
fn provisioning_succeeds(provision_context: &ProvisionContext) -> Result<(), StepError> {
    match &provision_context.outcome {
        Some(ProvisionResult::Success(_)) => Ok(()),
        Some(ProvisionResult::Failure(message)) => Err(StepError::Assertion(format!(
            "expected success, got failure: {message}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the provisioning fails with \"{expected}\"")]
fn provisioning_fails(provision_context: &ProvisionContext, expected: String) -> Result<(), StepError> {
    match &provision_context.outcome {
        Some(ProvisionResult::Failure(message)) if message.contains(&expected) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected failure containing {expected:?}, got {other:?}"
        ))),
    }
}

#[then("the guest ran \"{count}\" commands")]
fn guest_ran_commands(provision_context: &ProvisionContext, count: usize) -> Result<(), StepError> {
    let actual = provision_context.guest.commands().len();
    if actual == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} commands, guest received {actual}"
        )))
    }
}

#[then("the package command targets \"{fragment}\"")]
fn package_command_targets(
    provision_context: &ProvisionContext,
    fragment: String,
) -> Result<(), StepError> {
    let commands = provision_context.guest.commands();
    let package = commands
        .iter()
        .find(|command| command.contains("pkg_add"))
        .ok_or_else(|| StepError::Assertion(String::from("no pkg_add command was sent")))?;
    if package.contains(&fragment) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "package command should contain {fragment:?}: {package}"
        )))
    }
}

#[then("the guest was halted")]
fn guest_halted(provision_context: &ProvisionContext) -> Result<(), StepError> {
    if provision_context.guest.halted() {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from("guest should be halted")))
    }
}

#[then("\"{count}\" failed steps are reported")]
fn failed_steps_reported(provision_context: &ProvisionContext, count: usize) -> Result<(), StepError> {
    match &provision_context.outcome {
        Some(ProvisionResult::Success(report)) if report.failed.len() == count => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {count} failed steps, got {other:?}"
        ))),
    }
}
