//! Drives a guest through boot, login, the command script and halt.
//!
//! Commands run strictly in order. Each one is bounded by its step timeout
//! here as well as inside the driver, so a wedged console surfaces as
//! [`ProvisionError::CommandTimeout`] rather than a hang. The guest is
//! always halted once it has booted; halt failures are logged and dropped
//! because drivers commonly time out on a guest that has already powered
//! off.

use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::guest::{BootSpec, BootSpecError, CommandStatus, GuestDriver};
use crate::script::{CommandScript, ScriptStep};

/// Reaction to a command that exits non-zero.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FailurePolicy {
    /// Stop at the first failing command.
    #[default]
    Abort,
    /// Record the failure and run the remaining commands.
    Continue,
}

/// A step that exited non-zero under [`FailurePolicy::Continue`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FailedStep {
    /// Position of the step in the script.
    pub index: usize,
    /// Step label.
    pub label: String,
    /// Exit code reported by the guest.
    pub exit_code: i32,
}

/// Outcome of a completed run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProvisionReport {
    /// Number of steps sent to the guest.
    pub executed: usize,
    /// Steps that exited non-zero but did not abort the run.
    pub failed: Vec<FailedStep>,
}

impl ProvisionReport {
    /// Returns `true` when every step exited zero.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Errors surfaced while provisioning a guest.
#[derive(Debug, Error)]
pub enum ProvisionError<DriverError>
where
    DriverError: std::error::Error + 'static,
{
    /// Raised when the boot spec is incomplete.
    #[error("invalid boot spec: {0}")]
    BootSpec(#[from] BootSpecError),
    /// Raised when the guest fails to boot.
    #[error("failed to boot guest: {0}")]
    Boot(#[source] DriverError),
    /// Raised when logging in at the console fails.
    #[error("failed to log in to guest: {0}")]
    Login(#[source] DriverError),
    /// Raised when the driver cannot run a command.
    #[error("step {index} ({label}) could not be run: {source}")]
    Command {
        /// Position of the step in the script.
        index: usize,
        /// Step label.
        label: String,
        /// Driver error.
        #[source]
        source: DriverError,
    },
    /// Raised when a command exits non-zero under [`FailurePolicy::Abort`].
    #[error("step {index} ({label}) exited with status {exit_code}")]
    CommandFailed {
        /// Position of the step in the script.
        index: usize,
        /// Step label.
        label: String,
        /// Exit code reported by the guest.
        exit_code: i32,
    },
    /// Raised when a command does not complete within its timeout.
    #[error("step {index} ({label}) did not complete within {} seconds", .timeout.as_secs())]
    CommandTimeout {
        /// Position of the step in the script.
        index: usize,
        /// Step label.
        label: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },
}

/// Owns a guest driver and runs command scripts against fresh guests.
#[derive(Debug)]
pub struct ProvisioningSession<G> {
    driver: G,
    failure_policy: FailurePolicy,
}

impl<G> ProvisioningSession<G>
where
    G: GuestDriver,
{
    /// Creates a session that aborts on the first failing command.
    #[must_use]
    pub const fn new(driver: G) -> Self {
        Self {
            driver,
            failure_policy: FailurePolicy::Abort,
        }
    }

    /// Overrides the reaction to failing commands.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Returns the underlying driver.
    #[must_use]
    pub const fn driver(&self) -> &G {
        &self.driver
    }

    /// Boots the guest, logs in, runs `script` in order and halts.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the spec is invalid, boot or login
    /// fails, the driver cannot run a command, a command times out, or (with
    /// [`FailurePolicy::Abort`]) a command exits non-zero. Halt failures are
    /// never reported.
    pub async fn run(
        &self,
        spec: &BootSpec,
        script: &CommandScript,
    ) -> Result<ProvisionReport, ProvisionError<G::Error>> {
        spec.validate()?;
        info!(image = %spec.image_url, workdir = %spec.workdir, "booting guest");
        let mut session = self
            .driver
            .boot(spec)
            .await
            .map_err(ProvisionError::Boot)?;

        let result = match self.driver.login(&mut session).await {
            Ok(()) => self.run_script(&mut session, script).await,
            Err(err) => Err(ProvisionError::Login(err)),
        };

        self.halt(session).await;
        result
    }

    async fn run_script(
        &self,
        session: &mut G::Session,
        script: &CommandScript,
    ) -> Result<ProvisionReport, ProvisionError<G::Error>> {
        let mut report = ProvisionReport::default();
        let total = script.len();

        for (index, step) in script.steps().iter().enumerate() {
            info!(step = index + 1, total, label = %step.label, "running guest command");
            let status = self.run_step(session, index, step).await?;
            report.executed += 1;

            if status.is_success() {
                continue;
            }
            match self.failure_policy {
                FailurePolicy::Abort => {
                    return Err(ProvisionError::CommandFailed {
                        index,
                        label: step.label.clone(),
                        exit_code: status.exit_code,
                    });
                }
                FailurePolicy::Continue => {
                    error!(
                        label = %step.label,
                        exit_code = status.exit_code,
                        "guest command failed; continuing"
                    );
                    report.failed.push(FailedStep {
                        index,
                        label: step.label.clone(),
                        exit_code: status.exit_code,
                    });
                }
            }
        }

        Ok(report)
    }

    async fn run_step(
        &self,
        session: &mut G::Session,
        index: usize,
        step: &ScriptStep,
    ) -> Result<CommandStatus, ProvisionError<G::Error>> {
        let command = step.render();
        let call = self
            .driver
            .shell_command(session, &command, step.timeout);
        match timeout(step.timeout, call).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(source)) => Err(ProvisionError::Command {
                index,
                label: step.label.clone(),
                source,
            }),
            Err(_) => Err(ProvisionError::CommandTimeout {
                index,
                label: step.label.clone(),
                timeout: step.timeout,
            }),
        }
    }

    async fn halt(&self, session: G::Session) {
        match self.driver.halt(session).await {
            Ok(()) => info!("guest halted"),
            Err(err) => warn!(error = %err, "ignoring guest halt failure"),
        }
    }
}
