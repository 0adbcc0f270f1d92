//! Guest automation abstraction.
//!
//! Booting a NetBSD image, detecting its login prompt and typing at its
//! console are delegated to a [`GuestDriver`]. The provisioning session only
//! sees the four blocking operations below.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::target::Architecture;

/// Default virtual disk size.
pub const DEFAULT_DISK_SIZE: &str = "4G";

/// Default guest memory size.
pub const DEFAULT_MEMORY_SIZE: &str = "1G";

/// Parameters used to boot the guest. Built once per run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootSpec {
    /// URL of the release image directory.
    pub image_url: String,
    /// Host-side working directory that holds the guest's disk.
    pub workdir: Utf8PathBuf,
    /// Virtual disk size (for example `4G`).
    pub disk_size: String,
    /// Guest memory size (for example `1G`).
    pub memory_size: String,
    /// Keep the disk in the working directory after the run.
    pub persist: bool,
}

/// Errors raised when a [`BootSpec`] is incomplete.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BootSpecError {
    /// Raised when a required field is empty.
    #[error("boot spec field {0} must not be empty")]
    Empty(&'static str),
}

impl BootSpec {
    /// Builds the standard spec for `architecture`: a persisted
    /// `work-NetBSD-<arch>` working directory with the default disk and
    /// memory sizes.
    #[must_use]
    pub fn for_architecture(image_url: impl Into<String>, architecture: &Architecture) -> Self {
        Self {
            image_url: image_url.into(),
            workdir: Utf8PathBuf::from(architecture.workdir_name()),
            disk_size: DEFAULT_DISK_SIZE.to_owned(),
            memory_size: DEFAULT_MEMORY_SIZE.to_owned(),
            persist: true,
        }
    }

    /// Overrides the disk size.
    #[must_use]
    pub fn with_disk_size(mut self, value: impl Into<String>) -> Self {
        self.disk_size = value.into();
        self
    }

    /// Overrides the memory size.
    #[must_use]
    pub fn with_memory_size(mut self, value: impl Into<String>) -> Self {
        self.memory_size = value.into();
        self
    }

    /// Checks that every field needed to boot is present.
    ///
    /// # Errors
    ///
    /// Returns [`BootSpecError::Empty`] naming the first empty field.
    pub fn validate(&self) -> Result<(), BootSpecError> {
        if self.image_url.trim().is_empty() {
            return Err(BootSpecError::Empty("image_url"));
        }
        if self.workdir.as_str().trim().is_empty() {
            return Err(BootSpecError::Empty("workdir"));
        }
        if self.disk_size.trim().is_empty() {
            return Err(BootSpecError::Empty("disk_size"));
        }
        if self.memory_size.trim().is_empty() {
            return Err(BootSpecError::Empty("memory_size"));
        }
        Ok(())
    }
}

/// Exit status of a command run in the guest shell.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CommandStatus {
    /// Value of `$?` after the command.
    pub exit_code: i32,
}

impl CommandStatus {
    /// Status of a command that exited zero.
    pub const SUCCESS: Self = Self { exit_code: 0 };

    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.exit_code == 0
    }
}

/// Future returned by guest operations.
pub type GuestFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Capability that boots a guest and drives its console.
pub trait GuestDriver {
    /// Handle to a running guest.
    type Session: Send;
    /// Driver specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Boots the guest described by `spec`, resolving once it is ready for a
    /// login.
    fn boot<'a>(&'a self, spec: &'a BootSpec) -> GuestFuture<'a, Self::Session, Self::Error>;

    /// Logs in at the guest's prompt.
    fn login<'a>(&'a self, session: &'a mut Self::Session) -> GuestFuture<'a, (), Self::Error>;

    /// Runs `command` in the guest shell and reports its exit status.
    /// Implementations should give up after `timeout`.
    fn shell_command<'a>(
        &'a self,
        session: &'a mut Self::Session,
        command: &'a str,
        timeout: Duration,
    ) -> GuestFuture<'a, CommandStatus, Self::Error>;

    /// Powers the guest off. Best effort: drivers may report a timeout even
    /// when the guest has already stopped.
    fn halt(&self, session: Self::Session) -> GuestFuture<'_, (), Self::Error>;
}
