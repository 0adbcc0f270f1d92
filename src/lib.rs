//! Core library for the `nbvm` NetBSD build-agent provisioner.
//!
//! The crate finds the newest nightly NetBSD release for an architecture on
//! the daily-build FTP mirror, boots it through a [`GuestDriver`], and types
//! a fixed [`CommandScript`] at the guest console to turn it into a build
//! agent (networking, packages, agent startup script), then halts it.

pub mod config;
pub mod console;
pub mod guest;
pub mod logging;
pub mod mirror;
pub mod provision;
pub mod script;
pub mod target;
pub mod test_support;

pub use config::{ConfigError, MirrorSettings, NbvmConfig};
pub use console::{ConsoleError, ConsoleGuest, ConsoleSettings};
pub use guest::{BootSpec, BootSpecError, CommandStatus, GuestDriver};
pub use mirror::{
    FtpError, FtpMirror, LocateError, ReleaseImage, ReleaseListing, ReleaseLocator,
    locate_latest_release,
};
pub use provision::{FailurePolicy, ProvisionError, ProvisionReport, ProvisioningSession};
pub use script::{CommandScript, GuestCommand, ScriptSettings, ScriptStep};
pub use target::{Architecture, ReleaseToken, TokenError};
