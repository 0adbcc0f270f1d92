//! Command-line interface definitions for the `nbvm` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `nbvm` binary.
#[derive(Debug, Parser)]
#[command(
    name = "nbvm",
    about = "Provision a NetBSD nightly VM as a build agent",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Target CPU architecture as named on the mirror (for example `amd64`).
    #[arg(value_name = "ARCHITECTURE")]
    pub(crate) architecture: String,
    /// Release whose binary packages are installed (for example `7.0`).
    #[arg(value_name = "RELEASE")]
    pub(crate) release: String,
    /// Boot this release image URL instead of searching the mirror.
    #[arg(long, value_name = "URL")]
    pub(crate) image_url: Option<String>,
    /// Print the guest command script and exit without booting.
    #[arg(long)]
    pub(crate) print_script: bool,
    /// Keep running the script after a command exits non-zero.
    ///
    /// Failed commands are listed at the end and the run still succeeds.
    #[arg(long)]
    pub(crate) continue_on_failure: bool,
}
