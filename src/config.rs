//! Configuration loading via `ortho-config`.
//!
//! Values merge defaults, `nbvm.toml` discovered on the usual paths (or the
//! file named by `NBVM_CONFIG_PATH`), and `NBVM_*` environment variables.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::console::ConsoleSettings;
use crate::provision::FailurePolicy;
use crate::script::ScriptSettings;

/// Default FTP host serving the NetBSD daily builds.
pub const DEFAULT_MIRROR_HOST: &str = "nyftp.netbsd.org";

/// Default root directory of the nightly `HEAD` builds.
pub const DEFAULT_MIRROR_ROOT: &str = "/pub/NetBSD-daily/HEAD";

/// Default binary package repository root; the architecture, release and
/// `All/` are appended.
pub const DEFAULT_PACKAGE_BASE_URL: &str = "http://ftp.netbsd.org/pub/pkgsrc/packages/NetBSD";

/// Default metadata attribute holding the build agent download URL.
pub const DEFAULT_METADATA_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/attributes/buildlet-binary-url";

/// Default per-command timeout in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;

const FTP_PORT: u16 = 21;

/// Provisioning settings layered from defaults, files and environment.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "NBVM",
    discovery(
        app_name = "nbvm",
        env_var = "NBVM_CONFIG_PATH",
        config_file_name = "nbvm.toml",
        dotfile_name = ".nbvm.toml",
        project_file_name = "nbvm.toml"
    )
)]
pub struct NbvmConfig {
    /// FTP host publishing the nightly builds.
    #[ortho_config(default = DEFAULT_MIRROR_HOST.to_owned())]
    pub mirror_host: String,
    /// FTP control port.
    #[ortho_config(default = 21)]
    pub mirror_port: u16,
    /// Directory on the mirror containing one sub-directory per nightly build.
    #[ortho_config(default = DEFAULT_MIRROR_ROOT.to_owned())]
    pub mirror_root: String,
    /// Timeout in seconds for each mirror network operation.
    #[ortho_config(default = 30)]
    pub mirror_timeout_secs: u64,
    /// Root of the binary package repositories.
    #[ortho_config(default = DEFAULT_PACKAGE_BASE_URL.to_owned())]
    pub package_base_url: String,
    /// Metadata URL the guest queries on boot for the build agent location.
    #[ortho_config(default = DEFAULT_METADATA_URL.to_owned())]
    pub metadata_url: String,
    /// Guest network interface configured for DHCP.
    #[ortho_config(default = "vioif0".to_owned())]
    pub network_interface: String,
    /// Virtual disk size passed to the guest driver.
    #[ortho_config(default = "4G".to_owned())]
    pub disk_size: String,
    /// Guest memory size passed to the guest driver.
    #[ortho_config(default = "1G".to_owned())]
    pub memory_size: String,
    /// Timeout in seconds applied to every scripted command.
    #[ortho_config(default = DEFAULT_COMMAND_TIMEOUT_SECS)]
    pub command_timeout_secs: u64,
    /// Keep running the remaining commands after one exits non-zero.
    #[ortho_config(default = false)]
    pub continue_on_command_failure: bool,
    /// Console program that boots the guest and exposes its serial console.
    #[ortho_config(default = "anita".to_owned())]
    pub console_program: String,
    /// Account used to log in on the guest console.
    #[ortho_config(default = "root".to_owned())]
    pub login_user: String,
    /// Timeout in seconds for the guest to reach its login prompt. Covers the
    /// initial install on a fresh working directory.
    #[ortho_config(default = 3600)]
    pub boot_timeout_secs: u64,
    /// Timeout in seconds for the login exchange.
    #[ortho_config(default = 300)]
    pub login_timeout_secs: u64,
    /// Timeout in seconds for the guest to power off after `halt -p`.
    #[ortho_config(default = 300)]
    pub halt_timeout_secs: u64,
}

/// Connection settings for the release mirror.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MirrorSettings {
    /// FTP host name.
    pub host: String,
    /// FTP control port.
    pub port: u16,
    /// Nightly build root, always starting with `/`.
    pub root: String,
    /// Timeout applied to every network operation.
    pub io_timeout: Duration,
}

impl MirrorSettings {
    /// Returns the `ftp://` URL of the nightly build root, without a trailing
    /// slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        let root = self.root.trim_end_matches('/');
        if self.port == FTP_PORT {
            format!("ftp://{}{root}", self.url_host())
        } else {
            format!("ftp://{}{root}", self.authority())
        }
    }

    /// Returns `host:port`, bracketing IPv6 literals.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.url_host(), self.port)
    }

    fn url_host(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to nbvm.toml",
            self.description, self.env_var, self.toml_key
        ))
    }

    fn zero(&self) -> ConfigError {
        ConfigError::InvalidValue(format!(
            "{} must be greater than zero: set {} or {} in nbvm.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

impl NbvmConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("nbvm")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply the value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required string is empty
    /// and [`ConfigError::InvalidValue`] when a port or timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                &self.mirror_host,
                FieldMetadata::new("mirror host", "NBVM_MIRROR_HOST", "mirror_host"),
            ),
            (
                &self.mirror_root,
                FieldMetadata::new("mirror root", "NBVM_MIRROR_ROOT", "mirror_root"),
            ),
            (
                &self.package_base_url,
                FieldMetadata::new(
                    "package repository URL",
                    "NBVM_PACKAGE_BASE_URL",
                    "package_base_url",
                ),
            ),
            (
                &self.metadata_url,
                FieldMetadata::new("metadata URL", "NBVM_METADATA_URL", "metadata_url"),
            ),
            (
                &self.network_interface,
                FieldMetadata::new(
                    "network interface",
                    "NBVM_NETWORK_INTERFACE",
                    "network_interface",
                ),
            ),
            (
                &self.disk_size,
                FieldMetadata::new("disk size", "NBVM_DISK_SIZE", "disk_size"),
            ),
            (
                &self.memory_size,
                FieldMetadata::new("memory size", "NBVM_MEMORY_SIZE", "memory_size"),
            ),
            (
                &self.console_program,
                FieldMetadata::new("console program", "NBVM_CONSOLE_PROGRAM", "console_program"),
            ),
            (
                &self.login_user,
                FieldMetadata::new("login user", "NBVM_LOGIN_USER", "login_user"),
            ),
        ];
        for (value, metadata) in &required {
            if value.trim().is_empty() {
                return Err(metadata.missing());
            }
        }

        if self.mirror_port == 0 {
            return Err(FieldMetadata::new("mirror port", "NBVM_MIRROR_PORT", "mirror_port").zero());
        }
        let timeouts = [
            (
                self.mirror_timeout_secs,
                FieldMetadata::new(
                    "mirror timeout",
                    "NBVM_MIRROR_TIMEOUT_SECS",
                    "mirror_timeout_secs",
                ),
            ),
            (
                self.command_timeout_secs,
                FieldMetadata::new(
                    "command timeout",
                    "NBVM_COMMAND_TIMEOUT_SECS",
                    "command_timeout_secs",
                ),
            ),
            (
                self.boot_timeout_secs,
                FieldMetadata::new("boot timeout", "NBVM_BOOT_TIMEOUT_SECS", "boot_timeout_secs"),
            ),
            (
                self.login_timeout_secs,
                FieldMetadata::new(
                    "login timeout",
                    "NBVM_LOGIN_TIMEOUT_SECS",
                    "login_timeout_secs",
                ),
            ),
            (
                self.halt_timeout_secs,
                FieldMetadata::new("halt timeout", "NBVM_HALT_TIMEOUT_SECS", "halt_timeout_secs"),
            ),
        ];
        for (value, metadata) in &timeouts {
            if *value == 0 {
                return Err(metadata.zero());
            }
        }
        Ok(())
    }

    /// Returns the release mirror connection settings.
    #[must_use]
    pub fn mirror_settings(&self) -> MirrorSettings {
        let root = self.mirror_root.trim();
        MirrorSettings {
            host: self.mirror_host.trim().to_owned(),
            port: self.mirror_port,
            root: if root.starts_with('/') {
                root.to_owned()
            } else {
                format!("/{root}")
            },
            io_timeout: Duration::from_secs(self.mirror_timeout_secs),
        }
    }

    /// Returns the settings used to render the guest command script.
    #[must_use]
    pub fn script_settings(&self) -> ScriptSettings {
        ScriptSettings {
            package_base_url: self.package_base_url.trim().to_owned(),
            metadata_url: self.metadata_url.trim().to_owned(),
            network_interface: self.network_interface.trim().to_owned(),
            command_timeout: self.command_timeout(),
            ..ScriptSettings::default()
        }
    }

    /// Returns the settings used by the console guest driver.
    #[must_use]
    pub fn console_settings(&self) -> ConsoleSettings {
        ConsoleSettings {
            program: self.console_program.trim().to_owned(),
            login_user: self.login_user.trim().to_owned(),
            boot_timeout: Duration::from_secs(self.boot_timeout_secs),
            login_timeout: Duration::from_secs(self.login_timeout_secs),
            halt_timeout: Duration::from_secs(self.halt_timeout_secs),
        }
    }

    /// Returns the timeout applied to each scripted command.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Returns how the session reacts to a command exiting non-zero.
    #[must_use]
    pub const fn failure_policy(&self) -> FailurePolicy {
        if self.continue_on_command_failure {
            FailurePolicy::Continue
        } else {
            FailurePolicy::Abort
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a numeric field holds an unusable value.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
