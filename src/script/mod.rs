//! Typed command script sent to the guest console.
//!
//! Each step is a [`GuestCommand`] rendered to shell text only when it is
//! sent. Heredoc bodies use quoted delimiters so nothing inside them is
//! expanded while typing, and every argument goes through `shell-escape`.

use std::time::Duration;

use shell_escape::unix::escape;

use crate::config::{DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_METADATA_URL, DEFAULT_PACKAGE_BASE_URL};
use crate::target::{Architecture, ReleaseToken};

mod bootstrap;

pub use bootstrap::{AgentBootstrap, DEFAULT_AGENT_PATH, DEFAULT_METADATA_HEADER};

/// Packages installed into the guest: shell, transfer tool, version control
/// client, root certificates and the bootstrap toolchain.
pub const DEFAULT_PACKAGES: [&str; 5] = ["bash", "curl", "git-base", "mozilla-rootcerts", "go14"];

const RC_LOCAL: &str = "/etc/rc.local";
const FSTAB: &str = "/etc/fstab";
const OPENSSL_CONFIG: &str = "/etc/openssl/openssl.cnf";
const ROOTCERTS_INSTALLER: &str = "/usr/pkg/sbin/mozilla-rootcerts";

/// A single shell action in the guest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GuestCommand {
    /// Appends `contents` to `path` through a heredoc.
    AppendFile {
        /// Target file.
        path: String,
        /// Text appended verbatim.
        contents: String,
    },
    /// Replaces `path` with a single line.
    WriteFile {
        /// Target file.
        path: String,
        /// Line written to the file.
        line: String,
    },
    /// Runs a program with arguments.
    Run {
        /// Program name or absolute path.
        program: String,
        /// Arguments, escaped individually.
        args: Vec<String>,
    },
    /// Edits `path` in place by feeding `ed` a script.
    EditFile {
        /// Target file.
        path: String,
        /// `ed` commands, one per line.
        commands: Vec<String>,
    },
    /// Installs binary packages from a repository.
    InstallPackages {
        /// Value for `PKG_PATH`.
        repository: String,
        /// Package names.
        packages: Vec<String>,
    },
    /// Creates `path` if it does not exist.
    Touch {
        /// Target file.
        path: String,
    },
    /// Flushes filesystem buffers.
    Sync,
}

impl GuestCommand {
    /// Renders the command as text typed at the guest shell.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::AppendFile { path, contents } => {
                heredoc(&format!("cat >> {}", quote(path)), contents)
            }
            Self::WriteFile { path, line } => format!("echo {} > {}", quote(line), quote(path)),
            Self::Run { program, args } => {
                let mut parts = vec![quote(program)];
                parts.extend(args.iter().map(|arg| quote(arg)));
                parts.join(" ")
            }
            Self::EditFile { path, commands } => {
                heredoc(&format!("ed {}", quote(path)), &commands.join("\n"))
            }
            Self::InstallPackages {
                repository,
                packages,
            } => {
                let mut parts = vec![
                    String::from("env"),
                    format!("PKG_PATH={}", quote(repository)),
                    String::from("pkg_add"),
                ];
                parts.extend(packages.iter().map(|package| quote(package)));
                parts.join(" ")
            }
            Self::Touch { path } => format!("touch {}", quote(path)),
            Self::Sync => String::from("sync"),
        }
    }
}

fn quote(value: &str) -> String {
    escape(value.into()).into_owned()
}

/// Builds `<command> <<'DELIM'` followed by `body` and the delimiter,
/// choosing a delimiter that does not occur as a line of `body`.
fn heredoc(command: &str, body: &str) -> String {
    let mut delimiter = String::from("EOF");
    while body.lines().any(|line| line == delimiter) {
        delimiter.push('_');
    }
    let body = body.trim_end_matches('\n');
    format!("{command} <<'{delimiter}'\n{body}\n{delimiter}")
}

/// A labelled command with its timeout.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptStep {
    /// Short description used in logs and errors.
    pub label: String,
    /// The command to send.
    pub command: GuestCommand,
    /// How long the guest may take to complete the command.
    pub timeout: Duration,
}

impl ScriptStep {
    /// Creates a step.
    #[must_use]
    pub fn new(label: impl Into<String>, command: GuestCommand, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            command,
            timeout,
        }
    }

    /// Renders the step's command.
    #[must_use]
    pub fn render(&self) -> String {
        self.command.render()
    }
}

/// Inputs for the build agent script that do not vary per architecture.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptSettings {
    /// Root of the binary package repositories.
    pub package_base_url: String,
    /// Metadata URL queried by the startup block.
    pub metadata_url: String,
    /// Interface configured for DHCP.
    pub network_interface: String,
    /// Disk device name in the installed `/etc/fstab`.
    pub fstab_device_from: String,
    /// Disk device name under the emulated controller.
    pub fstab_device_to: String,
    /// Packages to install.
    pub packages: Vec<String>,
    /// Timeout applied to every step.
    pub command_timeout: Duration,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            package_base_url: DEFAULT_PACKAGE_BASE_URL.to_owned(),
            metadata_url: DEFAULT_METADATA_URL.to_owned(),
            network_interface: String::from("vioif0"),
            fstab_device_from: String::from("wd0"),
            fstab_device_to: String::from("sd0"),
            packages: DEFAULT_PACKAGES.iter().map(|name| (*name).to_owned()).collect(),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }
}

impl ScriptSettings {
    /// Returns the `PKG_PATH` repository for `architecture` and `release`.
    #[must_use]
    pub fn package_repository(&self, architecture: &Architecture, release: &ReleaseToken) -> String {
        format!(
            "{}/{architecture}/{release}/All/",
            self.package_base_url.trim_end_matches('/')
        )
    }
}

/// Ordered, immutable list of steps consumed front to back.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandScript {
    steps: Vec<ScriptStep>,
}

impl CommandScript {
    /// Wraps an explicit list of steps.
    #[must_use]
    pub const fn new(steps: Vec<ScriptStep>) -> Self {
        Self { steps }
    }

    /// Builds the build-agent provisioning script. Order matters: each step
    /// relies on the state left by the previous one, and the final `sync`
    /// must precede the halt.
    #[must_use]
    pub fn build_agent(
        architecture: &Architecture,
        release: &ReleaseToken,
        settings: &ScriptSettings,
    ) -> Self {
        let timeout = settings.command_timeout;
        let interface = &settings.network_interface;
        let steps = vec![
            ScriptStep::new(
                "install agent startup script",
                GuestCommand::AppendFile {
                    path: RC_LOCAL.to_owned(),
                    contents: AgentBootstrap::new(&settings.metadata_url).render(),
                },
                timeout,
            ),
            ScriptStep::new(
                format!("configure dhcp on {interface}"),
                GuestCommand::WriteFile {
                    path: format!("/etc/ifconfig.{interface}"),
                    line: String::from("dhcp"),
                },
                timeout,
            ),
            ScriptStep::new(
                "start dhcp client",
                GuestCommand::Run {
                    program: String::from("dhcpcd"),
                    args: Vec::new(),
                },
                timeout,
            ),
            ScriptStep::new(
                "retarget fstab disk device",
                GuestCommand::EditFile {
                    path: FSTAB.to_owned(),
                    commands: vec![
                        String::from("H"),
                        format!(
                            "%s/{}/{}/",
                            settings.fstab_device_from, settings.fstab_device_to
                        ),
                        String::from("wq"),
                    ],
                },
                timeout,
            ),
            ScriptStep::new(
                "install packages",
                GuestCommand::InstallPackages {
                    repository: settings.package_repository(architecture, release),
                    packages: settings.packages.clone(),
                },
                timeout,
            ),
            ScriptStep::new(
                "create openssl config",
                GuestCommand::Touch {
                    path: OPENSSL_CONFIG.to_owned(),
                },
                timeout,
            ),
            ScriptStep::new(
                "install root certificates",
                GuestCommand::Run {
                    program: ROOTCERTS_INSTALLER.to_owned(),
                    args: vec![String::from("install")],
                },
                timeout,
            ),
            ScriptStep::new("flush filesystem buffers", GuestCommand::Sync, timeout),
        ];
        Self { steps }
    }

    /// Returns the steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` when the script has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Renders the whole script with a comment line naming each step.
    #[must_use]
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .map(|step| format!("# {}\n{}\n", step.label, step.render()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
