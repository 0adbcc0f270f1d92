//! Startup block appended to the guest's `/etc/rc.local`.
//!
//! On every boot the block extends `PATH`, logs the network state, then in a
//! fail-fast sub-shell downloads the build agent named by the metadata
//! service and `exec`s it. If anything in that sub-shell fails the guest
//! waits briefly and powers off.

use shell_escape::unix::escape;

/// Default location the agent binary is downloaded to.
pub const DEFAULT_AGENT_PATH: &str = "/buildlet";

/// Header required by the metadata service.
pub const DEFAULT_METADATA_HEADER: &str = "Metadata-Flavor: Google";

/// Typed description of the `rc.local` startup block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AgentBootstrap {
    /// Directories prepended to `PATH`.
    pub path_prefix: Vec<String>,
    /// Additional exported variables, in order.
    pub environment: Vec<(String, String)>,
    /// Metadata URL whose body is the agent download URL.
    pub metadata_url: String,
    /// Header sent with the metadata request.
    pub metadata_header: String,
    /// Where the agent binary is written in the guest.
    pub agent_path: String,
    /// Seconds to wait before powering off after a failure.
    pub give_up_delay_secs: u32,
}

impl AgentBootstrap {
    /// Creates the standard block fetching the agent URL from `metadata_url`.
    #[must_use]
    pub fn new(metadata_url: impl Into<String>) -> Self {
        Self {
            path_prefix: vec![String::from("/usr/pkg/bin"), String::from("/usr/pkg/sbin")],
            environment: vec![(
                String::from("GOROOT_BOOTSTRAP"),
                String::from("/usr/pkg/go14"),
            )],
            metadata_url: metadata_url.into(),
            metadata_header: DEFAULT_METADATA_HEADER.to_owned(),
            agent_path: DEFAULT_AGENT_PATH.to_owned(),
            give_up_delay_secs: 10,
        }
    }

    /// Renders the block as shell text. `${PATH}` and the command
    /// substitution are left for the guest to expand at boot time.
    #[must_use]
    pub fn render(&self) -> String {
        let agent = escape(self.agent_path.as_str().into());
        let mut lines = vec![String::from("(")];

        let mut path = self.path_prefix.join(":");
        if !path.is_empty() {
            path.push(':');
        }
        lines.push(format!("  export PATH={path}${{PATH}}"));
        for (key, value) in &self.environment {
            lines.push(format!("  export {key}={}", escape(value.as_str().into())));
        }

        lines.push(String::from("  set -x"));
        lines.push(String::from("  echo 'starting build agent script'"));
        lines.push(String::from("  netstat -rn"));
        lines.push(String::from("  cat /etc/resolv.conf"));
        if let Some(host) = url_host(&self.metadata_url) {
            lines.push(format!("  dig {}", escape(host.into())));
        }

        lines.push(String::from("  ("));
        lines.push(String::from("    set -e"));
        lines.push(format!(
            "    curl -o {agent} $(curl -H {} {})",
            escape(self.metadata_header.as_str().into()),
            escape(self.metadata_url.as_str().into())
        ));
        lines.push(format!("    chmod +x {agent}"));
        lines.push(format!("    exec {agent}"));
        lines.push(String::from("  )"));

        lines.push(String::from("  echo 'giving up'"));
        lines.push(format!("  sleep {}", self.give_up_delay_secs));
        lines.push(String::from("  halt -p"));
        lines.push(String::from(")"));
        lines.join("\n")
    }
}

/// Extracts the host from a `scheme://host[:port]/path` URL.
fn url_host(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split('/').next()?;
    let host = authority.split(':').next()?;
    (!host.is_empty()).then_some(host)
}
