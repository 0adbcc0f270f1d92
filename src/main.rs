//! Binary entry point for the `nbvm` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::{info, warn};

use nbvm::logging::init_logging;
use nbvm::{
    Architecture, BootSpec, CommandScript, ConfigError, ConsoleError, ConsoleGuest,
    FailurePolicy, FtpError, LocateError, NbvmConfig, ProvisionError, ProvisionReport,
    ProvisioningSession, ReleaseToken, TokenError, locate_latest_release,
};

mod cli;

use cli::Cli;


#[derive(Debug, Error)]
enum CliError {
    #[error("invalid argument: {0}")]
    Token(#[from] TokenError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("release lookup failed: {0}")]
    Locate(#[from] LocateError<FtpError>),
    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError<ConsoleError>),
    #[error("failed to write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    let exit_code = match execute(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn execute(cli: Cli) -> Result<(), CliError> {
    let architecture = Architecture::new(&cli.architecture)?;
    let release = ReleaseToken::new(&cli.release)?;

    let config = NbvmConfig::load_without_cli_args()?;
    config.validate()?;
    let script = CommandScript::build_agent(&architecture, &release, &config.script_settings());

    if cli.print_script {
        return write_script(io::stdout(), &script);
    }

    let image_url = match cli.image_url {
        Some(url) => url,
        None => {
            locate_latest_release(&config.mirror_settings(), &architecture)
                .await?
                .url
        }
    };
    let spec = BootSpec::for_architecture(image_url, &architecture)
        .with_disk_size(config.disk_size.trim())
        .with_memory_size(config.memory_size.trim());

    let policy = if cli.continue_on_failure {
        FailurePolicy::Continue
    } else {
        config.failure_policy()
    };
    let session = ProvisioningSession::new(ConsoleGuest::new(config.console_settings()))
        .with_failure_policy(policy);
    let report = session.run(&spec, &script).await?;
    summarise(&report);
    Ok(())
}

fn summarise(report: &ProvisionReport) {
    for step in &report.failed {
        warn!(
            step = step.index + 1,
            label = %step.label,
            exit_code = step.exit_code,
            "guest command failed"
        );
    }
    info!(
        executed = report.executed,
        failed = report.failed.len(),
        "provisioning finished"
    );
}

fn write_script(mut target: impl Write, script: &CommandScript) -> Result<(), CliError> {
    writeln!(target, "{}", script.render()).map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
