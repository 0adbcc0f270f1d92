//! Guest driver backed by an external serial-console program.
//!
//! [`ConsoleGuest`] starts the configured console program (by default
//! `anita ... interact <url>`, which installs the release into the working
//! directory on first use and then boots it) on a pseudo-terminal, and talks
//! to the guest by typing lines and scanning the output for prompts. anita's
//! `interact` mode puts its standard input into raw mode, so plain pipes do
//! not work. Each
//! command is followed by an `echo` of a per-session marker and `$?` so the
//! exit status can be read back.

use std::fmt;
use std::time::Duration;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use pty_process::{OwnedReadPty, OwnedWritePty, Pty, Size};
use tokio::process::Child;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info};
use uuid::Uuid;

use crate::guest::{BootSpec, CommandStatus, GuestDriver, GuestFuture};

mod expect;

use expect::ConsoleBuffer;

const LOGIN_PROMPT: &str = "login:";
const ROOT_PROMPT: &str = "# ";
const READ_CHUNK: usize = 4096;
const TERMINAL_ROWS: u16 = 24;
const TERMINAL_COLUMNS: u16 = 80;

/// Settings for [`ConsoleGuest`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConsoleSettings {
    /// Console program to launch.
    pub program: String,
    /// Account to log in as.
    pub login_user: String,
    /// How long the guest may take to show its login prompt.
    pub boot_timeout: Duration,
    /// How long the login exchange may take.
    pub login_timeout: Duration,
    /// How long the guest may take to power off.
    pub halt_timeout: Duration,
}

/// Errors raised by the console driver.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConsoleError {
    /// Raised when the working directory cannot be created.
    #[error("failed to prepare working directory {path}: {message}")]
    Workdir {
        /// Working directory path.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the console program cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when reading from or writing to the console fails.
    #[error("console I/O failed: {message}")]
    Io {
        /// Operating system error string.
        message: String,
    },
    /// Raised when the expected output does not appear in time.
    #[error("timed out waiting for {waiting_for}")]
    Timeout {
        /// Description of the awaited output.
        waiting_for: String,
    },
    /// Raised when the console closes while output is still expected.
    #[error("console closed while waiting for {waiting_for}")]
    Closed {
        /// Description of the awaited output.
        waiting_for: String,
    },
}

fn io_error(err: &std::io::Error) -> ConsoleError {
    ConsoleError::Io {
        message: err.to_string(),
    }
}

/// Line-oriented conversation with a guest console.
#[derive(Debug)]
pub struct Console<R, W> {
    reader: R,
    writer: W,
    buffer: ConsoleBuffer,
    tag: String,
}

impl<R, W> Console<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Wraps the console's output stream and input stream.
    #[must_use]
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            buffer: ConsoleBuffer::default(),
            tag: format!("nbvm-{}", Uuid::new_v4().simple()),
        }
    }

    /// Shell prompt installed by [`Console::login`].
    #[must_use]
    pub fn prompt(&self) -> String {
        format!("{}{ROOT_PROMPT}", self.tag)
    }

    /// Waits for the login prompt.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError`] when the prompt does not appear in time or the
    /// console closes.
    pub async fn wait_for_login_prompt(&mut self, limit: Duration) -> Result<(), ConsoleError> {
        let deadline = Instant::now() + limit;
        self.wait_for_text(LOGIN_PROMPT, deadline).await
    }

    /// Logs in as `user`, switches to `/bin/sh` and installs a unique prompt
    /// so later matches cannot be confused by command output.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError`] when a prompt does not appear in time or the
    /// console fails.
    pub async fn login(&mut self, user: &str, limit: Duration) -> Result<(), ConsoleError> {
        let deadline = Instant::now() + limit;
        self.send_line(user).await?;
        self.wait_for_text(ROOT_PROMPT, deadline).await?;
        self.send_line("exec /bin/sh").await?;
        self.wait_for_text(ROOT_PROMPT, deadline).await?;

        // Quoted in two parts so the echoed assignment never matches the prompt.
        let assignment = format!("PS1='{}''{ROOT_PROMPT}'", self.tag);
        self.send_line(&assignment).await?;
        let prompt = self.prompt();
        self.wait_for_text(&prompt, deadline).await?;
        debug!(%prompt, "installed guest shell prompt");
        Ok(())
    }

    /// Types `command`, then reads back its exit status.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::Timeout`] when the status or the following
    /// prompt does not appear within `limit`.
    pub async fn run_command(&mut self, command: &str, limit: Duration) -> Result<i32, ConsoleError> {
        let deadline = Instant::now() + limit;
        let marker = format!("{}-exit", self.tag);
        self.send_line(command).await?;
        self.send_line(&format!("echo '{marker}':$?:")).await?;

        let exit_code = self
            .wait_for("command exit status", deadline, |buffer| {
                buffer.take_exit_code(&marker)
            })
            .await?;
        let prompt = self.prompt();
        self.wait_for_text(&prompt, deadline).await?;
        Ok(exit_code)
    }

    /// Writes `line` followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::Io`] when the write fails.
    pub async fn send_line(&mut self, line: &str) -> Result<(), ConsoleError> {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|err| io_error(&err))?;
        self.writer.flush().await.map_err(|err| io_error(&err))
    }

    async fn wait_for_text(&mut self, needle: &str, deadline: Instant) -> Result<(), ConsoleError> {
        self.wait_for(&format!("{needle:?}"), deadline, |buffer| {
            buffer.take_through(needle).then_some(())
        })
        .await
    }

    async fn wait_for<T, F>(
        &mut self,
        waiting_for: &str,
        deadline: Instant,
        mut matcher: F,
    ) -> Result<T, ConsoleError>
    where
        F: FnMut(&mut ConsoleBuffer) -> Option<T> + Send,
    {
        let mut chunk = vec![0_u8; READ_CHUNK];
        loop {
            if let Some(found) = matcher(&mut self.buffer) {
                return Ok(found);
            }
            let read = match timeout_at(deadline, self.reader.read(&mut chunk)).await {
                Ok(Ok(read)) => read,
                Ok(Err(err)) => return Err(io_error(&err)),
                Err(_) => {
                    return Err(ConsoleError::Timeout {
                        waiting_for: waiting_for.to_owned(),
                    });
                }
            };
            if read == 0 {
                return Err(ConsoleError::Closed {
                    waiting_for: waiting_for.to_owned(),
                });
            }
            self.buffer.push(chunk.get(..read).unwrap_or_default());
        }
    }
}

/// Running console program and its conversation. Dropping the session
/// kills the program.
pub struct ConsoleSession {
    child: Child,
    console: Console<OwnedReadPty, OwnedWritePty>,
}

impl fmt::Debug for ConsoleSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleSession")
            .field("child", &self.child)
            .field("prompt", &self.console.prompt())
            .finish_non_exhaustive()
    }
}

impl Drop for ConsoleSession {
    fn drop(&mut self) {
        self.child.start_kill().ok();
    }
}

/// [`GuestDriver`] that launches a console program per boot.
#[derive(Clone, Debug)]
pub struct ConsoleGuest {
    settings: ConsoleSettings,
}

impl ConsoleGuest {
    /// Creates a driver with the given settings.
    #[must_use]
    pub const fn new(settings: ConsoleSettings) -> Self {
        Self { settings }
    }

    /// Returns the driver settings.
    #[must_use]
    pub const fn settings(&self) -> &ConsoleSettings {
        &self.settings
    }

    async fn start(&self, spec: &BootSpec) -> Result<ConsoleSession, ConsoleError> {
        prepare_workdir(&spec.workdir)?;
        let args = console_args(spec);
        info!(program = %self.settings.program, ?args, "starting guest console");

        let (child, pty) = self.spawn_on_pty(&args)?;
        let (reader, writer) = pty.into_split();
        let mut session = ConsoleSession {
            child,
            console: Console::new(reader, writer),
        };
        session
            .console
            .wait_for_login_prompt(self.settings.boot_timeout)
            .await?;
        Ok(session)
    }

    fn spawn_on_pty(&self, args: &[String]) -> Result<(Child, Pty), ConsoleError> {
        let spawn_error = |message: String| ConsoleError::Spawn {
            program: self.settings.program.clone(),
            message,
        };
        let pty = Pty::new().map_err(|err| spawn_error(err.to_string()))?;
        pty.resize(Size::new(TERMINAL_ROWS, TERMINAL_COLUMNS))
            .map_err(|err| spawn_error(err.to_string()))?;
        let pts = pty.pts().map_err(|err| spawn_error(err.to_string()))?;
        let mut command = pty_process::Command::new(&self.settings.program);
        command.args(args);
        let child = command
            .spawn(&pts)
            .map_err(|err| spawn_error(err.to_string()))?;
        Ok((child, pty))
    }

    async fn stop(&self, mut session: ConsoleSession) -> Result<(), ConsoleError> {
        session.console.send_line("halt -p").await?;
        match timeout(self.settings.halt_timeout, session.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "console program exited");
                Ok(())
            }
            Ok(Err(err)) => Err(io_error(&err)),
            Err(_) => {
                session.child.start_kill().ok();
                Err(ConsoleError::Timeout {
                    waiting_for: String::from("guest power-off"),
                })
            }
        }
    }
}

impl GuestDriver for ConsoleGuest {
    type Session = ConsoleSession;
    type Error = ConsoleError;

    fn boot<'a>(&'a self, spec: &'a BootSpec) -> GuestFuture<'a, Self::Session, Self::Error> {
        Box::pin(self.start(spec))
    }

    fn login<'a>(&'a self, session: &'a mut Self::Session) -> GuestFuture<'a, (), Self::Error> {
        Box::pin(
            session
                .console
                .login(&self.settings.login_user, self.settings.login_timeout),
        )
    }

    fn shell_command<'a>(
        &'a self,
        session: &'a mut Self::Session,
        command: &'a str,
        limit: Duration,
    ) -> GuestFuture<'a, CommandStatus, Self::Error> {
        Box::pin(async move {
            let exit_code = session.console.run_command(command, limit).await?;
            Ok(CommandStatus { exit_code })
        })
    }

    fn halt(&self, session: Self::Session) -> GuestFuture<'_, (), Self::Error> {
        Box::pin(self.stop(session))
    }
}

/// Arguments passed to the console program for `spec`.
#[must_use]
pub fn console_args(spec: &BootSpec) -> Vec<String> {
    let mut args = vec![
        String::from("--workdir"),
        spec.workdir.to_string(),
        String::from("--disk-size"),
        spec.disk_size.clone(),
        String::from("--memory-size"),
        spec.memory_size.clone(),
    ];
    if spec.persist {
        args.push(String::from("--persist"));
    }
    args.push(String::from("interact"));
    args.push(spec.image_url.clone());
    args
}

fn prepare_workdir(path: &Utf8Path) -> Result<(), ConsoleError> {
    Dir::create_ambient_dir_all(path, ambient_authority()).map_err(|err| ConsoleError::Workdir {
        path: path.to_string(),
        message: err.to_string(),
    })
}
