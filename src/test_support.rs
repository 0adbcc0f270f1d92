//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::ffi::OsString;
use std::future::{pending, ready};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::guest::{BootSpec, CommandStatus, GuestDriver, GuestFuture};
use crate::mirror::{ListingFuture, ReleaseListing};

/// Error returned by [`StaticListing`] for directories marked as failing.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("scripted listing failure for {path}")]
pub struct ListingFailure {
    /// Directory whose listing failed (`/` for the root).
    pub path: String,
}

/// In-memory release mirror.
///
/// Returns the seeded release names for the root listing and the seeded
/// entries (or nothing) for each release directory, recording every
/// release directory that was listed.
#[derive(Clone, Debug, Default)]
pub struct StaticListing {
    releases: Vec<String>,
    entries: BTreeMap<String, Vec<String>>,
    failing: Option<String>,
    listed: Vec<String>,
}

impl StaticListing {
    /// Creates a mirror whose root lists `releases` in the given order.
    #[must_use]
    pub fn new(releases: &[&str]) -> Self {
        Self {
            releases: releases.iter().map(|name| (*name).to_owned()).collect(),
            ..Self::default()
        }
    }

    /// Seeds the listing of `release`.
    #[must_use]
    pub fn with_entries(mut self, release: &str, entries: &[&str]) -> Self {
        self.entries.insert(
            release.to_owned(),
            entries.iter().map(|entry| (*entry).to_owned()).collect(),
        );
        self
    }

    /// Makes listing `path` fail. Use `/` for the root listing.
    #[must_use]
    pub fn failing_on(mut self, path: &str) -> Self {
        self.failing = Some(path.to_owned());
        self
    }

    /// Returns the release directories listed so far, in order.
    #[must_use]
    pub fn listed(&self) -> &[String] {
        &self.listed
    }

    fn check(&self, path: &str) -> Result<(), ListingFailure> {
        if self.failing.as_deref() == Some(path) {
            Err(ListingFailure {
                path: path.to_owned(),
            })
        } else {
            Ok(())
        }
    }
}

impl ReleaseListing for StaticListing {
    type Error = ListingFailure;

    fn list_releases(&mut self) -> ListingFuture<'_, Vec<String>, Self::Error> {
        let result = self.check("/").map(|()| self.releases.clone());
        Box::pin(ready(result))
    }

    fn list_release<'a>(
        &'a mut self,
        release: &'a str,
    ) -> ListingFuture<'a, Vec<String>, Self::Error> {
        self.listed.push(release.to_owned());
        let result = self
            .check(release)
            .map(|()| self.entries.get(release).cloned().unwrap_or_default());
        Box::pin(ready(result))
    }
}

/// Interaction recorded by [`ScriptedGuest`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GuestEvent {
    /// The guest was booted from `image_url` in `workdir`.
    Boot {
        /// Image URL from the boot spec.
        image_url: String,
        /// Working directory from the boot spec.
        workdir: String,
    },
    /// A login was attempted.
    Login,
    /// A command was sent to the guest shell.
    Command {
        /// Rendered command text.
        text: String,
        /// Timeout passed with the command.
        timeout: Duration,
    },
    /// The guest was halted.
    Halt,
}

/// Error returned by [`ScriptedGuest`] for operations marked as failing.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("scripted guest failure during {stage}")]
pub struct GuestFailure {
    /// Operation that failed.
    pub stage: &'static str,
}

/// Session handle issued by [`ScriptedGuest`].
#[derive(Debug, Default)]
pub struct ScriptedSession {
    commands_run: usize,
}

/// Guest driver double that records interactions and replies from a script.
///
/// Commands succeed unless an exit code was seeded for their position.
/// Clones share the recorded events.
#[derive(Clone, Debug, Default)]
pub struct ScriptedGuest {
    events: Arc<std::sync::Mutex<Vec<GuestEvent>>>,
    exit_codes: BTreeMap<usize, i32>,
    hang_on: Option<usize>,
    error_on: Option<usize>,
    fail_boot: bool,
    fail_login: bool,
    fail_halt: bool,
}

impl ScriptedGuest {
    /// Creates a guest on which every operation succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the command at `index` exit with `code`.
    #[must_use]
    pub fn with_exit_code(mut self, index: usize, code: i32) -> Self {
        self.exit_codes.insert(index, code);
        self
    }

    /// Makes the command at `index` never complete.
    #[must_use]
    pub const fn hanging_on(mut self, index: usize) -> Self {
        self.hang_on = Some(index);
        self
    }

    /// Makes the driver fail to run the command at `index`.
    #[must_use]
    pub const fn failing_command(mut self, index: usize) -> Self {
        self.error_on = Some(index);
        self
    }

    /// Makes `boot` fail.
    #[must_use]
    pub const fn failing_boot(mut self) -> Self {
        self.fail_boot = true;
        self
    }

    /// Makes `login` fail.
    #[must_use]
    pub const fn failing_login(mut self) -> Self {
        self.fail_login = true;
        self
    }

    /// Makes `halt` fail.
    #[must_use]
    pub const fn failing_halt(mut self) -> Self {
        self.fail_halt = true;
        self
    }

    /// Returns a snapshot of all recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<GuestEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the command texts sent so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                GuestEvent::Command { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Returns `true` once `halt` has been called.
    #[must_use]
    pub fn halted(&self) -> bool {
        self.events().contains(&GuestEvent::Halt)
    }

    fn record(&self, event: GuestEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    fn outcome<T>(failing: bool, stage: &'static str, value: T) -> Result<T, GuestFailure> {
        if failing {
            Err(GuestFailure { stage })
        } else {
            Ok(value)
        }
    }
}

impl GuestDriver for ScriptedGuest {
    type Session = ScriptedSession;
    type Error = GuestFailure;

    fn boot<'a>(&'a self, spec: &'a BootSpec) -> GuestFuture<'a, Self::Session, Self::Error> {
        self.record(GuestEvent::Boot {
            image_url: spec.image_url.clone(),
            workdir: spec.workdir.to_string(),
        });
        Box::pin(ready(Self::outcome(
            self.fail_boot,
            "boot",
            ScriptedSession::default(),
        )))
    }

    fn login<'a>(&'a self, _session: &'a mut Self::Session) -> GuestFuture<'a, (), Self::Error> {
        self.record(GuestEvent::Login);
        Box::pin(ready(Self::outcome(self.fail_login, "login", ())))
    }

    fn shell_command<'a>(
        &'a self,
        session: &'a mut Self::Session,
        command: &'a str,
        timeout: Duration,
    ) -> GuestFuture<'a, CommandStatus, Self::Error> {
        let index = session.commands_run;
        session.commands_run += 1;
        self.record(GuestEvent::Command {
            text: command.to_owned(),
            timeout,
        });

        if self.hang_on == Some(index) {
            return Box::pin(pending());
        }
        let exit_code = self.exit_codes.get(&index).copied().unwrap_or(0);
        Box::pin(ready(Self::outcome(
            self.error_on == Some(index),
            "command",
            CommandStatus { exit_code },
        )))
    }

    fn halt(&self, _session: Self::Session) -> GuestFuture<'_, (), Self::Error> {
        self.record(GuestEvent::Halt);
        Box::pin(ready(Self::outcome(self.fail_halt, "halt", ())))
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        let changes: Vec<_> = pairs.iter().map(|(key, value)| (*key, Some(*value))).collect();
        Self::apply(&changes).await
    }

    /// Sets (`Some`) or removes (`None`) variables while holding a global
    /// mutex.
    pub async fn apply(changes: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                changes.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(changes.len());
        for (key, value) in changes {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
