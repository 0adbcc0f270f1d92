//! Nightly release discovery on the NetBSD daily-build mirror.
//!
//! The mirror publishes one directory per nightly build beneath a fixed root
//! (for example `/pub/NetBSD-daily/HEAD/202401010000Z`), each containing one
//! sub-directory per architecture that was built. [`ReleaseLocator`] walks
//! the builds newest-first and returns the first one that carries the
//! requested architecture.

use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::MirrorSettings;
use crate::target::Architecture;

mod ftp;

pub use ftp::{FtpError, FtpMirror, FtpReply};

#[cfg(test)]
mod tests;

/// Future returned by listing operations.
pub type ListingFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Directory listing capability of the release mirror.
///
/// Implementations are positioned at the nightly-build root before the
/// locator uses them.
pub trait ReleaseListing {
    /// Transport specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists the names of the nightly build directories beneath the root.
    fn list_releases(&mut self) -> ListingFuture<'_, Vec<String>, Self::Error>;

    /// Lists the entries of a single nightly build directory.
    fn list_release<'a>(
        &'a mut self,
        release: &'a str,
    ) -> ListingFuture<'a, Vec<String>, Self::Error>;
}

/// Location of a nightly release image for one architecture.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleaseImage {
    /// Name of the nightly build directory (for example `202401010000Z`).
    pub release: String,
    /// Architecture entry within the build directory (for example `amd64`).
    pub entry: String,
    /// Fully qualified URL of the architecture directory, with a trailing `/`.
    pub url: String,
}

/// Errors raised while locating a release.
#[derive(Debug, Error)]
pub enum LocateError<ListingError>
where
    ListingError: std::error::Error + 'static,
{
    /// Raised when the mirror cannot be reached or a listing fails.
    #[error("failed to list release mirror: {0}")]
    Listing(#[source] ListingError),
    /// Raised when no nightly build carries the requested architecture.
    #[error("no nightly release found for architecture {architecture}")]
    NotFound {
        /// Architecture that was requested.
        architecture: String,
    },
}

/// Ordering key for nightly build directory names.
///
/// Build directories are date-stamped (`202401010000Z`), so the leading digit
/// run is compared numerically and the remainder lexically. For same-width
/// stamps this agrees with plain lexicographic order. It differs elsewhere:
/// stamps of different widths compare by value (`9` sorts below `10`), and
/// names without a digit prefix (`latest`) rank below every stamped name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleaseKey<'a> {
    dated: bool,
    stamp: &'a str,
    suffix: &'a str,
}

impl<'a> ReleaseKey<'a> {
    /// Splits `name` into its numeric stamp and suffix.
    #[must_use]
    pub fn parse(name: &'a str) -> Self {
        let split = name
            .find(|ch: char| !ch.is_ascii_digit())
            .unwrap_or(name.len());
        let (digits, suffix) = name.split_at(split);
        Self {
            dated: !digits.is_empty(),
            stamp: digits.trim_start_matches('0'),
            suffix,
        }
    }
}

impl Ord for ReleaseKey<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dated
            .cmp(&other.dated)
            .then_with(|| self.stamp.len().cmp(&other.stamp.len()))
            .then_with(|| self.stamp.cmp(other.stamp))
            .then_with(|| self.suffix.cmp(other.suffix))
    }
}

impl PartialOrd for ReleaseKey<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sorts release names newest first.
pub fn sort_newest_first(releases: &mut [String]) {
    releases.sort_by(|lhs, rhs| ReleaseKey::parse(rhs).cmp(&ReleaseKey::parse(lhs)));
}

/// Finds the newest nightly release that publishes a given architecture.
#[derive(Clone, Debug)]
pub struct ReleaseLocator {
    base_url: String,
}

impl ReleaseLocator {
    /// Creates a locator that composes URLs beneath `base_url`
    /// (for example `ftp://nyftp.netbsd.org/pub/NetBSD-daily/HEAD`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Returns the base URL used to compose release URLs.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Walks the nightly builds newest-first and returns the first one whose
    /// listing contains an entry ending with `architecture`.
    ///
    /// Builds with an empty listing are skipped. Within a build the first
    /// matching entry in listing order wins.
    ///
    /// # Errors
    ///
    /// Returns [`LocateError::Listing`] when a listing fails and
    /// [`LocateError::NotFound`] when no build carries the architecture.
    pub async fn find_latest_release<L>(
        &self,
        listing: &mut L,
        architecture: &Architecture,
    ) -> Result<ReleaseImage, LocateError<L::Error>>
    where
        L: ReleaseListing + Send,
    {
        let mut releases = listing
            .list_releases()
            .await
            .map_err(LocateError::Listing)?;
        sort_newest_first(&mut releases);
        debug!(count = releases.len(), "listed nightly releases");

        for release in releases {
            let entries = listing
                .list_release(&release)
                .await
                .map_err(LocateError::Listing)?;
            if entries.is_empty() {
                debug!(%release, "skipping release with empty listing");
                continue;
            }

            let matched = entries
                .iter()
                .map(|entry| normalise_entry(&release, entry))
                .find(|entry| entry.ends_with(architecture.as_str()));
            let Some(entry) = matched else {
                debug!(%release, %architecture, "release does not publish architecture");
                continue;
            };

            let url = format!("{}/{release}/{entry}/", self.base_url);
            info!(%release, %url, "selected nightly release");
            return Ok(ReleaseImage {
                entry: entry.to_owned(),
                release,
                url,
            });
        }

        Err(LocateError::NotFound {
            architecture: architecture.to_string(),
        })
    }
}

/// Strips a leading `<release>/` prefix (some servers return full paths from
/// `NLST <dir>`) and any trailing `/`.
fn normalise_entry<'a>(release: &str, entry: &'a str) -> &'a str {
    let trimmed = entry.trim().trim_end_matches('/');
    trimmed
        .strip_prefix(release)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(trimmed)
}

/// Connects to the configured FTP mirror and locates the newest release for
/// `architecture`. The control connection is closed afterwards.
///
/// # Errors
///
/// Returns [`LocateError`] when the mirror is unreachable, a listing fails,
/// or no release carries the architecture.
pub async fn locate_latest_release(
    settings: &MirrorSettings,
    architecture: &Architecture,
) -> Result<ReleaseImage, LocateError<FtpError>> {
    let mut mirror = FtpMirror::connect(settings)
        .await
        .map_err(LocateError::Listing)?;
    let locator = ReleaseLocator::new(settings.base_url());
    let result = locator.find_latest_release(&mut mirror, architecture).await;
    if let Err(err) = mirror.quit().await {
        debug!(error = %err, "ignoring error while closing mirror connection");
    }
    result
}
