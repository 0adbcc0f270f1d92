//! BDD step definitions for nightly release discovery.

use nbvm::test_support::StaticListing;
use nbvm::{Architecture, ReleaseLocator, TokenError};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{BASE_URL, LocateContext, split_list};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a mirror listing releases \"{releases}\"")]
fn mirror_releases(mut locate_context: LocateContext, releases: String) -> LocateContext {
    locate_context.listing = StaticListing::new(&split_list(&releases));
    locate_context
}

#[given("release \"{release}\" lists \"{entries}\"")]
fn release_lists(
    mut locate_context: LocateContext,
    release: String,
    entries: String,
) -> LocateContext {
    locate_context.listing = locate_context
        .listing
        .with_entries(&release, &split_list(&entries));
    locate_context
}

#[when("I locate the latest \"{architecture}\" release")]
fn locate(locate_context: LocateContext, architecture: String) -> Result<LocateContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let architecture = Architecture::new(&architecture)?;
    let locator = ReleaseLocator::new(BASE_URL);
    let mut listing = locate_context.listing;

    let result = runtime.block_on(locator.find_latest_release(&mut listing, &architecture));
    let outcome = result
        .map(|image| image.url)
        .map_err(|err| err.to_string());

    Ok(LocateContext {
        listing,
        outcome: Some(outcome),
    })
}

#[then("the located URL ends with \"{suffix}\"")]
fn located_url(locate_context: &LocateContext, suffix: String) -> Result<(), StepError> {
    match &locate_context.outcome {
        Some(Ok(url)) if url.starts_with(BASE_URL) && url.ends_with(&suffix) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected URL ending with {suffix:?}, got {other:?}"
        ))),
    }
}

#[then("release \"{release}\" was listed")]
fn release_listed(locate_context: &LocateContext, release: String) -> Result<(), StepError> {
    if locate_context.listing.listed().contains(&release) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "release {release} should have been listed, listed: {:?}",
            locate_context.listing.listed()
        )))
    }
}

#[then("the lookup fails with \"{expected}\"")]
fn lookup_fails(locate_context: &LocateContext, expected: String) -> Result<(), StepError> {
    match &locate_context.outcome {
        Some(Err(message)) if message.contains(&expected) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected failure containing {expected:?}, got {other:?}"
        ))),
    }
}
