//! Shared fixtures for release discovery BDD scenarios.

use nbvm::test_support::StaticListing;
use rstest::fixture;

pub const BASE_URL: &str = "ftp://nyftp.netbsd.org/pub/NetBSD-daily/HEAD";

#[derive(Clone, Debug)]
pub struct LocateContext {
    pub listing: StaticListing,
    pub outcome: Option<Result<String, String>>,
}

#[fixture]
pub fn locate_context() -> LocateContext {
    LocateContext {
        listing: StaticListing::default(),
        outcome: None,
    }
}

/// Splits a comma separated feature-file list.
pub fn split_list(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect()
}
