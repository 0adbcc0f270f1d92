//! Step definitions and helpers for the release lookup scenarios.

mod bdd_steps;
mod scenarios;
mod test_helpers;
