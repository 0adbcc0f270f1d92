//! Step definitions and helpers for the provisioning scenarios.

mod bdd_steps;
mod scenarios;
mod test_helpers;
