//! Observability for the Meeting Provisioner.
//!
//! Provides metrics definitions and recording helpers.

pub mod metrics;
