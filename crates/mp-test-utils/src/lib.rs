//! # MP Test Utilities
//!
//! Shared test utilities for the Meeting Provisioner:
//! - `TestServer` - the real router on a random port, with an in-memory
//!   session store and either the mock provider or a provider URL
//! - `mint_token` - caller tokens signed with the test secret
//! - `session` - session fixtures
//!
//! ```rust,ignore
//! use mp_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestServer::spawn().await?;
//!     let response = reqwest::get(format!("{}/health", server.url())).await?;
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod server_harness;

pub use fixtures::*;
pub use server_harness::*;
