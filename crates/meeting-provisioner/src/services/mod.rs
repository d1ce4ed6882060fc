//! Business logic services for the Meeting Provisioner.
//!
//! # Components
//!
//! - `provider_client` - External meeting provider API client
//! - `provider_selector` - Maps a session's provider choice to a backend
//! - `session_binder` - Provisions and persists a session's meeting

pub mod provider_client;
pub mod provider_selector;
pub mod session_binder;

pub use provider_client::{MeetingProvider, MeetingProviderClient};
pub use provider_selector::{ConferencingBackend, ProviderSelector};
pub use session_binder::SessionMeetingBinder;
