//! HTTP request handlers for the Meeting Provisioner.

pub mod health;
pub mod meetings;
pub mod metrics;
pub mod sessions;

pub use health::{health_check, readiness_check};
pub use meetings::{create_meeting, delete_meeting, get_meeting, update_meeting};
pub use metrics::metrics_handler;
pub use sessions::{bind_session_meeting, unbind_session_meeting};
