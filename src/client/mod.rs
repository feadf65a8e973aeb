//! Command-line client of a running server
//!
//! - `ApiClient` - the REST surface, also a [`SessionSource`](crate::reconcile::SessionSource)
//!   for the reconciler
//! - `attach_to_session` - raw terminal viewer over the WebSocket stream

mod api;
mod attach;

pub use api::{ApiClient, find_session};
pub use attach::{AttachResult, DETACH_BYTE, attach_to_session, split_at_detach};
