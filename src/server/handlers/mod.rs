pub mod directories;
pub mod health;
pub mod sessions;
pub mod ws;

use crate::session::SessionId;

use super::error::ApiError;

/// Parse a session id from a path segment or request body
pub fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid session id: {}", raw)))
}
