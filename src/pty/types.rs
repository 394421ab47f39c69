//! Control-plane types and models.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Session information for API responses.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Unique session ID (UUID)
    pub id: String,
    /// Human-readable session name
    pub name: String,
    /// Creation timestamp (Unix epoch seconds)
    pub created_at: f64,
    /// Whether any client stream is currently attached
    pub attached: bool,
}

/// Request to create a new session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    /// Session name (auto-generated if not provided)
    pub name: Option<String>,
}

/// Request to rename a session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RenameSessionRequest {
    pub name: String,
}

/// Response to a bulk-close request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClosedResponse {
    /// Number of sessions closed
    pub closed: usize,
}

/// Health check endpoint response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}
