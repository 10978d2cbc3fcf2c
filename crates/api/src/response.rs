//! Shared response envelope for coordinator handlers.
//!
//! Every successful reply is a flat JSON object carrying `"success": true`
//! next to the payload's own fields. Use [`SuccessResponse`] instead of
//! ad-hoc `serde_json::json!` so the shape is checked at compile time.

use serde::Serialize;

/// `{ "success": true, ...T }` response envelope.
///
/// # Example
///
/// ```ignore
/// Ok(Json(SuccessResponse::new(ClaimedJob { job_id })))
/// ```
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Payload for operations that return nothing beyond success.
#[derive(Debug, Serialize)]
pub struct Empty {}
