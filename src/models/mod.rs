//! Records that flow through one coordinator run.

pub mod api_call;
pub mod request;

pub use api_call::{AggregatedApiCall, ApiCallError, ApiCallResult};
pub use request::{
    Fulfillment, Request, RequestErrorCode, RequestMetadata, RequestStatus, RequestType,
};

use serde::Serialize;

/// Envelope for the HTTP status surface.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
