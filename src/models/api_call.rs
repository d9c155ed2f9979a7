use std::collections::BTreeMap;

use ethers::types::{Bytes, H256};
use serde::Serialize;
use thiserror::Error;

use super::RequestErrorCode;

/// Why an API call produced no usable value.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct ApiCallError {
    pub code: RequestErrorCode,
    pub message: String,
}

impl ApiCallError {
    pub fn new(code: RequestErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// The ABI-encoded value to fulfill with, or the reason there is none.
pub type ApiCallResult = Result<Bytes, ApiCallError>;

/// One HTTP call standing in for every pending request that would make the
/// exact same call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedApiCall {
    pub id: String,
    pub endpoint_id: H256,
    pub endpoint_name: String,
    pub ois_title: String,
    pub parameters: BTreeMap<String, String>,
    pub request_ids: Vec<H256>,
    pub result: Option<ApiCallResult>,
}
