//! On-chain requests and their per-run state machine.

use std::collections::BTreeMap;
use std::fmt;

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestType {
    ApiCall,
    Withdrawal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestStatus {
    Pending,
    Fulfilled,
    Ignored,
    Blocked,
    Errored,
}

impl RequestStatus {
    /// Only `Pending` can be left; every other status is final for the run.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        self == RequestStatus::Pending && next != RequestStatus::Pending
    }
}

/// Error codes reported on-chain. The numeric values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RequestErrorCode {
    RequestParameterDecodingFailed = 1,
    VerificationFailed = 2,
    RequesterDataNotFound = 3,
    RequestTooOld = 4,
    AuthorizationDenied = 5,
    PendingWithdrawal = 6,
    InvalidOis = 7,
    InvalidResponseParameters = 8,
    ResponseValueNotFound = 9,
    ApiCallFailed = 10,
    TransactionSubmissionFailed = 11,
    UnknownEndpointId = 12,
}

impl RequestErrorCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Status a request takes when it hits this error.
    pub fn status(self) -> RequestStatus {
        use RequestErrorCode::*;
        match self {
            AuthorizationDenied | RequestTooOld | UnknownEndpointId => RequestStatus::Ignored,
            VerificationFailed | RequesterDataNotFound | PendingWithdrawal => RequestStatus::Blocked,
            RequestParameterDecodingFailed
            | InvalidOis
            | InvalidResponseParameters
            | ResponseValueNotFound
            | ApiCallFailed
            | TransactionSubmissionFailed => RequestStatus::Errored,
        }
    }

    /// Errors that are reported back to the requester with a `fail` transaction.
    pub fn reported_on_chain(self) -> bool {
        use RequestErrorCode::*;
        matches!(
            self,
            RequestParameterDecodingFailed
                | InvalidOis
                | InvalidResponseParameters
                | ResponseValueNotFound
                | ApiCallFailed
        )
    }
}

impl fmt::Display for RequestErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.code())
    }
}

/// Where the request was observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    pub block_number: u64,
    pub transaction_hash: H256,
    pub log_index: u64,
    pub current_block: u64,
}

impl RequestMetadata {
    pub fn age(&self) -> u64 {
        self.current_block.saturating_sub(self.block_number)
    }
}

/// A submitted transaction. Receipts are not awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fulfillment {
    pub transaction_hash: H256,
    pub nonce: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: H256,
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub status: RequestStatus,
    pub error_code: Option<RequestErrorCode>,
    pub error_message: Option<String>,
    pub airnode_address: Address,
    /// Unknown for template requests until the template is fetched.
    pub endpoint_id: Option<H256>,
    pub template_id: Option<H256>,
    pub encoded_parameters: Bytes,
    pub decoded_parameters: BTreeMap<String, String>,
    pub sponsor_address: Address,
    pub sponsor_wallet_address: Address,
    pub requester_address: Address,
    pub requester_request_count: U256,
    pub fulfill_address: Address,
    pub fulfill_function_id: [u8; 4],
    pub chain_id: u64,
    pub metadata: RequestMetadata,
    pub response: Option<Bytes>,
    pub fulfillment: Option<Fulfillment>,
}

impl Request {
    /// A pending withdrawal of the sponsor wallet balance.
    pub fn withdrawal(
        id: H256,
        airnode_address: Address,
        sponsor_address: Address,
        sponsor_wallet_address: Address,
        chain_id: u64,
        metadata: RequestMetadata,
    ) -> Self {
        Self {
            id,
            request_type: RequestType::Withdrawal,
            status: RequestStatus::Pending,
            error_code: None,
            error_message: None,
            airnode_address,
            endpoint_id: None,
            template_id: None,
            encoded_parameters: Bytes::default(),
            decoded_parameters: BTreeMap::new(),
            sponsor_address,
            sponsor_wallet_address,
            requester_address: Address::zero(),
            requester_request_count: U256::zero(),
            fulfill_address: Address::zero(),
            fulfill_function_id: [0u8; 4],
            chain_id,
            metadata,
            response: None,
            fulfillment: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    pub fn is_pending_api_call(&self) -> bool {
        self.is_pending() && self.request_type == RequestType::ApiCall
    }

    /// Numeric error code, `0` when the request has no error.
    pub fn error_code_value(&self) -> u8 {
        self.error_code.map_or(0, RequestErrorCode::code)
    }

    /// Moves a pending request into the status implied by `code`. Returns
    /// `false` and leaves the request untouched if it is no longer pending.
    pub fn fail_with(&mut self, code: RequestErrorCode, message: impl Into<String>) -> bool {
        if !self.transition(code.status()) {
            return false;
        }
        self.error_code = Some(code);
        self.error_message = Some(message.into());
        true
    }

    /// Blocks a pending request, or ignores it with `RequestTooOld` once it
    /// has been sitting for more than `ignore_after_blocks`.
    pub fn block(
        &mut self,
        code: RequestErrorCode,
        message: impl Into<String>,
        ignore_after_blocks: u64,
    ) -> bool {
        if self.metadata.age() > ignore_after_blocks {
            let age = self.metadata.age();
            return self.fail_with(
                RequestErrorCode::RequestTooOld,
                format!("request is {age} blocks old and was blocked: {}", message.into()),
            );
        }
        self.fail_with(code, message)
    }

    /// Marks a pending request fulfilled by `fulfillment`.
    pub fn fulfill(&mut self, fulfillment: Fulfillment) -> bool {
        if !self.transition(RequestStatus::Fulfilled) {
            return false;
        }
        self.fulfillment = Some(fulfillment);
        true
    }

    /// Records the `fail` transaction sent for an errored request.
    pub fn record_failure_report(&mut self, fulfillment: Fulfillment) {
        if self.status == RequestStatus::Errored {
            self.fulfillment = Some(fulfillment);
        }
    }

    fn transition(&mut self, next: RequestStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn pending_api_call(id: u64) -> Request {
        Request {
            id: H256::from_low_u64_be(id),
            request_type: RequestType::ApiCall,
            status: RequestStatus::Pending,
            error_code: None,
            error_message: None,
            airnode_address: Address::repeat_byte(0xaa),
            endpoint_id: Some(H256::repeat_byte(0x01)),
            template_id: None,
            encoded_parameters: Bytes::default(),
            decoded_parameters: BTreeMap::new(),
            sponsor_address: Address::repeat_byte(0x11),
            sponsor_wallet_address: Address::repeat_byte(0x22),
            requester_address: Address::repeat_byte(0x33),
            requester_request_count: U256::one(),
            fulfill_address: Address::repeat_byte(0x44),
            fulfill_function_id: [1, 2, 3, 4],
            chain_id: 31337,
            metadata: RequestMetadata {
                block_number: 100,
                transaction_hash: H256::repeat_byte(0x55),
                log_index: id,
                current_block: 105,
            },
            response: None,
            fulfillment: None,
        }
    }

    #[test]
    fn test_error_codes_map_to_statuses() {
        use RequestErrorCode::*;
        assert_eq!(AuthorizationDenied.status(), RequestStatus::Ignored);
        assert_eq!(RequestTooOld.status(), RequestStatus::Ignored);
        assert_eq!(PendingWithdrawal.status(), RequestStatus::Blocked);
        assert_eq!(VerificationFailed.status(), RequestStatus::Blocked);
        assert_eq!(ApiCallFailed.status(), RequestStatus::Errored);
        assert_eq!(TransactionSubmissionFailed.status(), RequestStatus::Errored);
        assert_eq!(ApiCallFailed.code(), 10);
        assert_eq!(UnknownEndpointId.code(), 12);
        assert!(!TransactionSubmissionFailed.reported_on_chain());
        assert!(ResponseValueNotFound.reported_on_chain());
    }

    #[test]
    fn test_error_code_is_zero_without_error() {
        let mut request = pending_api_call(1);
        assert_eq!(request.error_code_value(), 0);
        assert!(request.fail_with(RequestErrorCode::ApiCallFailed, "boom"));
        assert_eq!(request.error_code_value(), 10);
        assert_eq!(request.status, RequestStatus::Errored);
    }

    #[test]
    fn test_terminal_statuses_are_final() {
        let mut request = pending_api_call(1);
        assert!(request.fail_with(RequestErrorCode::AuthorizationDenied, "denied"));
        assert!(!request.fail_with(RequestErrorCode::ApiCallFailed, "late"));
        assert!(!request.fulfill(Fulfillment {
            transaction_hash: H256::zero(),
            nonce: U256::zero(),
        }));
        assert_eq!(request.status, RequestStatus::Ignored);
        assert_eq!(request.error_code, Some(RequestErrorCode::AuthorizationDenied));

        for from in [
            RequestStatus::Fulfilled,
            RequestStatus::Ignored,
            RequestStatus::Blocked,
            RequestStatus::Errored,
        ] {
            assert!(!from.can_transition_to(RequestStatus::Pending));
            assert!(!from.can_transition_to(RequestStatus::Fulfilled));
        }
        assert!(!RequestStatus::Pending.can_transition_to(RequestStatus::Pending));
    }

    #[test]
    fn test_old_blocked_requests_are_ignored() {
        let mut fresh = pending_api_call(1);
        assert!(fresh.block(RequestErrorCode::PendingWithdrawal, "withdrawing", 20));
        assert_eq!(fresh.status, RequestStatus::Blocked);

        let mut stale = pending_api_call(2);
        stale.metadata.current_block = 200;
        assert!(stale.block(RequestErrorCode::PendingWithdrawal, "withdrawing", 20));
        assert_eq!(stale.status, RequestStatus::Ignored);
        assert_eq!(stale.error_code, Some(RequestErrorCode::RequestTooOld));
    }

    #[test]
    fn test_failure_report_only_recorded_for_errored() {
        let report = Fulfillment {
            transaction_hash: H256::repeat_byte(9),
            nonce: U256::from(3),
        };
        let mut pending = pending_api_call(1);
        pending.record_failure_report(report);
        assert!(pending.fulfillment.is_none());

        pending.fail_with(RequestErrorCode::ApiCallFailed, "boom");
        pending.record_failure_report(report);
        assert_eq!(pending.fulfillment, Some(report));
        assert_eq!(pending.status, RequestStatus::Errored);
    }
}
