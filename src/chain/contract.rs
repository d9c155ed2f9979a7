//! The request-response contract: event decoding, call encoding and the
//! content hashes the contract commits to.

use std::collections::HashMap;

use ethers::abi::{self, Abi, Function, LogParam, RawLog, Token};
use ethers::types::{Address, Bytes, Filter, Log, ValueOrArray, H256, U256};
use ethers::utils::keccak256;

use super::ChainError;
use crate::models::Request;

const RRP_ABI: &[&str] = &[
    "event MadeTemplateRequest(address indexed airnode, bytes32 indexed requestId, uint256 requesterRequestCount, uint256 chainId, address requester, bytes32 templateId, address sponsor, address sponsorWallet, address fulfillAddress, bytes4 fulfillFunctionId, bytes parameters)",
    "event MadeFullRequest(address indexed airnode, bytes32 indexed requestId, uint256 requesterRequestCount, uint256 chainId, address requester, bytes32 endpointId, address sponsor, address sponsorWallet, address fulfillAddress, bytes4 fulfillFunctionId, bytes parameters)",
    "event FulfilledRequest(address indexed airnode, bytes32 indexed requestId, bytes data)",
    "event FailedRequest(address indexed airnode, bytes32 indexed requestId, string errorMessage)",
    "event RequestedWithdrawal(address indexed airnode, address indexed sponsor, bytes32 indexed withdrawalRequestId, address sponsorWallet)",
    "event FulfilledWithdrawal(address indexed airnode, address indexed sponsor, bytes32 indexed withdrawalRequestId, address sponsorWallet, uint256 amount)",
    "function fulfill(bytes32 requestId, address airnode, address fulfillAddress, bytes4 fulfillFunctionId, bytes data, bytes signature) returns (bool callSuccess, bytes callData)",
    "function fail(bytes32 requestId, address airnode, address fulfillAddress, bytes4 fulfillFunctionId, string errorMessage)",
    "function fulfillWithdrawal(bytes32 withdrawalRequestId, address airnode, address sponsor) payable",
    "function getTemplates(bytes32[] templateIds) view returns (address[] airnodes, bytes32[] endpointIds, bytes[] parameters)",
    "function checkAuthorizationStatuses(address[] authorizers, address airnode, bytes32[] requestIds, bytes32[] endpointIds, address[] sponsors, address[] requesters) view returns (bool[] statuses)",
];

const EVENT_NAMES: [&str; 6] = [
    "MadeTemplateRequest",
    "MadeFullRequest",
    "FulfilledRequest",
    "FailedRequest",
    "RequestedWithdrawal",
    "FulfilledWithdrawal",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Template { template_id: H256 },
    Full { endpoint_id: H256 },
}

/// A `MadeTemplateRequest` or `MadeFullRequest` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEvent {
    pub kind: RequestKind,
    pub airnode: Address,
    pub request_id: H256,
    pub requester_request_count: U256,
    pub chain_id: U256,
    pub requester: Address,
    pub sponsor: Address,
    pub sponsor_wallet: Address,
    pub fulfill_address: Address,
    pub fulfill_function_id: [u8; 4],
    pub parameters: Bytes,
}

impl RequestEvent {
    /// Recomputes the id the contract assigned to this request.
    pub fn derive_request_id(&self, rrp: Address) -> Result<H256, ChainError> {
        let mut tokens = vec![
            Token::Uint(self.chain_id),
            Token::Address(rrp),
            Token::Address(self.requester),
            Token::Uint(self.requester_request_count),
        ];
        match self.kind {
            RequestKind::Template { template_id } => tokens.push(bytes32(template_id)),
            RequestKind::Full { endpoint_id } => {
                tokens.push(Token::Address(self.airnode));
                tokens.push(bytes32(endpoint_id));
            }
        }
        tokens.extend([
            Token::Address(self.sponsor),
            Token::Address(self.sponsor_wallet),
            Token::Address(self.fulfill_address),
            Token::FixedBytes(self.fulfill_function_id.to_vec()),
            Token::Bytes(self.parameters.to_vec()),
        ]);
        packed_hash(&tokens)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalEvent {
    pub airnode: Address,
    pub sponsor: Address,
    pub withdrawal_request_id: H256,
    pub sponsor_wallet: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RrpEvent {
    Request(RequestEvent),
    RequestFulfilled { request_id: H256 },
    RequestFailed { request_id: H256 },
    WithdrawalRequested(WithdrawalEvent),
    WithdrawalFulfilled { withdrawal_request_id: H256 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEvent {
    pub event: RrpEvent,
    pub block_number: u64,
    pub transaction_hash: H256,
    pub log_index: u64,
}

/// A template as stored on-chain. A zero airnode means no such template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub id: H256,
    pub airnode: Address,
    pub endpoint_id: H256,
    pub parameters: Bytes,
}

impl Template {
    pub fn exists(&self) -> bool {
        !self.airnode.is_zero()
    }

    /// Whether `id` is the hash of the template's contents.
    pub fn is_consistent(&self) -> Result<bool, ChainError> {
        Ok(template_id(self.airnode, self.endpoint_id, &self.parameters)? == self.id)
    }
}

/// `keccak256(abi.encodePacked(airnode, endpointId, parameters))`.
pub fn template_id(airnode: Address, endpoint_id: H256, parameters: &[u8]) -> Result<H256, ChainError> {
    packed_hash(&[
        Token::Address(airnode),
        bytes32(endpoint_id),
        Token::Bytes(parameters.to_vec()),
    ])
}

/// Hash the node signs to authorize a fulfillment.
pub fn fulfillment_hash(request_id: H256, data: &[u8]) -> Result<H256, ChainError> {
    packed_hash(&[bytes32(request_id), Token::Bytes(data.to_vec())])
}

fn packed_hash(tokens: &[Token]) -> Result<H256, ChainError> {
    let packed = abi::encode_packed(tokens).map_err(|e| ChainError::Abi(e.to_string()))?;
    Ok(H256::from(keccak256(packed)))
}

fn bytes32(value: H256) -> Token {
    Token::FixedBytes(value.as_bytes().to_vec())
}

/// ABI handle for one deployed request-response contract.
#[derive(Debug, Clone)]
pub struct RrpContract {
    address: Address,
    abi: Abi,
    events_by_topic: HashMap<H256, &'static str>,
}

impl RrpContract {
    pub fn new(address: Address) -> Result<Self, ChainError> {
        let abi = abi::parse_abi(RRP_ABI).map_err(|e| ChainError::Abi(e.to_string()))?;
        let mut events_by_topic = HashMap::new();
        for name in EVENT_NAMES {
            events_by_topic.insert(abi.event(name)?.signature(), name);
        }
        Ok(Self {
            address,
            abi,
            events_by_topic,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    /// Every event of this contract that concerns `airnode` in the block range.
    pub fn logs_filter(&self, airnode: Address, from_block: u64, to_block: u64) -> Filter {
        let topics = self.events_by_topic.keys().copied().map(Some).collect();
        Filter::new()
            .address(self.address)
            .from_block(from_block)
            .to_block(to_block)
            .topic0(ValueOrArray::Array(topics))
            .topic1(ValueOrArray::Value(Some(H256::from(airnode))))
    }

    /// Decodes a log. Logs of other events yield `Ok(None)`.
    pub fn parse_log(&self, log: &Log) -> Result<Option<LoggedEvent>, ChainError> {
        let Some(name) = log
            .topics
            .first()
            .and_then(|topic| self.events_by_topic.get(topic))
        else {
            return Ok(None);
        };
        let raw = RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        };
        let params = Params(self.abi.event(name)?.parse_log(raw)?.params);

        let event = match *name {
            "MadeTemplateRequest" | "MadeFullRequest" => {
                let kind = if *name == "MadeTemplateRequest" {
                    RequestKind::Template {
                        template_id: params.h256("templateId")?,
                    }
                } else {
                    RequestKind::Full {
                        endpoint_id: params.h256("endpointId")?,
                    }
                };
                RrpEvent::Request(RequestEvent {
                    kind,
                    airnode: params.address("airnode")?,
                    request_id: params.h256("requestId")?,
                    requester_request_count: params.uint("requesterRequestCount")?,
                    chain_id: params.uint("chainId")?,
                    requester: params.address("requester")?,
                    sponsor: params.address("sponsor")?,
                    sponsor_wallet: params.address("sponsorWallet")?,
                    fulfill_address: params.address("fulfillAddress")?,
                    fulfill_function_id: params.selector("fulfillFunctionId")?,
                    parameters: params.bytes("parameters")?,
                })
            }
            "FulfilledRequest" => RrpEvent::RequestFulfilled {
                request_id: params.h256("requestId")?,
            },
            "FailedRequest" => RrpEvent::RequestFailed {
                request_id: params.h256("requestId")?,
            },
            "RequestedWithdrawal" => RrpEvent::WithdrawalRequested(WithdrawalEvent {
                airnode: params.address("airnode")?,
                sponsor: params.address("sponsor")?,
                withdrawal_request_id: params.h256("withdrawalRequestId")?,
                sponsor_wallet: params.address("sponsorWallet")?,
            }),
            _ => RrpEvent::WithdrawalFulfilled {
                withdrawal_request_id: params.h256("withdrawalRequestId")?,
            },
        };

        Ok(Some(LoggedEvent {
            event,
            block_number: log
                .block_number
                .ok_or_else(|| ChainError::InvalidLog("missing block number".into()))?
                .as_u64(),
            transaction_hash: log
                .transaction_hash
                .ok_or_else(|| ChainError::InvalidLog("missing transaction hash".into()))?,
            log_index: log.log_index.unwrap_or_default().low_u64(),
        }))
    }

    pub fn encode_get_templates(&self, template_ids: &[H256]) -> Result<Bytes, ChainError> {
        let ids = template_ids.iter().copied().map(bytes32).collect();
        self.encode("getTemplates", &[Token::Array(ids)])
    }

    pub fn decode_get_templates(
        &self,
        template_ids: &[H256],
        output: &[u8],
    ) -> Result<Vec<Template>, ChainError> {
        let mut tokens = self.function("getTemplates")?.decode_output(output)?.into_iter();
        let (airnodes, endpoint_ids, parameters) = match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(Token::Array(a)), Some(Token::Array(e)), Some(Token::Array(p))) => (a, e, p),
            _ => return Err(ChainError::Abi("unexpected getTemplates output".into())),
        };
        if airnodes.len() != template_ids.len()
            || endpoint_ids.len() != template_ids.len()
            || parameters.len() != template_ids.len()
        {
            return Err(ChainError::Abi("getTemplates returned the wrong number of templates".into()));
        }

        template_ids
            .iter()
            .zip(airnodes.into_iter().zip(endpoint_ids).zip(parameters))
            .map(|(id, ((airnode, endpoint_id), parameters))| {
                Ok(Template {
                    id: *id,
                    airnode: token_address(airnode)?,
                    endpoint_id: token_h256(endpoint_id)?,
                    parameters: token_bytes(parameters)?,
                })
            })
            .collect()
    }

    /// One entry per `(request id, endpoint id, sponsor, requester)` query.
    pub fn encode_check_authorization_statuses(
        &self,
        authorizers: &[Address],
        airnode: Address,
        queries: &[(H256, H256, Address, Address)],
    ) -> Result<Bytes, ChainError> {
        let column = |f: &dyn Fn(&(H256, H256, Address, Address)) -> Token| {
            Token::Array(queries.iter().map(f).collect())
        };
        self.encode(
            "checkAuthorizationStatuses",
            &[
                Token::Array(authorizers.iter().copied().map(Token::Address).collect()),
                Token::Address(airnode),
                column(&|q| bytes32(q.0)),
                column(&|q| bytes32(q.1)),
                column(&|q| Token::Address(q.2)),
                column(&|q| Token::Address(q.3)),
            ],
        )
    }

    pub fn decode_check_authorization_statuses(&self, output: &[u8]) -> Result<Vec<bool>, ChainError> {
        match self
            .function("checkAuthorizationStatuses")?
            .decode_output(output)?
            .into_iter()
            .next()
        {
            Some(Token::Array(statuses)) => statuses
                .into_iter()
                .map(|token| match token {
                    Token::Bool(status) => Ok(status),
                    other => Err(ChainError::Abi(format!("expected bool, got {other:?}"))),
                })
                .collect(),
            _ => Err(ChainError::Abi("unexpected checkAuthorizationStatuses output".into())),
        }
    }

    pub fn encode_fulfill(
        &self,
        request: &Request,
        data: &[u8],
        signature: &[u8],
    ) -> Result<Bytes, ChainError> {
        self.encode(
            "fulfill",
            &[
                bytes32(request.id),
                Token::Address(request.airnode_address),
                Token::Address(request.fulfill_address),
                Token::FixedBytes(request.fulfill_function_id.to_vec()),
                Token::Bytes(data.to_vec()),
                Token::Bytes(signature.to_vec()),
            ],
        )
    }

    /// `(callSuccess, callData)` of a simulated fulfillment.
    pub fn decode_fulfill(&self, output: &[u8]) -> Result<(bool, Bytes), ChainError> {
        let mut tokens = self.function("fulfill")?.decode_output(output)?.into_iter();
        match (tokens.next(), tokens.next()) {
            (Some(Token::Bool(success)), Some(Token::Bytes(data))) => Ok((success, Bytes::from(data))),
            _ => Err(ChainError::Abi("unexpected fulfill output".into())),
        }
    }

    pub fn encode_fail(&self, request: &Request, error_message: &str) -> Result<Bytes, ChainError> {
        self.encode(
            "fail",
            &[
                bytes32(request.id),
                Token::Address(request.airnode_address),
                Token::Address(request.fulfill_address),
                Token::FixedBytes(request.fulfill_function_id.to_vec()),
                Token::String(error_message.to_string()),
            ],
        )
    }

    pub fn encode_fulfill_withdrawal(&self, request: &Request) -> Result<Bytes, ChainError> {
        self.encode(
            "fulfillWithdrawal",
            &[
                bytes32(request.id),
                Token::Address(request.airnode_address),
                Token::Address(request.sponsor_address),
            ],
        )
    }

    fn function(&self, name: &str) -> Result<&Function, ChainError> {
        Ok(self.abi.function(name)?)
    }

    fn encode(&self, name: &str, tokens: &[Token]) -> Result<Bytes, ChainError> {
        Ok(Bytes::from(self.function(name)?.encode_input(tokens)?))
    }
}

struct Params(Vec<LogParam>);

impl Params {
    fn get(&self, name: &str) -> Result<Token, ChainError> {
        self.0
            .iter()
            .find(|param| param.name == name)
            .map(|param| param.value.clone())
            .ok_or_else(|| ChainError::InvalidLog(format!("missing field {name}")))
    }

    fn address(&self, name: &str) -> Result<Address, ChainError> {
        token_address(self.get(name)?)
    }

    fn h256(&self, name: &str) -> Result<H256, ChainError> {
        token_h256(self.get(name)?)
    }

    fn uint(&self, name: &str) -> Result<U256, ChainError> {
        match self.get(name)? {
            Token::Uint(value) => Ok(value),
            other => Err(ChainError::InvalidLog(format!("{name}: expected uint, got {other:?}"))),
        }
    }

    fn bytes(&self, name: &str) -> Result<Bytes, ChainError> {
        token_bytes(self.get(name)?)
    }

    fn selector(&self, name: &str) -> Result<[u8; 4], ChainError> {
        match self.get(name)? {
            Token::FixedBytes(bytes) => bytes
                .as_slice()
                .try_into()
                .map_err(|_| ChainError::InvalidLog(format!("{name}: expected 4 bytes"))),
            other => Err(ChainError::InvalidLog(format!("{name}: expected bytes4, got {other:?}"))),
        }
    }
}

fn token_address(token: Token) -> Result<Address, ChainError> {
    match token {
        Token::Address(address) => Ok(address),
        other => Err(ChainError::Abi(format!("expected address, got {other:?}"))),
    }
}

fn token_h256(token: Token) -> Result<H256, ChainError> {
    match token {
        Token::FixedBytes(bytes) if bytes.len() == 32 => Ok(H256::from_slice(&bytes)),
        other => Err(ChainError::Abi(format!("expected bytes32, got {other:?}"))),
    }
}

fn token_bytes(token: Token) -> Result<Bytes, ChainError> {
    match token {
        Token::Bytes(bytes) => Ok(Bytes::from(bytes)),
        other => Err(ChainError::Abi(format!("expected bytes, got {other:?}"))),
    }
}
