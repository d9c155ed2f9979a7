//! Shared fixtures: an in-memory chain and a local HTTP API.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use ethers::abi::{self, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Filter, Log, H256, U256, U64};
use serde_json::{json, Value};

use oracle_coordinator::chain::contract::template_id;
use oracle_coordinator::chain::{ChainClient, ChainError, RequestEvent, RequestKind, RrpContract};
use oracle_coordinator::codec::{encode_parameters, Parameter, ParameterValue};
use oracle_coordinator::config::{derive_endpoint_id, Config};
use oracle_coordinator::services::api_caller::ApiCaller;
use oracle_coordinator::services::coordinator::{run_with_clients, CoordinatorSummary, ProviderHandle};
use oracle_coordinator::wallet::WalletDeriver;

pub const MNEMONIC: &str = "test test test test test test test test test test test junk";
pub const RRP: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
pub const CHAIN_ID: u64 = 31337;
pub const OIS_TITLE: &str = "currency-converter-ois";
pub const ENDPOINT_NAME: &str = "convertToUSD";
pub const GAS_PRICE: u64 = 10;
pub const WITHDRAWAL_GAS: u64 = 50_000;
pub const CURRENT_BLOCK: u64 = 105;

#[derive(Debug, Clone)]
pub struct SentTransaction {
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
    pub nonce: U256,
    pub gas: U256,
    pub hash: H256,
}

impl SentTransaction {
    pub fn function_name(&self, contract: &RrpContract) -> String {
        contract
            .abi()
            .functions()
            .find(|f| f.short_signature() == self.data[..4])
            .map(|f| f.name.clone())
            .unwrap_or_default()
    }

    pub fn decode(&self, contract: &RrpContract) -> Vec<Token> {
        let name = self.function_name(contract);
        contract
            .abi()
            .function(&name)
            .unwrap()
            .decode_input(&self.data[4..])
            .unwrap()
    }
}

struct ChainState {
    logs: Vec<Log>,
    templates: HashMap<H256, (Address, H256, Bytes)>,
    authorized_requesters: HashSet<Address>,
    authorization_fails: bool,
    fulfill_succeeds: bool,
    fulfill_rejected: bool,
    balances: HashMap<Address, U256>,
    sent: Vec<SentTransaction>,
    read_calls: Vec<String>,
}

/// A chain that answers reads from memory and records sent transactions.
pub struct MockChain {
    contract: RrpContract,
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            contract: RrpContract::new(RRP.parse().unwrap()).unwrap(),
            state: Mutex::new(ChainState {
                logs: Vec::new(),
                templates: HashMap::new(),
                authorized_requesters: HashSet::new(),
                authorization_fails: false,
                fulfill_succeeds: true,
                fulfill_rejected: false,
                balances: HashMap::new(),
                sent: Vec::new(),
                read_calls: Vec::new(),
            }),
        })
    }

    pub fn push_log(&self, log: Log) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn add_template(&self, id: H256, airnode: Address, endpoint_id: H256, parameters: Bytes) {
        self.state
            .lock()
            .unwrap()
            .templates
            .insert(id, (airnode, endpoint_id, parameters));
    }

    pub fn authorize(&self, requester: Address) {
        self.state.lock().unwrap().authorized_requesters.insert(requester);
    }

    pub fn fail_authorization(&self) {
        self.state.lock().unwrap().authorization_fails = true;
    }

    pub fn revert_fulfillments(&self) {
        self.state.lock().unwrap().fulfill_succeeds = false;
    }

    pub fn reject_fulfillments(&self) {
        self.state.lock().unwrap().fulfill_rejected = true;
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state.lock().unwrap().balances.insert(address, balance);
    }

    pub fn sent(&self) -> Vec<SentTransaction> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn read_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().read_calls.clone()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(CURRENT_BLOCK)
    }

    async fn get_logs(&self, _filter: &Filter) -> Result<Vec<Log>, ChainError> {
        Ok(self.state.lock().unwrap().logs.clone())
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, ChainError> {
        let data = tx.data().cloned().unwrap_or_default();
        let function = self
            .contract
            .abi()
            .functions()
            .find(|f| data.len() >= 4 && f.short_signature() == data[..4])
            .ok_or_else(|| ChainError::Provider("unknown function".into()))?;
        let inputs = function.decode_input(&data[4..])?;

        let mut state = self.state.lock().unwrap();
        state.read_calls.push(function.name.clone());
        let output = match function.name.as_str() {
            "getTemplates" => {
                let Token::Array(ids) = &inputs[0] else {
                    return Err(ChainError::Abi("bad input".into()));
                };
                let (mut airnodes, mut endpoints, mut parameters) = (vec![], vec![], vec![]);
                for id in ids {
                    let Token::FixedBytes(id) = id else {
                        return Err(ChainError::Abi("bad id".into()));
                    };
                    let (airnode, endpoint_id, params) = state
                        .templates
                        .get(&H256::from_slice(id))
                        .cloned()
                        .unwrap_or_default();
                    airnodes.push(Token::Address(airnode));
                    endpoints.push(Token::FixedBytes(endpoint_id.as_bytes().to_vec()));
                    parameters.push(Token::Bytes(params.to_vec()));
                }
                abi::encode(&[
                    Token::Array(airnodes),
                    Token::Array(endpoints),
                    Token::Array(parameters),
                ])
            }
            "checkAuthorizationStatuses" => {
                if state.authorization_fails {
                    return Err(ChainError::Provider("execution reverted".into()));
                }
                let Token::Array(requesters) = &inputs[5] else {
                    return Err(ChainError::Abi("bad input".into()));
                };
                let statuses = requesters
                    .iter()
                    .map(|token| match token {
                        Token::Address(a) => Token::Bool(state.authorized_requesters.contains(a)),
                        _ => Token::Bool(false),
                    })
                    .collect();
                abi::encode(&[Token::Array(statuses)])
            }
            "fulfill" if state.fulfill_rejected => {
                return Err(ChainError::Rejected("execution reverted".into()));
            }
            "fulfill" => abi::encode(&[Token::Bool(state.fulfill_succeeds), Token::Bytes(vec![])]),
            other => return Err(ChainError::Provider(format!("{other} is not callable"))),
        };
        Ok(Bytes::from(output))
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> Result<U256, ChainError> {
        Ok(U256::from(WITHDRAWAL_GAS))
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        Ok(U256::from(GAS_PRICE))
    }

    async fn balance(&self, address: Address) -> Result<U256, ChainError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn transaction_count(&self, _address: Address) -> Result<U256, ChainError> {
        Ok(U256::zero())
    }

    async fn send_transaction(
        &self,
        tx: TypedTransaction,
        signer: &LocalWallet,
    ) -> Result<H256, ChainError> {
        let mut state = self.state.lock().unwrap();
        let hash = H256::from_low_u64_be(0x1000 + state.sent.len() as u64);
        state.sent.push(SentTransaction {
            from: signer.address(),
            to: tx.to_addr().copied(),
            data: tx.data().cloned().unwrap_or_default(),
            value: tx.value().copied().unwrap_or_default(),
            nonce: tx.nonce().copied().unwrap_or_default(),
            gas: tx.gas().copied().unwrap_or_default(),
            hash,
        });
        Ok(hash)
    }
}

/// Wallets, contract and chain for one test.
pub struct Fixture {
    pub wallets: WalletDeriver,
    pub contract: RrpContract,
    pub chain: Arc<MockChain>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            wallets: WalletDeriver::from_mnemonic(MNEMONIC).unwrap(),
            contract: RrpContract::new(RRP.parse().unwrap()).unwrap(),
            chain: MockChain::new(),
        }
    }

    pub fn endpoint_id() -> H256 {
        derive_endpoint_id(OIS_TITLE, ENDPOINT_NAME)
    }

    /// A correctly derived full request for the convert endpoint.
    pub fn full_request(
        &self,
        requester: Address,
        sponsor: Address,
        count: u64,
        from: &str,
    ) -> RequestEvent {
        let parameters = encode_parameters(&[Parameter::new(
            "from",
            ParameterValue::String(from.to_string()),
        )])
        .unwrap();
        self.request(RequestKind::Full { endpoint_id: Self::endpoint_id() }, requester, sponsor, count, parameters)
    }

    /// A template request whose template is stored on the mock chain.
    pub fn template_request(&self, requester: Address, sponsor: Address, from: &str) -> RequestEvent {
        let template_parameters = encode_parameters(&[Parameter::new(
            "from",
            ParameterValue::String(from.to_string()),
        )])
        .unwrap();
        let airnode = self.wallets.node_address();
        let id = template_id(airnode, Self::endpoint_id(), &template_parameters).unwrap();
        self.chain
            .add_template(id, airnode, Self::endpoint_id(), template_parameters);
        self.request(RequestKind::Template { template_id: id }, requester, sponsor, 1, Bytes::default())
    }

    fn request(
        &self,
        kind: RequestKind,
        requester: Address,
        sponsor: Address,
        count: u64,
        parameters: Bytes,
    ) -> RequestEvent {
        let mut event = RequestEvent {
            kind,
            airnode: self.wallets.node_address(),
            request_id: H256::zero(),
            requester_request_count: U256::from(count),
            chain_id: U256::from(CHAIN_ID),
            requester,
            sponsor,
            sponsor_wallet: self.sponsor_wallet(sponsor),
            fulfill_address: Address::repeat_byte(0xfa),
            fulfill_function_id: [0x12, 0x34, 0x56, 0x78],
            parameters,
        };
        event.request_id = event.derive_request_id(self.contract.address()).unwrap();
        event
    }

    /// `event` sent to another fulfill target, with its id re-derived.
    pub fn retarget(&self, event: &RequestEvent, fulfill_address: Address, function_id: [u8; 4]) -> RequestEvent {
        let mut event = event.clone();
        event.fulfill_address = fulfill_address;
        event.fulfill_function_id = function_id;
        event.request_id = event.derive_request_id(self.contract.address()).unwrap();
        event
    }

    pub fn sponsor_wallet(&self, sponsor: Address) -> Address {
        self.wallets.sponsor_wallet(sponsor).unwrap().address
    }

    pub fn push_request(&self, event: &RequestEvent, block: u64, log_index: u64) {
        let name = match event.kind {
            RequestKind::Template { .. } => "MadeTemplateRequest",
            RequestKind::Full { .. } => "MadeFullRequest",
        };
        let id_or_endpoint = match event.kind {
            RequestKind::Template { template_id } => template_id,
            RequestKind::Full { endpoint_id } => endpoint_id,
        };
        let data = abi::encode(&[
            Token::Uint(event.requester_request_count),
            Token::Uint(event.chain_id),
            Token::Address(event.requester),
            Token::FixedBytes(id_or_endpoint.as_bytes().to_vec()),
            Token::Address(event.sponsor),
            Token::Address(event.sponsor_wallet),
            Token::Address(event.fulfill_address),
            Token::FixedBytes(event.fulfill_function_id.to_vec()),
            Token::Bytes(event.parameters.to_vec()),
        ]);
        self.push_log(
            name,
            vec![H256::from(event.airnode), event.request_id],
            data,
            block,
            log_index,
        );
    }

    pub fn push_fulfilled(&self, request_id: H256, block: u64, log_index: u64) {
        let data = abi::encode(&[Token::Bytes(vec![0u8; 32])]);
        self.push_log(
            "FulfilledRequest",
            vec![H256::from(self.wallets.node_address()), request_id],
            data,
            block,
            log_index,
        );
    }

    pub fn push_withdrawal(&self, sponsor: Address, id: H256, block: u64, log_index: u64) {
        let data = abi::encode(&[Token::Address(self.sponsor_wallet(sponsor))]);
        self.push_log(
            "RequestedWithdrawal",
            vec![H256::from(self.wallets.node_address()), H256::from(sponsor), id],
            data,
            block,
            log_index,
        );
    }

    fn push_log(&self, name: &str, indexed: Vec<H256>, data: Vec<u8>, block: u64, log_index: u64) {
        let mut topics = vec![self.contract.abi().event(name).unwrap().signature()];
        topics.extend(indexed);
        self.chain.push_log(Log {
            address: self.contract.address(),
            topics,
            data: Bytes::from(data),
            block_number: Some(U64::from(block)),
            transaction_hash: Some(H256::from_low_u64_be(block * 1000 + log_index)),
            log_index: Some(U256::from(log_index)),
            ..Default::default()
        });
    }

    pub async fn run(&self, config: &Config) -> CoordinatorSummary {
        let handle = ProviderHandle {
            chain_id: CHAIN_ID,
            provider_name: "mock".to_string(),
            client: self.chain.clone(),
        };
        let api = ApiCaller::new(&config.node_settings);
        run_with_clients(config, &self.wallets, &[handle], &api).await
    }
}

/// Node configuration pointing the convert endpoint at `api_base`.
pub fn config(api_base: &str, authorizers: &[Address]) -> Config {
    serde_json::from_value(json!({
        "nodeSettings": {
            "airnodeWalletMnemonic": MNEMONIC,
            "runTimeoutMs": 20000,
            "apiCallTimeoutMs": 2000,
            "providerTimeoutMs": 2000,
            "retries": 2,
            "retryBackoffMs": 10
        },
        "chains": [{
            "id": CHAIN_ID.to_string(),
            "type": "evm",
            "contracts": { "AirnodeRrp": RRP },
            "providers": { "mock": { "url": "http://127.0.0.1:8545" } },
            "authorizers": authorizers,
            "options": { "withdrawalRemainder": "1000" }
        }],
        "triggers": { "rrp": [{
            "endpointId": format!("{:?}", Fixture::endpoint_id()),
            "oisTitle": OIS_TITLE,
            "endpointName": ENDPOINT_NAME
        }] },
        "ois": [{
            "oisFormat": "1.0.0",
            "title": OIS_TITLE,
            "version": "1.0.0",
            "apiSpecifications": {
                "servers": [{ "url": api_base }],
                "paths": { "/convert": { "get": { "parameters": [
                    { "in": "query", "name": "from" },
                    { "in": "query", "name": "to" },
                    { "in": "query", "name": "amount" }
                ] } } },
                "components": { "securitySchemes": {
                    "apiKey": { "type": "apiKey", "in": "query", "name": "access_key" }
                } },
                "security": { "apiKey": [] }
            },
            "endpoints": [{
                "name": ENDPOINT_NAME,
                "operation": { "method": "get", "path": "/convert" },
                "fixedOperationParameters": [
                    { "operationParameter": { "in": "query", "name": "to" }, "value": "USD" }
                ],
                "reservedParameters": [
                    { "name": "_type", "fixed": "int256" },
                    { "name": "_path", "fixed": "result" },
                    { "name": "_times", "fixed": "100000" }
                ],
                "parameters": [
                    { "name": "from", "default": "EUR", "operationParameter": { "in": "query", "name": "from" } },
                    { "name": "amount", "default": "1", "operationParameter": { "in": "query", "name": "amount" } }
                ]
            }]
        }],
        "apiCredentials": [{
            "oisTitle": OIS_TITLE,
            "securitySchemeName": "apiKey",
            "securitySchemeValue": "secret"
        }]
    }))
    .unwrap()
}

#[derive(Clone)]
struct ApiState {
    status: StatusCode,
    body: Value,
    hits: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

/// A local HTTP API that records every query it receives.
pub struct ApiServer {
    pub base_url: String,
    hits: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl ApiServer {
    pub fn hits(&self) -> Vec<HashMap<String, String>> {
        self.hits.lock().unwrap().clone()
    }
}

async fn convert(
    State(state): State<ApiState>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    state.hits.lock().unwrap().push(query);
    (state.status, Json(state.body.clone()))
}

pub async fn spawn_api(status: StatusCode, body: Value) -> ApiServer {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().route("/convert", get(convert)).with_state(ApiState {
        status,
        body,
        hits: hits.clone(),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    ApiServer {
        base_url: format!("http://{addr}"),
        hits,
    }
}
