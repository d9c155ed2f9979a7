//! Executes aggregated API calls against the HTTP APIs their OIS describes.
//!
//! A call is resolved into a concrete HTTP request (URL, query, headers,
//! cookies), sent with bounded retries, and the single value selected by
//! `_path` is cast to `_type` and ABI-encoded. Every failure becomes an
//! [`ApiCallError`] carrying the error code reported on-chain.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ethers::types::Address;
use futures_util::future::join_all;
use reqwest::header::{AUTHORIZATION, COOKIE};
use reqwest::{Client, Url};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::codec::response::encode_response_value;
use crate::codec::ParameterType;
use crate::config::ois::{
    Endpoint, HttpAuthScheme, HttpMethod, Ois, ParameterLocation, SecurityScheme,
};
use crate::config::{Config, NodeSettings};
use crate::models::{AggregatedApiCall, ApiCallError, ApiCallResult, RequestErrorCode};
use crate::retry::{self, Deadline, RetryError, RetryPolicy};

pub const TYPE_PARAMETER: &str = "_type";
pub const PATH_PARAMETER: &str = "_path";
pub const TIMES_PARAMETER: &str = "_times";
pub const RELAY_METADATA_PARAMETER: &str = "_relay_metadata";

const RESERVED_PARAMETERS: [&str; 4] = [
    TYPE_PARAMETER,
    PATH_PARAMETER,
    TIMES_PARAMETER,
    RELAY_METADATA_PARAMETER,
];

/// Chain-side facts an API can ask for with `_relay_metadata=v1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMetadata {
    pub airnode: Address,
    pub chain_id: u64,
    pub chain_type: String,
    pub rrp: Address,
}

/// Reserved parameters after resolving fixed, request and default values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseParameters {
    pub response_type: ParameterType,
    pub path: Option<String>,
    pub times: Option<String>,
    pub relay_metadata: Option<String>,
}

/// A fully resolved HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Buckets {
    path: Vec<(String, String)>,
    query: Vec<(String, String)>,
    header: Vec<(String, String)>,
    cookie: Vec<(String, String)>,
}

impl Buckets {
    fn bucket(&mut self, location: ParameterLocation) -> &mut Vec<(String, String)> {
        match location {
            ParameterLocation::Path => &mut self.path,
            ParameterLocation::Query => &mut self.query,
            ParameterLocation::Header => &mut self.header,
            ParameterLocation::Cookie => &mut self.cookie,
        }
    }

    fn contains(&mut self, location: ParameterLocation, name: &str) -> bool {
        self.bucket(location).iter().any(|(n, _)| n == name)
    }

    /// Replaces an existing value in place, otherwise appends.
    fn set(&mut self, location: ParameterLocation, name: &str, value: impl Into<String>) {
        let bucket = self.bucket(location);
        let value = value.into();
        match bucket.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => bucket.push((name.to_string(), value)),
        }
    }
}

#[derive(Debug, Error)]
enum HttpFailure {
    #[error("{0}")]
    Transport(String),
    #[error("API responded with status {0}")]
    Status(u16),
    #[error("API response is not JSON: {0}")]
    Body(String),
}

impl HttpFailure {
    fn is_transient(&self) -> bool {
        match self {
            HttpFailure::Transport(_) => true,
            HttpFailure::Status(status) => *status == 429 || (500..600).contains(status),
            HttpFailure::Body(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiCaller {
    http: Client,
    policy: RetryPolicy,
    max_concurrent_calls: usize,
}

impl ApiCaller {
    pub fn new(settings: &NodeSettings) -> Self {
        Self::with_client(
            Client::new(),
            settings.api_retry_policy(),
            settings.max_concurrent_api_calls,
        )
    }

    pub fn with_client(http: Client, policy: RetryPolicy, max_concurrent_calls: usize) -> Self {
        Self {
            http,
            policy,
            max_concurrent_calls: max_concurrent_calls.max(1),
        }
    }

    /// Runs every call, at most `max_concurrent_calls` at a time, and stores
    /// the results on the calls. Calls cut off by the deadline keep no result.
    pub async fn execute_all(
        &self,
        config: &Config,
        relay: &RelayMetadata,
        calls: &mut BTreeMap<String, AggregatedApiCall>,
        deadline: Deadline,
    ) {
        let permits = Semaphore::new(self.max_concurrent_calls);
        let mut pending = Vec::with_capacity(calls.len());
        for call in calls.values() {
            pending.push(self.execute_gated(&permits, config, relay, call, deadline));
        }
        let results = join_all(pending).await;

        let mut skipped = 0usize;
        for (id, result) in results {
            match (calls.get_mut(&id), result) {
                (Some(call), Some(result)) => call.result = Some(result),
                _ => skipped += 1,
            }
        }
        info!(calls = calls.len(), skipped, "executed api calls");
    }

    async fn execute_gated(
        &self,
        permits: &Semaphore,
        config: &Config,
        relay: &RelayMetadata,
        call: &AggregatedApiCall,
        deadline: Deadline,
    ) -> (String, Option<ApiCallResult>) {
        let Ok(_permit) = permits.acquire().await else {
            return (call.id.clone(), None);
        };
        (call.id.clone(), self.execute(config, relay, call, deadline).await)
    }

    /// Executes one call. `None` means the run deadline passed before the call
    /// could produce a result.
    pub async fn execute(
        &self,
        config: &Config,
        relay: &RelayMetadata,
        call: &AggregatedApiCall,
        deadline: Deadline,
    ) -> Option<ApiCallResult> {
        if deadline.is_expired() {
            return None;
        }
        let (request, response_parameters) = match build_request(config, relay, call) {
            Ok(built) => built,
            Err(error) => return Some(Err(error)),
        };

        let outcome = retry::retry(&self.policy, Some(deadline), HttpFailure::is_transient, || {
            self.send(&request)
        })
        .await;

        let body = match outcome {
            Ok(body) => body,
            Err(RetryError::DeadlineExceeded) => return None,
            Err(RetryError::TimedOut { .. }) if deadline.is_expired() => return None,
            Err(err) => {
                warn!(
                    call_id = %call.id,
                    endpoint = %call.endpoint_name,
                    url = %request.url,
                    error = %err,
                    "api call failed"
                );
                return Some(Err(ApiCallError::new(
                    RequestErrorCode::ApiCallFailed,
                    format!("API call failed: {err}"),
                )));
            }
        };

        debug!(call_id = %call.id, endpoint = %call.endpoint_name, "api call succeeded");
        Some(process_response(&body, &response_parameters))
    }

    async fn send(&self, request: &HttpRequest) -> Result<Value, HttpFailure> {
        let mut builder = match request.method {
            HttpMethod::Get => self.http.get(request.url.clone()).query(&request.query),
            HttpMethod::Post => {
                let body: Map<String, Value> = request
                    .query
                    .iter()
                    .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                    .collect();
                self.http.post(request.url.clone()).json(&body)
            }
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.cookies.is_empty() {
            let cookie = request
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(COOKIE, cookie);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| HttpFailure::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpFailure::Status(status.as_u16()));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| HttpFailure::Body(e.to_string()))
    }
}

/// Resolves an aggregated call into an HTTP request and its response
/// parameters.
pub fn build_request(
    config: &Config,
    relay: &RelayMetadata,
    call: &AggregatedApiCall,
) -> Result<(HttpRequest, ResponseParameters), ApiCallError> {
    let ois = config.ois(&call.ois_title).ok_or_else(|| {
        ApiCallError::new(
            RequestErrorCode::InvalidOis,
            format!("OIS {:?} not found", call.ois_title),
        )
    })?;
    let endpoint = ois.endpoint(&call.endpoint_name).ok_or_else(|| {
        ApiCallError::new(
            RequestErrorCode::InvalidOis,
            format!("endpoint {:?} not found in OIS {:?}", call.endpoint_name, ois.title),
        )
    })?;
    if ois.operation(endpoint).is_none() {
        return Err(ApiCallError::new(
            RequestErrorCode::InvalidOis,
            format!(
                "operation {} {} of endpoint {:?} is not described",
                endpoint.operation.method, endpoint.operation.path, endpoint.name
            ),
        ));
    }
    let response_parameters = resolve_response_parameters(endpoint, &call.parameters)?;

    let mut buckets = Buckets::default();
    for parameter in &endpoint.parameters {
        if RESERVED_PARAMETERS.contains(&parameter.name.as_str()) {
            continue;
        }
        if let Some(value) = call.parameters.get(&parameter.name) {
            let target = &parameter.operation_parameter;
            buckets.set(target.location, &target.name, value.clone());
        }
    }
    for fixed in &endpoint.fixed_operation_parameters {
        let target = &fixed.operation_parameter;
        buckets.set(target.location, &target.name, fixed.value.clone());
    }
    for parameter in &endpoint.parameters {
        let target = &parameter.operation_parameter;
        if let Some(default) = &parameter.default {
            if !buckets.contains(target.location, &target.name) {
                buckets.set(target.location, &target.name, default.clone());
            }
        }
    }

    if response_parameters.relay_metadata.as_deref() == Some("v1") {
        let query = ParameterLocation::Query;
        buckets.set(query, "_airnode_airnode_address", format!("{:?}", relay.airnode));
        buckets.set(query, "_airnode_endpoint_id", format!("{:?}", call.endpoint_id));
        buckets.set(query, "_airnode_chain_id", relay.chain_id.to_string());
        buckets.set(query, "_airnode_chain_type", relay.chain_type.clone());
        buckets.set(query, "_airnode_airnode_rrp", format!("{:?}", relay.rrp));
    }

    apply_security(config, ois, &mut buckets);

    let path = substitute_path(&endpoint.operation.path, &buckets.path)?;
    let base_url = ois.base_url().ok_or_else(|| {
        ApiCallError::new(
            RequestErrorCode::InvalidOis,
            format!("OIS {:?} has no servers", ois.title),
        )
    })?;
    let url = Url::parse(&format!("{}{}", base_url.trim_end_matches('/'), path)).map_err(|e| {
        ApiCallError::new(
            RequestErrorCode::ApiCallFailed,
            format!("invalid API url {base_url}{path}: {e}"),
        )
    })?;

    Ok((
        HttpRequest {
            method: endpoint.operation.method,
            url,
            query: buckets.query,
            headers: buckets.header,
            cookies: buckets.cookie,
        },
        response_parameters,
    ))
}

/// `fixed` wins over the request value, which wins over `default`. Reserved
/// parameters the endpoint does not declare are not accepted from requests.
pub fn resolve_response_parameters(
    endpoint: &Endpoint,
    parameters: &BTreeMap<String, String>,
) -> Result<ResponseParameters, ApiCallError> {
    let resolve = |name: &str| -> Option<String> {
        let reserved = endpoint.reserved(name)?;
        reserved
            .fixed
            .clone()
            .or_else(|| parameters.get(name).cloned())
            .or_else(|| reserved.default.clone())
    };

    let type_name = resolve(TYPE_PARAMETER).ok_or_else(|| {
        ApiCallError::new(
            RequestErrorCode::InvalidResponseParameters,
            "missing _type parameter",
        )
    })?;
    let response_type = type_name.parse::<ParameterType>().map_err(|e| {
        ApiCallError::new(RequestErrorCode::InvalidResponseParameters, e.to_string())
    })?;

    Ok(ResponseParameters {
        response_type,
        path: resolve(PATH_PARAMETER),
        times: resolve(TIMES_PARAMETER).filter(|_| response_type.is_numeric()),
        relay_metadata: resolve(RELAY_METADATA_PARAMETER),
    })
}

fn apply_security(config: &Config, ois: &Ois, buckets: &mut Buckets) {
    for scheme_name in ois.api_specifications.security.keys() {
        let Some(scheme) = ois.api_specifications.components.security_schemes.get(scheme_name) else {
            continue;
        };
        let Some(credentials) = config.credentials(&ois.title, scheme_name) else {
            continue;
        };
        let value = &credentials.security_scheme_value;
        match scheme {
            SecurityScheme::ApiKey { location, name } => buckets.set(*location, name, value.clone()),
            SecurityScheme::Http {
                scheme: HttpAuthScheme::Basic,
            } => buckets.set(
                ParameterLocation::Header,
                AUTHORIZATION.as_str(),
                format!("Basic {}", STANDARD.encode(value)),
            ),
            SecurityScheme::Http {
                scheme: HttpAuthScheme::Bearer,
            } => buckets.set(
                ParameterLocation::Header,
                AUTHORIZATION.as_str(),
                format!("Bearer {value}"),
            ),
        }
    }
}

/// Replaces `{name}` placeholders with path parameters.
pub fn substitute_path(template: &str, values: &[(String, String)]) -> Result<String, ApiCallError> {
    let mut path = template.to_string();
    for (name, value) in values {
        path = path.replace(&format!("{{{name}}}"), &encode_path_segment(value));
    }

    let mut missing = Vec::new();
    let mut rest = path.as_str();
    while let Some(start) = rest.find('{') {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        missing.push(&rest[start + 1..start + end]);
        rest = &rest[start + end + 1..];
    }
    if !missing.is_empty() {
        return Err(ApiCallError::new(
            RequestErrorCode::ApiCallFailed,
            format!("missing path parameter(s): {}", missing.join(", ")),
        ));
    }
    Ok(path)
}

fn encode_path_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

/// Selects, casts and encodes the response value.
pub fn process_response(body: &Value, parameters: &ResponseParameters) -> ApiCallResult {
    let path = parameters.path.as_deref().unwrap_or("");
    let value = extract_value(body, path).ok_or_else(|| {
        ApiCallError::new(
            RequestErrorCode::ResponseValueNotFound,
            format!("no value found at path {path:?}"),
        )
    })?;
    encode_response_value(value, parameters.response_type, parameters.times.as_deref()).map_err(
        |e| ApiCallError::new(RequestErrorCode::InvalidResponseParameters, e.to_string()),
    )
}

/// Walks a dot separated path. Segments index arrays when numeric, and
/// `name[0][1]` indexes nested arrays. An empty path selects the whole body.
pub fn extract_value<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(body);
    }

    let mut current = body;
    for segment in path.split('.') {
        let (name, indices) = match segment.find('[') {
            Some(open) => (&segment[..open], &segment[open..]),
            None => (segment, ""),
        };
        if !name.is_empty() {
            current = match current {
                Value::Object(map) => map.get(name)?,
                Value::Array(items) => items.get(name.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        let mut indices = indices;
        while !indices.is_empty() {
            let close = indices.find(']')?;
            let index = indices.get(1..close)?.trim().parse::<usize>().ok()?;
            current = current.as_array()?.get(index)?;
            indices = &indices[close + 1..];
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{H256, U256};
    use serde_json::json;

    fn config() -> Config {
        serde_json::from_value(json!({
            "nodeSettings": { "airnodeWalletMnemonic": "m" },
            "chains": [],
            "ois": [{
                "title": "currency-converter-ois",
                "apiSpecifications": {
                    "servers": [{ "url": "http://localhost:5000/" }],
                    "paths": {
                        "/convert": { "get": { "parameters": [
                            { "in": "query", "name": "from" },
                            { "in": "query", "name": "to" },
                            { "in": "query", "name": "amount" }
                        ] } },
                        "/prices/{symbol}": { "post": { "parameters": [
                            { "in": "path", "name": "symbol" },
                            { "in": "header", "name": "x-region" }
                        ] } }
                    },
                    "components": { "securitySchemes": {
                        "apiKey": { "type": "apiKey", "in": "query", "name": "access_key" },
                        "basic": { "type": "http", "scheme": "basic" },
                        "session": { "type": "apiKey", "in": "cookie", "name": "sid" }
                    } },
                    "security": { "apiKey": [], "basic": [], "session": [] }
                },
                "endpoints": [
                    {
                        "name": "convertToUSD",
                        "operation": { "method": "get", "path": "/convert" },
                        "fixedOperationParameters": [
                            { "operationParameter": { "in": "query", "name": "to" }, "value": "USD" }
                        ],
                        "reservedParameters": [
                            { "name": "_type", "fixed": "int256" },
                            { "name": "_path", "fixed": "result" },
                            { "name": "_times", "default": "100000" },
                            { "name": "_relay_metadata" }
                        ],
                        "parameters": [
                            { "name": "from", "default": "EUR", "operationParameter": { "in": "query", "name": "from" } },
                            { "name": "to", "operationParameter": { "in": "query", "name": "to" } },
                            { "name": "amount", "default": "1", "operationParameter": { "in": "query", "name": "amount" } }
                        ]
                    },
                    {
                        "name": "price",
                        "operation": { "method": "post", "path": "/prices/{symbol}" },
                        "reservedParameters": [{ "name": "_type" }],
                        "parameters": [
                            { "name": "symbol", "operationParameter": { "in": "path", "name": "symbol" } },
                            { "name": "region", "operationParameter": { "in": "header", "name": "x-region" } }
                        ]
                    }
                ]
            }],
            "apiCredentials": [
                { "oisTitle": "currency-converter-ois", "securitySchemeName": "apiKey", "securitySchemeValue": "secret" },
                { "oisTitle": "currency-converter-ois", "securitySchemeName": "basic", "securitySchemeValue": "user:pass" }
            ]
        }))
        .unwrap()
    }

    fn relay() -> RelayMetadata {
        RelayMetadata {
            airnode: Address::repeat_byte(0xaa),
            chain_id: 31337,
            chain_type: "evm".into(),
            rrp: Address::repeat_byte(0xbb),
        }
    }

    fn call(endpoint: &str, params: &[(&str, &str)]) -> AggregatedApiCall {
        AggregatedApiCall {
            id: "call-1".into(),
            endpoint_id: H256::repeat_byte(1),
            endpoint_name: endpoint.into(),
            ois_title: "currency-converter-ois".into(),
            parameters: params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            request_ids: vec![H256::repeat_byte(2)],
            result: None,
        }
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_builds_convert_request() {
        let (request, response) =
            build_request(&config(), &relay(), &call("convertToUSD", &[("from", "ETH"), ("to", "GBP")]))
                .unwrap();

        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.url.as_str(), "http://localhost:5000/convert");
        // "to" is fixed and cannot be overridden by the request.
        assert_eq!(
            request.query,
            pairs(&[("from", "ETH"), ("to", "USD"), ("amount", "1"), ("access_key", "secret")])
        );
        assert_eq!(
            request.headers,
            pairs(&[("authorization", "Basic dXNlcjpwYXNz")])
        );
        assert!(request.cookies.is_empty(), "no credentials for the cookie scheme");
        assert_eq!(response.response_type, ParameterType::Int256);
        assert_eq!(response.path.as_deref(), Some("result"));
        assert_eq!(response.times.as_deref(), Some("100000"));
    }

    #[test]
    fn test_reserved_parameters_precedence() {
        let (_, response) = build_request(
            &config(),
            &relay(),
            &call("convertToUSD", &[("_path", "other"), ("_times", "10"), ("_type", "bool")]),
        )
        .unwrap();
        assert_eq!(response.path.as_deref(), Some("result"));
        assert_eq!(response.times.as_deref(), Some("10"));
        assert_eq!(response.response_type, ParameterType::Int256);
    }

    #[test]
    fn test_relay_metadata() {
        let (request, _) = build_request(
            &config(),
            &relay(),
            &call("convertToUSD", &[("_relay_metadata", "v1")]),
        )
        .unwrap();
        let names: Vec<&str> = request.query.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"_airnode_airnode_address"));
        assert!(names.contains(&"_airnode_endpoint_id"));
        assert!(request.query.contains(&("_airnode_chain_id".into(), "31337".into())));
        assert!(request.query.contains(&("_airnode_chain_type".into(), "evm".into())));
        assert!(!names.contains(&"_relay_metadata"));
    }

    #[test]
    fn test_path_and_header_parameters() {
        let (request, _) = build_request(
            &config(),
            &relay(),
            &call("price", &[("symbol", "ETH/USD"), ("region", "eu"), ("_type", "uint256")]),
        )
        .unwrap();
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.url.as_str(), "http://localhost:5000/prices/ETH%2FUSD");
        assert!(request.headers.contains(&("x-region".into(), "eu".into())));
    }

    #[test]
    fn test_missing_path_parameter() {
        let error = build_request(&config(), &relay(), &call("price", &[("_type", "uint256")]))
            .unwrap_err();
        assert_eq!(error.code, RequestErrorCode::ApiCallFailed);
        assert!(error.message.contains("symbol"), "{}", error.message);
    }

    #[test]
    fn test_invalid_ois_and_type() {
        let mut unknown = call("convertToUSD", &[]);
        unknown.ois_title = "nope".into();
        assert_eq!(
            build_request(&config(), &relay(), &unknown).unwrap_err().code,
            RequestErrorCode::InvalidOis
        );
        assert_eq!(
            build_request(&config(), &relay(), &call("missing", &[])).unwrap_err().code,
            RequestErrorCode::InvalidOis
        );
        assert_eq!(
            build_request(&config(), &relay(), &call("price", &[("symbol", "x")]))
                .unwrap_err()
                .code,
            RequestErrorCode::InvalidResponseParameters
        );
        assert_eq!(
            build_request(&config(), &relay(), &call("price", &[("symbol", "x"), ("_type", "uint8")]))
                .unwrap_err()
                .code,
            RequestErrorCode::InvalidResponseParameters
        );
    }

    #[test]
    fn test_undescribed_operation_is_rejected() {
        let mut config = config();
        config.ois[0].endpoints[0].operation.path = "/rates".into();
        let err = build_request(&config, &relay(), &call("convertToUSD", &[("from", "ETH")])).unwrap_err();
        assert_eq!(err.code, RequestErrorCode::InvalidOis);
        assert!(err.message.contains("/rates"));
    }

    #[test]
    fn test_times_only_applies_to_numbers() {
        let (_, response) =
            build_request(&config(), &relay(), &call("convertToUSD", &[])).unwrap();
        assert_eq!(response.times.as_deref(), Some("100000"));

        let mut config = config();
        config.ois[0].endpoints[0].reserved_parameters[0].fixed = Some("string".into());
        let (_, response) =
            build_request(&config, &relay(), &call("convertToUSD", &[])).unwrap();
        assert_eq!(response.response_type, ParameterType::String);
        assert_eq!(response.times, None);
    }

    #[test]
    fn test_extract_value() {
        let body = json!({
            "result": "723.39202",
            "data": { "items": [ { "v": 1 }, { "v": [10, 20] } ] }
        });
        assert_eq!(extract_value(&body, "result"), Some(&json!("723.39202")));
        assert_eq!(extract_value(&body, "data.items.1.v.0"), Some(&json!(10)));
        assert_eq!(extract_value(&body, "data.items[1].v[1]"), Some(&json!(20)));
        assert_eq!(extract_value(&body, ""), Some(&body));
        assert_eq!(extract_value(&body, "data.missing"), None);
        assert_eq!(extract_value(&body, "data.items.5"), None);
        assert_eq!(extract_value(&body, "result.inner"), None);
    }

    #[test]
    fn test_process_response() {
        let parameters = ResponseParameters {
            response_type: ParameterType::Int256,
            path: Some("result".into()),
            times: Some("100000".into()),
            relay_metadata: None,
        };
        let encoded = process_response(&json!({ "result": "723.39202" }), &parameters).unwrap();
        assert_eq!(U256::from_big_endian(&encoded), U256::from(72_339_202u64));

        let missing = process_response(&json!({ "other": 1 }), &parameters).unwrap_err();
        assert_eq!(missing.code, RequestErrorCode::ResponseValueNotFound);

        let bad = process_response(&json!({ "result": "abc" }), &parameters).unwrap_err();
        assert_eq!(bad.code, RequestErrorCode::InvalidResponseParameters);
    }

    #[test]
    fn test_transient_failures() {
        assert!(HttpFailure::Status(500).is_transient());
        assert!(HttpFailure::Status(503).is_transient());
        assert!(HttpFailure::Status(429).is_transient());
        assert!(!HttpFailure::Status(404).is_transient());
        assert!(HttpFailure::Transport("connection refused".into()).is_transient());
        assert!(!HttpFailure::Body("eof".into()).is_transient());
    }
}
