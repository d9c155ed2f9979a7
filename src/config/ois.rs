//! API descriptions (OIS documents).
//!
//! An OIS maps the on-chain notion of an endpoint onto a concrete HTTP
//! operation: where its parameters go, which values are fixed, and how the
//! request is authenticated.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ois {
    #[serde(default)]
    pub ois_format: String,
    pub title: String,
    #[serde(default)]
    pub version: String,
    pub api_specifications: ApiSpecification,
    pub endpoints: Vec<Endpoint>,
}

impl Ois {
    pub fn endpoint(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|endpoint| endpoint.name == name)
    }

    pub fn base_url(&self) -> Option<&str> {
        self.api_specifications
            .servers
            .first()
            .map(|server| server.url.as_str())
    }

    pub fn operation(&self, endpoint: &Endpoint) -> Option<&Operation> {
        self.api_specifications
            .paths
            .get(&endpoint.operation.path)?
            .get(&endpoint.operation.method)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSpecification {
    pub servers: Vec<Server>,
    #[serde(default)]
    pub paths: BTreeMap<String, BTreeMap<HttpMethod, Operation>>,
    #[serde(default)]
    pub components: Components,
    /// Names of the security schemes applied to every operation.
    #[serde(default)]
    pub security: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Components {
    #[serde(default)]
    pub security_schemes: BTreeMap<String, SecurityScheme>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub parameters: Vec<OperationParameter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationParameter {
    #[serde(rename = "in")]
    pub location: ParameterLocation,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SecurityScheme {
    #[serde(rename = "apiKey")]
    ApiKey {
        #[serde(rename = "in")]
        location: ParameterLocation,
        name: String,
    },
    #[serde(rename = "http")]
    Http { scheme: HttpAuthScheme },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpAuthScheme {
    Basic,
    Bearer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub name: String,
    pub operation: EndpointOperation,
    #[serde(default)]
    pub fixed_operation_parameters: Vec<FixedParameter>,
    #[serde(default)]
    pub reserved_parameters: Vec<ReservedParameter>,
    #[serde(default)]
    pub parameters: Vec<EndpointParameter>,
}

impl Endpoint {
    pub fn reserved(&self, name: &str) -> Option<&ReservedParameter> {
        self.reserved_parameters
            .iter()
            .find(|parameter| parameter.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointOperation {
    pub method: HttpMethod,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedParameter {
    pub operation_parameter: OperationParameter,
    pub value: String,
}

/// `_type`, `_path`, `_times` and `_relay_metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedParameter {
    pub name: String,
    #[serde(default)]
    pub fixed: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointParameter {
    pub name: String,
    pub operation_parameter: OperationParameter,
    #[serde(default)]
    pub default: Option<String>,
}
