//! Per-chain settings: contract addresses, RPC providers and processing limits.

use std::collections::BTreeMap;

use ethers::types::{Address, U256};
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_BLOCK_HISTORY_LIMIT: u64 = 300;
pub const DEFAULT_IGNORE_BLOCKED_REQUESTS_AFTER_BLOCKS: u64 = 20;
pub const DEFAULT_FULFILLMENT_GAS_LIMIT: u64 = 500_000;
pub const DEFAULT_AUTHORIZATION_BATCH_SIZE: usize = 10;
pub const DEFAULT_TEMPLATE_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    #[serde(deserialize_with = "chain_id_from_string_or_number")]
    pub id: u64,
    #[serde(rename = "type", default = "default_chain_type")]
    pub chain_type: String,
    pub contracts: ChainContracts,
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Authorizer contracts consulted for every request. Empty means every
    /// requester is authorized.
    #[serde(default)]
    pub authorizers: Vec<Address>,
    #[serde(default)]
    pub options: ChainOptions,
}

impl ChainConfig {
    pub fn rrp_address(&self) -> Address {
        self.contracts.airnode_rrp
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainContracts {
    #[serde(rename = "AirnodeRrp")]
    pub airnode_rrp: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainOptions {
    pub block_history_limit: u64,
    pub min_confirmations: u64,
    pub ignore_blocked_requests_after_blocks: u64,
    pub fulfillment_gas_limit: u64,
    pub authorization_batch_size: usize,
    pub template_batch_size: usize,
    /// Wei left behind in a sponsor wallet when its balance is withdrawn.
    #[serde(deserialize_with = "wei_from_string_or_number")]
    pub withdrawal_remainder: U256,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            block_history_limit: DEFAULT_BLOCK_HISTORY_LIMIT,
            min_confirmations: 0,
            ignore_blocked_requests_after_blocks: DEFAULT_IGNORE_BLOCKED_REQUESTS_AFTER_BLOCKS,
            fulfillment_gas_limit: DEFAULT_FULFILLMENT_GAS_LIMIT,
            authorization_batch_size: DEFAULT_AUTHORIZATION_BATCH_SIZE,
            template_batch_size: DEFAULT_TEMPLATE_BATCH_SIZE,
            withdrawal_remainder: U256::zero(),
        }
    }
}

fn default_chain_type() -> String {
    "evm".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(u64),
}

fn chain_id_from_string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Number(id) => Ok(id),
        StringOrNumber::String(id) => id
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid chain id {id:?}"))),
    }
}

fn wei_from_string_or_number<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Number(wei) => Ok(U256::from(wei)),
        StringOrNumber::String(wei) => U256::from_dec_str(wei.trim())
            .map_err(|_| serde::de::Error::custom(format!("invalid wei amount {wei:?}"))),
    }
}
