//! Pipeline stages of a coordinator run, leaves first.

pub mod aggregator;
pub mod api_caller;
pub mod authorization;
pub mod coordinator;
pub mod request_source;
pub mod transactions;

use ethers::types::Address;

use crate::chain::{ChainClient, RrpContract};
use crate::config::{ChainConfig, Config};
use crate::retry::{Deadline, RetryPolicy};
use crate::wallet::WalletDeriver;

/// Everything a stage needs to work against one provider of one chain.
#[derive(Clone, Copy)]
pub struct ProviderContext<'a> {
    pub config: &'a Config,
    pub chain: &'a ChainConfig,
    pub provider_name: &'a str,
    pub client: &'a dyn ChainClient,
    pub contract: &'a RrpContract,
    pub wallets: &'a WalletDeriver,
    /// Policy for idempotent chain reads.
    pub read_policy: RetryPolicy,
    pub deadline: Deadline,
}

impl ProviderContext<'_> {
    /// The node address requests are made to.
    pub fn airnode(&self) -> Address {
        self.wallets.node_address()
    }

    pub fn ignore_after_blocks(&self) -> u64 {
        self.chain.options.ignore_blocked_requests_after_blocks
    }
}
