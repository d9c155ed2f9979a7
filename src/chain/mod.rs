//! Chain access.
//!
//! Everything the coordinator needs from a chain goes through [`ChainClient`],
//! so the pipeline can run against an in-memory chain in tests and against an
//! `ethers` provider in production.

pub mod contract;
pub mod ethers_client;

use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Filter, Log, TransactionRequest, H256, U256};
use thiserror::Error;

pub use contract::{
    LoggedEvent, RequestEvent, RequestKind, RrpContract, RrpEvent, Template, WithdrawalEvent,
};
pub use ethers_client::EthersChainClient;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("provider error: {0}")]
    Provider(String),
    /// The node answered with an error, such as a reverted call.
    #[error("rejected by node: {0}")]
    Rejected(String),
    #[error("abi error: {0}")]
    Abi(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("malformed log: {0}")]
    InvalidLog(String),
}

impl ChainError {
    /// Only transport failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Provider(_))
    }
}

impl From<ethers::abi::Error> for ChainError {
    fn from(error: ethers::abi::Error) -> Self {
        ChainError::Abi(error.to_string())
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, ChainError>;

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError>;

    /// `eth_call` against the latest block.
    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, ChainError>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, ChainError>;

    async fn gas_price(&self) -> Result<U256, ChainError>;

    async fn balance(&self, address: Address) -> Result<U256, ChainError>;

    async fn transaction_count(&self, address: Address) -> Result<U256, ChainError>;

    /// Signs `tx` with `signer` and broadcasts it. Returns once the node has
    /// accepted the transaction.
    async fn send_transaction(
        &self,
        tx: TypedTransaction,
        signer: &LocalWallet,
    ) -> Result<H256, ChainError>;
}

/// A read-only call of `data` against `to`.
pub fn read_call(to: Address, data: Bytes) -> TypedTransaction {
    TransactionRequest::new().to(to).data(data).into()
}
