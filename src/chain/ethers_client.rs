use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Filter, Log, H256, U256};
use reqwest::{Client, Url};

use super::{ChainClient, ChainError};

/// JSON-RPC chain client over HTTP.
#[derive(Debug, Clone)]
pub struct EthersChainClient {
    provider: Provider<Http>,
}

impl EthersChainClient {
    /// `timeout` bounds every RPC round trip.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ChainError> {
        let url = Url::parse(url).map_err(|e| ChainError::Provider(format!("invalid url {url}: {e}")))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Provider(e.to_string()))?;
        Ok(Self {
            provider: Provider::new(Http::new_with_client(url, http)),
        })
    }
}

fn provider_error(error: impl std::fmt::Display) -> ChainError {
    ChainError::Provider(error.to_string())
}

fn call_error(error: ProviderError) -> ChainError {
    match error.as_error_response() {
        Some(response) => ChainError::Rejected(response.message.clone()),
        None => provider_error(error),
    }
}

#[async_trait]
impl ChainClient for EthersChainClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self
            .provider
            .get_block_number()
            .await
            .map_err(provider_error)?
            .as_u64())
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError> {
        self.provider.get_logs(filter).await.map_err(provider_error)
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, ChainError> {
        self.provider.call(tx, None).await.map_err(call_error)
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, ChainError> {
        self.provider.estimate_gas(tx, None).await.map_err(call_error)
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        self.provider.get_gas_price().await.map_err(provider_error)
    }

    async fn balance(&self, address: Address) -> Result<U256, ChainError> {
        self.provider.get_balance(address, None).await.map_err(provider_error)
    }

    async fn transaction_count(&self, address: Address) -> Result<U256, ChainError> {
        self.provider
            .get_transaction_count(address, None)
            .await
            .map_err(provider_error)
    }

    async fn send_transaction(
        &self,
        mut tx: TypedTransaction,
        signer: &LocalWallet,
    ) -> Result<H256, ChainError> {
        if tx.chain_id().is_none() {
            tx.set_chain_id(signer.chain_id());
        }
        let signature = signer
            .sign_transaction(&tx)
            .await
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        let pending = self
            .provider
            .send_raw_transaction(tx.rlp_signed(&signature))
            .await
            .map_err(provider_error)?;
        Ok(pending.tx_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_url() {
        assert!(matches!(
            EthersChainClient::new("not a url", Duration::from_secs(1)),
            Err(ChainError::Provider(_))
        ));
        assert!(EthersChainClient::new("http://127.0.0.1:8545", Duration::from_secs(1)).is_ok());
    }
}
