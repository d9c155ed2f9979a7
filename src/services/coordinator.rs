//! One coordinator run across every configured chain provider.
//!
//! Providers are processed concurrently and independently: a failure on one
//! never stops the others. Within a provider the pipeline is
//! source -> withdrawal blocking -> aggregation -> authorization ->
//! API calls -> transactions, all bounded by a single run deadline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ethers::types::H256;
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use super::aggregator::aggregate;
use super::api_caller::{ApiCaller, RelayMetadata};
use super::authorization::{apply_authorizations, check_authorizations};
use super::request_source::fetch_pending_requests;
use super::transactions::{block_requests_with_withdrawals, submit_transactions};
use super::ProviderContext;
use crate::chain::{ChainClient, EthersChainClient, RrpContract};
use crate::config::Config;
use crate::models::{Request, RequestStatus, RequestType};
use crate::retry::Deadline;
use crate::wallet::WalletDeriver;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOutcome {
    pub id: H256,
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub status: RequestStatus,
    pub error_code: u8,
    pub error_message: Option<String>,
    pub transaction_hash: Option<H256>,
}

impl From<&Request> for RequestOutcome {
    fn from(request: &Request) -> Self {
        Self {
            id: request.id,
            request_type: request.request_type,
            status: request.status,
            error_code: request.error_code_value(),
            error_message: request.error_message.clone(),
            transaction_hash: request.fulfillment.map(|f| f.transaction_hash),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
    pub chain_id: u64,
    pub provider: String,
    pub api_calls: usize,
    pub requests: Vec<RequestOutcome>,
    pub transactions: Vec<H256>,
    pub error: Option<String>,
}

impl ProviderSummary {
    fn failed(chain_id: u64, provider: &str, error: String) -> Self {
        Self {
            chain_id,
            provider: provider.to_string(),
            api_calls: 0,
            requests: Vec::new(),
            transactions: Vec::new(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub providers: Vec<ProviderSummary>,
    pub error_logs: Vec<String>,
}

impl CoordinatorSummary {
    fn empty(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: started_at,
            providers: Vec::new(),
            error_logs: Vec::new(),
        }
    }

    pub fn requests(&self) -> impl Iterator<Item = &RequestOutcome> {
        self.providers.iter().flat_map(|p| p.requests.iter())
    }

    pub fn outcome(&self, id: &H256) -> Option<&RequestOutcome> {
        self.requests().find(|outcome| outcome.id == *id)
    }

    pub fn transaction_count(&self) -> usize {
        self.providers.iter().map(|p| p.transactions.len()).sum()
    }
}

/// A chain client bound to a named provider of a configured chain.
#[derive(Clone)]
pub struct ProviderHandle {
    pub chain_id: u64,
    pub provider_name: String,
    pub client: Arc<dyn ChainClient>,
}

/// Runs the coordinator once against every provider in `config`.
pub async fn start_coordinator(config: &Config) -> CoordinatorSummary {
    let started_at = Utc::now();
    let wallets = match WalletDeriver::from_mnemonic(&config.node_settings.airnode_wallet_mnemonic) {
        Ok(wallets) => wallets,
        Err(err) => {
            error!(error = %err, "could not derive the node wallet");
            let mut summary = CoordinatorSummary::empty(started_at);
            summary.error_logs.push(format!("could not derive the node wallet: {err}"));
            summary.finished_at = Utc::now();
            return summary;
        }
    };

    let timeout = std::time::Duration::from_millis(config.node_settings.provider_timeout_ms);
    let mut providers = Vec::new();
    let mut error_logs = Vec::new();
    for chain in &config.chains {
        for (name, provider) in &chain.providers {
            match EthersChainClient::new(&provider.url, timeout) {
                Ok(client) => providers.push(ProviderHandle {
                    chain_id: chain.id,
                    provider_name: name.clone(),
                    client: Arc::new(client),
                }),
                Err(err) => {
                    error!(chain_id = chain.id, provider = %name, error = %err, "invalid provider");
                    error_logs.push(format!("chain {} provider {name}: {err}", chain.id));
                }
            }
        }
    }

    let api = ApiCaller::new(&config.node_settings);
    let mut summary = run_with_clients(config, &wallets, &providers, &api).await;
    error_logs.append(&mut summary.error_logs);
    summary.error_logs = error_logs;
    summary.started_at = started_at;
    summary
}

/// Runs the coordinator once against the given providers.
pub async fn run_with_clients(
    config: &Config,
    wallets: &WalletDeriver,
    providers: &[ProviderHandle],
    api: &ApiCaller,
) -> CoordinatorSummary {
    let mut summary = CoordinatorSummary::empty(Utc::now());
    let run_id = summary.run_id;
    let deadline = Deadline::after(config.node_settings.run_timeout());
    info!(run_id = %run_id, providers = providers.len(), "coordinator run started");

    let runs: Vec<_> = providers
        .iter()
        .map(|handle| {
            let span = info_span!(
                "provider",
                run_id = %run_id,
                chain_id = handle.chain_id,
                provider = %handle.provider_name
            );
            process_provider(config, wallets, handle, api, deadline).instrument(span)
        })
        .collect();
    summary.providers = join_all(runs).await;

    summary.error_logs = summary
        .providers
        .iter()
        .filter_map(|p| {
            p.error
                .as_ref()
                .map(|e| format!("chain {} provider {}: {e}", p.chain_id, p.provider))
        })
        .collect();
    summary.finished_at = Utc::now();

    info!(
        run_id = %summary.run_id,
        requests = summary.requests().count(),
        transactions = summary.transaction_count(),
        errors = summary.error_logs.len(),
        "coordinator run finished"
    );
    summary
}

async fn process_provider(
    config: &Config,
    wallets: &WalletDeriver,
    handle: &ProviderHandle,
    api: &ApiCaller,
    deadline: Deadline,
) -> ProviderSummary {
    let Some(chain) = config.chains.iter().find(|c| c.id == handle.chain_id) else {
        return ProviderSummary::failed(
            handle.chain_id,
            &handle.provider_name,
            "chain is not configured".into(),
        );
    };
    let contract = match RrpContract::new(chain.rrp_address()) {
        Ok(contract) => contract,
        Err(err) => {
            return ProviderSummary::failed(chain.id, &handle.provider_name, err.to_string());
        }
    };
    let ctx = ProviderContext {
        config,
        chain,
        provider_name: &handle.provider_name,
        client: handle.client.as_ref(),
        contract: &contract,
        wallets,
        read_policy: config.node_settings.provider_retry_policy(),
        deadline,
    };

    let mut requests = match fetch_pending_requests(&ctx).await {
        Ok(requests) => requests,
        Err(err) => {
            error!(error = %err, "could not fetch requests");
            return ProviderSummary::failed(chain.id, &handle.provider_name, err.to_string());
        }
    };

    block_requests_with_withdrawals(&mut requests, ctx.ignore_after_blocks());

    let mut aggregation = aggregate(&mut requests, config);
    if !aggregation.is_empty() {
        let statuses = check_authorizations(&ctx, &requests).await;
        apply_authorizations(&mut requests, &statuses);
        aggregation.prune(&requests);

        let relay = RelayMetadata {
            airnode: ctx.airnode(),
            chain_id: chain.id,
            chain_type: chain.chain_type.clone(),
            rrp: contract.address(),
        };
        api.execute_all(config, &relay, &mut aggregation.calls, deadline)
            .await;
        aggregation.apply_responses(&mut requests);
    }

    let transactions = submit_transactions(&ctx, &mut requests).await;

    ProviderSummary {
        chain_id: chain.id,
        provider: handle.provider_name.clone(),
        api_calls: aggregation.calls.len(),
        requests: requests.iter().map(RequestOutcome::from).collect(),
        transactions,
        error: None,
    }
}
