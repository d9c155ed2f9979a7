//! Sends the transactions that settle requests on-chain.
//!
//! Requests are grouped by sponsor wallet. Wallets are processed
//! concurrently, but each wallet sends its transactions one after the other
//! with consecutive nonces, in request order.

use std::collections::{BTreeMap, HashMap, HashSet};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use futures_util::future::join_all;
use thiserror::Error;
use tracing::{info, warn};

use super::ProviderContext;
use crate::chain::{contract::fulfillment_hash, ChainError};
use crate::models::{Fulfillment, Request, RequestErrorCode, RequestStatus, RequestType};
use crate::retry::{self, RetryError};
use crate::wallet::WalletError;

pub const FULFILL_FAILED_MESSAGE: &str = "Fulfill transaction failed";

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Read(#[from] RetryError<ChainError>),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error("fulfillment would revert: {0}")]
    Simulation(String),
    #[error("sponsor wallet balance {balance} does not cover withdrawal cost {cost}")]
    InsufficientBalance { balance: U256, cost: U256 },
}

/// Blocks pending API calls of sponsors that also have a pending withdrawal.
/// Returns how many requests were blocked.
pub fn block_requests_with_withdrawals(requests: &mut [Request], ignore_after_blocks: u64) -> usize {
    let withdrawing: HashSet<Address> = requests
        .iter()
        .filter(|r| r.is_pending() && r.request_type == RequestType::Withdrawal)
        .map(|r| r.sponsor_address)
        .collect();
    if withdrawing.is_empty() {
        return 0;
    }

    let mut blocked = 0;
    for request in requests
        .iter_mut()
        .filter(|r| r.is_pending_api_call() && withdrawing.contains(&r.sponsor_address))
    {
        request.block(
            RequestErrorCode::PendingWithdrawal,
            format!("sponsor {:?} has a pending withdrawal", request.sponsor_address),
            ignore_after_blocks,
        );
        blocked += 1;
    }
    blocked
}

/// Whether a transaction has to be sent for `request` in this run.
pub fn needs_transaction(request: &Request) -> bool {
    match request.status {
        RequestStatus::Pending => match request.request_type {
            RequestType::ApiCall => request.response.is_some(),
            RequestType::Withdrawal => true,
        },
        RequestStatus::Errored => {
            request.request_type == RequestType::ApiCall
                && request.fulfillment.is_none()
                && request.error_code.is_some_and(RequestErrorCode::reported_on_chain)
        }
        _ => false,
    }
}

/// Submits every transaction the requests call for and returns the hashes
/// of the ones the provider accepted.
pub async fn submit_transactions(ctx: &ProviderContext<'_>, requests: &mut [Request]) -> Vec<H256> {
    let mut by_sponsor: BTreeMap<Address, Vec<Request>> = BTreeMap::new();
    for request in requests.iter().filter(|r| needs_transaction(r)) {
        by_sponsor
            .entry(request.sponsor_address)
            .or_default()
            .push(request.clone());
    }
    if by_sponsor.is_empty() {
        return Vec::new();
    }

    let results = join_all(
        by_sponsor
            .into_iter()
            .map(|(sponsor, batch)| submit_for_sponsor(ctx, sponsor, batch)),
    )
    .await;

    let mut updated: HashMap<H256, Request> = HashMap::new();
    let mut hashes = Vec::new();
    for (batch, sent) in results {
        hashes.extend(sent);
        updated.extend(batch.into_iter().map(|r| (r.id, r)));
    }
    for request in requests.iter_mut() {
        if let Some(next) = updated.remove(&request.id) {
            *request = next;
        }
    }

    info!(
        chain_id = ctx.chain.id,
        provider = ctx.provider_name,
        transactions = hashes.len(),
        "submitted transactions"
    );
    hashes
}

/// Sends one wallet's transactions in order. Nonces only advance when the
/// provider accepts a transaction.
struct WalletSession<'c, 'a> {
    ctx: &'c ProviderContext<'a>,
    signer: LocalWallet,
    nonce: U256,
    gas_price: U256,
}

async fn submit_for_sponsor(
    ctx: &ProviderContext<'_>,
    sponsor: Address,
    mut batch: Vec<Request>,
) -> (Vec<Request>, Vec<H256>) {
    let mut session = match WalletSession::open(ctx, sponsor).await {
        Ok(session) => session,
        Err(err) => {
            warn!(
                chain_id = ctx.chain.id,
                sponsor = ?sponsor,
                error = %err,
                "could not prepare sponsor wallet"
            );
            for request in &mut batch {
                request.fail_with(
                    RequestErrorCode::TransactionSubmissionFailed,
                    format!("could not prepare sponsor wallet: {err}"),
                );
            }
            return (batch, Vec::new());
        }
    };

    let mut hashes = Vec::new();
    for request in &mut batch {
        if ctx.deadline.is_expired() {
            warn!(request_id = ?request.id, "run deadline reached, leaving request for the next run");
            break;
        }
        if let Some(hash) = session.settle(request).await {
            hashes.push(hash);
        }
    }
    (batch, hashes)
}

impl<'c, 'a> WalletSession<'c, 'a> {
    async fn open(ctx: &'c ProviderContext<'a>, sponsor: Address) -> Result<Self, SubmitError> {
        let signer = ctx.wallets.sponsor_signer(sponsor, ctx.chain.id)?;
        let address = signer.address();
        let nonce = retry::go(&ctx.read_policy, Some(ctx.deadline), || {
            ctx.client.transaction_count(address)
        })
        .await?;
        let gas_price = retry::go(&ctx.read_policy, Some(ctx.deadline), || ctx.client.gas_price()).await?;
        Ok(Self {
            ctx,
            signer,
            nonce,
            gas_price,
        })
    }

    async fn settle(&mut self, request: &mut Request) -> Option<H256> {
        match (request.status, request.request_type) {
            (RequestStatus::Pending, RequestType::ApiCall) => self.fulfill(request).await,
            (RequestStatus::Pending, RequestType::Withdrawal) => self.withdraw(request).await,
            (RequestStatus::Errored, RequestType::ApiCall) => {
                let message = request.error_message.clone().unwrap_or_default();
                self.report_failure(request, &message).await
            }
            _ => None,
        }
    }

    async fn fulfill(&mut self, request: &mut Request) -> Option<H256> {
        let data = request.response.clone()?;
        let calldata = match self.fulfill_calldata(request, &data).await {
            Ok(calldata) => calldata,
            Err(err) => {
                request.fail_with(
                    RequestErrorCode::TransactionSubmissionFailed,
                    format!("could not encode fulfillment: {err}"),
                );
                return None;
            }
        };

        if let Err(err) = self.simulate_fulfill(&calldata).await {
            warn!(request_id = ?request.id, error = %err, "fulfillment simulation failed");
            request.fail_with(RequestErrorCode::TransactionSubmissionFailed, err.to_string());
            return self.report_failure(request, FULFILL_FAILED_MESSAGE).await;
        }

        let gas_limit = U256::from(self.ctx.chain.options.fulfillment_gas_limit);
        match self.send(calldata, gas_limit, U256::zero()).await {
            Ok(fulfillment) => {
                info!(request_id = ?request.id, tx_hash = ?fulfillment.transaction_hash, "fulfilled request");
                request.fulfill(fulfillment);
                Some(fulfillment.transaction_hash)
            }
            Err(err) => {
                warn!(request_id = ?request.id, error = %err, "fulfill transaction was not accepted");
                request.fail_with(RequestErrorCode::TransactionSubmissionFailed, err.to_string());
                None
            }
        }
    }

    async fn fulfill_calldata(&self, request: &Request, data: &Bytes) -> Result<Bytes, SubmitError> {
        let hash = fulfillment_hash(request.id, data)?;
        let signature = self
            .ctx
            .wallets
            .node_wallet()
            .sign_message(hash.as_bytes())
            .await
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        Ok(self
            .ctx
            .contract
            .encode_fulfill(request, data, &signature.to_vec())?)
    }

    async fn simulate_fulfill(&self, calldata: &Bytes) -> Result<(), SubmitError> {
        let ctx = self.ctx;
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.signer.address())
            .to(ctx.contract.address())
            .data(calldata.clone())
            .gas(ctx.chain.options.fulfillment_gas_limit)
            .into();
        let output = retry::retry(
            &ctx.read_policy,
            Some(ctx.deadline),
            ChainError::is_transient,
            || ctx.client.call(&tx),
        )
        .await?;
        let (success, _) = ctx.contract.decode_fulfill(&output)?;
        if !success {
            return Err(SubmitError::Simulation("fulfill function call reverted".into()));
        }
        Ok(())
    }

    /// Sends `fail` for an errored request and records the transaction on it.
    async fn report_failure(&mut self, request: &mut Request, message: &str) -> Option<H256> {
        let calldata = match self.ctx.contract.encode_fail(request, message) {
            Ok(calldata) => calldata,
            Err(err) => {
                warn!(request_id = ?request.id, error = %err, "could not encode fail transaction");
                return None;
            }
        };
        let gas_limit = U256::from(self.ctx.chain.options.fulfillment_gas_limit);
        match self.send(calldata, gas_limit, U256::zero()).await {
            Ok(report) => {
                info!(
                    request_id = ?request.id,
                    tx_hash = ?report.transaction_hash,
                    error_code = request.error_code_value(),
                    "reported failed request"
                );
                request.record_failure_report(report);
                Some(report.transaction_hash)
            }
            Err(err) => {
                warn!(request_id = ?request.id, error = %err, "fail transaction was not accepted");
                None
            }
        }
    }

    async fn withdraw(&mut self, request: &mut Request) -> Option<H256> {
        match self.send_withdrawal(request).await {
            Ok(fulfillment) => {
                info!(request_id = ?request.id, tx_hash = ?fulfillment.transaction_hash, "fulfilled withdrawal");
                request.fulfill(fulfillment);
                Some(fulfillment.transaction_hash)
            }
            Err(err) => {
                warn!(request_id = ?request.id, error = %err, "withdrawal not sent");
                request.fail_with(RequestErrorCode::TransactionSubmissionFailed, err.to_string());
                None
            }
        }
    }

    async fn send_withdrawal(&mut self, request: &Request) -> Result<Fulfillment, SubmitError> {
        let ctx = self.ctx;
        let calldata = ctx.contract.encode_fulfill_withdrawal(request)?;
        let wallet = request.sponsor_wallet_address;
        let balance = retry::go(&ctx.read_policy, Some(ctx.deadline), || ctx.client.balance(wallet)).await?;

        let estimate: TypedTransaction = TransactionRequest::new()
            .from(self.signer.address())
            .to(ctx.contract.address())
            .data(calldata.clone())
            .value(U256::one())
            .into();
        let gas_limit = retry::go(&ctx.read_policy, Some(ctx.deadline), || {
            ctx.client.estimate_gas(&estimate)
        })
        .await?;

        let cost = gas_limit
            .saturating_mul(self.gas_price)
            .saturating_add(ctx.chain.options.withdrawal_remainder);
        if balance <= cost {
            return Err(SubmitError::InsufficientBalance { balance, cost });
        }
        self.send(calldata, gas_limit, balance - cost).await
    }

    async fn send(&mut self, calldata: Bytes, gas_limit: U256, value: U256) -> Result<Fulfillment, SubmitError> {
        let ctx = self.ctx;
        let nonce = self.nonce;
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.signer.address())
            .to(ctx.contract.address())
            .data(calldata)
            .value(value)
            .nonce(nonce)
            .gas(gas_limit)
            .gas_price(self.gas_price)
            .chain_id(ctx.chain.id)
            .into();
        let transaction_hash = ctx.client.send_transaction(tx, &self.signer).await?;
        self.nonce = nonce + 1;
        Ok(Fulfillment {
            transaction_hash,
            nonce,
        })
    }
}
