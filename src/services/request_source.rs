//! Discovers the requests a run has to act on.
//!
//! Reads the request-response contract logs addressed to this node over a
//! bounded block window, drops everything already settled on-chain, and maps
//! the rest into pending [`Request`]s. Every request is checked against the
//! content hash the contract committed to before anything is trusted.

use std::collections::{BTreeMap, HashMap, HashSet};

use ethers::types::H256;
use futures_util::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::ProviderContext;
use crate::chain::{read_call, ChainError, LoggedEvent, RequestEvent, RequestKind, RrpEvent, Template};
use crate::codec::decode_parameter_map;
use crate::models::{Request, RequestErrorCode, RequestMetadata, RequestStatus, RequestType};
use crate::retry::{self, RetryError};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read the current block: {0}")]
    BlockNumber(RetryError<ChainError>),
    #[error("failed to fetch logs for blocks {from_block}..={to_block}: {error}")]
    Logs {
        from_block: u64,
        to_block: u64,
        error: RetryError<ChainError>,
    },
}

/// Inclusive block range scanned for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWindow {
    pub from_block: u64,
    pub to_block: u64,
    pub current_block: u64,
}

impl BlockWindow {
    /// `None` when no block in the history limit has enough confirmations.
    pub fn new(current_block: u64, history_limit: u64, min_confirmations: u64) -> Option<Self> {
        let from_block = current_block.saturating_sub(history_limit);
        let to_block = current_block.checked_sub(min_confirmations)?;
        (from_block <= to_block).then_some(Self {
            from_block,
            to_block,
            current_block,
        })
    }
}

/// Fetches, verifies and decodes every unsettled request for this node.
pub async fn fetch_pending_requests(ctx: &ProviderContext<'_>) -> Result<Vec<Request>, SourceError> {
    let current_block = retry::go(&ctx.read_policy, Some(ctx.deadline), || ctx.client.block_number())
        .await
        .map_err(SourceError::BlockNumber)?;
    let options = &ctx.chain.options;
    let Some(window) =
        BlockWindow::new(current_block, options.block_history_limit, options.min_confirmations)
    else {
        debug!(
            current_block,
            min_confirmations = options.min_confirmations,
            history_limit = options.block_history_limit,
            "no confirmed blocks to scan"
        );
        return Ok(Vec::new());
    };

    let filter = ctx
        .contract
        .logs_filter(ctx.airnode(), window.from_block, window.to_block);
    let logs = retry::go(&ctx.read_policy, Some(ctx.deadline), || ctx.client.get_logs(&filter))
        .await
        .map_err(|error| SourceError::Logs {
            from_block: window.from_block,
            to_block: window.to_block,
            error,
        })?;

    let events: Vec<LoggedEvent> = logs
        .iter()
        .filter_map(|log| match ctx.contract.parse_log(log) {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    chain_id = ctx.chain.id,
                    provider = ctx.provider_name,
                    tx_hash = ?log.transaction_hash,
                    error = %err,
                    "skipping malformed log"
                );
                None
            }
        })
        .collect();

    let mut requests = build_requests(ctx, &events, current_block);
    apply_templates(ctx, &mut requests).await;

    info!(
        chain_id = ctx.chain.id,
        provider = ctx.provider_name,
        from_block = window.from_block,
        to_block = window.to_block,
        logs = logs.len(),
        requests = requests.len(),
        pending = requests.iter().filter(|r| r.is_pending()).count(),
        "fetched requests"
    );

    Ok(requests)
}

/// Maps logs into requests, leaving out the ones already fulfilled or failed.
/// The result is ordered by (block, log index).
pub fn build_requests(
    ctx: &ProviderContext<'_>,
    events: &[LoggedEvent],
    current_block: u64,
) -> Vec<Request> {
    let settled: HashSet<H256> = events
        .iter()
        .filter_map(|logged| match &logged.event {
            RrpEvent::RequestFulfilled { request_id } | RrpEvent::RequestFailed { request_id } => {
                Some(*request_id)
            }
            RrpEvent::WithdrawalFulfilled {
                withdrawal_request_id,
            } => Some(*withdrawal_request_id),
            _ => None,
        })
        .collect();

    let mut seen = HashSet::new();
    let mut requests = Vec::new();
    for logged in events {
        let metadata = RequestMetadata {
            block_number: logged.block_number,
            transaction_hash: logged.transaction_hash,
            log_index: logged.log_index,
            current_block,
        };
        let request = match &logged.event {
            RrpEvent::Request(event) => {
                if settled.contains(&event.request_id) || !seen.insert(event.request_id) {
                    continue;
                }
                api_call_request(ctx, event, metadata)
            }
            RrpEvent::WithdrawalRequested(event) => {
                if settled.contains(&event.withdrawal_request_id)
                    || !seen.insert(event.withdrawal_request_id)
                {
                    continue;
                }
                let mut request = Request::withdrawal(
                    event.withdrawal_request_id,
                    event.airnode,
                    event.sponsor,
                    event.sponsor_wallet,
                    ctx.chain.id,
                    metadata,
                );
                verify_sponsor_wallet(ctx, &mut request);
                request
            }
            _ => continue,
        };
        requests.push(request);
    }

    requests.sort_by_key(|r| (r.metadata.block_number, r.metadata.log_index));
    requests
}

fn api_call_request(ctx: &ProviderContext<'_>, event: &RequestEvent, metadata: RequestMetadata) -> Request {
    let (endpoint_id, template_id) = match event.kind {
        RequestKind::Full { endpoint_id } => (Some(endpoint_id), None),
        RequestKind::Template { template_id } => (None, Some(template_id)),
    };
    let mut request = Request {
        id: event.request_id,
        request_type: RequestType::ApiCall,
        status: RequestStatus::Pending,
        error_code: None,
        error_message: None,
        airnode_address: event.airnode,
        endpoint_id,
        template_id,
        encoded_parameters: event.parameters.clone(),
        decoded_parameters: BTreeMap::new(),
        sponsor_address: event.sponsor,
        sponsor_wallet_address: event.sponsor_wallet,
        requester_address: event.requester,
        requester_request_count: event.requester_request_count,
        fulfill_address: event.fulfill_address,
        fulfill_function_id: event.fulfill_function_id,
        chain_id: ctx.chain.id,
        metadata,
        response: None,
        fulfillment: None,
    };

    match event.derive_request_id(ctx.contract.address()) {
        Ok(derived) if derived == event.request_id => {}
        Ok(derived) => {
            warn!(request_id = ?event.request_id, ?derived, "request id does not match its contents");
            request.block(
                RequestErrorCode::VerificationFailed,
                format!("request id does not match its contents (expected {derived:?})"),
                ctx.ignore_after_blocks(),
            );
            return request;
        }
        Err(err) => {
            request.block(
                RequestErrorCode::VerificationFailed,
                format!("could not derive request id: {err}"),
                ctx.ignore_after_blocks(),
            );
            return request;
        }
    }

    verify_sponsor_wallet(ctx, &mut request);
    if !request.is_pending() {
        return request;
    }

    match decode_parameter_map(&event.parameters) {
        Ok(parameters) => request.decoded_parameters = parameters,
        Err(err) => {
            request.fail_with(
                RequestErrorCode::RequestParameterDecodingFailed,
                format!("Failed to decode parameters: {err}"),
            );
        }
    }
    request
}

/// Blocks a request whose sponsor wallet is not the one this node derives
/// for its sponsor.
fn verify_sponsor_wallet(ctx: &ProviderContext<'_>, request: &mut Request) {
    let message = match ctx.wallets.sponsor_wallet(request.sponsor_address) {
        Ok(wallet) if wallet.address == request.sponsor_wallet_address => return,
        Ok(wallet) => format!(
            "sponsor wallet {:?} is not the derived wallet {:?}",
            request.sponsor_wallet_address, wallet.address
        ),
        Err(err) => format!("could not derive sponsor wallet: {err}"),
    };
    warn!(request_id = ?request.id, sponsor = ?request.sponsor_address, "{message}");
    request.block(RequestErrorCode::VerificationFailed, message, ctx.ignore_after_blocks());
}

/// Resolves template requests: fetches their templates in batches, checks
/// them, and merges the template parameters under the request parameters.
pub async fn apply_templates(ctx: &ProviderContext<'_>, requests: &mut [Request]) {
    let mut template_ids: Vec<H256> = requests
        .iter()
        .filter(|r| r.is_pending_api_call() && r.endpoint_id.is_none())
        .filter_map(|r| r.template_id)
        .collect();
    template_ids.sort();
    template_ids.dedup();
    if template_ids.is_empty() {
        return;
    }

    let batch_size = ctx.chain.options.template_batch_size.max(1);
    let batches: Vec<&[H256]> = template_ids.chunks(batch_size).collect();
    let results = join_all(batches.iter().map(|batch| fetch_templates(ctx, batch))).await;

    let mut templates: HashMap<H256, Template> = HashMap::new();
    for (batch, result) in batches.iter().zip(results) {
        match result {
            Ok(fetched) => templates.extend(fetched.into_iter().map(|t| (t.id, t))),
            Err(err) => warn!(
                chain_id = ctx.chain.id,
                provider = ctx.provider_name,
                templates = batch.len(),
                error = %err,
                "failed to fetch templates"
            ),
        }
    }

    for request in requests
        .iter_mut()
        .filter(|r| r.is_pending_api_call() && r.endpoint_id.is_none())
    {
        let Some(template_id) = request.template_id else {
            continue;
        };
        match templates.get(&template_id) {
            Some(template) if template.exists() => apply_template(ctx, request, template),
            Some(_) => {
                request.block(
                    RequestErrorCode::RequesterDataNotFound,
                    format!("template {template_id:?} does not exist"),
                    ctx.ignore_after_blocks(),
                );
            }
            None => {
                request.block(
                    RequestErrorCode::RequesterDataNotFound,
                    format!("template {template_id:?} could not be fetched"),
                    ctx.ignore_after_blocks(),
                );
            }
        }
    }
}

fn apply_template(ctx: &ProviderContext<'_>, request: &mut Request, template: &Template) {
    let consistent = template.is_consistent().unwrap_or(false);
    if !consistent || template.airnode != request.airnode_address {
        request.block(
            RequestErrorCode::VerificationFailed,
            format!("template {:?} does not match its contents", template.id),
            ctx.ignore_after_blocks(),
        );
        return;
    }

    match decode_parameter_map(&template.parameters) {
        Ok(mut parameters) => {
            // Request parameters override template parameters.
            parameters.extend(std::mem::take(&mut request.decoded_parameters));
            request.decoded_parameters = parameters;
            request.endpoint_id = Some(template.endpoint_id);
            debug!(request_id = ?request.id, template_id = ?template.id, "applied template");
        }
        Err(err) => {
            request.fail_with(
                RequestErrorCode::RequestParameterDecodingFailed,
                format!("Failed to decode template parameters: {err}"),
            );
        }
    }
}

async fn fetch_templates(
    ctx: &ProviderContext<'_>,
    template_ids: &[H256],
) -> Result<Vec<Template>, RetryError<ChainError>> {
    let data = ctx
        .contract
        .encode_get_templates(template_ids)
        .map_err(|error| RetryError::Failed { attempts: 0, error })?;
    let tx = read_call(ctx.contract.address(), data);
    retry::go(&ctx.read_policy, Some(ctx.deadline), || async {
        let output = ctx.client.call(&tx).await?;
        ctx.contract.decode_get_templates(template_ids, &output)
    })
    .await
}
