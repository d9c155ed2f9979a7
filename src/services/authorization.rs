//! Asks the authorizer contracts whether requesters may call endpoints.

use std::collections::{HashMap, HashSet};

use ethers::types::{Address, H256};
use futures_util::future::join_all;
use tracing::{info, warn};

use super::ProviderContext;
use crate::chain::{read_call, ChainError};
use crate::models::{Request, RequestErrorCode};
use crate::retry::{self, RetryError};

/// `(endpoint id, requester) -> authorized`, for this run.
pub type AuthorizationStatuses = HashMap<(H256, Address), bool>;

/// One authorization check: the first request seen for an
/// `(endpoint id, requester)` pair stands in for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Query {
    request_id: H256,
    endpoint_id: H256,
    sponsor: Address,
    requester: Address,
}

/// Checks every distinct `(endpoint id, requester)` of the pending API calls.
/// Pairs in a batch that failed are left out of the result.
pub async fn check_authorizations(
    ctx: &ProviderContext<'_>,
    requests: &[Request],
) -> AuthorizationStatuses {
    let queries = distinct_queries(requests);

    if ctx.chain.authorizers.is_empty() {
        return queries
            .iter()
            .map(|q| ((q.endpoint_id, q.requester), true))
            .collect();
    }

    let batch_size = ctx.chain.options.authorization_batch_size.max(1);
    let batches: Vec<&[Query]> = queries.chunks(batch_size).collect();
    let results = join_all(batches.iter().map(|batch| check_batch(ctx, batch))).await;

    let mut statuses = AuthorizationStatuses::new();
    for (batch, result) in batches.iter().zip(results) {
        match result {
            Ok(authorized) => statuses.extend(
                batch
                    .iter()
                    .zip(authorized)
                    .map(|(q, ok)| ((q.endpoint_id, q.requester), ok)),
            ),
            Err(err) => warn!(
                chain_id = ctx.chain.id,
                provider = ctx.provider_name,
                pairs = batch.len(),
                error = %err,
                "authorization batch failed"
            ),
        }
    }
    statuses
}

/// One query per distinct `(endpoint id, requester)` among pending API calls,
/// in request order.
fn distinct_queries(requests: &[Request]) -> Vec<Query> {
    let mut seen: HashSet<(H256, Address)> = HashSet::new();
    let mut queries: Vec<Query> = Vec::new();
    for request in requests.iter().filter(|r| r.is_pending_api_call()) {
        let Some(endpoint_id) = request.endpoint_id else {
            continue;
        };
        if seen.insert((endpoint_id, request.requester_address)) {
            queries.push(Query {
                request_id: request.id,
                endpoint_id,
                sponsor: request.sponsor_address,
                requester: request.requester_address,
            });
        }
    }
    queries
}

async fn check_batch(ctx: &ProviderContext<'_>, batch: &[Query]) -> Result<Vec<bool>, RetryError<ChainError>> {
    let rows: Vec<_> = batch
        .iter()
        .map(|q| (q.request_id, q.endpoint_id, q.sponsor, q.requester))
        .collect();
    let data = ctx
        .contract
        .encode_check_authorization_statuses(&ctx.chain.authorizers, ctx.airnode(), &rows)
        .map_err(|error| RetryError::Failed { attempts: 0, error })?;
    let tx = read_call(ctx.contract.address(), data);

    retry::go(&ctx.read_policy, Some(ctx.deadline), || async {
        let output = ctx.client.call(&tx).await?;
        let statuses = ctx.contract.decode_check_authorization_statuses(&output)?;
        if statuses.len() != batch.len() {
            return Err(ChainError::Abi(format!(
                "expected {} authorization statuses, got {}",
                batch.len(),
                statuses.len()
            )));
        }
        Ok(statuses)
    })
    .await
}

/// Ignores pending API calls without a positive authorization entry.
pub fn apply_authorizations(requests: &mut [Request], statuses: &AuthorizationStatuses) -> usize {
    let mut denied = 0;
    for request in requests.iter_mut().filter(|r| r.is_pending_api_call()) {
        let authorized = request
            .endpoint_id
            .and_then(|endpoint_id| statuses.get(&(endpoint_id, request.requester_address)))
            .copied()
            .unwrap_or(false);
        if !authorized {
            request.fail_with(
                RequestErrorCode::AuthorizationDenied,
                format!(
                    "requester {:?} is not authorized for endpoint {:?}",
                    request.requester_address, request.endpoint_id
                ),
            );
            denied += 1;
        }
    }
    if denied > 0 {
        info!(denied, "requests not authorized");
    }
    denied
}
