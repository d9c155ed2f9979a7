//! Groups identical pending API calls so each distinct call is made once.

use std::collections::{BTreeMap, HashMap};

use ethers::types::H256;
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::models::{AggregatedApiCall, Request, RequestErrorCode};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    /// Calls keyed by their synthetic id.
    pub calls: BTreeMap<String, AggregatedApiCall>,
    /// Which call answers each request.
    pub request_calls: HashMap<H256, String>,
}

impl Aggregation {
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn call_for(&self, request_id: &H256) -> Option<&AggregatedApiCall> {
        self.calls.get(self.request_calls.get(request_id)?)
    }

    /// Drops requests that stopped being pending since aggregation, and calls
    /// left without any pending request.
    pub fn prune(&mut self, requests: &[Request]) {
        let pending: HashMap<H256, bool> = requests
            .iter()
            .map(|r| (r.id, r.is_pending_api_call()))
            .collect();
        let still_pending = |id: &H256| pending.get(id).copied().unwrap_or(false);

        self.request_calls.retain(|id, _| still_pending(id));
        for call in self.calls.values_mut() {
            call.request_ids.retain(|id| still_pending(id));
        }
        self.calls.retain(|_, call| !call.request_ids.is_empty());
    }

    /// Fans every call result out to the requests it stands for. Calls without
    /// a result leave their requests untouched.
    pub fn apply_responses(&self, requests: &mut [Request]) {
        for request in requests.iter_mut().filter(|r| r.is_pending_api_call()) {
            let Some(result) = self.call_for(&request.id).and_then(|call| call.result.as_ref()) else {
                continue;
            };
            match result {
                Ok(data) => request.response = Some(data.clone()),
                Err(error) => {
                    request.fail_with(error.code, error.message.clone());
                }
            }
        }
    }
}

/// Groups pending API calls by `(endpoint id, parameters, OIS title)`.
/// Requests for endpoint ids without a trigger are ignored.
pub fn aggregate(requests: &mut [Request], config: &Config) -> Aggregation {
    let mut aggregation = Aggregation::default();
    let mut by_key: HashMap<(H256, BTreeMap<String, String>, String), String> = HashMap::new();

    for request in requests.iter_mut().filter(|r| r.is_pending_api_call()) {
        let Some(endpoint_id) = request.endpoint_id else {
            request.fail_with(RequestErrorCode::UnknownEndpointId, "request has no endpoint id");
            continue;
        };
        let Some(trigger) = config.trigger(&endpoint_id) else {
            request.fail_with(
                RequestErrorCode::UnknownEndpointId,
                format!("no trigger for endpoint {endpoint_id:?}"),
            );
            continue;
        };

        let key = (
            endpoint_id,
            request.decoded_parameters.clone(),
            trigger.ois_title.clone(),
        );
        let call_id = by_key
            .entry(key)
            .or_insert_with(|| {
                let id = Uuid::new_v4().to_string();
                aggregation.calls.insert(
                    id.clone(),
                    AggregatedApiCall {
                        id: id.clone(),
                        endpoint_id,
                        endpoint_name: trigger.endpoint_name.clone(),
                        ois_title: trigger.ois_title.clone(),
                        parameters: request.decoded_parameters.clone(),
                        request_ids: Vec::new(),
                        result: None,
                    },
                );
                id
            })
            .clone();

        if let Some(call) = aggregation.calls.get_mut(&call_id) {
            call.request_ids.push(request.id);
        }
        aggregation.request_calls.insert(request.id, call_id);
    }

    debug!(
        requests = aggregation.request_calls.len(),
        calls = aggregation.calls.len(),
        "aggregated api calls"
    );
    aggregation
}
