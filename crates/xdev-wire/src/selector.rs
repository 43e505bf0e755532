//! Host selection order and the failover connect loop.

use rand::seq::SliceRandom;

use crate::endpoint::{Endpoint, EndpointList};
use crate::error::WireError;
use crate::link::{Connector, Link};

/// Literal message of the composite connect failure; asserted by callers.
pub const NO_SOURCES_MSG: &str = "Could not connect to any of the given data sources";

/// Compute the connection-attempt order for one connection request.
///
/// Endpoints are stable-sorted descending by priority (endpoints without an
/// explicit priority all rank equal). Runs of equal priority are permuted
/// uniformly at random, and the permutation is redrawn on every call so that
/// repeated failures do not retry endpoints in a fixed losing order.
#[must_use]
pub fn selection_order(list: &EndpointList) -> Vec<Endpoint> {
    let mut order = list.endpoints().to_vec();
    order.sort_by(|a, b| {
        b.priority()
            .unwrap_or(0)
            .cmp(&a.priority().unwrap_or(0))
    });

    let mut rng = rand::thread_rng();
    let mut start = 0;
    while start < order.len() {
        let priority = order[start].priority();
        let mut end = start + 1;
        while end < order.len() && order[end].priority() == priority {
            end += 1;
        }
        order[start..end].shuffle(&mut rng);
        start = end;
    }
    order
}

/// Attempt to connect to the endpoints of `list` in selection order.
///
/// Each failed attempt is recorded and the next endpoint is tried. When the
/// whole order is exhausted, a single-endpoint list surfaces the underlying
/// failure directly; a multi-host list fails with a composite error whose
/// message contains [`NO_SOURCES_MSG`].
pub async fn connect_any(
    connector: &dyn Connector,
    list: &EndpointList,
) -> Result<Box<dyn Link>, WireError> {
    let order = selection_order(list);
    let mut failures: Vec<(Endpoint, WireError)> = Vec::new();

    for endpoint in order {
        match connector.dial(&endpoint).await {
            Ok(link) => {
                tracing::debug!(endpoint = %endpoint, "connected");
                return Ok(link);
            }
            Err(err) => {
                tracing::debug!(endpoint = %endpoint, error = %err, "connect attempt failed");
                failures.push((endpoint, err));
            }
        }
    }

    if failures.len() == 1 {
        let (_, err) = failures.remove(0);
        Err(err)
    } else {
        let detail = failures
            .iter()
            .map(|(ep, err)| format!("{ep}: {err}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(WireError::AllEndpointsFailed { detail })
    }
}
