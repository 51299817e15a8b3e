//! Wire-level counters. A recorder is only installed by the embedding
//! process; without one these are no-ops.

use metrics::counter;

pub(crate) fn record_retry(operation: &str) {
    counter!("msa_client_retries_total", "operation" => operation.to_string()).increment(1);
}

pub(crate) fn record_session_renewal() {
    counter!("msa_client_session_renewals_total").increment(1);
}
