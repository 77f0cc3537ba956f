use std::sync::Arc;

use super::latency::ProbeResult;
use crate::models::Endpoint;

/// Usable results, fastest first, at most `max` of them
pub fn rank(results: &[ProbeResult], max: usize) -> Vec<ProbeResult> {
    let mut usable: Vec<(u64, &ProbeResult)> = results
        .iter()
        .filter_map(|r| r.latency.usable_millis().map(|ms| (ms, r)))
        .collect();

    // stable, so equal latencies keep probe order
    usable.sort_by_key(|(ms, _)| *ms);
    usable.truncate(max);

    usable.into_iter().map(|(_, r)| r.clone()).collect()
}

/// Pick the endpoints that will serve traffic
pub fn select_best(results: &[ProbeResult], max: usize) -> Vec<Arc<Endpoint>> {
    rank(results, max)
        .into_iter()
        .map(|r| r.endpoint)
        .collect()
}
