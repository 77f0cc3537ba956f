//! Concurrent latency probing through the engine's test inbound
//!
//! Every endpoint gets its own task. A probe request carries the endpoint's
//! `source` header, which the routing rules use to send it through that
//! endpoint's test outbound.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::config::XrayConfig;
use crate::engine::routing::source_attr;
use crate::engine::TEST_TAG_PREFIX;
use crate::error::{HelperError, Result};
use crate::models::Endpoint;

/// Measures one endpoint
#[async_trait]
pub trait Probe: Send + Sync {
    /// Round-trip time of one successful request through `endpoint`
    async fn probe(&self, endpoint: &Endpoint) -> Result<Duration>;
}

/// Prober configuration
#[derive(Clone, Debug)]
pub struct ProberConfig {
    /// Forward proxy every probe request goes through
    pub proxy_url: String,
    /// URL requested through each endpoint
    pub probe_url: String,
    /// Overall wait for one probe round
    pub deadline: Duration,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            proxy_url: "http://127.0.0.1:10903".to_string(),
            probe_url: "http://www.google.com/ncr".to_string(),
            deadline: Duration::from_secs(20),
        }
    }
}

impl From<&XrayConfig> for ProberConfig {
    fn from(config: &XrayConfig) -> Self {
        Self {
            proxy_url: config.test_proxy_url(),
            probe_url: config.probe_url.clone(),
            deadline: config.probe_deadline(),
        }
    }
}

/// HTTP GET through the engine's test inbound
pub struct HttpProbe {
    client: reqwest::Client,
    probe_url: String,
}

impl HttpProbe {
    pub fn new(config: &ProberConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(&config.proxy_url)?)
            .timeout(config.deadline)
            .build()?;

        Ok(Self {
            client,
            probe_url: config.probe_url.clone(),
        })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, endpoint: &Endpoint) -> Result<Duration> {
        let tag = endpoint.tag(TEST_TAG_PREFIX);

        let started = Instant::now();
        let response = self
            .client
            .get(&self.probe_url)
            .header("source", source_attr(&tag))
            .send()
            .await?;
        let elapsed = started.elapsed();

        let status = response.status();
        if !(200..=399).contains(&status.as_u16()) {
            return Err(HelperError::Network(format!(
                "{} answered with status {}",
                tag, status
            )));
        }

        Ok(elapsed)
    }
}

/// Outcome of probing one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latency {
    Millis(u64),
    Failed,
}

impl Latency {
    /// Latency usable for ranking; zero counts as unusable
    pub fn usable_millis(&self) -> Option<u64> {
        match self {
            Latency::Millis(ms) if *ms > 0 => Some(*ms),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub endpoint: Arc<Endpoint>,
    pub latency: Latency,
}

/// Runs one probe round over a set of endpoints
pub struct LatencyProber {
    probe: Arc<dyn Probe>,
    deadline: Duration,
}

impl LatencyProber {
    pub fn new(probe: Arc<dyn Probe>, deadline: Duration) -> Self {
        Self { probe, deadline }
    }

    /// Probe every endpoint concurrently, results in endpoint order.
    ///
    /// Returns when every probe reported or the deadline passed. Probes still
    /// running at the deadline are detached and count as failed.
    #[instrument(skip_all, fields(endpoints = endpoints.len()))]
    pub async fn probe_all(&self, endpoints: &[Arc<Endpoint>]) -> Vec<ProbeResult> {
        let mut latencies = vec![Latency::Failed; endpoints.len()];
        let mut tasks = JoinSet::new();

        for (index, endpoint) in endpoints.iter().enumerate() {
            let probe = self.probe.clone();
            let endpoint = endpoint.clone();
            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(probe.probe(&endpoint))
                    .catch_unwind()
                    .await;
                (index, outcome)
            });
        }

        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    let (index, outcome) = match joined {
                        Ok(done) => done,
                        Err(e) => {
                            error!("probe task failed: {}", e);
                            continue;
                        }
                    };

                    let name = &endpoints[index].name;
                    match outcome {
                        Ok(Ok(elapsed)) => {
                            let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                            debug!("probe complete, {}: {}ms", name, ms);
                            latencies[index] = Latency::Millis(ms);
                        }
                        Ok(Err(e)) => warn!("probe failed for {}: {}", name, e),
                        Err(_) => error!("probe panicked for {}", name),
                    }
                }
                _ = &mut deadline => {
                    warn!(
                        "probe deadline of {:?} reached, {} probes still running",
                        self.deadline,
                        tasks.len()
                    );
                    tasks.detach_all();
                    break;
                }
            }
        }

        let results: Vec<ProbeResult> = endpoints
            .iter()
            .zip(latencies)
            .map(|(endpoint, latency)| ProbeResult {
                endpoint: endpoint.clone(),
                latency,
            })
            .collect();

        info!(
            "probe round complete: {}/{} endpoints usable",
            results
                .iter()
                .filter(|r| r.latency.usable_millis().is_some())
                .count(),
            results.len()
        );

        results
    }
}
