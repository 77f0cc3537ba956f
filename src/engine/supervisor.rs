//! Engine lifecycle
//!
//! The supervisor owns the engine process and the endpoint working set and
//! drives the subscribe, configure, probe, select and run pipeline. Every
//! public operation has its own guard: a call made while the same operation
//! is already running returns `Ok(())` immediately without doing anything.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::fragments::ConfigWriter;
use super::process::EngineProcess;
use super::routing::RoutingRuleSynchronizer;
use crate::config::{Config, XrayConfig};
use crate::error::Result;
use crate::models::Endpoint;
use crate::probe::{rank, HttpProbe, LatencyProber, Probe, ProbeResult, ProberConfig};
use crate::subscription::{fetch_with_retry, parse_lines};

/// Lifecycle state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    #[default]
    Stopped,
    Starting,
    Running,
    Restarting,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Stopped => "stopped",
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running",
            SupervisorState::Restarting => "restarting",
        }
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Supervises one engine process
pub struct Supervisor {
    config: RwLock<XrayConfig>,
    config_path: PathBuf,
    /// Fixed probe; when unset an [`HttpProbe`] is built from the config per round
    probe: Option<Arc<dyn Probe>>,
    state: RwLock<SupervisorState>,
    endpoints: RwLock<Vec<Arc<Endpoint>>>,
    last_results: RwLock<Vec<ProbeResult>>,
    selection: RwLock<Vec<ProbeResult>>,
    process: Mutex<Option<EngineProcess>>,
    start_guard: Mutex<()>,
    test_guard: Mutex<()>,
    kill_guard: Mutex<()>,
    restart_guard: Mutex<()>,
}

impl Supervisor {
    /// `config_path` is re-read by [`Supervisor::restart`] with reinit
    pub fn new(config: XrayConfig, config_path: PathBuf) -> Arc<Self> {
        Self::build(config, config_path, None)
    }

    /// Supervisor measuring endpoints with `probe`
    pub fn with_probe(
        config: XrayConfig,
        config_path: PathBuf,
        probe: Arc<dyn Probe>,
    ) -> Arc<Self> {
        Self::build(config, config_path, Some(probe))
    }

    fn build(
        config: XrayConfig,
        config_path: PathBuf,
        probe: Option<Arc<dyn Probe>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(config),
            config_path,
            probe,
            state: RwLock::new(SupervisorState::Stopped),
            endpoints: RwLock::new(Vec::new()),
            last_results: RwLock::new(Vec::new()),
            selection: RwLock::new(Vec::new()),
            process: Mutex::new(None),
            start_guard: Mutex::new(()),
            test_guard: Mutex::new(()),
            kill_guard: Mutex::new(()),
            restart_guard: Mutex::new(()),
        })
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.read()
    }

    pub fn config(&self) -> XrayConfig {
        self.config.read().clone()
    }

    /// Endpoints of the current subscribe cycle
    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.read().clone()
    }

    /// Results of the last probe round
    pub fn last_results(&self) -> Vec<ProbeResult> {
        self.last_results.read().clone()
    }

    /// Endpoints currently written as balancer members, fastest first
    pub fn selection(&self) -> Vec<ProbeResult> {
        self.selection.read().clone()
    }

    /// Pid of the engine, if one is running
    pub async fn engine_pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(|p| p.pid())
    }

    fn set_state(&self, state: SupervisorState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!("supervisor state {} -> {}", previous, state);
        }
    }

    fn writer(&self) -> ConfigWriter {
        ConfigWriter::new(&self.config.read())
    }

    /// Configure, spawn, probe, then reload with the selection.
    ///
    /// A probe failure is logged and leaves the engine running without a
    /// selection.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let Ok(_guard) = self.start_guard.try_lock() else {
            debug!("start already in progress");
            return Ok(());
        };

        self.set_state(SupervisorState::Starting);
        if let Err(e) = self.bring_up().await {
            self.set_state(SupervisorState::Stopped);
            return Err(e);
        }
        self.set_state(SupervisorState::Running);

        if let Err(e) = self.test_all().await {
            error!("probing endpoints failed: {}", e);
            return Ok(());
        }
        self.restart(false).await
    }

    /// Restart the engine.
    ///
    /// With `with_init` the application configuration is reloaded and the
    /// whole start sequence runs again before the final respawn.
    #[instrument(skip(self))]
    pub async fn restart(&self, with_init: bool) -> Result<()> {
        let Ok(_guard) = self.restart_guard.try_lock() else {
            debug!("restart already in progress");
            return Ok(());
        };
        // the reinit phase repeats start, so it shares start's guard
        let _start = if with_init {
            let Ok(guard) = self.start_guard.try_lock() else {
                debug!("start in progress, skipping reinit restart");
                return Ok(());
            };
            Some(guard)
        } else {
            None
        };

        info!("restarting engine (reinit: {})", with_init);
        self.set_state(SupervisorState::Restarting);

        let result = self.restart_phases(with_init).await;
        match &result {
            Ok(()) => self.set_state(SupervisorState::Running),
            Err(_) => self.set_state(SupervisorState::Stopped),
        }
        result
    }

    async fn restart_phases(&self, with_init: bool) -> Result<()> {
        if with_init {
            self.stop_engine().await;

            let reloaded = Config::load(&self.config_path)?;
            *self.config.write() = reloaded.xray_config;
            info!("configuration reloaded from {}", self.config_path.display());

            self.bring_up().await?;
            self.test_all().await?;
        }

        self.stop_engine().await;
        self.spawn_engine().await
    }

    /// Probe every known endpoint and write the fastest as proxy outbounds.
    ///
    /// The engine keeps its current configuration until the next restart.
    #[instrument(skip(self))]
    pub async fn test_all(&self) -> Result<()> {
        let Ok(_guard) = self.test_guard.try_lock() else {
            debug!("probe round already in progress");
            return Ok(());
        };

        let config = self.config();
        let probe: Arc<dyn Probe> = match &self.probe {
            Some(probe) => probe.clone(),
            None => Arc::new(HttpProbe::new(&ProberConfig::from(&config))?),
        };
        let prober = LatencyProber::new(probe, config.probe_deadline());

        let endpoints = self.endpoints();
        let results = prober.probe_all(&endpoints).await;
        let selected = rank(&results, config.select_max);

        let writer = self.writer();
        writer.clear_proxy_outbounds().await?;
        for result in &selected {
            if let Err(e) = writer.write_proxy_outbound(&result.endpoint).await {
                error!(
                    "failed to write proxy outbound for {}: {}",
                    result.endpoint.name, e
                );
            }
        }

        info!(
            "selected {} of {} endpoints: [{}]",
            selected.len(),
            endpoints.len(),
            selected
                .iter()
                .map(|r| r.endpoint.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        *self.last_results.write() = results;
        *self.selection.write() = selected;
        Ok(())
    }

    /// Stop the engine if it is running
    pub async fn kill(&self) -> Result<()> {
        if self.stop_engine().await {
            self.set_state(SupervisorState::Stopped);
        }
        Ok(())
    }

    /// Terminate the owned process; false when another kill was in progress
    async fn stop_engine(&self) -> bool {
        let Ok(_guard) = self.kill_guard.try_lock() else {
            debug!("kill already in progress");
            return false;
        };

        let process = self.process.lock().await.take();
        if let Some(process) = process {
            if let Err(e) = process.terminate().await {
                error!("failed to stop engine: {}", e);
            }
        }
        true
    }

    /// Fetch and parse the subscription into the working set.
    ///
    /// Without a subscription URL the working set becomes empty.
    #[instrument(skip(self))]
    pub async fn subscribe(&self) -> Result<Vec<Arc<Endpoint>>> {
        let config = self.config();

        let endpoints: Vec<Arc<Endpoint>> = if config.subscribe_url.trim().is_empty() {
            warn!("no subscription url configured");
            Vec::new()
        } else {
            let proxy = config.subscribe_proxy_url();
            let text = fetch_with_retry(
                &config.subscribe_url,
                proxy.as_deref(),
                config.subscribe_retry_num,
            )
            .await?;
            parse_lines(&text)?.into_iter().map(Arc::new).collect()
        };

        info!("subscription yielded {} endpoints", endpoints.len());
        *self.endpoints.write() = endpoints.clone();
        Ok(endpoints)
    }

    /// Write every fragment for a fresh subscription and spawn the engine
    async fn bring_up(&self) -> Result<()> {
        let writer = self.writer();
        writer.write_base_fragments().await?;

        let endpoints = self.subscribe().await?;

        writer.clear_test_outbounds().await?;
        writer.clear_proxy_outbounds().await?;
        for endpoint in &endpoints {
            writer.write_test_outbound(endpoint).await?;
        }
        RoutingRuleSynchronizer::new(writer).sync(&endpoints).await?;

        self.spawn_engine().await
    }

    /// Spawn against the on-disk configuration, replacing any running engine.
    ///
    /// The process slot stays locked from terminating the previous engine
    /// until the new one is stored, so at most one engine is ever alive.
    async fn spawn_engine(&self) -> Result<()> {
        let config = self.config();
        let mut slot = self.process.lock().await;

        if let Some(stale) = slot.take() {
            warn!("replacing engine that was still running");
            if let Err(e) = stale.terminate().await {
                error!("failed to stop previous engine: {}", e);
            }
        }

        let process = EngineProcess::spawn(&config).await?;
        info!("engine running (pid {:?})", process.pid());
        *slot = Some(process);
        Ok(())
    }

    /// Periodic refresh: probe again, then reload the engine
    pub async fn refresh(&self) -> Result<()> {
        self.test_all().await?;
        self.restart(false).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::engine::{read_file, ROUTE_FILE};
    use crate::error::HelperError;
    use crate::probe::latency::tests::table;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn fake_engine(dir: &Path, body: &str) {
        let path = dir.join("xray");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Install an engine that appends its pid to `pids` before sleeping
    fn recording_engine(dir: &Path) -> PathBuf {
        let pids = dir.join("pids");
        fake_engine(dir, &format!("echo $$ >> {}\nexec sleep 30", pids.display()));
        pids
    }

    fn spawned_pids(pids: &Path) -> Vec<u32> {
        std::fs::read_to_string(pids)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect()
    }

    fn is_alive(pid: u32) -> bool {
        std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Answers every endpoint after `delay`, counting calls
    struct CountingProbe {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingProbe {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Probe for CountingProbe {
        async fn probe(&self, _endpoint: &Endpoint) -> Result<Duration> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Duration::from_millis(10))
        }
    }

    fn vmess_line(name: &str) -> String {
        let json = serde_json::json!({
            "ps": name, "add": "node.example", "port": "443",
            "id": "b831381d-6324-4d53-ad4f-8cda48b30811", "net": "ws", "path": "/v"
        });
        format!("vmess://{}", STANDARD.encode(json.to_string()))
    }

    /// Serve a subscription with the given endpoint names
    async fn subscription(names: &[&str]) -> String {
        let lines: Vec<String> = names.iter().map(|n| vmess_line(n)).collect();
        let body = STANDARD.encode(lines.join("\n"));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}/sub", addr)
    }

    struct Fixture {
        dir: TempDir,
        config: XrayConfig,
    }

    impl Fixture {
        fn new(engine: &str) -> Self {
            let dir = tempdir().unwrap();
            fake_engine(dir.path(), engine);
            let mut config = XrayConfig {
                xray_exe_dir: dir.path().to_string_lossy().into_owned(),
                xray_config_dir: dir.path().join("conf").to_string_lossy().into_owned(),
                log_dir: dir.path().join("logs").to_string_lossy().into_owned(),
                start_grace_millis: 100,
                ..Default::default()
            };
            config.apply_defaults();
            Self { dir, config }
        }

        fn conf_dir(&self) -> PathBuf {
            self.dir.path().join("conf")
        }

        fn files_with_prefix(&self, prefix: &str) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(self.conf_dir())
                .unwrap()
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|n| n.starts_with(prefix))
                .collect();
            names.sort();
            names
        }
    }

    #[tokio::test]
    async fn test_start_pipeline() {
        let mut fixture = Fixture::new("exec sleep 30");
        fixture.config.subscribe_url = subscription(&["slow", "fast", "dead"]).await;
        let supervisor = Supervisor::with_probe(
            fixture.config.clone(),
            fixture.dir.path().join("helper.yaml"),
            table(&[("slow", 120), ("fast", 45)]),
        );

        supervisor.start().await.unwrap();

        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert!(supervisor.engine_pid().await.is_some());
        assert_eq!(supervisor.endpoints().len(), 3);

        let selected: Vec<_> = supervisor
            .selection()
            .iter()
            .map(|r| r.endpoint.name.clone())
            .collect();
        assert_eq!(selected, vec!["fast", "slow"]);

        assert_eq!(fixture.files_with_prefix("009_test_").len(), 3);
        assert_eq!(
            fixture.files_with_prefix("009_proxy_"),
            vec![
                "009_proxy_proxy_-fast_tail.json",
                "009_proxy_proxy_-slow_tail.json"
            ]
        );

        let routing = read_file(fixture.conf_dir().join(ROUTE_FILE)).await.unwrap();
        assert_eq!(routing.matches("\"outboundTag\": \"test_-").count(), 3);

        supervisor.kill().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(supervisor.engine_pid().await.is_none());
    }

    #[tokio::test]
    async fn test_start_without_subscription() {
        let fixture = Fixture::new("exec sleep 30");
        let supervisor = Supervisor::with_probe(
            fixture.config.clone(),
            fixture.dir.path().join("helper.yaml"),
            table(&[]),
        );

        supervisor.start().await.unwrap();

        assert!(supervisor.endpoints().is_empty());
        assert!(supervisor.selection().is_empty());
        assert!(fixture.conf_dir().join("001api.json").exists());
        supervisor.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_engine_exiting_is_start_failure() {
        let fixture = Fixture::new("exit 3");
        let supervisor = Supervisor::with_probe(
            fixture.config.clone(),
            fixture.dir.path().join("helper.yaml"),
            table(&[]),
        );

        let err = supervisor.start().await.unwrap_err();

        assert!(matches!(err, HelperError::StartFailure(_)));
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_concurrent_operations_run_once() {
        let mut fixture = Fixture::new("");
        let pids = recording_engine(fixture.dir.path());
        fixture.config.subscribe_url = subscription(&["a", "b"]).await;
        let probe = CountingProbe::new(Duration::from_millis(200));
        let supervisor = Supervisor::with_probe(
            fixture.config.clone(),
            fixture.dir.path().join("helper.yaml"),
            probe.clone(),
        );

        let (first, second) = tokio::join!(supervisor.start(), supervisor.start());
        assert!(first.is_ok() && second.is_ok());
        assert_eq!(supervisor.state(), SupervisorState::Running);
        // one start: initial spawn, one round over both endpoints, reload spawn
        assert_eq!(spawned_pids(&pids).len(), 2);
        assert_eq!(probe.calls(), 2);

        let (a, b) = tokio::join!(supervisor.test_all(), supervisor.test_all());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(probe.calls(), 4);

        let (k1, k2) = tokio::join!(supervisor.kill(), supervisor.kill());
        assert!(k1.is_ok() && k2.is_ok());
        assert!(supervisor.engine_pid().await.is_none());
        assert!(spawned_pids(&pids).into_iter().all(|pid| !is_alive(pid)));
    }

    #[tokio::test]
    async fn test_refresh_during_start_keeps_one_engine() {
        let mut fixture = Fixture::new("");
        let pids = recording_engine(fixture.dir.path());
        fixture.config.start_grace_millis = 1000;
        let supervisor = Supervisor::with_probe(
            fixture.config.clone(),
            fixture.dir.path().join("helper.yaml"),
            table(&[]),
        );

        let (started, refreshed) = tokio::join!(supervisor.start(), async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            supervisor.refresh().await
        });
        assert!(started.is_ok() && refreshed.is_ok());

        let spawned = spawned_pids(&pids);
        let alive: Vec<u32> = spawned.iter().copied().filter(|pid| is_alive(*pid)).collect();
        assert_eq!(alive.len(), 1, "spawned {:?}, alive {:?}", spawned, alive);
        assert_eq!(supervisor.engine_pid().await, alive.first().copied());

        supervisor.kill().await.unwrap();
        assert!(!is_alive(alive[0]));
    }

    #[tokio::test]
    async fn test_reinit_restart_skipped_while_starting() {
        let mut fixture = Fixture::new("");
        let pids = recording_engine(fixture.dir.path());
        fixture.config.start_grace_millis = 500;
        let supervisor = Supervisor::with_probe(
            fixture.config.clone(),
            fixture.dir.path().join("missing.yaml"),
            table(&[]),
        );

        let (started, restarted) = tokio::join!(supervisor.start(), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            supervisor.restart(true).await
        });
        assert!(started.is_ok() && restarted.is_ok());

        // only start's own two spawns; the config file was never created
        assert_eq!(spawned_pids(&pids).len(), 2);
        assert!(!fixture.dir.path().join("missing.yaml").exists());
        supervisor.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_test_all_guard_skips_second_round() {
        let mut fixture = Fixture::new("exec sleep 30");
        fixture.config.probe_deadline_secs = 1;
        let supervisor = Supervisor::with_probe(
            fixture.config.clone(),
            fixture.dir.path().join("helper.yaml"),
            table(&[("hang", u64::MAX - 1)]),
        );
        std::fs::create_dir_all(fixture.conf_dir()).unwrap();
        *supervisor.endpoints.write() = vec![Arc::new(Endpoint {
            name: "hang".to_string(),
            ..Default::default()
        })];

        let started = std::time::Instant::now();
        let (a, b) = tokio::join!(supervisor.test_all(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            supervisor.test_all().await
        });

        assert!(a.is_ok() && b.is_ok());
        // the second call returned at once, the first waited for the deadline
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(supervisor.last_results().len(), 1);
        assert!(supervisor.selection().is_empty());
    }

    #[tokio::test]
    async fn test_restart_with_reinit_reloads_config() {
        let fixture = Fixture::new("exec sleep 30");
        let config_path = fixture.dir.path().join("helper.yaml");
        let yaml = format!(
            "xrayConfig:\n  xrayExeDir: {}\n  xrayConfigDir: {}\n  logDir: {}\n  startGraceMillis: 100\n  selectMax: 1\n",
            fixture.config.xray_exe_dir, fixture.config.xray_config_dir, fixture.config.log_dir
        );
        std::fs::write(&config_path, yaml).unwrap();

        let supervisor = Supervisor::with_probe(fixture.config.clone(), config_path, table(&[]));
        supervisor.start().await.unwrap();
        assert_eq!(supervisor.config().select_max, 5);

        supervisor.restart(true).await.unwrap();

        assert_eq!(supervisor.config().select_max, 1);
        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert!(supervisor.engine_pid().await.is_some());
        supervisor.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_subscription_aborts_start() {
        let mut fixture = Fixture::new("exec sleep 30");

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let body = STANDARD.encode("trojan://nope");
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        fixture.config.subscribe_url = format!("http://{}/", addr);

        let supervisor = Supervisor::with_probe(
            fixture.config.clone(),
            fixture.dir.path().join("helper.yaml"),
            table(&[]),
        );

        let err = supervisor.start().await.unwrap_err();
        assert!(err.is_payload_error());
        assert!(supervisor.engine_pid().await.is_none());
    }
}
