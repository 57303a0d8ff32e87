//! Connectivity probes run against a staged configuration

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::time::{sleep, timeout, Instant};

use crate::nmstatectl::run_command;
use nmstate_config::ApiServerConfig;

/// Default pause between probe attempts
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Longest bound a poll honours; larger limits are clamped to it
const MAX_POLL_LIMIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Path of the basic read used to check the control plane
const CONTROL_PLANE_READ_PATH: &str = "/api/v1/namespaces/default";

/// Evaluate `condition` immediately and then every `interval` until it
/// returns `true` or `limit` elapses. An attempt still running at the
/// deadline is abandoned.
pub async fn poll_immediate<F, Fut>(interval: Duration, limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    poll_for(interval, limit, || {
        let attempt = condition();
        async move { attempt.await.then_some(()) }
    })
    .await
    .is_some()
}

/// Like [`poll_immediate`] but yields the first value an attempt produces
pub async fn poll_for<T, F, Fut>(interval: Duration, limit: Duration, mut attempt: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + limit.min(MAX_POLL_LIMIT);

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, attempt()).await {
            Ok(Some(value)) => return Some(value),
            Ok(None) => {}
            Err(_) => return None,
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        sleep(interval.min(remaining)).await;
    }
}

/// Single reachability check of an address
#[async_trait]
pub trait ReachabilityCheck: Send + Sync {
    async fn is_reachable(&self, target: &str) -> bool;
}

/// Single check that the control plane answers a basic read
#[async_trait]
pub trait ControlPlaneCheck: Send + Sync {
    async fn is_reachable(&self, request_timeout: Duration) -> bool;
}

/// `ping -c 1 <target>`
#[derive(Debug, Clone)]
pub struct PingCheck {
    program: String,
    attempt_timeout: Duration,
}

impl PingCheck {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for PingCheck {
    fn default() -> Self {
        Self::new("ping")
    }
}

#[async_trait]
impl ReachabilityCheck for PingCheck {
    async fn is_reachable(&self, target: &str) -> bool {
        let args = ["-c".to_string(), "1".to_string(), target.to_string()];
        match run_command(&self.program, &args, None, self.attempt_timeout).await {
            Ok(output) => {
                debug!("ping {} output: '{}'", target, output.trim());
                true
            }
            Err(e) => {
                debug!("ping {} failed: {}", target, e);
                false
            }
        }
    }
}

/// Control plane read over a fresh HTTP client per attempt.
///
/// Nothing is cached between attempts, so each check reflects the network
/// as it is right now rather than a connection pooled before the change.
#[derive(Debug, Clone)]
pub struct ApiServerCheck {
    config: ApiServerConfig,
}

impl ApiServerCheck {
    pub fn new(config: ApiServerConfig) -> Self {
        Self { config }
    }

    fn base_url(&self) -> Option<String> {
        if let Some(url) = &self.config.url {
            return Some(url.trim_end_matches('/').to_string());
        }

        let host = std::env::var("KUBERNETES_SERVICE_HOST").ok()?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        if host.contains(':') {
            Some(format!("https://[{}]:{}", host, port))
        } else {
            Some(format!("https://{}:{}", host, port))
        }
    }

    async fn read_optional(path: &Path) -> Option<Vec<u8>> {
        match tokio::fs::read(path).await {
            Ok(data) => Some(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn build_client(&self, request_timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(0);

        if let Some(pem) = Self::read_optional(&self.config.ca_path).await {
            match reqwest::Certificate::from_pem(&pem) {
                Ok(cert) => builder = builder.add_root_certificate(cert),
                Err(e) => warn!(
                    "Ignoring invalid CA bundle {}: {}",
                    self.config.ca_path.display(),
                    e
                ),
            }
        }

        builder.build()
    }
}

#[async_trait]
impl ControlPlaneCheck for ApiServerCheck {
    async fn is_reachable(&self, request_timeout: Duration) -> bool {
        let Some(base_url) = self.base_url() else {
            error!("No control plane address configured and KUBERNETES_SERVICE_HOST is unset");
            return false;
        };

        let client = match self.build_client(request_timeout).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed creating control plane client: {}", e);
                return false;
            }
        };

        let mut request = client.get(format!("{}{}", base_url, CONTROL_PLANE_READ_PATH));
        if let Some(token) = Self::read_optional(&self.config.token_path).await {
            let token = String::from_utf8_lossy(&token).trim().to_string();
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                error!("Control plane answered with status {}", response.status());
                false
            }
            Err(e) => {
                error!("Failed reaching the control plane: {}", e);
                false
            }
        }
    }
}

/// Polls gateway and control plane reachability
#[derive(Clone)]
pub struct ConnectivityProbe {
    gateway: Arc<dyn ReachabilityCheck>,
    control_plane: Arc<dyn ControlPlaneCheck>,
    interval: Duration,
}

impl ConnectivityProbe {
    pub fn new(gateway: Arc<dyn ReachabilityCheck>, control_plane: Arc<dyn ControlPlaneCheck>) -> Self {
        Self {
            gateway,
            control_plane,
            interval: DEFAULT_PROBE_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True once `address` answers within `limit`
    pub async fn probe_gateway(&self, address: &str, limit: Duration) -> bool {
        info!("Probing default gateway {} for up to {:?}", address, limit);
        let reachable =
            poll_immediate(self.interval, limit, || self.gateway.is_reachable(address)).await;
        if !reachable {
            warn!("Default gateway {} not reachable within {:?}", address, limit);
        }
        reachable
    }

    /// True once the control plane answers a read within `limit`
    pub async fn probe_control_plane(&self, limit: Duration) -> bool {
        info!("Probing control plane connectivity for up to {:?}", limit);
        let reachable =
            poll_immediate(self.interval, limit, || self.control_plane.is_reachable(limit)).await;
        if !reachable {
            warn!("Control plane not reachable within {:?}", limit);
        }
        reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyCheck {
        calls: AtomicUsize,
        succeed_on: usize,
    }

    impl FlakyCheck {
        fn new(succeed_on: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                succeed_on,
            }
        }
    }

    #[async_trait]
    impl ReachabilityCheck for FlakyCheck {
        async fn is_reachable(&self, _target: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.succeed_on
        }
    }

    #[async_trait]
    impl ControlPlaneCheck for FlakyCheck {
        async fn is_reachable(&self, _request_timeout: Duration) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.succeed_on
        }
    }

    fn probe(gateway: Arc<FlakyCheck>, control_plane: Arc<FlakyCheck>) -> ConnectivityProbe {
        ConnectivityProbe::new(gateway, control_plane)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_is_immediate() {
        let gateway = Arc::new(FlakyCheck::new(1));
        let start = Instant::now();

        assert!(
            probe(gateway.clone(), Arc::new(FlakyCheck::new(1)))
                .probe_gateway("192.168.66.2", Duration::from_secs(5))
                .await
        );
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_reachable() {
        let control_plane = Arc::new(FlakyCheck::new(3));
        let start = Instant::now();

        assert!(
            probe(Arc::new(FlakyCheck::new(1)), control_plane.clone())
                .probe_control_plane(Duration::from_secs(10))
                .await
        );
        assert_eq!(control_plane.calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_timeout() {
        let gateway = Arc::new(FlakyCheck::new(usize::MAX));
        let start = Instant::now();

        assert!(
            !probe(gateway.clone(), Arc::new(FlakyCheck::new(1)))
                .probe_gateway("10.0.0.1", Duration::from_secs(5))
                .await
        );
        assert!(gateway.calls.load(Ordering::SeqCst) >= 5);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempt_is_cut_at_deadline() {
        let reachable = poll_immediate(Duration::from_secs(1), Duration::from_secs(3), || async {
            sleep(Duration::from_secs(60)).await;
            true
        })
        .await;
        assert!(!reachable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_limit_does_not_overflow() {
        let reachable =
            poll_immediate(Duration::from_secs(1), Duration::from_secs(u64::MAX), || async {
                true
            })
            .await;
        assert!(reachable);

        let found = poll_for(Duration::from_secs(1), Duration::MAX, || async { Some(7) }).await;
        assert_eq!(found, Some(7));
    }

    #[tokio::test]
    async fn test_refused_control_plane_is_unreachable() {
        let check = ApiServerCheck::new(ApiServerConfig {
            url: Some("http://127.0.0.1:1".to_string()),
            ..Default::default()
        });
        assert!(!check.is_reachable(Duration::from_millis(500)).await);
    }
}
