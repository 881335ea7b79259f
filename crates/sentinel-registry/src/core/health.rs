//! Periodic health probing
//!
//! Every `interval`, all live registrations that are not decommissioned are
//! probed concurrently. Each result is applied to the store (which drives
//! `healthy`/`unhealthy`) and then handed to the failover manager.

use async_trait::async_trait;
use sentinel_core::{HealthCheckResult, ServiceRegistration, ServiceStatus};
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::failover::FailoverManager;
use crate::storage::{RegistryStore, StorageError};

/// Something that can tell whether a registration is alive
#[async_trait]
pub trait HealthProbe: Send + Sync + Debug {
    async fn probe(&self, registration: &ServiceRegistration) -> HealthCheckResult;
}

/// HTTP GET against the registration's health-check URL
///
/// 2xx and 3xx count as healthy. Redirects are not followed.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, registration: &ServiceRegistration) -> HealthCheckResult {
        let started = Instant::now();
        let response = self.client.get(&registration.health_check_url).send().await;
        let elapsed = started.elapsed().as_millis() as u64;

        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() || status.is_redirection() {
                    HealthCheckResult::healthy(elapsed, status.as_u16())
                } else {
                    HealthCheckResult::unhealthy(
                        elapsed,
                        Some(status.as_u16()),
                        format!("Unhealthy status code: {}", status.as_u16()),
                    )
                }
            }
            Err(e) => HealthCheckResult::unhealthy(elapsed, None, format!("Request failed: {e}")),
        }
    }
}

struct MonitorTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Background prober feeding the store and the failover manager
#[derive(Clone)]
pub struct HealthMonitor {
    store: Arc<dyn RegistryStore>,
    probe: Arc<dyn HealthProbe>,
    failover: Arc<FailoverManager>,
    interval: Duration,
    timeout: Duration,
    task: Arc<Mutex<Option<MonitorTask>>>,
}

impl Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("running", &self.is_running())
            .finish()
    }
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        probe: Arc<dyn HealthProbe>,
        failover: Arc<FailoverManager>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            probe,
            failover,
            interval,
            timeout,
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Spawn the probe loop; returns false if it is already running
    pub fn start(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return false;
        }

        let (shutdown, mut stopped) = watch::channel(false);
        let monitor = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = monitor.check_all().await {
                            error!(error = %e, "Failed to list services for health check");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
        });

        info!(interval = ?self.interval, "Starting service health monitor");
        *task = Some(MonitorTask { shutdown, handle });
        true
    }

    /// Stop the probe loop and wait for it to finish
    pub async fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Health monitor task ended abnormally");
            }
            info!("Service health monitor stopped");
        }
    }

    /// Probe every live, non-decommissioned registration concurrently
    ///
    /// Returns the number of services probed.
    pub async fn check_all(&self) -> Result<usize, StorageError> {
        let services: Vec<_> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|s| s.status != ServiceStatus::Decommissioned)
            .collect();
        let count = services.len();
        self.failover.retain_tracked(services.iter().map(|s| s.id.as_str()));

        let mut probes = JoinSet::new();
        for service in services {
            let monitor = self.clone();
            probes.spawn(async move {
                let id = service.id.clone();
                if let Err(e) = monitor.check_registration(service).await {
                    warn!(service_id = %id, error = %e, "Health check could not be recorded");
                }
            });
        }
        while let Some(joined) = probes.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Health check task panicked");
            }
        }

        debug!(services = count, "Health check round complete");
        Ok(count)
    }

    /// Probe one service immediately
    pub async fn check_now(&self, service_id: &str) -> Result<ServiceRegistration, StorageError> {
        let service = self.store.get(service_id).await?;
        self.check_registration(service).await
    }

    async fn check_registration(
        &self,
        service: ServiceRegistration,
    ) -> Result<ServiceRegistration, StorageError> {
        debug!(
            service_id = %service.id,
            url = %service.health_check_url,
            "Checking service health"
        );

        let result = match tokio::time::timeout(self.timeout, self.probe.probe(&service)).await {
            Ok(result) => result,
            Err(_) => HealthCheckResult::unhealthy(
                self.timeout.as_millis() as u64,
                None,
                "Health check timed out",
            ),
        };
        let healthy = result.healthy;
        let error_message = result.error_message.clone();

        let updated = self.store.mark_health_check(&service.id, result).await?;

        if healthy {
            debug!(service_id = %updated.id, "Service health check passed");
        } else {
            warn!(
                service_id = %updated.id,
                consecutive_failures = updated.consecutive_failures,
                status = %updated.status,
                error = ?error_message,
                "Service health check failed"
            );
        }

        if let Err(e) = self.failover.on_health_check(&updated, healthy).await {
            error!(service_id = %updated.id, error = %e, "Failover check failed");
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use sentinel_core::{SecurityAuditLog, ServiceRole, ServiceType};
    use std::collections::HashMap;

    /// Probe answering from a fixed table of service id -> healthy
    #[derive(Debug, Default)]
    struct ScriptedProbe {
        answers: Mutex<HashMap<String, bool>>,
    }

    impl ScriptedProbe {
        fn set(&self, id: &str, healthy: bool) {
            self.answers.lock().unwrap().insert(id.to_string(), healthy);
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, registration: &ServiceRegistration) -> HealthCheckResult {
            let healthy = *self
                .answers
                .lock()
                .unwrap()
                .get(&registration.id)
                .unwrap_or(&true);
            if healthy {
                HealthCheckResult::healthy(1, 200)
            } else {
                HealthCheckResult::unhealthy(1, Some(503), "Unhealthy status code: 503")
            }
        }
    }

    #[derive(Debug)]
    struct SlowProbe;

    #[async_trait]
    impl HealthProbe for SlowProbe {
        async fn probe(&self, _registration: &ServiceRegistration) -> HealthCheckResult {
            tokio::time::sleep(Duration::from_secs(30)).await;
            HealthCheckResult::healthy(30_000, 200)
        }
    }

    fn service(id: &str, role: ServiceRole) -> ServiceRegistration {
        ServiceRegistration::builder()
            .id(id)
            .name(id)
            .service_type(ServiceType::Extension)
            .version("1.0.0")
            .url(format!("http://{id}:8080"))
            .failover_group("ext")
            .role(role)
            .build()
            .unwrap()
    }

    fn monitor(store: Arc<MemoryStore>, probe: Arc<dyn HealthProbe>) -> HealthMonitor {
        let failover = Arc::new(FailoverManager::new(
            store.clone(),
            Arc::new(SecurityAuditLog::new()),
        ));
        HealthMonitor::new(
            store,
            probe,
            failover,
            Duration::from_millis(20),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_check_all_marks_services_healthy() {
        let store = Arc::new(MemoryStore::new());
        store.register(service("a", ServiceRole::Primary)).await.unwrap();
        store.register(service("b", ServiceRole::Backup)).await.unwrap();

        let monitor = monitor(store.clone(), Arc::new(ScriptedProbe::default()));
        assert_eq!(monitor.check_all().await.unwrap(), 2);

        for id in ["a", "b"] {
            let reg = store.get(id).await.unwrap();
            assert_eq!(reg.status, ServiceStatus::Healthy);
            assert_eq!(reg.health_check_count, 1);
            assert_eq!(store.health_history(id, 10).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_failing_primary_fails_over() {
        let store = Arc::new(MemoryStore::new());
        store.register(service("primary", ServiceRole::Primary)).await.unwrap();
        store.register(service("backup", ServiceRole::Backup)).await.unwrap();

        let probe = Arc::new(ScriptedProbe::default());
        let monitor = monitor(store.clone(), probe.clone());
        monitor.check_all().await.unwrap();

        probe.set("primary", false);
        for _ in 0..3 {
            monitor.check_now("primary").await.unwrap();
        }

        let active = store
            .active_service("ext", ServiceType::Extension)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, "backup");
        assert_eq!(store.failover_history("ext", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        let store = Arc::new(MemoryStore::new());
        store.register(service("slow", ServiceRole::Primary)).await.unwrap();

        let monitor = monitor(store.clone(), Arc::new(SlowProbe));
        let updated = monitor.check_now("slow").await.unwrap();
        assert_eq!(updated.failed_health_check_count, 1);

        let history = store.health_history("slow", 1).await.unwrap();
        assert_eq!(history[0].error_message.as_deref(), Some("Health check timed out"));
    }

    #[tokio::test]
    async fn test_check_now_unknown_service() {
        let store = Arc::new(MemoryStore::new());
        let monitor = monitor(store, Arc::new(ScriptedProbe::default()));
        assert!(matches!(
            monitor.check_now("ghost").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let store = Arc::new(MemoryStore::new());
        store.register(service("a", ServiceRole::Primary)).await.unwrap();

        let monitor = monitor(store.clone(), Arc::new(ScriptedProbe::default()));
        assert!(monitor.start());
        assert!(!monitor.start());
        assert!(monitor.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.stop().await;
        assert!(!monitor.is_running());

        let checks = store.get("a").await.unwrap().health_check_count;
        assert!(checks >= 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("a").await.unwrap().health_check_count, checks);
    }
}
