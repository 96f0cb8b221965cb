//! Health monitor: owns one [`HealthService`] per provider and their
//! round loops.
//!
//! The `HealthMonitor` is the registry the API layer resolves providers
//! against. Round loops share one shutdown signal.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::service::HealthService;

/// Manages health services for all enabled providers.
pub struct HealthMonitor {
    /// Registered services: provider name → service.
    services: HashMap<String, Arc<HealthService>>,
    shutdown_tx: watch::Sender<bool>,
    /// Running round loops.
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            services: HashMap::new(),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a service under its name, replacing any earlier one.
    pub fn register(&mut self, service: Arc<HealthService>) {
        let name = service.name().to_string();
        if self.services.insert(name.clone(), service).is_some() {
            warn!(provider = %name, "replaced existing health service");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<HealthService>> {
        self.services.get(name)
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Spawn the round loop of every registered service.
    ///
    /// Clears an earlier `stop_all`, so a stopped monitor can be restarted.
    pub async fn start_all(&self) {
        let mut handles = self.handles.lock().await;
        self.shutdown_tx.send_replace(false);
        for name in self.names() {
            if handles.iter().any(|(running, _)| *running == name) {
                continue;
            }
            let Some(service) = self.services.get(&name) else {
                continue;
            };
            let handle = service.start(self.shutdown_tx.subscribe());
            info!(provider = %name, interval = ?service.interval(), "health service started");
            handles.push((name, handle));
        }
    }

    /// Number of round loops currently running.
    pub async fn running(&self) -> usize {
        let handles = self.handles.lock().await;
        handles.iter().filter(|(_, h)| !h.is_finished()).count()
    }

    /// Signal every loop to stop and wait for it. A loop that is mid-round
    /// finishes and publishes that round first.
    pub async fn stop_all(&self) {
        self.shutdown_tx.send_replace(true);
        let mut handles = self.handles.lock().await;
        for (name, handle) in handles.drain(..) {
            if !handle.is_finished() {
                debug!(provider = %name, "waiting for in-flight round");
            }
            match handle.await {
                Ok(()) => debug!(provider = %name, "health service stopped"),
                Err(e) => warn!(provider = %name, error = %e, "health service task failed"),
            }
        }
        info!("all health services stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::tests::{addr, checker, udp_endpoints, Outcome, ScriptedProbe};
    use gatewatch_core::ProbeSettings;
    use std::time::Duration;

    fn service(name: &str, probe: Arc<ScriptedProbe>) -> Arc<HealthService> {
        let checker = checker(udp_endpoints(2), probe, ProbeSettings::default());
        Arc::new(HealthService::new(name, Arc::new(checker), Duration::from_secs(600)))
    }

    #[test]
    fn register_and_lookup() {
        let mut monitor = HealthMonitor::new();
        assert!(monitor.names().is_empty());

        monitor.register(service("riseup", Arc::new(ScriptedProbe::default())));
        monitor.register(service("calyx", Arc::new(ScriptedProbe::default())));

        assert_eq!(monitor.names(), vec!["calyx", "riseup"]);
        assert_eq!(monitor.get("riseup").unwrap().name(), "riseup");
        assert!(monitor.get("unknown").is_none());
    }

    #[test]
    fn register_replaces_same_name() {
        let mut monitor = HealthMonitor::new();
        let first = service("riseup", Arc::new(ScriptedProbe::default()));
        let second = service("riseup", Arc::new(ScriptedProbe::default()));
        monitor.register(first);
        monitor.register(Arc::clone(&second));

        assert_eq!(monitor.names().len(), 1);
        assert!(Arc::ptr_eq(monitor.get("riseup").unwrap(), &second));
    }

    #[tokio::test(start_paused = true)]
    async fn start_all_runs_first_round() {
        let mut monitor = HealthMonitor::new();
        monitor.register(service("riseup", Arc::new(ScriptedProbe::default())));
        monitor.register(service(
            "calyx",
            Arc::new(ScriptedProbe::with(&[(addr(1), Outcome::DialError)])),
        ));

        monitor.start_all().await;
        // Starting twice does not spawn a second loop.
        monitor.start_all().await;
        assert_eq!(monitor.running().await, 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let riseup = monitor.get("riseup").unwrap();
        assert_eq!(riseup.healthy(&addr(1), "udp").await, Ok(true));
        let calyx = monitor.get("calyx").unwrap();
        assert_eq!(calyx.healthy(&addr(1), "udp").await, Ok(false));

        monitor.stop_all().await;
        assert_eq!(monitor.running().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_lets_round_finish() {
        // A hanging dial holds the round open until the dial timeout.
        let probe = Arc::new(ScriptedProbe::with(&[(addr(1), Outcome::DialHang)]));
        let checker = checker(
            udp_endpoints(1),
            probe,
            ProbeSettings {
                dial_timeout: "30m".to_string(),
                ..Default::default()
            },
        );
        let mut monitor = HealthMonitor::new();
        monitor.register(Arc::new(HealthService::new(
            "riseup",
            Arc::new(checker),
            Duration::from_secs(600),
        )));

        monitor.start_all().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        let riseup = monitor.get("riseup").unwrap();
        assert!(riseup.current().await.is_none());

        monitor.stop_all().await;
        assert_eq!(monitor.running().await, 0);
        assert_eq!(riseup.healthy(&addr(1), "udp").await, Ok(false));
        assert!(riseup.previous().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_runs_again() {
        let mut monitor = HealthMonitor::new();
        monitor.register(service("riseup", Arc::new(ScriptedProbe::default())));

        monitor.start_all().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        monitor.stop_all().await;
        let riseup = monitor.get("riseup").unwrap();
        let first = riseup.current().await.unwrap();

        monitor.start_all().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(monitor.running().await, 1);
        assert!(Arc::ptr_eq(&riseup.previous().await.unwrap(), &first));

        monitor.stop_all().await;
        assert_eq!(monitor.running().await, 0);
    }

    #[tokio::test]
    async fn stop_all_without_start_is_noop() {
        let monitor = HealthMonitor::new();
        monitor.stop_all().await;
        assert_eq!(monitor.running().await, 0);
    }
}
