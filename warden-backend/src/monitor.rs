use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, info, warn};

use crate::notify::Notifications;
use crate::policy::PolicyStore;
use crate::sessions::SessionCache;

/// Slack on top of the probe timeout before a probe is abandoned outright.
const PROBE_GRACE: Duration = Duration::from_millis(500);

/// Connectivity check for one backend address.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str, limit: Duration) -> bool;
}

/// Plain TCP connect, the same check the proxy itself would make first.
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, address: &str, limit: Duration) -> bool {
        match timeout(limit, TcpStream::connect(address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(address, error = %e, "probe failed");
                false
            }
            Err(_) => {
                debug!(address, "probe timed out");
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub server: String,
    pub reachable: bool,
    /// `None` on the first observation of a server.
    pub previous: Option<bool>,
}

/// Periodic reachability checks over every configured backend server.
///
/// Servers with a connected player count as reachable without probing.
/// A notification goes out only when a server's state differs from the
/// previous tick, and always on its first observation.
pub struct ReachabilityMonitor {
    policy: Arc<PolicyStore>,
    sessions: Arc<SessionCache>,
    prober: Arc<dyn Prober>,
    notifications: Notifications,
    tick_lock: AsyncMutex<()>,
    states: RwLock<BTreeMap<String, bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReachabilityMonitor {
    pub fn new(
        policy: Arc<PolicyStore>,
        sessions: Arc<SessionCache>,
        prober: Arc<dyn Prober>,
        notifications: Notifications,
    ) -> Self {
        Self {
            policy,
            sessions,
            prober,
            notifications,
            tick_lock: AsyncMutex::new(()),
            states: RwLock::new(BTreeMap::new()),
            task: Mutex::new(None),
        }
    }

    /// Last observed state of every server.
    pub async fn current(&self) -> BTreeMap<String, bool> {
        self.states.read().await.clone()
    }

    /// Run one probe round. Overlapping calls are serialized.
    pub async fn tick(&self) -> Vec<Transition> {
        let _guard = self.tick_lock.lock().await;
        let policy = self.policy.current();
        let occupied = self.sessions.occupied_servers().await;
        let limit = policy.monitor.ping_timeout;

        let mut observed = BTreeMap::new();
        let mut probes = JoinSet::new();
        for (name, server) in &policy.servers {
            if occupied.contains(name) {
                observed.insert(name.clone(), true);
                continue;
            }

            let prober = Arc::clone(&self.prober);
            let name = name.clone();
            let address = server.address.clone();
            probes.spawn(async move {
                let reachable = timeout(limit + PROBE_GRACE, prober.probe(&address, limit))
                    .await
                    .unwrap_or(false);
                (name, reachable)
            });
        }

        while let Some(result) = probes.join_next().await {
            match result {
                Ok((name, reachable)) => {
                    observed.insert(name, reachable);
                }
                Err(e) => warn!(error = %e, "probe task failed"),
            }
        }

        // A probe that died counts as unreachable
        for name in policy.servers.keys() {
            observed.entry(name.clone()).or_insert(false);
        }

        let transitions = {
            let mut states = self.states.write().await;
            let transitions: Vec<Transition> = observed
                .iter()
                .filter_map(|(server, &reachable)| {
                    let previous = states.get(server).copied();
                    (previous != Some(reachable)).then(|| Transition {
                        server: server.clone(),
                        reachable,
                        previous,
                    })
                })
                .collect();
            // Servers removed from the policy are forgotten
            *states = observed;
            transitions
        };

        for transition in &transitions {
            info!(
                server = %transition.server,
                reachable = transition.reachable,
                previous = ?transition.previous,
                "server reachability changed"
            );
            self.notifications.server_status_changed(
                &transition.server,
                policy.display_name(&transition.server),
                transition.reachable,
            );
        }

        transitions
    }

    /// Arm the periodic schedule from the current policy, cancelling any
    /// schedule that is already running.
    pub fn start(self: &Arc<Self>) {
        let policy = self.policy.current();
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(previous) = task.take() {
            previous.abort();
        }

        if !policy.monitor.enabled {
            info!("reachability monitor disabled");
            return;
        }

        let monitor = Arc::clone(self);
        let period = policy.monitor.scan_delay;
        let first = Instant::now() + policy.monitor.initial_delay;
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                monitor.tick().await;
            }
        }));

        info!(
            scan_delay_secs = period.as_secs(),
            ping_timeout_ms = u64::try_from(policy.monitor.ping_timeout.as_millis()).unwrap_or(u64::MAX),
            "reachability monitor started"
        );
    }

    /// Re-read timing from the policy and re-arm.
    pub fn restart(self: &Arc<Self>) {
        self.start();
    }

    pub fn stop(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = task.take() {
            previous.abort();
            info!("reachability monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}
