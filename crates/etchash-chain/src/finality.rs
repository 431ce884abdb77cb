//! Artificial finality switch and its monitor.
//!
//! The reorg guard is only safe to apply when this node is well connected
//! and caught up: an isolated or lagging node would otherwise refuse to
//! rejoin the network's chain. [`FinalityMonitor`] polls peer count and head
//! age on a fixed interval and flips the shared [`ArtificialFinality`] flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default minimum peers for the guard to be on.
pub const DEFAULT_MIN_PEERS: usize = 5;

/// Default maximum head age for the guard to be on.
pub const DEFAULT_MAX_HEAD_AGE: Duration = Duration::from_secs(600);

/// Default polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest polling interval the monitor accepts.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Shared on/off switch for the reorg guard.
#[derive(Debug, Default)]
pub struct ArtificialFinality {
    enabled: AtomicBool,
}

impl ArtificialFinality {
    /// Create the switch in the given state.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Whether the guard is on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Set the state, returning the previous one.
    pub fn set(&self, enabled: bool) -> bool {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!(enabled, "Artificial finality toggled");
        }
        previous
    }

    /// Turn the guard on.
    pub fn enable(&self) {
        self.set(true);
    }

    /// Turn the guard off.
    pub fn disable(&self) {
        self.set(false);
    }
}

/// Sync state reported by the networking layer.
pub trait SyncStatus: Send + Sync {
    /// Connected peers.
    fn peer_count(&self) -> usize;
    /// Timestamp of the current head, in seconds.
    fn head_timestamp(&self) -> u64;
}

/// Thresholds for the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalityConfig {
    /// Peers required for the guard to be on.
    pub min_peers: usize,
    /// Head older than this turns the guard off.
    pub max_head_age: Duration,
    /// Time between checks.
    pub poll_interval: Duration,
}

impl Default for FinalityConfig {
    fn default() -> Self {
        Self {
            min_peers: DEFAULT_MIN_PEERS,
            max_head_age: DEFAULT_MAX_HEAD_AGE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Periodically turns artificial finality on or off.
pub struct FinalityMonitor<S> {
    config: FinalityConfig,
    status: Arc<S>,
    finality: Arc<ArtificialFinality>,
}

impl<S: SyncStatus + 'static> FinalityMonitor<S> {
    /// Create a monitor driving `finality` from `status`.
    ///
    /// The poll interval is raised to at least [`MIN_POLL_INTERVAL`].
    pub fn new(
        mut config: FinalityConfig,
        status: Arc<S>,
        finality: Arc<ArtificialFinality>,
    ) -> Self {
        if config.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                poll_interval_ms = config.poll_interval.as_millis() as u64,
                "Finality poll interval too short, clamping"
            );
            config.poll_interval = MIN_POLL_INTERVAL;
        }
        Self {
            config,
            status,
            finality,
        }
    }

    /// Whether the guard should be on at wall-clock time `now`.
    pub fn should_enable(&self, now: u64) -> bool {
        let peers = self.status.peer_count();
        let head_age = now.saturating_sub(self.status.head_timestamp());
        let fresh = head_age <= self.config.max_head_age.as_secs();
        let enable = peers >= self.config.min_peers && fresh;
        debug!(peers, head_age, enable, "Finality check");
        enable
    }

    /// Run one check at `now` and apply it. Returns the new state.
    pub fn check(&self, now: u64) -> bool {
        let enable = self.should_enable(now);
        self.finality.set(enable);
        enable
    }

    /// Poll until `shutdown` turns true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            min_peers = self.config.min_peers,
            max_head_age_secs = self.config.max_head_age.as_secs(),
            "Finality monitor started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check(unix_now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Finality monitor stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
