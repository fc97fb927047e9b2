//! Liveness monitor: forgets silent servers and keeps this client alive on
//! the servers it still hears.
//!
//! # Timing (for beginners)
//!
//! Two clocks are tracked per server:
//!
//! - **last heard from**: the last broadcast received from it.  Servers
//!   broadcast every 5 s, so after four missed broadcasts (20 s) the client
//!   assumes the server is gone and evicts it.
//! - **last talked to**: the last request this client sent it.  Servers
//!   forget a silent client after 2 h, so the client pings every quarter of
//!   that (30 min) and the server sees at least four pings per window.
//!
//! The sweep runs every half of the eviction threshold, so no server ages
//! more than 1.5x the threshold before it is noticed.
//!
//! # Failed pings
//!
//! A ping that cannot be sent marks the server *suspect* and is logged.  The
//! server is not evicted for it; if it really is gone its broadcasts stop
//! and the staleness rule removes it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::application::{LinkError, Messenger, ServerRegistry};
use crate::infrastructure::shutdown::Shutdown;

/// How often link servers broadcast their status.
pub const SERVER_BROADCAST_INTERVAL: Duration = Duration::from_secs(5);

/// How long a link server remembers a silent client.
pub const SERVER_FORGET_CLIENT: Duration = Duration::from_secs(2 * 60 * 60);

/// Missed broadcasts (or server timeouts) that make up one threshold.
const MISSES: u32 = 4;

/// Longest interval the monitor accepts for any of its timings.
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Invalid liveness timings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LivenessConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("sweep interval {sweep:?} exceeds half the forget threshold {forget:?}")]
    SweepTooSlow { sweep: Duration, forget: Duration },

    #[error("{name} {value:?} is longer than the supported maximum {max:?}")]
    TooLong {
        name: &'static str,
        value: Duration,
        max: Duration,
    },
}

/// The three intervals the monitor works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Ping a server not talked to for longer than this.
    pub poll_interval: Duration,
    /// Evict a server not heard from for longer than this.
    pub forget_server: Duration,
    /// Time between sweeps.
    pub sweep_interval: Duration,
}

impl LivenessConfig {
    /// Derives the client's timings from the server's.
    ///
    /// # Errors
    ///
    /// Returns [`LivenessConfigError::TooLong`] when the forget threshold
    /// derived from `server_broadcast_interval` cannot be represented.
    pub fn derive(
        server_broadcast_interval: Duration,
        server_forget_client: Duration,
    ) -> Result<Self, LivenessConfigError> {
        let forget_server = server_broadcast_interval
            .checked_mul(MISSES)
            .ok_or(LivenessConfigError::TooLong {
                name: "server broadcast interval",
                value: server_broadcast_interval,
                max: MAX_INTERVAL / MISSES,
            })?;
        Ok(Self::with_thresholds(server_forget_client / MISSES, forget_server))
    }

    /// Explicit thresholds; the sweep interval is half of `forget_server`.
    pub fn with_thresholds(poll_interval: Duration, forget_server: Duration) -> Self {
        Self {
            poll_interval,
            forget_server,
            sweep_interval: forget_server / 2,
        }
    }

    /// # Errors
    ///
    /// Returns [`LivenessConfigError`] for zero intervals, intervals above
    /// [`MAX_INTERVAL`] or a sweep interval above half the forget threshold.
    pub fn validate(&self) -> Result<(), LivenessConfigError> {
        for (name, value) in [
            ("poll interval", self.poll_interval),
            ("forget-server threshold", self.forget_server),
            ("sweep interval", self.sweep_interval),
        ] {
            if value > MAX_INTERVAL {
                return Err(LivenessConfigError::TooLong {
                    name,
                    value,
                    max: MAX_INTERVAL,
                });
            }
        }
        if self.poll_interval.is_zero() {
            return Err(LivenessConfigError::Zero("poll interval"));
        }
        if self.forget_server.is_zero() {
            return Err(LivenessConfigError::Zero("forget-server threshold"));
        }
        if self.sweep_interval.is_zero() {
            return Err(LivenessConfigError::Zero("sweep interval"));
        }
        if self.sweep_interval > self.forget_server / 2 {
            return Err(LivenessConfigError::SweepTooSlow {
                sweep: self.sweep_interval,
                forget: self.forget_server,
            });
        }
        Ok(())
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self::with_thresholds(
            SERVER_FORGET_CLIENT / MISSES,
            SERVER_BROADCAST_INTERVAL.saturating_mul(MISSES),
        )
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Servers removed for silence.
    pub evicted: Vec<SocketAddr>,
    /// Servers sent a keep-alive.
    pub pinged: Vec<SocketAddr>,
    /// Servers whose keep-alive failed.
    pub suspect: Vec<SocketAddr>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.pinged.is_empty() && self.suspect.is_empty()
    }
}

/// Periodic staleness sweep over the server registry.
pub struct LivenessMonitor {
    registry: Arc<ServerRegistry>,
    messenger: Arc<dyn Messenger>,
    config: LivenessConfig,
}

impl LivenessMonitor {
    pub fn new(registry: Arc<ServerRegistry>, messenger: Arc<dyn Messenger>, config: LivenessConfig) -> Self {
        Self {
            registry,
            messenger,
            config,
        }
    }

    pub fn config(&self) -> LivenessConfig {
        self.config
    }

    /// Sweeps every `sweep_interval` until `shutdown` fires.
    pub async fn run(self, mut shutdown: Shutdown) {
        let period = self
            .config
            .sweep_interval
            .clamp(Duration::from_millis(1), MAX_INTERVAL);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    if !report.is_empty() {
                        debug!("liveness sweep: {report:?}");
                    }
                }
            }
        }
        info!("liveness monitor stopped");
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now()).await
    }

    /// Sweeps as if the current time were `now`.
    pub async fn sweep_at(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();

        for server in self.registry.servers() {
            let addr = server.addr();
            let silent_for = now.saturating_duration_since(server.last_heard_from());

            if silent_for > self.config.forget_server {
                match self.registry.remove(addr) {
                    Ok(_) => {
                        info!("server {addr} silent for {silent_for:?}, forgetting it");
                        report.evicted.push(addr);
                    }
                    Err(LinkError::NoSuchServer(_)) => debug!("server {addr} already removed"),
                    Err(e) => warn!("evicting {addr}: {e}"),
                }
            } else if now.saturating_duration_since(server.last_talked_to()) > self.config.poll_interval {
                match server.ping(self.messenger.as_ref()).await {
                    Ok(()) => report.pinged.push(addr),
                    Err(e) => {
                        warn!("keep-alive to {addr} failed, marking suspect: {e}");
                        server.mark_suspect();
                        report.suspect.push(addr);
                    }
                }
            }
        }
        report
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
