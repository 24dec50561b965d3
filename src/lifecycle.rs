use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use tokio::time::{Duration, Instant};

use crate::config_loader::ProxyConfig;
use crate::management::{ManagementApi, StatsSnapshot};

/// Stats timeout for polls made while a client is waiting on the answer.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(2);
/// Stats timeout for background polls and the pre-stop confirmation.
pub const BACKGROUND_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend state derived from one stats poll. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerState {
    pub running: bool,
    pub waiting_start: bool,
    pub players: u32,
    pub joinable: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct LifecycleTimings {
    pub start_cooldown: Duration,
    pub stop_cooldown: Duration,
    pub startup_grace: Duration,
}

impl From<&ProxyConfig> for LifecycleTimings {
    fn from(config: &ProxyConfig) -> Self {
        LifecycleTimings {
            start_cooldown: config.start_cooldown,
            stop_cooldown: config.stop_cooldown,
            startup_grace: config.startup_grace,
        }
    }
}

/// Process-wide lifecycle timestamps and the idle counter.
///
/// `None` timestamps mean "never", which always counts as outside any window.
#[derive(Debug, Default)]
pub struct LifecycleClock {
    last_start_request: Option<Instant>,
    last_stop_request: Option<Instant>,
    last_started_at: Option<Instant>,
    empty_minutes: u32,
}

fn window_passed(stamp: Option<Instant>, now: Instant, window: Duration) -> bool {
    stamp.map_or(true, |at| now.saturating_duration_since(at) >= window)
}

/// Polls the management API and gates start/stop requests.
///
/// All reads and writes of the [`LifecycleClock`] go through one mutex; a
/// check-and-update never releases it in between, and it is never held
/// across an await.
pub struct LifecycleController {
    api: Arc<dyn ManagementApi>,
    timings: LifecycleTimings,
    clock: Mutex<LifecycleClock>,
}

impl LifecycleController {
    pub fn new(api: Arc<dyn ManagementApi>, timings: LifecycleTimings) -> Self {
        Self {
            api,
            timings,
            clock: Mutex::new(LifecycleClock::default()),
        }
    }

    fn clock(&self) -> MutexGuard<'_, LifecycleClock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// In-path poll with the short timeout. `None` means state unknown.
    pub async fn poll(&self) -> Option<ServerState> {
        self.poll_with_timeout(POLL_TIMEOUT).await
    }

    pub async fn poll_with_timeout(&self, timeout: Duration) -> Option<ServerState> {
        match self.api.fetch_stats(timeout).await {
            Ok(stats) => Some(self.derive_state(stats)),
            Err(e) => {
                debug!("Stats poll failed: {}", e);
                None
            }
        }
    }

    pub fn derive_state(&self, stats: StatsSnapshot) -> ServerState {
        let now = Instant::now();
        let grace_passed = {
            let clock = self.clock();
            window_passed(clock.last_started_at, now, self.timings.startup_grace)
        };
        ServerState {
            running: stats.running,
            waiting_start: stats.waiting_start,
            players: stats.players,
            joinable: stats.running && !stats.waiting_start && grace_passed,
        }
    }

    /// Asks the backend to start unless a start was requested within the
    /// cooldown or the startup grace window is still open.
    ///
    /// Returns whether a start call went out and succeeded. The timestamps are
    /// claimed before the call so concurrent wakers see the window as taken;
    /// a failed call hands the window back so the next connection retries.
    pub async fn request_start(&self) -> bool {
        let now = Instant::now();
        let (prev_request, prev_started) = {
            let mut clock = self.clock();
            if !window_passed(clock.last_start_request, now, self.timings.start_cooldown)
                || !window_passed(clock.last_started_at, now, self.timings.startup_grace)
            {
                debug!("Start request suppressed by cooldown/grace window");
                return false;
            }
            let prev = (clock.last_start_request, clock.last_started_at);
            clock.last_start_request = Some(now);
            clock.last_started_at = Some(now);
            prev
        };

        info!("Requesting backend start");
        match self.api.start_server().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Start request failed: {}", e);
                let mut clock = self.clock();
                if clock.last_start_request == Some(now) {
                    clock.last_start_request = prev_request;
                }
                if clock.last_started_at == Some(now) {
                    clock.last_started_at = prev_started;
                }
                false
            }
        }
    }

    pub fn stop_cooldown_passed(&self) -> bool {
        let clock = self.clock();
        window_passed(clock.last_stop_request, Instant::now(), self.timings.stop_cooldown)
    }

    /// Asks the backend to stop if the stop cooldown allows it. Issuing
    /// resets the idle counter. Returns whether the stop call succeeded; a
    /// failure restores the cooldown stamp and the counter for the next tick.
    pub async fn request_stop(&self) -> bool {
        let now = Instant::now();
        let (prev_request, prev_empty) = {
            let mut clock = self.clock();
            if !window_passed(clock.last_stop_request, now, self.timings.stop_cooldown) {
                return false;
            }
            let prev = (clock.last_stop_request, clock.empty_minutes);
            clock.last_stop_request = Some(now);
            clock.empty_minutes = 0;
            prev
        };

        info!("Requesting backend stop");
        match self.api.stop_server().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Stop request failed: {}", e);
                let mut clock = self.clock();
                if clock.last_stop_request == Some(now) {
                    clock.last_stop_request = prev_request;
                    if clock.empty_minutes == 0 {
                        clock.empty_minutes = prev_empty;
                    }
                }
                false
            }
        }
    }

    /// Fresh re-check right before stopping: running, not starting, nobody on.
    pub async fn confirm_empty(&self) -> bool {
        match self.api.fetch_stats(BACKGROUND_POLL_TIMEOUT).await {
            Ok(stats) => stats.running && !stats.waiting_start && stats.players == 0,
            Err(e) => {
                debug!("Idle confirmation poll failed: {}", e);
                false
            }
        }
    }

    /// Counts one more idle interval and returns the new total.
    pub fn record_empty_tick(&self) -> u32 {
        let mut clock = self.clock();
        clock.empty_minutes += 1;
        clock.empty_minutes
    }

    pub fn reset_empty_minutes(&self) {
        self.clock().empty_minutes = 0;
    }

    pub fn empty_minutes(&self) -> u32 {
        self.clock().empty_minutes
    }
}
