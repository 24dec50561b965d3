use std::sync::Arc;

use log::{info, warn};
use tokio::time::{sleep, Duration};

use crate::lifecycle::{LifecycleController, BACKGROUND_POLL_TIMEOUT};

pub const MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Last state the monitor logged; a line is only emitted when it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observed {
    Empty(u32),
    Players(u32),
}

/// What a single tick concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    PollFailed,
    NotJoinable,
    Occupied(u32),
    Idle(u32),
    Stopped,
    FalseAlarm,
}

pub struct IdleMonitor {
    lifecycle: Arc<LifecycleController>,
    idle_threshold: u32,
    last_observed: Option<Observed>,
    was_joinable: bool,
}

impl IdleMonitor {
    pub fn new(lifecycle: Arc<LifecycleController>, idle_threshold: u32) -> Self {
        Self {
            lifecycle,
            idle_threshold,
            last_observed: None,
            was_joinable: false,
        }
    }

    /// Ticks forever on [`MONITOR_INTERVAL`].
    pub async fn run(mut self) {
        info!(
            "[Monitor] Checking management API every {}s...",
            MONITOR_INTERVAL.as_secs()
        );
        loop {
            sleep(MONITOR_INTERVAL).await;
            self.tick().await;
        }
    }

    fn observe(&mut self, observed: Observed) {
        if self.last_observed == Some(observed) {
            return;
        }
        match observed {
            Observed::Empty(minutes) => info!(
                "[Monitor] Empty: {}/{} min.",
                minutes, self.idle_threshold
            ),
            Observed::Players(players) => {
                info!("[Monitor] Players: {}. Resetting timer.", players)
            }
        }
        self.last_observed = Some(observed);
    }

    pub async fn tick(&mut self) -> TickOutcome {
        let Some(state) = self.lifecycle.poll_with_timeout(BACKGROUND_POLL_TIMEOUT).await else {
            warn!("[Monitor] Unable to fetch server stats");
            return TickOutcome::PollFailed;
        };

        if !state.joinable {
            // Starting or offline time never counts as idle; leaving the
            // joinable state throws away whatever had accrued.
            if self.was_joinable {
                self.lifecycle.reset_empty_minutes();
            }
            self.was_joinable = false;
            return TickOutcome::NotJoinable;
        }
        self.was_joinable = true;

        if state.players > 0 {
            self.observe(Observed::Players(state.players));
            self.lifecycle.reset_empty_minutes();
            return TickOutcome::Occupied(state.players);
        }

        let empty_minutes = self.lifecycle.record_empty_tick();
        self.observe(Observed::Empty(empty_minutes));
        if empty_minutes < self.idle_threshold || !self.lifecycle.stop_cooldown_passed() {
            return TickOutcome::Idle(empty_minutes);
        }

        if !self.lifecycle.confirm_empty().await {
            info!("[Monitor] Backend no longer idle, keeping it up.");
            self.lifecycle.reset_empty_minutes();
            return TickOutcome::FalseAlarm;
        }

        info!("[Monitor] Stopping server...");
        if self.lifecycle.request_stop().await {
            TickOutcome::Stopped
        } else {
            TickOutcome::Idle(empty_minutes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleTimings;
    use crate::management::testing::FakeApi;
    use crate::management::StatsSnapshot;

    const THRESHOLD: u32 = 3;

    fn setup(api: &Arc<FakeApi>) -> (Arc<LifecycleController>, IdleMonitor) {
        let lifecycle = Arc::new(LifecycleController::new(
            api.clone(),
            LifecycleTimings {
                start_cooldown: Duration::from_secs(120),
                stop_cooldown: Duration::from_secs(120),
                startup_grace: Duration::from_secs(180),
            },
        ));
        let monitor = IdleMonitor::new(lifecycle.clone(), THRESHOLD);
        (lifecycle, monitor)
    }

    fn stats(running: bool, waiting_start: bool, players: u32) -> Option<StatsSnapshot> {
        Some(StatsSnapshot {
            running,
            waiting_start,
            players,
        })
    }

    #[tokio::test]
    async fn confirmed_idle_backend_is_stopped_once() {
        let api = Arc::new(FakeApi::with_stats(true, false, 0));
        let (lifecycle, mut monitor) = setup(&api);

        assert_eq!(monitor.tick().await, TickOutcome::Idle(1));
        assert_eq!(monitor.tick().await, TickOutcome::Idle(2));
        assert_eq!(monitor.tick().await, TickOutcome::Stopped);
        assert_eq!(api.stops(), 1);
        assert_eq!(lifecycle.empty_minutes(), 0);

        // The stop cooldown keeps further ticks from stopping again.
        for _ in 0..5 {
            monitor.tick().await;
        }
        assert_eq!(api.stops(), 1);
    }

    #[tokio::test]
    async fn failed_confirmation_resets_without_stopping() {
        let api = Arc::new(FakeApi::with_stats(true, false, 0));
        let (lifecycle, mut monitor) = setup(&api);

        monitor.tick().await;
        monitor.tick().await;
        // Third tick's poll sees it empty, the confirmation sees a player.
        api.queue(stats(true, false, 0));
        api.queue(stats(true, false, 1));
        assert_eq!(monitor.tick().await, TickOutcome::FalseAlarm);
        assert_eq!(api.stops(), 0);
        assert_eq!(lifecycle.empty_minutes(), 0);
    }

    #[tokio::test]
    async fn players_reset_the_counter() {
        let api = Arc::new(FakeApi::with_stats(true, false, 0));
        let (lifecycle, mut monitor) = setup(&api);

        monitor.tick().await;
        monitor.tick().await;
        assert_eq!(lifecycle.empty_minutes(), 2);

        api.set(stats(true, false, 4));
        assert_eq!(monitor.tick().await, TickOutcome::Occupied(4));
        assert_eq!(lifecycle.empty_minutes(), 0);

        api.set(stats(true, false, 0));
        assert_eq!(monitor.tick().await, TickOutcome::Idle(1));
    }

    #[tokio::test]
    async fn offline_and_failed_polls_do_not_accrue() {
        let api = Arc::new(FakeApi::with_stats(false, false, 0));
        let (lifecycle, mut monitor) = setup(&api);

        assert_eq!(monitor.tick().await, TickOutcome::NotJoinable);
        api.set(None);
        assert_eq!(monitor.tick().await, TickOutcome::PollFailed);
        assert_eq!(lifecycle.empty_minutes(), 0);
        assert_eq!(api.stops(), 0);
    }

    #[tokio::test]
    async fn leaving_joinable_discards_accrued_idle_time() {
        let api = Arc::new(FakeApi::with_stats(true, false, 0));
        let (lifecycle, mut monitor) = setup(&api);

        monitor.tick().await;
        monitor.tick().await;
        api.set(stats(true, true, 0));
        assert_eq!(monitor.tick().await, TickOutcome::NotJoinable);
        assert_eq!(lifecycle.empty_minutes(), 0);

        api.set(stats(true, false, 0));
        assert_eq!(monitor.tick().await, TickOutcome::Idle(1));
    }

    #[tokio::test]
    async fn repeated_states_are_logged_once() {
        let api = Arc::new(FakeApi::with_stats(true, false, 2));
        let (_lifecycle, mut monitor) = setup(&api);
        monitor.tick().await;
        assert_eq!(monitor.last_observed, Some(Observed::Players(2)));
        monitor.tick().await;
        assert_eq!(monitor.last_observed, Some(Observed::Players(2)));
        api.set(stats(true, false, 0));
        monitor.tick().await;
        assert_eq!(monitor.last_observed, Some(Observed::Empty(1)));
    }
}
