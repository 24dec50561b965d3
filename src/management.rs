//! Client for the backend management API.
//!
//! The API is a remote service exposing `GET stats` and the
//! `action/start_server` / `action/stop_server` endpoints. It sits on a
//! private loopback address with a self-signed certificate.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use crate::config_loader::ProxyConfig;
use crate::error::{ConfigError, ManagementError};

/// Player-count field names, tried in order. The first one present wins.
const ONLINE_FIELDS: [&str; 3] = ["online", "online_players", "players"];

const ACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw view of the backend as reported by the stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub running: bool,
    pub waiting_start: bool,
    pub players: u32,
}

impl StatsSnapshot {
    /// Builds a snapshot from the `data` object of a stats response.
    pub fn from_data(data: &Value) -> Self {
        let flag = |key: &str| data.get(key).and_then(Value::as_bool).unwrap_or(false);
        StatsSnapshot {
            running: flag("running"),
            waiting_start: flag("waiting_start"),
            players: extract_online_players(data),
        }
    }
}

pub fn extract_online_players(data: &Value) -> u32 {
    let Some(object) = data.as_object() else {
        return 0;
    };
    ONLINE_FIELDS
        .iter()
        .find_map(|field| object.get(*field))
        .map(coerce_count)
        .unwrap_or(0)
}

fn coerce_count(value: &Value) -> u32 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0),
        Value::String(s) => s.trim().parse::<u32>().unwrap_or(0),
        Value::Bool(b) => u32::from(*b),
        _ => 0,
    }
}

#[async_trait]
pub trait ManagementApi: Send + Sync {
    async fn fetch_stats(&self, timeout: Duration) -> Result<StatsSnapshot, ManagementError>;
    async fn start_server(&self) -> Result<(), ManagementError>;
    async fn stop_server(&self) -> Result<(), ManagementError>;
}

/// HTTPS implementation talking to the real management service.
pub struct HttpManagementApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpManagementApi {
    pub fn new(config: &ProxyConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(ACTION_TIMEOUT)
            .build()
            .map_err(ConfigError::HttpClient)?;
        Ok(Self {
            client,
            base_url: config.api_base_url(),
            token: config.api_token.clone(),
        })
    }

    async fn post_action(&self, action: &str) -> Result<(), ManagementError> {
        let url = format!("{}/action/{}", self.base_url, action);
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ManagementError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl ManagementApi for HttpManagementApi {
    async fn fetch_stats(&self, timeout: Duration) -> Result<StatsSnapshot, ManagementError> {
        let url = format!("{}/stats", self.base_url);
        let request = async {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .timeout(timeout)
                .send()
                .await?;
            if response.status() != reqwest::StatusCode::OK {
                return Err(ManagementError::Status(response.status().as_u16()));
            }
            let body: Value = response.json().await?;
            Ok::<Value, ManagementError>(body)
        };
        let body = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| ManagementError::Timeout)??;
        // A body without `data` reads as an idle, stopped backend.
        let data = body.get("data").unwrap_or(&Value::Null);
        Ok(StatsSnapshot::from_data(data))
    }

    async fn start_server(&self) -> Result<(), ManagementError> {
        self.post_action("start_server").await
    }

    async fn stop_server(&self) -> Result<(), ManagementError> {
        self.post_action("stop_server").await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Scripted stand-in for the management service.
    ///
    /// `fetch_stats` pops queued answers first and falls back to `current`;
    /// `None` answers behave like an unreachable API.
    #[derive(Default)]
    pub struct FakeApi {
        pub current: Mutex<Option<StatsSnapshot>>,
        pub queued: Mutex<VecDeque<Option<StatsSnapshot>>>,
        pub start_calls: AtomicUsize,
        pub stop_calls: AtomicUsize,
        pub stats_calls: AtomicUsize,
        pub failing_starts: AtomicUsize,
        pub failing_stops: AtomicUsize,
    }

    impl FakeApi {
        pub fn with_stats(running: bool, waiting_start: bool, players: u32) -> Self {
            let api = FakeApi::default();
            api.set(Some(StatsSnapshot {
                running,
                waiting_start,
                players,
            }));
            api
        }

        pub fn set(&self, stats: Option<StatsSnapshot>) {
            *self.current.lock().unwrap() = stats;
        }

        pub fn queue(&self, stats: Option<StatsSnapshot>) {
            self.queued.lock().unwrap().push_back(stats);
        }

        /// The next `n` start calls are counted but answer with a timeout.
        pub fn fail_next_starts(&self, n: usize) {
            self.failing_starts.store(n, Ordering::SeqCst);
        }

        pub fn fail_next_stops(&self, n: usize) {
            self.failing_stops.store(n, Ordering::SeqCst);
        }

        pub fn starts(&self) -> usize {
            self.start_calls.load(Ordering::SeqCst)
        }

        pub fn stops(&self) -> usize {
            self.stop_calls.load(Ordering::SeqCst)
        }
    }

    fn take_failure(counter: &AtomicUsize) -> Result<(), ManagementError> {
        match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
            Ok(_) => Err(ManagementError::Timeout),
            Err(_) => Ok(()),
        }
    }

    #[async_trait]
    impl ManagementApi for FakeApi {
        async fn fetch_stats(&self, _timeout: Duration) -> Result<StatsSnapshot, ManagementError> {
            self.stats_calls.fetch_add(1, Ordering::SeqCst);
            let queued = self.queued.lock().unwrap().pop_front();
            let answer = match queued {
                Some(answer) => answer,
                None => *self.current.lock().unwrap(),
            };
            answer.ok_or(ManagementError::Status(503))
        }

        async fn start_server(&self) -> Result<(), ManagementError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            take_failure(&self.failing_starts)
        }

        async fn stop_server(&self) -> Result<(), ManagementError> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            take_failure(&self.failing_stops)
        }
    }
}
