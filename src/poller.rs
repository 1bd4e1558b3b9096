//! Fetch-and-apply on a fixed interval.
//!
//! Used for the fleet snapshot and for the notification feed. Each tick runs
//! its fetch as a separate task so a slow response never holds back the next
//! tick. Stopping cancels the schedule immediately; ticks already in flight
//! finish their fetch and then discard the result.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::client::Fetch;

type ApplyFn = dyn Fn(Vec<Value>) + Send + Sync;

/// Shortest schedule accepted; `tokio::time::interval` rejects zero.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub struct Poller {
    client: Arc<dyn Fetch>,
}

impl Poller {
    pub fn new(client: Arc<dyn Fetch>) -> Self {
        Self { client }
    }

    /// Fetches `endpoint` now and then every `interval`, handing each array
    /// response to `apply`. Must be called from within a tokio runtime.
    /// Intervals below [`MIN_INTERVAL`] are raised to it.
    pub fn start<F>(&self, endpoint: impl Into<String>, interval: Duration, apply: F) -> PollHandle
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        let endpoint: Arc<str> = Arc::from(endpoint.into());
        if interval < MIN_INTERVAL {
            tracing::warn!(%endpoint, interval_ms = interval.as_millis() as u64, "poll interval too short, using 1ms");
        }
        let interval = interval.max(MIN_INTERVAL);
        let apply: Arc<ApplyFn> = Arc::new(apply);
        let stopped = Arc::new(AtomicBool::new(false));
        let client = Arc::clone(&self.client);

        tracing::info!(%endpoint, interval_ms = interval.as_millis() as u64, "starting poller");

        let stopped_sched = Arc::clone(&stopped);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                // first tick completes immediately
                ticker.tick().await;
                if stopped_sched.load(Ordering::Acquire) {
                    break;
                }
                tokio::spawn(run_tick(
                    Arc::clone(&client),
                    Arc::clone(&endpoint),
                    Arc::clone(&apply),
                    Arc::clone(&stopped_sched),
                ));
            }
        });

        PollHandle {
            stopped,
            task: Some(task),
        }
    }
}

async fn run_tick(client: Arc<dyn Fetch>, endpoint: Arc<str>, apply: Arc<ApplyFn>, stopped: Arc<AtomicBool>) {
    let body = match client.fetch(&endpoint).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(%endpoint, code = e.code(), "poll failed: {e}");
            return;
        }
    };

    if stopped.load(Ordering::Acquire) {
        tracing::debug!(%endpoint, "poller stopped, discarding response");
        return;
    }

    match body {
        Value::Array(records) => apply(records),
        other => {
            tracing::warn!(%endpoint, "expected a JSON array, got {}", kind(&other));
        }
    }
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Running schedule. Dropping the handle stops it.
pub struct PollHandle {
    stopped: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::info!("poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
