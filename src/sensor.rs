//! Device position streams.
//!
//! A [`PositionSource`] hands out a [`Subscription`]: a receiver of
//! [`SensorEvent`]s plus a cancel hook that runs when the subscription is
//! dropped or cancelled.

use std::f64::consts::TAU;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::{Result, SensorError};
use crate::geo::{self, LatLng};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    /// Oldest cached fix the source may hand out. Zero means always fresh.
    pub maximum_age: Duration,
    pub timeout: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            maximum_age: Duration::ZERO,
            timeout: Duration::from_secs(5),
        }
    }
}

/// One reading from the device.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionFix {
    pub position: LatLng,
    pub speed_mps: Option<f64>,
    pub heading_deg: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SensorEvent {
    Fix(PositionFix),
    Failure(SensorError),
}

pub struct Subscription {
    events: mpsc::Receiver<SensorEvent>,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<SensorEvent>, on_cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            events,
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    /// Next event, or `None` once the source has gone away.
    pub async fn next(&mut self) -> Option<SensorEvent> {
        self.events.recv().await
    }

    pub fn cancel(&mut self) {
        self.events.close();
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub trait PositionSource: Send + Sync {
    /// Starts a continuous watch.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityUnavailable` when the device cannot report positions.
    fn watch(&self, options: &WatchOptions) -> Result<Subscription>;
}

/// Closed polygon approximating a circle of `radius_deg` around `center`.
/// The first point is repeated at the end.
pub fn circular_path(center: LatLng, radius_deg: f64, points: usize) -> Vec<LatLng> {
    let points = points.max(3);
    (0..=points)
        .map(|i| {
            let angle = (i as f64 / points as f64) * TAU;
            LatLng::new(
                center.lat + radius_deg * angle.cos(),
                center.lng + radius_deg * angle.sin(),
            )
        })
        .collect()
}

/// Position along a looping path.
#[derive(Clone, Debug)]
pub struct PathWalker {
    path: Vec<LatLng>,
    segment: usize,
    // distance already covered on the current segment
    progress_km: f64,
}

impl PathWalker {
    pub fn new(path: Vec<LatLng>) -> Self {
        Self {
            path,
            segment: 0,
            progress_km: 0.0,
        }
    }

    pub fn position(&self) -> Option<(LatLng, f64)> {
        let from = *self.path.get(self.segment)?;
        let Some(to) = self.path.get(self.segment + 1).copied() else {
            return Some((from, 0.0));
        };

        let length = from.distance_km(&to);
        let t = if length > 0.0 {
            (self.progress_km / length).min(1.0)
        } else {
            0.0
        };
        let here = LatLng::new(
            from.lat + (to.lat - from.lat) * t,
            from.lng + (to.lng - from.lng) * t,
        );
        Some((here, geo::bearing_deg(&from, &to)))
    }

    /// Moves `distance_km` forward, wrapping to the start at the end of the
    /// path. Returns the new position and heading. Negative or non-finite
    /// steps leave the walker where it is.
    pub fn advance(&mut self, distance_km: f64) -> Option<(LatLng, f64)> {
        if self.path.len() < 2 || !distance_km.is_finite() || distance_km < 0.0 {
            return self.position();
        }

        let total: f64 = self.path.windows(2).map(|w| w[0].distance_km(&w[1])).sum();
        if total <= 0.0 {
            return self.position();
        }

        let mut remaining = self.progress_km + distance_km % total;
        loop {
            let length = self.path[self.segment].distance_km(&self.path[self.segment + 1]);
            if remaining < length {
                self.progress_km = remaining;
                break;
            }
            remaining -= length;
            self.segment = (self.segment + 1) % (self.path.len() - 1);
        }
        self.position()
    }
}

/// Emits fixes along a loop at a steady speed, standing in for a device
/// sensor when none is attached.
#[derive(Clone, Debug)]
pub struct SimulatedSource {
    path: Vec<LatLng>,
    speed_kmh: f64,
    period: Duration,
}

impl SimulatedSource {
    pub fn new(path: Vec<LatLng>, speed_kmh: f64, period: Duration) -> Self {
        Self {
            path,
            speed_kmh,
            period,
        }
    }
}

impl PositionSource for SimulatedSource {
    fn watch(&self, options: &WatchOptions) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(16);
        let mut walker = PathWalker::new(self.path.clone());
        let period = self.period.max(crate::poller::MIN_INTERVAL);
        let step_km = self.speed_kmh * period.as_secs_f64() / 3600.0;
        let speed_mps = self.speed_kmh / 3.6;

        tracing::debug!(
            high_accuracy = options.high_accuracy,
            period_ms = period.as_millis() as u64,
            "starting simulated position watch"
        );

        let producer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut first = true;
            loop {
                ticker.tick().await;
                let next = if first {
                    first = false;
                    walker.position()
                } else {
                    walker.advance(step_km)
                };
                let event = match next {
                    Some((position, heading)) => SensorEvent::Fix(PositionFix {
                        position,
                        speed_mps: Some(speed_mps),
                        heading_deg: Some(heading),
                        timestamp: Utc::now(),
                    }),
                    None => SensorEvent::Failure(SensorError::PositionUnavailable),
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, move || producer.abort()))
    }
}

/// Source for hosts without any positioning hardware.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPositionSource;

impl PositionSource for NoPositionSource {
    fn watch(&self, _options: &WatchOptions) -> Result<Subscription> {
        Err(crate::error::Error::CapabilityUnavailable)
    }
}
