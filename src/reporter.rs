//! Relays this device's own position to the server, at most once per
//! threshold.
//!
//! The gate looks at the time a sample is accepted, not the sample's own
//! timestamp. Dropped samples are gone: there is no queue and no coalescing.
//! Uploads are fire-and-forget and never hold back the next sample.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::{LocationUpload, Upload};
use crate::error::{Error, Result};
use crate::sensor::{PositionFix, PositionSource, SensorEvent, WatchOptions};

/// Default minimum spacing between uploads, shared with fleet polling.
pub const DEFAULT_THRESHOLD: Duration = Duration::from_millis(5_000);

/// A fix tagged with the vehicle it is reported for.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionSample {
    pub vehicle_id: CompactString,
    pub lat: f64,
    pub lng: f64,
    pub speed_mps: Option<f64>,
    pub heading_deg: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PositionSample {
    pub fn from_fix(vehicle_id: &str, fix: &PositionFix) -> Self {
        Self {
            vehicle_id: CompactString::from(vehicle_id),
            lat: fix.position.lat,
            lng: fix.position.lng,
            speed_mps: fix.speed_mps,
            heading_deg: fix.heading_deg,
            timestamp: fix.timestamp,
        }
    }

    /// Missing speed or heading goes out as 0.
    pub fn to_upload(&self) -> LocationUpload {
        LocationUpload {
            bus_id: self.vehicle_id.to_string(),
            latitude: self.lat,
            longitude: self.lng,
            speed: self.speed_mps.filter(|s| s.is_finite()).unwrap_or(0.0),
            heading: self.heading_deg.filter(|h| h.is_finite()).unwrap_or(0.0),
        }
    }
}

/// Time gate: admits an event only if at least `threshold` has passed since
/// the last admitted one.
#[derive(Clone, Copy, Debug)]
pub struct Throttle {
    threshold: Duration,
    last_accepted: Option<Instant>,
}

impl Throttle {
    pub const fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_accepted: None,
        }
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted
            && now.saturating_duration_since(last) < self.threshold
        {
            return false;
        }
        self.last_accepted = Some(now);
        true
    }

    pub const fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }
}

pub struct ThrottledReporter {
    source: Arc<dyn PositionSource>,
    uploader: Arc<dyn Upload>,
    // shared by every watch this reporter starts
    throttle: Arc<Mutex<Throttle>>,
    watch: Option<JoinHandle<()>>,
}

impl ThrottledReporter {
    pub fn new(source: Arc<dyn PositionSource>, uploader: Arc<dyn Upload>, threshold: Duration) -> Self {
        Self {
            source,
            uploader,
            throttle: Arc::new(Mutex::new(Throttle::new(threshold))),
            watch: None,
        }
    }

    pub const fn is_watching(&self) -> bool {
        self.watch.is_some()
    }

    /// Subscribes to the position source and starts forwarding samples for
    /// `vehicle_id` to `endpoint`. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// `CapabilityUnavailable` if the source cannot watch, `AlreadyWatching`
    /// if a watch is already running. The reporter stays as it was.
    pub fn start(&mut self, endpoint: impl Into<String>, vehicle_id: &str) -> Result<()> {
        if self.is_watching() {
            return Err(Error::AlreadyWatching);
        }

        let mut subscription = self.source.watch(&WatchOptions::default())?;

        let endpoint: Arc<str> = Arc::from(endpoint.into());
        let vehicle_id = CompactString::from(vehicle_id);
        let uploader = Arc::clone(&self.uploader);
        let throttle = Arc::clone(&self.throttle);

        tracing::info!(%endpoint, vehicle = %vehicle_id, "location reporting started");

        let task = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                match event {
                    SensorEvent::Fix(fix) => {
                        let admitted = throttle
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .admit(Instant::now());
                        if !admitted {
                            tracing::trace!(vehicle = %vehicle_id, "sample inside threshold, dropped");
                            continue;
                        }
                        let sample = PositionSample::from_fix(&vehicle_id, &fix);
                        forward(Arc::clone(&uploader), Arc::clone(&endpoint), &sample);
                    }
                    SensorEvent::Failure(err) => {
                        tracing::warn!(vehicle = %vehicle_id, code = err.code(), "position sensor: {err}");
                    }
                }
            }
            tracing::debug!(vehicle = %vehicle_id, "position stream ended");
        });

        self.watch = Some(task);
        Ok(())
    }

    /// Cancels the subscription. Uploads already sent are left to finish.
    pub fn stop(&mut self) {
        if let Some(task) = self.watch.take() {
            task.abort();
            tracing::info!("location reporting stopped");
        }
    }
}

impl Drop for ThrottledReporter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn forward(uploader: Arc<dyn Upload>, endpoint: Arc<str>, sample: &PositionSample) {
    let payload = sample.to_upload();
    tokio::spawn(async move {
        match uploader.upload(&endpoint, &payload).await {
            Ok(ack) => tracing::debug!(bus = %payload.bus_id, %ack, "location updated"),
            Err(e) => tracing::warn!(bus = %payload.bus_id, code = e.code(), "location upload failed: {e}"),
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    use super::*;
    use crate::error::SensorError;
    use crate::geo::LatLng;
    use crate::sensor::{NoPositionSource, Subscription};

    /// Hands out one channel per watch; the test keeps the sending side.
    #[derive(Default)]
    struct ManualSource {
        senders: Mutex<Vec<mpsc::Sender<SensorEvent>>>,
        cancelled: Arc<AtomicUsize>,
    }

    impl ManualSource {
        fn sender(&self) -> mpsc::Sender<SensorEvent> {
            self.senders.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl PositionSource for ManualSource {
        fn watch(&self, options: &WatchOptions) -> Result<Subscription> {
            assert!(options.high_accuracy);
            assert_eq!(options.maximum_age, Duration::ZERO);

            let (tx, rx) = mpsc::channel(16);
            self.senders.lock().unwrap().push(tx);
            let cancelled = Arc::clone(&self.cancelled);
            Ok(Subscription::new(rx, move || {
                cancelled.fetch_add(1, Ordering::SeqCst);
            }))
        }
    }

    #[derive(Default)]
    struct RecordingUpload {
        uploads: Mutex<Vec<LocationUpload>>,
        fail: bool,
    }

    impl RecordingUpload {
        fn count(&self) -> usize {
            self.uploads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Upload for RecordingUpload {
        async fn upload(&self, _endpoint: &str, payload: &LocationUpload) -> Result<Value> {
            self.uploads.lock().unwrap().push(payload.clone());
            if self.fail {
                return Err(Error::NetworkFailure("503 Service Unavailable".to_string()));
            }
            Ok(json!({"status": "success"}))
        }
    }

    fn fix(lat: f64, lng: f64) -> SensorEvent {
        SensorEvent::Fix(PositionFix {
            position: LatLng::new(lat, lng),
            speed_mps: Some(8.0),
            heading_deg: None,
            timestamp: Utc::now(),
        })
    }

    fn reporter(upload: RecordingUpload) -> (ThrottledReporter, Arc<ManualSource>, Arc<RecordingUpload>) {
        let source = Arc::new(ManualSource::default());
        let upload = Arc::new(upload);
        let reporter = ThrottledReporter::new(source.clone(), upload.clone(), DEFAULT_THRESHOLD);
        (reporter, source, upload)
    }

    #[test]
    fn throttle_gates_on_acceptance_time() {
        let mut throttle = Throttle::new(Duration::from_millis(5_000));
        let t0 = Instant::now();

        assert!(throttle.admit(t0));
        assert!(!throttle.admit(t0 + Duration::from_millis(1_000)));
        assert!(!throttle.admit(t0 + Duration::from_millis(4_999)));
        assert!(throttle.admit(t0 + Duration::from_millis(5_001)));
        assert_eq!(throttle.last_accepted(), Some(t0 + Duration::from_millis(5_001)));

        // exactly on the threshold is allowed through
        assert!(throttle.admit(t0 + Duration::from_millis(10_001)));
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_one_sample_per_threshold() {
        let (mut reporter, source, upload) = reporter(RecordingUpload::default());
        reporter.start("http://api/location", "12").unwrap();
        let tx = source.sender();

        tx.send(fix(23.0, 90.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        tx.send(fix(23.1, 90.1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(4_001)).await;
        tx.send(fix(23.2, 90.2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let uploads = upload.uploads.lock().unwrap().clone();
        assert_eq!(
            uploads,
            vec![
                LocationUpload {
                    bus_id: "12".to_string(),
                    latitude: 23.0,
                    longitude: 90.0,
                    speed: 8.0,
                    heading: 0.0,
                },
                LocationUpload {
                    bus_id: "12".to_string(),
                    latitude: 23.2,
                    longitude: 90.2,
                    speed: 8.0,
                    heading: 0.0,
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn burst_keeps_only_the_first_sample() {
        let (mut reporter, source, upload) = reporter(RecordingUpload::default());
        reporter.start("http://api/location", "12").unwrap();
        let tx = source.sender();

        for i in 0..5 {
            tx.send(fix(23.0 + f64::from(i) * 0.001, 90.0)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let uploads = upload.uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].latitude, 23.0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_uploads_do_not_reopen_the_gate() {
        let (mut reporter, source, upload) = reporter(RecordingUpload {
            fail: true,
            ..RecordingUpload::default()
        });
        reporter.start("http://api/location", "12").unwrap();
        let tx = source.sender();

        tx.send(fix(23.0, 90.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(fix(23.0, 90.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(upload.count(), 1);
        assert!(reporter.is_watching());
    }

    #[tokio::test(start_paused = true)]
    async fn sensor_failures_leave_the_watch_running() {
        let (mut reporter, source, upload) = reporter(RecordingUpload::default());
        reporter.start("http://api/location", "12").unwrap();
        let tx = source.sender();

        for err in [
            SensorError::PermissionDenied,
            SensorError::PositionUnavailable,
            SensorError::Timeout,
            SensorError::Unknown,
        ] {
            tx.send(SensorEvent::Failure(err)).await.unwrap();
        }
        tx.send(fix(23.0, 90.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(reporter.is_watching());
        assert_eq!(upload.count(), 1);
        assert_eq!(source.cancelled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_subscription_and_is_idempotent() {
        let (mut reporter, source, upload) = reporter(RecordingUpload::default());
        reporter.start("http://api/location", "12").unwrap();
        let tx = source.sender();
        tx.send(fix(23.0, 90.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        reporter.stop();
        reporter.stop();
        assert!(!reporter.is_watching());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.cancelled.load(Ordering::SeqCst), 1);
        assert!(tx.send(fix(23.1, 90.1)).await.is_err());
        assert_eq!(upload.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_keeps_the_gate() {
        let (mut reporter, source, upload) = reporter(RecordingUpload::default());
        reporter.start("http://api/location", "12").unwrap();
        source.sender().send(fix(23.0, 90.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        reporter.stop();
        reporter.start("http://api/location", "12").unwrap();
        source.sender().send(fix(23.0, 90.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(upload.count(), 1);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let (mut reporter, _source, _upload) = reporter(RecordingUpload::default());
        reporter.start("http://api/location", "12").unwrap();

        let err = reporter.start("http://api/location", "12").unwrap_err();
        assert_eq!(err.code(), "already_watching");
        assert!(reporter.is_watching());
    }

    #[tokio::test]
    async fn missing_capability_leaves_reporter_idle() {
        let mut reporter = ThrottledReporter::new(
            Arc::new(NoPositionSource),
            Arc::new(RecordingUpload::default()),
            DEFAULT_THRESHOLD,
        );

        let err = reporter.start("http://api/location", "12").unwrap_err();
        assert_eq!(err.code(), "capability_unavailable");
        assert!(!reporter.is_watching());
    }

    #[test]
    fn upload_defaults_missing_speed_and_heading() {
        let sample = PositionSample {
            vehicle_id: "4".into(),
            lat: 1.0,
            lng: 2.0,
            speed_mps: None,
            heading_deg: Some(f64::NAN),
            timestamp: Utc::now(),
        };

        let upload = sample.to_upload();
        assert_eq!(upload.speed, 0.0);
        assert_eq!(upload.heading, 0.0);
    }
}
