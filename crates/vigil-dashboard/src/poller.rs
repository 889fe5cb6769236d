use crate::event::{DashboardEvent, PollEvent};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};
use vigil_core::api::{ApiError, BackendClient};
use vigil_core::{Alert, DetectionCounts};

pub const DETECTION_POLL_MS: u64 = 1000;
pub const ALERT_POLL_MS: u64 = 2000;
pub const DASHBOARD_ALERT_LIMIT: u32 = 10;

/// Where the two periodic snapshots come from.
pub trait SnapshotSource: Send + Sync + 'static {
    fn detections(&self) -> impl Future<Output = Result<DetectionCounts, ApiError>> + Send;

    fn alerts(&self, limit: u32) -> impl Future<Output = Result<Vec<Alert>, ApiError>> + Send;
}

impl SnapshotSource for BackendClient {
    async fn detections(&self) -> Result<DetectionCounts, ApiError> {
        BackendClient::detections(self).await
    }

    async fn alerts(&self, limit: u32) -> Result<Vec<Alert>, ApiError> {
        BackendClient::alerts(self, limit).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub detection_interval: Duration,
    pub alert_interval: Duration,
    pub alert_limit: u32,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            detection_interval: Duration::from_millis(DETECTION_POLL_MS),
            alert_interval: Duration::from_millis(ALERT_POLL_MS),
            alert_limit: DASHBOARD_ALERT_LIMIT,
        }
    }
}

/// The detection and alert polls, started together and cancelled together.
pub struct PollScheduler {
    cancel: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PollScheduler {
    pub fn start<S: SnapshotSource>(
        source: Arc<S>,
        schedule: PollSchedule,
        events: mpsc::Sender<DashboardEvent>,
    ) -> Self {
        let (cancel, cancelled) = watch::channel(false);

        let detection_source = source.clone();
        let detections = tokio::spawn(poll_loop(
            "detections",
            schedule.detection_interval,
            cancelled.clone(),
            events.clone(),
            move || {
                let source = detection_source.clone();
                async move { source.detections().await.map(PollEvent::Counts) }
            },
        ));

        let limit = schedule.alert_limit;
        let alerts = tokio::spawn(poll_loop(
            "alerts",
            schedule.alert_interval,
            cancelled,
            events,
            move || {
                let source = source.clone();
                async move { source.alerts(limit).await.map(PollEvent::Alerts) }
            },
        ));

        Self {
            cancel,
            tasks: vec![detections, alerts],
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Stops both polls. In-flight requests are dropped at their next await
    /// point; idempotent.
    pub fn cancel(&mut self) {
        if self.cancel.send_replace(true) {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        debug!(event = "polls_cancelled");
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn poll_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut cancelled: watch::Receiver<bool>,
    events: mpsc::Sender<DashboardEvent>,
    mut fetch: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollEvent, ApiError>>,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancelled.changed() => return,
            _ = ticker.tick() => {}
        }

        // A request never outlives its own tick.
        let result = tokio::select! {
            biased;
            _ = cancelled.changed() => return,
            result = tokio::time::timeout(period, fetch()) => result,
        };

        match result {
            Err(_) => {
                warn!(event = "poll_timeout", poll = name, timeout_ms = period.as_millis() as u64);
            }
            Ok(Ok(event)) => {
                if *cancelled.borrow() {
                    return;
                }
                if events.send(DashboardEvent::Poll(event)).await.is_err() {
                    debug!(event = "poll_receiver_gone", poll = name);
                    return;
                }
            }
            Ok(Err(err)) => {
                warn!(event = "poll_failed", poll = name, error = %err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedSource {
        detections: Mutex<VecDeque<Result<DetectionCounts, ApiError>>>,
        alerts: Mutex<VecDeque<Result<Vec<Alert>, ApiError>>>,
        detection_calls: AtomicUsize,
        alert_calls: AtomicUsize,
    }

    impl SnapshotSource for ScriptedSource {
        async fn detections(&self) -> Result<DetectionCounts, ApiError> {
            self.detection_calls.fetch_add(1, Ordering::SeqCst);
            self.detections
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or(Ok(DetectionCounts::default()))
        }

        async fn alerts(&self, limit: u32) -> Result<Vec<Alert>, ApiError> {
            assert_eq!(limit, DASHBOARD_ALERT_LIMIT);
            self.alert_calls.fetch_add(1, Ordering::SeqCst);
            self.alerts
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or(Ok(Vec::new()))
        }
    }

    fn rejected() -> ApiError {
        ApiError::Rejected("boom".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn failed_poll_does_not_stop_the_next_tick() {
        let source = Arc::new(ScriptedSource::default());
        source.detections.lock().expect("lock").extend([
            Err(rejected()),
            Ok(DetectionCounts::new(3, 0, 1)),
        ]);
        let (tx, mut rx) = mpsc::channel(16);
        let mut polls = PollScheduler::start(source.clone(), PollSchedule::default(), tx);

        let counts = tokio::time::timeout(Duration::from_millis(2_500), async {
            loop {
                match rx.recv().await {
                    Some(DashboardEvent::Poll(PollEvent::Counts(counts))) => return counts,
                    Some(_) => continue,
                    None => panic!("poll channel closed"),
                }
            }
        })
        .await
        .expect("counts in time");
        assert_eq!(counts, DetectionCounts::new(3, 0, 1));
        assert_eq!(source.detection_calls.load(Ordering::SeqCst), 2);
        polls.cancel();
    }

    /// First call hangs past its tick and then fails; later calls answer at once.
    #[derive(Default)]
    struct StallingSource {
        detection_calls: AtomicUsize,
    }

    impl SnapshotSource for StallingSource {
        async fn detections(&self) -> Result<DetectionCounts, ApiError> {
            if self.detection_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(3_500)).await;
                return Err(rejected());
            }
            Ok(DetectionCounts::new(1, 0, 0))
        }

        async fn alerts(&self, _limit: u32) -> Result<Vec<Alert>, ApiError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_request_does_not_push_back_later_ticks() {
        let source = Arc::new(StallingSource::default());
        let (tx, mut rx) = mpsc::channel(64);
        let mut polls = PollScheduler::start(source.clone(), PollSchedule::default(), tx);

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        polls.cancel();

        assert_eq!(source.detection_calls.load(Ordering::SeqCst), 5);
        let mut counts = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, DashboardEvent::Poll(PollEvent::Counts(_))) {
                counts += 1;
            }
        }
        assert_eq!(counts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_fire_on_their_own_intervals() {
        let source = Arc::new(ScriptedSource::default());
        let (tx, mut rx) = mpsc::channel(64);
        let mut polls = PollScheduler::start(source.clone(), PollSchedule::default(), tx);

        tokio::time::sleep(Duration::from_millis(4_100)).await;
        polls.cancel();

        let mut counts = 0;
        let mut alerts = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                DashboardEvent::Poll(PollEvent::Counts(_)) => counts += 1,
                DashboardEvent::Poll(PollEvent::Alerts(_)) => alerts += 1,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(counts, 4);
        assert_eq!(alerts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_fires_after_cancel() {
        let source = Arc::new(ScriptedSource::default());
        let (tx, mut rx) = mpsc::channel(64);
        let mut polls = PollScheduler::start(source.clone(), PollSchedule::default(), tx);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        polls.cancel();
        polls.cancel();
        assert!(polls.is_cancelled());
        while rx.try_recv().is_ok() {}
        let calls_at_cancel = source.detection_calls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(source.detection_calls.load(Ordering::SeqCst), calls_at_cancel);
        assert_eq!(source.alert_calls.load(Ordering::SeqCst), 0);
    }
}
