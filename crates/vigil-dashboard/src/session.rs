use crate::connection::Connection;
use crate::event::{ChannelEvent, ChannelId, DashboardEvent};
use crate::poller::{PollSchedule, PollScheduler, SnapshotSource};
use crate::reconciler::{CanonicalView, ConnectionState, StateReconciler};
use crate::view::{project, DashboardView};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::info;
use url::Url;

const EVENT_QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub stream_url: Url,
    pub schedule: PollSchedule,
    pub reconnect: Option<ReconnectPolicy>,
}

/// One activation window of the live dashboard.
///
/// Activation opens the push channel and starts both polls; every source
/// reports into a single queue drained by [`DashboardSession::recv`], and only
/// [`DashboardSession::apply`] touches the canonical view. Deactivation (or
/// drop) closes the channel, cancels the polls and turns later events into
/// no-ops.
pub struct DashboardSession {
    reconciler: StateReconciler,
    connection: Option<Connection>,
    polls: PollScheduler,
    events: mpsc::Receiver<DashboardEvent>,
    events_tx: mpsc::Sender<DashboardEvent>,
    pending: Option<DashboardEvent>,
    stream_url: Url,
    reconnect: Option<ReconnectPolicy>,
    backoff: Duration,
    reconnect_at: Option<Instant>,
    active: bool,
}

impl DashboardSession {
    /// Must be called from inside a tokio runtime.
    pub fn activate<S: SnapshotSource>(config: SessionConfig, source: Arc<S>) -> Self {
        let (events_tx, events) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let mut reconciler = StateReconciler::new();
        let channel = ChannelId(1);
        reconciler.attach_channel(channel);
        let connection = Connection::open(channel, config.stream_url.clone(), events_tx.clone());
        let polls = PollScheduler::start(source, config.schedule, events_tx.clone());
        info!(
            event = "dashboard_activated",
            stream_url = %config.stream_url,
            reconnect = config.reconnect.is_some()
        );
        Self {
            reconciler,
            connection: Some(connection),
            polls,
            events,
            events_tx,
            pending: None,
            stream_url: config.stream_url,
            backoff: config.reconnect.map(|policy| policy.initial).unwrap_or_default(),
            reconnect: config.reconnect,
            reconnect_at: None,
            active: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Next event from either source, or `None` once deactivated. Also opens
    /// the replacement channel when a reconnect is due.
    pub async fn recv(&mut self) -> Option<DashboardEvent> {
        loop {
            if !self.active {
                return None;
            }
            if let Some(event) = self.pending.take() {
                return Some(self.coalesce(event));
            }
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                event = self.events.recv() => return event.map(|event| self.coalesce(event)),
                _ = sleep_until_opt(reconnect_at) => self.reopen(),
            }
        }
    }

    /// Collapses a run of queued frames from one channel into the newest, so
    /// a slow reader holds at most one frame it has not applied yet. The first
    /// event that breaks the run is kept for the next `recv`.
    fn coalesce(&mut self, mut event: DashboardEvent) -> DashboardEvent {
        loop {
            let channel = match event {
                DashboardEvent::Channel {
                    channel,
                    event: ChannelEvent::Frame { .. },
                } => channel,
                _ => return event,
            };
            match self.events.try_recv() {
                Ok(next) if is_frame_from(&next, channel) => event = next,
                Ok(next) => {
                    self.pending = Some(next);
                    return event;
                }
                Err(_) => return event,
            }
        }
    }

    /// Applies an event to the canonical view. Returns whether it changed.
    pub fn apply(&mut self, event: DashboardEvent) -> bool {
        if !self.active {
            return false;
        }
        let changed = self.reconciler.apply(event);
        self.track_connection();
        changed
    }

    pub fn view(&self) -> DashboardView<'_> {
        project(self.reconciler.view())
    }

    pub fn canonical(&self) -> &CanonicalView {
        self.reconciler.view()
    }

    pub fn current_channel(&self) -> Option<ChannelId> {
        self.reconciler.current_channel()
    }

    /// Releases the channel and both timers. Idempotent.
    pub fn deactivate(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        self.polls.cancel();
        self.reconnect_at = None;
        self.pending = None;
        self.events.close();
        self.reconciler.tear_down();
        info!(event = "dashboard_deactivated");
    }

    /// Like [`DashboardSession::deactivate`], but also waits for the channel to
    /// finish its close handshake.
    pub async fn shutdown(mut self) {
        let connection = self.connection.take();
        self.deactivate();
        if let Some(connection) = connection {
            connection.shutdown().await;
        }
    }

    fn track_connection(&mut self) {
        let Some(policy) = self.reconnect else {
            return;
        };
        match self.reconciler.view().connection {
            ConnectionState::Connected => {
                self.backoff = policy.initial;
            }
            ConnectionState::Disconnected if self.reconnect_at.is_none() => {
                let delay = self.backoff;
                self.reconnect_at = Some(Instant::now() + delay);
                self.backoff = next_backoff(delay, policy.max);
                info!(event = "stream_reconnect_scheduled", delay_ms = delay.as_millis() as u64);
            }
            _ => {}
        }
    }

    fn reopen(&mut self) {
        self.reconnect_at = None;
        if let Some(mut previous) = self.connection.take() {
            previous.close();
        }
        let channel = self
            .reconciler
            .current_channel()
            .map(ChannelId::next)
            .unwrap_or(ChannelId(1));
        self.reconciler.attach_channel(channel);
        self.connection = Some(Connection::open(
            channel,
            self.stream_url.clone(),
            self.events_tx.clone(),
        ));
    }
}

impl Drop for DashboardSession {
    fn drop(&mut self) {
        self.deactivate();
    }
}

fn is_frame_from(event: &DashboardEvent, channel: ChannelId) -> bool {
    matches!(
        event,
        DashboardEvent::Channel {
            channel: from,
            event: ChannelEvent::Frame { .. },
        } if *from == channel
    )
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    let next = current + current;
    if next > max {
        max
    } else {
        next
    }
}
