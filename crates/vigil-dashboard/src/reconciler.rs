use crate::event::{ChannelEvent, ChannelId, DashboardEvent, PollEvent};
use tracing::{debug, info, warn};
use vigil_core::history::AlertHistory;
use vigil_core::{DetectionCounts, StreamFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

/// Everything the dashboard renders from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalView {
    pub frame: Option<StreamFrame>,
    pub counts: DetectionCounts,
    pub history: AlertHistory,
    pub connection: ConnectionState,
    pub disconnect_reason: Option<String>,
}

impl Default for CanonicalView {
    fn default() -> Self {
        Self {
            frame: None,
            counts: DetectionCounts::default(),
            history: AlertHistory::new(),
            connection: ConnectionState::Connecting,
            disconnect_reason: None,
        }
    }
}

/// Sole owner and mutator of the [`CanonicalView`].
///
/// Neither source carries sequence numbers, so every update is applied in the
/// order it reaches [`StateReconciler::apply`]. In particular a pushed frame
/// and a detection poll race for `counts`: whichever is applied last wins.
#[derive(Debug, Default)]
pub struct StateReconciler {
    view: CanonicalView,
    channel: Option<ChannelId>,
    torn_down: bool,
}

impl StateReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> &CanonicalView {
        &self.view
    }

    pub fn current_channel(&self) -> Option<ChannelId> {
        self.channel
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Binds the view to a fresh channel instance. Events from any other
    /// instance are ignored from here on.
    pub fn attach_channel(&mut self, channel: ChannelId) {
        if self.torn_down {
            return;
        }
        self.channel = Some(channel);
        self.view.connection = ConnectionState::Connecting;
    }

    /// After teardown every event is a no-op.
    pub fn tear_down(&mut self) {
        self.torn_down = true;
        self.channel = None;
    }

    /// Applies one event. Returns whether the view changed.
    pub fn apply(&mut self, event: DashboardEvent) -> bool {
        if self.torn_down {
            debug!(event = "late_event_ignored", kind = event.kind());
            return false;
        }
        match event {
            DashboardEvent::Channel { channel, event } => self.apply_channel(channel, event),
            DashboardEvent::Poll(event) => self.apply_poll(event),
        }
    }

    fn apply_channel(&mut self, channel: ChannelId, event: ChannelEvent) -> bool {
        if self.channel != Some(channel) {
            debug!(event = "stale_channel_event", channel = %channel);
            return false;
        }
        if self.view.connection == ConnectionState::Disconnected {
            return false;
        }
        match event {
            ChannelEvent::Opened => {
                if self.view.connection != ConnectionState::Connecting {
                    return false;
                }
                self.view.connection = ConnectionState::Connected;
                self.view.disconnect_reason = None;
                true
            }
            ChannelEvent::Frame { frame, counts } => {
                self.view.frame = Some(frame);
                self.view.counts = counts;
                true
            }
            ChannelEvent::Alert(alert) => {
                self.view.history = self.view.history.prepend(alert);
                true
            }
            ChannelEvent::Error(reason) => {
                warn!(event = "stream_disconnected", channel = %channel, error = %reason);
                self.view.connection = ConnectionState::Disconnected;
                self.view.disconnect_reason = Some(reason);
                true
            }
            ChannelEvent::Closed => {
                info!(event = "stream_disconnected", channel = %channel, reason = "closed");
                self.view.connection = ConnectionState::Disconnected;
                self.view.disconnect_reason = Some("closed by backend".to_string());
                true
            }
        }
    }

    fn apply_poll(&mut self, event: PollEvent) -> bool {
        match event {
            PollEvent::Counts(counts) => {
                let changed = self.view.counts != counts;
                self.view.counts = counts;
                changed
            }
            PollEvent::Alerts(alerts) => {
                let history = AlertHistory::replace(alerts);
                let changed = self.view.history != history;
                self.view.history = history;
                changed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use vigil_core::history::ALERT_HISTORY_CAP;
    use vigil_core::{Alert, ObjectType};

    const CH: ChannelId = ChannelId(1);

    fn ts(offset_secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_772_000_000 + offset_secs, 0)
            .single()
            .expect("valid timestamp")
    }

    fn alert(rule: &str, offset_secs: i64) -> Alert {
        Alert {
            rule_name: rule.to_string(),
            object_type: ObjectType::Vehicle,
            count: 2,
            timestamp: ts(offset_secs),
            message: None,
        }
    }

    fn frame_event(data: &str, counts: DetectionCounts) -> DashboardEvent {
        DashboardEvent::channel(
            CH,
            ChannelEvent::Frame {
                frame: StreamFrame::new(data.to_string(), ts(0)),
                counts,
            },
        )
    }

    fn connected() -> StateReconciler {
        let mut reconciler = StateReconciler::new();
        reconciler.attach_channel(CH);
        assert!(reconciler.apply(DashboardEvent::channel(CH, ChannelEvent::Opened)));
        reconciler
    }

    #[test]
    fn starts_empty_and_connecting() {
        let reconciler = StateReconciler::new();
        let view = reconciler.view();
        assert_eq!(view.frame, None);
        assert_eq!(view.counts, DetectionCounts::default());
        assert!(view.history.is_empty());
        assert_eq!(view.connection, ConnectionState::Connecting);
    }

    #[test]
    fn frame_replaces_frame_and_counts_together() {
        let mut reconciler = connected();
        reconciler.apply(DashboardEvent::Poll(PollEvent::Counts(DetectionCounts::new(9, 9, 9))));
        reconciler.apply(frame_event("img-1", DetectionCounts::new(2, 1, 0)));

        let view = reconciler.view();
        assert_eq!(view.frame.as_ref().map(|f| f.data.as_str()), Some("img-1"));
        assert_eq!(view.counts, DetectionCounts::new(2, 1, 0));
    }

    #[test]
    fn later_counts_win_in_either_order() {
        let pushed = DetectionCounts::new(2, 1, 0);
        let polled = DetectionCounts::new(3, 0, 1);

        let mut push_then_poll = connected();
        push_then_poll.apply(frame_event("img", pushed));
        push_then_poll.apply(DashboardEvent::Poll(PollEvent::Counts(polled)));
        assert_eq!(push_then_poll.view().counts, polled);
        assert!(push_then_poll.view().frame.is_some());

        let mut poll_then_push = connected();
        poll_then_push.apply(DashboardEvent::Poll(PollEvent::Counts(polled)));
        poll_then_push.apply(frame_event("img", pushed));
        assert_eq!(poll_then_push.view().counts, pushed);
    }

    #[test]
    fn pushed_alerts_prepend_and_polled_alerts_replace() {
        let mut reconciler = connected();
        for idx in 0..15 {
            reconciler.apply(DashboardEvent::channel(CH, ChannelEvent::Alert(alert("push", idx))));
        }
        assert_eq!(reconciler.view().history.len(), ALERT_HISTORY_CAP);
        assert_eq!(
            reconciler.view().history.newest().map(|a| a.timestamp),
            Some(ts(14))
        );

        let snapshot = vec![alert("poll-a", 50), alert("poll-b", 40)];
        assert!(reconciler.apply(DashboardEvent::Poll(PollEvent::Alerts(snapshot.clone()))));
        let names: Vec<&str> = reconciler
            .view()
            .history
            .iter()
            .map(|a| a.rule_name.as_str())
            .collect();
        assert_eq!(names, vec!["poll-a", "poll-b"]);

        assert!(!reconciler.apply(DashboardEvent::Poll(PollEvent::Alerts(snapshot))));
    }

    #[test]
    fn close_disconnects_but_polls_keep_applying() {
        let mut reconciler = connected();
        reconciler.apply(DashboardEvent::channel(CH, ChannelEvent::Closed));
        assert_eq!(reconciler.view().connection, ConnectionState::Disconnected);

        assert!(reconciler.apply(DashboardEvent::Poll(PollEvent::Counts(DetectionCounts::new(
            1, 2, 3
        )))));
        assert!(reconciler.apply(DashboardEvent::Poll(PollEvent::Alerts(vec![alert("x", 1)]))));
        assert_eq!(reconciler.view().counts, DetectionCounts::new(1, 2, 3));
        assert_eq!(reconciler.view().connection, ConnectionState::Disconnected);
    }

    #[test]
    fn disconnected_is_terminal_for_a_channel_instance() {
        let mut reconciler = connected();
        reconciler.apply(DashboardEvent::channel(CH, ChannelEvent::Error("reset".to_string())));
        assert_eq!(reconciler.view().disconnect_reason.as_deref(), Some("reset"));

        assert!(!reconciler.apply(DashboardEvent::channel(CH, ChannelEvent::Opened)));
        assert!(!reconciler.apply(frame_event("late", DetectionCounts::new(5, 5, 5))));
        assert_eq!(reconciler.view().connection, ConnectionState::Disconnected);
        assert_eq!(reconciler.view().frame, None);

        let next = CH.next();
        reconciler.attach_channel(next);
        assert_eq!(reconciler.view().connection, ConnectionState::Connecting);
        assert!(reconciler.apply(DashboardEvent::channel(next, ChannelEvent::Opened)));
        assert_eq!(reconciler.view().connection, ConnectionState::Connected);
        assert_eq!(reconciler.view().disconnect_reason, None);
    }

    #[test]
    fn events_from_an_old_channel_are_ignored() {
        let mut reconciler = connected();
        reconciler.attach_channel(ChannelId(2));
        assert!(!reconciler.apply(frame_event("stale", DetectionCounts::new(4, 4, 4))));
        assert!(!reconciler.apply(DashboardEvent::channel(CH, ChannelEvent::Closed)));
        assert_eq!(reconciler.view().connection, ConnectionState::Connecting);
    }

    #[test]
    fn nothing_mutates_after_teardown() {
        let mut reconciler = connected();
        reconciler.apply(frame_event("img", DetectionCounts::new(1, 0, 0)));
        let before = reconciler.view().clone();
        reconciler.tear_down();

        let late = [
            frame_event("late", DetectionCounts::new(7, 7, 7)),
            DashboardEvent::channel(CH, ChannelEvent::Alert(alert("late", 9))),
            DashboardEvent::channel(CH, ChannelEvent::Closed),
            DashboardEvent::Poll(PollEvent::Counts(DetectionCounts::new(8, 8, 8))),
            DashboardEvent::Poll(PollEvent::Alerts(vec![alert("late", 10)])),
        ];
        for event in late {
            assert!(!reconciler.apply(event));
        }
        reconciler.attach_channel(ChannelId(9));
        assert_eq!(reconciler.view(), &before);
    }
}
