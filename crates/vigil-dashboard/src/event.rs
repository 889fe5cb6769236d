use std::fmt;
use vigil_core::{Alert, DetectionCounts, StreamFrame};

/// Identifies one push-channel instance. A reopened channel always gets a
/// fresh id, so events still queued from an earlier instance can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl ChannelId {
    pub fn next(self) -> Self {
        ChannelId(self.0 + 1)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Frame {
        frame: StreamFrame,
        counts: DetectionCounts,
    },
    Alert(Alert),
    Error(String),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    Counts(DetectionCounts),
    Alerts(Vec<Alert>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardEvent {
    Channel {
        channel: ChannelId,
        event: ChannelEvent,
    },
    Poll(PollEvent),
}

impl DashboardEvent {
    pub fn channel(channel: ChannelId, event: ChannelEvent) -> Self {
        DashboardEvent::Channel { channel, event }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DashboardEvent::Channel { event, .. } => match event {
                ChannelEvent::Opened => "channel_opened",
                ChannelEvent::Frame { .. } => "channel_frame",
                ChannelEvent::Alert(_) => "channel_alert",
                ChannelEvent::Error(_) => "channel_error",
                ChannelEvent::Closed => "channel_closed",
            },
            DashboardEvent::Poll(PollEvent::Counts(_)) => "poll_counts",
            DashboardEvent::Poll(PollEvent::Alerts(_)) => "poll_alerts",
        }
    }
}
