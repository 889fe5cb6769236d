use crate::reconciler::{CanonicalView, ConnectionState};
use chrono::{DateTime, Local, Utc};
use vigil_core::{Alert, DetectionCounts, ObjectType, StreamFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameView<'a> {
    NoStream,
    Live(&'a StreamFrame),
}

impl FrameView<'_> {
    pub fn is_live(&self) -> bool {
        matches!(self, FrameView::Live(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionIndicator {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionIndicator {
    pub fn is_connected(self) -> bool {
        self == ConnectionIndicator::Connected
    }

    pub fn label(self) -> &'static str {
        match self {
            ConnectionIndicator::Connecting => "Connecting",
            ConnectionIndicator::Connected => "Connected",
            ConnectionIndicator::Disconnected => "Disconnected",
        }
    }
}

impl From<ConnectionState> for ConnectionIndicator {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connecting => ConnectionIndicator::Connecting,
            ConnectionState::Connected => ConnectionIndicator::Connected,
            ConnectionState::Disconnected => ConnectionIndicator::Disconnected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRow {
    pub object_type: ObjectType,
    pub label: &'static str,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRow {
    pub rule_name: String,
    pub object_type: ObjectType,
    pub count: u32,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

impl AlertRow {
    fn from_alert(alert: &Alert) -> Self {
        Self {
            rule_name: alert.rule_name.clone(),
            object_type: alert.object_type,
            count: alert.count,
            summary: alert.summary(),
            timestamp: alert.timestamp,
        }
    }

    pub fn local_time(&self) -> String {
        self.timestamp
            .with_timezone(&Local)
            .format("%H:%M:%S")
            .to_string()
    }
}

/// Render-ready snapshot. Borrows the frame from the canonical view, so it can
/// only live as long as the read that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardView<'a> {
    pub frame: FrameView<'a>,
    pub counts: DetectionCounts,
    pub alerts: Vec<AlertRow>,
    pub connection: ConnectionIndicator,
    pub status_note: Option<String>,
}

impl DashboardView<'_> {
    pub fn counters(&self) -> [CounterRow; 3] {
        ObjectType::ALL.map(|object_type| CounterRow {
            object_type,
            label: counter_label(object_type),
            count: self.counts.get(object_type),
        })
    }
}

pub fn project(view: &CanonicalView) -> DashboardView<'_> {
    let frame = match view.frame.as_ref() {
        Some(frame) => FrameView::Live(frame),
        None => FrameView::NoStream,
    };
    let status_note = match view.connection {
        ConnectionState::Disconnected => Some(format!(
            "stream disconnected: {}",
            view.disconnect_reason.as_deref().unwrap_or("unknown reason")
        )),
        ConnectionState::Connecting => Some("connecting to stream".to_string()),
        ConnectionState::Connected => None,
    };
    DashboardView {
        frame,
        counts: view.counts,
        alerts: view.history.iter().map(AlertRow::from_alert).collect(),
        connection: view.connection.into(),
        status_note,
    }
}

fn counter_label(object_type: ObjectType) -> &'static str {
    match object_type {
        ObjectType::Person => "Persons",
        ObjectType::Animal => "Animals",
        ObjectType::Vehicle => "Vehicles",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChannelEvent, ChannelId, DashboardEvent, PollEvent};
    use crate::reconciler::StateReconciler;
    use chrono::TimeZone;

    #[test]
    fn empty_view_has_zero_counters_and_no_stream() {
        let reconciler = StateReconciler::new();
        let view = project(reconciler.view());
        assert_eq!(view.frame, FrameView::NoStream);
        assert!(view
            .counters()
            .iter()
            .all(|row| row.count == 0));
        assert!(view.alerts.is_empty());
        assert!(!view.connection.is_connected());
    }

    #[test]
    fn polled_counts_are_reported_exactly() {
        let mut reconciler = StateReconciler::new();
        reconciler.attach_channel(ChannelId(1));
        reconciler.apply(DashboardEvent::channel(
            ChannelId(1),
            ChannelEvent::Frame {
                frame: StreamFrame::new("img".to_string(), Utc::now()),
                counts: DetectionCounts::new(9, 9, 9),
            },
        ));
        reconciler.apply(DashboardEvent::Poll(PollEvent::Counts(DetectionCounts::new(
            3, 0, 1,
        ))));

        let counters = project(reconciler.view()).counters();
        let values: Vec<(&str, u32)> = counters.iter().map(|row| (row.label, row.count)).collect();
        assert_eq!(values, vec![("Persons", 3), ("Animals", 0), ("Vehicles", 1)]);
    }

    #[test]
    fn pushed_frame_shows_frame_and_counts_from_the_same_event() {
        let mut reconciler = StateReconciler::new();
        reconciler.attach_channel(ChannelId(1));
        reconciler.apply(DashboardEvent::channel(ChannelId(1), ChannelEvent::Opened));
        reconciler.apply(DashboardEvent::channel(
            ChannelId(1),
            ChannelEvent::Frame {
                frame: StreamFrame::new("jpeg-bytes".to_string(), Utc::now()),
                counts: DetectionCounts::new(2, 1, 0),
            },
        ));

        let view = project(reconciler.view());
        match view.frame {
            FrameView::Live(frame) => assert_eq!(frame.data, "jpeg-bytes"),
            FrameView::NoStream => panic!("expected a live frame"),
        }
        assert_eq!(view.counts, DetectionCounts::new(2, 1, 0));
        assert!(view.connection.is_connected());
        assert_eq!(view.status_note, None);
    }

    #[test]
    fn alert_rows_follow_history_order() {
        let mut reconciler = StateReconciler::new();
        let at = |secs: i64| Utc.timestamp_opt(1_772_000_000 + secs, 0).single().expect("ts");
        reconciler.apply(DashboardEvent::Poll(PollEvent::Alerts(vec![
            Alert {
                rule_name: "Back door".to_string(),
                object_type: ObjectType::Person,
                count: 2,
                timestamp: at(20),
                message: None,
            },
            Alert {
                rule_name: "Driveway".to_string(),
                object_type: ObjectType::Vehicle,
                count: 1,
                timestamp: at(10),
                message: None,
            },
        ])));

        let view = project(reconciler.view());
        let rows: Vec<(&str, &str)> = view
            .alerts
            .iter()
            .map(|row| (row.rule_name.as_str(), row.summary.as_str()))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("Back door", "Person: 2 detected"),
                ("Driveway", "Vehicle: 1 detected")
            ]
        );
        assert_eq!(view.alerts[0].local_time().len(), 8);
    }

    #[test]
    fn disconnect_reason_surfaces_as_status_note() {
        let mut reconciler = StateReconciler::new();
        reconciler.attach_channel(ChannelId(4));
        reconciler.apply(DashboardEvent::channel(
            ChannelId(4),
            ChannelEvent::Error("connection refused".to_string()),
        ));
        let view = project(reconciler.view());
        assert_eq!(view.connection, ConnectionIndicator::Disconnected);
        assert_eq!(
            view.status_note.as_deref(),
            Some("stream disconnected: connection refused")
        );
    }
}
