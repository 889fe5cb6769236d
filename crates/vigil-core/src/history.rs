use crate::Alert;

pub const ALERT_HISTORY_CAP: usize = 10;

/// Newest-first list of recent alerts, never longer than [`ALERT_HISTORY_CAP`].
///
/// There are exactly two ways to produce a new history: [`AlertHistory::prepend`]
/// for a single pushed alert and [`AlertHistory::replace`] for a polled snapshot.
/// Both return a fresh value and leave the receiver untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertHistory {
    entries: Vec<Alert>,
}

impl AlertHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Incremental arrival: the alert becomes the head, the oldest entries fall off.
    pub fn prepend(&self, alert: Alert) -> AlertHistory {
        let keep = self.entries.len().min(ALERT_HISTORY_CAP - 1);
        let mut entries = Vec::with_capacity(keep + 1);
        entries.push(alert);
        entries.extend(self.entries.iter().take(keep).cloned());
        AlertHistory { entries }
    }

    /// Authoritative snapshot. The server already orders and caps its list;
    /// both are re-applied here so a misbehaving backend cannot break the
    /// ordering or the bound.
    pub fn replace(alerts: Vec<Alert>) -> AlertHistory {
        let mut entries = alerts;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(ALERT_HISTORY_CAP);
        AlertHistory { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn newest(&self) -> Option<&Alert> {
        self.entries.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alert> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[Alert] {
        &self.entries
    }
}
