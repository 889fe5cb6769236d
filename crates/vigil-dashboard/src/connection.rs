use crate::event::{ChannelEvent, ChannelId, DashboardEvent};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;
use vigil_core::stream::{
    decode_server_message, encode_client_message, ClientMessage, ServerMessage, StreamError,
    DEFAULT_MAX_MESSAGE_BYTES,
};
use vigil_core::StreamFrame;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// One push-channel instance. Owns the background task that reads the
/// websocket and forwards tagged events, in arrival order, to the session.
///
/// The instance never reconnects on its own: after a transport error or a
/// remote close it reports once and stops. Leaving the disconnected state
/// takes a new `Connection` with a new [`ChannelId`].
pub struct Connection {
    id: ChannelId,
    url: Url,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn open(id: ChannelId, url: Url, events: mpsc::Sender<DashboardEvent>) -> Self {
        info!(event = "stream_open", channel = %id, url = %url);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_channel(id, url.clone(), events, shutdown_rx));
        Self {
            id,
            url,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_none()
    }

    /// Asks the channel task to send a close frame and stop. Safe to call any
    /// number of times; only the first call does anything.
    pub fn close(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };
        debug!(event = "stream_close_requested", channel = %self.id);
        let _ = shutdown.send(());
    }

    /// Closes and waits for the channel task to finish.
    pub async fn shutdown(mut self) {
        self.close();
        let Some(mut task) = self.task.take() else {
            return;
        };
        let grace = CLOSE_TIMEOUT + Duration::from_millis(500);
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            warn!(event = "stream_close_timeout", channel = %self.id);
            task.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_channel(
    id: ChannelId,
    url: Url,
    events: mpsc::Sender<DashboardEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let connect = tokio::select! {
        biased;
        _ = &mut shutdown => {
            debug!(event = "stream_open_cancelled", channel = %id);
            return;
        }
        result = connect_async(url.as_str()) => result,
    };
    let mut ws = match connect {
        Ok((ws, _response)) => ws,
        Err(err) => {
            warn!(event = "stream_connect_error", channel = %id, error = %err);
            let _ = events
                .send(DashboardEvent::channel(id, ChannelEvent::Error(err.to_string())))
                .await;
            return;
        }
    };

    if events
        .send(DashboardEvent::channel(id, ChannelEvent::Opened))
        .await
        .is_err()
    {
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await;
        return;
    }

    let handshake = match encode_client_message(&ClientMessage::Start) {
        Ok(text) => text,
        Err(err) => {
            let _ = events
                .send(DashboardEvent::channel(id, ChannelEvent::Error(err.to_string())))
                .await;
            return;
        }
    };
    if let Err(err) = ws.send(Message::Text(handshake)).await {
        warn!(event = "stream_handshake_error", channel = %id, error = %err);
        let _ = events
            .send(DashboardEvent::channel(id, ChannelEvent::Error(err.to_string())))
            .await;
        return;
    }
    info!(event = "stream_ready", channel = %id);

    loop {
        let next = tokio::select! {
            biased;
            _ = &mut shutdown => {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await;
                info!(event = "stream_closed", channel = %id, reason = "local");
                return;
            }
            next = ws.next() => next,
        };

        let text = match next {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    debug!(event = "stream_binary_ignored", channel = %id);
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|frame| frame.reason.to_string())
                    .unwrap_or_default();
                info!(event = "stream_closed", channel = %id, reason = "remote", detail = %reason);
                let _ = events
                    .send(DashboardEvent::channel(id, ChannelEvent::Closed))
                    .await;
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                warn!(event = "stream_transport_error", channel = %id, error = %err);
                let _ = events
                    .send(DashboardEvent::channel(id, ChannelEvent::Error(err.to_string())))
                    .await;
                return;
            }
            None => {
                info!(event = "stream_closed", channel = %id, reason = "eof");
                let _ = events
                    .send(DashboardEvent::channel(id, ChannelEvent::Closed))
                    .await;
                return;
            }
        };

        let Some(event) = channel_event_from_text(id, &text, Utc::now()) else {
            continue;
        };
        if events.send(DashboardEvent::channel(id, event)).await.is_err() {
            debug!(event = "stream_receiver_gone", channel = %id);
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await;
            return;
        }
    }
}

/// Translates one text message into a channel event. Unknown or malformed
/// messages are logged and dropped.
fn channel_event_from_text(
    id: ChannelId,
    text: &str,
    received_at: DateTime<Utc>,
) -> Option<ChannelEvent> {
    match decode_server_message(text, DEFAULT_MAX_MESSAGE_BYTES) {
        Ok(ServerMessage::Frame { data, detections }) => Some(ChannelEvent::Frame {
            frame: StreamFrame::new(data, received_at),
            counts: detections,
        }),
        Ok(ServerMessage::Alert { data }) => Some(ChannelEvent::Alert(data)),
        Err(StreamError::UnknownKind(kind)) => {
            debug!(event = "stream_unknown_kind", channel = %id, kind = %kind);
            None
        }
        Err(err) => {
            warn!(event = "stream_decode_error", channel = %id, error = %err);
            None
        }
    }
}
