//! Receivers for unsolicited inbound traffic.

use tokio::sync::mpsc;

use crate::protocol::Message;

/// Handler for messages no waiter claimed, plus connection events.
///
/// Called from the session's pump task. Implementations must return quickly;
/// heavy work belongs on another task.
pub trait NotificationSink: Send + Sync {
    /// An unsolicited response or notification arrived.
    fn on_response(&self, message: Message);

    /// The connection failed with `error`. Followed by `on_disconnected`.
    fn on_error(&self, error: &str) {
        let _ = error;
    }

    /// The connection is gone. Fires once per transport instance.
    fn on_disconnected(&self) {}
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn on_response(&self, message: Message) {
        tracing::trace!(action = %message.action, "Unclaimed message dropped");
    }
}

/// Event forwarded by a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// Unclaimed inbound message
    Response(Message),
    /// Connection error text
    Error(String),
    /// Connection closed
    Disconnected,
}

/// Sink that forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn on_response(&self, message: Message) {
        let _ = self.tx.send(SinkEvent::Response(message));
    }

    fn on_error(&self, error: &str) {
        let _ = self.tx.send(SinkEvent::Error(error.to_string()));
    }

    fn on_disconnected(&self) {
        let _ = self.tx.send(SinkEvent::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new();

        sink.on_response(Message::notification("BROADCAST", "hello"));
        sink.on_error("reset by peer");
        sink.on_disconnected();

        assert!(matches!(rx.try_recv(), Ok(SinkEvent::Response(m)) if m.message == "hello"));
        assert_eq!(rx.try_recv().unwrap(), SinkEvent::Error("reset by peer".into()));
        assert_eq!(rx.try_recv().unwrap(), SinkEvent::Disconnected);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.on_disconnected();
    }
}
