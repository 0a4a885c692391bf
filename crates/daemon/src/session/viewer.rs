//! Viewer channels.
//!
//! A viewer is one remote party (typically a browser tab) attached to the
//! session. The session only needs to push frames at it; the transport that
//! owns the real connection drains the other end.
//!
//! [`ViewerHandle`] is the standard implementation: a bounded channel whose
//! receiver is handed to the transport's writer task. When the channel is
//! full the frame is dropped for that viewer only, so one slow tab never
//! stalls the others.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use protocol::Frame;
use thiserror::Error;
use tokio::sync::mpsc;

/// Unique identifier for a viewer within this process.
pub type ViewerId = u64;

/// Default channel capacity for viewer output.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

static NEXT_VIEWER_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a fresh viewer identifier.
pub fn next_viewer_id() -> ViewerId {
    NEXT_VIEWER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Delivery failures on a viewer channel.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ViewerError {
    /// The transport side has gone away.
    #[error("viewer {0} channel closed")]
    Closed(ViewerId),

    /// The viewer is not keeping up; the frame was dropped.
    #[error("viewer {0} is backpressured, frame dropped")]
    Full(ViewerId),
}

/// A full-duplex channel to a remote viewer, seen from the session side.
pub trait ViewerChannel: Send + Sync {
    /// Identity used for set membership.
    fn id(&self) -> ViewerId;

    /// Sends raw terminal bytes as a binary frame.
    fn send_binary(&self, data: &[u8]) -> Result<(), ViewerError>;

    /// Sends a JSON control message as a text frame.
    fn send_text(&self, text: &str) -> Result<(), ViewerError>;
}

/// Statistics about a viewer's frame delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerStats {
    /// Total frames delivered to the channel.
    pub messages_sent: u64,
    /// Frames dropped because the channel was full or closed.
    pub messages_dropped: u64,
    /// Whether the viewer is currently experiencing backpressure.
    pub is_backpressured: bool,
}

/// Channel-backed viewer.
pub struct ViewerHandle {
    id: ViewerId,
    tx: mpsc::Sender<Frame>,
    sent: AtomicU64,
    dropped: AtomicU64,
    backpressured: AtomicBool,
}

impl ViewerHandle {
    /// Creates a new viewer with a fresh id.
    ///
    /// Returns the handle and the receiver the transport should drain.
    pub fn new() -> (Self, mpsc::Receiver<Frame>) {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new viewer with a specific channel capacity.
    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = ViewerHandle {
            id: next_viewer_id(),
            tx,
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            backpressured: AtomicBool::new(false),
        };
        (handle, rx)
    }

    /// Returns a snapshot of the delivery statistics.
    pub fn stats(&self) -> ViewerStats {
        ViewerStats {
            messages_sent: self.sent.load(Ordering::Relaxed),
            messages_dropped: self.dropped.load(Ordering::Relaxed),
            is_backpressured: self.backpressured.load(Ordering::Relaxed),
        }
    }

    fn try_send(&self, frame: Frame) -> Result<(), ViewerError> {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                if self.backpressured.swap(false, Ordering::Relaxed) {
                    tracing::debug!(viewer_id = self.id, "Viewer recovered from backpressure");
                }
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if !self.backpressured.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        viewer_id = self.id,
                        dropped,
                        "Viewer is backpressured, dropping frames"
                    );
                }
                Err(ViewerError::Full(self.id))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(ViewerError::Closed(self.id))
            }
        }
    }
}

impl ViewerChannel for ViewerHandle {
    fn id(&self) -> ViewerId {
        self.id
    }

    fn send_binary(&self, data: &[u8]) -> Result<(), ViewerError> {
        self.try_send(Frame::Binary(data.to_vec()))
    }

    fn send_text(&self, text: &str) -> Result<(), ViewerError> {
        self.try_send(Frame::Text(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewer_ids_are_unique() {
        let (a, _rx_a) = ViewerHandle::new();
        let (b, _rx_b) = ViewerHandle::new();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_send_binary_and_text() {
        let (viewer, mut rx) = ViewerHandle::new();

        viewer.send_binary(b"hello\n").unwrap();
        viewer.send_text(r#"{"type":"exit","exitCode":0}"#).unwrap();

        assert_eq!(rx.recv().await, Some(Frame::Binary(b"hello\n".to_vec())));
        assert_eq!(
            rx.recv().await,
            Some(Frame::Text(r#"{"type":"exit","exitCode":0}"#.to_string()))
        );
        assert_eq!(viewer.stats().messages_sent, 2);
    }

    #[test]
    fn test_full_channel_drops_and_flags_backpressure() {
        let (viewer, mut rx) = ViewerHandle::with_capacity(1);

        assert!(viewer.send_binary(b"1").is_ok());
        assert_eq!(viewer.send_binary(b"2"), Err(ViewerError::Full(viewer.id())));

        let stats = viewer.stats();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.messages_dropped, 1);
        assert!(stats.is_backpressured);

        // Draining clears the flag on the next successful send.
        assert_eq!(rx.try_recv().unwrap(), Frame::Binary(b"1".to_vec()));
        assert!(viewer.send_binary(b"3").is_ok());
        assert!(!viewer.stats().is_backpressured);
    }

    #[test]
    fn test_closed_channel_reports_closed() {
        let (viewer, rx) = ViewerHandle::new();
        drop(rx);

        assert_eq!(viewer.send_binary(b"x"), Err(ViewerError::Closed(viewer.id())));
        assert_eq!(viewer.stats().messages_dropped, 1);
    }
}
