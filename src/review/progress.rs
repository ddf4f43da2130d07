//! Progress broker for review streaming.
//!
//! Each review gets one broadcast channel of [`ProgressEvent`]s. Late
//! subscribers immediately receive the last event (replay-1); channels
//! close automatically once a terminal event is published, and
//! subscribers arriving after that still get the terminal event plus a
//! closed receiver.

use crate::core::now_ts;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Capacity of each review's broadcast channel.
const CHANNEL_CAPACITY: usize = 64;

/// One progress frame, also the review SSE wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Review this event belongs to.
    pub review_id: String,
    /// Stage name: `PARSING`, `ANALYZING`, `GENERATING_REPORT`,
    /// `COMPLETED`, or `ERROR`.
    pub stage: String,
    /// Progress percentage, 0..=100.
    pub progress: u8,
    /// Human-readable status line.
    pub message: String,
    /// Error description on failure frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set on the terminal frame; every stream ends with exactly one.
    pub completed: bool,
    /// Unix timestamp of the event.
    pub timestamp: i64,
}

impl ProgressEvent {
    /// Creates a non-terminal stage event.
    #[must_use]
    pub fn stage(review_id: &str, stage: &str, progress: u8, message: &str) -> Self {
        Self {
            review_id: review_id.to_string(),
            stage: stage.to_string(),
            progress,
            message: message.to_string(),
            error: None,
            completed: false,
            timestamp: now_ts(),
        }
    }

    /// Creates the terminal success event.
    #[must_use]
    pub fn completed(review_id: &str, message: &str) -> Self {
        Self {
            review_id: review_id.to_string(),
            stage: "COMPLETED".to_string(),
            progress: 100,
            message: message.to_string(),
            error: None,
            completed: true,
            timestamp: now_ts(),
        }
    }

    /// Creates the terminal error event.
    #[must_use]
    pub fn failed(review_id: &str, error: &str) -> Self {
        Self {
            review_id: review_id.to_string(),
            stage: "ERROR".to_string(),
            progress: 100,
            message: "审查失败".to_string(),
            error: Some(error.to_string()),
            completed: true,
            timestamp: now_ts(),
        }
    }
}

struct Channel {
    /// Present while the review is live; dropped on the terminal event so
    /// receivers observe channel close.
    sender: Option<broadcast::Sender<ProgressEvent>>,
    last: Option<ProgressEvent>,
}

/// Per-review progress fan-out with replay-1.
#[derive(Default)]
pub struct ProgressBroker {
    channels: Mutex<HashMap<String, Channel>>,
}

impl ProgressBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an event to the review's subscribers and records it for
    /// replay. A terminal event closes the channel.
    pub fn publish(&self, event: ProgressEvent) {
        let Ok(mut channels) = self.channels.lock() else {
            return;
        };
        let channel = channels
            .entry(event.review_id.clone())
            .or_insert_with(|| Channel {
                sender: Some(broadcast::channel(CHANNEL_CAPACITY).0),
                last: None,
            });

        if let Some(sender) = &channel.sender {
            // Send failures just mean nobody is listening right now.
            let _ = sender.send(event.clone());
        }
        let terminal = event.completed;
        channel.last = Some(event);
        if terminal {
            channel.sender = None;
        }
    }

    /// Subscribes to a review's progress. Returns the last event for
    /// immediate replay (if any) and a receiver for subsequent events;
    /// the receiver is already closed when the review finished.
    #[must_use]
    pub fn subscribe(
        &self,
        review_id: &str,
    ) -> (Option<ProgressEvent>, broadcast::Receiver<ProgressEvent>) {
        let Ok(mut channels) = self.channels.lock() else {
            return (None, broadcast::channel(1).1);
        };
        let channel = channels
            .entry(review_id.to_string())
            .or_insert_with(|| Channel {
                sender: Some(broadcast::channel(CHANNEL_CAPACITY).0),
                last: None,
            });

        let receiver = channel.sender.as_ref().map_or_else(
            || broadcast::channel(1).1, // closed immediately
            broadcast::Sender::subscribe,
        );
        (channel.last.clone(), receiver)
    }

    /// Drops a review's channel state (used after the terminal event has
    /// been consumed by tests or cleanup).
    pub fn forget(&self, review_id: &str) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.remove(review_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_then_publish() {
        let broker = ProgressBroker::new();
        let (last, mut rx) = broker.subscribe("r1");
        assert!(last.is_none());

        broker.publish(ProgressEvent::stage("r1", "PARSING", 20, "解析中"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.stage, "PARSING");
        assert_eq!(event.progress, 20);
        assert!(!event.completed);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_replay() {
        let broker = ProgressBroker::new();
        broker.publish(ProgressEvent::stage("r1", "ANALYZING", 60, "分析中"));

        let (last, _rx) = broker.subscribe("r1");
        let last = last.unwrap();
        assert_eq!(last.stage, "ANALYZING");
        assert_eq!(last.progress, 60);
    }

    #[tokio::test]
    async fn test_terminal_event_closes_channel() {
        let broker = ProgressBroker::new();
        let (_, mut rx) = broker.subscribe("r1");

        broker.publish(ProgressEvent::completed("r1", "完成"));
        let event = rx.recv().await.unwrap();
        assert!(event.completed);

        // Channel closed after the terminal frame.
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_subscriber_after_completion_gets_terminal_replay() {
        let broker = ProgressBroker::new();
        broker.publish(ProgressEvent::stage("r1", "PARSING", 20, "解析中"));
        broker.publish(ProgressEvent::completed("r1", "完成"));

        let (last, mut rx) = broker.subscribe("r1");
        assert!(last.unwrap().completed);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_failed_event_shape() {
        let event = ProgressEvent::failed("r1", "合同太短");
        assert_eq!(event.stage, "ERROR");
        assert!(event.completed);
        assert_eq!(event.error.as_deref(), Some("合同太短"));
    }

    #[tokio::test]
    async fn test_independent_reviews_do_not_cross() {
        let broker = ProgressBroker::new();
        let (_, mut rx1) = broker.subscribe("r1");
        let (_, mut rx2) = broker.subscribe("r2");

        broker.publish(ProgressEvent::stage("r1", "PARSING", 20, "解析中"));
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_serialization_camel_case() {
        let event = ProgressEvent::completed("r1", "done");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"reviewId\":\"r1\""));
        assert!(json.contains("\"completed\":true"));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_forget() {
        let broker = ProgressBroker::new();
        broker.publish(ProgressEvent::completed("r1", "done"));
        broker.forget("r1");
        let (last, _) = broker.subscribe("r1");
        assert!(last.is_none());
    }
}
