//! Live, best-effort progress feed.
//!
//! Publishing never blocks and never fails: with no subscribers the event is
//! dropped, and a subscriber that falls behind skips what it missed.

use crate::jobs::{JobId, JobKind, JobState};
use crate::models::MoveOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Jobs,
    Refresh,
    Move,
    Categorize,
    Train,
}

impl Topic {
    pub fn for_kind(kind: JobKind) -> Self {
        match kind {
            JobKind::Refresh => Topic::Refresh,
            JobKind::Move => Topic::Move,
            JobKind::ForceCategorize => Topic::Categorize,
            JobKind::Train => Topic::Train,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressPayload {
    JobState {
        kind: JobKind,
        state: JobState,
        error: Option<String>,
    },
    BatchProgress {
        processed: usize,
        total: usize,
        percent: u8,
    },
    MoveOutcome(MoveOutcome),
    MoveSummary {
        moved: usize,
        failed: usize,
        missing: usize,
        elapsed_ms: u64,
    },
    Message {
        text: String,
    },
}

impl ProgressPayload {
    pub fn batch(processed: usize, total: usize) -> Self {
        let percent = if total == 0 {
            100
        } else {
            ((processed.min(total) * 100) / total) as u8
        };
        ProgressPayload::BatchProgress {
            processed,
            total,
            percent,
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        ProgressPayload::Message { text: text.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub topic: Topic,
    pub job_id: Option<JobId>,
    pub at: DateTime<Utc>,
    pub payload: ProgressPayload,
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = self.job_id {
            write!(f, "[{}] ", short_id(&id))?;
        }
        match &self.payload {
            ProgressPayload::JobState { kind, state, error } => {
                write!(f, "{} job {}", kind, state)?;
                if let Some(e) = error {
                    write!(f, ": {}", e)?;
                }
                Ok(())
            }
            ProgressPayload::BatchProgress {
                processed,
                total,
                percent,
            } => write!(f, "{}/{} ({}%)", processed, total, percent),
            ProgressPayload::MoveOutcome(o) => {
                write!(f, "{} {} -> {:?}", o.file_id, o.file_name, o.status)?;
                if !o.message.is_empty() {
                    write!(f, " ({})", o.message)?;
                }
                Ok(())
            }
            ProgressPayload::MoveSummary {
                moved,
                failed,
                missing,
                elapsed_ms,
            } => write!(
                f,
                "move finished: moved={}, failed={}, missing={} in {}ms",
                moved, failed, missing, elapsed_ms
            ),
            ProgressPayload::Message { text } => f.write_str(text),
        }
    }
}

fn short_id(id: &JobId) -> String {
    id.to_string().chars().take(8).collect()
}

#[derive(Clone)]
pub struct ProgressChannel {
    tx: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, topic: Topic, job_id: Option<JobId>, payload: ProgressPayload) {
        let event = ProgressEvent {
            topic,
            job_id,
            at: Utc::now(),
            payload,
        };
        if self.tx.send(event).is_err() {
            debug!(?topic, "no progress subscribers, event dropped");
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<ProgressEvent>,
}

impl Subscription {
    /// Next event, skipping over anything lost to lag. `None` once every
    /// publisher is gone.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "progress subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub async fn recv_topic(&mut self, topic: Topic) -> Option<ProgressEvent> {
        loop {
            let event = self.recv().await?;
            if event.topic == topic {
                return Some(event);
            }
        }
    }

    /// Drains whatever is already buffered without waiting.
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let channel = ProgressChannel::new(4);
        channel.publish(Topic::Jobs, None, ProgressPayload::message("nobody listens"));
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn late_subscribers_miss_earlier_events() {
        let channel = ProgressChannel::new(8);
        channel.publish(Topic::Refresh, None, ProgressPayload::message("before"));
        let mut sub = channel.subscribe();
        channel.publish(Topic::Refresh, None, ProgressPayload::message("after"));
        let event = sub.recv().await.unwrap();
        assert_eq!(event.to_string(), "after");
        assert!(sub.drain().is_empty());
    }

    #[tokio::test]
    async fn order_within_a_topic_is_preserved_and_topics_filter() {
        let channel = ProgressChannel::new(16);
        let mut sub = channel.subscribe();
        for i in 0..3 {
            channel.publish(Topic::Move, None, ProgressPayload::batch(i, 3));
            channel.publish(Topic::Train, None, ProgressPayload::message("noise"));
        }
        drop(channel);
        let mut seen = Vec::new();
        while let Some(event) = sub.recv_topic(Topic::Move).await {
            seen.push(event.to_string());
        }
        assert_eq!(seen, vec!["0/3 (0%)", "1/3 (33%)", "2/3 (66%)"]);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_instead_of_blocking() {
        let channel = ProgressChannel::new(2);
        let mut sub = channel.subscribe();
        for i in 0..10 {
            channel.publish(Topic::Jobs, None, ProgressPayload::batch(i, 10));
        }
        let event = sub.recv().await.unwrap();
        assert_eq!(event.to_string(), "8/10 (80%)");
    }
}
