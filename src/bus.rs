//! Per-task event queue with exactly one subscriber (`spec.md` §4.1).
//!
//! Created lazily on first subscribe-or-publish and destroyed on
//! unsubscribe. Publishing to a missing queue is a silent no-op so a
//! late-finishing executor doesn't error out after its subscriber has gone
//! away.

use tokio::sync::mpsc;

use crate::error::BusError;
use crate::event::Event;

/// The subscriber's half of a task's event queue.
pub type EventReceiver = mpsc::Receiver<Event>;

/// The publisher's half. Bounded: `publish` blocks when the queue is full,
/// coupling agent progress to the subscriber's drain rate (`spec.md` §4.1,
/// §5 backpressure).
pub struct EventPublisher {
    tx: mpsc::Sender<Event>,
}

impl EventPublisher {
    /// Enqueue an event. Blocks if the bounded queue is full.
    ///
    /// Returns `Ok(())` even if the subscriber has gone away — per
    /// `spec.md` §4.2, an unsubscribed queue's further publishes are
    /// no-ops, not errors, since the executor may still be running briefly.
    pub async fn publish(&self, event: Event) {
        // A closed receiver just means the subscriber unsubscribed; the
        // executor keeps running to its natural conclusion regardless.
        let _ = self.tx.send(event).await;
    }
}

/// A single task's bounded event queue.
///
/// Exactly one subscriber is allowed at a time: acquiring the receiver a
/// second time for the same task, while the first is still attached, fails
/// with [`BusError::AlreadySubscribed`].
pub struct EventBus {
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Create a fresh queue pair for a task.
    pub fn create(&self) -> (EventPublisher, EventReceiver) {
        let (tx, rx) = mpsc::channel(self.capacity.max(1));
        (EventPublisher { tx }, rx)
    }
}

/// Tracks whether a task's queue currently has a live subscriber, so a
/// second concurrent `subscribe` can be rejected per `spec.md` §4.1/§8.7.
///
/// This is a thin marker type: the actual enforcement lives in
/// [`crate::session::Session::subscribe`], which holds the per-session
/// mutex across the check-and-take. It is exposed here so the bus module
/// owns the vocabulary for the error it can produce.
pub fn already_subscribed(task_id: &str) -> BusError {
    BusError::AlreadySubscribed(task_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TaskProgress;
    use chrono::Utc;

    #[tokio::test]
    async fn publish_then_drain_is_fifo() {
        let bus = EventBus::new(8);
        let (publisher, mut receiver) = bus.create();

        publisher
            .publish(Event::Progress {
                timestamp: Utc::now(),
                progress: TaskProgress {
                    turns: 1,
                    ..Default::default()
                },
            })
            .await;
        publisher
            .publish(Event::Progress {
                timestamp: Utc::now(),
                progress: TaskProgress {
                    turns: 2,
                    ..Default::default()
                },
            })
            .await;

        let Event::Progress { progress: first, .. } = receiver.recv().await.unwrap() else {
            panic!("expected progress event");
        };
        let Event::Progress { progress: second, .. } = receiver.recv().await.unwrap() else {
            panic!("expected progress event");
        };
        assert_eq!(first.turns, 1);
        assert_eq!(second.turns, 2);
    }

    #[tokio::test]
    async fn publish_after_drop_is_a_silent_no_op() {
        let bus = EventBus::new(4);
        let (publisher, receiver) = bus.create();
        drop(receiver);

        // Must not panic or block.
        publisher
            .publish(Event::Error {
                timestamp: Utc::now(),
                message: "late".to_string(),
            })
            .await;
    }

    #[tokio::test]
    async fn backpressure_blocks_when_full() {
        let bus = EventBus::new(1);
        let (publisher, mut receiver) = bus.create();

        publisher
            .publish(Event::Error {
                timestamp: Utc::now(),
                message: "one".to_string(),
            })
            .await;

        // Queue capacity 1 is now full; a second publish should block until
        // drained. Race it against a timeout to prove it doesn't return
        // instantly.
        let publish_fut = publisher.publish(Event::Error {
            timestamp: Utc::now(),
            message: "two".to_string(),
        });
        tokio::pin!(publish_fut);

        tokio::select! {
            () = &mut publish_fut => panic!("publish should have blocked while queue is full"),
            () = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
        }

        // Draining unblocks it.
        let _ = receiver.recv().await;
        publish_fut.await;
    }
}
