//! Fan-out hub that relays progress frames from jobs to live subscribers.
//!
//! # Design
//! - A single coordinating task owns the subscriber table; registration,
//!   de-registration and publishing arrive on separate inbound queues and are
//!   serialised by that task, so the table needs no lock.
//! - Delivery is always a non-blocking `try_send`. A full subscriber queue
//!   drops the frame for that subscriber only.
//! - Publishing is non-blocking too: a full inbound queue drops the frame and
//!   reports [`HubError::QueueFull`] to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::HubError;
use crate::payloads::{
    DEFAULT_PUBLISH_CAPACITY, DEFAULT_SUBSCRIBER_CAPACITY, ProgressEnvelope, ProgressPayload,
};

/// Identifier assigned to a registered subscriber.
pub type SubscriberId = Uuid;

/// Encoded event frame shared between all subscribers.
pub type Frame = Arc<str>;

/// Cloneable handle to the coordinating hub task.
#[derive(Clone)]
pub struct ProgressHub {
    register: mpsc::UnboundedSender<(SubscriberId, mpsc::Sender<Frame>)>,
    unregister: mpsc::UnboundedSender<SubscriberId>,
    publish: mpsc::Sender<Frame>,
    subscriber_capacity: usize,
    stats: Arc<HubStats>,
}

#[derive(Default)]
struct HubStats {
    subscribers: AtomicUsize,
    dropped: AtomicU64,
}

impl ProgressHub {
    /// Spawn a hub with the default queue capacities.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PUBLISH_CAPACITY, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Spawn a hub with explicit inbound and per-subscriber capacities.
    ///
    /// # Panics
    ///
    /// Panics if either capacity is zero or if called outside of a Tokio runtime.
    #[must_use]
    pub fn with_capacity(publish_capacity: usize, subscriber_capacity: usize) -> Self {
        assert!(subscriber_capacity > 0, "subscriber capacity must be positive");
        let (register, register_rx) = mpsc::unbounded_channel();
        let (unregister, unregister_rx) = mpsc::unbounded_channel();
        let (publish, publish_rx) = mpsc::channel(publish_capacity);
        let stats = Arc::new(HubStats::default());

        tokio::spawn(run_hub(
            register_rx,
            unregister_rx,
            publish_rx,
            Arc::clone(&stats),
        ));

        Self {
            register,
            unregister,
            publish,
            subscriber_capacity,
            stats,
        }
    }

    /// Add a subscriber queue under the given identifier.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] when the coordinating task has stopped.
    pub fn register(&self, id: SubscriberId, queue: mpsc::Sender<Frame>) -> Result<(), HubError> {
        self.register
            .send((id, queue))
            .map_err(|_| HubError::Closed)
    }

    /// Remove a subscriber; unknown identifiers are ignored.
    pub fn unregister(&self, id: SubscriberId) {
        let _ = self.unregister.send(id);
    }

    /// Register a fresh subscriber with a bounded queue and return its receiving end.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] when the coordinating task has stopped.
    pub fn subscribe(&self) -> Result<Subscription, HubError> {
        let id = Uuid::new_v4();
        let (queue, receiver) = mpsc::channel(self.subscriber_capacity);
        self.register(id, queue)?;
        Ok(Subscription {
            id,
            receiver,
            unregister: self.unregister.clone(),
        })
    }

    /// Hand an already encoded frame to the hub without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::QueueFull`] when the inbound queue is saturated and
    /// [`HubError::Closed`] when the coordinating task has stopped.
    pub fn publish(&self, frame: Frame) -> Result<(), HubError> {
        self.publish.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => HubError::QueueFull { job_id: None },
            TrySendError::Closed(_) => HubError::Closed,
        })
    }

    /// Encode a payload for `job_id` and publish it.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Encode`] if the payload cannot be serialised, otherwise
    /// the same errors as [`ProgressHub::publish`].
    pub fn publish_event(&self, job_id: &str, payload: ProgressPayload) -> Result<(), HubError> {
        let envelope = ProgressEnvelope {
            id: job_id.to_string(),
            data: payload,
        };
        let encoded = serde_json::to_string(&envelope).map_err(|source| HubError::Encode {
            job_id: job_id.to_string(),
            source,
        })?;
        self.publish(Arc::from(encoded)).map_err(|err| match err {
            HubError::QueueFull { .. } => HubError::QueueFull {
                job_id: Some(job_id.to_string()),
            },
            other => other,
        })
    }

    /// Number of subscribers currently registered.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.stats.subscribers.load(Ordering::Relaxed)
    }

    /// Total frames dropped because a subscriber queue was full.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving end of a subscriber queue; unregisters itself on drop.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Frame>,
    unregister: mpsc::UnboundedSender<SubscriberId>,
}

impl Subscription {
    /// Identifier assigned at registration.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next frame; `None` once the hub has dropped this subscriber.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    /// Take the next queued frame without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.unregister.send(self.id);
    }
}

async fn run_hub(
    mut register_rx: mpsc::UnboundedReceiver<(SubscriberId, mpsc::Sender<Frame>)>,
    mut unregister_rx: mpsc::UnboundedReceiver<SubscriberId>,
    mut publish_rx: mpsc::Receiver<Frame>,
    stats: Arc<HubStats>,
) {
    let mut subscribers: HashMap<SubscriberId, mpsc::Sender<Frame>> = HashMap::new();

    loop {
        // Registration is polled first so a subscribe issued before a publish
        // from the same task always observes that publish.
        tokio::select! {
            biased;
            Some((id, queue)) = register_rx.recv() => {
                subscribers.insert(id, queue);
            }
            Some(id) = unregister_rx.recv() => {
                if subscribers.remove(&id).is_some() {
                    trace!(subscriber_id = %id, "subscriber unregistered");
                }
            }
            frame = publish_rx.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                fan_out(&mut subscribers, &frame, &stats);
            }
        }
        stats
            .subscribers
            .store(subscribers.len(), Ordering::Relaxed);
    }

    debug!("progress hub stopped");
    subscribers.clear();
    stats.subscribers.store(0, Ordering::Relaxed);
}

fn fan_out(
    subscribers: &mut HashMap<SubscriberId, mpsc::Sender<Frame>>,
    frame: &Frame,
    stats: &HubStats,
) {
    subscribers.retain(|id, queue| match queue.try_send(Arc::clone(frame)) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            stats.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(subscriber_id = %id, "subscriber queue full; frame dropped");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    });
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}
