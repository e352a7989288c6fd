//! Live fan-out of camera frames to connected viewers.

mod message;
mod viewer;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use tracing::{debug, info};
use uuid::Uuid;
use watchpost_types::frame::Frame;

pub use message::LiveFrame;
pub use viewer::ViewerConnection;

use viewer::{Offer, ViewerQueue};

/// Result of one publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub sequence: u64,
    /// Viewers the frame was queued for.
    pub delivered: usize,
}

pub trait LiveBroadcaster: Send + Sync {
    /// Queues the frame for every current viewer without waiting on any of them.
    fn publish(&self, frame: &Frame) -> PublishReceipt;
    fn subscribe(&self) -> ViewerConnection;
    fn unsubscribe(&self, viewer: Uuid) -> bool;
    fn viewer_count(&self) -> usize;
}

#[derive(Debug)]
pub(crate) struct HubInner {
    capacity: usize,
    subscribers: RwLock<HashMap<Uuid, Arc<ViewerQueue>>>,
    sequences: Mutex<HashMap<String, u64>>,
}

impl HubInner {
    pub(crate) fn remove(&self, id: Uuid) -> bool {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match removed {
            Some(queue) => {
                queue.close();
                info!(viewer = %id, "viewer unsubscribed");
                true
            }
            None => false,
        }
    }

    fn snapshot(&self) -> Vec<Arc<ViewerQueue>> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

/// In-process hub: each viewer owns a bounded queue, so a slow viewer only
/// loses its own frames.
#[derive(Clone, Debug)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                capacity: capacity.max(1),
                subscribers: RwLock::new(HashMap::new()),
                sequences: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl LiveBroadcaster for BroadcastHub {
    fn publish(&self, frame: &Frame) -> PublishReceipt {
        // Held across the fan-out so frames of one camera reach every queue
        // in sequence order even with concurrent publishers.
        let mut sequences = self
            .inner
            .sequences
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let counter = sequences.entry(frame.camera.clone()).or_insert(0);
        *counter += 1;
        let sequence = *counter;

        let live = Arc::new(LiveFrame::new(frame, sequence));
        let mut delivered = 0;
        let mut closed = Vec::new();
        for queue in self.inner.snapshot() {
            match queue.offer(live.clone()) {
                Offer::Queued => delivered += 1,
                Offer::Replaced => {
                    delivered += 1;
                    debug!(viewer = %queue.id, camera = %frame.camera, "viewer lagging, replaced oldest frame");
                }
                Offer::Closed => closed.push(queue.id),
            }
        }
        drop(sequences);

        for id in closed {
            self.inner.remove(id);
        }
        PublishReceipt {
            sequence,
            delivered,
        }
    }

    fn subscribe(&self) -> ViewerConnection {
        let queue = Arc::new(ViewerQueue::new(self.inner.capacity));
        let total = {
            let mut subscribers = self
                .inner
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers.insert(queue.id, queue.clone());
            subscribers.len()
        };
        info!(viewer = %queue.id, total, "viewer subscribed");
        ViewerConnection::new(queue, Arc::downgrade(&self.inner))
    }

    fn unsubscribe(&self, viewer: Uuid) -> bool {
        self.inner.remove(viewer)
    }

    fn viewer_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;
    use watchpost_types::frame::Frame;

    fn frame(camera: &str) -> Frame {
        Frame::new(camera, vec![0xFFu8, 0xD8, 0xFF, 0xD9])
    }

    #[test]
    fn sequences_are_per_camera() {
        let hub = BroadcastHub::new(4);
        assert_eq!(hub.publish(&frame("balkon")).sequence, 1);
        assert_eq!(hub.publish(&frame("balkon")).sequence, 2);
        assert_eq!(hub.publish(&frame("drzwi")).sequence, 1);
    }

    #[test]
    fn publish_without_viewers_delivers_nowhere() {
        let hub = BroadcastHub::new(4);
        assert_eq!(hub.publish(&frame("balkon")).delivered, 0);
    }

    #[test]
    fn lagging_viewer_keeps_latest_frames_in_order() {
        let hub = BroadcastHub::new(3);
        let viewer = hub.subscribe();
        for _ in 0..10 {
            hub.publish(&frame("balkon"));
        }
        assert_eq!(viewer.dropped(), 7);
        let mut seen = Vec::new();
        while let Some(live) = viewer.try_recv() {
            seen.push(live.sequence);
        }
        assert_eq!(seen, vec![8, 9, 10]);
    }

    #[test]
    fn overflow_replaces_same_camera_before_others() {
        let hub = BroadcastHub::new(2);
        let viewer = hub.subscribe();
        hub.publish(&frame("drzwi"));
        hub.publish(&frame("balkon"));
        hub.publish(&frame("balkon"));

        let first = viewer.try_recv().expect("drzwi frame kept");
        assert_eq!(first.camera, "drzwi");
        let second = viewer.try_recv().expect("latest balkon frame");
        assert_eq!((second.camera.as_str(), second.sequence), ("balkon", 2));
        assert!(viewer.try_recv().is_none());
    }

    #[test]
    fn per_camera_order_survives_interleaving_and_drops() {
        let hub = BroadcastHub::new(5);
        let viewer = hub.subscribe();
        for i in 0..50 {
            let camera = if i % 3 == 0 { "brama" } else { "balkon" };
            hub.publish(&frame(camera));
        }
        let mut last: HashMap<String, u64> = HashMap::new();
        while let Some(live) = viewer.try_recv() {
            let previous = last.insert(live.camera.clone(), live.sequence).unwrap_or(0);
            assert!(live.sequence > previous);
        }
    }

    #[test]
    fn idle_viewer_does_not_starve_fast_viewer() {
        let hub = BroadcastHub::new(2);
        let _idle = hub.subscribe();
        let fast = hub.subscribe();
        for expected in 1..=20 {
            let receipt = hub.publish(&frame("balkon"));
            assert_eq!(receipt.delivered, 2);
            let live = fast.try_recv().expect("fast viewer gets every frame");
            assert_eq!(live.sequence, expected);
        }
        assert_eq!(fast.dropped(), 0);
    }

    #[test]
    fn dropping_connection_unsubscribes() {
        let hub = BroadcastHub::new(2);
        let viewer = hub.subscribe();
        let other = hub.subscribe();
        assert_eq!(hub.viewer_count(), 2);
        drop(viewer);
        assert_eq!(hub.viewer_count(), 1);
        assert!(hub.unsubscribe(other.id()));
        assert!(!hub.unsubscribe(other.id()));
        assert_eq!(hub.viewer_count(), 0);
        assert!(other.is_closed());
    }

    #[tokio::test]
    async fn recv_wakes_on_publish_and_ends_on_close() {
        let hub = BroadcastHub::new(2);
        let viewer = hub.subscribe();
        let publisher = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(&frame("drzwi"));
        });
        let live = viewer.recv().await.expect("frame delivered");
        assert_eq!(live.camera, "drzwi");

        viewer.close();
        assert!(viewer.recv().await.is_none());
        assert_eq!(hub.publish(&frame("drzwi")).delivered, 0);
    }

    #[tokio::test]
    async fn stream_adapter_yields_frames() {
        let hub = BroadcastHub::new(4);
        let stream = hub.subscribe().into_stream();
        hub.publish(&frame("balkon"));
        hub.publish(&frame("balkon"));
        let frames: Vec<_> = stream.take(2).collect().await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].sequence, 2);
    }

    #[tokio::test]
    async fn concurrent_publishers_keep_camera_order() {
        let hub = BroadcastHub::new(1024);
        let viewer = hub.subscribe();
        let mut tasks = Vec::new();
        for camera in ["balkon", "drzwi", "brama"] {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    hub.publish(&frame(camera));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let mut last: HashMap<String, u64> = HashMap::new();
        let mut total = 0;
        while let Some(live) = viewer.try_recv() {
            let previous = last.insert(live.camera.clone(), live.sequence).unwrap_or(0);
            assert_eq!(live.sequence, previous + 1);
            total += 1;
        }
        assert_eq!(total, 300);
    }
}
