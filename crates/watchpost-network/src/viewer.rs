use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use futures::Stream;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{message::LiveFrame, HubInner};

/// Outcome of offering one frame to a viewer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    Queued,
    /// The queue was full and an older frame made room.
    Replaced,
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<Arc<LiveFrame>>,
    closed: bool,
    dropped: u64,
}

/// Bounded, latest-wins outbound queue owned by one subscriber.
#[derive(Debug)]
pub(crate) struct ViewerQueue {
    pub(crate) id: Uuid,
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl ViewerQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Never waits. A full queue sheds the oldest frame of the same camera,
    /// or the oldest frame overall when that camera has nothing queued.
    pub(crate) fn offer(&self, frame: Arc<LiveFrame>) -> Offer {
        let mut state = self.state();
        if state.closed {
            return Offer::Closed;
        }
        let mut outcome = Offer::Queued;
        if state.frames.len() >= self.capacity {
            let victim = state
                .frames
                .iter()
                .position(|queued| queued.camera == frame.camera)
                .unwrap_or(0);
            state.frames.remove(victim);
            state.dropped += 1;
            outcome = Offer::Replaced;
        }
        state.frames.push_back(frame);
        drop(state);
        self.notify.notify_one();
        outcome
    }

    pub(crate) fn try_recv(&self) -> Option<Arc<LiveFrame>> {
        self.state().frames.pop_front()
    }

    /// Waits for the next frame; `None` once closed and drained.
    pub(crate) async fn recv(&self) -> Option<Arc<LiveFrame>> {
        loop {
            {
                let mut state = self.state();
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub(crate) fn close(&self) {
        self.state().closed = true;
        self.notify.notify_one();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.state().dropped
    }

    pub(crate) fn pending(&self) -> usize {
        self.state().frames.len()
    }
}

/// Handle held by one live viewer. Dropping it unsubscribes the viewer.
#[derive(Debug)]
pub struct ViewerConnection {
    queue: Arc<ViewerQueue>,
    hub: Weak<HubInner>,
}

impl ViewerConnection {
    pub(crate) fn new(queue: Arc<ViewerQueue>, hub: Weak<HubInner>) -> Self {
        Self { queue, hub }
    }

    pub fn id(&self) -> Uuid {
        self.queue.id
    }

    /// Suspends until a frame arrives or the connection is closed.
    pub async fn recv(&self) -> Option<Arc<LiveFrame>> {
        self.queue.recv().await
    }

    pub fn try_recv(&self) -> Option<Arc<LiveFrame>> {
        self.queue.try_recv()
    }

    /// Frames discarded for this viewer because it fell behind.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Leaves the broadcast set. Safe to call more than once.
    pub fn close(&self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.queue.id);
        }
        self.queue.close();
    }

    pub fn into_stream(self) -> impl Stream<Item = Arc<LiveFrame>> + Send + 'static {
        async_stream::stream! {
            while let Some(frame) = self.recv().await {
                yield frame;
            }
        }
    }
}

impl Drop for ViewerConnection {
    fn drop(&mut self) {
        self.close();
    }
}
