use std::sync::{Arc, Mutex, PoisonError};

use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use watchpost_archive::PictureStore;
use watchpost_types::{picture::NewPicture, WatchpostError};

/// Why a picture did not make it onto the writer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejected {
    Full,
    Closed,
}

/// Bounded queue in front of the archive, drained by one background task.
pub(crate) struct ArchiveWriter {
    sender: Mutex<Option<mpsc::Sender<NewPicture>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ArchiveWriter {
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn<S>(store: Arc<S>, capacity: usize) -> Self
    where
        S: PictureStore + 'static,
    {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(drain(store, receiver));
        Self {
            sender: Mutex::new(Some(sender)),
            task: Mutex::new(Some(task)),
        }
    }

    /// Never waits for the disk.
    pub(crate) fn enqueue(&self, picture: NewPicture) -> Result<(), Rejected> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            return Err(Rejected::Closed);
        };
        sender.try_send(picture).map_err(|err| match err {
            TrySendError::Full(_) => Rejected::Full,
            TrySendError::Closed(_) => Rejected::Closed,
        })
    }

    /// Stops accepting pictures and waits until queued ones are written.
    pub(crate) async fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                error!(error = %err, "archive writer task failed");
            }
        }
    }
}

async fn drain<S>(store: Arc<S>, mut receiver: mpsc::Receiver<NewPicture>)
where
    S: PictureStore + 'static,
{
    info!("archive writer started");
    while let Some(picture) = receiver.recv().await {
        let camera = picture.camera.clone();
        match store.save(picture).await {
            Ok(summary) => debug!(camera = %camera, filename = %summary.name, "frame archived"),
            Err(err @ WatchpostError::ArchiveFull { .. }) => {
                warn!(camera = %camera, error = %err, "frame too large for archive")
            }
            Err(err) => error!(camera = %camera, error = %err, "failed to archive frame"),
        }
    }
    info!("archive writer stopped");
}
