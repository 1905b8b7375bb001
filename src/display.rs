//! Display hand-off
//!
//! The producer thread never touches the display directly. It pushes
//! [`DisplayFrame`]s into an ordered queue; a single consumer (a dedicated
//! thread, or the host UI's own event loop) drains the queue and presents the
//! frames in the order they were dispatched. At most
//! [`DISPLAY_QUEUE_DEPTH`] frames wait in the queue; while it is full new
//! frames are skipped, so a slow or absent consumer never sees a frame out of
//! order and never makes the queue grow.

use crate::frame::DisplayFrame;
use crate::utils::error::{CameraError, CameraResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};

/// Frames allowed to wait for the consumer
pub const DISPLAY_QUEUE_DEPTH: usize = 4;

/// Rendering surface
pub trait DisplaySink: Send + 'static {
    /// Show `frame`; called on the consumer side, in dispatch order
    fn present(&mut self, frame: DisplayFrame);

    /// Remove the current image
    fn clear(&mut self) {}
}

impl<S: DisplaySink + ?Sized> DisplaySink for Box<S> {
    fn present(&mut self, frame: DisplayFrame) {
        (**self).present(frame)
    }

    fn clear(&mut self) {
        (**self).clear()
    }
}

/// Sink that discards everything
#[derive(Debug, Default)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn present(&mut self, _frame: DisplayFrame) {}
}

/// Most recently queued frame
///
/// Swapped atomically as a whole; readers see the old frame or the new one.
#[derive(Debug, Default)]
pub struct LatestFrame(RwLock<Option<DisplayFrame>>);

impl LatestFrame {
    pub fn get(&self) -> Option<DisplayFrame> {
        self.0.read().clone()
    }

    fn set(&self, frame: Option<DisplayFrame>) {
        *self.0.write() = frame;
    }
}

enum DisplayMessage {
    Frame(DisplayFrame),
    Clear,
    Flush(oneshot::Sender<()>),
}

/// Producer side of the display queue
///
/// Frames are bounded by a pending count; `Clear` and `Flush` are only sent
/// by explicit calls and are never dropped.
#[derive(Clone)]
pub struct DisplayHandle {
    tx: mpsc::UnboundedSender<DisplayMessage>,
    pending: Arc<AtomicUsize>,
    latest: Arc<LatestFrame>,
}

impl DisplayHandle {
    /// Queue a frame for presentation without blocking
    ///
    /// Returns `Ok(false)` if the queue was full and the frame was skipped.
    pub fn present(&self, frame: DisplayFrame) -> CameraResult<bool> {
        if self.pending.fetch_add(1, Ordering::SeqCst) >= DISPLAY_QUEUE_DEPTH {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::trace!("Display queue full, skipping frame");
            return Ok(false);
        }

        if self.tx.send(DisplayMessage::Frame(frame.clone())).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(CameraError::Pipeline(
                "display consumer has shut down".to_string(),
            ));
        }

        self.latest.set(Some(frame));
        Ok(true)
    }

    /// Frames queued and not yet taken by the consumer
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Queue a clear behind every frame already dispatched
    pub fn clear(&self) {
        self.latest.set(None);
        if self.tx.send(DisplayMessage::Clear).is_err() {
            tracing::debug!("Display consumer gone, clear dropped");
        }
    }

    /// Block until the consumer has handled everything queued so far
    ///
    /// Must not be called from inside an async runtime, or from the consumer
    /// thread itself.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(DisplayMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.blocking_recv();
        }
    }

    pub fn latest(&self) -> Option<DisplayFrame> {
        self.latest.get()
    }
}

/// Consumer side of the display queue
pub struct DisplayQueue {
    rx: mpsc::UnboundedReceiver<DisplayMessage>,
    pending: Arc<AtomicUsize>,
}

/// Create a connected producer/consumer pair
pub fn display_channel() -> (DisplayHandle, DisplayQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        DisplayHandle {
            tx,
            pending: pending.clone(),
            latest: Arc::new(LatestFrame::default()),
        },
        DisplayQueue { rx, pending },
    )
}

fn dispatch(message: DisplayMessage, pending: &AtomicUsize, sink: &mut dyn DisplaySink) {
    match message {
        DisplayMessage::Frame(frame) => {
            pending.fetch_sub(1, Ordering::SeqCst);
            sink.present(frame)
        }
        DisplayMessage::Clear => sink.clear(),
        DisplayMessage::Flush(ack) => {
            let _ = ack.send(());
        }
    }
}

impl DisplayQueue {
    /// Present everything currently queued, without waiting
    ///
    /// For hosts that own their UI loop: call this from the UI thread on each
    /// tick. Returns the number of frames presented.
    pub fn drain_into(&mut self, sink: &mut dyn DisplaySink) -> usize {
        let mut presented = 0;
        while let Ok(message) = self.rx.try_recv() {
            if matches!(message, DisplayMessage::Frame(_)) {
                presented += 1;
            }
            dispatch(message, &self.pending, sink);
        }
        presented
    }

    /// Move the queue onto a dedicated display thread driving `sink`
    pub fn spawn<S: DisplaySink>(mut self, mut sink: S) -> std::io::Result<DisplayThread> {
        let handle = std::thread::Builder::new()
            .name("display".to_string())
            .spawn(move || {
                while let Some(message) = self.rx.blocking_recv() {
                    dispatch(message, &self.pending, &mut sink);
                }
                tracing::debug!("Display thread exiting");
            })?;

        Ok(DisplayThread {
            handle: Some(handle),
        })
    }
}

/// Dedicated consumer thread; exits once every [`DisplayHandle`] is dropped
pub struct DisplayThread {
    handle: Option<JoinHandle<()>>,
}

impl DisplayThread {
    /// Wait for the thread to exit
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Display sink panicked");
            }
        }
    }
}
