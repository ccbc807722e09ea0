//! Progress, pause and cancel hooks consulted by the stream codec

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

/// Observer driven by the stream codec once per loop iteration.
///
/// Cancellation is cooperative: the codec checks `is_canceled` before each
/// chunk and stops there, leaving the output truncated.
pub trait ProgressListener {
    /// Total clear bytes processed so far.
    fn on_progress(&self, processed: u64);

    fn is_canceled(&self) -> bool;

    /// Block while the operation is paused.
    fn pause_if_needed(&self);
}

/// Listener that never pauses or cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressListener for NoProgress {
    fn on_progress(&self, _processed: u64) {}

    fn is_canceled(&self) -> bool {
        false
    }

    fn pause_if_needed(&self) {}
}

type ProgressCallback = Box<dyn Fn(u64) + Send + Sync>;

/// Thread-safe listener shared between a worker running the codec and a
/// controlling thread.
pub struct StreamControl {
    canceled: AtomicBool,
    paused: Mutex<bool>,
    resumed: Condvar,
    processed: AtomicU64,
    callback: Option<ProgressCallback>,
}

impl StreamControl {
    pub fn new() -> Self {
        Self {
            canceled: AtomicBool::new(false),
            paused: Mutex::new(false),
            resumed: Condvar::new(),
            processed: AtomicU64::new(0),
            callback: None,
        }
    }

    /// Invoke `callback` with the processed byte count on every progress report.
    pub fn with_callback<F>(callback: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
            ..Self::new()
        }
    }

    /// Request cancellation. Also releases a paused worker.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        let _guard = self.paused.lock().unwrap_or_else(PoisonError::into_inner);
        self.resumed.notify_all();
    }

    pub fn pause(&self) {
        *self.paused.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub fn resume(&self) {
        *self.paused.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.resumed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

impl Default for StreamControl {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StreamControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamControl")
            .field("canceled", &self.canceled.load(Ordering::Relaxed))
            .field("paused", &self.is_paused())
            .field("processed", &self.processed())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl ProgressListener for StreamControl {
    fn on_progress(&self, processed: u64) {
        self.processed.store(processed, Ordering::Relaxed);
        if let Some(callback) = &self.callback {
            callback(processed);
        }
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn pause_if_needed(&self) {
        let mut paused = self.paused.lock().unwrap_or_else(PoisonError::into_inner);
        while *paused && !self.is_canceled() {
            paused = self
                .resumed
                .wait(paused)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_no_progress_never_blocks() {
        let listener = NoProgress;
        listener.pause_if_needed();
        listener.on_progress(10);
        assert!(!listener.is_canceled());
    }

    #[test]
    fn test_callback_receives_progress() {
        let seen = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&seen);
        let control = StreamControl::with_callback(move |n| sink.store(n, Ordering::SeqCst));

        control.on_progress(4096);
        assert_eq!(seen.load(Ordering::SeqCst), 4096);
        assert_eq!(control.processed(), 4096);
    }

    #[test]
    fn test_cancel_is_sticky() {
        let control = StreamControl::new();
        assert!(!control.is_canceled());
        control.cancel();
        assert!(control.is_canceled());
        control.resume();
        assert!(control.is_canceled());
    }

    #[test]
    fn test_pause_blocks_until_resume() {
        let control = Arc::new(StreamControl::new());
        control.pause();
        assert!(control.is_paused());

        let worker = {
            let control = Arc::clone(&control);
            thread::spawn(move || {
                control.pause_if_needed();
                control.on_progress(1);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(control.processed(), 0, "worker must stay parked while paused");

        control.resume();
        worker.join().unwrap();
        assert_eq!(control.processed(), 1);
    }

    #[test]
    fn test_cancel_releases_paused_worker() {
        let control = Arc::new(StreamControl::new());
        control.pause();

        let worker = {
            let control = Arc::clone(&control);
            thread::spawn(move || {
                control.pause_if_needed();
                control.is_canceled()
            })
        };

        thread::sleep(Duration::from_millis(20));
        control.cancel();
        assert!(worker.join().unwrap());
    }
}
