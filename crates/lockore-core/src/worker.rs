//! One-shot background worker.
//!
//! Key derivation and bulk record copies run on a dedicated thread while the
//! caller polls progress and may cancel. The caller must [`join`] before it
//! touches any buffer the worker owned.
//!
//! [`join`]: BackgroundTask::join

use std::thread::JoinHandle;

use crate::cancel::CancelToken;
use crate::error::{LockoreError, LockoreResult};

pub struct BackgroundTask<T> {
    name: String,
    cancel: CancelToken,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> BackgroundTask<T> {
    /// Spawn `work` on a named thread. The closure receives the task's
    /// cancellation token.
    pub fn spawn<F>(name: &str, work: F) -> LockoreResult<Self>
    where
        F: FnOnce(CancelToken) -> T + Send + 'static,
    {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || work(token))?;
        tracing::debug!(task = name, "background task started");
        Ok(Self {
            name: name.to_string(),
            cancel,
            handle: Some(handle),
        })
    }

    pub fn cancel(&self) {
        tracing::debug!(task = %self.name, "background task cancel requested");
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the worker and return its result.
    pub fn join(mut self) -> LockoreResult<T> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| LockoreError::InvalidArgument("task already joined".into()))?;
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("background task '{}' panicked", self.name).into())
    }

    /// Cancel and wait.
    pub fn cancel_and_join(self) -> LockoreResult<T> {
        self.cancel();
        self.join()
    }
}

impl<T> Drop for BackgroundTask<T> {
    fn drop(&mut self) {
        // Never leave a detached worker holding secrets.
        if let Some(handle) = self.handle.take() {
            self.cancel.cancel();
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_join_returns_value() {
        let task = BackgroundTask::spawn("test-join", |_| 41 + 1).unwrap();
        assert_eq!(task.join().unwrap(), 42);
    }

    #[test]
    fn test_cancel_stops_loop() {
        let task = BackgroundTask::spawn("test-cancel", |cancel| {
            let mut spins = 0u64;
            while !cancel.is_cancelled() {
                spins += 1;
                std::thread::sleep(Duration::from_millis(1));
            }
            spins
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(10));
        let spins = task.cancel_and_join().unwrap();
        assert!(spins > 0);
    }

    #[test]
    fn test_panicking_worker_is_an_error() {
        let task: BackgroundTask<()> =
            BackgroundTask::spawn("test-panic", |_| panic!("boom")).unwrap();
        assert!(task.join().is_err());
    }
}
