//! Background thread with a cooperative stop signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded};
use servolink_errors::{Result, ServoError};
use tracing::{error, info, warn};

/// Handed to the thread body; tells it when to return.
#[derive(Debug, Clone)]
pub(crate) struct StopSignal {
    running: Arc<AtomicBool>,
    rx: Receiver<()>,
}

impl StopSignal {
    pub(crate) fn is_stopped(&self) -> bool {
        !self.running.load(Ordering::Acquire)
    }

    /// Sleep for `period`. Returns `true` if a stop was requested meanwhile.
    pub(crate) fn sleep(&self, period: Duration) -> bool {
        match self.rx.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => self.is_stopped(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Worker {
    name: String,
    running: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let name = name.into();
        let running = Arc::new(AtomicBool::new(true));
        let (stop_tx, rx) = bounded(1);
        let signal = StopSignal {
            running: Arc::clone(&running),
            rx,
        };
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(signal))
            .map_err(|e| ServoError::invalid_state(format!("failed to spawn {name} thread: {e}")))?;
        info!(thread = %name, "thread started");
        Ok(Self {
            name,
            running,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Signal the thread and join it. Must not be called from the thread itself.
    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        // Dropping the sender wakes a sleeping thread immediately.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                warn!(thread = %self.name, "stop requested from the worker itself - detaching");
                return;
            }
            match handle.join() {
                Ok(()) => info!(thread = %self.name, "thread stopped cleanly"),
                Err(_) => error!(thread = %self.name, "thread panicked"),
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!(thread = %self.name, "worker dropped while still running - forcing stop");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tracing_test::traced_test;

    #[test]
    fn test_stop_wakes_sleeping_thread() -> Result<()> {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let mut worker = Worker::spawn("test-sleeper", move |stop| {
            while !stop.sleep(Duration::from_secs(60)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })?;
        assert!(worker.is_running());
        let started = std::time::Instant::now();
        worker.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        assert!(!worker.is_running());
        Ok(())
    }

    #[test]
    fn test_short_sleep_keeps_running() -> Result<()> {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let mut worker = Worker::spawn("test-ticker", move |stop| {
            while !stop.sleep(Duration::from_millis(1)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })?;
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        worker.stop();
        assert!(ticks.load(Ordering::SeqCst) >= 3);
        Ok(())
    }

    #[test]
    #[traced_test]
    fn test_lifecycle_is_logged() -> Result<()> {
        let mut worker = Worker::spawn("test-logged", |stop| while !stop.sleep(Duration::from_millis(5)) {})?;
        worker.stop();
        assert!(logs_contain("thread started"));
        assert!(logs_contain("thread stopped cleanly"));
        Ok(())
    }
}
