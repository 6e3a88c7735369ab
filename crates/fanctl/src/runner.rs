use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error};

/// Granularity of [`StopFlag::sleep`].
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Cooperative cancellation flag shared with a background thread.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sleep for `duration` unless stopped meanwhile. Returns `false` when
    /// the flag was raised.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// A named thread running a loop until told to stop.
///
/// Dropping the runner raises the stop flag and joins the thread, so one
/// runner value always stands for at most one live thread.
#[derive(Debug)]
pub struct Runner<T = ()> {
    name: String,
    stop: StopFlag,
    thread: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> Runner<T> {
    pub fn spawn<F>(name: &str, body: F) -> io::Result<Self>
    where
        F: FnOnce(StopFlag) -> T + Send + 'static,
    {
        let stop = StopFlag::new();
        let flag = stop.clone();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag))?;
        debug!(name, "runner started");
        Ok(Self {
            name: name.to_string(),
            stop,
            thread: Some(thread),
        })
    }

    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    /// `true` once the thread body returned.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop and wait for the thread. `None` if it panicked.
    pub fn join(mut self) -> Option<T> {
        self.stop.stop();
        self.thread.take().and_then(|thread| self.wait(thread))
    }

    fn wait(&self, thread: JoinHandle<T>) -> Option<T> {
        match thread.join() {
            Ok(value) => {
                debug!(name = %self.name, "runner joined");
                Some(value)
            }
            Err(_) => {
                error!(name = %self.name, "runner thread panicked");
                None
            }
        }
    }
}

impl<T> Drop for Runner<T> {
    fn drop(&mut self) {
        self.stop.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(name = %self.name, "runner thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn drop_stops_and_joins() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let counter = iterations.clone();
        let runner = Runner::spawn("test-loop", move |stop| {
            while stop.sleep(Duration::from_millis(5)) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        })
        .expect("spawn");
        thread::sleep(Duration::from_millis(30));
        drop(runner);
        let seen = iterations.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(iterations.load(Ordering::Relaxed), seen);
    }

    #[test]
    fn join_returns_the_body_result() {
        let runner = Runner::spawn("test-result", |stop| {
            while !stop.is_stopped() {
                thread::sleep(Duration::from_millis(1));
            }
            7
        })
        .expect("spawn");
        assert_eq!(runner.join(), Some(7));
    }

    #[test]
    fn sleep_returns_early_when_stopped() {
        let flag = StopFlag::new();
        flag.stop();
        let start = Instant::now();
        assert!(!flag.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(StopFlag::new().sleep(Duration::from_millis(1)));
    }
}
