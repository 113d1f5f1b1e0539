//! Background expiry sweeper
//!
//! One named thread per cache with a finite TTL. It ticks at a fixed rate,
//! skipping ticks it falls behind on, and every wait (tick or watermark) is
//! interruptible by the stop signal.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

/// Stop flag the sweeper thread waits on
pub(crate) struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn stop(&self) {
        let mut stopped = self.stopped.lock();
        *stopped = true;
        self.cond.notify_all();
    }

    /// Block until `deadline` or until stopped; returns true when stopped
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.cond.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Handle to a running sweeper thread; stopping joins the thread
pub(crate) struct Sweeper {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn a thread calling `sweep` once per `interval`
    pub fn spawn<F>(interval: Duration, mut sweep: F) -> io::Result<Self>
    where
        F: FnMut(&StopSignal) + Send + 'static,
    {
        let signal = Arc::new(StopSignal::new());
        let thread_signal = Arc::clone(&signal);

        let handle = thread::Builder::new()
            .name("expirable-sweeper".to_string())
            .spawn(move || {
                let mut next_tick = Instant::now() + interval;
                while !thread_signal.wait_until(next_tick) {
                    sweep(&thread_signal);

                    next_tick += interval;
                    let now = Instant::now();
                    if next_tick < now {
                        next_tick = now;
                    }
                }
                debug!("Expiry sweeper stopped");
            })?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(&mut self) {
        self.signal.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Expiry sweeper thread panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
