//! A cancellable fixed-rate background task on its own thread.

use std::ops::ControlFlow;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Error};

pub struct PeriodicTask {
    name: String,
    stop_tx: Option<Sender<()>>,
    // Never sent on; the sender is dropped when the thread exits, panics included.
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Runs `tick` at a fixed rate of once per `period`, first one `period` after spawning. A tick
    /// that overruns its slot is followed by the next one right away. The task ends when `tick`
    /// breaks or when [`PeriodicTask::stop`] is called.
    pub fn spawn<F>(name: &str, period: Duration, mut tick: F) -> Result<Self, Error>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _done = done_tx;
                let mut next_tick = Instant::now() + period;
                loop {
                    let wait = next_tick.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            if tick().is_break() {
                                break;
                            }
                            // fixed rate: the schedule does not drift by the time a tick takes
                            next_tick += period;
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("periodic task {:?} exited", thread::current().name());
            })?;

        Ok(PeriodicTask {
            name: name.to_string(),
            stop_tx: Some(stop_tx),
            done_rx,
            handle: Some(handle),
        })
    }

    /// Cancels the task and waits up to `timeout` for an in-flight tick to finish.
    pub fn stop(mut self, timeout: Duration) -> Result<(), Error> {
        self.stop_tx.take();

        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                bail!("{} did not stop within {:?}", self.name, timeout)
            }
        }

        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("{} panicked", self.name))?;
        }
        Ok(())
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        // Signal only; joining from a destructor could block the dropping thread.
        self.stop_tx.take();
    }
}
