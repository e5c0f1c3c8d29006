//! Background thread plumbing shared by the polling and streaming data systems.
use std::{
    cell::Cell,
    sync::{
        mpsc::{Receiver, RecvTimeoutError, SyncSender},
        Arc, Condvar, Mutex,
    },
    time::{Duration, Instant},
};

use rand::{thread_rng, Rng};

use crate::{logging::Logger, Error, Result};

/// Outcome of the first synchronization, shared between the background thread and the threads
/// waiting for it.
///
/// Holds `None` if data hasn't been received yet. Holds `Some(Ok(()))` once data has been
/// received. Holds `Some(Err(...))` if the thread gave up before receiving any data.
#[derive(Debug, Default)]
pub(crate) struct Readiness {
    result: Mutex<Option<Result<()>>>,
    condvar: Condvar,
}

impl Readiness {
    pub(crate) fn new() -> Readiness {
        Readiness::default()
    }

    /// Record an outcome. Once data has been received, later failures do not change readiness.
    pub(crate) fn set(&self, value: Result<()>) {
        let Ok(mut result) = self.result.lock() else {
            return;
        };
        if !matches!(*result, Some(Ok(()))) {
            *result = Some(value);
        }
        self.condvar.notify_all();
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.result
            .lock()
            .map(|result| matches!(*result, Some(Ok(()))))
            .unwrap_or(false)
    }

    /// Block up to `timeout` for an outcome. Returns `None` if none arrived in time.
    pub(crate) fn wait(&self, timeout: Duration) -> Option<Result<()>> {
        let deadline = Instant::now() + timeout;
        let mut lock = self.result.lock().ok()?;
        loop {
            if let Some(result) = &*lock {
                return Some(result.clone());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            lock = self.condvar.wait_timeout(lock, remaining).ok()?.0;
        }
    }
}

/// Receiving end of the stop command, owned by the background thread.
pub(crate) struct StopSignal {
    receiver: Receiver<()>,
    stopped: Cell<bool>,
}

impl StopSignal {
    /// Sleep up to `timeout`. Returns `true` if the thread should exit.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        if self.stopped.get() {
            return true;
        }
        match self.receiver.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => false,
            // When the other end of channel disconnects, calls to .recv_timeout() return
            // immediately. Treat it as a stop command.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.stopped.set(true);
                true
            }
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.wait(Duration::ZERO)
    }
}

/// A named background thread that can be asked to stop.
pub(crate) struct SyncThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the thread.
    stop_sender: SyncSender<()>,
}

impl SyncThread {
    /// Spawn `body`. A panic inside `body` is recorded in `readiness` as
    /// [`Error::DataSystemThreadPanicked`].
    pub(crate) fn spawn(
        name: &str,
        logger: Logger,
        readiness: Arc<Readiness>,
        body: impl FnOnce(&StopSignal) + Send + 'static,
    ) -> std::io::Result<SyncThread> {
        // Using `sync_channel` here as it makes `stop_sender` `Sync` (shareable between
        // threads). Buffer size of 1 should be enough for our use case as we're sending a stop
        // command, and we can simply `try_send()` and ignore if the buffer is full (another thread
        // has sent a stop command already).
        let (stop_sender, receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let join_handle = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let signal = StopSignal {
                    receiver,
                    stopped: Cell::new(false),
                };
                let result =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body(&signal)));

                // If catch_unwind returns Err, it means a panic occurred.
                if result.is_err() {
                    ld_error!(logger, "data system thread panicked");
                    readiness.set(Err(Error::DataSystemThreadPanicked));
                }
            })?;

        Ok(SyncThread {
            join_handle,
            stop_sender,
        })
    }

    /// Ask the thread to stop. Does not wait for the thread to actually stop.
    pub(crate) fn stop(&self) {
        // Error means that the receiver was dropped (thread exited) or the channel buffer is
        // full. Both mean there is nothing left to do.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the thread and block waiting for it to exit.
    pub(crate) fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle
            .join()
            .map_err(|_| Error::DataSystemThreadPanicked)
    }
}

/// Apply randomized `jitter` to `interval`.
pub(crate) fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}

/// Reconnection delay for the given attempt: exponential from `initial`, capped at `max`, with
/// up to half of it removed at random.
pub(crate) fn backoff(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let delay = initial
        .checked_mul(2u32.saturating_pow(attempt))
        .unwrap_or(max)
        .min(max);
    jitter(delay, delay / 2)
}
