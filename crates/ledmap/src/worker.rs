//! Worker thread lifecycle shared by the mapping workers.
//!
//! Every worker runs on its own named thread and owns its resources. The owner
//! signals shutdown through the worker's [`ExitEvent`], then joins it.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};

/// Polling period of idle workers.
pub const TICK: Duration = Duration::from_millis(100);

/// Join timeout used when a handle is dropped without an explicit join.
pub const DROP_TIMEOUT: Duration = Duration::from_secs(5);

/// One-shot shutdown flag. Once set it stays set.
#[derive(Clone, Debug, Default)]
pub struct ExitEvent(Arc<AtomicBool>);

impl ExitEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Handle on a running worker thread.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    exit: ExitEvent,
    handle: Option<JoinHandle<()>>,
    // Disconnects when the thread ends, also on panic.
    done: Receiver<()>,
}

impl WorkerHandle {
    /// Spawn `body` on a thread called `name`. The body receives the exit event
    /// it must poll at every loop iteration.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> io::Result<Self>
    where
        F: FnOnce(ExitEvent) + Send + 'static,
    {
        let name = name.into();
        let exit = ExitEvent::new();
        let worker_exit = exit.clone();
        let worker_name = name.clone();
        let (done_tx, done) = channel::bounded::<()>(1);
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let _done = done_tx;
            debug!("{worker_name} started");
            body(worker_exit);
            debug!("{worker_name} stopped");
        })?;
        Ok(Self {
            name,
            exit,
            handle: Some(handle),
            done,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exit_event(&self) -> &ExitEvent {
        &self.exit
    }

    /// Ask the worker to stop at its next loop iteration.
    pub fn stop(&self) {
        self.exit.set();
    }

    /// Wait for the worker to finish on its own.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("worker {} panicked", self.name);
            }
        }
    }

    /// Stop the worker and wait at most `timeout` for it.
    ///
    /// A thread that is still busy afterwards is detached. Returns `true` when
    /// the worker finished in time.
    pub fn terminate(&mut self, timeout: Duration) -> bool {
        self.stop();
        let Some(handle) = self.handle.take() else {
            return true;
        };
        if let Err(RecvTimeoutError::Timeout) = self.done.recv_timeout(timeout) {
            warn!(
                "worker {} did not stop within {:.1}s, detaching it",
                self.name,
                timeout.as_secs_f64()
            );
            return false;
        }
        if handle.join().is_err() {
            warn!("worker {} panicked", self.name);
        }
        true
    }

    /// False once the worker finished, was joined or was detached.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.terminate(DROP_TIMEOUT);
    }
}

/// Copies every message to a list of output channels.
///
/// Closed outputs are dropped from the list; a consumer that went away must
/// not stall the producer.
#[derive(Debug)]
pub struct Fanout<T> {
    outputs: Vec<Sender<T>>,
}

impl<T> Default for Fanout<T> {
    fn default() -> Self {
        Self {
            outputs: Vec::new(),
        }
    }
}

impl<T: Clone> Fanout<T> {
    pub fn new(outputs: Vec<Sender<T>>) -> Self {
        Self { outputs }
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn send(&mut self, message: T) {
        let before = self.outputs.len();
        self.outputs.retain(|output| output.send(message.clone()).is_ok());
        if self.outputs.len() < before {
            debug!("{} output(s) disconnected", before - self.outputs.len());
        }
    }
}
