//! Threading with cooperative shutdown.
//!
//! Every long-running actor runs on its own thread and is handed a
//! `Shutdown`. Triggering it closes a channel, which wakes every `select!`
//! and timed wait that includes the signal.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::io;
use std::thread;
use std::time::Duration;

/// The receiving half of a shutdown signal. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Shutdown {
    signal: Receiver<()>,
}

/// The triggering half of a shutdown signal.
#[derive(Debug)]
pub struct Trigger {
    _signal: Sender<()>,
}

/// Create a linked trigger and shutdown pair.
pub fn signal() -> (Trigger, Shutdown) {
    let (snd, rcv) = crossbeam_channel::bounded(0);
    (Trigger { _signal: snd }, Shutdown { signal: rcv })
}

impl Trigger {
    /// Signal shutdown to every clone of the paired `Shutdown`.
    pub fn fire(self) {
        // Dropping the only sender disconnects the channel.
    }
}

impl Shutdown {
    /// The channel to include in a `select!`. It becomes ready, with an
    /// error, once shutdown is triggered.
    pub fn signal(&self) -> &Receiver<()> {
        &self.signal
    }

    /// Whether shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        match self.signal.try_recv() {
            Err(TryRecvError::Disconnected) => true,
            _ => false,
        }
    }

    /// Sleep for `timeout` unless shutdown is triggered first. Returns true
    /// when woken by shutdown.
    pub fn wait(&self, timeout: Duration) -> bool {
        match self.signal.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => false,
            _ => true,
        }
    }
}

/// A spawned actor thread and the trigger that stops it.
#[derive(Debug)]
pub struct ThreadHandle {
    name: String,
    handle: thread::JoinHandle<()>,
    trigger: Trigger,
}

impl ThreadHandle {
    /// Join the given thread, blocking until it exits on its own.
    pub fn join(self) {
        let ThreadHandle { name, handle, trigger } = self;
        if handle.join().is_err() {
            error!("thread {} panicked", name);
        }
        drop(trigger);
    }

    /// Gracefully shut down the given thread, blocking until it exits.
    ///
    /// It is the responsibility of the thread's body to observe its
    /// `Shutdown`.
    pub fn shutdown(self) {
        let ThreadHandle { name, handle, trigger } = self;
        trigger.fire();
        debug!("waiting on thread {}", name);
        if handle.join().is_err() {
            error!("thread {} panicked", name);
        }
    }
}

/// Spawn a named thread executing the provided closure with its own
/// `Shutdown`.
pub fn spawn<F>(name: &str, f: F) -> io::Result<ThreadHandle>
where
    F: FnOnce(Shutdown) + Send + 'static,
{
    let (trigger, shutdown) = signal();
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || f(shutdown))?;
    Ok(ThreadHandle {
        name: name.to_string(),
        handle,
        trigger,
    })
}
