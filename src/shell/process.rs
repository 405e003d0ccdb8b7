use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use log::debug;
use nix::sys::signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Running,
    Stopped,
}

/// Lifecycle of one invokable unit: a registered command, a background job
/// or the shell itself.
///
/// `stop` happens at most once and releases every `wait`. SIGKILL and SIGSTOP
/// are not queued, they stop the process outright; other signals go to the
/// listeners registered with [`Process::notify`].
pub struct Process {
    state: Mutex<State>,
    stopped: Condvar,
    listeners: Mutex<HashMap<Signal, Vec<Sender<Signal>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Process {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Idle),
            stopped: Condvar::new(),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> State {
        *lock(&self.state)
    }

    /// Arms the completion wait.
    pub fn start(&self) {
        let mut state = lock(&self.state);
        if *state == State::Idle {
            *state = State::Running;
        }
    }

    /// True until the process has been stopped.
    pub fn running(&self) -> bool {
        self.state() != State::Stopped
    }

    /// Returns whether this call performed the transition.
    pub fn stop(&self) -> bool {
        let mut state = lock(&self.state);
        if *state == State::Stopped {
            return false;
        }
        *state = State::Stopped;
        self.stopped.notify_all();
        true
    }

    /// Blocks while the process is running.
    pub fn wait(&self) {
        let mut state = lock(&self.state);
        while *state == State::Running {
            state = self
                .stopped
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn kill(&self) {
        self.signal(Signal::SIGKILL);
    }

    pub fn signal(&self, signal: Signal) {
        if matches!(signal, Signal::SIGKILL | Signal::SIGSTOP) {
            debug!("{} stops process", signal);
            self.stop();
            return;
        }

        let mut listeners = lock(&self.listeners);
        if let Some(queues) = listeners.get_mut(&signal) {
            queues.retain(|queue| queue.send(signal).is_ok());
        }
    }

    /// Registers a new listener queue for `signals`.
    pub fn notify(&self, signals: &[Signal]) -> Receiver<Signal> {
        let (tx, rx) = mpsc::channel();
        let mut listeners = lock(&self.listeners);
        for (i, signal) in signals.iter().enumerate() {
            // a queue is registered once per kind
            if signals[..i].contains(signal) {
                continue;
            }
            listeners.entry(*signal).or_default().push(tx.clone());
        }
        rx
    }
}

impl Default for Process {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("state", &self.state())
            .finish()
    }
}
