//! Background worker pool with a completion channel.
//!
//! The owner thread submits boxed tasks and later drains their completions;
//! workers never call back into owner state. This keeps every piece of
//! gesture and overlay state single-threaded while rasterization and document
//! writes run elsewhere.

use crate::CancellationToken;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Identifier assigned to each submitted task, increasing per pool
pub type TaskId = u64;

/// Work item executed on a worker thread.
///
/// The task receives its cancellation token and should return early when it
/// is cancelled; the owner discards results of cancelled tasks anyway.
pub type Task<T> = Box<dyn FnOnce(&CancellationToken) -> T + Send + 'static>;

/// How a task ended
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Finished(T),
    /// Cancelled before it started, or returned after being cancelled
    Cancelled,
    /// The task panicked; the worker survives
    Panicked,
}

/// A finished task, delivered back to the owner thread
#[derive(Debug)]
pub struct Completion<T> {
    pub id: TaskId,
    pub outcome: TaskOutcome<T>,
}

/// Handle returned by [`WorkerPool::submit`]
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub id: TaskId,
    pub token: CancellationToken,
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    pub num_workers: usize,

    /// Thread name prefix; threads are named `<prefix>-<index>`.
    pub thread_name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { num_workers: 1, thread_name: "pdf-markup-worker".to_string() }
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self { num_workers: num_workers.max(1), ..Self::default() }
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

struct Envelope<T> {
    id: TaskId,
    token: CancellationToken,
    task: Task<T>,
}

/// Worker pool executing tasks in submission order per worker.
///
/// With a single worker, tasks run strictly in submission order, which the
/// persistence bridge relies on (append before save).
pub struct WorkerPool<T: Send + 'static> {
    sender: Option<Sender<Envelope<T>>>,
    completions: Receiver<Completion<T>>,
    workers: Vec<JoinHandle<()>>,
    aborted: Arc<AtomicBool>,
    next_id: TaskId,
    in_flight: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn the worker threads
    pub fn new(config: WorkerPoolConfig) -> io::Result<Self> {
        let (sender, inbox) = mpsc::channel::<Envelope<T>>();
        let (completion_tx, completions) = mpsc::channel::<Completion<T>>();
        let inbox = Arc::new(Mutex::new(inbox));
        let aborted = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.num_workers.max(1));
        for index in 0..config.num_workers.max(1) {
            let inbox = Arc::clone(&inbox);
            let completion_tx = completion_tx.clone();
            let aborted = Arc::clone(&aborted);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, index))
                .spawn(move || Self::run(inbox, completion_tx, aborted))?;
            workers.push(handle);
        }

        Ok(Self { sender: Some(sender), completions, workers, aborted, next_id: 0, in_flight: 0 })
    }

    /// Submit a task with a fresh cancellation token
    pub fn submit(&mut self, task: Task<T>) -> TaskHandle {
        self.submit_with_token(task, CancellationToken::new())
    }

    /// Submit a task under a token the caller already holds
    pub fn submit_with_token(&mut self, task: Task<T>, token: CancellationToken) -> TaskHandle {
        self.next_id += 1;
        let id = self.next_id;
        let envelope = Envelope { id, token: token.clone(), task };

        match self.sender.as_ref().map(|sender| sender.send(envelope)) {
            Some(Ok(())) => self.in_flight += 1,
            _ => {
                // Every worker is gone; the task can never run.
                log::warn!("worker pool is closed, task {id} dropped");
                token.cancel();
            }
        }

        TaskHandle { id, token }
    }

    /// Drain every completion that is ready, without blocking
    pub fn try_completions(&mut self) -> Vec<Completion<T>> {
        let ready: Vec<_> = self.completions.try_iter().collect();
        self.in_flight = self.in_flight.saturating_sub(ready.len());
        ready
    }

    /// Block up to `timeout` for the next completion
    pub fn wait_completion(&mut self, timeout: Duration) -> Option<Completion<T>> {
        if self.in_flight == 0 {
            return None;
        }
        match self.completions.recv_timeout(timeout) {
            Ok(completion) => {
                self.in_flight -= 1;
                Some(completion)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Number of submitted tasks whose completion has not been drained
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting work, let queued tasks drain, and join every thread.
    ///
    /// Dropping the pool does the same.
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Stop accepting work and join every thread without running what is
    /// still queued. The task already running finishes normally.
    pub fn abort(mut self) {
        self.aborted.store(true, Ordering::Release);
        self.stop();
    }

    fn stop(&mut self) {
        // Closing the channel ends each worker's receive loop once the queue is empty.
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("worker thread exited by panic");
            }
        }
    }

    fn run(
        inbox: Arc<Mutex<Receiver<Envelope<T>>>>,
        completions: Sender<Completion<T>>,
        aborted: Arc<AtomicBool>,
    ) {
        loop {
            let envelope = {
                let Ok(inbox) = inbox.lock() else { break };
                match inbox.recv() {
                    Ok(envelope) => envelope,
                    Err(_) => break,
                }
            };

            let Envelope { id, token, task } = envelope;
            let outcome = if token.is_cancelled() || aborted.load(Ordering::Acquire) {
                TaskOutcome::Cancelled
            } else {
                match panic::catch_unwind(AssertUnwindSafe(|| task(&token))) {
                    Ok(_) if token.is_cancelled() => TaskOutcome::Cancelled,
                    Ok(output) => TaskOutcome::Finished(output),
                    Err(_) => TaskOutcome::Panicked,
                }
            };

            if completions.send(Completion { id, outcome }).is_err() {
                // Owner dropped the pool; nobody is listening.
                break;
            }
        }
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
