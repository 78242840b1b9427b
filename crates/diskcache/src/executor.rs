//! Background worker pool
//!
//! Small thread pool for usage refreshes and trim passes:
//! - Unbounded FIFO queue (`crossbeam-channel`)
//! - Workers are spawned on demand up to `max_workers`
//! - Workers above `min_workers` retire after `keep_alive` without work
//! - `shutdown` cancels queued tasks and joins running ones

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use diskstore::{Error, Result};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

/// Worker pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Workers kept alive while idle
    pub min_workers: usize,
    /// Upper bound on concurrent workers
    pub max_workers: usize,
    /// How long a surplus worker waits for work before retiring
    pub keep_alive: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 5,
            keep_alive: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskStatus {
    Queued,
    Running,
    Finished,
    Cancelled,
}

struct TaskState {
    status: Mutex<TaskStatus>,
    done: Condvar,
}

impl TaskState {
    fn new() -> Self {
        Self {
            status: Mutex::new(TaskStatus::Queued),
            done: Condvar::new(),
        }
    }

    fn cancel(&self) -> bool {
        let mut status = self.status.lock();
        if *status != TaskStatus::Queued {
            return false;
        }
        *status = TaskStatus::Cancelled;
        self.done.notify_all();
        true
    }

    fn start(&self) -> bool {
        let mut status = self.status.lock();
        if *status != TaskStatus::Queued {
            return false;
        }
        *status = TaskStatus::Running;
        true
    }

    fn finish(&self) {
        *self.status.lock() = TaskStatus::Finished;
        self.done.notify_all();
    }
}

/// Handle to a submitted task
#[derive(Clone)]
pub struct TaskHandle {
    name: &'static str,
    state: Arc<TaskState>,
}

impl TaskHandle {
    /// Name given at submission
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cancel the task if it has not started yet
    ///
    /// Returns false when it is already running or done.
    pub fn cancel(&self) -> bool {
        self.state.cancel()
    }

    /// Has the task run to completion or been cancelled?
    pub fn is_finished(&self) -> bool {
        matches!(
            *self.state.status.lock(),
            TaskStatus::Finished | TaskStatus::Cancelled
        )
    }

    /// Was the task cancelled before it started?
    pub fn is_cancelled(&self) -> bool {
        *self.state.status.lock() == TaskStatus::Cancelled
    }

    /// Block until the task finishes or is cancelled
    pub fn wait(&self) {
        let mut status = self.state.status.lock();
        while matches!(*status, TaskStatus::Queued | TaskStatus::Running) {
            self.state.done.wait(&mut status);
        }
    }
}

struct Task {
    name: &'static str,
    job: Box<dyn FnOnce() + Send + 'static>,
    state: Arc<TaskState>,
}

impl Task {
    fn run(self) {
        if !self.state.start() {
            debug!(task = self.name, "Skipping cancelled task");
            return;
        }

        if panic::catch_unwind(AssertUnwindSafe(self.job)).is_err() {
            error!(task = self.name, "Background task panicked");
        }
        self.state.finish();
    }
}

#[derive(Default)]
struct PoolState {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    live: usize,
    idle: usize,
    queued: usize,
    running: usize,
    closed: bool,
}

struct Pool {
    config: ExecutorConfig,
    receiver: Receiver<Task>,
    state: Mutex<PoolState>,
    drained: Condvar,
}

impl Pool {
    fn notify_if_drained(&self, state: &PoolState) {
        if state.queued == 0 && state.running == 0 {
            self.drained.notify_all();
        }
    }
}

/// Runs background work off the caller's thread
pub struct BackgroundExecutor {
    pool: Arc<Pool>,
}

impl BackgroundExecutor {
    /// Create a pool; no threads start until the first submission
    pub fn new(config: ExecutorConfig) -> Self {
        let (sender, receiver) = unbounded();

        Self {
            pool: Arc::new(Pool {
                config,
                receiver,
                state: Mutex::new(PoolState {
                    sender: Some(sender),
                    ..PoolState::default()
                }),
                drained: Condvar::new(),
            }),
        }
    }

    /// Queue a task
    ///
    /// # Returns
    /// * `Err(Error::ShutDown)` - The pool no longer accepts work
    pub fn submit<F>(&self, name: &'static str, job: F) -> Result<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Task {
            name,
            job: Box::new(job),
            state: Arc::new(TaskState::new()),
        };
        let handle = TaskHandle {
            name,
            state: Arc::clone(&task.state),
        };

        let mut state = self.pool.state.lock();
        if state.closed {
            return Err(Error::ShutDown);
        }

        if state.queued + 1 > state.idle && state.live < self.pool.config.max_workers {
            match self.spawn_worker() {
                Ok(worker) => {
                    state.workers.retain(|w| !w.is_finished());
                    state.workers.push(worker);
                    state.live += 1;
                }
                Err(e) if state.live == 0 => return Err(e.into()),
                Err(e) => warn!(error = %e, "Failed to spawn background worker"),
            }
        }

        let Some(sender) = state.sender.as_ref() else {
            return Err(Error::ShutDown);
        };
        if sender.send(task).is_err() {
            return Err(Error::ShutDown);
        }
        state.queued += 1;

        Ok(handle)
    }

    /// Block until no task is queued or running
    pub fn wait_idle(&self) {
        let mut state = self.pool.state.lock();
        while state.queued > 0 || state.running > 0 {
            self.pool.drained.wait(&mut state);
        }
    }

    /// Number of live worker threads
    pub fn worker_count(&self) -> usize {
        self.pool.state.lock().live
    }

    /// Has the pool been shut down?
    pub fn is_shut_down(&self) -> bool {
        self.pool.state.lock().closed
    }

    /// Cancel queued tasks, let running ones finish, and join every worker
    ///
    /// Calling it again is a no-op.
    pub fn shutdown(&self) {
        let (sender, workers) = {
            let mut state = self.pool.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (state.sender.take(), std::mem::take(&mut state.workers))
        };
        drop(sender);

        let mut cancelled = 0usize;
        while let Ok(task) = self.pool.receiver.try_recv() {
            task.state.cancel();
            cancelled += 1;
            let mut state = self.pool.state.lock();
            state.queued -= 1;
            self.pool.notify_if_drained(&state);
        }

        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("Background worker exited abnormally");
            }
        }

        debug!(cancelled, "Background executor shut down");
    }

    fn spawn_worker(&self) -> std::io::Result<JoinHandle<()>> {
        let pool = Arc::clone(&self.pool);
        thread::Builder::new()
            .name("diskcache-worker".to_string())
            .spawn(move || worker_loop(pool))
    }
}

impl Drop for BackgroundExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(pool: Arc<Pool>) {
    loop {
        pool.state.lock().idle += 1;
        let received = pool.receiver.recv_timeout(pool.config.keep_alive);

        let mut state = pool.state.lock();
        state.idle -= 1;

        match received {
            Ok(task) => {
                state.queued -= 1;
                state.running += 1;
                drop(state);

                task.run();

                let mut state = pool.state.lock();
                state.running -= 1;
                pool.notify_if_drained(&state);
            }
            Err(RecvTimeoutError::Timeout) => {
                if state.queued > 0 {
                    continue;
                }
                if state.closed || state.live > pool.config.min_workers {
                    state.live -= 1;
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                state.live -= 1;
                return;
            }
        }
    }
}
