//! Fixed-size worker pool with pollable result handles.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tabular_edit_core::config::EditConfig;
use tabular_edit_core::error::EditError;
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::Result;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Work queue guarded by the queue mutex.
struct Queue {
    jobs: VecDeque<Job>,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    /// Signalled when work is enqueued or shutdown begins
    available: Condvar,
}

/// Fixed-size pool of worker threads executing boxed closures.
///
/// The queue lock is held only to enqueue or dequeue, never while work runs.
/// Shutdown drains already queued work before the workers exit.
pub struct TaskExecutor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl TaskExecutor {
    /// Creates an executor and starts its workers.
    ///
    /// # Arguments
    /// * `worker_count` - Number of worker threads (must be non-zero)
    pub fn new(worker_count: usize) -> Result<Self> {
        if worker_count == 0 {
            return Err(EditError::InvalidConfig(
                "worker_count must be greater than zero".to_string(),
            ));
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let worker_shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("edit-worker-{}", index))
                .spawn(move || worker_loop(worker_shared));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Release the workers already started.
                    shared.queue.lock().shutdown = true;
                    shared.available.notify_all();
                    return Err(EditError::WorkerSpawn(e.to_string()));
                }
            }
        }

        tracing::debug!("Task executor started with {} workers", worker_count);
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            worker_count,
        })
    }

    /// Creates an executor sized from configuration.
    pub fn from_config(config: &EditConfig) -> Result<Self> {
        Self::new(config.resolved_worker_count())
    }

    /// Queues work and returns a handle to its eventual result.
    ///
    /// A panic inside `work` is caught on the worker and delivered through
    /// the handle as `TaskPanicked`; a handle dropped unobserved loses it.
    ///
    /// # Returns
    /// `ExecutorShutdown` once shutdown has begun.
    pub fn submit<F, T>(&self, work: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(work)).map_err(|panic| {
                let message = panic_message(panic.as_ref());
                tracing::error!("Task panicked: {}", message);
                EditError::TaskPanicked(message)
            });
            // Receiver may already be gone; the result is then lost.
            let _ = tx.send(result);
        });

        {
            let mut queue = self.shared.queue.lock();
            if queue.shutdown {
                return Err(EditError::ExecutorShutdown);
            }
            queue.jobs.push_back(job);
        }
        self.shared.available.notify_one();
        Ok(TaskHandle::new(rx))
    }

    /// Stops accepting work, drains the queue and joins the workers.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.shutdown = true;
        }
        self.shared.available.notify_all();

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::error!("Worker thread exited abnormally");
            }
        }
        tracing::debug!("Task executor shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.queue.lock().shutdown
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Returns the number of queued tasks not yet picked up by a worker.
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("worker_count", &self.worker_count)
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break Some(job);
                }
                if queue.shutdown {
                    break None;
                }
                shared.available.wait(&mut queue);
            }
        };

        match job {
            Some(job) => job(),
            None => break,
        }
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to the eventual result of submitted work.
///
/// `poll` never blocks and suits a per-frame loop; `wait` blocks the caller
/// and must not be used from inside an async runtime.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: Option<oneshot::Receiver<Result<T>>>,
    result: Option<Result<T>>,
}

impl<T> TaskHandle<T> {
    fn new(rx: oneshot::Receiver<Result<T>>) -> Self {
        Self {
            rx: Some(rx),
            result: None,
        }
    }

    /// Checks for completion without blocking.
    ///
    /// # Returns
    /// `true` when a result is ready to be taken.
    pub fn poll(&mut self) -> bool {
        if self.result.is_some() {
            return true;
        }
        let Some(rx) = self.rx.as_mut() else {
            return false;
        };
        match rx.try_recv() {
            Ok(result) => {
                self.result = Some(result);
                self.rx = None;
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Closed) => {
                self.result = Some(Err(EditError::TaskAbandoned));
                self.rx = None;
                true
            }
        }
    }

    /// Alias of [`TaskHandle::poll`].
    pub fn is_done(&mut self) -> bool {
        self.poll()
    }

    /// Takes the result if it is ready; subsequent calls return `None`.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        self.poll();
        self.result.take()
    }

    /// Blocks until the result is available.
    pub fn wait(mut self) -> Result<T> {
        if let Some(result) = self.result.take() {
            return result;
        }
        match self.rx.take() {
            Some(rx) => rx.blocking_recv().unwrap_or(Err(EditError::TaskAbandoned)),
            None => Err(EditError::TaskAbandoned),
        }
    }
}
