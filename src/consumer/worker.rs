use crate::consumer::read_task::ReadTask;
use crate::error::RestMqError;
use crate::time::Clock;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Queue shared between submitters and one worker loop.
struct WorkerShared {
    queue: Mutex<VecDeque<ReadTask>>,
    notify: Notify,
    shutdown: AtomicBool,
}

/// Pool of workers advancing read tasks cooperatively. Each worker repeatedly
/// steps the tasks whose wake time has arrived, requeues the unfinished ones,
/// and sleeps until the nearest wake time or a new submission.
pub(crate) struct ReadWorkerPool {
    workers: Vec<Arc<WorkerShared>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_worker: AtomicUsize,
}

impl ReadWorkerPool {
    pub fn start(size: usize, clock: Arc<dyn Clock>) -> Self {
        let mut workers = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);
        for worker_id in 0..size {
            let shared = Arc::new(WorkerShared {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                shutdown: AtomicBool::new(false),
            });
            let handle = tokio::spawn(run_worker(worker_id, Arc::clone(&shared), clock.clone()));
            workers.push(shared);
            handles.push(handle);
        }
        Self {
            workers,
            handles: Mutex::new(handles),
            next_worker: AtomicUsize::new(0),
        }
    }

    pub fn submit(&self, task: ReadTask) {
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        let worker = &self.workers[index];
        worker.queue.lock().push_back(task);
        worker.notify.notify_one();
    }

    /// Stop all workers. Queued tasks finish with `ShuttingDown` so every
    /// submitted read still gets its one callback.
    pub async fn shutdown(&self) {
        for worker in &self.workers {
            worker.shutdown.store(true, Ordering::SeqCst);
            worker.notify.notify_one();
        }
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn run_worker(worker_id: usize, shared: Arc<WorkerShared>, clock: Arc<dyn Clock>) {
    debug!(worker_id, "read worker started");
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            let mut drained = std::mem::take(&mut *shared.queue.lock());
            for task in drained.iter_mut() {
                task.cancel(RestMqError::ShuttingDown);
            }
            break;
        }

        // Split off the tasks that are due, preserving submission order.
        let now = clock.now_ms();
        let mut ready = Vec::new();
        let mut nearest_wake: Option<u64> = None;
        {
            let mut queue = shared.queue.lock();
            let mut waiting = VecDeque::with_capacity(queue.len());
            while let Some(task) = queue.pop_front() {
                if task.wait_expiration_ms() <= now {
                    ready.push(task);
                } else {
                    nearest_wake = Some(match nearest_wake {
                        Some(wake) => wake.min(task.wait_expiration_ms()),
                        None => task.wait_expiration_ms(),
                    });
                    waiting.push_back(task);
                }
            }
            *queue = waiting;
        }

        if ready.is_empty() {
            match nearest_wake {
                Some(wake) if wake > now => {
                    tokio::select! {
                        _ = shared.notify.notified() => {}
                        _ = clock.sleep_ms(wake - now) => {}
                    }
                }
                Some(_) => {}
                None => shared.notify.notified().await,
            }
            continue;
        }

        for mut task in ready {
            let backoff = task.do_partial_read().await;
            if backoff {
                trace!(worker_id, "task backing off until its wake time");
            }
            if !task.is_done() {
                // Back of the queue: ready tasks are served in FIFO order.
                shared.queue.lock().push_back(task);
            }
        }
    }
    debug!(worker_id, "read worker stopped");
}
