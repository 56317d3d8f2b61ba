use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::worker::executor::TaskExecutor;
use crate::worker::job::{TaskJob, TaskReport};

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Fixed set of worker threads pulling jobs from a bounded queue.
///
/// `submit` blocks while the queue is full. Each worker owns its own
/// executor and database connection.
pub struct WorkerPool {
    job_sender: Option<Sender<TaskJob>>,
    result_receiver: Receiver<TaskReport>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` workers (at least one) with room for
    /// `queue_capacity` waiting jobs.
    pub fn new(
        executor: &TaskExecutor,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Result<Self, WorkerError> {
        let worker_count = worker_count.max(1);
        let (job_sender, job_receiver) = bounded::<TaskJob>(queue_capacity.max(1));
        let (result_sender, result_receiver) = unbounded::<TaskReport>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_executor = executor.fork()?;

            let handle = thread::Builder::new()
                .name(format!("datatask-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, job_rx, result_tx, shutdown_flag, worker_executor);
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender: Some(job_sender),
            result_receiver,
            workers,
            shutdown,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues a job, blocking while the queue is full.
    pub fn submit(&self, job: TaskJob) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .as_ref()
            .ok_or(WorkerError::ChannelClosed)?
            .send(job)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn try_recv_result(&self) -> Option<TaskReport> {
        self.result_receiver.try_recv().ok()
    }

    /// Stops accepting jobs. Queued and running jobs still finish.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Drains the queue, joins every worker and returns the reports not
    /// yet collected.
    pub fn wait(mut self) -> Vec<TaskReport> {
        // Dropping the sender lets workers exit once the queue is empty.
        drop(self.job_sender.take());

        for (i, worker) in self.workers.drain(..).enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
        self.result_receiver.try_iter().collect()
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<TaskJob>,
    result_sender: Sender<TaskReport>,
    shutdown: Arc<AtomicBool>,
    executor: TaskExecutor,
) {
    debug!("Worker {} started", worker_id);

    loop {
        match job_receiver.recv_timeout(RECV_TIMEOUT) {
            Ok(job) => {
                debug!("Worker {} processing task {}", worker_id, job.task_id());
                let report = executor.execute(&job);
                if let Err(e) = result_sender.send(report) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) && job_receiver.is_empty() {
                    debug!("Worker {} received shutdown signal", worker_id);
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
