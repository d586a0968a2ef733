//! FIFO task queue
//!
//! Tasks run one at a time on a single worker, in the order they were
//! pushed. Until the owner calls `process_buffer`, pushed tasks are held in
//! a buffer unless they are forced; forced tasks (the load itself) go
//! straight to the worker. Draining the buffer keeps its order: tasks pushed
//! while the buffer is being handed over, forced or not, queue behind it.
//!
//! A panicking task is caught: its caller sees the result channel close
//! and the worker moves on to the next task.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};

use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot};

use crate::observability::{log_event, Event};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Externally visible queue phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorPhase {
    /// Non-forced tasks are held back
    Buffering,
    /// Buffered tasks are being handed to the worker; new tasks queue
    /// behind them
    Draining,
    /// Every task goes straight to the worker
    Ready,
}

enum QueueState {
    Buffering(Vec<Job>),
    Draining(Vec<Job>),
    Ready,
}

/// Single-worker FIFO queue
pub struct Executor {
    sender: mpsc::UnboundedSender<Job>,
    state: Mutex<QueueState>,
}

impl Executor {
    /// Queue that buffers until `process_buffer` is called
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        Self::with_state(QueueState::Buffering(Vec::new()))
    }

    /// Queue that runs tasks immediately
    ///
    /// Must be called from within a Tokio runtime.
    pub fn ready() -> Self {
        Self::with_state(QueueState::Ready)
    }

    fn with_state(state: QueueState) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        // The worker ends once every sender is dropped and the channel drains
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job.await;
            }
        });
        Self {
            sender,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current phase
    pub fn phase(&self) -> ExecutorPhase {
        match &*self.state() {
            QueueState::Buffering(_) => ExecutorPhase::Buffering,
            QueueState::Draining(_) => ExecutorPhase::Draining,
            QueueState::Ready => ExecutorPhase::Ready,
        }
    }

    /// Returns true once the buffer has been drained
    pub fn is_ready(&self) -> bool {
        self.phase() == ExecutorPhase::Ready
    }

    /// Number of tasks held in the buffer
    pub fn buffered(&self) -> usize {
        match &*self.state() {
            QueueState::Buffering(jobs) | QueueState::Draining(jobs) => jobs.len(),
            QueueState::Ready => 0,
        }
    }

    /// Admit a task and return the receiver for its output
    ///
    /// Admission order is call order: the task is queued before this
    /// returns. The receiver errors if the task panicked or the worker is
    /// gone.
    pub fn push<F, T>(&self, task: F, force_queuing: bool) -> oneshot::Receiver<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        let job: Job = Box::pin(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(output) => {
                    // The caller may have stopped waiting
                    let _ = reply.send(output);
                }
                Err(_) => log_event(Event::TaskAborted),
            }
        });

        let mut state = self.state();
        match &mut *state {
            QueueState::Buffering(jobs) if !force_queuing => jobs.push(job),
            QueueState::Draining(jobs) => jobs.push(job),
            _ => self.dispatch(job),
        }
        receiver
    }

    fn dispatch(&self, job: Job) {
        if self.sender.send(job).is_err() {
            // Worker gone: the job is dropped and its caller sees the
            // closed channel
            log_event(Event::TaskAborted);
        }
    }

    /// Hand every buffered task to the worker, in order, then go ready
    ///
    /// The lock is released while each batch is dispatched, so the queue
    /// reports `Draining` meanwhile. A call made while another drain is
    /// running returns at once.
    pub fn process_buffer(&self) {
        let mut batch = {
            let mut state = self.state();
            match &mut *state {
                QueueState::Buffering(jobs) => {
                    let jobs = std::mem::take(jobs);
                    *state = QueueState::Draining(Vec::new());
                    jobs
                }
                QueueState::Draining(_) | QueueState::Ready => return,
            }
        };

        loop {
            for job in batch {
                self.dispatch(job);
            }
            let mut state = self.state();
            match &mut *state {
                QueueState::Draining(jobs) if !jobs.is_empty() => batch = std::mem::take(jobs),
                _ => {
                    *state = QueueState::Ready;
                    return;
                }
            }
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("phase", &self.phase())
            .field("buffered", &self.buffered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ready_queue_runs_in_order() {
        let executor = Executor::ready();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut receivers = Vec::new();
        for i in 0..5 {
            let log = log.clone();
            receivers.push(executor.push(
                async move {
                    // Earlier tasks sleep longer; order must still hold
                    tokio::time::sleep(Duration::from_millis(10 - 2 * i as u64)).await;
                    log.lock().unwrap().push(i);
                    i
                },
                false,
            ));
        }
        for (i, rx) in receivers.into_iter().enumerate() {
            assert_eq!(rx.await.unwrap(), i);
        }
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_buffering_holds_until_processed() {
        let executor = Executor::new();
        let mut held = executor.push(async { 1 }, false);
        let forced = executor.push(async { 2 }, true);

        assert_eq!(forced.await.unwrap(), 2);
        assert_eq!(executor.buffered(), 1);
        assert!(held.try_recv().is_err());

        executor.process_buffer();
        assert!(executor.is_ready());
        assert_eq!(held.await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pushes_during_drain_queue_behind_buffer() {
        let executor = Executor::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let record = |i: usize| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(i);
                i
            }
        };

        let mut receivers: Vec<_> = (0..1000).map(|i| executor.push(record(i), false)).collect();
        std::thread::scope(|scope| {
            let pusher = scope.spawn(|| {
                let mut late = Vec::new();
                for i in 1000..1100 {
                    late.push(executor.push(record(i), false));
                }
                late
            });
            executor.process_buffer();
            receivers.extend(pusher.join().unwrap());
        });

        assert!(executor.is_ready());
        for (i, rx) in receivers.into_iter().enumerate() {
            assert_eq!(rx.await.unwrap(), i);
        }
        assert_eq!(*log.lock().unwrap(), (0..1100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_drain_phase_holds_new_tasks() {
        let executor = Executor::new();
        *executor.state() = QueueState::Draining(Vec::new());
        let mut held = executor.push(async { 1 }, true);

        assert_eq!(executor.phase(), ExecutorPhase::Draining);
        assert_eq!(executor.buffered(), 1);
        assert!(held.try_recv().is_err());

        // A second drain leaves the running one to finish
        executor.process_buffer();
        assert_eq!(executor.phase(), ExecutorPhase::Draining);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stall_queue() {
        let executor = Executor::ready();
        let failed = executor.push(async { panic!("boom") }, false);
        let next = executor.push(async { "still running" }, false);

        assert!(failed.await.is_err());
        assert_eq!(next.await.unwrap(), "still running");
    }
}
