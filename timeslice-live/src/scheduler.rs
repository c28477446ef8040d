//! Delayed task execution on a bounded worker pool.
//!
//! Each scheduled unit waits until its [`ReplayInstant`] and then for a free
//! worker slot before running. Shutdown stops new submissions, cancels units
//! that have not started, signals running units through [`CancelSignal`] and
//! waits for them to return.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use timeslice_core::ReplayInstant;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{SchedulerError, TaskError};

pub const DEFAULT_WORKERS: usize = 4;

/// Upper bound on the worker pool size.
pub const MAX_WORKERS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Failed,
            _ => Self::Cancelled,
        }
    }
}

#[derive(Debug, Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(TaskState::Pending as u8)))
    }

    fn set(&self, state: TaskState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::SeqCst))
    }
}

/// Cooperative cancellation flag handed to every task.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                // Scheduler dropped without shutting down.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Handle to one scheduled unit of work.
pub struct ScheduledTask<T> {
    instant: ReplayInstant,
    state: StateCell,
    join: JoinHandle<Result<T, TaskError>>,
}

impl<T> ScheduledTask<T> {
    pub fn instant(&self) -> ReplayInstant {
        self.instant
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    /// Wait for the task to finish and return its result or failure.
    pub async fn join(self) -> Result<T, TaskError> {
        match self.join.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => {
                Err(TaskError::Panicked(panic_message(err.into_panic())))
            }
            Err(_) => Err(TaskError::Cancelled),
        }
    }
}

pub struct Scheduler {
    workers: usize,
    permits: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    accepting: AtomicBool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl Scheduler {
    pub fn new(workers: usize) -> Self {
        let workers = workers.clamp(1, MAX_WORKERS);
        let (shutdown, _) = watch::channel(false);
        Self {
            workers,
            permits: Arc::new(Semaphore::new(workers)),
            shutdown,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Schedule `task` at the instant encoded in a slice directory name.
    pub fn schedule_from_name<T, F, Fut>(
        &self,
        name: &str,
        task: F,
    ) -> Result<ScheduledTask<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce(CancelSignal) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let instant = ReplayInstant::from_name(name)?;
        self.schedule_at(instant, task)
    }

    /// Run `task` once, as soon as `instant` has passed and a worker is free.
    ///
    /// Instants in the past run without delay.
    pub fn schedule_at<T, F, Fut>(
        &self,
        instant: ReplayInstant,
        task: F,
    ) -> Result<ScheduledTask<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce(CancelSignal) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown);
        }

        let delay = instant.delay_from_now();
        let state = StateCell::new();
        let task_state = state.clone();
        let permits = Arc::clone(&self.permits);
        let mut shutdown = CancelSignal(self.shutdown.subscribe());
        let signal = shutdown.clone();

        tracing::debug!(%instant, delay_ms = delay.as_millis() as u64, "Scheduling task");

        let join = tokio::spawn(async move {
            let start = async {
                tokio::time::sleep(delay).await;
                permits.acquire_owned().await.ok()
            };

            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                permit = start => permit,
            };
            let Some(_permit) = permit else {
                task_state.set(TaskState::Cancelled);
                return Err(TaskError::Cancelled);
            };

            task_state.set(TaskState::Running);
            let outcome = AssertUnwindSafe(async move { task(signal).await })
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(value)) => {
                    task_state.set(TaskState::Completed);
                    Ok(value)
                }
                Ok(Err(err)) => {
                    task_state.set(TaskState::Failed);
                    Err(TaskError::Failed(err))
                }
                Err(panic) => {
                    task_state.set(TaskState::Failed);
                    Err(TaskError::Panicked(panic_message(panic)))
                }
            }
        });

        Ok(ScheduledTask {
            instant,
            state,
            join,
        })
    }

    /// Stop accepting work, cancel pending units and drain running ones.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);

        // Running tasks hold a permit each; taking all of them waits for those to return.
        let all = u32::try_from(self.workers).unwrap_or(u32::MAX);
        if let Ok(_drained) = self.permits.acquire_many(all).await {
            self.permits.close();
        }
        tracing::info!("Scheduler shut down");
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::Utc;
    use tokio::sync::oneshot;

    fn in_secs(secs: i64) -> ReplayInstant {
        ReplayInstant::from(Utc::now() + chrono::Duration::seconds(secs))
    }

    #[tokio::test(start_paused = true)]
    async fn past_instants_run_immediately() {
        let scheduler = Scheduler::default();
        let handle = scheduler
            .schedule_at(in_secs(-120), |_| async { Ok(7) })
            .unwrap();
        assert_eq!(handle.join().await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_run_in_instant_order() {
        let scheduler = Scheduler::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = [3, 1, 2]
            .into_iter()
            .map(|secs| {
                let order = Arc::clone(&order);
                scheduler
                    .schedule_at(in_secs(secs), move |_| async move {
                        order.lock().unwrap().push(secs);
                        Ok(())
                    })
                    .unwrap()
            })
            .collect();

        for handle in handles {
            handle.join().await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn pool_limits_concurrency() {
        let scheduler = Scheduler::new(DEFAULT_WORKERS);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                scheduler
                    .schedule_at(in_secs(-1), move |_| async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap()
            })
            .collect();

        for handle in handles {
            handle.join().await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), DEFAULT_WORKERS);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_count_is_clamped() {
        assert_eq!(Scheduler::new(0).workers(), 1);

        let scheduler = Scheduler::new(usize::MAX);
        assert_eq!(scheduler.workers(), MAX_WORKERS);
        let handle = scheduler
            .schedule_at(in_secs(-1), |_| async { Ok(()) })
            .unwrap();
        handle.join().await.unwrap();
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_reported_through_the_handle() {
        let scheduler = Scheduler::new(1);

        let failing = scheduler
            .schedule_at(in_secs(-1), |_| async {
                Err::<(), _>(anyhow::anyhow!("endpoint exploded"))
            })
            .unwrap();
        let panicking = scheduler
            .schedule_at(in_secs(-1), |_| async {
                if true {
                    panic!("worker bug");
                }
                Ok(())
            })
            .unwrap();
        let healthy = scheduler
            .schedule_at(in_secs(-1), |_| async { Ok("done") })
            .unwrap();

        let err = failing.join().await.unwrap_err();
        assert!(matches!(err, TaskError::Failed(_)));
        assert!(err.to_string().contains("endpoint exploded"));

        match panicking.join().await {
            Err(TaskError::Panicked(message)) => assert_eq!(message, "worker bug"),
            other => panic!("expected panic, got {other:?}"),
        }

        assert_eq!(healthy.join().await.unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn states_follow_the_lifecycle() {
        let scheduler = Scheduler::new(1);
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let handle = scheduler
            .schedule_at(in_secs(10), move |_| async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok(())
            })
            .unwrap();
        assert_eq!(handle.state(), TaskState::Pending);

        started_rx.await.unwrap();
        assert_eq!(handle.state(), TaskState::Running);

        release_tx.send(()).unwrap();
        let state = handle.state.clone();
        handle.join().await.unwrap();
        assert_eq!(state.get(), TaskState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_and_drains_running() {
        let scheduler = Scheduler::new(2);
        let (started_tx, started_rx) = oneshot::channel();

        let running = scheduler
            .schedule_at(in_secs(-1), move |mut signal| async move {
                let _ = started_tx.send(());
                signal.cancelled().await;
                tokio::time::sleep(Duration::from_millis(250)).await;
                Ok("drained")
            })
            .unwrap();
        let pending = scheduler
            .schedule_at(in_secs(3600), |_| async { Ok("never") })
            .unwrap();

        started_rx.await.unwrap();
        scheduler.shutdown().await;

        assert_eq!(running.state(), TaskState::Completed);
        assert_eq!(running.join().await.unwrap(), "drained");
        assert!(matches!(pending.join().await, Err(TaskError::Cancelled)));
        assert!(matches!(
            scheduler.schedule_at(in_secs(-1), |_| async { Ok(()) }),
            Err(SchedulerError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn schedule_from_name_rejects_unparseable_names() {
        let scheduler = Scheduler::default();
        let result = scheduler.schedule_from_name("not-a-timestamp", |_| async { Ok(()) });
        assert!(matches!(result, Err(SchedulerError::InvalidInstant(_))));

        let handle = scheduler
            .schedule_from_name("2016-11-23T22_42_16+01_00", |_| async { Ok(1) })
            .unwrap();
        assert_eq!(handle.instant().to_string(), "2016-11-23T22:42:16+01:00");
        assert_eq!(handle.join().await.unwrap(), 1);
    }
}
