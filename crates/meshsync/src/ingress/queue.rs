//! Work queue that retries failed tasks after a delay.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{after, never, select, unbounded, Receiver, Sender};

use crate::error::ConfigError;
use crate::lifecycle::StopSignal;
use crate::model::Event;

/// Failure of a task handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The source is not synchronized yet. Always retried, never counted as an attempt.
    #[error("waiting till full synchronization")]
    NotSynchronized,

    #[error("{0}")]
    Failed(String),
}

impl From<ConfigError> for TaskError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotYetSynchronized => TaskError::NotSynchronized,
            other => TaskError::Failed(other.to_string()),
        }
    }
}

/// Function applied to the object of a task.
pub type TaskFn<T> = Arc<dyn Fn(&T, Event) -> Result<(), TaskError> + Send + Sync>;

/// An object change waiting to be handled.
pub struct Task<T> {
    handler: TaskFn<T>,
    object: T,
    event: Event,
    attempts: u32,
}

impl<T> Task<T> {
    pub fn new(handler: TaskFn<T>, object: T, event: Event) -> Self {
        Self {
            handler,
            object,
            event,
            attempts: 0,
        }
    }

    pub fn object(&self) -> &T {
        &self.object
    }

    pub fn event(&self) -> Event {
        self.event
    }
}

/// Multi-producer, single-consumer queue of tasks.
///
/// Tasks are handled in push order. A task whose handler fails stays at the
/// head of the queue and is handed to the handler again once the retry delay
/// elapsed; every task pushed after it waits. Tasks that fail with
/// [`TaskError::Failed`] are dropped after `max_attempts` attempts, if a bound
/// is configured.
pub struct RetryQueue<T> {
    tx: Sender<Task<T>>,
    rx: Receiver<Task<T>>,
    delay: Duration,
    max_attempts: Option<u32>,
    running: AtomicBool,
}

impl<T: Send + 'static> RetryQueue<T> {
    pub fn new(delay: Duration, max_attempts: Option<u32>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            delay,
            max_attempts,
            running: AtomicBool::new(false),
        }
    }

    /// Enqueues a task. Never blocks.
    pub fn push(&self, task: Task<T>) {
        // the queue owns a receiver, so the channel cannot be disconnected
        let _ = self.tx.send(task);
    }

    /// Handles tasks until the stop signal fires. Pending tasks are dropped on stop.
    pub fn run(&self, stop: StopSignal) {
        if self.running.swap(true, Ordering::SeqCst) {
            log::warn!("Retry queue is already running");
            return;
        }
        log::debug!("Retry queue started");

        let mut pending: VecDeque<Task<T>> = VecDeque::new();
        // set while the head of `pending` waits for its retry
        let mut retry_at: Option<Instant> = None;
        loop {
            pending.extend(self.rx.try_iter());

            while retry_at.map_or(true, |at| at <= Instant::now()) && !stop.is_stopped() {
                let Some(task) = pending.pop_front() else {
                    break;
                };
                retry_at = None;
                if let Some(task) = self.process(task) {
                    if !pending.is_empty() {
                        log::debug!("{} task(s) held behind a failed task", pending.len());
                    }
                    pending.push_front(task);
                    retry_at = Some(Instant::now() + self.delay);
                }
            }

            let timer = match retry_at {
                Some(at) => after(at.saturating_duration_since(Instant::now())),
                None => never(),
            };

            select! {
                recv(self.rx) -> msg => match msg {
                    Ok(task) => pending.push_back(task),
                    Err(_) => break,
                },
                recv(stop.receiver()) -> _ => break,
                recv(timer) -> _ => {}
            }
        }

        if !pending.is_empty() {
            log::debug!("Retry queue stopping with {} pending task(s)", pending.len());
        }
        self.running.store(false, Ordering::SeqCst);
        log::debug!("Retry queue stopped");
    }

    /// Runs a task once. Returns the task when it has to be retried.
    fn process(&self, mut task: Task<T>) -> Option<Task<T>> {
        match (task.handler)(&task.object, task.event) {
            Ok(()) => None,
            Err(TaskError::NotSynchronized) => {
                log::trace!("Task for {} event deferred until synchronized", task.event);
                Some(task)
            }
            Err(TaskError::Failed(reason)) => {
                task.attempts += 1;
                if self.max_attempts.is_some_and(|max| task.attempts >= max) {
                    log::error!(
                        "Dropping {} task after {} attempt(s): {}",
                        task.event,
                        task.attempts,
                        reason
                    );
                    return None;
                }
                log::warn!(
                    "Work item handle failed ({}), retrying after delay {:?}",
                    reason,
                    self.delay
                );
                Some(task)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use std::thread;

    fn wait_until(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_tasks_run_in_order() {
        let queue = Arc::new(RetryQueue::new(Duration::from_millis(5), None));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: TaskFn<u32> = Arc::new(move |n: &u32, _: Event| {
            sink.lock().unwrap().push(*n);
            Ok(())
        });

        for n in 0..5 {
            queue.push(Task::new(Arc::clone(&handler), n, Event::Add));
        }

        let shutdown = Shutdown::new();
        let runner = Arc::clone(&queue);
        let stop = shutdown.subscribe();
        let handle = thread::spawn(move || runner.run(stop));

        wait_until(|| seen.lock().unwrap().len() == 5);
        shutdown.trigger();
        handle.join().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_failed_task_is_retried() {
        let queue = Arc::new(RetryQueue::new(Duration::from_millis(5), None));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let handler: TaskFn<String> = Arc::new(move |_: &String, _: Event| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TaskError::Failed("backend unavailable".to_string()))
            } else {
                Ok(())
            }
        });
        queue.push(Task::new(handler, "web".to_string(), Event::Update));

        let shutdown = Shutdown::new();
        let runner = Arc::clone(&queue);
        let stop = shutdown.subscribe();
        let handle = thread::spawn(move || runner.run(stop));

        wait_until(|| calls.load(Ordering::SeqCst) >= 3);
        thread::sleep(Duration::from_millis(30));
        shutdown.trigger();
        handle.join().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_max_attempts_drops_failed_task() {
        let queue = Arc::new(RetryQueue::new(Duration::from_millis(1), Some(2)));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let handler: TaskFn<()> = Arc::new(move |_: &(), _: Event| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TaskError::Failed("always".to_string()))
        });
        queue.push(Task::new(handler, (), Event::Add));

        let shutdown = Shutdown::new();
        let runner = Arc::clone(&queue);
        let stop = shutdown.subscribe();
        let handle = thread::spawn(move || runner.run(stop));

        wait_until(|| calls.load(Ordering::SeqCst) >= 2);
        thread::sleep(Duration::from_millis(30));
        shutdown.trigger();
        handle.join().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_not_synchronized_is_not_counted() {
        let queue = Arc::new(RetryQueue::new(Duration::from_millis(1), Some(1)));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let handler: TaskFn<()> = Arc::new(move |_: &(), _: Event| {
            if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(TaskError::NotSynchronized)
            } else {
                Ok(())
            }
        });
        queue.push(Task::new(handler, (), Event::Add));

        let shutdown = Shutdown::new();
        let runner = Arc::clone(&queue);
        let stop = shutdown.subscribe();
        let handle = thread::spawn(move || runner.run(stop));

        wait_until(|| calls.load(Ordering::SeqCst) >= 4);
        shutdown.trigger();
        handle.join().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_failed_task_holds_back_later_tasks() {
        let queue = Arc::new(RetryQueue::new(Duration::from_millis(100), None));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let synced = Arc::new(AtomicBool::new(false));

        let sink = Arc::clone(&seen);
        let gate = Arc::clone(&synced);
        let handler: TaskFn<(u32, Event)> = Arc::new(move |&(n, event): &(u32, Event), _: Event| {
            if !gate.load(Ordering::SeqCst) {
                return Err(TaskError::NotSynchronized);
            }
            sink.lock().unwrap().push((n, event));
            Ok(())
        });

        let shutdown = Shutdown::new();
        let runner = Arc::clone(&queue);
        let stop = shutdown.subscribe();
        let handle = thread::spawn(move || runner.run(stop));

        queue.push(Task::new(Arc::clone(&handler), (1, Event::Add), Event::Add));
        thread::sleep(Duration::from_millis(20));
        // the add is now waiting for its retry; later tasks must not overtake it
        synced.store(true, Ordering::SeqCst);
        queue.push(Task::new(Arc::clone(&handler), (1, Event::Update), Event::Update));
        queue.push(Task::new(Arc::clone(&handler), (1, Event::Delete), Event::Delete));

        wait_until(|| seen.lock().unwrap().len() == 3);
        shutdown.trigger();
        handle.join().unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, Event::Add), (1, Event::Update), (1, Event::Delete)]
        );
    }

    #[test]
    fn test_run_exits_on_stop_with_parked_tasks() {
        let queue = Arc::new(RetryQueue::new(Duration::from_secs(60), None));
        let handler: TaskFn<()> =
            Arc::new(|_: &(), _: Event| Err(TaskError::Failed("stuck".to_string())));
        queue.push(Task::new(handler, (), Event::Delete));

        let shutdown = Shutdown::new();
        let runner = Arc::clone(&queue);
        let stop = shutdown.subscribe();
        let handle = thread::spawn(move || runner.run(stop));

        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        shutdown.trigger();
        handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_config_error_conversion() {
        assert_eq!(
            TaskError::from(ConfigError::NotYetSynchronized),
            TaskError::NotSynchronized
        );
        assert!(matches!(
            TaskError::from(ConfigError::TransientBackend("x".into())),
            TaskError::Failed(_)
        ));
    }
}
