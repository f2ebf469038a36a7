//! Task submission into the session's event loop.
//!
//! Capture callbacks and transport callbacks run on threads the session does
//! not own. Anything they hand to the session goes through a
//! [`TaskSubmitter`] instead of touching session state directly.
//!
//! Submitted tasks run one at a time, in submission order, on a single
//! long-lived loop task. This holds on a multi-thread runtime too, so a
//! later sample can never be overtaken by an earlier one.

use crate::errors::StreamError;
use std::future::Future;
use std::pin::Pin;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Resolves once a submitted task has run
pub type TaskDone = oneshot::Receiver<()>;

/// Cloneable handle to one FIFO event loop; all clones share the same queue.
#[derive(Debug, Clone)]
pub struct TaskSubmitter {
    handle: Handle,
    queue: mpsc::UnboundedSender<Task>,
}

impl TaskSubmitter {
    /// Start an event loop on the runtime behind `handle`.
    pub fn new(handle: Handle) -> Self {
        let (queue, tasks) = mpsc::unbounded_channel();
        handle.spawn(run_event_loop(tasks));
        Self { handle, queue }
    }

    /// Submitter for the runtime the caller is running on
    pub fn current() -> Result<Self, StreamError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| StreamError::Config(format!("no tokio runtime available: {}", e)))
    }

    /// Queue `task` on the event loop. Safe to call from any thread.
    ///
    /// Tasks run in the order they were submitted, never concurrently with
    /// each other.
    pub fn submit<F>(&self, task: F) -> TaskDone
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (done, done_rx) = oneshot::channel();
        let task: Task = Box::pin(async move {
            task.await;
            let _ = done.send(());
        });
        if self.queue.send(task).is_err() {
            log::debug!("event loop has shut down, dropping task");
        }
        done_rx
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

async fn run_event_loop(mut tasks: mpsc::UnboundedReceiver<Task>) {
    while let Some(task) = tasks.recv().await {
        task.await;
    }
    log::trace!("event loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_current_outside_runtime_fails() {
        assert!(matches!(
            TaskSubmitter::current(),
            Err(StreamError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_from_foreign_thread() {
        let submitter = TaskSubmitter::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let handles = {
            let submitter = submitter.clone();
            let counter = Arc::clone(&counter);
            std::thread::spawn(move || {
                (0..4)
                    .map(|_| {
                        let counter = Arc::clone(&counter);
                        submitter.submit(async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .join()
            .unwrap()
        };

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_tasks_run_in_submission_order() {
        let submitter = TaskSubmitter::current().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let last = {
            let submitter = submitter.clone();
            let seen = Arc::clone(&seen);
            std::thread::spawn(move || {
                let mut last = None;
                for i in 0..200usize {
                    let seen = Arc::clone(&seen);
                    last = Some(submitter.submit(async move {
                        if i % 7 == 0 {
                            tokio::task::yield_now().await;
                        }
                        seen.lock().unwrap().push(i);
                    }));
                }
                last.unwrap()
            })
            .join()
            .unwrap()
        };

        tokio::time::timeout(Duration::from_secs(5), last)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..200).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_clones_share_one_queue() {
        let first = TaskSubmitter::current().unwrap();
        let second = first.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = {
            let seen = Arc::clone(&seen);
            first.submit(async move { seen.lock().unwrap().push("first") })
        };
        let b = {
            let seen = Arc::clone(&seen);
            second.submit(async move { seen.lock().unwrap().push("second") })
        };
        a.await.unwrap();
        b.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }
}
