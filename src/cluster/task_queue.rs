//! Batched cluster-state task queues
//!
//! A task queue accepts state-mutation tasks and applies them in batches: a
//! spawned worker drains whatever is queued, folds each task over the
//! current state, publishes the batch result once, and only then notifies
//! per-task success listeners. Tasks that fail to execute are reported
//! individually and do not abort the rest of the batch.

use super::ClusterService;
use crate::metadata::ClusterState;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Priority a queue was created with. Carried for observability; every queue
/// drains independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// Failure callback carried by every cluster-state task.
pub trait ClusterStateTaskListener: Send + Sync {
    fn on_failure(&self, error: Error);
}

/// Executes tasks of one queue against cluster state.
pub trait BatchedTaskExecutor<T>: Send + Sync {
    /// Apply `task` to `state`, producing the successor state.
    fn execute(&self, task: &T, state: &ClusterState) -> Result<ClusterState>;

    /// Called for each task of a batch after the batch was committed.
    fn task_succeeded(&self, task: &T);
}

struct QueuedTask<T> {
    source: String,
    task: T,
}

/// Handle for submitting tasks to one batched queue.
pub struct MasterServiceTaskQueue<T> {
    name: String,
    priority: Priority,
    tx: mpsc::UnboundedSender<QueuedTask<T>>,
}

impl<T> Clone for MasterServiceTaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            priority: self.priority,
            tx: self.tx.clone(),
        }
    }
}

impl<T: ClusterStateTaskListener> MasterServiceTaskQueue<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Enqueue a task. `source` describes the submission for logging.
    pub fn submit_task(&self, source: impl Into<String>, task: T) {
        let source = source.into();
        trace!(queue = %self.name, priority = ?self.priority, %source, "submitting cluster state task");
        if let Err(rejected) = self.tx.send(QueuedTask { source, task }) {
            rejected
                .0
                .task
                .on_failure(Error::Internal(format!("task queue [{}] is closed", self.name)));
        }
    }
}

impl ClusterService {
    /// Create a batched task queue bound to this service. The worker holds
    /// only a weak reference, so dropping the service shuts the queue down.
    pub fn create_task_queue<T, E>(
        self: &Arc<Self>,
        name: &str,
        priority: Priority,
        executor: E,
    ) -> MasterServiceTaskQueue<T>
    where
        T: ClusterStateTaskListener + Send + 'static,
        E: BatchedTaskExecutor<T> + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedTask<T>>();
        let service = Arc::downgrade(self);
        let queue_name = name.to_string();
        let task_queue_name = queue_name.clone();

        tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut batch = vec![first];
                while let Ok(next) = rx.try_recv() {
                    batch.push(next);
                }
                let Some(service) = service.upgrade() else {
                    break;
                };

                let mut state = (*service.state()).clone();
                let mut committed = Vec::with_capacity(batch.len());
                for queued in batch {
                    match executor.execute(&queued.task, &state) {
                        Ok(new_state) => {
                            state = new_state;
                            committed.push(queued.task);
                        }
                        Err(error) => {
                            debug!(
                                queue = %task_queue_name,
                                source = %queued.source,
                                %error,
                                "cluster state task failed"
                            );
                            queued.task.on_failure(error);
                        }
                    }
                }

                if !committed.is_empty() {
                    service.publish_state(state);
                    for task in &committed {
                        executor.task_succeeded(task);
                    }
                }
            }
        });

        MasterServiceTaskQueue {
            name: queue_name,
            priority,
            tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DataStream, IndexMetadata};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AddIndexTask {
        name: String,
        failures: Arc<AtomicUsize>,
    }

    impl ClusterStateTaskListener for AddIndexTask {
        fn on_failure(&self, _error: Error) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct AddIndexExecutor {
        succeeded: Arc<AtomicUsize>,
    }

    impl BatchedTaskExecutor<AddIndexTask> for AddIndexExecutor {
        fn execute(&self, task: &AddIndexTask, state: &ClusterState) -> Result<ClusterState> {
            if task.name == "poison" {
                return Err(Error::Internal("poison task".to_string()));
            }
            let mut new_state = state.clone();
            new_state
                .metadata
                .indices
                .insert(task.name.clone(), IndexMetadata::new(task.name.clone(), 0));
            Ok(new_state)
        }

        fn task_succeeded(&self, _task: &AddIndexTask) {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn batch_commits_then_notifies_success_listeners() {
        let service = ClusterService::new();
        let succeeded = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let queue = service.create_task_queue(
            "test-queue",
            Priority::Normal,
            AddIndexExecutor {
                succeeded: Arc::clone(&succeeded),
            },
        );

        for name in ["idx-1", "poison", "idx-2"] {
            queue.submit_task(
                format!("add [{name}]"),
                AddIndexTask {
                    name: name.to_string(),
                    failures: Arc::clone(&failures),
                },
            );
        }

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while succeeded.load(Ordering::SeqCst) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("batch should commit");

        assert_eq!(failures.load(Ordering::SeqCst), 1);
        let state = service.state();
        assert!(state.metadata.index("idx-1").is_some());
        assert!(state.metadata.index("idx-2").is_some());
        assert!(state.metadata.index("poison").is_none());
    }

    #[tokio::test]
    async fn queue_preserves_unrelated_state() {
        let service = ClusterService::new();
        let mut initial = ClusterState::default();
        initial
            .metadata
            .data_streams
            .insert("logs".to_string(), DataStream::new("logs", vec![]));
        initial.local_node_master = true;
        service.publish_state(initial);

        let succeeded = Arc::new(AtomicUsize::new(0));
        let queue = service.create_task_queue(
            "test-queue",
            Priority::Low,
            AddIndexExecutor {
                succeeded: Arc::clone(&succeeded),
            },
        );
        queue.submit_task(
            "add [idx-9]",
            AddIndexTask {
                name: "idx-9".to_string(),
                failures: Arc::new(AtomicUsize::new(0)),
            },
        );

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while succeeded.load(Ordering::SeqCst) < 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("task should commit");

        let state = service.state();
        assert!(state.local_node_master);
        assert!(state.metadata.data_stream("logs").is_some());
    }
}
