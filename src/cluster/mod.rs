//! Cluster service
//!
//! In-process holder of the authoritative [`ClusterState`] with listener
//! fan-out and batched state-mutation queues. Components observe state
//! through snapshots and never mutate it directly; mutations go through
//! [`MasterServiceTaskQueue`](task_queue::MasterServiceTaskQueue)s.

mod task_queue;

pub use task_queue::{
    BatchedTaskExecutor, ClusterStateTaskListener, MasterServiceTaskQueue, Priority,
};

use crate::metadata::ClusterState;
use parking_lot::RwLock;
use std::sync::Arc;

/// Lifecycle of the cluster service itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initialized,
    Started,
    Stopped,
    Closed,
}

/// A published cluster-state change.
#[derive(Debug, Clone)]
pub struct ClusterChangedEvent {
    pub state: Arc<ClusterState>,
    pub previous_state: Arc<ClusterState>,
}

impl ClusterChangedEvent {
    /// Whether the local node is the elected master in the new state.
    pub fn local_node_master(&self) -> bool {
        self.state.local_node_master
    }
}

/// Receives cluster-state change notifications.
pub trait ClusterStateListener: Send + Sync {
    fn cluster_changed(&self, event: &ClusterChangedEvent);
}

/// Holds the current cluster state and notifies listeners of changes.
pub struct ClusterService {
    state: RwLock<Arc<ClusterState>>,
    listeners: RwLock<Vec<Arc<dyn ClusterStateListener>>>,
    lifecycle_state: RwLock<LifecycleState>,
}

impl ClusterService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(Arc::new(ClusterState::default())),
            listeners: RwLock::new(Vec::new()),
            lifecycle_state: RwLock::new(LifecycleState::Started),
        })
    }

    /// The current cluster state snapshot.
    pub fn state(&self) -> Arc<ClusterState> {
        Arc::clone(&self.state.read())
    }

    pub fn add_listener(&self, listener: Arc<dyn ClusterStateListener>) {
        self.listeners.write().push(listener);
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        *self.lifecycle_state.read()
    }

    pub fn set_lifecycle_state(&self, state: LifecycleState) {
        *self.lifecycle_state.write() = state;
    }

    /// Install `new_state` as current and notify every listener.
    pub fn publish_state(&self, new_state: ClusterState) {
        let new_state = Arc::new(new_state);
        let previous_state = {
            let mut guard = self.state.write();
            std::mem::replace(&mut *guard, Arc::clone(&new_state))
        };
        let event = ClusterChangedEvent {
            state: new_state,
            previous_state,
        };
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in listeners {
            listener.cluster_changed(&event);
        }
    }
}
