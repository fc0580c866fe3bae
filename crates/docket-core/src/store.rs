use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::task::Task;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Added { id: String },
    Removed { id: String },
    Updated { id: String },
    BulkUpdated { count: usize },
    Cleared { removed: usize },
    Replaced { count: usize },
}

pub type Listener = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Read-only handle onto the store's tasks, safe to move to another thread.
#[derive(Clone)]
pub struct StoreReader {
    tasks: Arc<RwLock<Vec<Task>>>,
}

impl StoreReader {
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.read().clone()
    }
}

/// Ordered, observable collection of tasks. Insertion order is display order.
///
/// Listeners run after the write lock is released, in registration order.
pub struct TaskStore {
    tasks: Arc<RwLock<Vec<Task>>>,
    listeners: Vec<Listener>,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(RwLock::new(Vec::new())),
            listeners: Vec::new(),
        }
    }

    pub fn reader(&self) -> StoreReader {
        StoreReader {
            tasks: Arc::clone(&self.tasks),
        }
    }

    pub fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
        debug!(listeners = self.listeners.len(), "store listener registered");
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.read().iter().find(|t| t.id == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.read().iter().any(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[tracing::instrument(skip(self, task), fields(id = %task.id))]
    pub fn add(&mut self, task: Task) -> anyhow::Result<()> {
        let id = task.id.clone();
        {
            let mut tasks = self.tasks.write();
            if tasks.iter().any(|t| t.id == id) {
                return Err(anyhow!("task id already present: {id}"));
            }
            tasks.push(task);
        }
        self.publish(ChangeEvent::Added { id });
        Ok(())
    }

    /// Absent ids are ignored and publish nothing.
    #[tracing::instrument(skip(self))]
    pub fn remove(&mut self, id: &str) -> Option<Task> {
        let removed = {
            let mut tasks = self.tasks.write();
            let idx = tasks.iter().position(|t| t.id == id)?;
            tasks.remove(idx)
        };
        self.publish(ChangeEvent::Removed { id: id.to_string() });
        Some(removed)
    }

    #[tracing::instrument(skip(self))]
    pub fn clear(&mut self) {
        let removed = {
            let mut tasks = self.tasks.write();
            let n = tasks.len();
            tasks.clear();
            n
        };
        if removed > 0 {
            self.publish(ChangeEvent::Cleared { removed });
        }
    }

    /// Applies `edit` in place. Returns the updated task, or `None` for an
    /// unknown id. An edit that changes nothing publishes nothing.
    #[tracing::instrument(skip(self, edit))]
    pub fn update<F>(&mut self, id: &str, edit: F) -> Option<Task>
    where
        F: FnOnce(&mut Task),
    {
        let (updated, changed) = {
            let mut tasks = self.tasks.write();
            let task = tasks.iter_mut().find(|t| t.id == id)?;
            let before = task.clone();
            edit(task);
            // ids are immutable once issued
            task.id = before.id.clone();
            (task.clone(), *task != before)
        };
        if changed {
            self.publish(ChangeEvent::Updated { id: id.to_string() });
        } else {
            trace!(id, "update left task unchanged");
        }
        Some(updated)
    }

    #[tracing::instrument(skip(self, incoming), fields(count = incoming.len()))]
    pub fn replace_all(&mut self, incoming: Vec<Task>) {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(incoming.len());
        for task in incoming {
            if seen.insert(task.id.clone()) {
                kept.push(task);
            } else {
                warn!(id = %task.id, "dropping task with duplicate id");
            }
        }
        let count = kept.len();
        *self.tasks.write() = kept;
        self.publish(ChangeEvent::Replaced { count });
    }

    #[tracing::instrument(skip(self))]
    pub fn complete_all(&mut self) -> usize {
        let count = {
            let mut tasks = self.tasks.write();
            let mut n = 0;
            for task in tasks.iter_mut().filter(|t| !t.is_completed) {
                task.is_completed = true;
                n += 1;
            }
            n
        };
        if count > 0 {
            self.publish(ChangeEvent::BulkUpdated { count });
        }
        count
    }

    #[tracing::instrument(skip(self))]
    pub fn remove_completed(&mut self) -> usize {
        let removed = {
            let mut tasks = self.tasks.write();
            let before = tasks.len();
            tasks.retain(|t| !t.is_completed);
            before - tasks.len()
        };
        if removed > 0 {
            self.publish(ChangeEvent::Cleared { removed });
        }
        removed
    }

    fn publish(&self, event: ChangeEvent) {
        debug!(event = ?event, listeners = self.listeners.len(), "store changed");
        for listener in &self.listeners {
            listener(&event);
        }
    }
}
