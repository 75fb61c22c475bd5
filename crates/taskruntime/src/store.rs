use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use taskcore::{Task, TaskId, Workflow, WorkflowId};
use tokio::sync::{futures::Notified, Notify, RwLock};

/// A record kept in a [`Store`]
pub trait Record: Clone + Send + Sync + 'static {
    type Id: Copy + Eq + Hash + Send + Sync + std::fmt::Display + 'static;

    fn id(&self) -> Self::Id;
}

impl Record for Task {
    type Id = TaskId;

    fn id(&self) -> TaskId {
        self.id
    }
}

impl Record for Workflow {
    type Id = WorkflowId;

    fn id(&self) -> WorkflowId {
        self.id
    }
}

struct Entries<R: Record> {
    records: HashMap<R::Id, R>,
    order: Vec<R::Id>,
}

/// In-memory registry of records, enumerated in insertion order.
///
/// Cloning gives another handle to the same registry. Every write wakes
/// the waiters registered through [`Store::changed`].
pub struct Store<R: Record> {
    inner: Arc<RwLock<Entries<R>>>,
    changed: Arc<Notify>,
}

pub type TaskStore = Store<Task>;
pub type WorkflowStore = Store<Workflow>;

impl<R: Record> Clone for Store<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            changed: Arc::clone(&self.changed),
        }
    }
}

impl<R: Record> Store<R> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Entries {
                records: HashMap::new(),
                order: Vec::new(),
            })),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Insert a new record. Returns false (and keeps the existing record)
    /// when the id is already taken.
    pub async fn insert(&self, record: R) -> bool {
        let id = record.id();
        {
            let mut entries = self.inner.write().await;
            if entries.records.contains_key(&id) {
                return false;
            }
            entries.records.insert(id, record);
            entries.order.push(id);
        }
        self.changed.notify_waiters();
        true
    }

    /// Replace an existing record wholesale
    pub async fn put(&self, record: R) {
        let id = record.id();
        {
            let mut entries = self.inner.write().await;
            if entries.records.insert(id, record).is_none() {
                entries.order.push(id);
            }
        }
        self.changed.notify_waiters();
    }

    /// Mutate a record in place under the write lock.
    ///
    /// Returns `None` when the id is unknown.
    pub async fn update<T>(&self, id: R::Id, f: impl FnOnce(&mut R) -> T) -> Option<T> {
        let out = {
            let mut entries = self.inner.write().await;
            entries.records.get_mut(&id).map(f)
        };
        if out.is_some() {
            self.changed.notify_waiters();
        }
        out
    }

    /// Point-in-time copy of one record
    pub async fn get(&self, id: R::Id) -> Option<R> {
        self.inner.read().await.records.get(&id).cloned()
    }

    /// Point-in-time copy of every record, oldest first
    pub async fn list(&self) -> Vec<R> {
        let entries = self.inner.read().await;
        entries
            .order
            .iter()
            .filter_map(|id| entries.records.get(id).cloned())
            .collect()
    }

    pub async fn count_where(&self, pred: impl Fn(&R) -> bool) -> usize {
        self.inner
            .read()
            .await
            .records
            .values()
            .filter(|r| pred(r))
            .count()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Future that resolves on the next write to the store.
    ///
    /// Create it before checking the state you are waiting for, then await it.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }

    /// Wait until every writer currently holding the lock has released it
    pub(crate) async fn barrier(&self) {
        drop(self.inner.write().await);
    }
}

impl<R: Record> Default for Store<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskcore::{TaskStatus, Value};

    #[tokio::test]
    async fn list_keeps_insertion_order() {
        let store = TaskStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let task = Task::new(Value::from(format!("input-{}", i)));
            ids.push(task.id);
            assert!(store.insert(task).await);
        }

        let listed: Vec<_> = store.list().await.into_iter().map(|t| t.id).collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn duplicate_insert_is_refused() {
        let store = TaskStore::new();
        let task = Task::new(Value::from("a"));
        let mut dup = task.clone();
        dup.input = Value::from("b");

        assert!(store.insert(task.clone()).await);
        assert!(!store.insert(dup).await);
        assert_eq!(store.get(task.id).await.unwrap().input, Value::from("a"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn update_unknown_id_is_none() {
        let store = TaskStore::new();
        let out = store.update(uuid::Uuid::new_v4(), |t| t.start()).await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn changed_fires_on_update() {
        let store = TaskStore::new();
        let task = Task::new(Value::from("a"));
        let id = task.id;
        store.insert(task).await;

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                loop {
                    let notified = store.changed();
                    if store.get(id).await.map(|t| t.status) == Some(TaskStatus::Processing) {
                        return;
                    }
                    notified.await;
                }
            })
        };

        store.update(id, |t| t.start()).await.unwrap().unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
