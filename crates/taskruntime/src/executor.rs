use crate::store::TaskStore;
use crate::runtime::MAX_CONCURRENT_TASKS;
use crate::RuntimeConfig;
use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use taskcore::{
    BackendError, EventBus, ExecutionEvent, FlowError, ProcessingBackend, Task, TaskId,
    TaskStatus, Value,
};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// State shared between the executor handle, its dispatcher and its workers
struct Shared {
    backend: Arc<dyn ProcessingBackend>,
    store: TaskStore,
    events: Arc<EventBus>,
    queue_tx: mpsc::UnboundedSender<TaskId>,
    queued: AtomicUsize,
    permits: Arc<Semaphore>,
}

struct Dispatcher {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Bounded-concurrency task executor.
///
/// `submit` admits tasks to an unbounded FIFO queue. A single dispatcher loop
/// drains the queue and spawns one worker per task; workers then contend for
/// one of `max_concurrent_tasks` permits before calling the backend, so the
/// queue can empty long before the tasks actually run.
///
/// `stop` halts the dispatcher only. Tasks already running against the
/// backend are not awaited and finish in the background; use
/// [`TaskExecutor::shutdown`] to also wait for them.
pub struct TaskExecutor {
    shared: Arc<Shared>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<TaskId>>>,
    dispatcher: Mutex<Option<Dispatcher>>,
    /// Parent of every dispatcher token; cancelled when the executor is dropped
    root: CancellationToken,
    max_concurrent: usize,
    dequeue_timeout: Duration,
}

impl TaskExecutor {
    pub fn new(backend: Arc<dyn ProcessingBackend>, config: &RuntimeConfig) -> Self {
        Self::with_events(backend, config, Arc::new(EventBus::new(config.event_buffer_size)))
    }

    /// Create an executor publishing to an existing event bus
    pub fn with_events(
        backend: Arc<dyn ProcessingBackend>,
        config: &RuntimeConfig,
        events: Arc<EventBus>,
    ) -> Self {
        let max_concurrent = config.max_concurrent_tasks.clamp(1, MAX_CONCURRENT_TASKS);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        Self {
            shared: Arc::new(Shared {
                backend,
                store: TaskStore::new(),
                events,
                queue_tx,
                queued: AtomicUsize::new(0),
                permits: Arc::new(Semaphore::new(max_concurrent)),
            }),
            queue_rx: Arc::new(Mutex::new(queue_rx)),
            dispatcher: Mutex::new(None),
            root: CancellationToken::new(),
            max_concurrent,
            dequeue_timeout: config.dequeue_timeout,
        }
    }

    /// Start the dispatch loop. Calling it while already running does nothing.
    pub async fn start(&self) {
        let mut dispatcher = self.dispatcher.lock().await;
        if dispatcher.is_some() {
            debug!("Executor already running");
            return;
        }

        let token = self.root.child_token();
        let handle = tokio::spawn(dispatch_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.queue_rx),
            token.clone(),
            self.dequeue_timeout,
        ));
        *dispatcher = Some(Dispatcher { token, handle });

        info!(
            "Task executor started (backend: {}, max concurrent: {})",
            self.shared.backend.name(),
            self.max_concurrent
        );
    }

    /// Stop the dispatch loop and wait for it to acknowledge.
    ///
    /// Once this returns no further task moves from `Pending` to
    /// `Processing`. Workers parked on the permit gate hand their task back
    /// to the queue, where it stays `Pending` until the next `start`. Tasks
    /// already `Processing` keep running and are not awaited.
    pub async fn stop(&self) {
        let mut dispatcher = self.dispatcher.lock().await;
        let Some(Dispatcher { token, handle }) = dispatcher.take() else {
            return;
        };

        token.cancel();
        if let Err(e) = handle.await {
            error!("Dispatcher ended abnormally: {}", e);
        }
        // Workers decide whether to start under the store lock; after this
        // barrier every one of them observes the cancelled token.
        self.shared.store.barrier().await;

        info!("Task executor stopped");
    }

    /// Stop, then wait until no worker holds a permit
    pub async fn shutdown(&self) {
        self.stop().await;

        let all = u32::try_from(self.max_concurrent).unwrap_or(u32::MAX);
        match self.shared.permits.acquire_many(all).await {
            Ok(permits) => drop(permits),
            Err(e) => warn!("Permit pool closed while draining: {}", e),
        }
        info!("Task executor drained");
    }

    pub async fn is_running(&self) -> bool {
        self.dispatcher.lock().await.is_some()
    }

    /// Admit a task and return its id without waiting for it to run
    pub async fn submit(&self, input: Value) -> Result<TaskId, FlowError> {
        if input.is_blank() {
            return Err(FlowError::InvalidInput(format!(
                "task input must not be empty (got {})",
                input.kind()
            )));
        }

        let mut task = Task::new(input);
        while !self.shared.store.insert(task.clone()).await {
            task.id = TaskId::new_v4();
        }
        let task_id = task.id;

        self.shared.events.emit(ExecutionEvent::TaskSubmitted {
            task_id,
            timestamp: Utc::now(),
        });

        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        if self.shared.queue_tx.send(task_id).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(FlowError::Execution("admission queue is closed".to_string()));
        }
        info!("Submitted task {}", task_id);
        Ok(task_id)
    }

    /// Submit every input; inputs that are rejected are logged and skipped
    pub async fn submit_batch(&self, inputs: Vec<Value>) -> Vec<TaskId> {
        let total = inputs.len();
        let mut ids = Vec::with_capacity(total);
        for (index, input) in inputs.into_iter().enumerate() {
            match self.submit(input).await {
                Ok(id) => ids.push(id),
                Err(e) => warn!("Batch item {} rejected: {}", index, e),
            }
        }
        info!("Submitted {}/{} tasks for batch processing", ids.len(), total);
        ids
    }

    /// Run the backend directly, bypassing the queue, the permits and the store
    pub async fn process_now(&self, input: Value) -> Result<Value, FlowError> {
        if input.is_blank() {
            return Err(FlowError::InvalidInput("task input must not be empty".to_string()));
        }
        debug!("Processing input synchronously");
        Ok(self.shared.backend.execute(input).await?)
    }

    pub async fn get_task_status(&self, task_id: TaskId) -> Result<Task, FlowError> {
        self.shared
            .store
            .get(task_id)
            .await
            .ok_or(FlowError::TaskNotFound(task_id))
    }

    pub async fn get_all_tasks(&self) -> Vec<Task> {
        self.shared.store.list().await
    }

    /// Tasks admitted but not yet picked up by the dispatcher
    pub fn queue_depth(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    /// Tasks currently in `Processing`
    pub async fn active_count(&self) -> usize {
        self.shared
            .store
            .count_where(|t| t.status == TaskStatus::Processing)
            .await
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn store(&self) -> &TaskStore {
        &self.shared.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.shared.events
    }

    /// Wait for a task to reach `Completed` or `Failed`.
    ///
    /// Never resolves for a task that is not dispatched, e.g. while the
    /// executor is stopped.
    pub async fn wait(&self, task_id: TaskId) -> Result<Task, FlowError> {
        let store = &self.shared.store;
        loop {
            let changed = store.changed();
            let task = store
                .get(task_id)
                .await
                .ok_or(FlowError::TaskNotFound(task_id))?;
            if task.is_terminal() {
                return Ok(task);
            }
            changed.await;
        }
    }

    pub async fn wait_all(&self, task_ids: &[TaskId]) -> Vec<Result<Task, FlowError>> {
        join_all(task_ids.iter().map(|id| self.wait(*id))).await
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        // Stops any dispatcher still holding the shared state.
        self.root.cancel();
    }
}

async fn dispatch_loop(
    shared: Arc<Shared>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<TaskId>>>,
    token: CancellationToken,
    dequeue_timeout: Duration,
) {
    let mut queue = queue_rx.lock().await;
    debug!("Dispatcher loop running");

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = timeout(dequeue_timeout, queue.recv()) => next,
        };

        match next {
            Ok(Some(task_id)) => {
                shared.queued.fetch_sub(1, Ordering::SeqCst);
                debug!("Dispatching task {}", task_id);
                tokio::spawn(run_task(Arc::clone(&shared), task_id, token.clone()));
            }
            Ok(None) => {
                error!("Admission queue closed, dispatcher exiting");
                break;
            }
            // idle
            Err(_) => continue,
        }
    }
}

enum Admission {
    Start(Value),
    Requeue,
}

async fn run_task(shared: Arc<Shared>, task_id: TaskId, token: CancellationToken) {
    let _permit = match Arc::clone(&shared.permits).acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            error!("Task {} could not acquire a permit: {}", task_id, e);
            return;
        }
    };

    let admission = shared
        .store
        .update(task_id, |task| {
            if token.is_cancelled() {
                return Ok(Admission::Requeue);
            }
            task.start().map(|_| Admission::Start(task.input.clone()))
        })
        .await;

    let input = match admission {
        Some(Ok(Admission::Start(input))) => input,
        Some(Ok(Admission::Requeue)) => {
            shared.queued.fetch_add(1, Ordering::SeqCst);
            if shared.queue_tx.send(task_id).is_err() {
                shared.queued.fetch_sub(1, Ordering::SeqCst);
            }
            debug!("Executor stopped before task {} started, requeued", task_id);
            return;
        }
        Some(Err(e)) => {
            error!("Task {} cannot start: {}", task_id, e);
            return;
        }
        None => {
            warn!("Dispatched unknown task {}", task_id);
            return;
        }
    };

    shared.events.emit(ExecutionEvent::TaskStarted {
        task_id,
        timestamp: Utc::now(),
    });
    info!("Processing task {}", task_id);

    let start = Instant::now();
    let outcome = AssertUnwindSafe(shared.backend.execute(input))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(BackendError::failed("backend panicked")));
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(result) => {
            if let Some(Err(e)) = shared.store.update(task_id, |t| t.complete(result)).await {
                error!("Task {} could not be completed: {}", task_id, e);
                return;
            }
            shared.events.emit(ExecutionEvent::TaskCompleted {
                task_id,
                duration_ms,
                timestamp: Utc::now(),
            });
            info!("Completed task {} in {}ms", task_id, duration_ms);
        }
        Err(err) => {
            let message = err.to_string();
            if let Some(Err(e)) = shared
                .store
                .update(task_id, |t| t.fail(message.clone()))
                .await
            {
                error!("Task {} could not be marked failed: {}", task_id, e);
                return;
            }
            shared.events.emit(ExecutionEvent::TaskFailed {
                task_id,
                error: message.clone(),
                timestamp: Utc::now(),
            });
            error!("Failed task {}: {}", task_id, message);
        }
    }
}
