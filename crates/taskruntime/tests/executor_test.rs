use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskcore::{
    BackendError, ExecutionEvent, FlowError, FnBackend, FnStep, ProcessingBackend, StepResults,
    TaskId, TaskStatus, Value,
};
use taskruntime::{RuntimeConfig, StepBackend, TaskExecutor};
use tokio::sync::Semaphore;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

fn config(max_concurrent: usize) -> RuntimeConfig {
    RuntimeConfig {
        max_concurrent_tasks: max_concurrent,
        dequeue_timeout: Duration::from_millis(20),
        ..RuntimeConfig::default()
    }
}

/// Backend that sleeps, records how many calls overlap, and fails on "bad"
#[derive(Default)]
struct InstrumentedBackend {
    delay_ms: u64,
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<HashMap<String, usize>>,
}

impl InstrumentedBackend {
    fn with_delay(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Self::default()
        }
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn calls(&self) -> HashMap<String, usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessingBackend for InstrumentedBackend {
    async fn execute(&self, input: Value) -> Result<Value, BackendError> {
        let key = input.as_str().unwrap_or_default().to_string();
        *self.calls.lock().unwrap().entry(key.clone()).or_default() += 1;

        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);

        if key == "bad" {
            return Err(BackendError::failed("video unavailable"));
        }
        Ok(Value::from(format!("processed {}", key)))
    }
}

/// Backend that blocks every call until the test hands out a permit
struct GatedBackend {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl ProcessingBackend for GatedBackend {
    async fn execute(&self, input: Value) -> Result<Value, BackendError> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| BackendError::failed(e.to_string()))?;
        permit.forget();
        Ok(input)
    }
}

async fn wait_for_status(executor: &TaskExecutor, id: TaskId, status: TaskStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if executor.get_task_status(id).await.unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task did not reach expected status");
}

#[tokio::test]
async fn test_submitted_tasks_complete_with_unique_ids() {
    init_tracing();
    let backend = Arc::new(InstrumentedBackend::with_delay(5));
    let executor = TaskExecutor::new(backend.clone(), &config(3));
    executor.start().await;

    let inputs: Vec<Value> = (0..20).map(|i| Value::from(format!("video-{}", i))).collect();
    let ids = executor.submit_batch(inputs).await;
    assert_eq!(ids.len(), 20);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 20, "ids must be distinct");

    for result in executor.wait_all(&ids).await {
        let task = result.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.result.is_some());
        assert!(task.error.is_none());
        assert!(task.completed_at.unwrap() >= task.created_at);
    }

    let all = executor.get_all_tasks().await;
    let listed: Vec<_> = all.iter().map(|t| t.id).collect();
    assert_eq!(listed, ids, "tasks are listed in submission order");
    assert_eq!(executor.queue_depth(), 0);
    assert_eq!(executor.active_count().await, 0);

    executor.stop().await;
}

#[tokio::test]
async fn test_concurrency_never_exceeds_bound() {
    init_tracing();
    let backend = Arc::new(InstrumentedBackend::with_delay(40));
    let executor = Arc::new(TaskExecutor::new(backend.clone(), &config(3)));
    executor.start().await;

    let inputs: Vec<Value> = (0..12).map(|i| Value::from(format!("v{}", i))).collect();
    let ids = executor.submit_batch(inputs).await;

    let observer = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
            let mut peak = 0;
            for _ in 0..40 {
                peak = peak.max(executor.active_count().await);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            peak
        })
    };

    for result in executor.wait_all(&ids).await {
        assert_eq!(result.unwrap().status, TaskStatus::Completed);
    }

    assert!(backend.peak() <= 3, "backend saw {} concurrent calls", backend.peak());
    assert!(backend.peak() >= 2, "tasks should overlap");
    assert!(observer.await.unwrap() <= 3);

    executor.stop().await;
}

#[tokio::test]
async fn test_backend_failure_is_contained_to_its_task() {
    init_tracing();
    let backend = Arc::new(InstrumentedBackend::with_delay(1));
    let executor = TaskExecutor::new(backend.clone(), &config(2));
    executor.start().await;

    let good = executor.submit(Value::from("good")).await.unwrap();
    let bad = executor.submit(Value::from("bad")).await.unwrap();
    let other = executor.submit(Value::from("other")).await.unwrap();

    let failed = executor.wait(bad).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("Execution failed: video unavailable"));
    assert!(failed.result.is_none());
    assert!(failed.completed_at.is_some());

    for id in [good, other] {
        assert_eq!(executor.wait(id).await.unwrap().status, TaskStatus::Completed);
    }

    // never retried
    assert_eq!(backend.calls().get("bad"), Some(&1));
    executor.stop().await;
}

#[tokio::test]
async fn test_lifecycle_events_are_monotonic() {
    init_tracing();
    let backend = Arc::new(InstrumentedBackend::with_delay(2));
    let executor = TaskExecutor::new(backend, &config(2));
    let mut events = executor.events().subscribe();
    executor.start().await;

    let ids = executor
        .submit_batch(vec![Value::from("a"), Value::from("bad"), Value::from("c")])
        .await;
    let mut seen: HashMap<TaskId, Vec<&'static str>> = HashMap::new();
    let mut terminal = 0;
    while terminal < ids.len() {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for events")
            .unwrap();
        let (id, label) = match event {
            ExecutionEvent::TaskSubmitted { task_id, .. } => (task_id, "submitted"),
            ExecutionEvent::TaskStarted { task_id, .. } => (task_id, "started"),
            ExecutionEvent::TaskCompleted { task_id, .. } => (task_id, "completed"),
            ExecutionEvent::TaskFailed { task_id, .. } => (task_id, "failed"),
            _ => continue,
        };
        if matches!(label, "completed" | "failed") {
            terminal += 1;
        }
        seen.entry(id).or_default().push(label);
    }

    assert_eq!(seen[&ids[0]], vec!["submitted", "started", "completed"]);
    assert_eq!(seen[&ids[1]], vec!["submitted", "started", "failed"]);
    assert_eq!(seen[&ids[2]], vec!["submitted", "started", "completed"]);
    executor.stop().await;
}

#[tokio::test]
async fn test_stop_blocks_new_starts_but_running_tasks_finish() {
    init_tracing();
    let gate = Arc::new(Semaphore::new(0));
    let executor = TaskExecutor::new(
        Arc::new(GatedBackend {
            gate: Arc::clone(&gate),
        }),
        &config(1),
    );
    executor.start().await;

    let running = executor.submit(Value::from("first")).await.unwrap();
    wait_for_status(&executor, running, TaskStatus::Processing).await;

    let parked_a = executor.submit(Value::from("second")).await.unwrap();
    let parked_b = executor.submit(Value::from("third")).await.unwrap();
    // let the dispatcher hand both to workers waiting on the permit
    tokio::time::sleep(Duration::from_millis(50)).await;

    executor.stop().await;
    assert!(!executor.is_running().await);

    // submissions are still accepted while stopped
    let late = executor.submit(Value::from("fourth")).await.unwrap();

    gate.add_permits(1);
    let finished = executor.wait(running).await.unwrap();
    assert_eq!(finished.status, TaskStatus::Completed);

    tokio::time::sleep(Duration::from_millis(100)).await;
    for id in [parked_a, parked_b, late] {
        assert_eq!(
            executor.get_task_status(id).await.unwrap().status,
            TaskStatus::Pending
        );
    }
    assert_eq!(executor.queue_depth(), 3);
    assert_eq!(executor.active_count().await, 0);

    // restarting picks the pending work back up
    gate.add_permits(10);
    executor.start().await;
    for result in executor.wait_all(&[parked_a, parked_b, late]).await {
        assert_eq!(result.unwrap().status, TaskStatus::Completed);
    }
    executor.stop().await;
}

#[tokio::test]
async fn test_start_is_idempotent() {
    init_tracing();
    let backend = Arc::new(InstrumentedBackend::with_delay(1));
    let executor = TaskExecutor::new(backend.clone(), &config(4));
    executor.start().await;
    executor.start().await;
    assert!(executor.is_running().await);

    let inputs: Vec<Value> = (0..10).map(|i| Value::from(format!("task-{}", i))).collect();
    let ids = executor.submit_batch(inputs).await;
    for result in executor.wait_all(&ids).await {
        assert_eq!(result.unwrap().status, TaskStatus::Completed);
    }

    let calls = backend.calls();
    assert_eq!(calls.len(), 10);
    assert!(calls.values().all(|n| *n == 1), "each task runs exactly once: {:?}", calls);

    executor.stop().await;
    executor.stop().await;
    assert!(!executor.is_running().await);
}

#[tokio::test]
async fn test_queue_holds_tasks_until_started() {
    init_tracing();
    let executor = TaskExecutor::new(Arc::new(InstrumentedBackend::with_delay(1)), &config(3));

    let ids = executor
        .submit_batch(vec![Value::from("a"), Value::from("b"), Value::from("c")])
        .await;
    assert_eq!(executor.queue_depth(), 3);
    assert_eq!(executor.active_count().await, 0);
    for task in executor.get_all_tasks().await {
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.completed_at.is_none());
    }

    executor.start().await;
    executor.wait_all(&ids).await;
    assert_eq!(executor.queue_depth(), 0);
    executor.stop().await;
}

#[tokio::test]
async fn test_invalid_input_is_rejected_synchronously() {
    let executor = TaskExecutor::new(Arc::new(InstrumentedBackend::default()), &config(1));

    assert!(matches!(
        executor.submit(Value::Null).await,
        Err(FlowError::InvalidInput(_))
    ));
    assert!(matches!(
        executor.submit(Value::from("  ")).await,
        Err(FlowError::InvalidInput(_))
    ));
    assert!(executor.get_all_tasks().await.is_empty());
    assert_eq!(executor.queue_depth(), 0);

    let ids = executor
        .submit_batch(vec![Value::from("ok"), Value::Null, Value::from("fine")])
        .await;
    assert_eq!(ids.len(), 2);
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let executor = TaskExecutor::new(Arc::new(InstrumentedBackend::default()), &config(1));
    let id = TaskId::new_v4();

    match executor.get_task_status(id).await {
        Err(FlowError::TaskNotFound(missing)) => assert_eq!(missing, id),
        other => panic!("expected TaskNotFound, got {:?}", other),
    }
    assert!(executor.wait(id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_shutdown_waits_for_running_tasks() {
    init_tracing();
    let backend = Arc::new(InstrumentedBackend::with_delay(80));
    let executor = TaskExecutor::new(backend, &config(3));
    executor.start().await;

    let ids = executor
        .submit_batch(vec![Value::from("a"), Value::from("b"), Value::from("c")])
        .await;
    for id in &ids {
        wait_for_status(&executor, *id, TaskStatus::Processing).await;
    }

    executor.shutdown().await;
    for task in executor.get_all_tasks().await {
        assert!(task.is_terminal(), "task {} still {}", task.id, task.status);
    }
}

#[tokio::test]
async fn test_panicking_backend_marks_task_failed() {
    init_tracing();
    let backend = Arc::new(FnBackend::new(|input: Value| async move {
        if input.as_str() == Some("boom") {
            panic!("backend blew up");
        }
        Ok::<_, BackendError>(input)
    }));
    let executor = TaskExecutor::new(backend, &config(1));
    executor.start().await;

    let boom = executor.submit(Value::from("boom")).await.unwrap();
    let fine = executor.submit(Value::from("fine")).await.unwrap();

    let failed = executor.wait(boom).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("Execution failed: backend panicked"));
    // the permit was released, so the next task still runs
    assert_eq!(executor.wait(fine).await.unwrap().status, TaskStatus::Completed);
    executor.stop().await;
}

#[tokio::test]
async fn test_process_now_bypasses_queue() {
    let executor = TaskExecutor::new(Arc::new(InstrumentedBackend::default()), &config(1));

    let result = executor.process_now(Value::from("direct")).await.unwrap();
    assert_eq!(result, Value::from("processed direct"));
    assert!(executor.get_all_tasks().await.is_empty());

    assert!(matches!(
        executor.process_now(Value::from("bad")).await,
        Err(FlowError::Backend(BackendError::ExecutionFailed(_)))
    ));
}

#[tokio::test]
async fn test_dropping_a_running_executor_releases_the_backend() {
    init_tracing();
    let backend = Arc::new(InstrumentedBackend::with_delay(5));
    let executor = TaskExecutor::new(
        backend.clone(),
        &RuntimeConfig {
            max_concurrent_tasks: 2,
            dequeue_timeout: Duration::from_millis(10),
            ..RuntimeConfig::default()
        },
    );
    executor.start().await;
    let id = executor.submit(Value::from("v1")).await.unwrap();
    assert_eq!(executor.wait(id).await.unwrap().status, TaskStatus::Completed);

    drop(executor);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(Arc::strong_count(&backend), 1, "dispatcher outlived its executor");
}

#[tokio::test]
async fn test_single_step_runs_as_executor_backend() {
    init_tracing();
    let step = FnStep::new("text.upper", |input: Value, _prior: StepResults| async move {
        match input.as_str() {
            Some(s) => Ok::<_, BackendError>(Value::from(s.to_uppercase())),
            None => Err(BackendError::failed("nothing to upper-case")),
        }
    });
    let backend = StepBackend::new(Arc::new(step));
    assert_eq!(backend.name(), "text.upper");

    let executor = TaskExecutor::new(Arc::new(backend), &config(2));
    executor.start().await;

    let ok = executor.submit(Value::from("abc")).await.unwrap();
    let bad = executor.submit(Value::from(42i64)).await.unwrap();

    let ok = executor.wait(ok).await.unwrap();
    assert_eq!(ok.status, TaskStatus::Completed);
    assert_eq!(ok.result, Some(Value::from("ABC")));

    let bad = executor.wait(bad).await.unwrap();
    assert_eq!(bad.status, TaskStatus::Failed);
    assert!(bad.error.unwrap().contains("nothing to upper-case"));

    executor.stop().await;
}
