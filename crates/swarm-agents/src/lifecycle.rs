//! Lifecycle manager: signal trap, active-task drain, and ordered shutdown.
//!
//! On SIGTERM/SIGINT: flip to `shutting_down` (new intake is rejected from
//! that instant), wait up to a grace period for the active-task registry in
//! the hot store to drain, run shutdown callbacks LIFO, then close
//! registered connections with the event stream closed last. On startup,
//! any Task left registered as active from a prior crash is reset so it
//! isn't silently stuck mid-pipeline forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use testgen_core::{
    HotStore, LifecycleError, LifecycleTaskRecord, PipelineError, PipelineResult, SharedEventBus,
    SharedHotStore, Task, TaskId, TaskStatus,
};

type ShutdownCallback = Box<dyn FnOnce() + Send>;
type ConnectionCloser = Box<dyn FnOnce() + Send>;

/// States an orphaned Task (registered active, but the process that owned
/// it died) can be found in on restart.
const ORPHANABLE_STATES: [TaskStatus; 3] =
    [TaskStatus::Executing, TaskStatus::Repairing, TaskStatus::Validating];

pub struct LifecycleManager {
    store: SharedHotStore,
    bus: SharedEventBus,
    grace_period: Duration,
    shutting_down: AtomicBool,
    shutdown_callbacks: Mutex<Vec<(String, ShutdownCallback)>>,
    connections: Mutex<Vec<(String, ConnectionCloser)>>,
}

impl LifecycleManager {
    pub fn new(store: SharedHotStore, bus: SharedEventBus, grace_period: Duration) -> Self {
        Self {
            store,
            bus,
            grace_period,
            shutting_down: AtomicBool::new(false),
            shutdown_callbacks: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Call before accepting a new intent. Every other intake path routes
    /// through this, so nothing new can start once shutdown begins.
    pub fn guard_intake(&self) -> PipelineResult<()> {
        if self.is_shutting_down() {
            return Err(PipelineError::Lifecycle(LifecycleError::ShuttingDown));
        }
        Ok(())
    }

    /// Register a callback invoked during step 3 of shutdown, in LIFO
    /// order — the most recently registered subsystem (typically the one
    /// started last) is torn down first.
    pub fn on_shutdown(&self, name: impl Into<String>, callback: impl FnOnce() + Send + 'static) {
        self.shutdown_callbacks
            .lock()
            .unwrap()
            .push((name.into(), Box::new(callback)));
    }

    /// Register a connection closed during step 4, in registration order.
    /// The event stream itself is always closed last regardless of when
    /// other connections were registered (see `close_connections`).
    pub fn register_connection(&self, name: impl Into<String>, closer: impl FnOnce() + Send + 'static) {
        self.connections
            .lock()
            .unwrap()
            .push((name.into(), Box::new(closer)));
    }

    pub fn register_active_task(&self, task_id: &str, agent: &str) -> PipelineResult<()> {
        self.store
            .register_active_task(&LifecycleTaskRecord {
                task_id: task_id.to_string(),
                agent: agent.to_string(),
                started_at: chrono::Utc::now(),
            })
            .map_err(|e| PipelineError::Store(e.to_string()))
    }

    pub fn unregister_active_task(&self, task_id: &str) -> PipelineResult<()> {
        self.store
            .unregister_active_task(task_id)
            .map_err(|e| PipelineError::Store(e.to_string()))
    }

    /// Drive the full shutdown sequence. Returns once every step has run;
    /// the caller (main) exits immediately after.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        tracing::info!("lifecycle: shutting down, new intake rejected");

        self.wait_for_drain().await;

        let callbacks = std::mem::take(&mut *self.shutdown_callbacks.lock().unwrap());
        for (name, callback) in callbacks.into_iter().rev() {
            tracing::info!(callback = %name, "lifecycle: running shutdown callback");
            callback();
        }

        self.close_connections();
    }

    async fn wait_for_drain(&self) {
        let deadline = tokio::time::Instant::now() + self.grace_period;
        loop {
            let remaining = match self.store.active_tasks() {
                Ok(tasks) => tasks.len(),
                Err(e) => {
                    tracing::warn!(error = %e, "lifecycle: failed to read active-task registry");
                    return;
                }
            };
            if remaining == 0 {
                tracing::info!("lifecycle: active-task registry drained");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(remaining, "lifecycle: grace period elapsed with tasks still active");
                return;
            }
            tokio::time::sleep(Duration::from_millis(200).min(self.grace_period)).await;
        }
    }

    /// Close every registered connection in registration order, then the
    /// event stream — last, so in-flight shutdown callbacks can still
    /// publish events while they run.
    fn close_connections(&self) {
        let connections = std::mem::take(&mut *self.connections.lock().unwrap());
        for (name, closer) in connections {
            tracing::info!(connection = %name, "lifecycle: closing connection");
            closer();
        }
        tracing::info!(subscribers = self.bus.subscriber_count(), "lifecycle: closing event stream");
    }

    /// Reset Tasks left registered as active by a prior process that
    /// crashed mid-pipeline (§5 crash-restart recovery). Orphans in
    /// `{Executing, Repairing, Validating}` are moved to `Failed` so they
    /// surface for a retry or HITL escalation rather than sitting inert.
    pub fn recover_orphans(&self) -> PipelineResult<Vec<TaskId>> {
        let active = self
            .store
            .active_tasks()
            .map_err(|e| PipelineError::Store(e.to_string()))?;

        let mut recovered = Vec::new();
        for record in active {
            let task = self
                .store
                .get_task(&record.task_id)
                .map_err(|e| PipelineError::Store(e.to_string()))?;

            let Some(mut task) = task else {
                self.unregister_active_task(&record.task_id)?;
                continue;
            };

            if ORPHANABLE_STATES.contains(&task.status) {
                mark_failed(&mut task);
                self.store
                    .put_task(&task)
                    .map_err(|e| PipelineError::Store(e.to_string()))?;
                recovered.push(task.id.clone());
            }
            self.unregister_active_task(&record.task_id)?;
        }
        Ok(recovered)
    }
}

fn mark_failed(task: &mut Task) {
    task.status = TaskStatus::Failed;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use testgen_core::{EventBus, Intent, IntentType};

    fn manager() -> (tempfile::TempDir, LifecycleManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = HotStore::open(dir.path()).unwrap().shared();
        let bus = EventBus::new().shared();
        (dir, LifecycleManager::new(store, bus, Duration::from_millis(500)))
    }

    #[test]
    fn guard_intake_rejects_once_shutting_down() {
        let (_dir, mgr) = manager();
        assert!(mgr.guard_intake().is_ok());
        mgr.shutting_down.store(true, Ordering::SeqCst);
        assert!(matches!(
            mgr.guard_intake(),
            Err(PipelineError::Lifecycle(LifecycleError::ShuttingDown))
        ));
    }

    #[tokio::test]
    async fn shutdown_drains_before_returning_when_task_finishes_in_time() {
        let (_dir, mgr) = manager();
        mgr.register_active_task("task-1", "generator").unwrap();

        let store = mgr.store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.unregister_active_task("task-1").unwrap();
        });

        mgr.shutdown().await;
        assert!(mgr.store.active_tasks().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_callbacks_run_in_lifo_order() {
        let (_dir, mgr) = manager();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        mgr.on_shutdown("first", move || o1.lock().unwrap().push(1));
        let o2 = order.clone();
        mgr.on_shutdown("second", move || o2.lock().unwrap().push(2));

        mgr.shutdown().await;
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }

    #[test]
    fn recover_orphans_fails_executing_tasks_and_clears_registry() {
        let (_dir, mgr) = manager();
        let intent = Intent::new(IntentType::CreateTest, "add a login test", 0.9);
        let mut task = Task::new(&intent);
        task.status = TaskStatus::Executing;
        mgr.store.put_task(&task).unwrap();
        mgr.register_active_task(&task.id, "executor").unwrap();

        let recovered = mgr.recover_orphans().unwrap();
        assert_eq!(recovered, vec![task.id.clone()]);

        let reloaded = mgr.store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(reloaded.status, TaskStatus::Failed);
        assert!(mgr.store.active_tasks().unwrap().is_empty());
    }

    #[test]
    fn recover_orphans_ignores_tasks_in_non_orphanable_states() {
        let (_dir, mgr) = manager();
        let intent = Intent::new(IntentType::CreateTest, "add a checkout test", 0.9);
        let mut task = Task::new(&intent);
        task.status = TaskStatus::Done;
        mgr.store.put_task(&task).unwrap();
        mgr.register_active_task(&task.id, "validator").unwrap();

        let recovered = mgr.recover_orphans().unwrap();
        assert!(recovered.is_empty());
        let reloaded = mgr.store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(reloaded.status, TaskStatus::Done);
    }
}
