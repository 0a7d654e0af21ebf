//! Task dispatcher
//!
//! Priority-ordered, bounded, pause/resume task queue with device
//! assignment. Processing is single-flight: one pass runs at a time across
//! all triggers (enqueue, resume, device-idle, completion), guarded by an
//! atomic flag. Assignments leave the queue and enter the assignment map
//! atomically from the point of view of every other caller.

use crate::monitor::DeviceMonitor;
use shuttle_domain::connector::PlcConnector;
use shuttle_domain::scheduling::{AssignmentContext, AssignmentStrategy};
use shuttle_domain::shared_kernel::{
    DeviceId, DeviceProfile, DispatcherState, GatewayError, Result, TaskId,
};
use shuttle_domain::tasks::queue::{PriorityTaskQueue, QueueEntry};
use shuttle_domain::tasks::TransportTask;
use shuttle_infrastructure::pool::ConnectionPool;
use shuttle_shared::config::TaskDispatcherConfig;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use futures::FutureExt;

/// A committed assignment handed to the command executor.
pub struct TaskAssignment {
    pub task: TransportTask,
    pub profile: DeviceProfile,
    pub connector: Arc<dyn PlcConnector>,
}

pub struct TaskDispatcher {
    queue: PriorityTaskQueue,
    state: StdMutex<DispatcherState>,
    /// Set while the dispatcher was paused by a failure; blocks the
    /// completion path from auto-resuming until an explicit `resume()`.
    paused_by_failure: AtomicBool,
    /// Single-flight guard for the processing pass.
    processing: AtomicBool,
    assignments: StdMutex<HashMap<DeviceId, TaskId>>,
    strategy: Arc<dyn AssignmentStrategy>,
    monitor: Arc<DeviceMonitor>,
    pool: Arc<ConnectionPool>,
    assignment_tx: mpsc::UnboundedSender<TaskAssignment>,
    config: TaskDispatcherConfig,
}

impl TaskDispatcher {
    /// Build the dispatcher plus the receiving end of the assignment
    /// stream, which the gateway pumps into the executor.
    pub fn new(
        strategy: Arc<dyn AssignmentStrategy>,
        monitor: Arc<DeviceMonitor>,
        pool: Arc<ConnectionPool>,
        config: TaskDispatcherConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TaskAssignment>) {
        let (assignment_tx, assignment_rx) = mpsc::unbounded_channel();
        let initial = if config.auto_pause_when_empty {
            DispatcherState::Paused
        } else {
            DispatcherState::Running
        };
        let dispatcher = Arc::new(Self {
            queue: PriorityTaskQueue::new(),
            state: StdMutex::new(initial),
            paused_by_failure: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            assignments: StdMutex::new(HashMap::new()),
            strategy,
            monitor,
            pool,
            assignment_tx,
            config,
        });
        (dispatcher, assignment_rx)
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.lock().expect("dispatcher state poisoned")
    }

    pub fn is_paused(&self) -> bool {
        self.state().is_paused()
    }

    /// True when the current pause came from a failure and needs an
    /// explicit operator resume.
    pub fn is_paused_by_failure(&self) -> bool {
        self.paused_by_failure.load(Ordering::SeqCst)
    }

    fn set_state(&self, new_state: DispatcherState) -> bool {
        let mut state = self.state.lock().expect("dispatcher state poisoned");
        if !state.can_transition_to(&new_state) {
            return false;
        }
        let previous = *state;
        *state = new_state;
        debug!(from = %previous, to = %new_state, "dispatcher state transition");
        true
    }

    /// Pause processing. Idempotent; in-flight commands keep polling.
    pub fn pause(&self) {
        if self.set_state(DispatcherState::Paused) {
            info!("task dispatcher paused");
        }
    }

    /// Pause after a failure; only an explicit `resume()` restarts.
    pub fn pause_on_failure(&self) {
        self.paused_by_failure.store(true, Ordering::SeqCst);
        self.pause();
    }

    /// Resume processing and schedule a pass. Idempotent while Running.
    pub fn resume(self: &Arc<Self>) -> Result<()> {
        if self.state().is_terminal() {
            return Err(GatewayError::InvalidOperation {
                message: "dispatcher is disposed".to_string(),
            });
        }
        self.paused_by_failure.store(false, Ordering::SeqCst);
        if self.set_state(DispatcherState::Running) {
            info!("task dispatcher resumed");
        }
        self.schedule_processing();
        Ok(())
    }

    /// Terminal shutdown; queued tasks are dropped with the process.
    pub fn dispose(&self) {
        self.set_state(DispatcherState::Disposed);
    }

    /// Enqueue a batch of tasks, rejecting the whole batch when it would
    /// overflow the queue. Schedules processing when Running.
    pub fn enqueue_tasks(self: &Arc<Self>, tasks: Vec<TransportTask>) -> Result<()> {
        if self.state().is_terminal() {
            return Err(GatewayError::InvalidOperation {
                message: "dispatcher is disposed".to_string(),
            });
        }
        if tasks.is_empty() {
            return Ok(());
        }
        let current = self.queue.count();
        if current + tasks.len() > self.config.max_queue_size {
            return Err(GatewayError::TaskQueueFull {
                task_id: tasks[0].task_id.clone(),
                current,
                max: self.config.max_queue_size,
            });
        }
        for task in tasks {
            let priority = task.priority();
            info!(task_id = %task.task_id, command = %task.command_type, %priority, "task enqueued");
            self.queue.enqueue(task, priority)?;
        }
        if self.state().is_running() {
            self.schedule_processing();
        }
        Ok(())
    }

    /// Kick a processing pass unless one is already in flight.
    pub fn schedule_processing(self: &Arc<Self>) {
        if !self.state().is_running() || self.queue.is_empty() {
            return;
        }
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let dispatcher = Arc::clone(self);
            tokio::spawn(async move {
                dispatcher.run_processing_pass().await;
            });
        }
    }

    /// One processing pass; drains up to `max_tasks_per_cycle` assignments.
    async fn run_processing_pass(self: Arc<Self>) {
        let mut assigned = 0usize;
        for _ in 0..self.config.max_tasks_per_cycle {
            if !self.state().is_running() {
                break;
            }
            let Some(head) = self.queue.try_peek() else {
                break;
            };

            let idle_devices = self.monitor.get_idle_devices().await;
            let assigning: HashSet<DeviceId> = {
                let assignments = self.assignments.lock().expect("assignment map poisoned");
                assignments.keys().cloned().collect()
            };
            let context = AssignmentContext {
                task: &head.task,
                idle_devices: &idle_devices,
                profiles: self.pool.profiles(),
                assigning: &assigning,
            };
            let Some(profile) = self.strategy.select_device(&context) else {
                // Leave the head where it is until a device frees up.
                break;
            };

            {
                let assignments = self.assignments.lock().expect("assignment map poisoned");
                if assignments.contains_key(&profile.id) {
                    // Lost a race against a concurrent completion/selection.
                    continue;
                }
            }

            let connector = match self.pool.get(&profile.id).await {
                Ok(connector) => connector,
                Err(err) => {
                    warn!(device_id = %profile.id, error = %err, "connector unavailable, skipping device");
                    continue;
                }
            };

            // Best-effort readiness re-read. Only a synchronously completed
            // `false` blocks the assignment; anything slower proceeds
            // optimistically.
            if let Some(Ok(false)) = connector
                .read_bool(&profile.signals.device_ready)
                .now_or_never()
            {
                debug!(device_id = %profile.id, "device not ready, keeping task queued");
                continue;
            }

            let Some(entry) = self.queue.take(&head.task.task_id) else {
                // Head removed or replaced since the peek.
                continue;
            };

            self.commit_assignment(entry, profile, connector);
            assigned += 1;

            // Rate-limit PLC trigger bursts between assignments.
            tokio::time::sleep(self.config.assignment_delay()).await;
        }

        self.processing.store(false, Ordering::SeqCst);
        if self.queue.is_empty() {
            self.maybe_auto_pause();
        } else if assigned > 0 {
            // Work may have arrived while the flag was held.
            self.schedule_processing();
        }
    }

    fn commit_assignment(
        self: &Arc<Self>,
        entry: QueueEntry,
        profile: DeviceProfile,
        connector: Arc<dyn PlcConnector>,
    ) {
        let task_id = entry.task.task_id.clone();
        {
            let mut assignments = self.assignments.lock().expect("assignment map poisoned");
            assignments.insert(profile.id.clone(), task_id.clone());
        }
        info!(task_id = %task_id, device_id = %profile.id, "task assigned");
        let assignment = TaskAssignment {
            task: entry.task.clone(),
            profile: profile.clone(),
            connector,
        };
        if self.assignment_tx.send(assignment).is_err() {
            // Executor side is gone; roll the task back into the queue.
            warn!(task_id = %task_id, "assignment channel closed, re-queueing task");
            let mut assignments = self.assignments.lock().expect("assignment map poisoned");
            assignments.remove(&profile.id);
            drop(assignments);
            let _ = self.queue.enqueue(entry.task, entry.priority);
        }
    }

    /// Release a device's assignment when its task reached an outcome.
    ///
    /// Removes the mapping only when it still matches. A non-empty queue
    /// restarts processing (unless the pause came from a failure); an empty
    /// queue enters Paused when auto-pause is configured.
    pub fn complete_task_assignment(self: &Arc<Self>, device_id: &DeviceId, task_id: &TaskId) -> bool {
        let removed = {
            let mut assignments = self.assignments.lock().expect("assignment map poisoned");
            match assignments.get(device_id) {
                Some(current) if current == task_id => {
                    assignments.remove(device_id);
                    true
                }
                _ => false,
            }
        };
        if !removed {
            return false;
        }
        debug!(device_id = %device_id, task_id = %task_id, "assignment released");

        if !self.queue.is_empty() {
            if !self.paused_by_failure.load(Ordering::SeqCst)
                && self.set_state(DispatcherState::Running)
            {
                info!("dispatcher resumed by task completion");
            }
            self.schedule_processing();
        } else {
            self.maybe_auto_pause();
        }
        true
    }

    /// Auto-pause when the queue is empty and nothing is in flight.
    fn maybe_auto_pause(&self) {
        if !self.config.auto_pause_when_empty {
            return;
        }
        let in_flight = {
            let assignments = self.assignments.lock().expect("assignment map poisoned");
            !assignments.is_empty()
        };
        if !in_flight && self.queue.is_empty() && self.set_state(DispatcherState::Paused) {
            info!("dispatcher auto-paused on empty queue");
        }
    }

    /// Remove one queued task. Assigned tasks are never touched here.
    pub fn remove_task(&self, task_id: &TaskId) -> bool {
        let removed = self.queue.try_remove(task_id);
        if removed {
            info!(task_id = %task_id, "task removed from queue");
            self.maybe_auto_pause();
        }
        removed
    }

    /// Remove a batch; true when every id was actually queued.
    pub fn remove_tasks(&self, task_ids: &[TaskId]) -> bool {
        let mut all = true;
        for task_id in task_ids {
            all &= self.remove_task(task_id);
        }
        all
    }

    pub fn get_current_task(&self, device_id: &DeviceId) -> Option<TaskId> {
        let assignments = self.assignments.lock().expect("assignment map poisoned");
        assignments.get(device_id).cloned()
    }

    /// Snapshot copy of the queue in dispatch order.
    pub fn get_queued_tasks(&self) -> Vec<QueueEntry> {
        self.queue.snapshot()
    }

    pub fn queue_count(&self) -> usize {
        self.queue.count()
    }

    pub fn queue_contains(&self, task_id: &TaskId) -> bool {
        self.queue.contains(task_id)
    }

    /// True when the task id is queued or assigned; used by the façade's
    /// uniqueness check.
    pub fn knows_task(&self, task_id: &TaskId) -> bool {
        if self.queue.contains(task_id) {
            return true;
        }
        let assignments = self.assignments.lock().expect("assignment map poisoned");
        assignments.values().any(|assigned| assigned == task_id)
    }

    /// Reaction to a device going idle: pick up pending work.
    pub fn on_device_idle(self: &Arc<Self>) {
        if self.state().is_running() && !self.queue.is_empty() {
            self.schedule_processing();
        }
    }
}
