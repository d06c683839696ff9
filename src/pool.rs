//! Supervisor: the public pool handle plus the driver task that owns all mutable
//! pool state — workers, the pending queue, and the in-flight map — and runs the dispatcher,
//! result collector, and sentinel monitor as one actor loop instead of three tasks sharing a
//! lock, following the single-owner-task style used for orchestration elsewhere in this
//! codebase's surrounding ecosystem.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

use crate::codec::Codec;
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::handle::{Handle, WeakHandle};
use crate::protocol::{write_frame, ResultFrame, ResultItem, Status, TaskFrame, TaskItem};
use crate::task::{CallableId, Generation, JobId, Task, TaskId, TaskOutcome, TaskPayload};
use crate::worker_proc::{WorkerEvent, WorkerProc};

/// How long the driver gives a single `write_frame` to a worker's stdin before assuming the
/// worker is gone and falling back to the sentinel.
const DISPATCH_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// One chunk's worth of work still waiting for a worker: every task in `items` is dispatched to
/// the same worker in a single `TaskFrame`.
struct QueueItem {
    items: Vec<(Task, WeakHandle)>,
}

enum ControlMsg {
    Resize(usize, oneshot::Sender<()>),
    Terminate(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    Terminating,
    Terminated,
}

struct RunStateCell {
    state: Mutex<RunState>,
    notify: Notify,
}

impl RunStateCell {
    fn new() -> Self {
        Self {
            state: Mutex::new(RunState::Running),
            notify: Notify::new(),
        }
    }

    fn get(&self) -> RunState {
        *self.state.lock().unwrap()
    }

    fn set(&self, s: RunState) {
        *self.state.lock().unwrap() = s;
    }

    fn set_terminated(&self) {
        *self.state.lock().unwrap() = RunState::Terminated;
        self.notify.notify_waiters();
    }

    async fn wait_terminated(&self) {
        loop {
            let notified = self.notify.notified();
            if self.get() == RunState::Terminated {
                return;
            }
            notified.await;
        }
    }
}

/// A worker's dispatch state.
enum WState {
    Idle,
    /// Executing one chunk. `chunk_id` matches the `TaskFrame`/`ResultFrame` in flight;
    /// `items` holds every task in the chunk, in dispatch order.
    Busy {
        chunk_id: TaskId,
        items: Vec<(TaskId, WeakHandle)>,
    },
    /// A frame write to this worker timed out or the pipe broke. The chunk's tasks were requeued
    /// at the head of the pending queue without touching their handles; the sentinel will confirm
    /// the worker is gone and this slot gets respawned.
    Faulting,
    Dead,
}

struct WorkerSlot {
    proc: WorkerProc,
    generation: Generation,
    state: WState,
    /// Updated every time the slot becomes `Idle`; used to pick shrink victims "most recently
    /// idle first".
    last_idle_at: Instant,
}

struct ShrinkState {
    new_size: usize,
    waiting_on: HashSet<usize>,
    ack: oneshot::Sender<()>,
}

/// The driver task: the sole owner of worker processes, the pending queue, and the in-flight
/// map. Everything else talks to it through channels.
struct Driver {
    config: PoolConfig,
    workers: HashMap<usize, WorkerSlot>,
    next_worker_idx: usize,
    rr_cursor: usize,
    pending: VecDeque<QueueItem>,
    in_flight: HashMap<TaskId, (usize, Generation, WeakHandle)>,
    recent_deaths: VecDeque<Instant>,
    shrink: Option<ShrinkState>,
    target_size: usize,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl Driver {
    fn new(config: PoolConfig, events_tx: mpsc::UnboundedSender<WorkerEvent>) -> Result<Self, PoolError> {
        let mut driver = Self {
            target_size: config.size,
            config,
            workers: HashMap::new(),
            next_worker_idx: 0,
            rr_cursor: 0,
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            recent_deaths: VecDeque::new(),
            shrink: None,
            events_tx,
        };
        for _ in 0..driver.target_size {
            driver.spawn_worker()?;
        }
        Ok(driver)
    }

    fn spawn_worker(&mut self) -> Result<(), PoolError> {
        let idx = self.next_worker_idx;
        self.next_worker_idx += 1;
        self.spawn_worker_at(idx, 1)
    }

    fn spawn_worker_at(&mut self, idx: usize, generation: Generation) -> Result<(), PoolError> {
        let proc = WorkerProc::spawn(
            &self.config.worker_bin,
            &self.config.worker_args,
            idx,
            generation,
            self.events_tx.clone(),
        )
        .map_err(|e| PoolError::InvalidArgument(format!("failed to spawn worker: {e}")))?;
        self.workers.insert(
            idx,
            WorkerSlot {
                proc,
                generation,
                state: WState::Idle,
                last_idle_at: Instant::now(),
            },
        );
        Ok(())
    }

    fn respawn_at(&mut self, idx: usize, prior_generation: Generation) {
        self.workers.remove(&idx);
        if let Err(err) = self.spawn_worker_at(idx, prior_generation + 1) {
            tracing::warn!(worker_idx = idx, %err, "failed to respawn worker");
        }
    }

    fn find_idle_worker(&mut self) -> Option<usize> {
        if self.workers.is_empty() {
            return None;
        }
        let mut sorted: Vec<usize> = self.workers.keys().copied().collect();
        sorted.sort_unstable();
        let start = sorted.iter().position(|&k| k > self.rr_cursor).unwrap_or(0);
        for offset in 0..sorted.len() {
            let idx = sorted[(start + offset) % sorted.len()];
            if matches!(self.workers.get(&idx), Some(s) if matches!(s.state, WState::Idle)) {
                self.rr_cursor = idx;
                return Some(idx);
            }
        }
        None
    }

    async fn assign_jobs(&mut self) {
        loop {
            let Some(idx) = self.find_idle_worker() else {
                return;
            };
            let Some(item) = self.pending.pop_front() else {
                return;
            };
            self.dispatch_one(idx, item).await;
        }
    }

    async fn dispatch_one(&mut self, idx: usize, item: QueueItem) {
        let mut live: Vec<(Task, WeakHandle)> = Vec::with_capacity(item.items.len());
        for (task, weak) in item.items {
            if let TaskPayload::Poisoned { detail } = &task.payload {
                weak.complete(TaskOutcome::SerializationError {
                    kind: "submit".to_string(),
                    detail: detail.clone(),
                });
                continue;
            }
            live.push((task, weak));
        }

        if live.is_empty() {
            return;
        }

        let Some(slot) = self.workers.get_mut(&idx) else {
            // Worker vanished between being picked and dispatch (shouldn't happen within one
            // `assign_jobs` pass, but requeue defensively rather than drop the chunk).
            self.pending.push_front(QueueItem { items: live });
            return;
        };

        let chunk_id = live[0].0.task_id;
        let mut wire_items = Vec::with_capacity(live.len());
        let mut busy_items = Vec::with_capacity(live.len());
        for (task, weak) in &live {
            let TaskPayload::Encoded(args) = &task.payload else {
                unreachable!("Poisoned payload filtered out above");
            };
            wire_items.push(TaskItem {
                task_id: task.task_id,
                callable_ref: task.callable.clone(),
                args: args.clone(),
            });
            busy_items.push((task.task_id, weak.clone()));
        }

        slot.state = WState::Busy {
            chunk_id,
            items: busy_items,
        };
        for (task, weak) in &live {
            self.in_flight
                .insert(task.task_id, (idx, slot.generation, weak.clone()));
        }

        let frame = TaskFrame {
            chunk_id,
            items: wire_items,
        };

        let write_result =
            tokio::time::timeout(DISPATCH_WRITE_TIMEOUT, write_frame(&mut slot.proc.stdin, &frame)).await;

        match write_result {
            Ok(Ok(())) => {}
            _ => {
                // Worker is dead or wedged; don't touch any handle in the chunk. Requeue the
                // chunk's tasks and let the sentinel confirm the death and trigger a respawn.
                for (task, _) in &live {
                    self.in_flight.remove(&task.task_id);
                }
                if let Some(slot) = self.workers.get_mut(&idx) {
                    slot.state = WState::Faulting;
                }
                self.pending.push_front(QueueItem { items: live });
            }
        }
    }

    async fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Frame {
                worker_idx,
                generation,
                frame,
            } => self.handle_frame(worker_idx, generation, frame).await,
            WorkerEvent::Died {
                worker_idx,
                generation,
            } => self.on_worker_death(worker_idx, generation).await,
        }
    }

    async fn handle_frame(&mut self, worker_idx: usize, generation: Generation, frame: ResultFrame) {
        let Some(slot) = self.workers.get_mut(&worker_idx) else {
            return;
        };
        if slot.generation != generation {
            return; // stale frame from a generation that has since been respawned
        }

        let matches_current =
            matches!(&slot.state, WState::Busy { chunk_id, .. } if *chunk_id == frame.chunk_id);
        if !matches_current {
            tracing::trace!(worker_idx, chunk_id = frame.chunk_id, "discarding unmatched result frame");
            return;
        }

        let WState::Busy { items, .. } = std::mem::replace(&mut slot.state, WState::Idle) else {
            unreachable!("matches_current guarantees Busy");
        };
        slot.last_idle_at = Instant::now();

        let mut pending_handles: HashMap<TaskId, WeakHandle> = items.into_iter().collect();
        for result_item in frame.items {
            self.in_flight.remove(&result_item.task_id);
            if let Some(weak) = pending_handles.remove(&result_item.task_id) {
                let outcome = outcome_from_result(self.config.codec.as_ref(), result_item);
                weak.complete(outcome);
            }
        }

        self.on_worker_idle(worker_idx).await;
    }

    async fn on_worker_idle(&mut self, worker_idx: usize) {
        if let Some(shrink) = &mut self.shrink {
            shrink.waiting_on.remove(&worker_idx);
            if shrink.waiting_on.is_empty() {
                let ShrinkState { new_size, ack, .. } = self.shrink.take().unwrap();
                self.finish_shrink(new_size);
                let _ = ack.send(());
            }
        }
        self.assign_jobs().await;
    }

    async fn on_worker_death(&mut self, worker_idx: usize, generation: Generation) {
        let Some(slot) = self.workers.get(&worker_idx) else {
            return;
        };
        if slot.generation != generation {
            return; // already respawned; this sentinel firing is for a dead generation
        }

        let now = Instant::now();
        self.recent_deaths.push_back(now);
        let window = self.config.broadcast_death_window;
        while let Some(&front) = self.recent_deaths.front() {
            if now.duration_since(front) > window {
                self.recent_deaths.pop_front();
            } else {
                break;
            }
        }
        let broadcast_suspected = self.recent_deaths.len() >= 2;

        let slot = self.workers.get_mut(&worker_idx).unwrap();
        match std::mem::replace(&mut slot.state, WState::Dead) {
            WState::Busy { items, .. } => {
                for (task_id, weak) in items {
                    self.in_flight.remove(&task_id);
                    weak.complete(TaskOutcome::WorkerLost);
                }
            }
            WState::Idle => {
                tracing::warn!(worker_idx, "worker exited unexpectedly while idle");
            }
            WState::Faulting | WState::Dead => {}
        }
        if let Some(shrink) = &mut self.shrink {
            shrink.waiting_on.remove(&worker_idx);
        }

        let mut to_respawn = vec![(worker_idx, generation)];

        if broadcast_suspected {
            let victims: Vec<usize> = self
                .workers
                .iter()
                .filter(|(i, s)| **i != worker_idx && matches!(s.state, WState::Busy { .. }))
                .map(|(i, _)| *i)
                .collect();
            if !victims.is_empty() {
                tracing::warn!(
                    count = victims.len(),
                    "broadcast worker death suspected; recovering busy workers preemptively"
                );
            }
            for idx in victims {
                let Some(slot) = self.workers.get_mut(&idx) else {
                    continue;
                };
                let victim_generation = slot.generation;
                if let WState::Busy { items, .. } = std::mem::replace(&mut slot.state, WState::Dead) {
                    for (task_id, weak) in items {
                        self.in_flight.remove(&task_id);
                        weak.complete(TaskOutcome::WorkerLost);
                    }
                }
                let _ = slot.proc.child.start_kill();
                if let Some(shrink) = &mut self.shrink {
                    shrink.waiting_on.remove(&idx);
                }
                to_respawn.push((idx, victim_generation));
            }
        }

        for (idx, gen) in to_respawn {
            self.respawn_at(idx, gen);
        }

        if let Some(shrink) = &self.shrink {
            if shrink.waiting_on.is_empty() {
                let ShrinkState { new_size, ack, .. } = self.shrink.take().unwrap();
                self.finish_shrink(new_size);
                let _ = ack.send(());
            }
        }

        self.assign_jobs().await;
    }

    async fn handle_resize(&mut self, new_size: usize, ack: oneshot::Sender<()>) {
        if new_size == self.target_size {
            let _ = ack.send(());
            return;
        }

        if new_size > self.target_size {
            for _ in 0..(new_size - self.target_size) {
                if let Err(err) = self.spawn_worker() {
                    tracing::warn!(%err, "failed to spawn worker while growing pool");
                }
            }
            self.target_size = new_size;
            let _ = ack.send(());
            self.assign_jobs().await;
            return;
        }

        // Shrink: wait for every currently-busy worker to go idle, then remove the
        // most-recently-idle workers down to `new_size`.
        let busy_now: HashSet<usize> = self
            .workers
            .iter()
            .filter(|(_, s)| matches!(s.state, WState::Busy { .. }))
            .map(|(i, _)| *i)
            .collect();

        if busy_now.is_empty() {
            self.finish_shrink(new_size);
            let _ = ack.send(());
            return;
        }

        self.shrink = Some(ShrinkState {
            new_size,
            waiting_on: busy_now,
            ack,
        });
    }

    fn finish_shrink(&mut self, new_size: usize) {
        let current = self.workers.len();
        let remove_count = current.saturating_sub(new_size);
        if remove_count == 0 {
            self.target_size = new_size;
            return;
        }

        let mut idle: Vec<(usize, Instant)> = self
            .workers
            .iter()
            .filter(|(_, s)| matches!(s.state, WState::Idle))
            .map(|(i, s)| (*i, s.last_idle_at))
            .collect();
        idle.sort_by(|a, b| b.1.cmp(&a.1)); // most-recently-idle first

        for (idx, _) in idle.into_iter().take(remove_count) {
            self.workers.remove(&idx);
        }
        self.target_size = new_size;
        tracing::warn!(removed = remove_count, new_size, "pool shrink removed idle workers");
    }

    async fn do_terminate(&mut self, queue_rx: &mut mpsc::Receiver<QueueItem>) {
        queue_rx.close();
        while let Ok(item) = queue_rx.try_recv() {
            for (_, weak) in item.items {
                weak.cancel();
            }
        }
        for item in self.pending.drain(..) {
            for (_, weak) in item.items {
                weak.cancel();
            }
        }
        for (_, (_, _, weak)) in self.in_flight.drain() {
            weak.cancel();
        }
        if let Some(shrink) = self.shrink.take() {
            let _ = shrink.ack.send(());
        }

        let grace = self.config.termination_grace;
        let mut joins = Vec::new();
        for (_, slot) in self.workers.drain() {
            joins.push(async move {
                let mut proc = slot.proc;
                drop(proc.stdin); // EOF on stdin: a well-behaved worker exits on its own.
                if tokio::time::timeout(grace, proc.child.wait()).await.is_err() {
                    let _ = proc.child.start_kill();
                    let _ = proc.child.wait().await;
                }
            });
        }
        futures::future::join_all(joins).await;
    }

    async fn run(
        mut self,
        mut queue_rx: mpsc::Receiver<QueueItem>,
        mut control_rx: mpsc::UnboundedReceiver<ControlMsg>,
        mut events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
        run_state: Arc<RunStateCell>,
    ) {
        loop {
            tokio::select! {
                maybe_item = queue_rx.recv() => {
                    match maybe_item {
                        Some(item) => {
                            self.pending.push_back(item);
                            self.assign_jobs().await;
                        }
                        // Every `Pool` clone (and its `queue_tx`) was dropped without an explicit
                        // `terminate()`; `control_tx` goes with it, so there's nothing further to
                        // wait on.
                        None => break,
                    }
                }
                maybe_ctrl = control_rx.recv() => {
                    match maybe_ctrl {
                        Some(ControlMsg::Resize(n, ack)) => self.handle_resize(n, ack).await,
                        Some(ControlMsg::Terminate(ack)) => {
                            run_state.set(RunState::Terminating);
                            self.do_terminate(&mut queue_rx).await;
                            run_state.set_terminated();
                            let _ = ack.send(());
                            return;
                        }
                        None => break,
                    }
                }
                Some(event) = events_rx.recv() => {
                    self.handle_worker_event(event).await;
                }
            }
        }

        // Every channel the public handle could reach us through is gone without an explicit
        // `terminate()` (the `Pool` was dropped). Tear down the same way so no worker leaks.
        run_state.set(RunState::Terminating);
        self.do_terminate(&mut queue_rx).await;
        run_state.set_terminated();
    }
}

fn outcome_from_result(codec: &dyn Codec, item: ResultItem) -> TaskOutcome {
    match item.status {
        Status::Ok => match codec.decode(&item.payload) {
            Ok(value) => TaskOutcome::Ok(value),
            Err(err) => TaskOutcome::SerializationError {
                kind: "result".to_string(),
                detail: err.detail,
            },
        },
        Status::UserError => TaskOutcome::UserError(String::from_utf8_lossy(&item.payload).into_owned()),
        Status::SerializationError => {
            let text = String::from_utf8_lossy(&item.payload).into_owned();
            let (kind, detail) = text.split_once(": ").unwrap_or(("output", text.as_str()));
            TaskOutcome::SerializationError {
                kind: kind.to_string(),
                detail: detail.to_string(),
            }
        }
    }
}

/// A handle to a running worker pool.
///
/// Cloning a `Pool` is cheap and shares the same underlying driver task; the driver keeps running
/// as long as at least one clone (or the driver's own channels) is alive, and tears itself down
/// the same way `terminate()` would if every clone is dropped first.
#[derive(Clone)]
pub struct Pool {
    queue_tx: mpsc::Sender<QueueItem>,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    next_task_id: Arc<AtomicU64>,
    next_job_id: Arc<AtomicU64>,
    run_state: Arc<RunStateCell>,
    codec: Arc<dyn Codec>,
    driver_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Pool {
    /// Spawn `config.size` workers and start the driver task. Must be called from within a
    /// running Tokio runtime.
    pub fn new(config: PoolConfig) -> Result<Pool, PoolError> {
        if config.size == 0 {
            return Err(PoolError::InvalidArgument("size must be >= 1".to_string()));
        }

        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let codec = config.codec.clone();
        let run_state = Arc::new(RunStateCell::new());

        let driver = Driver::new(config, events_tx)?;

        let run_state_for_task = run_state.clone();
        let task = tokio::spawn(driver.run(queue_rx, control_rx, events_rx, run_state_for_task));

        Ok(Pool {
            queue_tx,
            control_tx,
            next_task_id: Arc::new(AtomicU64::new(1)),
            next_job_id: Arc::new(AtomicU64::new(1)),
            run_state,
            codec,
            driver_task: Arc::new(Mutex::new(Some(task))),
        })
    }

    /// Enqueue one task; returns immediately with a `Handle` that resolves once the task
    /// completes, fails, or the pool is terminated first.
    pub async fn submit(&self, callable: impl Into<CallableId>, args: Value) -> Handle {
        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        self.submit_with_job(job_id, callable.into(), args).await
    }

    /// Enqueue `tasks` as a single job; the Nth returned `Handle` corresponds to the Nth input,
    /// though workers may complete them in any order. `chunksize` (clamped to at least 1) groups
    /// consecutive tasks into chunks dispatched to a worker in a single wire round-trip, cutting
    /// per-task framing overhead when many small tasks are submitted at once. `chunksize == 1`
    /// dispatches exactly as `submit` would, one task per round-trip.
    pub async fn submit_batch(&self, tasks: Vec<(CallableId, Value)>, chunksize: usize) -> Vec<Handle> {
        let chunksize = chunksize.max(1);
        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);

        let mut triples = Vec::with_capacity(tasks.len());
        for (callable, args) in tasks {
            let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
            let (handle, weak) = Handle::new(task_id);
            let payload = match self.codec.encode(&args) {
                Ok(bytes) => TaskPayload::Encoded(bytes),
                Err(err) => TaskPayload::Poisoned { detail: err.detail },
            };
            let task = Task {
                job_id,
                task_id,
                callable,
                payload,
            };
            triples.push((task, handle, weak));
        }

        let mut handles = Vec::with_capacity(triples.len());
        let mut iter = triples.into_iter().peekable();
        while iter.peek().is_some() {
            let mut items = Vec::with_capacity(chunksize);
            for _ in 0..chunksize {
                let Some((task, handle, weak)) = iter.next() else {
                    break;
                };
                handles.push(handle);
                items.push((task, weak));
            }

            if self.queue_tx.send(QueueItem { items: items.clone() }).await.is_err() {
                // Driver is gone (terminated, or in the middle of draining): this chunk never ran.
                for (_, weak) in items {
                    weak.cancel();
                }
            }
        }

        handles
    }

    async fn submit_with_job(&self, job_id: JobId, callable: CallableId, args: Value) -> Handle {
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let (handle, weak) = Handle::new(task_id);

        let payload = match self.codec.encode(&args) {
            Ok(bytes) => TaskPayload::Encoded(bytes),
            Err(err) => TaskPayload::Poisoned { detail: err.detail },
        };
        let task = Task {
            job_id,
            task_id,
            callable,
            payload,
        };

        if self
            .queue_tx
            .send(QueueItem {
                items: vec![(task, weak.clone())],
            })
            .await
            .is_err()
        {
            // Driver is gone (terminated, or in the middle of draining): the task never ran.
            weak.cancel();
        }

        handle
    }

    /// Resize the pool. Growing spawns additional workers immediately; shrinking waits for every
    /// currently-busy worker to finish before removing the most-recently-idle ones.
    pub async fn resize(&self, new_size: usize) -> Result<(), PoolError> {
        if new_size == 0 {
            return Err(PoolError::InvalidArgument("size must be >= 1".to_string()));
        }
        let (tx, rx) = oneshot::channel();
        if self.control_tx.send(ControlMsg::Resize(new_size, tx)).is_err() {
            return Err(PoolError::PoolTerminated);
        }
        rx.await.map_err(|_| PoolError::PoolTerminated)
    }

    /// Begin terminating the pool: every handle not yet `Ready` is cancelled, every worker is
    /// asked to exit and force-killed after a grace period if it doesn't. Returns once teardown
    /// has completed; does not wait for a prior `resize` or other callers to notice.
    pub async fn terminate(&self) -> Result<(), PoolError> {
        let (tx, rx) = oneshot::channel();
        if self.control_tx.send(ControlMsg::Terminate(tx)).is_err() {
            return Ok(()); // already torn down
        }
        let _ = rx.await;
        Ok(())
    }

    /// Wait until the pool has fully terminated (via `terminate()` or every `Pool` clone having
    /// been dropped).
    pub async fn join(&self) {
        self.run_state.wait_terminated().await;
        let task = self.driver_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
