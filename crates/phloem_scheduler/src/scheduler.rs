//! Scheduler control plane.
//!
//! Single-threaded event loop over a ZMQ ROUTER socket. Clients submit
//! tasks, workers announce themselves and report completions, and every
//! allocator mutation happens on this thread, so assignment, removal and
//! balancing are serialized by construction. Between an `assign_task` and
//! the dispatch message going out no other operation runs, which is what the
//! rebalancer's snapshot semantics rely on.

use anyhow::{Context, Result};
use phloem_ids::{TaskId, WorkerId};
use phloem_protocol::{
    CancelTaskPayload, EvictTaskPayload, Message, OpCode, Task, TaskDonePayload,
    WorkerByePayload, WorkerHelloPayload,
};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use zmq::{Context as ZmqContext, Socket};

use crate::policy::{AllocatePolicy, PolicyKind};

/// Socket receive timeout, which bounds the event loop's idle latency.
const RECV_TIMEOUT_MS: i32 = 100;

/// How often the periodic balance pass runs.
const BALANCE_INTERVAL: Duration = Duration::from_secs(1);

/// Scheduler configuration.
pub struct SchedulerConfig {
    pub bind_addr: String,
    pub policy: PolicyKind,
}

/// Main scheduler control plane.
pub struct Scheduler {
    #[allow(dead_code)]
    context: ZmqContext,
    socket: Socket,
    policy: AllocatePolicy,
    /// Full descriptors of every live task, kept so evicted tasks can be
    /// re-dispatched without a round-trip to the client.
    tasks: HashMap<TaskId, Task>,
    /// Completion routing: task -> submitting client's ZMQ identity.
    task_clients: HashMap<TaskId, Vec<u8>>,
    worker_peers: HashMap<WorkerId, Vec<u8>>,
    /// Tasks with no capable worker or no free slot yet, FIFO.
    parked: VecDeque<TaskId>,
    running: bool,
    last_balance: Instant,
}

impl Scheduler {
    /// Create and bind the scheduler.
    pub fn bind(config: SchedulerConfig) -> Result<Self> {
        let context = ZmqContext::new();
        let socket = context
            .socket(zmq::ROUTER)
            .context("Failed to create ROUTER socket")?;
        socket
            .bind(&config.bind_addr)
            .with_context(|| format!("Failed to bind ROUTER socket to {}", config.bind_addr))?;
        socket
            .set_rcvtimeo(RECV_TIMEOUT_MS)
            .context("Failed to set socket receive timeout")?;

        info!(
            "Scheduler bound to {} with {} allocation policy",
            config.bind_addr, config.policy
        );

        Ok(Self {
            context,
            socket,
            policy: AllocatePolicy::new(config.policy),
            tasks: HashMap::new(),
            task_clients: HashMap::new(),
            worker_peers: HashMap::new(),
            parked: VecDeque::new(),
            running: false,
            last_balance: Instant::now(),
        })
    }

    /// Main event loop.
    pub fn run(&mut self) -> Result<()> {
        self.running = true;
        info!("Entering event loop...");

        while self.running {
            match self.recv_message() {
                Ok(Some((identity, msg))) => {
                    if let Err(e) = self.handle_message(identity, msg) {
                        warn!("Error handling message: {}", e);
                    }
                }
                Ok(None) => {
                    // Timeout, no message
                }
                Err(e) => {
                    warn!("Recv error: {}", e);
                }
            }

            if self.last_balance.elapsed() >= BALANCE_INTERVAL {
                self.run_balance_pass()?;
                self.last_balance = Instant::now();
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Receive next message with timeout (multipart: [identity, header, payload])
    fn recv_message(&mut self) -> Result<Option<(Vec<u8>, Message)>> {
        let frames = match self.socket.recv_multipart(0) {
            Ok(frames) => frames,
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if frames.len() < 3 {
            warn!(
                "Expected 3 frames [identity, header, payload], got {}",
                frames.len()
            );
            return Ok(None);
        }

        let identity = frames[0].clone();
        let msg = Message::unpack(&frames[1..])?;
        Ok(Some((identity, msg)))
    }

    fn handle_message(&mut self, identity: Vec<u8>, msg: Message) -> Result<()> {
        match msg.header.opcode {
            OpCode::WorkerHello => {
                let payload: WorkerHelloPayload = serde_json::from_slice(&msg.payload)?;
                self.handle_worker_hello(identity, payload)?;
            }
            OpCode::WorkerBye => {
                let payload: WorkerByePayload = serde_json::from_slice(&msg.payload)?;
                self.handle_worker_bye(payload.worker_id)?;
            }
            OpCode::SubmitTask => {
                let task: Task = serde_json::from_slice(&msg.payload)?;
                self.handle_submit(identity, task)?;
            }
            OpCode::TaskDone => {
                let payload: TaskDonePayload = serde_json::from_slice(&msg.payload)?;
                self.handle_task_done(payload)?;
            }
            OpCode::CancelTask => {
                let payload: CancelTaskPayload = serde_json::from_slice(&msg.payload)?;
                self.handle_cancel(identity, payload.task_id)?;
            }
            other => {
                warn!("Unexpected opcode {:?}, ignoring", other);
            }
        }
        Ok(())
    }

    fn handle_worker_hello(&mut self, identity: Vec<u8>, payload: WorkerHelloPayload) -> Result<()> {
        let added = self
            .policy
            .add_worker(payload.worker_id, &payload.resources, payload.queue_size);
        if !added {
            warn!(worker = %payload.worker_id, "Duplicate worker hello, ignoring");
            return Ok(());
        }

        info!(
            worker = %payload.worker_id,
            queue_size = payload.queue_size,
            "Worker joined: {:?}",
            payload.resources.keys().collect::<Vec<_>>()
        );
        self.worker_peers.insert(payload.worker_id, identity);

        // A fresh worker is idle by definition; spread existing queues onto
        // it, then drain whatever was waiting for capacity.
        self.run_balance_pass()?;
        self.drain_parked()?;
        Ok(())
    }

    fn handle_worker_bye(&mut self, worker_id: WorkerId) -> Result<()> {
        let orphaned = self.policy.remove_worker(worker_id);
        self.worker_peers.remove(&worker_id);
        info!(
            worker = %worker_id,
            "Worker left with {} queued tasks",
            orphaned.len()
        );

        // Stranded tasks go back through the normal assignment path, then
        // the shrunken cluster gets a balance pass.
        for task_id in orphaned {
            self.dispatch_or_park(task_id)?;
        }
        self.run_balance_pass()
    }

    fn handle_submit(&mut self, identity: Vec<u8>, task: Task) -> Result<()> {
        let task_id = task.task_id;
        debug!(task = %task_id, "Task submitted");
        self.task_clients.insert(task_id, identity);
        self.tasks.insert(task_id, task);
        self.dispatch_or_park(task_id)
    }

    fn handle_task_done(&mut self, payload: TaskDonePayload) -> Result<()> {
        let worker_id = self.policy.remove_task(payload.task_id);
        if !worker_id.is_valid() {
            debug!(task = %payload.task_id, "Completion for unknown task, ignoring");
        }
        self.tasks.remove(&payload.task_id);

        if let Some(client) = self.task_clients.remove(&payload.task_id) {
            self.send_to(
                &client,
                OpCode::TaskDone,
                payload.task_id,
                serde_json::to_vec(&payload)?,
            )?;
        }

        // A queue slot opened up; parked tasks may fit now.
        self.drain_parked()
    }

    fn handle_cancel(&mut self, client: Vec<u8>, task_id: TaskId) -> Result<()> {
        if let Some(pos) = self.parked.iter().position(|parked| *parked == task_id) {
            self.parked.remove(pos);
            self.tasks.remove(&task_id);
            self.task_clients.remove(&task_id);
            self.send_to(&client, OpCode::CancelAck, task_id, Vec::new())?;
            return Ok(());
        }

        let worker_id = self.policy.remove_task(task_id);
        if worker_id.is_valid() {
            self.tasks.remove(&task_id);
            self.task_clients.remove(&task_id);
            self.send_eviction(worker_id, task_id)?;
            self.send_to(&client, OpCode::CancelAck, task_id, Vec::new())?;
        } else {
            // Completed (or never existed): the completion message already
            // answered the client, or will never come. Nothing to confirm.
            debug!(task = %task_id, "Cancel for unassigned task, ignoring");
        }
        Ok(())
    }

    /// Assign a task and emit the dispatch message, or park it when no
    /// worker qualifies.
    fn dispatch_or_park(&mut self, task_id: TaskId) -> Result<()> {
        let Some(task) = self.tasks.get(&task_id).cloned() else {
            return Ok(());
        };

        let worker_id = self.policy.assign_task(&task);
        if !worker_id.is_valid() {
            debug!(task = %task_id, "No capable worker with free capacity, parking");
            self.parked.push_back(task_id);
            return Ok(());
        }

        if let Some(identity) = self.worker_peers.get(&worker_id).cloned() {
            self.send_to(
                &identity,
                OpCode::DispatchTask,
                task_id,
                serde_json::to_vec(&task)?,
            )?;
        }
        Ok(())
    }

    /// Retry parked tasks in FIFO order until one fails to place.
    fn drain_parked(&mut self) -> Result<()> {
        while let Some(task_id) = self.parked.pop_front() {
            let Some(task) = self.tasks.get(&task_id).cloned() else {
                continue;
            };

            let worker_id = self.policy.assign_task(&task);
            if !worker_id.is_valid() {
                self.parked.push_front(task_id);
                break;
            }

            if let Some(identity) = self.worker_peers.get(&worker_id).cloned() {
                self.send_to(
                    &identity,
                    OpCode::DispatchTask,
                    task_id,
                    serde_json::to_vec(&task)?,
                )?;
            }
        }
        Ok(())
    }

    /// Run the rebalancer and apply its advice: evict each advised task from
    /// its worker and push it back through assignment. The whole pass runs
    /// on this thread, so no dispatch can interleave with the eviction.
    fn run_balance_pass(&mut self) -> Result<()> {
        let advice = self.policy.balance();
        if advice.is_empty() {
            return Ok(());
        }

        let moved: usize = advice.values().map(Vec::len).sum();
        info!("Balance pass: moving {} tasks", moved);

        for (from_worker, task_ids) in advice {
            for task_id in task_ids {
                let previous = self.policy.remove_task(task_id);
                if previous != from_worker {
                    // The advice is stale only if someone mutated state
                    // between balance() and here; that cannot happen on a
                    // single thread.
                    warn!(task = %task_id, "Balance advice does not match assignment, skipping");
                    continue;
                }
                self.send_eviction(from_worker, task_id)?;
                self.dispatch_or_park(task_id)?;
            }
        }
        Ok(())
    }

    fn send_eviction(&self, worker_id: WorkerId, task_id: TaskId) -> Result<()> {
        if let Some(identity) = self.worker_peers.get(&worker_id) {
            let payload = EvictTaskPayload {
                task_id,
                from_worker_id: worker_id,
            };
            self.send_to(
                identity,
                OpCode::EvictTask,
                task_id,
                serde_json::to_vec(&payload)?,
            )?;
        }
        Ok(())
    }

    fn send_to(
        &self,
        identity: &[u8],
        opcode: OpCode,
        task_id: TaskId,
        payload: Vec<u8>,
    ) -> Result<()> {
        let msg = Message::new(opcode, task_id, payload)?;
        let (header, payload) = msg.pack()?;
        self.socket
            .send_multipart([identity.to_vec(), header, payload], 0)
            .context("Failed to send message")?;
        Ok(())
    }
}
