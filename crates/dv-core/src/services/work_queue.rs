//! In-memory queue of in-flight records and the monitor task that drives
//! them.
//!
//! A single task owns every queued [`BuildStatus`]. Publish and delete
//! requests reach it as commands; delayed ticks are commands it sends to
//! itself. Ticks run one at a time, so a record only ever has one writer.
//! Readers see snapshots published after each change.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, RwLock};

use crate::error::{PublishError, Result};
use crate::models::{BuildStatus, Status};

use super::context::Context;
use super::monitor::{self, Entry, Next};

const UPDATE_CAPACITY: usize = 256;

/// A change to a queued record.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: BuildStatus,
    /// The record left the queue with this update.
    pub settled: bool,
}

enum Command {
    Publish {
        status: BuildStatus,
        reply: oneshot::Sender<BuildStatus>,
    },
    Delete {
        status: BuildStatus,
        reply: oneshot::Sender<BuildStatus>,
    },
    Tick {
        service_id: String,
        generation: u64,
    },
}

type Snapshots = Arc<RwLock<HashMap<String, BuildStatus>>>;

/// Handle to the monitor task. Dropping it stops the monitor once the tick
/// in progress returns.
pub struct WorkQueue {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: Snapshots,
    updates: broadcast::Sender<StatusUpdate>,
}

impl WorkQueue {
    pub fn start(ctx: Arc<Context>) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let snapshots: Snapshots = Arc::default();
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        let monitor = Monitor {
            ctx,
            receiver,
            scheduler: commands.downgrade(),
            entries: HashMap::new(),
            snapshots: snapshots.clone(),
            updates: updates.clone(),
            generation: 0,
        };
        tokio::spawn(monitor.run());
        Self {
            commands,
            snapshots,
            updates,
        }
    }

    /// Queue a submitted record, unless one that must not be replaced is
    /// already queued. Returns the record that is queued afterwards.
    pub async fn publish(&self, status: BuildStatus) -> Result<BuildStatus> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Publish { status, reply })?;
        response.await.map_err(|_| PublishError::QueueClosed)
    }

    /// Start the teardown for `status`, or return why it cannot start yet.
    pub async fn delete(&self, status: BuildStatus) -> Result<BuildStatus> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Delete { status, reply })?;
        response.await.map_err(|_| PublishError::QueueClosed)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| PublishError::QueueClosed)
    }

    pub async fn get(&self, service_id: &str) -> Option<BuildStatus> {
        self.snapshots.read().await.get(service_id).cloned()
    }

    pub async fn in_flight(&self) -> Vec<BuildStatus> {
        let mut records: Vec<_> = self.snapshots.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.service_id().cmp(b.service_id()));
        records
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.updates.subscribe()
    }
}

struct Monitor {
    ctx: Arc<Context>,
    receiver: mpsc::UnboundedReceiver<Command>,
    scheduler: mpsc::WeakUnboundedSender<Command>,
    entries: HashMap<String, Entry>,
    snapshots: Snapshots,
    updates: broadcast::Sender<StatusUpdate>,
    generation: u64,
}

impl Monitor {
    async fn run(mut self) {
        while let Some(command) = self.receiver.recv().await {
            match command {
                Command::Publish { status, reply } => {
                    let queued = self.publish(status).await;
                    reply.send(queued).ok();
                }
                Command::Delete { status, reply } => {
                    let queued = self.delete(status).await;
                    reply.send(queued).ok();
                }
                Command::Tick {
                    service_id,
                    generation,
                } => self.tick(service_id, generation).await,
            }
        }
        tracing::debug!(pending = self.entries.len(), "work queue stopped");
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    async fn publish(&mut self, status: BuildStatus) -> BuildStatus {
        let id = status.service_id().to_string();
        if let Some(existing) = self.entries.get(&id) {
            if !existing.status.status.accepts_publish() {
                return existing.status.clone();
            }
        }
        let generation = self.next_generation();
        let queued = status.clone();
        self.store(Entry::new(status, generation)).await;
        self.schedule(id, generation, Duration::ZERO);
        queued
    }

    async fn delete(&mut self, status: BuildStatus) -> BuildStatus {
        let id = status.service_id().to_string();
        let generation = self.next_generation();
        let mut entry = match self.entries.remove(&id) {
            Some(existing) if existing.status.status.ignores_delete() => {
                let current = existing.status.clone();
                self.entries.insert(id, existing);
                return current;
            }
            Some(existing) if existing.has_pending_work() => {
                let mut rejected = existing.status.clone();
                rejected.status_message = format!(
                    "The virtualization \"{}\" is still being configured, retry the delete once its build has started",
                    rejected.name
                );
                self.entries.insert(id, existing);
                return rejected;
            }
            Some(existing) => existing,
            None => Entry::new(status, generation),
        };
        entry.generation = generation;
        entry.start_teardown(&self.ctx);
        let queued = entry.status.clone();
        self.store(entry).await;
        self.schedule(id, generation, self.ctx.config.monitor_delay());
        queued
    }

    async fn tick(&mut self, service_id: String, generation: u64) {
        if self.entries.get(&service_id).map(|e| e.generation) != Some(generation) {
            return;
        }
        let Some(mut entry) = self.entries.remove(&service_id) else {
            return;
        };

        let ctx = self.ctx.clone();
        let outcome = tokio::spawn(async move {
            let next = monitor::tick(&ctx, &mut entry).await;
            (entry, next)
        })
        .await;

        match outcome {
            Ok((entry, Ok(Next::After(delay)))) => {
                self.store(entry).await;
                self.schedule(service_id, generation, delay);
            }
            Ok((entry, Ok(Next::Stop))) => self.retire(entry).await,
            Ok((entry, Err(e))) => {
                tracing::error!(error = %e, "monitor tick failed");
                self.retire(entry).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "monitor tick aborted");
                self.ctx.log.close(&service_id).await;
                // The entry went down with the task; settle its last snapshot.
                let last = self.snapshots.write().await.remove(&service_id);
                if let Some(mut status) = last {
                    status.transition(Status::Failed, format!("Monitoring stopped: {e}"));
                    self.updates
                        .send(StatusUpdate {
                            status,
                            settled: true,
                        })
                        .ok();
                }
            }
        }
    }

    /// Keep `entry` queued and publish its state.
    async fn store(&mut self, entry: Entry) {
        let status = entry.status.clone();
        let id = status.service_id().to_string();
        self.snapshots
            .write()
            .await
            .insert(id.clone(), status.clone());
        self.entries.insert(id, entry);
        self.updates
            .send(StatusUpdate {
                status,
                settled: false,
            })
            .ok();
    }

    /// Drop `entry` from the queue for good.
    async fn retire(&mut self, entry: Entry) {
        let id = entry.status.service_id().to_string();
        self.ctx.log.close(&id).await;
        self.snapshots.write().await.remove(&id);
        self.updates
            .send(StatusUpdate {
                status: entry.status,
                settled: true,
            })
            .ok();
    }

    fn schedule(&self, service_id: String, generation: u64, delay: Duration) {
        let scheduler = self.scheduler.clone();
        let command = Command::Tick {
            service_id,
            generation,
        };
        if delay.is_zero() {
            if let Some(sender) = scheduler.upgrade() {
                sender.send(command).ok();
            }
            return;
        }
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(sender) = scheduler.upgrade() {
                sender.send(command).ok();
            }
        });
    }
}
