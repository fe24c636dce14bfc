//! Serialized write queue
//!
//! Every write that the device acknowledges goes through a [`CommandQueue`].
//! A single worker task takes jobs in submission order and keeps at most one
//! in flight: it writes the command, then waits for the matching `ACK`, a
//! transport error, or the acknowledgment timeout before taking the next job.
//! A failed job is logged and the queue moves on.
//!
//! Submitting returns a [`CommandTicket`] that resolves with the job's
//! [`CommandResult`] once the worker is done with it.

use crate::client::correlator::{self, PendingEvent};
use crate::client::message::WmpCommand;
use crate::client::WmpTransport;
use crate::error::{Result, WmpError};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A write waiting for its turn
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    /// Unique command identifier
    pub id: Uuid,

    /// Fully encoded command
    pub command: WmpCommand,

    /// When the command was submitted
    pub issued_at: DateTime<Utc>,

    /// Acknowledgment budget for this command
    pub timeout: Duration,
}

impl PendingCommand {
    pub fn new(command: WmpCommand, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            command,
            issued_at: Utc::now(),
            timeout,
        }
    }
}

/// Command execution result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResult {
    /// Command that was executed
    pub command_id: Uuid,

    /// Wire form of the command
    pub command: String,

    /// Whether the device acknowledged the write
    pub success: bool,

    /// Error message if execution failed
    pub error: Option<String>,

    /// Submission timestamp
    pub issued_at: DateTime<Utc>,

    /// Time from dequeue to outcome
    pub duration: Duration,
}

impl CommandResult {
    fn failed(pending: &PendingCommand, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            command_id: pending.id,
            command: pending.command.to_string(),
            success: false,
            error: Some(error.into()),
            issued_at: pending.issued_at,
            duration,
        }
    }

    /// Convert into a `Result`, mapping failures to [`WmpError::Protocol`]
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(WmpError::protocol(format!(
                "{} failed: {}",
                self.command,
                self.error.as_deref().unwrap_or("unknown error")
            )))
        }
    }
}

/// Statistics for the command queue
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommandQueueStats {
    /// Total commands submitted
    pub total_queued: u64,

    /// Commands submitted but not yet finished
    pub current_queue_size: usize,

    /// Acknowledged commands
    pub successful_executions: u64,

    /// Commands that failed for any reason
    pub failed_executions: u64,

    /// Failures caused by a missing acknowledgment
    pub timed_out: u64,

    /// Average execution time
    pub avg_execution_time: Duration,
}

/// Handle on a submitted command
#[derive(Debug)]
pub struct CommandTicket {
    pending: PendingCommand,
    rx: oneshot::Receiver<CommandResult>,
}

impl CommandTicket {
    /// Identifier of the submitted command
    pub fn id(&self) -> Uuid {
        self.pending.id
    }

    /// Wait for the worker to finish with the command.
    ///
    /// If the queue stops before the job runs, the result reports failure.
    pub async fn outcome(self) -> CommandResult {
        let CommandTicket { pending, rx } = self;
        match rx.await {
            Ok(result) => result,
            Err(_) => CommandResult::failed(&pending, "command queue stopped", Duration::ZERO),
        }
    }
}

struct Job {
    pending: PendingCommand,
    reply: oneshot::Sender<CommandResult>,
}

/// FIFO queue with a single worker
pub struct CommandQueue {
    sender: mpsc::UnboundedSender<Job>,
    ack_timeout: Duration,
    stats: Arc<RwLock<CommandQueueStats>>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CommandQueue {
    /// Create the queue and start its worker
    pub fn new(transport: Arc<dyn WmpTransport>, ack_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stats = Arc::new(RwLock::new(CommandQueueStats::default()));
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(run_worker(
            transport,
            receiver,
            Arc::clone(&stats),
            cancel.clone(),
        ));

        Self {
            sender,
            ack_timeout,
            stats,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Append a command to the queue; it gets the queue's acknowledgment budget
    pub fn enqueue(&self, command: WmpCommand) -> CommandTicket {
        let pending = PendingCommand::new(command, self.ack_timeout);
        let (reply, rx) = oneshot::channel();

        {
            let mut stats = self.stats.write();
            stats.total_queued += 1;
            stats.current_queue_size += 1;
        }

        debug!("Command {} queued: {}", pending.id, pending.command);
        let job = Job {
            pending: pending.clone(),
            reply,
        };
        if self.sender.send(job).is_err() {
            // Worker is gone; the dropped reply resolves the ticket as failed
            warn!("Command queue is stopped, dropping {}", pending.command);
            let mut stats = self.stats.write();
            stats.current_queue_size = stats.current_queue_size.saturating_sub(1);
            stats.failed_executions += 1;
        }

        CommandTicket { pending, rx }
    }

    /// Append a command and wait for its outcome
    pub async fn submit(&self, command: WmpCommand) -> CommandResult {
        self.enqueue(command).outcome().await
    }

    /// Snapshot of queue statistics
    pub fn get_statistics(&self) -> CommandQueueStats {
        self.stats.read().clone()
    }

    /// Stop the worker; queued jobs resolve as failed
    pub async fn stop(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
        info!("Command queue stopped");
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_worker(
    transport: Arc<dyn WmpTransport>,
    mut receiver: mpsc::UnboundedReceiver<Job>,
    stats: Arc<RwLock<CommandQueueStats>>,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = receiver.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let (result, timed_out) = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = execute(transport.as_ref(), &job.pending) => outcome,
        };

        {
            let mut stats = stats.write();
            stats.current_queue_size = stats.current_queue_size.saturating_sub(1);
            if result.success {
                stats.successful_executions += 1;
            } else {
                stats.failed_executions += 1;
            }
            let finished = stats.successful_executions + stats.failed_executions;
            // Running average over all finished jobs
            let total = stats.avg_execution_time.as_nanos() * u128::from(finished - 1)
                + result.duration.as_nanos();
            stats.avg_execution_time =
                Duration::from_nanos((total / u128::from(finished)).min(u64::MAX as u128) as u64);
            if timed_out {
                stats.timed_out += 1;
            }
        }

        // The submitter may have stopped waiting
        let _ = job.reply.send(result);
    }

    debug!("Command queue worker exited");
}

async fn execute(transport: &dyn WmpTransport, pending: &PendingCommand) -> (CommandResult, bool) {
    let started = Instant::now();
    let expects_ack = pending.command.expects_ack();

    // Subscribe before writing so a fast ACK is not missed
    let ack = PendingEvent::arm(transport, "ACK", pending.timeout, correlator::ack);

    let outcome = match transport.send(pending.command.clone()).await {
        Ok(()) if expects_ack => ack.wait().await,
        Ok(()) => Ok(()),
        Err(e) => Err(e),
    };
    let duration = started.elapsed();

    match outcome {
        Ok(()) => {
            debug!("{} acknowledged after {:?}", pending.command, duration);
            let result = CommandResult {
                command_id: pending.id,
                command: pending.command.to_string(),
                success: true,
                error: None,
                issued_at: pending.issued_at,
                duration,
            };
            (result, false)
        }
        Err(e) => {
            warn!("Command {} failed: {}", pending.command, e);
            (
                CommandResult::failed(pending, e.to_string(), duration),
                e.is_timeout(),
            )
        }
    }
}
