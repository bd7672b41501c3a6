//! Command dispatcher
//!
//! Configuration calls must not block the caller, yet the control connection
//! carries exactly one request/acknowledgement pair at a time. Submissions
//! are queued to a single worker thread that owns the connection and drains
//! the queue in FIFO order, so every acknowledgement belongs to the command
//! sent right before it.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::control::channel::ControlChannel;
use crate::error::CommandError;
use crate::events::{emit, EventSender, StatusEvent};
use crate::protocol::{AckStatus, CommandFrame, Opcode};

type Reply = Result<AckStatus, CommandError>;

enum Job {
    Command {
        id: u64,
        frame: CommandFrame,
        reply: Sender<Reply>,
    },
    Exit,
}

/// Handle to the outcome of one submitted command
///
/// Dropping the ticket makes the submission fire-and-forget.
#[derive(Debug)]
pub struct CommandTicket {
    id: u64,
    opcode: Opcode,
    reply: Receiver<Reply>,
}

impl CommandTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Block until the firmware acknowledged this command
    pub fn wait(&self, timeout: Duration) -> Result<AckStatus, CommandError> {
        match self.reply.recv_timeout(timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => Err(CommandError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(CommandError::DispatcherClosed),
        }
    }

    /// Outcome if it is already known
    pub fn try_result(&self) -> Option<Result<AckStatus, CommandError>> {
        self.reply.try_recv().ok()
    }
}

/// Single-worker command dispatcher
pub struct CommandDispatcher {
    queue: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    next_id: AtomicU64,
    healthy: Arc<AtomicBool>,
}

impl CommandDispatcher {
    /// Start the worker; it takes ownership of the control connection
    pub fn start(channel: ControlChannel, events: EventSender) -> std::io::Result<Self> {
        let (tx, rx) = unbounded::<Job>();
        let healthy = Arc::new(AtomicBool::new(true));
        let worker_healthy = healthy.clone();

        let worker = thread::Builder::new()
            .name("daq-control".to_string())
            .spawn(move || worker_loop(channel, rx, events, worker_healthy))?;

        Ok(Self {
            queue: Some(tx),
            worker: Some(worker),
            next_id: AtomicU64::new(1),
            healthy,
        })
    }

    /// Queue a command; returns immediately
    pub fn submit(&self, frame: CommandFrame) -> Result<CommandTicket, CommandError> {
        let queue = self.queue.as_ref().ok_or(CommandError::DispatcherClosed)?;
        let opcode = frame.opcode();
        // Waiting for an ack that never comes would break the channel.
        if !opcode.expects_ack() {
            return Err(CommandError::Unacknowledged(opcode.to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = bounded(1);

        queue
            .send(Job::Command {
                id,
                frame,
                reply: reply_tx,
            })
            .map_err(|_| CommandError::DispatcherClosed)?;
        tracing::debug!("Queued command #{} {}", id, opcode);

        Ok(CommandTicket {
            id,
            opcode,
            reply: reply_rx,
        })
    }

    /// False once the control connection timed out or failed
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst) && self.queue.is_some()
    }

    /// Send `EXIT` after every queued command and stop the worker
    pub fn shutdown(&mut self) {
        if let Some(queue) = self.queue.take() {
            let _ = queue.send(Job::Exit);
        }
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("Control worker panicked");
            }
        }
    }
}

impl Drop for CommandDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    mut channel: ControlChannel,
    jobs: Receiver<Job>,
    events: EventSender,
    healthy: Arc<AtomicBool>,
) {
    for job in jobs.iter() {
        match job {
            Job::Command { id, frame, reply } => {
                let opcode = frame.opcode();
                let outcome = execute(&mut channel, id, &frame, &events);
                if channel.is_broken() {
                    healthy.store(false, Ordering::SeqCst);
                }
                if reply.send(outcome).is_err() {
                    tracing::trace!("Result of command #{} {} was not awaited", id, opcode);
                }
            }
            Job::Exit => {
                if !channel.is_broken() {
                    if let Err(e) = channel.send(&CommandFrame::exit()) {
                        tracing::warn!("Failed to send EXIT: {}", e);
                    }
                }
                break;
            }
        }
    }
    channel.shutdown();
    tracing::debug!("Control worker stopped");
}

fn execute(
    channel: &mut ControlChannel,
    id: u64,
    frame: &CommandFrame,
    events: &EventSender,
) -> Reply {
    let opcode = frame.opcode();
    let ack = channel.round_trip(frame)?;
    let status = ack.status();

    if status.is_success() {
        tracing::info!("Reconfiguration successfully finished ({} #{})", opcode, id);
        emit(
            events,
            StatusEvent::ConfigApplied {
                command_id: id,
                opcode,
            },
        );
        Ok(status)
    } else {
        tracing::error!(
            "Failed to set the requested parameter ({} #{}), reply: {:?}",
            opcode,
            id,
            status.to_string()
        );
        Err(CommandError::Failed {
            opcode: opcode.to_string(),
            status: status.to_string(),
        })
    }
}
