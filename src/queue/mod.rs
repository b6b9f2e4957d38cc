//! Outbound command queue with acknowledgement flow control.
//!
//! The queue serialises writes to the device: at most one command that
//! expects an acknowledgement is outstanding at a time. While it is
//! outstanding nothing else is dequeued. The wait ends when any reply
//! arrives ([`CommandQueue::acknowledge`]) or the timeout fires.
//!
//! Acknowledgements are not correlated with the command they clear, and a
//! command whose acknowledgement times out is dropped without retry.

pub mod timer;

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

pub use timer::OneShotTimer;

/// Default acknowledgement timeout.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// An encoded command waiting to be written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    /// Bytes to write.
    pub payload: Bytes,
    /// True if the device answers this command.
    pub ack_expected: bool,
}

impl QueuedCommand {
    /// Creates a new queued command.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>, ack_expected: bool) -> Self {
        Self {
            payload: payload.into(),
            ack_expected,
        }
    }
}

/// Flow-control state of a [`CommandQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Free to dequeue.
    Idle,
    /// Waiting for an acknowledgement until `deadline`.
    AwaitingAck { deadline: Instant },
}

/// Receives acknowledgement timeouts.
pub trait QueueObserver: Send {
    /// Called once each time an acknowledgement wait times out.
    fn ack_timed_out(&mut self);
}

/// FIFO of outbound commands gated by acknowledgements.
pub struct CommandQueue {
    commands: VecDeque<QueuedCommand>,
    state: QueueState,
    timer: OneShotTimer,
    ack_timeout: Duration,
    observer: Option<Box<dyn QueueObserver>>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("len", &self.commands.len())
            .field("state", &self.state)
            .field("ack_timeout", &self.ack_timeout)
            .finish_non_exhaustive()
    }
}

impl CommandQueue {
    /// Creates an empty queue with the default timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ack_timeout(ACK_TIMEOUT)
    }

    /// Creates an empty queue with a custom acknowledgement timeout.
    #[must_use]
    pub fn with_ack_timeout(ack_timeout: Duration) -> Self {
        Self {
            commands: VecDeque::new(),
            state: QueueState::Idle,
            timer: OneShotTimer::new(),
            ack_timeout,
            observer: None,
        }
    }

    /// Registers the timeout observer, replacing any previous one.
    pub fn set_observer(&mut self, observer: impl QueueObserver + 'static) {
        self.observer = Some(Box::new(observer));
    }

    /// Appends a command to the tail.
    ///
    /// Empty payloads are ignored. Returns true if the command was queued.
    pub fn enqueue(&mut self, command: QueuedCommand) -> bool {
        if command.payload.is_empty() {
            tracing::debug!("ignoring empty command");
            return false;
        }
        self.commands.push_back(command);
        true
    }

    /// Returns true if a command can be dequeued now.
    #[must_use]
    pub fn item_available(&self) -> bool {
        self.state == QueueState::Idle && !self.commands.is_empty()
    }

    /// Pops the head if the queue is idle.
    ///
    /// A popped command that expects an acknowledgement moves the queue to
    /// [`QueueState::AwaitingAck`] and arms the timeout. Must be called
    /// from within a Tokio runtime.
    pub fn try_dequeue(&mut self) -> Option<QueuedCommand> {
        if self.state != QueueState::Idle {
            return None;
        }
        let command = self.commands.pop_front()?;

        if command.ack_expected {
            let deadline = self.timer.arm(self.ack_timeout);
            self.state = QueueState::AwaitingAck { deadline };
            tracing::trace!("awaiting acknowledgement, {} queued", self.commands.len());
        }

        Some(command)
    }

    /// Clears the outstanding acknowledgement wait, whichever command it
    /// belonged to.
    pub fn acknowledge(&mut self) {
        self.timer.cancel();
        if self.state != QueueState::Idle {
            tracing::trace!("acknowledged");
        }
        self.state = QueueState::Idle;
    }

    /// Completes when the acknowledgement timeout fires.
    ///
    /// The queue returns to idle and the observer is notified before this
    /// resolves. Never completes while idle. Cancel safe.
    pub async fn timed_out(&mut self) {
        self.timer.fired().await;
        self.handle_timeout();
    }

    fn handle_timeout(&mut self) {
        self.timer.cancel();
        self.state = QueueState::Idle;
        tracing::warn!(
            "acknowledgement timed out after {:?}, command dropped",
            self.ack_timeout
        );
        if let Some(observer) = self.observer.as_mut() {
            observer.ack_timed_out();
        }
    }

    /// Cancels the timer, drops every queued command and returns to idle.
    pub fn reset(&mut self) {
        self.timer.cancel();
        self.commands.clear();
        self.state = QueueState::Idle;
    }

    /// Current flow-control state.
    #[must_use]
    pub const fn state(&self) -> QueueState {
        self.state
    }

    /// Number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
