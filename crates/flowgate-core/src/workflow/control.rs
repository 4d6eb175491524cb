//! Per-run control channel.
//!
//! Producers hold a cloneable [`ControlSender`] and never block. The owning
//! run loop holds the single [`ControlInbox`] and drains it without waiting at
//! the top of every iteration, collapsing commands into a [`ControlStatus`].

use std::collections::HashSet;

use tokio::sync::mpsc;

use flowgate_types::control::ControlCommand;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("run is no longer accepting control commands")]
    Closed,
}

/// Live control flags of one run. Only the run loop reads or writes them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlStatus {
    pub paused: bool,
    pub cancelled: bool,
    pub skip: HashSet<String>,
    pub jump_to: Option<String>,
}

impl ControlStatus {
    /// Fold one command into the flags.
    pub fn apply(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Pause => self.paused = true,
            ControlCommand::Resume => self.paused = false,
            ControlCommand::Cancel => self.cancelled = true,
            ControlCommand::Skip { step_id } => {
                self.skip.insert(step_id);
            }
            ControlCommand::Jump { step_id } => self.jump_to = Some(step_id),
        }
    }
}

/// Enqueue side of a run's control channel.
#[derive(Debug, Clone)]
pub struct ControlSender {
    tx: mpsc::UnboundedSender<ControlCommand>,
}

impl ControlSender {
    pub fn send(&self, command: ControlCommand) -> Result<(), ControlError> {
        self.tx.send(command).map_err(|_| ControlError::Closed)
    }
}

/// Drain side of a run's control channel, owned by the run loop.
#[derive(Debug)]
pub struct ControlInbox {
    rx: mpsc::UnboundedReceiver<ControlCommand>,
    status: ControlStatus,
}

impl ControlInbox {
    /// Apply every queued command without waiting.
    pub fn fetch_and_apply(&mut self) -> &mut ControlStatus {
        while let Ok(command) = self.rx.try_recv() {
            tracing::debug!(?command, "control command applied");
            self.status.apply(command);
        }
        &mut self.status
    }

    pub fn status(&self) -> &ControlStatus {
        &self.status
    }
}

/// Create a connected sender/inbox pair.
pub fn control_channel() -> (ControlSender, ControlInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ControlSender { tx },
        ControlInbox {
            rx,
            status: ControlStatus::default(),
        },
    )
}
