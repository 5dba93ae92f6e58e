//! channel.rs
//! The two bounded cross-core queues.
//!
//! - **Commands** (supervisory → control): `crossbeam` bounded channel, `try_send` only.
//!   A full queue is reported to the caller as the retryable `ChannelFull`.
//! - **Status** (control → supervisory): `ArrayQueue` ring. A push onto a full ring
//!   evicts the oldest snapshot; the producer never waits.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crossbeam::channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use crossbeam_queue::ArrayQueue;
use log::{debug, warn};

use crate::config::LinkConfig;
use crate::error::{KilnError, Result};
use crate::link::messages::{Command, StatusSnapshot};

#[derive(Debug, Default)]
struct StatusCounters {
    published: AtomicU64,
    dropped: AtomicU64,
}

/// Control-core end. Moved into the control thread.
pub struct ControlLink {
    commands: Receiver<Command>,
    status: Arc<ArrayQueue<StatusSnapshot>>,
    counters: Arc<StatusCounters>,
}

/// Supervisory write end for commands.
#[derive(Clone)]
pub struct CommandSender {
    commands: Sender<Command>,
}

/// Supervisory read end for status snapshots.
pub struct StatusReceiver {
    status: Arc<ArrayQueue<StatusSnapshot>>,
    counters: Arc<StatusCounters>,
}

pub struct SupervisorLink {
    pub commands: CommandSender,
    pub status: StatusReceiver,
}

pub fn link(config: &LinkConfig) -> (ControlLink, SupervisorLink) {
    let (tx, rx) = bounded(config.command_capacity);
    let status = Arc::new(ArrayQueue::new(config.status_capacity));
    let counters = Arc::new(StatusCounters::default());

    let control = ControlLink {
        commands: rx,
        status: status.clone(),
        counters: counters.clone(),
    };
    let supervisor = SupervisorLink {
        commands: CommandSender { commands: tx },
        status: StatusReceiver { status, counters },
    };
    (control, supervisor)
}

impl ControlLink {
    /// Next pending command without waiting. `ChannelClosed` once every sender is gone.
    pub fn try_recv_command(&self) -> Result<Option<Command>> {
        match self.commands.try_recv() {
            Ok(cmd) => Ok(Some(cmd)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(KilnError::ChannelClosed),
        }
    }

    /// Publish a snapshot, evicting the oldest on a full ring. Returns true if one was evicted.
    #[inline]
    pub fn publish(&self, snapshot: StatusSnapshot) -> bool {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        if self.status.force_push(snapshot).is_some() {
            let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped % 100 == 1 {
                debug!("[Link] status ring full, {} snapshots dropped so far", dropped);
            }
            return true;
        }
        false
    }

    pub fn dropped_status(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn published_status(&self) -> u64 {
        self.counters.published.load(Ordering::Relaxed)
    }
}

impl CommandSender {
    pub fn send(&self, command: Command) -> Result<()> {
        match self.commands.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(cmd)) => {
                warn!("[Link] command queue full, '{}' not sent", cmd.name());
                Err(KilnError::ChannelFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(KilnError::ChannelClosed),
        }
    }

    pub fn pending(&self) -> usize {
        self.commands.len()
    }
}

impl StatusReceiver {
    pub fn try_recv(&self) -> Option<StatusSnapshot> {
        self.status.pop()
    }

    /// Everything currently buffered, oldest first.
    pub fn drain(&self) -> Vec<StatusSnapshot> {
        std::iter::from_fn(|| self.status.pop()).collect()
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// False once the control core has released its end.
    pub fn is_control_alive(&self) -> bool {
        Arc::strong_count(&self.status) > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trip() {
        let (control, supervisor) = link(&LinkConfig::default());
        supervisor.commands.send(Command::Stop).unwrap();
        assert_eq!(control.try_recv_command().unwrap(), Some(Command::Stop));
        assert_eq!(control.try_recv_command().unwrap(), None);
    }

    #[test]
    fn closed_channels_are_reported() {
        let (control, supervisor) = link(&LinkConfig::default());
        let SupervisorLink { commands, status } = supervisor;
        drop(commands);
        assert!(matches!(control.try_recv_command(), Err(KilnError::ChannelClosed)));

        assert!(status.is_control_alive());
        drop(control);
        assert!(!status.is_control_alive());
    }
}
