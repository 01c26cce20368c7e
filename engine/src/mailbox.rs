//! # mailbox
//!
//! IPC mailbox (§6 "IPC mailbox", C3). The engine polls its inbound side
//! once per tick, outside any time-critical inner section (§5).
//!
//! A real deployment exchanges these messages with a separate authoring
//! process over shared memory with named mutexes; this workspace has no
//! second process to share memory with, so the transport here is a
//! bounded in-process channel pair (`std::sync::mpsc::sync_channel`) —
//! the same "bounded, never blocks the producer past its configured
//! depth" shape as `engine::recording::writer`'s queue, generalized from
//! the teacher's `uwb_hub.rs` "bounded packet intake that never panics on
//! backpressure" discipline. See DESIGN.md's Open Question resolution for
//! why this substitution is safe: the command vocabulary
//! (`proto::mailbox`) is unchanged, only the transport is swapped.

use std::sync::mpsc::{Receiver, Sender, SyncSender, TryRecvError};

use proto::mailbox::{Ack, Command, Telemetry};

pub struct MailboxEngineSide {
    commands_in: Receiver<Command>,
    acks_out: SyncSender<Ack>,
    telemetry_out: SyncSender<Telemetry>,
}

pub struct MailboxPeerSide {
    pub commands_out: SyncSender<Command>,
    pub acks_in: Receiver<Ack>,
    pub telemetry_in: Receiver<Telemetry>,
}

/// Creates a connected mailbox pair. `depth` bounds each of the three
/// channels independently.
pub fn channel(depth: usize) -> (MailboxEngineSide, MailboxPeerSide) {
    let (cmd_tx, cmd_rx) = std::sync::mpsc::sync_channel(depth.max(1));
    let (ack_tx, ack_rx) = std::sync::mpsc::sync_channel(depth.max(1));
    let (tel_tx, tel_rx) = std::sync::mpsc::sync_channel(depth.max(1));
    (
        MailboxEngineSide { commands_in: cmd_rx, acks_out: ack_tx, telemetry_out: tel_tx },
        MailboxPeerSide { commands_out: cmd_tx, acks_in: ack_rx, telemetry_in: tel_rx },
    )
}

impl MailboxEngineSide {
    /// Poll for at most one pending command. Never blocks: an empty
    /// mailbox is the common case on most ticks.
    pub fn poll_command(&self) -> Option<Command> {
        match self.commands_in.try_recv() {
            Ok(cmd) => Some(cmd),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Best-effort ack send: a full or disconnected channel is logged by
    /// the caller, never treated as fatal to the running session.
    pub fn send_ack(&self, ack: Ack) -> Result<(), Ack> {
        self.acks_out.try_send(ack).map_err(|e| match e {
            std::sync::mpsc::TrySendError::Full(a) => a,
            std::sync::mpsc::TrySendError::Disconnected(a) => a,
        })
    }

    pub fn send_telemetry(&self, telem: Telemetry) -> Result<(), Telemetry> {
        self.telemetry_out.try_send(telem).map_err(|e| match e {
            std::sync::mpsc::TrySendError::Full(t) => t,
            std::sync::mpsc::TrySendError::Disconnected(t) => t,
        })
    }
}

impl MailboxPeerSide {
    pub fn send_command(&self, cmd: Command) -> Result<(), Command> {
        self.commands_out.try_send(cmd).map_err(|e| match e {
            std::sync::mpsc::TrySendError::Full(c) => c,
            std::sync::mpsc::TrySendError::Disconnected(c) => c,
        })
    }

    pub fn try_recv_ack(&self) -> Option<Ack> {
        self.acks_in.try_recv().ok()
    }

    pub fn try_recv_telemetry(&self) -> Option<Telemetry> {
        self.telemetry_in.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips_through_channel() {
        let (engine_side, peer_side) = channel(4);
        peer_side.send_command(Command::TrialAbort).unwrap();
        match engine_side.poll_command() {
            Some(Command::TrialAbort) => {}
            other => panic!("expected TrialAbort, got {other:?}"),
        }
    }

    #[test]
    fn empty_mailbox_polls_to_none() {
        let (engine_side, _peer_side) = channel(4);
        assert!(engine_side.poll_command().is_none());
    }
}
