//! Pending commands and their lifecycle
//!
//! A command that has been written to the link becomes a [`PendingItem`] and waits at most its
//! deadline for a matching reply.  The scan in [`check_pending`][`super::XpressNet::check_pending`]
//! resends expired items while attempts remain; conflict rules are re-evaluated on every resend.
//!
//! Callbacks are `FnOnce` values owned by the pending item and moved out at firing time, which
//! makes "fires at most once" a property of the types rather than of the bookkeeping.

use crate::commands::{Command, Direction, FuncA, FuncB, FuncC, FuncD, ReadCvStatus};
use crate::link::Link;
use crate::time::{Duration, Instant};
use crate::LogLevel;

use super::{LocoInfo, XnEvents, XpressNet};

/// Stage of the opening handshake a pending command belongs to.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum OpeningStage {
    LiVersion,
    LiAddress,
    CsVersion,
    CsStatus,
}

/// Data borne by the locomotive-information reply, before functions 13-28 are known.
pub(crate) struct PartialLocoInfo {
    pub addr: crate::addr::LocoAddr,
    pub used: bool,
    pub direction: Direction,
    pub speed: u8,
    pub fa: FuncA,
    pub fb: FuncB,
}

/// What to do when the matching reply arrives.
pub(crate) enum OkAction {
    None,
    /// Plain acknowledgement.
    Ack(Box<dyn FnOnce()>),
    /// LI version reply `(hw, sw)`.
    LiVersion(Box<dyn FnOnce(u8, u8)>),
    /// LI address reply.
    LiAddress(Box<dyn FnOnce(u8)>),
    /// Command station version reply `(major, minor, id)`.
    CsVersion(Box<dyn FnOnce(u8, u8, u8)>),
    /// Service-mode CV result `(status, cv, value)`.
    CvRead(Box<dyn FnOnce(ReadCvStatus, u8, u8)>),
    /// Locomotive information reply.
    LocoInfo(Box<dyn FnOnce(bool, Direction, u8, FuncA, FuncB)>),
    /// Functions 13-28 reply.
    LocoFunc1328(Box<dyn FnOnce(FuncC, FuncD)>),
    /// First half of `acquire_loco`: request functions 13-28 next.
    AcquireInfo {
        got: Box<dyn FnOnce(LocoInfo)>,
    },
    /// Second half of `acquire_loco`: assemble and deliver the [`LocoInfo`].
    AcquireFuncs {
        partial: PartialLocoInfo,
        got: Box<dyn FnOnce(LocoInfo)>,
    },
    /// Engine-internal: continue the opening handshake.
    Opening(OpeningStage),
}

/// What to do when the command fails.
pub(crate) enum ErrAction {
    User(Box<dyn FnOnce()>),
    /// Engine-internal: handshake stage failed.
    Opening(OpeningStage),
}

/// A command together with its callbacks and retry bookkeeping.
///
/// Lives in `outgoing` until admission rules allow the send, then in `pending` until a matching
/// reply arrives, the retry budget runs out, or the link closes.
pub(crate) struct PendingItem {
    pub cmd: Command,
    pub ok: OkAction,
    pub err: ErrAction,
    /// Valid once the item has been written to the link.
    pub deadline: Instant,
    /// Send attempts so far, including the initial one.
    pub attempts: u8,
}

impl PendingItem {
    pub fn new(cmd: Command, ok: OkAction, err: ErrAction) -> Self {
        Self {
            cmd,
            ok,
            err,
            deadline: Instant::ZERO,
            attempts: 1,
        }
    }
}

impl XpressNet {
    pub(crate) fn timeout_for(&self, cmd: &Command) -> Duration {
        if cmd.is_programming() {
            self.config.pending_prog_timeout
        } else {
            self.config.pending_timeout
        }
    }

    pub(crate) fn conflicts_with_pending(&self, cmd: &Command) -> bool {
        self.pending.iter().any(|item| item.cmd.conflicts(cmd))
    }

    pub(crate) fn conflicts_with_outgoing(&self, cmd: &Command) -> bool {
        self.outgoing.iter().any(|item| item.cmd.conflicts(cmd))
    }

    /// Pop the head of `pending` when the predicate matches its command.
    pub(crate) fn pop_head_if(
        &mut self,
        pred: impl FnOnce(&Command) -> bool,
    ) -> Option<PendingItem> {
        let head_matches = self.pending.front().is_some_and(|item| pred(&item.cmd));
        if head_matches {
            self.pending.pop_front()
        } else {
            None
        }
    }

    /// Fire the acknowledgement of a popped item.  Typed reply actions that do not fit a plain
    /// acknowledgement are dropped silently; their commands never take this path.
    pub(crate) fn finish_ok(&mut self, item: PendingItem) {
        match item.ok {
            OkAction::Ack(cb) => cb(),
            OkAction::Opening(stage) => self.opening_ok(stage),
            _ => (),
        }
    }

    /// Fail a popped item: log and fire its `err`.
    pub(crate) fn finish_err<L: Link, E: XnEvents>(
        &mut self,
        item: PendingItem,
        now: Instant,
        link: &mut L,
        events: &mut E,
        log_it: bool,
    ) {
        if log_it {
            self.log(
                events,
                LogLevel::Error,
                &format!("Not responded to command: {}", item.cmd.describe()),
            );
        }
        match item.err {
            ErrAction::User(cb) => cb(),
            ErrAction::Opening(stage) => self.opening_err(stage, now, link, events),
        }
    }

    /// Fail every queued command.  Runs as part of closing the link.
    pub(crate) fn drain_queues<L: Link, E: XnEvents>(
        &mut self,
        now: Instant,
        link: &mut L,
        events: &mut E,
    ) {
        loop {
            let item = match self.pending.pop_front() {
                Some(item) => item,
                None => match self.outgoing.pop_front() {
                    Some(item) => item,
                    None => break,
                },
            };
            self.finish_err(item, now, link, events, true);
        }
    }

    /// Deadline scan over the head of `pending`.
    ///
    /// An expired head is either failed (attempts exhausted, or a conflicting command is waiting
    /// in `outgoing`) or re-admitted through the normal send path with its attempt counter
    /// incremented.
    pub(crate) fn check_pending<L: Link, E: XnEvents>(
        &mut self,
        now: Instant,
        link: &mut L,
        events: &mut E,
    ) {
        let expired = match self.pending.front() {
            Some(head) => now >= head.deadline,
            None => return,
        };
        if !expired {
            return;
        }

        let mut item = self.pending.pop_front().unwrap();
        if item.attempts >= self.config.max_attempts {
            self.finish_err(item, now, link, events, true);
        } else if self.conflicts_with_outgoing(&item.cmd) {
            self.log(
                events,
                LogLevel::Warning,
                &format!("Not sending again, conflict: {}", item.cmd.describe()),
            );
            self.finish_err(item, now, link, events, false);
        } else {
            self.log(
                events,
                LogLevel::Warning,
                &format!("Sending again: {}", item.cmd.describe()),
            );
            item.attempts += 1;
            self.outgoing.push_back(item);
        }
    }

    /// Fail all commands currently awaiting a reply.  Commands still queued in `outgoing` are
    /// kept.
    pub(crate) fn drain_pending<L: Link, E: XnEvents>(
        &mut self,
        now: Instant,
        link: &mut L,
        events: &mut E,
    ) {
        while let Some(item) = self.pending.pop_front() {
            self.finish_err(item, now, link, events, true);
        }
    }
}
