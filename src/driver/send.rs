//! Sending commands to the link
//!
//! The facade only ever appends to the `outgoing` queue; every actual write happens in
//! [`pump_outgoing`][`super::XpressNet::pump_outgoing`] during a poll.  The head of `outgoing` is
//! admitted to the wire when there is room among the unacknowledged commands, nothing pending
//! conflicts with it, and the minimum send interval has passed.  Admission is strictly in queue
//! order, so a blocked head also blocks everything behind it.

use crate::commands::Command;
use crate::frame;
use crate::link::Link;
use crate::time::Instant;
use crate::LogLevel;

use super::{ErrAction, OkAction, PendingItem, XnEvents, XpressNet};

impl XpressNet {
    /// Queue a command for transmission.
    ///
    /// When the driver is not connected the command fails right away: its `err` fires and nothing
    /// touches the wire.
    pub(crate) fn enqueue(&mut self, cmd: Command, ok: OkAction, err: ErrAction) {
        let item = PendingItem::new(cmd, ok, err);
        if !self.connected {
            if let ErrAction::User(cb) = item.err {
                cb();
            }
            return;
        }
        self.outgoing.push_back(item);
    }

    /// Send queued commands while admission and pacing rules allow it.
    pub(crate) fn pump_outgoing<L: Link, E: XnEvents>(
        &mut self,
        now: Instant,
        link: &mut L,
        events: &mut E,
    ) {
        loop {
            {
                let head = match self.outgoing.front() {
                    Some(head) => head,
                    None => break,
                };
                if self.pending.len() >= self.config.max_pending {
                    break;
                }
                if self.conflicts_with_pending(&head.cmd) {
                    break;
                }
            }
            if let Some(last) = self.last_sent {
                if now < last + self.config.out_interval {
                    break;
                }
            }

            let item = self.outgoing.pop_front().unwrap();
            if !self.transmit(item, now, link, events) {
                break;
            }
        }
    }

    /// Frame and write one command.  Returns false when the link write failed and the connection
    /// was torn down.
    fn transmit<L: Link, E: XnEvents>(
        &mut self,
        mut item: PendingItem,
        now: Instant,
        link: &mut L,
        events: &mut E,
    ) -> bool {
        let data = frame::encode(&item.cmd.bytes(), self.li_type);

        self.log(
            events,
            LogLevel::Commands,
            &format!("PUT: {}", item.cmd.describe()),
        );
        self.log(
            events,
            LogLevel::RawData,
            &format!("PUT: {}", frame::hex_str(&data)),
        );

        if let Err(e) = link.write(&data) {
            self.log(
                events,
                LogLevel::Error,
                &format!("Fatal error when writing command: {}", item.cmd.describe()),
            );
            if let ErrAction::User(cb) = item.err {
                cb();
            }
            events.on_error(&e.to_string());
            self.close_now(now, link, events);
            return false;
        }

        self.last_sent = Some(now);

        // LI100/LI101 do not confirm accessory activation requests at all; acknowledge them at
        // send time instead of letting them time out.
        if let Command::AccOpRequest { state: true, .. } = &item.cmd {
            if !self.li_acknowledges_acc_op() {
                if let OkAction::Ack(cb) = item.ok {
                    cb();
                }
                return true;
            }
        }

        item.deadline = now + self.timeout_for(&item.cmd);
        self.pending.push_back(item);
        true
    }
}
