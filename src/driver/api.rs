//! Public command operations
//!
//! These methods validate their inputs, wrap the user callbacks into a pending item and queue the
//! command.  Nothing here touches the wire; the next [`poll()`][`XpressNet::poll`] takes care of
//! the actual send.  Exactly one of the `ok`/`err` callbacks fires per accepted call.

use std::cell::RefCell;
use std::rc::Rc;

use crate::addr::LocoAddr;
use crate::commands::{
    Command, Direction, FuncA, FuncB, FuncC, FuncD, FuncRange, ReadCvStatus,
};
use crate::{LogLevel, TrkStatus};

use super::{CommandError, ErrAction, LocoInfo, OkAction, XnEvents, XpressNet};

/// Collects the outcome of the bank writes a single `set_loco_func` call fans out into.
struct MultiAck {
    remaining: usize,
    failed: bool,
    ok: Option<Box<dyn FnOnce()>>,
    err: Option<Box<dyn FnOnce()>>,
}

impl XpressNet {
    /// Switch the track power on or off.  Only [`TrkStatus::On`] and [`TrkStatus::Off`] can be
    /// requested.
    pub fn set_trk_status(
        &mut self,
        status: TrkStatus,
        ok: impl FnOnce() + 'static,
        err: impl FnOnce() + 'static,
    ) -> Result<(), CommandError> {
        let cmd = match status {
            TrkStatus::Off => Command::TrackOff,
            TrkStatus::On => Command::TrackOn,
            other => return Err(CommandError::InvalidTrkStatus(other)),
        };
        self.enqueue(
            cmd,
            OkAction::Ack(Box::new(ok)),
            ErrAction::User(Box::new(err)),
        );
        Ok(())
    }

    /// Emergency-stop every locomotive.
    pub fn emergency_stop(&mut self, ok: impl FnOnce() + 'static, err: impl FnOnce() + 'static) {
        self.enqueue(
            Command::EmergencyStopAll,
            OkAction::Ack(Box::new(ok)),
            ErrAction::User(Box::new(err)),
        );
    }

    /// Emergency-stop a single locomotive.
    pub fn emergency_stop_loco(
        &mut self,
        addr: LocoAddr,
        ok: impl FnOnce() + 'static,
        err: impl FnOnce() + 'static,
    ) {
        self.enqueue(
            Command::EmergencyStopLoco { addr },
            OkAction::Ack(Box::new(ok)),
            ErrAction::User(Box::new(err)),
        );
    }

    /// Query the LI hardware and software version.
    pub fn get_li_version(
        &mut self,
        got: impl FnOnce(u8, u8) + 'static,
        err: impl FnOnce() + 'static,
    ) {
        self.enqueue(
            Command::GetLiVersion,
            OkAction::LiVersion(Box::new(got)),
            ErrAction::User(Box::new(err)),
        );
    }

    /// Query the LI XpressNET address.
    pub fn get_li_address(
        &mut self,
        got: impl FnOnce(u8) + 'static,
        err: impl FnOnce() + 'static,
    ) {
        self.enqueue(
            Command::GetLiAddress,
            OkAction::LiAddress(Box::new(got)),
            ErrAction::User(Box::new(err)),
        );
    }

    /// Change the LI XpressNET address.
    pub fn set_li_address(
        &mut self,
        addr: u8,
        ok: impl FnOnce() + 'static,
        err: impl FnOnce() + 'static,
    ) {
        self.enqueue(
            Command::SetLiAddress { addr },
            OkAction::Ack(Box::new(ok)),
            ErrAction::User(Box::new(err)),
        );
    }

    /// Query the command station version: `got(major, minor, id)`.
    pub fn get_cs_version(
        &mut self,
        got: impl FnOnce(u8, u8, u8) + 'static,
        err: impl FnOnce() + 'static,
    ) {
        self.enqueue(
            Command::GetCsVersion,
            OkAction::CsVersion(Box::new(got)),
            ErrAction::User(Box::new(err)),
        );
    }

    /// Query the command station status.  The result arrives through
    /// [`on_trk_status_changed`][`XnEvents::on_trk_status_changed`]; `ok` merely confirms that
    /// the station answered.
    pub fn get_cs_status(&mut self, ok: impl FnOnce() + 'static, err: impl FnOnce() + 'static) {
        self.enqueue(
            Command::GetCsStatus,
            OkAction::Ack(Box::new(ok)),
            ErrAction::User(Box::new(err)),
        );
    }

    /// Write a CV on the main track (POM).  `cv` must lie in `1..=1024`.
    pub fn pom_write_cv(
        &mut self,
        addr: LocoAddr,
        cv: u16,
        value: u8,
        ok: impl FnOnce() + 'static,
        err: impl FnOnce() + 'static,
    ) -> Result<(), CommandError> {
        if cv == 0 || cv > 1024 {
            return Err(CommandError::InvalidCv(cv));
        }
        self.enqueue(
            Command::PomWriteCv { addr, cv, value },
            OkAction::Ack(Box::new(ok)),
            ErrAction::User(Box::new(err)),
        );
        Ok(())
    }

    /// Write a single CV bit on the main track (POM).  `cv` must lie in `1..=1024`, `bit` in
    /// `0..=7`.
    pub fn pom_write_bit(
        &mut self,
        addr: LocoAddr,
        cv: u16,
        bit: u8,
        value: bool,
        ok: impl FnOnce() + 'static,
        err: impl FnOnce() + 'static,
    ) -> Result<(), CommandError> {
        if cv == 0 || cv > 1024 {
            return Err(CommandError::InvalidCv(cv));
        }
        if bit > 7 {
            return Err(CommandError::InvalidBit(bit));
        }
        self.enqueue(
            Command::PomWriteBit {
                addr,
                cv,
                bit,
                value,
            },
            OkAction::Ack(Box::new(ok)),
            ErrAction::User(Box::new(err)),
        );
        Ok(())
    }

    /// Read a CV in service mode.
    ///
    /// This is a two-step exchange: once the station confirms the read request, the driver
    /// automatically asks for the result and `got` fires with `(status, cv, value)`.
    pub fn read_direct_cv(
        &mut self,
        cv: u8,
        got: impl FnOnce(ReadCvStatus, u8, u8) + 'static,
        err: impl FnOnce() + 'static,
    ) {
        self.enqueue(
            Command::ReadDirectCv { cv },
            OkAction::CvRead(Box::new(got)),
            ErrAction::User(Box::new(err)),
        );
    }

    /// Write a CV in service mode.
    ///
    /// Like [`read_direct_cv`][`XpressNet::read_direct_cv`] this is a two-step exchange; `ok`
    /// fires once the read-back value matches what was written.
    pub fn write_direct_cv(
        &mut self,
        cv: u8,
        value: u8,
        ok: impl FnOnce() + 'static,
        err: impl FnOnce() + 'static,
    ) {
        self.enqueue(
            Command::WriteDirectCv { cv, value },
            OkAction::Ack(Box::new(ok)),
            ErrAction::User(Box::new(err)),
        );
    }

    /// Set locomotive speed and direction.  `speed` is on the 28-step scale.
    pub fn set_loco_speed(
        &mut self,
        addr: LocoAddr,
        speed: u8,
        dir: Direction,
        ok: impl FnOnce() + 'static,
        err: impl FnOnce() + 'static,
    ) -> Result<(), CommandError> {
        if speed > 28 {
            return Err(CommandError::InvalidSpeed(speed));
        }
        self.enqueue(
            Command::SetSpeedDir { addr, speed, dir },
            OkAction::Ack(Box::new(ok)),
            ErrAction::User(Box::new(err)),
        );
        Ok(())
    }

    /// Query locomotive state: `got(used_by_another, direction, speed, fa, fb)`.
    pub fn get_loco_info(
        &mut self,
        addr: LocoAddr,
        got: impl FnOnce(bool, Direction, u8, FuncA, FuncB) + 'static,
        err: impl FnOnce() + 'static,
    ) {
        self.enqueue(
            Command::GetLocoInfo { addr },
            OkAction::LocoInfo(Box::new(got)),
            ErrAction::User(Box::new(err)),
        );
    }

    /// Query locomotive function states F13-F28.
    pub fn get_loco_func_1328(
        &mut self,
        addr: LocoAddr,
        got: impl FnOnce(FuncC, FuncD) + 'static,
        err: impl FnOnce() + 'static,
    ) {
        self.enqueue(
            Command::GetLocoFunc1328 { addr },
            OkAction::LocoFunc1328(Box::new(got)),
            ErrAction::User(Box::new(err)),
        );
    }

    /// Set function bank F0-F4.
    pub fn set_func_a(
        &mut self,
        addr: LocoAddr,
        fa: FuncA,
        ok: impl FnOnce() + 'static,
        err: impl FnOnce() + 'static,
    ) {
        self.enqueue(
            Command::SetFuncA { addr, fa },
            OkAction::Ack(Box::new(ok)),
            ErrAction::User(Box::new(err)),
        );
    }

    /// Set one half of function bank F5-F12.
    pub fn set_func_b(
        &mut self,
        addr: LocoAddr,
        fb: FuncB,
        range: FuncRange,
        ok: impl FnOnce() + 'static,
        err: impl FnOnce() + 'static,
    ) {
        self.enqueue(
            Command::SetFuncB { addr, fb, range },
            OkAction::Ack(Box::new(ok)),
            ErrAction::User(Box::new(err)),
        );
    }

    /// Set function bank F13-F20.
    pub fn set_func_c(
        &mut self,
        addr: LocoAddr,
        fc: FuncC,
        ok: impl FnOnce() + 'static,
        err: impl FnOnce() + 'static,
    ) {
        self.enqueue(
            Command::SetFuncC { addr, fc },
            OkAction::Ack(Box::new(ok)),
            ErrAction::User(Box::new(err)),
        );
    }

    /// Set function bank F21-F28.
    pub fn set_func_d(
        &mut self,
        addr: LocoAddr,
        fd: FuncD,
        ok: impl FnOnce() + 'static,
        err: impl FnOnce() + 'static,
    ) {
        self.enqueue(
            Command::SetFuncD { addr, fd },
            OkAction::Ack(Box::new(ok)),
            ErrAction::User(Box::new(err)),
        );
    }

    /// Apply a 32-bit function bitmap.
    ///
    /// `mask` selects which functions the call covers, `state` their new values (`b0` = F0).  The
    /// bitmap is scattered into as few bank writes as possible; `ok` fires once after all of them
    /// succeed, the first failure fires `err` and later outcomes of the same call are swallowed.
    pub fn set_loco_func(
        &mut self,
        addr: LocoAddr,
        mask: u32,
        state: u32,
        ok: impl FnOnce() + 'static,
        err: impl FnOnce() + 'static,
    ) {
        let mut banks = Vec::new();
        if mask & 0x0000_001F != 0 {
            banks.push(Command::SetFuncA {
                addr,
                fa: FuncA::from_bitmap(state),
            });
        }
        if mask & 0x0000_01E0 != 0 {
            banks.push(Command::SetFuncB {
                addr,
                fb: FuncB::from_bitmap(state),
                range: FuncRange::F5ToF8,
            });
        }
        if mask & 0x0000_1E00 != 0 {
            banks.push(Command::SetFuncB {
                addr,
                fb: FuncB::from_bitmap(state),
                range: FuncRange::F9ToF12,
            });
        }
        if mask & 0x001F_E000 != 0 {
            banks.push(Command::SetFuncC {
                addr,
                fc: FuncC::from_bitmap(state),
            });
        }
        if mask & 0x1FE0_0000 != 0 {
            banks.push(Command::SetFuncD {
                addr,
                fd: FuncD::from_bitmap(state),
            });
        }

        if banks.is_empty() {
            ok();
            return;
        }

        let shared = Rc::new(RefCell::new(MultiAck {
            remaining: banks.len(),
            failed: false,
            ok: Some(Box::new(ok)),
            err: Some(Box::new(err)),
        }));

        for cmd in banks {
            let on_ok = Rc::clone(&shared);
            let on_err = Rc::clone(&shared);
            self.enqueue(
                cmd,
                OkAction::Ack(Box::new(move || {
                    let mut acks = on_ok.borrow_mut();
                    if acks.failed {
                        return;
                    }
                    acks.remaining -= 1;
                    if acks.remaining == 0 {
                        if let Some(cb) = acks.ok.take() {
                            drop(acks);
                            cb();
                        }
                    }
                })),
                ErrAction::User(Box::new(move || {
                    let mut acks = on_err.borrow_mut();
                    if acks.failed {
                        return;
                    }
                    acks.failed = true;
                    if let Some(cb) = acks.err.take() {
                        drop(acks);
                        cb();
                    }
                })),
            );
        }
    }

    /// Take control of a locomotive: query its state and function banks and deliver the
    /// assembled [`LocoInfo`].
    pub fn acquire_loco(
        &mut self,
        addr: LocoAddr,
        got: impl FnOnce(LocoInfo) + 'static,
        err: impl FnOnce() + 'static,
    ) {
        self.enqueue(
            Command::GetLocoInfo { addr },
            OkAction::AcquireInfo { got: Box::new(got) },
            ErrAction::User(Box::new(err)),
        );
    }

    /// Release a locomotive.  XpressNET has no release message, so this confirms immediately.
    pub fn release_loco(&mut self, addr: LocoAddr, ok: impl FnOnce() + 'static) {
        let _ = addr;
        ok();
    }

    /// Request the state of a feedback input group.  The answer arrives through
    /// [`on_acc_input_changed`][`XnEvents::on_acc_input_changed`].
    pub fn acc_info_request(
        &mut self,
        group: u8,
        nibble: bool,
        err: impl FnOnce() + 'static,
    ) {
        self.enqueue(
            Command::AccInfoRequest { group, nibble },
            OkAction::None,
            ErrAction::User(Box::new(err)),
        );
    }

    /// Operate an accessory output.  `port` must lie in `0..=2047`.
    pub fn acc_op_request(
        &mut self,
        port: u16,
        state: bool,
        ok: impl FnOnce() + 'static,
        err: impl FnOnce() + 'static,
    ) -> Result<(), CommandError> {
        if port > 2047 {
            return Err(CommandError::InvalidPort(port));
        }
        self.enqueue(
            Command::AccOpRequest { port, state },
            OkAction::Ack(Box::new(ok)),
            ErrAction::User(Box::new(err)),
        );
        Ok(())
    }

    /// Fail every command currently awaiting a reply.  Commands still queued for transmission are
    /// kept.
    pub fn clear_pending<L: crate::link::Link, E: XnEvents>(
        &mut self,
        now: crate::time::Instant,
        link: &mut L,
        events: &mut E,
    ) {
        self.log(events, LogLevel::Info, "Clearing pending commands");
        self.drain_pending(now, link, events);
    }
}
