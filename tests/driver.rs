//! End-to-end exercise of the public driver API against the simulated link.
//!
//! Run with `cargo test --features link-simulator`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use xpressnet::commands::Direction;
use xpressnet::link::SimulatorLink;
use xpressnet::time::{Duration, Instant};
use xpressnet::{driver, frame, LiType, LocoAddr, TrkStatus};

#[derive(Default)]
struct Events {
    after_open: Cell<usize>,
    after_close: Cell<usize>,
    statuses: RefCell<Vec<TrkStatus>>,
}

impl driver::XnEvents for Events {
    fn after_open(&mut self) {
        self.after_open.set(self.after_open.get() + 1);
    }
    fn after_close(&mut self) {
        self.after_close.set(self.after_close.get() + 1);
    }
    fn on_trk_status_changed(&mut self, status: TrkStatus) {
        self.statuses.borrow_mut().push(status);
    }
}

struct Station {
    xn: driver::XpressNet,
    link: SimulatorLink,
    events: Events,
    now: Instant,
}

impl Station {
    fn connect() -> Self {
        let mut s = Station {
            xn: driver::XpressNet::new(driver::Config::default()),
            link: SimulatorLink::new(),
            events: Events::default(),
            now: Instant::ZERO,
        };
        s.xn
            .connect(s.now, &mut s.link, LiType::Li101, &mut s.events)
            .expect("connect failed");

        // Play the LI and command station side of the opening handshake.
        assert_eq!(s.link.take_written(), frame::encode(&[0xF0], LiType::Li101));
        s.answer(&[0x02, 0x01, 0x30]);
        s.answer(&[0xF2, 0x01, 0x01]);
        s.answer(&[0x63, 0x21, 0x36, 0x00]);
        s.answer(&[0x62, 0x22, 0x00]);
        assert_eq!(s.events.after_open.get(), 1);
        s
    }

    /// Feed one reply frame and let the driver react.
    fn answer(&mut self, payload: &[u8]) {
        self.link
            .push_inbound(&frame::encode(payload, LiType::Li101));
        self.tick();
    }

    fn tick(&mut self) -> Vec<u8> {
        self.now += Duration::from_millis(100);
        self.xn.poll(self.now, &mut self.link, &mut self.events);
        self.link.take_written()
    }
}

#[test]
fn handshake_then_track_on() {
    let mut s = Station::connect();
    assert_eq!(s.xn.trk_status(), TrkStatus::On);

    let ok = Rc::new(Cell::new(0u32));
    let c = Rc::clone(&ok);
    s.xn.set_trk_status(TrkStatus::On, move || c.set(c.get() + 1), || panic!("err"))
        .unwrap();
    assert_eq!(s.tick(), vec![0x21, 0x81, 0xA0]);

    s.answer(&[0x61, 0x01]);
    assert_eq!(ok.get(), 1);
}

#[test]
fn speed_command_roundtrip() {
    let mut s = Station::connect();

    let ok = Rc::new(Cell::new(0u32));
    let c = Rc::clone(&ok);
    s.xn.set_loco_speed(
        LocoAddr::new(42).unwrap(),
        14,
        Direction::Forward,
        move || c.set(c.get() + 1),
        || panic!("err"),
    )
    .unwrap();

    let written = s.tick();
    assert_eq!(written[..4], [0xE4, 0x12, 0x00, 0x2A]);
    assert_eq!(written.iter().fold(0u8, |x, b| x ^ b), 0);

    s.answer(&[0x01, 0x04]);
    assert_eq!(ok.get(), 1);
}

#[test]
fn acquire_and_release() {
    let mut s = Station::connect();

    let info = Rc::new(RefCell::new(None));
    let got = Rc::clone(&info);
    s.xn.acquire_loco(
        LocoAddr::new(3).unwrap(),
        move |i| *got.borrow_mut() = Some(i),
        || panic!("err"),
    );
    assert!(!s.tick().is_empty());
    // The loco-info reply makes the driver request functions 13-28 on its own.
    s.answer(&[0xE4, 0x02, 0x12, 0x10, 0x00]);
    s.answer(&[0xE3, 0x52, 0x00, 0x00]);

    let info = info.borrow().expect("no loco info");
    assert_eq!(info.addr.value(), 3);
    assert_eq!(info.max_speed, 28);
    assert_eq!(info.functions, 1 << 0);

    let released = Rc::new(Cell::new(false));
    let r = Rc::clone(&released);
    s.xn.release_loco(LocoAddr::new(3).unwrap(), move || r.set(true));
    assert!(released.get());
}

#[test]
fn disconnect_reports_events() {
    let mut s = Station::connect();
    let Station {
        xn, link, events, now,
    } = &mut s;
    xn.disconnect(*now, link, events).unwrap();
    assert_eq!(events.after_close.get(), 1);
    assert_eq!(
        events.statuses.borrow().last().copied(),
        Some(TrkStatus::Unknown)
    );
}
