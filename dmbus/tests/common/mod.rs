//! Scripted transport and manually driven scheduler for service tests.

#![allow(dead_code, missing_docs, clippy::missing_docs_in_private_items)]

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;
use std::time::{Duration, Instant};

use dmbus::proto::{self, HEADER_SIZE, Header, InputConfig, Message};
use dmbus::{Connector, Event, EventKind, Handler, PeerAddr, RecvMode, Scheduler, TimerId, Token, Transport};

/// One scripted `recv` result.
#[derive(Debug)]
pub enum Rx {
    Data(Vec<u8>),
    Eof,
    Fail(io::ErrorKind),
}

/// One scripted `send` result; unscripted sends take everything.
#[derive(Debug, Clone, Copy)]
pub enum Tx {
    Accept(usize),
    Fail(io::ErrorKind),
}

/// Both directions of one fake connection.
#[derive(Debug, Default)]
pub struct Wire {
    pub rx: VecDeque<Rx>,
    pub tx_plan: VecDeque<Tx>,
    pub sent: Vec<u8>,
    pub peer: Option<PeerAddr>,
    pub closed: bool,
}

impl Wire {
    pub fn push(&mut self, bytes: &[u8]) {
        self.rx.push_back(Rx::Data(bytes.to_vec()));
    }
}

pub type SharedWire = Rc<RefCell<Wire>>;

/// How the next connection attempt goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Ok,
    CreateFails,
    ConnectFails,
    ShortHandshake,
}

#[derive(Debug, Default)]
pub struct Script {
    pub attempts: VecDeque<Attempt>,
    pub wires: Vec<SharedWire>,
    pub creates: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    pub script: Rc<RefCell<Script>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(&self, attempt: Attempt) -> &Self {
        self.script.borrow_mut().attempts.push_back(attempt);
        self
    }

    /// Wire of the `n`th created transport.
    pub fn wire(&self, n: usize) -> SharedWire {
        Rc::clone(&self.script.borrow().wires[n])
    }

    pub fn latest(&self) -> SharedWire {
        let script = self.script.borrow();
        Rc::clone(script.wires.last().expect("no transport created"))
    }

    pub fn creates(&self) -> usize {
        self.script.borrow().creates
    }
}

impl Connector for FakeConnector {
    type Transport = FakeTransport;

    fn create(&mut self) -> io::Result<FakeTransport> {
        let mut script = self.script.borrow_mut();
        script.creates += 1;
        let attempt = script.attempts.pop_front().unwrap_or(Attempt::Ok);
        if attempt == Attempt::CreateFails {
            return Err(io::ErrorKind::OutOfMemory.into());
        }
        let wire = SharedWire::default();
        if attempt == Attempt::ShortHandshake {
            wire.borrow_mut().tx_plan.push_back(Tx::Accept(3));
        }
        script.wires.push(Rc::clone(&wire));
        let fd = 100 + RawFd::try_from(script.wires.len()).unwrap_or(0);
        Ok(FakeTransport { fd, wire, attempt })
    }
}

#[derive(Debug)]
pub struct FakeTransport {
    fd: RawFd,
    wire: SharedWire,
    attempt: Attempt,
}

impl AsRawFd for FakeTransport {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        self.wire.borrow_mut().closed = true;
    }
}

impl Transport for FakeTransport {
    fn connect(&mut self, peer: &PeerAddr) -> io::Result<()> {
        if self.attempt == Attempt::ConnectFails {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        self.wire.borrow_mut().peer = Some(*peer);
        Ok(())
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut wire = self.wire.borrow_mut();
        let n = match wire.tx_plan.pop_front() {
            None => buf.len(),
            Some(Tx::Accept(max)) => max.min(buf.len()),
            Some(Tx::Fail(kind)) => return Err(kind.into()),
        };
        wire.sent.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn recv(&mut self, buf: &mut [u8], mode: RecvMode) -> io::Result<usize> {
        let mut wire = self.wire.borrow_mut();
        match wire.rx.pop_front() {
            None if mode == RecvMode::NonBlocking => Err(io::ErrorKind::WouldBlock.into()),
            None => panic!("blocking recv with nothing scripted"),
            Some(Rx::Eof) => Ok(0),
            Some(Rx::Fail(kind)) => Err(kind.into()),
            Some(Rx::Data(mut data)) => {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    wire.rx.push_front(Rx::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }
}

/// Scheduler whose clock only moves when the test says so.
#[derive(Debug)]
pub struct ManualScheduler {
    pub readers: BTreeMap<RawFd, Token>,
    pub timers: BTreeMap<TimerId, (Instant, Token)>,
    pub armed_total: usize,
    next: u64,
    now: Instant,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            readers: BTreeMap::new(),
            timers: BTreeMap::new(),
            armed_total: 0,
            next: 0,
            now: Instant::now(),
        }
    }

    /// Moves the clock forward and returns the timers that fired, in order.
    pub fn advance(&mut self, by: Duration) -> Vec<Event> {
        self.now += by;
        let now = self.now;
        let mut due: Vec<(Instant, TimerId)> = self
            .timers
            .iter()
            .filter(|(_, (at, _))| *at <= now)
            .map(|(id, (at, _))| (*at, *id))
            .collect();
        due.sort_unstable();
        due.into_iter()
            .filter_map(|(_, id)| {
                self.timers.remove(&id).map(|(_, token)| Event {
                    token,
                    kind: EventKind::Timer(id),
                })
            })
            .collect()
    }

    /// Readable event for `token`.
    pub fn readable(token: Token) -> Event {
        Event {
            token,
            kind: EventKind::Readable,
        }
    }
}

impl Scheduler for ManualScheduler {
    fn register_readable(&mut self, fd: RawFd, token: Token) {
        self.readers.insert(fd, token);
    }

    fn unregister(&mut self, fd: RawFd) {
        self.readers.remove(&fd);
    }

    fn arm_timer(&mut self, delay: Duration, token: Token) -> TimerId {
        let id = TimerId(self.next);
        self.next += 1;
        self.armed_total += 1;
        self.timers.insert(id, (self.now + delay, token));
        id
    }

    fn cancel_timer(&mut self, id: TimerId) {
        self.timers.remove(&id);
    }

    fn is_timer_armed(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    fn now(&self) -> Instant {
        self.now
    }
}

/// What a [`Recorder`] saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Input(u16, u16, i32),
    Info(u32, u32, u32, u32),
    Edid(u32, usize),
    Config(u8, String),
    Reset(u8),
    Reconnected,
}

#[derive(Debug, Default)]
pub struct Recorder {
    pub seen: Vec<Seen>,
}

impl Handler for Recorder {
    fn dom0_input_event(&mut self, kind: u16, code: u16, value: i32) {
        self.seen.push(Seen::Input(kind, code, value));
    }

    fn display_info(&mut self, id: u32, x: u32, y: u32, align: u32) {
        self.seen.push(Seen::Info(id, x, y, align));
    }

    fn display_edid(&mut self, id: u32, edid: &[u8]) {
        self.seen.push(Seen::Edid(id, edid.len()));
    }

    fn input_config(&mut self, config: &InputConfig) {
        self.seen.push(Seen::Config(config.slot, config.name.clone()));
    }

    fn input_config_reset(&mut self, slot: u8) {
        self.seen.push(Seen::Reset(slot));
    }

    fn reconnected(&mut self) {
        self.seen.push(Seen::Reconnected);
    }
}

pub fn encode(msg: &Message) -> Vec<u8> {
    proto::encode(msg).expect("encode")
}

/// Encodes `msg` and pads it to exactly `total` bytes, restamping the header.
pub fn padded(msg: &Message, total: usize) -> Vec<u8> {
    let mut frame = encode(msg);
    assert!(frame.len() <= total, "message longer than {total} bytes");
    frame.resize(total, 0);
    Header {
        msg_type: msg.msg_type().tag(),
        msg_len: u32::try_from(total).expect("frame length"),
    }
    .write(&mut frame)
    .expect("header");
    frame
}

/// A header-only frame with an arbitrary type tag and declared length.
pub fn raw_header(msg_type: u32, msg_len: u32) -> Vec<u8> {
    let mut frame = vec![0u8; HEADER_SIZE];
    Header { msg_type, msg_len }.write(&mut frame).expect("header");
    frame
}
