//! Connection manager: handshake, receive paths, reconnection and sending.
//!
//! A [`Service`] owns one transport to one peer. Disconnects detected on any
//! path close the transport and arm a single reconnect timer; when it fires
//! the service reconnects, resends the prologue and resumes dispatching.

use std::fmt;
use std::io;
use std::mem;
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

use dmbus_proto::{Header, MAX_MSG_LEN, Message, MsgType, PROLOGUE_SIZE, Prologue};
use tracing::{debug, error, info, trace, warn};

use crate::config::ServiceConfig;
use crate::dispatch::{Handler, dispatch};
use crate::error::{Error, Result};
use crate::framer::{FrameBuffer, FrameError};
use crate::scheduler::{Event, EventKind, Scheduler, TimerId, Token};
use crate::transport::{Connector, PeerAddr, RecvMode, Transport};

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum LinkState {
    /// Transport up, readable events registered.
    Connected,
    /// A reconnection attempt is in progress.
    Connecting,
    /// Transport closed, reconnect timer armed.
    Reconnecting,
}

/// Connection slot; the transport is replaced wholesale on reconnect.
enum Link<T> {
    /// Live transport.
    Connected(T),
    /// Between tearing one transport down and settling on the next state.
    Connecting,
    /// Waiting for the reconnect timer.
    Reconnecting {
        /// The one armed timer.
        timer: TimerId,
        /// When it fires, on the scheduler's clock.
        due: Instant,
    },
}

/// Result of draining a non-blocking transport into the frame buffer.
enum ReadOutcome {
    /// The transport has no more bytes for now.
    Drained,
    /// The buffer filled up before the transport ran dry.
    Full,
    /// The peer closed the stream.
    Closed,
    /// A non-transient read error.
    Failed(io::Error),
}

/// A connection to one dmbus service.
///
/// Single-threaded: every method runs on the thread that drives the
/// [`Scheduler`], and events for this service's [`Token`] must be passed to
/// [`Service::handle_event`].
pub struct Service<C: Connector, H: Handler> {
    /// Creates a fresh transport for every connection attempt.
    connector: C,
    /// Consumer callbacks and context.
    handler: H,
    /// Immutable peer address.
    peer: PeerAddr,
    /// Prologue bytes, resent verbatim on every reconnect.
    prologue: [u8; PROLOGUE_SIZE],
    /// Receive reassembly buffer.
    buffer: FrameBuffer,
    /// Current transport or reconnect timer.
    link: Link<C::Transport>,
    /// Token for scheduler registrations.
    token: Token,
    /// Fixed delay between reconnect attempts.
    reconnect_delay: Duration,
}

impl<C: Connector, H: Handler> fmt::Debug for Service<C, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("buffered", &self.buffer.len())
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl<C: Connector, H: Handler> Service<C, H> {
    /// Connects to the configured peer and sends the prologue.
    ///
    /// On success the transport is registered with `sched` for readability.
    /// Any failure here is returned; no reconnection is scheduled.
    pub fn connect(
        config: &ServiceConfig,
        mut connector: C,
        handler: H,
        sched: &mut impl Scheduler,
    ) -> Result<Self> {
        let prologue = Prologue::new(config.domain(), config.device_type())?.to_bytes();
        let peer = config.peer();

        let transport = open(&mut connector, &peer, &prologue).inspect_err(|e| {
            error!(%peer, error = %e, "failed to initialize dmbus connection");
        })?;
        sched.register_readable(transport.as_raw_fd(), config.event_token());
        info!(%peer, service = ?config.service(), "connected");

        Ok(Self {
            connector,
            handler,
            peer,
            prologue,
            buffer: FrameBuffer::new(config.capacity()),
            link: Link::Connected(transport),
            token: config.event_token(),
            reconnect_delay: config.delay(),
        })
    }

    /// Tears the service down in any state and returns the handler.
    ///
    /// Cancels a pending reconnect timer, unregisters and closes the transport.
    pub fn disconnect(mut self, sched: &mut impl Scheduler) -> H {
        match mem::replace(&mut self.link, Link::Connecting) {
            Link::Connected(transport) => {
                sched.unregister(transport.as_raw_fd());
                drop(transport);
            }
            Link::Reconnecting { timer, .. } => sched.cancel_timer(timer),
            Link::Connecting => {}
        }
        info!(peer = %self.peer, "service disconnected");
        self.handler
    }

    /// Current connection state.
    pub const fn state(&self) -> LinkState {
        match self.link {
            Link::Connected(_) => LinkState::Connected,
            Link::Connecting => LinkState::Connecting,
            Link::Reconnecting { .. } => LinkState::Reconnecting,
        }
    }

    /// When the next reconnection attempt is due, if one is scheduled.
    pub const fn next_attempt(&self) -> Option<Instant> {
        match self.link {
            Link::Reconnecting { due, .. } => Some(due),
            _ => None,
        }
    }

    /// Token this service's events carry.
    pub const fn token(&self) -> Token {
        self.token
    }

    /// Peer address.
    pub const fn peer(&self) -> PeerAddr {
        self.peer
    }

    /// Number of received bytes not yet consumed.
    pub const fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// The consumer's handler.
    pub const fn handler(&self) -> &H {
        &self.handler
    }

    /// The consumer's handler, mutably.
    pub const fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Routes a scheduler event to the receive path or the reconnect timer.
    ///
    /// Events for other tokens, and stale events from a previous connection,
    /// are ignored.
    pub fn handle_event(&mut self, event: Event, sched: &mut impl Scheduler) {
        if event.token != self.token {
            return;
        }
        match event.kind {
            EventKind::Readable => self.on_readable(sched),
            EventKind::Timer(id) => self.on_timer(id, sched),
        }
    }

    /// Encodes and sends `msg`; returns the number of bytes written.
    pub fn send(&mut self, msg: &Message, sched: &mut impl Scheduler) -> Result<usize> {
        let mut frame = dmbus_proto::encode(msg)?;
        self.send_frame(msg.msg_type().tag(), &mut frame, sched)
    }

    /// Stamps `msg_type` and the frame length into `frame`'s header and
    /// writes the whole frame, retrying partial writes.
    ///
    /// `frame` must reserve [`HEADER_SIZE`](dmbus_proto::HEADER_SIZE) leading bytes for the header. A
    /// reset connection schedules a reconnect and yields
    /// [`Error::Disconnected`]; other write errors are returned and the
    /// connection is kept.
    pub fn send_frame(
        &mut self,
        msg_type: u32,
        frame: &mut [u8],
        sched: &mut impl Scheduler,
    ) -> Result<usize> {
        if frame.len() > MAX_MSG_LEN {
            return Err(dmbus_proto::Error::TooLarge(frame.len()).into());
        }
        #[allow(clippy::cast_possible_truncation)]
        let header = Header {
            msg_type,
            msg_len: frame.len() as u32,
        };
        header.write(frame)?;

        let Link::Connected(transport) = &mut self.link else {
            return Err(Error::Disconnected);
        };
        match write_all(transport, frame) {
            Ok(()) => {
                trace!(msg_type, len = frame.len(), "sent");
                Ok(frame.len())
            }
            Err(e) if is_reset(&e) => {
                self.handle_disconnect(sched);
                Err(Error::Disconnected)
            }
            Err(e) => {
                error!(msg_type, error = %e, "send failed");
                Err(Error::Io(e))
            }
        }
    }

    /// Blocks until a frame of type `expected` arrives and copies it,
    /// header included, into `out`.
    ///
    /// Frames of other types met on the way are dispatched to the handler.
    /// The copy is truncated to `out.len()`; returns the bytes copied.
    pub fn receive_blocking(
        &mut self,
        expected: MsgType,
        out: &mut [u8],
        sched: &mut impl Scheduler,
    ) -> Result<usize> {
        loop {
            let len = self.sync_recv(sched)?;
            let frame = &self.buffer.filled()[..len];
            if Header::parse(frame).is_some_and(|h| h.msg_type == expected.tag()) {
                let n = out.len().min(len);
                out[..n].copy_from_slice(&frame[..n]);
                self.buffer.pop();
                return Ok(n);
            }
            dispatch(&mut self.handler, frame);
            self.buffer.pop();
        }
    }

    /// Like [`Service::receive_blocking`], decoding the awaited frame.
    pub fn receive_message(&mut self, expected: MsgType, sched: &mut impl Scheduler) -> Result<Message> {
        let mut frame = [0u8; MAX_MSG_LEN];
        let n = self.receive_blocking(expected, &mut frame, sched)?;
        Ok(dmbus_proto::decode(&frame[..n])?)
    }

    /// Blocking reads until a complete frame is buffered; returns its length.
    fn sync_recv(&mut self, sched: &mut impl Scheduler) -> Result<usize> {
        loop {
            match self.buffer.frame_len() {
                Ok(Some(len)) => return Ok(len),
                Ok(None) => {}
                Err(e) => {
                    self.drop_malformed(e, sched);
                    return Err(e.into());
                }
            }

            let Link::Connected(transport) = &mut self.link else {
                return Err(Error::Disconnected);
            };
            match transport.recv(self.buffer.spare_mut(), RecvMode::Blocking) {
                Ok(0) => {
                    self.handle_disconnect(sched);
                    return Err(Error::Disconnected);
                }
                Ok(n) => self.buffer.advance(n),
                Err(e) if is_transient(&e) => {}
                Err(e) => {
                    error!(peer = %self.peer, error = %e, "recv error");
                    self.handle_disconnect(sched);
                    return Err(Error::Io(e));
                }
            }
        }
    }

    /// Readable callback: drain the transport and dispatch complete frames.
    fn on_readable(&mut self, sched: &mut impl Scheduler) {
        loop {
            let outcome = match &mut self.link {
                Link::Connected(transport) => read_available(transport, &mut self.buffer),
                _ => {
                    trace!("readable event while not connected");
                    return;
                }
            };

            // Frames that arrived ahead of a close are still delivered.
            if let Err(e) = self.dispatch_buffered() {
                self.drop_malformed(e, sched);
                return;
            }

            match outcome {
                ReadOutcome::Drained => return,
                ReadOutcome::Full => {}
                ReadOutcome::Closed => {
                    self.handle_disconnect(sched);
                    return;
                }
                ReadOutcome::Failed(e) => {
                    error!(peer = %self.peer, error = %e, "recv error");
                    self.handle_disconnect(sched);
                    return;
                }
            }
        }
    }

    /// Dispatches and pops every complete frame, in arrival order.
    fn dispatch_buffered(&mut self) -> std::result::Result<usize, FrameError> {
        let mut count = 0;
        while let Some(frame) = self.buffer.peek()? {
            dispatch(&mut self.handler, frame);
            self.buffer.pop();
            count += 1;
        }
        Ok(count)
    }

    /// Reconnect timer callback.
    fn on_timer(&mut self, id: TimerId, sched: &mut impl Scheduler) {
        match self.link {
            Link::Reconnecting { timer, .. } if timer == id => {}
            _ => {
                debug!(?id, "stale reconnect timer ignored");
                return;
            }
        }

        self.link = Link::Connecting;
        match open(&mut self.connector, &self.peer, &self.prologue) {
            Ok(transport) => {
                info!(peer = %self.peer, "reconnected");
                self.handler.reconnected();
                sched.register_readable(transport.as_raw_fd(), self.token);
                self.link = Link::Connected(transport);
            }
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "reconnection attempt failed");
                self.arm_reconnect(sched);
            }
        }
    }

    /// Drops the connection after a frame the buffer can never complete.
    fn drop_malformed(&mut self, e: FrameError, sched: &mut impl Scheduler) {
        warn!(peer = %self.peer, error = %e, "malformed frame, dropping connection");
        self.handle_disconnect(sched);
    }

    /// Closes the transport and schedules a reconnect, at most once.
    fn handle_disconnect(&mut self, sched: &mut impl Scheduler) {
        if let Link::Reconnecting { timer, .. } = self.link {
            if sched.is_timer_armed(timer) {
                return;
            }
        }
        if let Link::Connected(transport) = mem::replace(&mut self.link, Link::Connecting) {
            sched.unregister(transport.as_raw_fd());
            drop(transport);
        }
        self.buffer.clear();
        info!(
            peer = %self.peer,
            delay_ms = self.reconnect_delay.as_millis(),
            "remote service disconnected, scheduling reconnection"
        );
        self.arm_reconnect(sched);
    }

    /// Arms the reconnect timer and enters `Reconnecting`.
    fn arm_reconnect(&mut self, sched: &mut impl Scheduler) {
        let due = sched.now() + self.reconnect_delay;
        let timer = sched.arm_timer(self.reconnect_delay, self.token);
        debug!(peer = %self.peer, ?timer, ?due, "reconnect armed");
        self.link = Link::Reconnecting { timer, due };
    }
}

/// Creates a transport, connects it and writes the prologue in one call.
fn open<C: Connector>(connector: &mut C, peer: &PeerAddr, prologue: &[u8]) -> Result<C::Transport> {
    let mut transport = connector.create().map_err(Error::Create)?;
    transport.connect(peer).map_err(|source| Error::Connect {
        peer: *peer,
        source,
    })?;
    let sent = transport.send(prologue)?;
    if sent != prologue.len() {
        return Err(Error::Handshake {
            sent,
            expected: prologue.len(),
        });
    }
    Ok(transport)
}

/// Writes all of `buf`, retrying partial writes and transient errors.
fn write_all<T: Transport>(transport: &mut T, buf: &[u8]) -> io::Result<()> {
    let mut sent = 0;
    while sent < buf.len() {
        match transport.send(&buf[sent..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => sent += n,
            Err(e) if is_transient(&e) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Non-blocking reads until the transport runs dry, closes or the buffer fills.
fn read_available<T: Transport>(transport: &mut T, buffer: &mut FrameBuffer) -> ReadOutcome {
    loop {
        let spare = buffer.spare_mut();
        if spare.is_empty() {
            return ReadOutcome::Full;
        }
        match transport.recv(spare, RecvMode::NonBlocking) {
            Ok(0) => return ReadOutcome::Closed,
            Ok(n) => buffer.advance(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Drained,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return ReadOutcome::Failed(e),
        }
    }
}

/// Errors retried without surfacing.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// Send errors meaning the peer is gone.
fn is_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
    )
}
