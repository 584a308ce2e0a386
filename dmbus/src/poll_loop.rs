//! Single-threaded `poll(2)` event loop implementing [`Scheduler`].

#![allow(unsafe_code)]

use std::collections::BTreeMap;
use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use crate::scheduler::{Event, EventKind, Scheduler, TimerId, Token};

/// Watches descriptors for readability and fires single-shot timers.
///
/// # Example
///
/// ```no_run
/// use dmbus::{PollLoop, Scheduler, Token};
/// use std::time::Duration;
///
/// let mut ev = PollLoop::new();
/// ev.arm_timer(Duration::from_millis(10), Token(1));
/// let events = ev.wait(None).expect("poll failed");
/// assert_eq!(events[0].token, Token(1));
/// ```
#[derive(Debug, Default)]
pub struct PollLoop {
    /// Watched descriptors.
    readers: BTreeMap<RawFd, Token>,
    /// Armed timers: deadline and owner.
    timers: BTreeMap<TimerId, (Instant, Token)>,
    /// Next timer id to hand out.
    next_timer: u64,
}

impl PollLoop {
    /// Creates an empty loop.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until at least one event is ready or `max` elapses.
    ///
    /// Elapsed timers are reported before readiness events. A descriptor that
    /// `poll` reports invalid is reported readable once and unregistered.
    /// Returns an empty list on timeout. Fails with [`io::ErrorKind::InvalidInput`] when
    /// nothing is registered and no `max` is given.
    pub fn wait(&mut self, max: Option<Duration>) -> io::Result<Vec<Event>> {
        if self.readers.is_empty() && self.timers.is_empty() && max.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "nothing registered to wait for",
            ));
        }
        let limit = max.map(|m| Instant::now() + m);

        loop {
            let mut events = self.expired(Instant::now());
            if !events.is_empty() {
                return Ok(events);
            }

            let mut pfds: Vec<libc::pollfd> = self
                .readers
                .keys()
                .map(|&fd| libc::pollfd {
                    fd,
                    events: libc::POLLIN,
                    revents: 0,
                })
                .collect();
            let timeout = self.poll_timeout(limit);
            // SAFETY: pfds is a valid, exclusively borrowed array of pollfd.
            let ret = unsafe { libc::poll(pfds.as_mut_ptr(), pfds.len() as libc::nfds_t, timeout) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            events.extend(self.expired(Instant::now()));
            let ready = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
            for pfd in &pfds {
                if pfd.revents & ready == 0 {
                    continue;
                }
                // A closed descriptor stays invalid; report it once and forget it.
                let token = if pfd.revents & libc::POLLNVAL != 0 {
                    self.readers.remove(&pfd.fd)
                } else {
                    self.readers.get(&pfd.fd).copied()
                };
                if let Some(token) = token {
                    events.push(Event {
                        token,
                        kind: EventKind::Readable,
                    });
                }
            }
            // poll(2) may wake marginally before a deadline; go around again.
            if !events.is_empty() || limit.is_some_and(|l| Instant::now() >= l) {
                return Ok(events);
            }
        }
    }

    /// Removes and reports timers due at `now`, earliest first.
    fn expired(&mut self, now: Instant) -> Vec<Event> {
        let mut due: Vec<(Instant, TimerId, Token)> = self
            .timers
            .iter()
            .filter(|(_, (at, _))| *at <= now)
            .map(|(&id, &(at, token))| (at, id, token))
            .collect();
        due.sort_unstable();
        due.into_iter()
            .map(|(_, id, token)| {
                self.timers.remove(&id);
                Event {
                    token,
                    kind: EventKind::Timer(id),
                }
            })
            .collect()
    }

    /// Milliseconds `poll` may sleep: until the next deadline or `limit`.
    fn poll_timeout(&self, limit: Option<Instant>) -> libc::c_int {
        let next = self.timers.values().map(|(at, _)| *at).chain(limit).min();
        next.map_or(-1, |at| {
            let d = at.saturating_duration_since(Instant::now());
            libc::c_int::try_from(d.as_nanos().div_ceil(1_000_000)).unwrap_or(libc::c_int::MAX)
        })
    }
}

impl Scheduler for PollLoop {
    fn register_readable(&mut self, fd: RawFd, token: Token) {
        self.readers.insert(fd, token);
    }

    fn unregister(&mut self, fd: RawFd) {
        self.readers.remove(&fd);
    }

    fn arm_timer(&mut self, delay: Duration, token: Token) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.timers.insert(id, (Instant::now() + delay, token));
        id
    }

    fn cancel_timer(&mut self, id: TimerId) {
        self.timers.remove(&id);
    }

    fn is_timer_armed(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn timer_fires_once_after_delay() {
        let mut ev = PollLoop::new();
        let start = Instant::now();
        let id = ev.arm_timer(Duration::from_millis(20), Token(3));
        assert!(ev.is_timer_armed(id));

        let events = ev.wait(Some(Duration::from_secs(5))).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(
            events,
            [Event {
                token: Token(3),
                kind: EventKind::Timer(id)
            }]
        );
        assert!(!ev.is_timer_armed(id));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut ev = PollLoop::new();
        let id = ev.arm_timer(Duration::from_millis(1), Token(0));
        ev.cancel_timer(id);
        assert!(!ev.is_timer_armed(id));
        std::thread::sleep(Duration::from_millis(5));
        assert!(ev.wait(Some(Duration::from_millis(5))).unwrap().is_empty());
    }

    #[test]
    fn readable_descriptor_is_reported() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut ev = PollLoop::new();
        ev.register_readable(a.as_raw_fd(), Token(9));
        assert!(ev.wait(Some(Duration::from_millis(5))).unwrap().is_empty());

        b.write_all(b"x").unwrap();
        let events = ev.wait(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(
            events,
            [Event {
                token: Token(9),
                kind: EventKind::Readable
            }]
        );

        ev.unregister(a.as_raw_fd());
        assert!(ev.wait(Some(Duration::from_millis(5))).unwrap().is_empty());
    }

    #[test]
    fn invalid_descriptor_is_reported_once_then_dropped() {
        // Far above any descriptor a test process opens.
        let closed: RawFd = 1 << 20;
        let mut ev = PollLoop::new();
        ev.register_readable(closed, Token(4));

        let events = ev.wait(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(
            events,
            [Event {
                token: Token(4),
                kind: EventKind::Readable
            }]
        );
        assert!(ev.readers.is_empty());
        assert!(ev.wait(Some(Duration::from_millis(5))).unwrap().is_empty());
    }

    #[test]
    fn empty_loop_refuses_to_block_forever() {
        let err = PollLoop::new().wait(None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
