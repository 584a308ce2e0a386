//! Readiness and timer scheduling seam.
//!
//! The engine never blocks on its own: the owner runs an event loop, and each
//! [`Event`] carrying a service's [`Token`] is handed back to that service.

use std::os::fd::RawFd;
use std::time::{Duration, Instant};

/// Identifies the service an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Token(pub usize);

/// Handle of an armed single-shot timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EventKind {
    /// A registered descriptor is readable (or hung up).
    Readable,
    /// A timer elapsed.
    Timer(TimerId),
}

/// A readiness or timer notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Token given at registration.
    pub token: Token,
    /// Kind of notification.
    pub kind: EventKind,
}

/// Host facility that watches descriptors and fires deadlines.
pub trait Scheduler {
    /// Starts reporting [`EventKind::Readable`] for `fd` under `token`.
    fn register_readable(&mut self, fd: RawFd, token: Token);

    /// Stops watching `fd`.
    fn unregister(&mut self, fd: RawFd);

    /// Arms a single-shot timer reported under `token` after `delay`.
    fn arm_timer(&mut self, delay: Duration, token: Token) -> TimerId;

    /// Disarms a timer; unknown or already fired ids are ignored.
    fn cancel_timer(&mut self, id: TimerId);

    /// Whether `id` is armed and has not fired yet.
    fn is_timer_armed(&self, id: TimerId) -> bool;

    /// Current time on the scheduler's clock.
    fn now(&self) -> Instant;
}
