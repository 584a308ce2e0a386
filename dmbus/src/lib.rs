//! Guest-side client engine for the dmbus device-model message bus.
//!
//! A [`Service`] connects to one peer service, announces itself with a
//! [`Prologue`](dmbus_proto::Prologue), reassembles incoming frames and
//! dispatches them to a consumer [`Handler`]. Lost connections are retried
//! on a fixed delay for as long as the service lives.
//!
//! The engine is single-threaded and event driven: the owner runs a
//! [`Scheduler`] (for example [`PollLoop`]) and feeds each [`Event`] back to
//! [`Service::handle_event`].
//!
//! # Example
//!
//! ```no_run
//! use dmbus::proto::{DeviceType, ServiceId};
//! use dmbus::{Handler, PollLoop, Service, ServiceConfig, SocketConnector};
//!
//! struct Display;
//!
//! impl Handler for Display {
//!     fn display_info(&mut self, id: u32, x: u32, y: u32, _align: u32) {
//!         println!("display {id}: up to {x}x{y}");
//!     }
//! }
//!
//! let mut ev = PollLoop::new();
//! let config = ServiceConfig::new(ServiceId::Surfman, DeviceType::XenFb).peer_domain(2);
//! let mut svc = Service::connect(&config, SocketConnector::vsock(), Display, &mut ev)
//!     .expect("connect failed");
//! loop {
//!     for event in ev.wait(None).expect("poll failed") {
//!         svc.handle_event(event, &mut ev);
//!     }
//! }
//! ```
//!
//! # Platform
//!
//! Unix only.

#![cfg(unix)]

mod config;
mod dispatch;
mod error;
mod framer;
mod poll_loop;
mod scheduler;
mod service;
mod transport;

pub use config::ServiceConfig;
pub use dispatch::{Handler, dispatch};
pub use dmbus_proto as proto;
pub use error::{Error, Result};
pub use framer::{FrameBuffer, FrameError};
pub use poll_loop::PollLoop;
pub use scheduler::{Event, EventKind, Scheduler, TimerId, Token};
pub use service::{LinkState, Service};
pub use transport::{Connector, Family, PeerAddr, RecvMode, SocketConnector, SocketTransport, Transport};
