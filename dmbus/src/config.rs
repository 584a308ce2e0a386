//! Service configuration.

use std::time::Duration;

use dmbus_proto::{DeviceType, HEADER_SIZE, MAX_MSG_LEN, ServiceId};

use crate::scheduler::Token;
use crate::transport::PeerAddr;

/// Parameters of a [`Service`](crate::Service).
///
/// Defaults: peer domain 0, local domain 0, 1 s reconnect delay,
/// [`MAX_MSG_LEN`]-byte receive buffer, token 0.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use dmbus::ServiceConfig;
/// use dmbus::proto::{DeviceType, ServiceId};
///
/// let config = ServiceConfig::new(ServiceId::Surfman, DeviceType::XenFb)
///     .local_domain(5)
///     .reconnect_delay(Duration::from_millis(250));
/// assert_eq!(config.peer().port, ServiceId::Surfman.port());
/// ```
#[derive(Debug, Clone)]
#[must_use = "a ServiceConfig does nothing until passed to Service::connect"]
pub struct ServiceConfig {
    /// Service to connect to.
    service: ServiceId,
    /// Device type announced in the prologue.
    device_type: DeviceType,
    /// Local domain id announced in the prologue.
    local_domain: u32,
    /// Domain (or vsock CID) of the peer.
    peer_domain: u32,
    /// Fixed delay between reconnection attempts.
    reconnect_delay: Duration,
    /// Receive buffer size in bytes.
    buffer_capacity: usize,
    /// Token the service's scheduler events carry.
    token: Token,
}

impl ServiceConfig {
    /// Delay used when none is configured.
    pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

    /// Creates a configuration with defaults for everything but the
    /// service and the device type.
    pub const fn new(service: ServiceId, device_type: DeviceType) -> Self {
        Self {
            service,
            device_type,
            local_domain: 0,
            peer_domain: 0,
            reconnect_delay: Self::DEFAULT_RECONNECT_DELAY,
            buffer_capacity: MAX_MSG_LEN,
            token: Token(0),
        }
    }

    /// Sets the local domain id sent in the prologue.
    pub const fn local_domain(mut self, domain: u32) -> Self {
        self.local_domain = domain;
        self
    }

    /// Sets the peer domain (vsock CID when using vsock).
    pub const fn peer_domain(mut self, domain: u32) -> Self {
        self.peer_domain = domain;
        self
    }

    /// Sets the fixed reconnect delay.
    pub const fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the receive buffer size, clamped to `HEADER_SIZE..=MAX_MSG_LEN`.
    ///
    /// A frame declaring more than this many bytes drops the connection.
    pub fn buffer_capacity(mut self, bytes: usize) -> Self {
        self.buffer_capacity = bytes.clamp(HEADER_SIZE, MAX_MSG_LEN);
        self
    }

    /// Sets the token used for this service's readiness and timer events.
    pub const fn token(mut self, token: Token) -> Self {
        self.token = token;
        self
    }

    /// Address of the peer endpoint.
    pub const fn peer(&self) -> PeerAddr {
        PeerAddr {
            domain: self.peer_domain,
            port: self.service.port(),
        }
    }

    /// Configured service.
    pub const fn service(&self) -> ServiceId {
        self.service
    }

    /// Configured device type.
    pub const fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Configured local domain.
    pub const fn domain(&self) -> u32 {
        self.local_domain
    }

    /// Configured reconnect delay.
    pub const fn delay(&self) -> Duration {
        self.reconnect_delay
    }

    /// Configured buffer capacity.
    pub const fn capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Configured token.
    pub const fn event_token(&self) -> Token {
        self.token
    }
}
