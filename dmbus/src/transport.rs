//! Byte-stream transport seam and its socket implementation.
//!
//! A [`Connector`] creates unconnected [`Transport`]s; the service connects
//! them to its peer. Closing a transport is dropping it.

#![allow(unsafe_code)]

use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

/// Address of the remote endpoint of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    /// Peer domain; the vsock CID on vsock transports.
    pub domain: u32,
    /// Service port.
    pub port: u32,
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain, self.port)
    }
}

/// Whether a receive may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RecvMode {
    /// Wait until at least one byte or EOF is available.
    Blocking,
    /// Fail with [`io::ErrorKind::WouldBlock`] instead of waiting.
    NonBlocking,
}

/// A connection-oriented byte stream.
///
/// `send` may accept fewer bytes than offered. `recv` returns `Ok(0)` on
/// orderly close by the peer.
pub trait Transport: AsRawFd {
    /// Connects to `peer`.
    fn connect(&mut self, peer: &PeerAddr) -> io::Result<()>;

    /// Writes some prefix of `buf`; returns how many bytes were taken.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Reads into `buf`.
    fn recv(&mut self, buf: &mut [u8], mode: RecvMode) -> io::Result<usize>;
}

/// Factory for fresh transports; called once per (re)connection attempt.
pub trait Connector {
    /// Transport type produced.
    type Transport: Transport;

    /// Creates an unconnected transport.
    fn create(&mut self) -> io::Result<Self::Transport>;
}

/// Socket family used by [`SocketConnector`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Family {
    /// `AF_VSOCK`; the peer domain is the CID.
    Vsock,
    /// `AF_UNIX`; peers are socket files under `dir`.
    Unix {
        /// Directory holding `dmbus-{domain}-{port}.sock` files.
        dir: PathBuf,
    },
}

/// Creates stream sockets of one [`Family`].
#[derive(Debug, Clone)]
pub struct SocketConnector {
    /// Family of created sockets.
    family: Family,
}

impl SocketConnector {
    /// Connector for vsock peers.
    pub const fn vsock() -> Self {
        Self {
            family: Family::Vsock,
        }
    }

    /// Connector for Unix socket peers under `dir`.
    pub fn unix(dir: impl Into<PathBuf>) -> Self {
        Self {
            family: Family::Unix { dir: dir.into() },
        }
    }

    /// Path a Unix-socket peer listens on.
    pub fn socket_path(dir: &Path, peer: &PeerAddr) -> PathBuf {
        dir.join(format!("dmbus-{}-{}.sock", peer.domain, peer.port))
    }
}

impl Connector for SocketConnector {
    type Transport = SocketTransport;

    fn create(&mut self) -> io::Result<SocketTransport> {
        let domain = match self.family {
            Family::Vsock => vsock_family()?,
            Family::Unix { .. } => libc::AF_UNIX,
        };
        let fd = stream_socket(domain)?;
        Ok(SocketTransport {
            fd,
            family: self.family.clone(),
        })
    }
}

/// A stream socket created by [`SocketConnector`].
#[derive(Debug)]
pub struct SocketTransport {
    /// Socket descriptor; closed on drop.
    fd: OwnedFd,
    /// Family the socket was created in.
    family: Family,
}

impl AsRawFd for SocketTransport {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Transport for SocketTransport {
    fn connect(&mut self, peer: &PeerAddr) -> io::Result<()> {
        match &self.family {
            Family::Vsock => vsock_connect(&self.fd, peer),
            Family::Unix { dir } => unix_connect(&self.fd, &SocketConnector::socket_path(dir, peer)),
        }
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: buf is valid for buf.len() bytes for the duration of the call.
        let n = unsafe { libc::send(self.fd.as_raw_fd(), buf.as_ptr().cast(), buf.len(), SEND_FLAGS) };
        usize::try_from(n).map_err(|_| io::Error::last_os_error())
    }

    fn recv(&mut self, buf: &mut [u8], mode: RecvMode) -> io::Result<usize> {
        let flags = match mode {
            RecvMode::Blocking => 0,
            RecvMode::NonBlocking => libc::MSG_DONTWAIT,
        };
        // SAFETY: buf is valid for writes of buf.len() bytes.
        let n = unsafe { libc::recv(self.fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len(), flags) };
        usize::try_from(n).map_err(|_| io::Error::last_os_error())
    }
}

/// Flags for every `send(2)`; a dead peer must surface as `EPIPE`, not `SIGPIPE`.
#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
/// Flags for every `send(2)`.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// Address family for vsock sockets.
#[cfg(target_os = "linux")]
const fn vsock_family() -> io::Result<libc::c_int> {
    Ok(libc::AF_VSOCK)
}

/// vsock is Linux-only.
#[cfg(not(target_os = "linux"))]
fn vsock_family() -> io::Result<libc::c_int> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "vsock transport requires Linux",
    ))
}

/// Connects a vsock socket to `peer.domain` (CID) / `peer.port`.
#[cfg(target_os = "linux")]
fn vsock_connect(fd: &OwnedFd, peer: &PeerAddr) -> io::Result<()> {
    // SAFETY: sockaddr_vm is plain old data; all-zero is a valid value.
    let mut addr: libc::sockaddr_vm = unsafe { std::mem::zeroed() };
    addr.svm_family = libc::AF_VSOCK as libc::sa_family_t;
    addr.svm_cid = peer.domain;
    addr.svm_port = peer.port;

    // SAFETY: addr is a fully initialized sockaddr_vm and the length matches.
    let rc = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            std::ptr::from_ref(&addr).cast(),
            size_of::<libc::sockaddr_vm>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// vsock is Linux-only.
#[cfg(not(target_os = "linux"))]
fn vsock_connect(_fd: &OwnedFd, _peer: &PeerAddr) -> io::Result<()> {
    vsock_family().map(|_| ())
}

/// Connects a Unix stream socket to `path`.
fn unix_connect(fd: &OwnedFd, path: &Path) -> io::Result<()> {
    use std::os::unix::ffi::OsStrExt;

    // SAFETY: sockaddr_un is plain old data; all-zero is a valid value.
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

    let bytes = path.as_os_str().as_bytes();
    // Keep room for the terminating NUL.
    if bytes.len() >= addr.sun_path.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("socket path too long: {}", path.display()),
        ));
    }
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    let len = std::mem::offset_of!(libc::sockaddr_un, sun_path) + bytes.len() + 1;

    // SAFETY: addr is initialized and `len` does not exceed its size.
    let rc = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            std::ptr::from_ref(&addr).cast(),
            len as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Creates a close-on-exec stream socket in `domain`.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn stream_socket(domain: libc::c_int) -> io::Result<OwnedFd> {
    // SAFETY: socket() has no memory-safety preconditions.
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd is a freshly created descriptor nobody else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Creates a close-on-exec stream socket in `domain`.
///
/// Without `SOCK_CLOEXEC` the flag is added right after creation.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn stream_socket(domain: libc::c_int) -> io::Result<OwnedFd> {
    // SAFETY: socket() has no memory-safety preconditions.
    let raw = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: raw is a freshly created descriptor nobody else owns.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    // SAFETY: fd is open for the duration of both calls.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
    if flags < 0 || unsafe { libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixListener;

    #[test]
    fn peer_display_and_socket_path() {
        let peer = PeerAddr {
            domain: 0,
            port: 4001,
        };
        assert_eq!(peer.to_string(), "0:4001");
        assert_eq!(
            SocketConnector::socket_path(Path::new("/run/dmbus"), &peer),
            Path::new("/run/dmbus/dmbus-0-4001.sock")
        );
    }

    #[test]
    fn unix_transport_talks_to_listener() {
        let dir = tempfile::tempdir().unwrap();
        let peer = PeerAddr {
            domain: 0,
            port: 4000,
        };
        let listener = UnixListener::bind(SocketConnector::socket_path(dir.path(), &peer)).unwrap();

        let mut connector = SocketConnector::unix(dir.path());
        let mut t = connector.create().unwrap();
        t.connect(&peer).unwrap();
        let (mut remote, _) = listener.accept().unwrap();

        assert_eq!(t.send(b"ping").unwrap(), 4);
        let mut got = [0u8; 4];
        remote.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"ping");

        let mut buf = [0u8; 8];
        let err = t.recv(&mut buf, RecvMode::NonBlocking).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        remote.write_all(b"pong").unwrap();
        assert_eq!(t.recv(&mut buf, RecvMode::Blocking).unwrap(), 4);
        assert_eq!(&buf[..4], b"pong");

        drop(remote);
        assert_eq!(t.recv(&mut buf, RecvMode::Blocking).unwrap(), 0);
    }

    #[test]
    fn sockets_are_close_on_exec() {
        let dir = tempfile::tempdir().unwrap();
        let t = SocketConnector::unix(dir.path()).create().unwrap();
        // SAFETY: the descriptor stays open while `t` lives.
        let flags = unsafe { libc::fcntl(t.as_raw_fd(), libc::F_GETFD) };
        assert!(flags >= 0);
        assert_ne!(flags & libc::FD_CLOEXEC, 0);
    }

    #[test]
    fn unix_connect_without_listener_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = SocketConnector::unix(dir.path()).create().unwrap();
        assert!(t.connect(&PeerAddr { domain: 0, port: 1 }).is_err());
    }
}
