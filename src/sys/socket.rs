//! The minimal non-blocking stream-socket link layer the transport core
//! consumes from the environment: `serve`, `connect`, `accept`, and a
//! raw-fd accessor for polling.
//!
//! `serve`/`accept` are thin non-blocking wrappers over `std::net`: bind or
//! accept, then immediately call `set_nonblocking(true)`.
//! `connect` cannot reuse `std::net::TcpStream::connect` directly because
//! that call blocks until the connection resolves; a non-blocking connect
//! that returns immediately with `EINPROGRESS` needs the raw libc socket
//! calls below instead.

use std::io;
use std::net::{self, SocketAddr};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn raw_socket(family: libc::c_int) -> io::Result<RawFd> {
    match cvt(unsafe { libc::socket(family, libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC, 0) }) {
        Ok(fd) => Ok(fd),
        Err(ref e) if e.raw_os_error() == Some(libc::EINVAL) => {
            // Kernel doesn't understand the SOCK_* flags baked into the
            // type argument; fall back and set them individually.
            let fd = cvt(unsafe { libc::socket(family, libc::SOCK_STREAM, 0) })?;
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL, 0);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
            Ok(fd)
        }
        Err(e) => Err(e),
    }
}

/// Initiates a non-blocking connect. Returns immediately once the
/// underlying socket has been created and `connect()` issued; the caller
/// discovers resolution (`CONNECTED` vs `ERROR`) later via `wait`.
pub(crate) fn connect_nonblocking(addr: SocketAddr) -> io::Result<net::TcpStream> {
    let family = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };

    let fd = raw_socket(family)?;

    let (sockaddr, len) = sockaddr_from(&addr);
    let ret = unsafe { libc::connect(fd, &sockaddr as *const _ as *const libc::sockaddr, len) };

    if ret == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINPROGRESS) {
            unsafe { libc::close(fd) };
            return Err(err);
        }
    }

    Ok(unsafe { net::TcpStream::from_raw_fd(fd) })
}

fn sockaddr_from(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    unsafe {
        let mut storage: libc::sockaddr_storage = std::mem::zeroed();
        let len = match addr {
            SocketAddr::V4(a) => {
                let sin = &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in);
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = a.port().to_be();
                sin.sin_addr.s_addr = u32::from_ne_bytes(a.ip().octets());
                std::mem::size_of::<libc::sockaddr_in>()
            }
            SocketAddr::V6(a) => {
                let sin6 = &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6);
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = a.port().to_be();
                sin6.sin6_addr.s6_addr = a.ip().octets();
                sin6.sin6_flowinfo = a.flowinfo();
                sin6.sin6_scope_id = a.scope_id();
                std::mem::size_of::<libc::sockaddr_in6>()
            }
        };
        (storage, len as libc::socklen_t)
    }
}

/// Binds and listens non-blockingly with an explicit backlog depth, via
/// `net2::TcpBuilder` instead of `std::net::TcpListener::bind` since the
/// latter has no way to configure a backlog other than the platform
/// default.
pub(crate) fn serve_nonblocking(addr: SocketAddr, backlog: i32) -> io::Result<net::TcpListener> {
    let builder = if addr.is_ipv4() {
        net2::TcpBuilder::new_v4()?
    } else {
        net2::TcpBuilder::new_v6()?
    };
    builder.reuse_address(true)?;
    builder.bind(addr)?;
    let listener = builder.listen(backlog)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Accepts one pending connection, if any, without blocking.
pub(crate) fn accept_nonblocking(listener: &net::TcpListener) -> io::Result<Option<net::TcpStream>> {
    match listener.accept() {
        Ok((stream, _addr)) => {
            stream.set_nonblocking(true)?;
            Ok(Some(stream))
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e),
    }
}

/// The socket-level pending error query (`SO_ERROR`) used to resolve an
/// in-progress connect.
pub(crate) fn take_error(stream: &net::TcpStream) -> io::Result<Option<io::Error>> {
    stream.take_error()
}

pub(crate) trait LinkFd {
    fn link_fd(&self) -> RawFd;
}

impl LinkFd for net::TcpStream {
    fn link_fd(&self) -> RawFd {
        self.as_raw_fd()
    }
}

impl LinkFd for net::TcpListener {
    fn link_fd(&self) -> RawFd {
        self.as_raw_fd()
    }
}
