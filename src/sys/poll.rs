//! Thin wrapper over `libc::poll`: EINTR is swallowed and reported as "no
//! events" rather than propagated as an error, so a signal interrupting the
//! sleep causes the outer wait to return 0 rather than bubbling up an
//! `Interrupted` error.

use std::convert::TryInto;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub(crate) const READABLE: i16 = libc::POLLIN;
pub(crate) const WRITABLE: i16 = libc::POLLOUT;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const NONE: Interest = Interest {
        readable: false,
        writable: false,
    };

    fn events(self) -> i16 {
        let mut out = 0;
        if self.readable {
            out |= READABLE;
        }
        if self.writable {
            out |= WRITABLE;
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Revents {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

fn to_timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    timeout
        .map(|d| std::cmp::min(d.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
        .unwrap_or(-1)
}

/// Polls a single fd for the given interest. Used by `Endpoint::wait`.
pub(crate) fn poll_one(
    fd: RawFd,
    interest: Interest,
    timeout: Option<Duration>,
) -> io::Result<Revents> {
    let mut pfd = libc::pollfd {
        fd,
        events: interest.events(),
        revents: 0,
    };

    let ret = unsafe { libc::poll(&mut pfd, 1, to_timeout_ms(timeout)) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
        return Ok(Revents::default());
    }

    Ok(decode(pfd.revents))
}

/// Polls an array of fds. Used by `PollSet::wait`. `fds` and `interests`
/// must be the same length; the output is parallel to both.
pub(crate) fn poll_many(
    fds: &[RawFd],
    interests: &[Interest],
    timeout: Option<Duration>,
) -> io::Result<Vec<Revents>> {
    debug_assert_eq!(fds.len(), interests.len());

    let mut pfds: Vec<libc::pollfd> = fds
        .iter()
        .zip(interests.iter())
        .map(|(&fd, &interest)| libc::pollfd {
            fd,
            events: interest.events(),
            revents: 0,
        })
        .collect();

    let ret = unsafe {
        libc::poll(
            pfds.as_mut_ptr(),
            pfds.len().try_into().unwrap(),
            to_timeout_ms(timeout),
        )
    };

    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
        return Ok(vec![Revents::default(); pfds.len()]);
    }

    Ok(pfds.iter().map(|p| decode(p.revents)).collect())
}

fn decode(revents: i16) -> Revents {
    Revents {
        readable: revents & (libc::POLLIN | libc::POLLPRI) != 0,
        writable: revents & libc::POLLOUT != 0,
        error: revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0,
    }
}
