//! Classification of the errnos that the transport treats as "try again
//! later" rather than as a fatal, state-changing failure.
//!
//! Grounded on `errno_is_temporary` in the original `mq.c`.

use std::io;

/// Returns true if `err` indicates the syscall should simply be retried on
/// the next readiness notification, rather than poisoning the endpoint.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    match err.raw_os_error() {
        Some(libc::EINTR)
        | Some(libc::EWOULDBLOCK)
        | Some(libc::EAGAIN)
        | Some(libc::EINPROGRESS)
        | Some(libc::EALREADY)
        | Some(libc::EISCONN) => true,
        _ => err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::Interrupted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errnos_are_recognized() {
        for code in [
            libc::EINTR,
            libc::EWOULDBLOCK,
            libc::EAGAIN,
            libc::EINPROGRESS,
            libc::EALREADY,
            libc::EISCONN,
        ] {
            assert!(is_transient(&io::Error::from_raw_os_error(code)));
        }
    }

    #[test]
    fn fatal_errnos_are_not_transient() {
        assert!(!is_transient(&io::Error::from_raw_os_error(
            libc::ECONNREFUSED
        )));
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::EPIPE)));
    }
}
