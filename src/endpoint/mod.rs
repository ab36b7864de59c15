//! One socket's lifecycle: server, in-progress client, or connected stream,
//! under a single concrete type selected by a state tag. A single state
//! field keeps the `wait` loop uniform across all three shapes.
//!
//! Grounded on `struct mq` and `mq_serve`/`mq_connect`/`mq_accept`/
//! `mq_send`/`mq_recv`/`mq_geterror`/`mq_close`/`mq_die` in the original
//! `mq.c`, with the drive loop's ordering preserved exactly: desired
//! events are computed before the previous iteration's revents are applied,
//! not after.

mod recv;
mod send;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::rc::{Rc, Weak};
use std::time::Instant;

use crate::msg::Msg;
use crate::sys::poll::{Interest, Revents};
use crate::sys::socket::{self, LinkFd};
use crate::{errno, sys};

use recv::PartialRecv;
use send::PartialSend;

use std::io;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: i32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Server,
    InProgress,
    Connected,
    Error,
}

enum Link {
    Listener(TcpListener),
    Stream(TcpStream),
}

impl Link {
    fn fd(&self) -> std::os::unix::io::RawFd {
        match self {
            Link::Listener(l) => l.link_fd(),
            Link::Stream(s) => s.link_fd(),
        }
    }

    fn as_stream(&self) -> &TcpStream {
        match self {
            Link::Stream(s) => s,
            Link::Listener(_) => unreachable!("link is a listener, not a stream"),
        }
    }

    fn as_stream_mut(&mut self) -> &mut TcpStream {
        match self {
            Link::Stream(s) => s,
            Link::Listener(_) => unreachable!("link is a listener, not a stream"),
        }
    }

    fn as_listener(&self) -> &TcpListener {
        match self {
            Link::Listener(l) => l,
            Link::Stream(_) => unreachable!("link is a stream, not a listener"),
        }
    }
}

/// The readiness a member currently contributes to the three disjoint
/// PollSet readiness sets it can appear in.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MemberReadiness {
    pub acceptable: bool,
    pub readable: bool,
    pub error: bool,
}

/// Object-safe back-channel from an Endpoint to the PollSet it is a member
/// of, so `Endpoint` itself never becomes generic over the tag type.
/// Implemented once, generically, over `RefCell<PollSetInner<T>>` in
/// `crate::pollset`.
pub(crate) trait PollGroup {
    fn sync_readiness(&self, key: usize, readiness: MemberReadiness);
    fn forget(&self, key: usize);
}

struct PollLink {
    group: Weak<dyn PollGroup>,
    key: usize,
}

pub(crate) struct EndpointInner {
    link: Link,
    state: State,
    err: Option<io::Error>,
    send_queue: VecDeque<Msg>,
    send_current: Option<PartialSend>,
    recv_current: Option<PartialRecv>,
    recv_ready: Option<Msg>,
    accept_ready: Option<Endpoint>,
    poll_link: Option<PollLink>,
}

impl EndpointInner {
    fn server(listener: TcpListener) -> EndpointInner {
        EndpointInner {
            link: Link::Listener(listener),
            state: State::Server,
            err: None,
            send_queue: VecDeque::new(),
            send_current: None,
            recv_current: None,
            recv_ready: None,
            accept_ready: None,
            poll_link: None,
        }
    }

    fn in_progress(stream: TcpStream) -> EndpointInner {
        EndpointInner {
            link: Link::Stream(stream),
            state: State::InProgress,
            err: None,
            send_queue: VecDeque::new(),
            send_current: None,
            recv_current: None,
            recv_ready: None,
            accept_ready: None,
            poll_link: None,
        }
    }

    fn connected(stream: TcpStream) -> EndpointInner {
        EndpointInner {
            link: Link::Stream(stream),
            state: State::Connected,
            err: None,
            send_queue: VecDeque::new(),
            send_current: None,
            recv_current: None,
            recv_ready: None,
            accept_ready: None,
            poll_link: None,
        }
    }
}

impl Drop for EndpointInner {
    fn drop(&mut self) {
        detach(self);
    }
}

fn detach(inner: &mut EndpointInner) {
    if let Some(link) = inner.poll_link.take() {
        if let Some(group) = link.group.upgrade() {
            group.forget(link.key);
        }
    }
}

fn current_readiness(inner: &EndpointInner) -> MemberReadiness {
    MemberReadiness {
        acceptable: matches!(inner.state, State::Server) && inner.accept_ready.is_some(),
        readable: !matches!(inner.state, State::Server) && inner.recv_ready.is_some(),
        error: matches!(inner.state, State::Error),
    }
}

fn sync_group(inner: &EndpointInner) {
    if let Some(link) = &inner.poll_link {
        if let Some(group) = link.group.upgrade() {
            group.sync_readiness(link.key, current_readiness(inner));
        }
    }
}

/// A handle to one socket: server, in-progress client, or connected
/// stream. Cloning shares the same underlying state — the handle is
/// reference-counted, not duplicated — the way a caller and a PollSet
/// both need to refer to the same Endpoint without either owning it
/// exclusively.
///
/// `Endpoint` is deliberately `!Send`/`!Sync` (its `Rc<RefCell<..>>`
/// interior): driving the same Endpoint from two threads at once, which
/// would otherwise be undefined behavior, is a compile error instead.
#[derive(Clone)]
pub struct Endpoint {
    inner: Rc<RefCell<EndpointInner>>,
}

impl Endpoint {
    pub(crate) fn from_inner(inner: EndpointInner) -> Endpoint {
        Endpoint {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    pub(crate) fn inner_rc(&self) -> &Rc<RefCell<EndpointInner>> {
        &self.inner
    }

    /// Binds and listens non-blockingly with the default backlog.
    pub fn serve(addr: SocketAddr) -> io::Result<Endpoint> {
        Endpoint::serve_with_backlog(addr, DEFAULT_BACKLOG)
    }

    /// Binds and listens non-blockingly with an explicit backlog depth.
    pub fn serve_with_backlog(addr: SocketAddr, backlog: i32) -> io::Result<Endpoint> {
        let listener = socket::serve_nonblocking(addr, backlog)?;
        trace!("endpoint: created in SERVER state on {}", addr);
        Ok(Endpoint::from_inner(EndpointInner::server(listener)))
    }

    /// Initiates a non-blocking connect. Returns immediately in the
    /// INPROGRESS state; resolution to CONNECTED or ERROR is discovered
    /// through `wait`.
    pub fn connect(addr: SocketAddr) -> io::Result<Endpoint> {
        let stream = socket::connect_nonblocking(addr)?;
        trace!("endpoint: created in INPROGRESS state, connecting to {}", addr);
        Ok(Endpoint::from_inner(EndpointInner::in_progress(stream)))
    }

    /// Returns the `accept_ready` child Endpoint, if any, transferring
    /// ownership and clearing this SERVER's `acceptable` readiness.
    pub fn accept(&self) -> Option<Endpoint> {
        let mut inner = self.inner.borrow_mut();
        let child = inner.accept_ready.take();
        if child.is_some() {
            sync_group(&inner);
        }
        child
    }

    /// Appends `msg` to the send queue. Never blocks; takes ownership.
    /// Safe to call on an errored Endpoint — the message is simply
    /// dropped along with everything else once the Endpoint itself is
    /// dropped, since an errored Endpoint never drains its queue again.
    pub fn send(&self, msg: Msg) {
        self.inner.borrow_mut().send_queue.push_back(msg);
    }

    /// Returns the `recv_ready` message, if any, transferring ownership
    /// and clearing this Endpoint's `readable` readiness.
    pub fn recv(&self) -> Option<Msg> {
        let mut inner = self.inner.borrow_mut();
        let msg = inner.recv_ready.take();
        if msg.is_some() {
            sync_group(&inner);
        }
        msg
    }

    /// Returns the latched error if this Endpoint is in state ERROR, or
    /// `None` otherwise (including clean peer close, which latches no
    /// error).
    pub fn geterror(&self) -> Option<io::Error> {
        let inner = self.inner.borrow();
        inner.err.as_ref().map(clone_io_error)
    }

    /// True once this Endpoint has transitioned to ERROR.
    pub fn is_error(&self) -> bool {
        matches!(self.inner.borrow().state, State::Error)
    }

    /// True once an in-progress connect has resolved successfully.
    pub fn is_connected(&self) -> bool {
        matches!(self.inner.borrow().state, State::Connected)
    }

    /// The address this Endpoint is bound to (for a SERVER) or connected
    /// to (for an in-progress or connected client).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.inner.borrow().link {
            Link::Listener(l) => l.local_addr(),
            Link::Stream(s) => s.local_addr(),
        }
    }

    /// Identity comparison: true if `self` and `other` are handles onto
    /// the same underlying Endpoint state, the way a caller can confirm a
    /// `PollSet<Endpoint>` readiness tag is the Endpoint it expects.
    pub fn ptr_eq(&self, other: &Endpoint) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Drives this Endpoint in isolation until it has something of
    /// interest to report (a complete `recv_ready` message, an
    /// `accept_ready` child, or an ERROR transition) or `deadline` passes.
    /// Returns `1` if ready, `0` on timeout.
    pub fn wait(&self, deadline: Instant) -> io::Result<usize> {
        let mut last_revents = Revents::default();
        loop {
            let interest = desired_interest(&self.inner.borrow());

            {
                let mut inner = self.inner.borrow_mut();
                apply_revents(&mut inner, last_revents);
            }

            if self.ready_now() {
                return Ok(1);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }

            let fd = self.inner.borrow().link.fd();
            last_revents = sys::poll::poll_one(fd, interest, Some(deadline - now))?;
        }
    }

    fn ready_now(&self) -> bool {
        let inner = self.inner.borrow();
        matches!(inner.state, State::Error) || inner.recv_ready.is_some() || inner.accept_ready.is_some()
    }

    /// Drives this Endpoint to ERROR, drops all owned Msgs and in-progress
    /// cursors, and detaches it from any PollSet it belonged to — eagerly,
    /// not only once the last clone of the handle is dropped. A PollSet
    /// keeps its own clone of every member, so without this the connection
    /// would otherwise live on inside the set after the caller's own
    /// handle is gone: still open, still driven by `wait`, never removed.
    /// The underlying socket itself closes once that last clone (the
    /// PollSet's, now released here) actually drops.
    pub fn close(self) {
        let mut inner = self.inner.borrow_mut();
        detach(&mut inner);
        fail(&mut inner, None);
        trace!("endpoint: closed explicitly");
    }
}

fn clone_io_error(e: &io::Error) -> io::Error {
    match e.raw_os_error() {
        Some(code) => io::Error::from_raw_os_error(code),
        None => io::Error::new(e.kind(), e.to_string()),
    }
}

/// Step 1 of the drive loop: the events this Endpoint currently wants to
/// be polled for, computed from its state alone.
pub(crate) fn desired_interest(inner: &EndpointInner) -> Interest {
    match inner.state {
        State::Server => Interest {
            readable: inner.accept_ready.is_none(),
            writable: false,
        },
        State::InProgress => Interest {
            readable: false,
            writable: true,
        },
        State::Connected => Interest {
            writable: inner.send_current.is_some() || !inner.send_queue.is_empty(),
            readable: inner.recv_ready.is_none(),
        },
        State::Error => Interest::NONE,
    }
}

/// Steps 2-3 of the drive loop: harvest the previous iteration's revents
/// and update this Endpoint's contribution to any PollSet it belongs to.
pub(crate) fn apply_revents(inner: &mut EndpointInner, revents: Revents) {
    match inner.state {
        State::InProgress => {
            if revents.writable || revents.error {
                match resolve_connect(&inner.link) {
                    Ok(()) => {
                        trace!("endpoint: INPROGRESS -> CONNECTED");
                        inner.state = State::Connected;
                    }
                    Err(e) => {
                        trace!("endpoint: INPROGRESS -> ERROR ({})", e);
                        fail(inner, Some(e));
                    }
                }
            }
        }
        State::Connected => {
            if revents.writable {
                let stream = inner.link.as_stream_mut();
                let outcome = send::flush_send(stream, &mut inner.send_queue, &mut inner.send_current);
                if let Err(e) = outcome {
                    trace!("endpoint: CONNECTED -> ERROR on send ({})", e);
                    fail(inner, classify_close(e));
                }
            }

            if matches!(inner.state, State::Connected) && revents.readable && inner.recv_ready.is_none() {
                let stream = inner.link.as_stream_mut();
                match recv::flush_recv(stream, &mut inner.recv_current) {
                    Ok(Some(msg)) => {
                        trace!("endpoint: received a complete message ({} bytes)", msg.len());
                        inner.recv_ready = Some(msg);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        trace!("endpoint: CONNECTED -> ERROR on recv ({})", e);
                        fail(inner, classify_close(e));
                    }
                }
            }
        }
        State::Server => {
            if revents.readable && inner.accept_ready.is_none() {
                match socket::accept_nonblocking(inner.link.as_listener()) {
                    Ok(Some(stream)) => {
                        debug!("endpoint: accepted a new connection");
                        inner.accept_ready = Some(Endpoint::from_inner(EndpointInner::connected(stream)));
                    }
                    Ok(None) => {}
                    Err(e) if errno::is_transient(&e) => {}
                    Err(e) => {
                        trace!("endpoint: SERVER -> ERROR on accept ({})", e);
                        fail(inner, Some(e));
                    }
                }
            }
        }
        State::Error => {}
    }

    sync_group(inner);
}

fn resolve_connect(link: &Link) -> io::Result<()> {
    match socket::take_error(link.as_stream())? {
        None => Ok(()),
        Some(e) => Err(e),
    }
}

/// `UnexpectedEof` means a clean peer close, latched as no error at all;
/// every other error is latched verbatim.
fn classify_close(e: io::Error) -> Option<io::Error> {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        None
    } else {
        Some(e)
    }
}

fn fail(inner: &mut EndpointInner, err: Option<io::Error>) {
    inner.state = State::Error;
    inner.err = err;
    inner.send_queue.clear();
    inner.send_current = None;
    inner.recv_current = None;
    inner.recv_ready = None;
    inner.accept_ready = None;
}

pub(crate) fn link_fd(inner: &EndpointInner) -> std::os::unix::io::RawFd {
    inner.link.fd()
}

/// Records that `inner` is now a member of `group` under `key`. Called by
/// `PollSet::add` after inserting the member into its arena.
pub(crate) fn attach(inner: &mut EndpointInner, group: Weak<dyn PollGroup>, key: usize) {
    inner.poll_link = Some(PollLink { group, key });
}

/// The group and slab key this Endpoint is currently attached to, if any
/// — used by `PollSet::add`/`remove` to tell "already in this set" from
/// "belongs to a different set" without calling back into the group
/// itself.
pub(crate) fn current_group(inner: &EndpointInner) -> Option<(&Weak<dyn PollGroup>, usize)> {
    inner.poll_link.as_ref().map(|link| (&link.group, link.key))
}

/// Pushes this Endpoint's current readiness into the group it is attached
/// to, if any. Called right after `attach` so a freshly added member's
/// already-true readiness (if any) is reflected without waiting for the
/// next drive cycle.
pub(crate) fn sync_membership(inner: &EndpointInner) {
    sync_group(inner);
}

/// Clears the back-reference without notifying the group — used by
/// `PollSet::remove`, which has already removed the member from its own
/// arena and readiness sets directly.
pub(crate) fn clear_group(inner: &mut EndpointInner) {
    inner.poll_link = None;
}
