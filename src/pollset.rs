//! A collection of Endpoints with three derived readiness sets —
//! `acceptable`, `readable`, `error` — each carrying a caller-supplied
//! opaque tag.
//!
//! Grounded on `struct mq_poll` and `mq_poll_add`/`rm`/`wait`/`acceptable`/
//! `readable`/`error` in the original `mq.c`. The member arena uses
//! `slab::Slab`, a dense, reusable-key collection; the readiness sets use
//! `indexmap::IndexSet` so that `acceptable`/`readable`/`error` have a
//! deterministic insertion order rather than the arbitrary order a plain
//! `HashSet` would give.

use std::cell::RefCell;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::time::Instant;

use indexmap::IndexSet;
use slab::Slab;

use crate::endpoint::{self, Endpoint, MemberReadiness, PollGroup};
use crate::sys::poll::{Interest, Revents};
use crate::sys;

struct Member<T> {
    ep: Endpoint,
    tag: T,
}

struct PollSetInner<T> {
    members: Slab<Member<T>>,
    acceptable: IndexSet<usize>,
    readable: IndexSet<usize>,
    error: IndexSet<usize>,
}

impl<T> PollGroup for RefCell<PollSetInner<T>> {
    fn sync_readiness(&self, key: usize, r: MemberReadiness) {
        let mut inner = self.borrow_mut();
        if !inner.members.contains(key) {
            return;
        }
        toggle(&mut inner.acceptable, key, r.acceptable);
        toggle(&mut inner.readable, key, r.readable);
        toggle(&mut inner.error, key, r.error);
    }

    fn forget(&self, key: usize) {
        let mut inner = self.borrow_mut();
        if inner.members.contains(key) {
            inner.members.remove(key);
        }
        inner.acceptable.shift_remove(&key);
        inner.readable.shift_remove(&key);
        inner.error.shift_remove(&key);
    }
}

impl<T> Drop for PollSetInner<T> {
    fn drop(&mut self) {
        // Clear each member's back reference; members themselves outlive
        // the set they were added to.
        for (_, member) in self.members.iter() {
            endpoint::clear_group(&mut member.ep.inner_rc().borrow_mut());
        }
    }
}

fn toggle(set: &mut IndexSet<usize>, key: usize, present: bool) {
    if present {
        set.insert(key);
    } else {
        set.shift_remove(&key);
    }
}

/// A multiplexer over many Endpoints, reporting readiness via a
/// caller-supplied tag of type `T`. Like `Endpoint`, this is a
/// reference-counted handle over a `!Send`/`!Sync` interior.
pub struct PollSet<T> {
    inner: Rc<RefCell<PollSetInner<T>>>,
}

impl<T> Clone for PollSet<T> {
    fn clone(&self) -> Self {
        PollSet {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for PollSet<T> {
    fn default() -> Self {
        PollSet::new()
    }
}

impl<T> PollSet<T> {
    pub fn new() -> PollSet<T> {
        PollSet::with_capacity(0)
    }

    /// `capacity` is a hint for the member arena's initial allocation.
    pub fn with_capacity(capacity: usize) -> PollSet<T> {
        PollSet {
            inner: Rc::new(RefCell::new(PollSetInner {
                members: Slab::with_capacity(capacity),
                acceptable: IndexSet::new(),
                readable: IndexSet::new(),
                error: IndexSet::new(),
            })),
        }
    }

    fn as_group(&self) -> Weak<dyn PollGroup> {
        Rc::downgrade(&self.inner)
    }

    /// Adds `ep` with the given `tag`. Fails with `AlreadyExists` if `ep`
    /// is already a member of this set, or `InvalidInput` if it belongs
    /// to a different set.
    pub fn add(&self, ep: &Endpoint, tag: T) -> io::Result<()> {
        {
            let ep_inner = ep.inner_rc().borrow();
            if let Some((group, _key)) = endpoint::current_group(&ep_inner) {
                return if Weak::ptr_eq(group, &self.as_group()) {
                    Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "endpoint is already a member of this poll set",
                    ))
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "endpoint already belongs to a different poll set",
                    ))
                };
            }
        }

        let key = self
            .inner
            .borrow_mut()
            .members
            .insert(Member { ep: ep.clone(), tag });

        let ep_inner_rc = ep.inner_rc();
        endpoint::attach(&mut ep_inner_rc.borrow_mut(), self.as_group(), key);
        endpoint::sync_membership(&ep_inner_rc.borrow());
        debug!("pollset: added endpoint (key {})", key);
        Ok(())
    }

    /// Removes `ep` from this set. Fails with `NotFound` if it is not a
    /// member.
    pub fn remove(&self, ep: &Endpoint) -> io::Result<()> {
        let key = {
            let ep_inner = ep.inner_rc().borrow();
            match endpoint::current_group(&ep_inner) {
                Some((group, key)) if Weak::ptr_eq(group, &self.as_group()) => key,
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        "endpoint is not a member of this poll set",
                    ))
                }
            }
        };

        {
            let mut inner = self.inner.borrow_mut();
            inner.members.remove(key);
            inner.acceptable.shift_remove(&key);
            inner.readable.shift_remove(&key);
            inner.error.shift_remove(&key);
        }

        endpoint::clear_group(&mut ep.inner_rc().borrow_mut());
        debug!("pollset: removed endpoint (key {})", key);
        Ok(())
    }

    /// Drives every member, returning the number of Endpoints currently
    /// ready across all three sets, `0` on timeout, or the first fatal
    /// polling error.
    pub fn wait(&self, deadline: Instant) -> io::Result<usize> {
        let mut prev_members: Vec<Endpoint> = Vec::new();
        let mut prev_revents: Vec<Revents> = Vec::new();

        loop {
            let (members, fds, interests) = self.snapshot();

            for (member, revents) in prev_members.iter().zip(prev_revents.iter()) {
                endpoint::apply_revents(&mut member.inner_rc().borrow_mut(), *revents);
            }

            let ready = self.ready_count();
            if ready > 0 {
                return Ok(ready);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }

            prev_revents = sys::poll::poll_many(&fds, &interests, Some(deadline - now))?;
            prev_members = members;
        }
    }

    fn snapshot(&self) -> (Vec<Endpoint>, Vec<RawFd>, Vec<Interest>) {
        let inner = self.inner.borrow();
        let mut members = Vec::with_capacity(inner.members.len());
        let mut fds = Vec::with_capacity(inner.members.len());
        let mut interests = Vec::with_capacity(inner.members.len());
        for (_, member) in inner.members.iter() {
            let ep_inner = member.ep.inner_rc().borrow();
            fds.push(endpoint::link_fd(&ep_inner));
            interests.push(endpoint::desired_interest(&ep_inner));
            drop(ep_inner);
            members.push(member.ep.clone());
        }
        (members, fds, interests)
    }

    fn ready_count(&self) -> usize {
        let inner = self.inner.borrow();
        inner.acceptable.len() + inner.readable.len() + inner.error.len()
    }
}

impl<T: Clone> PollSet<T> {
    /// Some Endpoint currently in the `acceptable` set, or `None`.
    /// Membership persists until consumed by `Endpoint::accept`.
    pub fn acceptable(&self) -> Option<T> {
        self.tag_from(|inner| inner.acceptable.iter().next().copied())
    }

    /// Some Endpoint currently in the `readable` set, or `None`.
    /// Membership persists until consumed by `Endpoint::recv`.
    pub fn readable(&self) -> Option<T> {
        self.tag_from(|inner| inner.readable.iter().next().copied())
    }

    /// Some Endpoint currently in the `error` set, or `None`. Membership
    /// is permanent — ERROR is terminal.
    pub fn error(&self) -> Option<T> {
        self.tag_from(|inner| inner.error.iter().next().copied())
    }

    fn tag_from(&self, pick: impl FnOnce(&PollSetInner<T>) -> Option<usize>) -> Option<T> {
        let inner = self.inner.borrow();
        let key = pick(&inner)?;
        inner.members.get(key).map(|m| m.tag.clone())
    }
}

impl PollSet<Endpoint> {
    /// The common case where no separate tag type is needed: the
    /// Endpoint's own handle is its own tag.
    pub fn add_self(&self, ep: &Endpoint) -> io::Result<()> {
        self.add(ep, ep.clone())
    }
}
