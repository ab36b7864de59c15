//! A non-blocking, length-prefixed message transport over stream sockets,
//! driven by a single-threaded, `poll(2)`-based multiplexer.
//!
//! Three pieces, leaves first:
//!
//! - [`Msg`] — an owned byte buffer plus a type tag.
//! - [`Endpoint`] — one socket's lifecycle: server, in-progress client, or
//!   connected stream, with its send queue and in-progress receive.
//! - [`PollSet`] — a collection of Endpoints with three derived readiness
//!   sets (acceptable, readable, error), each keyed by a caller-supplied
//!   opaque tag.
//!
//! Callers enqueue outgoing [`Msg`]s on an [`Endpoint`] with
//! [`Endpoint::send`]; during [`Endpoint::wait`] (or [`PollSet::wait`] for
//! many Endpoints at once) the Endpoint drains its queue via non-blocking
//! writes and assembles an inbound `Msg` via non-blocking reads.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::{Duration, Instant};
//! use mqio::{Endpoint, Msg, PollSet};
//!
//! let addr = "127.0.0.1:7000".parse().unwrap();
//! let server = Endpoint::serve(addr).unwrap();
//! let client = Endpoint::connect(addr).unwrap();
//!
//! let deadline = Instant::now() + Duration::from_secs(1);
//! client.send(Msg::wrap_buffer(b"hello"));
//! client.wait(deadline).ok();
//!
//! let pollset: PollSet<Endpoint> = PollSet::new();
//! pollset.add_self(&server).unwrap();
//! pollset.wait(Instant::now() + Duration::from_secs(1)).ok();
//! if let Some(ep) = pollset.acceptable() {
//!     if let Some(child) = ep.accept() {
//!         if let Some(msg) = child.recv() {
//!             assert_eq!(msg.as_bytes(), b"hello");
//!         }
//!     }
//! }
//! ```
//!
//! The core is deliberately single-threaded: [`Endpoint`] and [`PollSet`]
//! are `!Send`/`!Sync`. Driving many connections concurrently means
//! driving many single-threaded [`PollSet`]s on their own threads, not
//! sharing one across threads.

#[macro_use]
extern crate log;

mod endpoint;
mod errno;
mod header;
mod msg;
mod pollset;
mod sys;

pub use endpoint::{Endpoint, DEFAULT_BACKLOG};
pub use msg::{Msg, MsgType};
pub use pollset::PollSet;
