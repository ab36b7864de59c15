//! Platform glue: a non-blocking connect/serve/accept link layer and a
//! thin `libc::poll` wrapper.

pub mod poll;
pub mod socket;
