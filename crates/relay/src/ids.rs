//! Process-wide identity counters.
//!
//! Requests, responses, inbound connections and contexts each carry an id that is unique
//! for the lifetime of the process. The counters are monotonic and never reclaimed.

use std::sync::atomic::{AtomicU64, Ordering};

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);
static RESPONSE_COUNTER: AtomicU64 = AtomicU64::new(0);
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);
static CONTEXT_COUNTER: AtomicU64 = AtomicU64::new(0);

#[inline]
fn next(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

pub(crate) fn next_request_id() -> u64 {
    next(&REQUEST_COUNTER)
}

pub(crate) fn next_response_id() -> u64 {
    next(&RESPONSE_COUNTER)
}

pub(crate) fn next_connection_id() -> u64 {
    next(&CONNECTION_COUNTER)
}

pub(crate) fn next_context_id() -> u64 {
    next(&CONTEXT_COUNTER)
}
