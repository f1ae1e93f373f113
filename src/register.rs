//! Running filter requests, one per filter id.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use futures::stream::{AbortHandle, AbortRegistration};

use crate::rule::FilterId;

/// Identifies one run of a filter. Older runs of the same filter id are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub filter_id: FilterId,
    pub seq: u64,
}

#[derive(Debug)]
struct Registration {
    seq: u64,
    handle: AbortHandle,
}

#[derive(Debug, Default)]
struct RegisterState {
    next_seq: u64,
    runs: BTreeMap<FilterId, Registration>,
}

/// Shared handle, cloning it gives access to the same register.
#[derive(Debug, Clone, Default)]
pub struct IntervalRegister {
    state: Arc<Mutex<RegisterState>>,
}

impl IntervalRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new run for `filter_id`, aborting the one before.
    pub fn start(&self, filter_id: FilterId) -> (AbortRegistration, Ticket) {
        let (handle, registration) = AbortHandle::new_pair();
        let mut ticket = Ticket { filter_id, seq: 0 };
        if let Ok(mut q) = self.state.lock() {
            q.next_seq += 1;
            ticket.seq = q.next_seq;
            let previous = q.runs.insert(
                filter_id,
                Registration {
                    seq: ticket.seq,
                    handle,
                },
            );
            if let Some(p) = previous {
                tracing::debug!(filter_id, seq = p.seq, "aborting previous run");
                p.handle.abort();
            }
        }
        (registration, ticket)
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        match self.state.lock() {
            Ok(q) => q
                .runs
                .get(&ticket.filter_id)
                .map(|r| r.seq == ticket.seq)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Unregisters a run that completed. No-op if it was replaced.
    pub fn finish(&self, ticket: &Ticket) {
        if let Ok(mut q) = self.state.lock() {
            let current = q
                .runs
                .get(&ticket.filter_id)
                .map(|r| r.seq == ticket.seq)
                .unwrap_or(false);
            if current {
                q.runs.remove(&ticket.filter_id);
            }
        }
    }

    /// Aborts and unregisters the run of `filter_id`.
    /// Returns `false` if nothing was running.
    pub fn stop(&self, filter_id: FilterId) -> bool {
        let removed = match self.state.lock() {
            Ok(mut q) => q.runs.remove(&filter_id),
            Err(_) => None,
        };
        match removed {
            Some(r) => {
                r.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, filter_id: FilterId) -> bool {
        self.state
            .lock()
            .map(|q| q.runs.contains_key(&filter_id))
            .unwrap_or(false)
    }
}
