//! Reverse-update FIFO with single-flight dispatch.
//!
//! Translated reverse commands queue up here and go out one request at a
//! time: the next is handed out only after the previous exchange
//! completed. The queue is bounded; on overflow the oldest pending
//! update is dropped so the newest user intent survives a long outage.

use std::collections::VecDeque;

use tracing::warn;

/// Default bound on pending reverse updates.
pub const MAX_PENDING_UPDATES: usize = 64;

/// FIFO of instance API query strings awaiting dispatch.
#[derive(Debug)]
pub struct UpdateQueue {
    pending: VecDeque<String>,
    in_flight: bool,
    capacity: usize,
}

impl Default for UpdateQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::with_capacity(MAX_PENDING_UPDATES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: false,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether a dispatched request is still awaiting its response.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Nothing queued and nothing outstanding.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && !self.in_flight
    }

    /// Append an update, dropping the oldest pending one on overflow.
    pub fn push(&mut self, query: String) {
        if self.pending.len() >= self.capacity {
            if let Some(dropped) = self.pending.pop_front() {
                warn!(dropped = %dropped, "reverse-update queue full, dropping oldest");
            }
        }
        self.pending.push_back(query);
    }

    /// Hand out the next update, if any and if none is outstanding.
    pub fn take_next(&mut self) -> Option<String> {
        if self.in_flight {
            return None;
        }
        let next = self.pending.pop_front()?;
        self.in_flight = true;
        Some(next)
    }

    /// Mark the outstanding exchange finished (response received or the
    /// connection it used is known closed).
    pub fn complete(&mut self) {
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_is_fifo_and_single_flight() {
        let mut queue = UpdateQueue::new();
        queue.push("?a".into());
        queue.push("?b".into());
        queue.push("?c".into());

        assert_eq!(queue.take_next().as_deref(), Some("?a"));
        // One outstanding: nothing more until completion.
        assert!(queue.take_next().is_none());
        assert!(queue.in_flight());

        queue.complete();
        assert_eq!(queue.take_next().as_deref(), Some("?b"));
        queue.complete();
        assert_eq!(queue.take_next().as_deref(), Some("?c"));
        assert!(queue.is_empty());
        // Still not idle: the last response is outstanding.
        assert!(!queue.is_idle());
        queue.complete();
        assert!(queue.is_idle());
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut queue = UpdateQueue::with_capacity(2);
        queue.push("?a".into());
        queue.push("?b".into());
        queue.push("?c".into());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.take_next().as_deref(), Some("?b"));
        queue.complete();
        assert_eq!(queue.take_next().as_deref(), Some("?c"));
    }

    #[test]
    fn take_on_empty_is_none_and_leaves_state_clean() {
        let mut queue = UpdateQueue::new();
        assert!(queue.take_next().is_none());
        assert!(!queue.in_flight());
        assert!(queue.is_idle());
    }
}
