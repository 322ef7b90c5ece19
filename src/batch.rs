use std::collections::VecDeque;

/// A queued write. Superseded by any later update with the same `id`.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingUpdate<T> {
    pub id: String,
    pub data: T,
    pub timestamp: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddResult {
    /// Cap reached; flush now.
    Full,
    /// Flush once the window elapses.
    Waiting,
}

/// Keyed write coalescer bounded by count (`max_pending`) or time
/// (`window_ms`, enforced by the owner's timer).
#[derive(Debug)]
pub struct Batcher<T> {
    pending: VecDeque<PendingUpdate<T>>,
    max_pending: usize,
    window_ms: i64,
}

impl<T> Batcher<T> {
    pub fn new(max_pending: usize, window_ms: i64) -> Self {
        Self {
            pending: VecDeque::new(),
            max_pending: max_pending.max(1),
            window_ms,
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn add(&mut self, id: &str, data: T, timestamp: i64) -> AddResult {
        self.pending.retain(|u| u.id != id);
        self.pending.push_back(PendingUpdate {
            id: id.to_string(),
            data,
            timestamp,
        });
        if self.pending.len() >= self.max_pending {
            AddResult::Full
        } else {
            AddResult::Waiting
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<PendingUpdate<T>> {
        let idx = self.pending.iter().position(|u| u.id == id)?;
        self.pending.remove(idx)
    }

    pub fn take(&mut self) -> Vec<PendingUpdate<T>> {
        self.pending.drain(..).collect()
    }

    /// Put a failed batch back at the front for the next flush.
    ///
    /// An id that was re-added after the batch was taken is newer than the
    /// failed copy, so the failed copy is dropped.
    pub fn requeue_front(&mut self, failed: Vec<PendingUpdate<T>>) {
        for update in failed.into_iter().rev() {
            if self.pending.iter().any(|u| u.id == update.id) {
                continue;
            }
            self.pending.push_front(update);
        }
    }

    pub fn get(&self, id: &str) -> Option<&PendingUpdate<T>> {
        self.pending.iter().find(|u| u.id == id)
    }
}
