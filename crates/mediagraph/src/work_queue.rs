//! Deferred completions keyed by (owner, sequence number)
//!
//! A request that finished synchronously is ready at once; one that returned
//! [`Completion::Pending`] waits for a matching [`WorkQueue::complete`].
//! Ready items are handed out in the order they became ready and run on the
//! control thread, never inside the call that queued them.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::implementation::{Completion, ImplError};

pub type WorkId = u64;

/// A work item whose request has finished.
#[derive(Debug)]
pub struct ReadyWork<O, T> {
    pub id: WorkId,
    pub owner: O,
    pub result: Result<(), ImplError>,
    pub work: T,
}

#[derive(Debug)]
struct Waiting<O, T> {
    id: WorkId,
    owner: O,
    seq: u32,
    work: T,
}

#[derive(Debug)]
pub struct WorkQueue<O, T> {
    waiting: Vec<Waiting<O, T>>,
    ready: VecDeque<ReadyWork<O, T>>,
    next_id: WorkId,
}

impl<O, T> Default for WorkQueue<O, T> {
    fn default() -> Self {
        Self {
            waiting: Vec::new(),
            ready: VecDeque::new(),
            next_id: 1,
        }
    }
}

impl<O: Copy + PartialEq + std::fmt::Debug, T> WorkQueue<O, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, owner: O, completion: Completion, work: T) -> WorkId {
        let id = self.next_id;
        self.next_id += 1;

        match completion {
            Completion::Done => {
                trace!(?owner, id, "work ready");
                self.ready.push_back(ReadyWork {
                    id,
                    owner,
                    result: Ok(()),
                    work,
                });
            }
            Completion::Pending(seq) => {
                trace!(?owner, id, seq, "work waiting");
                self.waiting.push(Waiting {
                    id,
                    owner,
                    seq,
                    work,
                });
            }
        }
        id
    }

    /// Mark the request `seq` of `owner` finished. Returns false when
    /// nothing was waiting for it.
    pub fn complete(&mut self, owner: O, seq: u32, result: Result<(), ImplError>) -> bool {
        let Some(pos) = self
            .waiting
            .iter()
            .position(|w| w.owner == owner && w.seq == seq)
        else {
            debug!(?owner, seq, "no work waiting for completion");
            return false;
        };

        let item = self.waiting.remove(pos);
        self.ready.push_back(ReadyWork {
            id: item.id,
            owner: item.owner,
            result,
            work: item.work,
        });
        true
    }

    pub fn take_ready(&mut self) -> Vec<ReadyWork<O, T>> {
        self.ready.drain(..).collect()
    }

    /// Drop everything queued for `owner`. Returns the number of items dropped.
    pub fn cancel(&mut self, owner: O) -> usize {
        let before = self.waiting.len() + self.ready.len();
        self.waiting.retain(|w| w.owner != owner);
        self.ready.retain(|r| r.owner != owner);
        before - self.waiting.len() - self.ready.len()
    }

    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }
}
