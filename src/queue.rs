use crate::job::{Job, JobHeader};

use std::collections::VecDeque;
use std::rc::Rc;

use thiserror::Error;

/// Upper bound for the banks a device may report.
pub const MAX_BANKS: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("All {0} memory banks are occupied.")]
    QueueFull(u8),

    #[error("There is no queued job at position {0}.")]
    NoEntry(usize),

    #[error("The jobs at positions {0} and {1} cannot be combined.")]
    Incompatible(usize, usize),
}

/// A job resident in one of the device's memory banks.
#[derive(Debug, Clone)]
pub struct JobQueueEntry<H> {
    pub job: Rc<Job<H>>,
    pub bank: u8,
    pub copies: u16,
}

/// Jobs on their way to the device.
///
/// Pending jobs have been read from the spool but not sent yet; neighbouring
/// pending jobs may still be combined. Resident entries have been handed to
/// the device and are waiting to be confirmed as finished. Both are oldest
/// first; banks are numbered from zero.
#[derive(Debug)]
pub struct JobQueue<H> {
    banks: u8,
    pending: VecDeque<Job<H>>,
    entries: VecDeque<JobQueueEntry<H>>,
}

impl<H: JobHeader> JobQueue<H> {
    pub fn new(banks: u8) -> Self {
        let banks = banks.clamp(1, MAX_BANKS);

        Self {
            banks,
            pending: VecDeque::new(),
            entries: VecDeque::with_capacity(banks as usize),
        }
    }

    pub fn capacity(&self) -> u8 {
        self.banks
    }

    /// Resident entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.banks as usize
    }

    /// The lowest bank not holding a job.
    pub fn peek_free(&self) -> Option<u8> {
        (0..self.banks).find(|bank| self.entries.iter().all(|e| e.bank != *bank))
    }

    /// Place `job` in the next free bank and return that bank.
    pub fn push(&mut self, job: Rc<Job<H>>, copies: u16) -> Result<u8, Error> {
        let bank = self.peek_free().ok_or(Error::QueueFull(self.banks))?;

        log::debug!("Job queued in bank {} ({} copies)", bank, copies);

        self.entries.push_back(JobQueueEntry { job, bank, copies });
        Ok(bank)
    }

    /// Remove the oldest resident job.
    pub fn pop(&mut self) -> Option<JobQueueEntry<H>> {
        self.entries.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobQueueEntry<H>> {
        self.entries.iter()
    }

    /// Drop the jobs the device no longer holds and return them, oldest first.
    ///
    /// An idle device holds nothing. Otherwise the number of free banks it
    /// reports tells how many of our oldest entries have finished.
    pub fn reconcile(&mut self, free_banks: Option<u8>, idle: bool) -> Vec<JobQueueEntry<H>> {
        let occupied = match (idle, free_banks) {
            (true, _) => 0,
            (false, Some(free)) => self.banks.saturating_sub(free) as usize,
            (false, None) => return Vec::new(),
        };

        let mut finished = Vec::new();

        while self.entries.len() > occupied {
            match self.pop() {
                Some(entry) => finished.push(entry),
                None => break,
            }
        }

        finished
    }

    /// Hold a job read from the spool until it is submitted.
    pub fn enqueue(&mut self, job: Job<H>) {
        self.pending.push_back(job);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn peek_pending(&self, index: usize) -> Option<&Job<H>> {
        self.pending.get(index)
    }

    /// Take the oldest pending job for submission.
    pub fn take_pending(&mut self) -> Option<Job<H>> {
        self.pending.pop_front()
    }

    /// Merge the pending job at `index` with its successor into one print.
    pub fn combine(&mut self, index: usize) -> Result<(), Error> {
        let next = index + 1;

        let (first, second) = match (self.pending.get(index), self.pending.get(next)) {
            (Some(first), Some(second)) => (first, second),
            (None, _) => return Err(Error::NoEntry(index)),
            (_, None) => return Err(Error::NoEntry(next)),
        };

        let combined = first
            .combine(second)
            .ok_or(Error::Incompatible(index, next))?;

        self.pending[index] = combined;
        self.pending.remove(next);

        Ok(())
    }
}
