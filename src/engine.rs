use crate::family::{Ack, Family};
use crate::job::{Job, JobHeader};
use crate::queue::{JobQueue, JobQueueEntry};
use crate::status::{DeviceStatus, Marker, StatusReport};
use crate::transport::{receive_exact, Transport};
use crate::{QueueError, TransportError};

use std::fmt::Display;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("The printer reports an error: {0}")]
    Device(DeviceStatus),

    #[error("The printer rejected the job (code {0}).")]
    Rejected(u32),

    #[error("The printer requested plane {plane} again after {attempts} resends.")]
    ResendLimit { plane: usize, attempts: u32 },

    #[error("The printer kept reporting an unknown status ({0:#x}).")]
    UnknownStatus(u32),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Where the engine stands with the unit of copies it is currently submitting.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineState {
    Idle,
    ReadyToSubmit,
    HeaderSent,
    PlaneSent(usize),
    Submitted,
    PollingCompletion,
    Done,
    Failed(Error),
}

impl Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::ReadyToSubmit => write!(f, "ready to submit"),
            EngineState::HeaderSent => write!(f, "header sent"),
            EngineState::PlaneSent(idx) => write!(f, "plane {} sent", idx),
            EngineState::Submitted => write!(f, "submitted"),
            EngineState::PollingCompletion => write!(f, "polling for completion"),
            EngineState::Done => write!(f, "done"),
            EngineState::Failed(err) => write!(f, "failed ({})", err),
        }
    }
}

/// Set from a signal handler, observed by the engine at safe points.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The shared flag, for registration with a signal handler.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Return once the last unit is submitted instead of waiting for the print.
    pub fast_return: bool,

    pub poll_interval: Duration,

    /// Resend requests tolerated for a single plane.
    pub max_plane_resends: u32,

    /// Consecutive unrecognised status replies tolerated while waiting.
    pub max_unknown_polls: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fast_return: false,
            poll_interval: Duration::from_secs(1),
            max_plane_resends: 10,
            max_unknown_polls: 30,
        }
    }
}

/// Outcome of printing one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub copies_submitted: u32,

    /// Copies the device confirmed as finished while we watched.
    pub copies_completed: u32,

    pub fast_returned: bool,
}

/// Drives one device through the submission of jobs, whatever family it belongs to.
pub struct ProtocolEngine<'a, F: Family, T: Transport> {
    family: &'a F,
    transport: T,
    config: EngineConfig,
    cancel: CancelToken,
    state: EngineState,
    queue: JobQueue<F::Header>,
    last_status: Option<DeviceStatus>,
    markers: Vec<Marker>,
    sleeps: u32,
    retired: Vec<JobQueueEntry<F::Header>>,
    history: Vec<EngineState>,
}

impl<'a, F: Family, T: Transport> ProtocolEngine<'a, F, T> {
    pub fn new(family: &'a F, transport: T, config: EngineConfig, cancel: CancelToken) -> Self {
        Self {
            queue: JobQueue::new(family.banks()),
            family,
            transport,
            config,
            cancel,
            state: EngineState::Idle,
            last_status: None,
            markers: Vec::new(),
            sleeps: 0,
            retired: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[EngineState] {
        &self.history
    }

    pub fn last_status(&self) -> Option<DeviceStatus> {
        self.last_status
    }

    /// Consumables from the most recent status reply that carried any.
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// How often the engine paused for the poll interval.
    pub fn sleeps(&self) -> u32 {
        self.sleeps
    }

    pub fn queue(&self) -> &JobQueue<F::Header> {
        &self.queue
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn enter(&mut self, state: EngineState) {
        log::info!("Engine: {} -> {}", self.state, state);

        self.history.push(state.clone());
        self.state = state;
    }

    fn settle<V>(&mut self, result: Result<V, Error>) -> Result<V, Error> {
        result.map_err(|err| {
            self.enter(EngineState::Failed(err.clone()));
            err
        })
    }

    fn pause(&mut self) {
        self.sleeps += 1;

        if !self.config.poll_interval.is_zero() {
            thread::sleep(self.config.poll_interval);
        }
    }

    /// Query and decode the status, and retire the jobs the device no longer holds.
    pub fn poll_status(&mut self) -> Result<StatusReport, Error> {
        let raw = self.family.fetch_status(&mut self.transport)?;
        let report = self.family.decode_status(&raw);

        if self.last_status.is_none() {
            if let Some(prints) = report.lifetime_prints {
                log::info!("Printer lifetime counter: {} prints", prints);
            }
        }

        if self.last_status != Some(report.status) {
            log::info!("Printer status: {}", self.family.describe(&report.status));
        }

        self.last_status = Some(report.status);

        if !report.markers.is_empty() {
            self.markers = report.markers.clone();
        }

        let finished = self
            .queue
            .reconcile(report.free_banks, report.status == DeviceStatus::Idle);

        for entry in finished {
            log::debug!("Bank {} finished {} copies", entry.bank, entry.copies);
            self.retired.push(entry);
        }

        Ok(report)
    }

    fn bank_free(&self, report: &StatusReport) -> bool {
        self.queue.capacity() > 1
            && !self.queue.is_full()
            && report.free_banks.is_some_and(|free| free > 0)
    }

    /// Poll until the device can take another submission.
    /// Transient conditions are waited out for as long as the device reports them,
    /// operator conditions fail.
    pub fn wait_until_ready(&mut self) -> Result<StatusReport, Error> {
        let result = self.try_wait_until_ready();
        self.settle(result)
    }

    fn try_wait_until_ready(&mut self) -> Result<StatusReport, Error> {
        if self.state != EngineState::Idle {
            self.enter(EngineState::Idle);
        }

        let mut unknown = 0;

        loop {
            let report = self.poll_status()?;

            match report.status {
                status if status.is_error() => return Err(Error::Device(status)),
                DeviceStatus::Unknown(code) => {
                    unknown += 1;

                    if unknown >= self.config.max_unknown_polls {
                        return Err(Error::UnknownStatus(code));
                    }
                }
                DeviceStatus::Idle => {
                    self.enter(EngineState::ReadyToSubmit);
                    return Ok(report);
                }
                _ if self.bank_free(&report) => {
                    self.enter(EngineState::ReadyToSubmit);
                    return Ok(report);
                }
                _ => unknown = 0,
            }

            self.pause();
        }
    }

    /// Poll after a transfer, waiting while the device drains its buffer.
    fn poll_after_transfer(&mut self) -> Result<StatusReport, Error> {
        loop {
            let report = self.poll_status()?;

            if report.status.is_error() {
                return Err(Error::Device(report.status));
            }

            if report.status != DeviceStatus::BufferFull {
                return Ok(report);
            }

            self.pause();
        }
    }

    /// Send one unit of `copies` copies of `job`.
    /// `Ok(false)` means the device was busy and nothing was submitted.
    pub fn submit(&mut self, job: &Rc<Job<F::Header>>, copies: u16) -> Result<bool, Error> {
        let result = self.try_submit(job, copies);
        self.settle(result)
    }

    fn try_submit(&mut self, job: &Rc<Job<F::Header>>, copies: u16) -> Result<bool, Error> {
        if self.queue.is_full() {
            return Err(QueueError::QueueFull(self.queue.capacity()).into());
        }

        let family = self.family;

        self.transport.send(&family.start_job(job, copies))?;

        match family.ack_len() {
            Some(len) => match family.decode_ack(&receive_exact(&mut self.transport, len)?) {
                Ack::Accepted => {}
                Ack::Busy => {
                    log::info!("Printer is busy, the job will be sent again");
                    self.enter(EngineState::Idle);
                    self.pause();
                    return Ok(false);
                }
                Ack::Rejected(code) => return Err(Error::Rejected(code)),
            },
            None => {
                self.poll_after_transfer()?;
            }
        }

        self.enter(EngineState::HeaderSent);

        for block in family.setup_blocks(job) {
            self.transport.send(&block)?;
        }

        for (index, plane) in job.planes.iter().enumerate() {
            let mut resends = 0;

            loop {
                self.enter(EngineState::PlaneSent(index));

                let wrapper = family.plane_wrapper(job, index);

                if !wrapper.is_empty() {
                    self.transport.send(&wrapper)?;
                }

                self.transport.send(&plane.data)?;

                if !self.poll_after_transfer()?.resend_requested {
                    break;
                }

                if resends >= self.config.max_plane_resends {
                    return Err(Error::ResendLimit {
                        plane: index,
                        attempts: resends,
                    });
                }

                resends += 1;
                log::warn!("Printer requested plane {} again ({})", plane.kind, resends);
            }
        }

        if let Some(commit) = family.commit(job, copies) {
            self.transport.send(&commit)?;
            self.poll_after_transfer()?;
        }

        self.enter(EngineState::Submitted);
        self.queue.push(Rc::clone(job), copies)?;

        Ok(true)
    }

    /// Poll until the device has finished everything it holds.
    pub fn wait_for_completion(&mut self) -> Result<(), Error> {
        let result = self.try_wait_for_completion();
        self.settle(result)
    }

    fn try_wait_for_completion(&mut self) -> Result<(), Error> {
        self.enter(EngineState::PollingCompletion);

        let mut unknown = 0;

        loop {
            let report = self.poll_status()?;

            match report.status {
                status if status.is_error() => return Err(Error::Device(status)),
                DeviceStatus::Idle => {
                    self.enter(EngineState::Done);
                    return Ok(());
                }
                DeviceStatus::Unknown(code) => {
                    unknown += 1;

                    if unknown >= self.config.max_unknown_polls {
                        return Err(Error::UnknownStatus(code));
                    }
                }
                _ => unknown = 0,
            }

            self.pause();
        }
    }

    /// Print every requested copy of `job`.
    ///
    /// Copies are sent in units of at most the family's native copy count.
    /// Cancellation cuts the job down to one copy: a job that has not been
    /// submitted yet still goes out once, and no unit starts after that.
    pub fn run(&mut self, job: Job<F::Header>) -> Result<Summary, Error> {
        let job = Rc::new(job);
        let max_unit = self.family.max_native_copies().max(1);

        let mut remaining = job.header.copies().max(1);
        let mut summary = Summary::default();

        log::info!(
            "Printing {}x{} on media {:#x}, {} copies",
            job.header.columns(),
            job.header.rows(),
            job.header.media(),
            remaining
        );

        while remaining > 0 {
            if self.cancel.is_cancelled() {
                if summary.copies_submitted > 0 {
                    log::info!("Cancelled, dropping {} copies", remaining);
                    break;
                }

                if remaining > 1 {
                    log::info!("Cancelled, printing a single copy");
                    remaining = 1;
                }
            }

            let unit = remaining.min(max_unit);

            self.wait_until_ready()?;

            if !self.submit(&job, unit)? {
                continue;
            }

            summary.copies_submitted += unit as u32;
            remaining -= unit;

            if remaining > 0 && self.cancel.is_cancelled() {
                log::info!("Cancelled, dropping {} copies", remaining);
                remaining = 0;
            }

            if remaining > 0 && self.queue.capacity() > 1 {
                // The next unit goes to another bank while this one prints.
                self.enter(EngineState::Done);
                continue;
            }

            if remaining == 0 && self.config.fast_return {
                log::info!("Fast return, not waiting for the print to finish");
                summary.fast_returned = true;
                self.enter(EngineState::Done);
                break;
            }

            self.wait_for_completion()?;
        }

        summary.copies_completed = self.credit(&job);
        Ok(summary)
    }

    /// Copies of `job` the device finished so far. Entries of other jobs are dropped.
    fn credit(&mut self, job: &Rc<Job<F::Header>>) -> u32 {
        self.retired
            .drain(..)
            .filter(|entry| Rc::ptr_eq(&entry.job, job))
            .map(|entry| entry.copies as u32)
            .sum()
    }

    /// Hold a job read from the spool until `run_next` submits it.
    pub fn enqueue(&mut self, job: Job<F::Header>) {
        self.queue.enqueue(job);
    }

    /// Merge the two oldest pending jobs if the family wants them on one print.
    pub fn combine_pending(&mut self) -> bool {
        let family = self.family;

        let combinable = match (self.queue.peek_pending(0), self.queue.peek_pending(1)) {
            (Some(first), Some(second)) => family.combinable(first, second),
            _ => false,
        };

        if !combinable {
            return false;
        }

        match self.queue.combine(0) {
            Ok(()) => {
                log::info!("Combined two pending jobs into one print");
                true
            }
            Err(err) => {
                log::debug!("{}", err);
                false
            }
        }
    }

    /// Print the oldest pending job, if there is one.
    pub fn run_next(&mut self) -> Option<Result<Summary, Error>> {
        let job = self.queue.take_pending()?;
        Some(self.run(job))
    }
}
