use crate::cups::BackendStatus;
use crate::engine::Error as EngineError;
use crate::status::DeviceStatus;
use crate::{FormatError, TransportError};

/// Seconds to wait before CUPS retries a job when the device is unreachable.
pub const RETRY_DELAY: u32 = 60;

/// What the spooler should do after a run ends.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Action {
    Ok,
    RetrySameImmediately,
    RetryAfterDelay(u32),
    HoldQueue,
    CancelJob,
    StopQueue,
}

impl Action {
    pub fn exit_status(&self) -> BackendStatus {
        match self {
            Action::Ok => BackendStatus::Ok,
            Action::RetrySameImmediately => BackendStatus::RetryCurrent,
            Action::RetryAfterDelay(_) => BackendStatus::Retry,
            Action::HoldQueue => BackendStatus::Hold,
            Action::CancelJob => BackendStatus::Cancel,
            Action::StopQueue => BackendStatus::Stop,
        }
    }
}

/// Conditions the engine waits out or that need an operator.
pub fn for_status(status: &DeviceStatus) -> Action {
    match status {
        DeviceStatus::Idle | DeviceStatus::Feeding | DeviceStatus::PrintingPlane(_) => Action::Ok,
        DeviceStatus::BufferFull | DeviceStatus::Cooling | DeviceStatus::Unknown(_) => {
            Action::RetrySameImmediately
        }
        DeviceStatus::CoverOpen
        | DeviceStatus::NoPaper
        | DeviceStatus::NoRibbon
        | DeviceStatus::MediaMismatch => Action::HoldQueue,
        DeviceStatus::MechanicalError(_) => Action::StopQueue,
    }
}

/// A spool that cannot be printed is never retried.
/// A clean end of stream between jobs is not an error and never reaches this point.
pub fn for_format(error: &FormatError) -> Action {
    log::debug!("Spool rejected: {:?}", error);
    Action::CancelJob
}

pub fn for_transport(error: &TransportError) -> Action {
    match error {
        TransportError::NoPrinter
        | TransportError::ClaimFailed { .. }
        | TransportError::ShortRead { .. }
        | TransportError::ShortWrite { .. }
        | TransportError::USBError(rusb::Error::Timeout)
        | TransportError::USBError(rusb::Error::Busy)
        | TransportError::USBError(rusb::Error::NoDevice)
        | TransportError::USBError(rusb::Error::Pipe) => Action::RetryAfterDelay(RETRY_DELAY),
        _ => Action::StopQueue,
    }
}

pub fn for_error(error: &EngineError) -> Action {
    match error {
        EngineError::Transport(err) => for_transport(err),
        EngineError::Device(status) => match for_status(status) {
            // A device error should never map to success.
            Action::Ok | Action::RetrySameImmediately => Action::RetryAfterDelay(RETRY_DELAY),
            action => action,
        },
        EngineError::Rejected(_) => Action::CancelJob,
        EngineError::ResendLimit { .. } => Action::RetryAfterDelay(RETRY_DELAY),
        EngineError::UnknownStatus(_) => Action::RetryAfterDelay(RETRY_DELAY),
        EngineError::Queue(_) => Action::RetryAfterDelay(RETRY_DELAY),
    }
}
