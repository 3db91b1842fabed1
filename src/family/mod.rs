use crate::job::{Job, JobHeader};
use crate::spool::{ReadOptions, SpoolCursor};
use crate::status::{DeviceStatus, Marker, StatusReport};
use crate::transport::{receive_exact, Transport};
use crate::{FormatError, TransportError};

use std::fmt::Display;
use std::io::Read;
use std::str::FromStr;

/// Binary, length-declared spools on printers with several memory banks.
pub mod banked;
pub use banked::BankedFamily;

/// ASCII command-tagged spools on single-bank printers.
pub mod tagged;
pub use tagged::TaggedFamily;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FamilyKind {
    Banked,
    Tagged,
}

impl Display for FamilyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FamilyKind::Banked => write!(f, "banked"),
            FamilyKind::Tagged => write!(f, "tagged"),
        }
    }
}

impl FromStr for FamilyKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "banked" => Ok(FamilyKind::Banked),
            "tagged" => Ok(FamilyKind::Tagged),
            other => Err(format!("Unknown printer family: {}", other)),
        }
    }
}

/// The printer's immediate answer to a job header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ack {
    Accepted,
    /// Transient refusal; the header has to be sent again later.
    Busy,
    Rejected(u32),
}

/// Everything that differs between printer families.
/// The engine is generic over this trait and never sees concrete wire formats.
pub trait Family {
    type Header: JobHeader;

    fn kind(&self) -> FamilyKind;

    /// Onboard memory banks that can hold a submitted job each.
    fn banks(&self) -> u8 {
        1
    }

    /// Copies the device produces from a single submission.
    fn max_native_copies(&self) -> u16 {
        1
    }

    /// Whether two neighbouring jobs should go out as one print.
    fn combinable(&self, _first: &Job<Self::Header>, _second: &Job<Self::Header>) -> bool {
        false
    }

    fn read_job<R: Read>(
        &self,
        cursor: &mut SpoolCursor<R>,
        options: &ReadOptions,
    ) -> Result<Job<Self::Header>, FormatError>;

    fn status_query(&self) -> Vec<u8>;

    fn status_reply_len(&self) -> usize;

    /// Ask for the status and return the undecoded reply.
    fn fetch_status<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<Vec<u8>, TransportError> {
        transport.send(&self.status_query())?;
        receive_exact(transport, self.status_reply_len())
    }

    /// Decode a raw status reply. Must not fail: anything unrecognised becomes `DeviceStatus::Unknown`.
    fn decode_status(&self, raw: &[u8]) -> StatusReport;

    /// The command that opens a submission of `copies` copies of `job`.
    fn start_job(&self, job: &Job<Self::Header>, copies: u16) -> Vec<u8>;

    /// Length of the acknowledgement to `start_job`, if the family sends one.
    fn ack_len(&self) -> Option<usize> {
        None
    }

    fn decode_ack(&self, _reply: &[u8]) -> Ack {
        Ack::Accepted
    }

    /// Extra transfers between the header and the first plane (tables, calibration data).
    fn setup_blocks(&self, _job: &Job<Self::Header>) -> Vec<Vec<u8>> {
        Vec::new()
    }

    /// The command wrapper that precedes plane `index`. Empty if planes go out bare.
    fn plane_wrapper(&self, job: &Job<Self::Header>, index: usize) -> Vec<u8>;

    /// Command that commits the job after the last plane, if any.
    fn commit(&self, _job: &Job<Self::Header>, _copies: u16) -> Option<Vec<u8>> {
        None
    }

    /// Human readable description of a status, from the family's error table.
    fn describe(&self, status: &DeviceStatus) -> String {
        status.to_string()
    }

    /// Markers to report when no device is attached (test modes).
    fn offline_markers(&self, media_code: u32) -> Vec<Marker>;
}
