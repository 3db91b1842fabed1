#![allow(dead_code)]

use dyesub_backend::engine::{CancelToken, EngineConfig, ProtocolEngine};
use dyesub_backend::family::{Ack, Family, FamilyKind};
use dyesub_backend::job::{Finish, Job, JobHeader, Plane, PlaneKind};
use dyesub_backend::spool::declared::{self, DeclaredHeader};
use dyesub_backend::spool::{ReadOptions, SpoolCursor};
use dyesub_backend::status::{DeviceStatus, Marker, StatusReport};
use dyesub_backend::transport::{ScriptedTransport, Transport};
use dyesub_backend::{FormatError, TransportError};

use std::io::Read;
use std::time::Duration;

pub const QUERY: u8 = b'Q';

/// Status bytes: `[state, flags, free banks]`.
pub const IDLE: u8 = 0;
pub const PRINTING_Y: u8 = 1;
pub const PRINTING_M: u8 = 2;
pub const BUFFER_FULL: u8 = 4;
pub const COVER_OPEN: u8 = 5;
pub const MECHANICAL: u8 = 6;
pub const GARBLED: u8 = 0x7f;

pub const RESEND: u8 = 0x01;
pub const NO_BANKS: u8 = 0xff;

pub fn status(state: u8) -> Vec<u8> {
    vec![state, 0, NO_BANKS]
}

pub fn status_with(state: u8, flags: u8, free: u8) -> Vec<u8> {
    vec![state, flags, free]
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToyHeader {
    pub columns: u32,
    pub rows: u32,
    pub copies: u16,
}

impl JobHeader for ToyHeader {
    fn columns(&self) -> u32 {
        self.columns
    }

    fn rows(&self) -> u32 {
        self.rows
    }

    fn set_rows(&mut self, rows: u32) {
        self.rows = rows;
    }

    fn copies(&self) -> u16 {
        self.copies
    }

    fn set_copies(&mut self, copies: u16) {
        self.copies = copies;
    }

    fn media(&self) -> u32 {
        0
    }

    fn finish(&self) -> Finish {
        Finish::Glossy
    }

    fn plane_len(&self) -> usize {
        self.columns as usize * self.rows as usize
    }
}

/// `T`, columns, rows, copies; two planes follow.
impl DeclaredHeader for ToyHeader {
    const LEN: usize = 4;
    const MAGIC: &'static [u8] = b"T";

    fn decode(raw: &[u8]) -> Result<Self, FormatError> {
        Ok(Self {
            columns: raw[1] as u32,
            rows: raw[2] as u32,
            copies: raw[3] as u16,
        })
    }

    fn encode(&self) -> Vec<u8> {
        vec![b'T', self.columns as u8, self.rows as u8, self.copies as u8]
    }

    fn plane_kinds(&self) -> Vec<PlaneKind> {
        vec![PlaneKind::Yellow, PlaneKind::Magenta]
    }
}

/// A minimal family with one-byte commands, used to watch the engine at work.
#[derive(Debug, Clone)]
pub struct ToyFamily {
    pub banks: u8,
    pub native_copies: u16,
    pub acks: bool,
    pub combine: bool,
}

impl Default for ToyFamily {
    fn default() -> Self {
        Self {
            banks: 1,
            native_copies: 1,
            acks: true,
            combine: false,
        }
    }
}

impl Family for ToyFamily {
    type Header = ToyHeader;

    fn kind(&self) -> FamilyKind {
        FamilyKind::Banked
    }

    fn banks(&self) -> u8 {
        self.banks
    }

    fn max_native_copies(&self) -> u16 {
        self.native_copies
    }

    fn combinable(&self, first: &Job<ToyHeader>, second: &Job<ToyHeader>) -> bool {
        self.combine && first.header.columns == second.header.columns
    }

    fn read_job<R: Read>(
        &self,
        cursor: &mut SpoolCursor<R>,
        options: &ReadOptions,
    ) -> Result<Job<ToyHeader>, FormatError> {
        let mut job = declared::read_job(cursor, |_: &ToyHeader| Ok(()))?;

        if let Some(copies) = options.copies_override {
            job.header.set_copies(copies);
        }

        Ok(job)
    }

    fn status_query(&self) -> Vec<u8> {
        vec![QUERY]
    }

    fn status_reply_len(&self) -> usize {
        3
    }

    fn decode_status(&self, raw: &[u8]) -> StatusReport {
        let status = match raw[0] {
            IDLE => DeviceStatus::Idle,
            PRINTING_Y => DeviceStatus::PrintingPlane(0),
            PRINTING_M => DeviceStatus::PrintingPlane(1),
            3 => DeviceStatus::PrintingPlane(2),
            BUFFER_FULL => DeviceStatus::BufferFull,
            COVER_OPEN => DeviceStatus::CoverOpen,
            MECHANICAL => DeviceStatus::MechanicalError(0x42),
            other => DeviceStatus::Unknown(other as u32),
        };

        let mut report = StatusReport::new(status);
        report.resend_requested = raw[1] & RESEND != 0;
        report.free_banks = (raw[2] != NO_BANKS).then_some(raw[2]);
        report
    }

    fn start_job(&self, _job: &Job<ToyHeader>, copies: u16) -> Vec<u8> {
        vec![0xa0, copies as u8]
    }

    fn ack_len(&self) -> Option<usize> {
        self.acks.then_some(1)
    }

    fn decode_ack(&self, reply: &[u8]) -> Ack {
        match reply[0] {
            0 => Ack::Accepted,
            1 => Ack::Busy,
            other => Ack::Rejected(other as u32),
        }
    }

    fn plane_wrapper(&self, _job: &Job<ToyHeader>, index: usize) -> Vec<u8> {
        vec![0xb0 | index as u8]
    }

    fn offline_markers(&self, _media_code: u32) -> Vec<Marker> {
        Vec::new()
    }
}

pub fn toy_job(copies: u16) -> Job<ToyHeader> {
    filled_job(copies, 0x11, 0x22)
}

pub fn filled_job(copies: u16, yellow: u8, magenta: u8) -> Job<ToyHeader> {
    Job::new(
        ToyHeader {
            columns: 10,
            rows: 10,
            copies,
        },
        vec![
            Plane::new(PlaneKind::Yellow, vec![yellow; 100]),
            Plane::new(PlaneKind::Magenta, vec![magenta; 100]),
        ],
    )
    .unwrap()
}

pub fn fast_config() -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::ZERO,
        ..EngineConfig::default()
    }
}

pub fn engine<'a>(
    family: &'a ToyFamily,
    transport: &'a mut ScriptedTransport,
    config: EngineConfig,
    cancel: CancelToken,
) -> ProtocolEngine<'a, ToyFamily, &'a mut ScriptedTransport> {
    ProtocolEngine::new(family, transport, config, cancel)
}

/// Passes everything through and raises `cancel` once `trigger` goes out.
pub struct CancelOnSend<'a> {
    pub inner: &'a mut ScriptedTransport,
    pub trigger: Vec<u8>,
    pub cancel: CancelToken,
}

impl Transport for CancelOnSend<'_> {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if data == self.trigger.as_slice() {
            self.cancel.cancel();
        }

        self.inner.send(data)
    }

    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        self.inner.receive(max_len)
    }
}
