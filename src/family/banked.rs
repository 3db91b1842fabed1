use super::{Ack, Family, FamilyKind};
use crate::job::{Finish, Job, JobHeader, PlaneKind};
use crate::spool::declared::{self, DeclaredHeader};
use crate::spool::{ReadOptions, SpoolCursor};
use crate::status::{DeviceStatus, Marker, MarkerKind, Remaining, StatusReport};
use crate::FormatError;

use std::io::Read;

pub const SPOOL_MAGIC: &[u8] = b"DSUB";
pub const SPOOL_HEADER_LEN: usize = 48;

pub const CMD_STATUS: u16 = 0x0001;
pub const CMD_PRINT: u16 = 0x0002;
pub const CMD_PLANE: u16 = 0x0003;
pub const CMD_CORRECTION: u16 = 0x0004;

pub const STATUS_LEN: usize = 32;
pub const ACK_LEN: usize = 4;

const BANKS: u8 = 2;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        const RESEND_DATA = 0b0000_0001;
        const BANK1_BUSY = 0b0000_0010;
        const BANK2_BUSY = 0b0000_0100;
        const CORRECTION_LOADED = 0b0001_0000;
    }
}

/// Media this family knows, with the raster geometry it accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSize {
    pub code: u32,
    pub name: &'static str,
    pub columns: u32,
    pub max_rows: u32,
    pub prints: u32,
}

const DEFAULT_MEDIA: &[MediaSize] = &[
    MediaSize {
        code: 0x01,
        name: "4x6",
        columns: 1844,
        max_rows: 1240,
        prints: 400,
    },
    MediaSize {
        code: 0x02,
        name: "5x7",
        columns: 1548,
        max_rows: 2140,
        prints: 230,
    },
    MediaSize {
        code: 0x03,
        name: "6x8",
        columns: 1844,
        max_rows: 2434,
        prints: 200,
    },
    MediaSize {
        code: 0x04,
        name: "6x9",
        columns: 1844,
        max_rows: 2740,
        prints: 180,
    },
];

/// Mechanical fault codes and their meaning.
const ERROR_TEXT: &[(u32, &str)] = &[
    (0x0101, "Print head thermistor failure"),
    (0x0102, "Print head overheated"),
    (0x0201, "Ribbon take-up motor failure"),
    (0x0202, "Ribbon cut"),
    (0x0301, "Paper jam at the cutter"),
    (0x0302, "Paper feed motor failure"),
    (0x0401, "Cutter failure"),
    (0x0501, "Power supply fault"),
];

/// Fixed spool header. All fields are little endian `u32`:
/// magic, header length, columns, rows, copies, media, finish, planes, bytes per pixel, payload length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankedHeader {
    pub columns: u32,
    pub rows: u32,
    pub copies: u16,
    pub media: u32,
    pub finish: Finish,
    pub planes: u8,
    pub bytes_per_pixel: u8,
    pub payload_len: u32,
}

impl BankedHeader {
    pub fn new(columns: u32, rows: u32, media: u32, planes: u8) -> Self {
        let mut header = Self {
            columns,
            rows,
            copies: 1,
            media,
            finish: Finish::Glossy,
            planes,
            bytes_per_pixel: 1,
            payload_len: 0,
        };
        header.payload_len = header.computed_payload() as u32;
        header
    }

    fn computed_payload(&self) -> usize {
        self.plane_len() * self.planes as usize
    }
}

fn le_u32(raw: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

impl JobHeader for BankedHeader {
    fn columns(&self) -> u32 {
        self.columns
    }

    fn rows(&self) -> u32 {
        self.rows
    }

    fn set_rows(&mut self, rows: u32) {
        self.rows = rows;
        self.payload_len = self.computed_payload() as u32;
    }

    fn copies(&self) -> u16 {
        self.copies
    }

    fn set_copies(&mut self, copies: u16) {
        self.copies = copies;
    }

    fn media(&self) -> u32 {
        self.media
    }

    fn finish(&self) -> Finish {
        self.finish
    }

    fn plane_len(&self) -> usize {
        self.columns as usize * self.rows as usize * self.bytes_per_pixel as usize
    }
}

impl DeclaredHeader for BankedHeader {
    const LEN: usize = SPOOL_HEADER_LEN;
    const MAGIC: &'static [u8] = SPOOL_MAGIC;

    fn decode(raw: &[u8]) -> Result<Self, FormatError> {
        if raw.len() < SPOOL_HEADER_LEN {
            return Err(FormatError::Truncated {
                expected: SPOOL_HEADER_LEN,
                available: raw.len(),
            });
        }

        let header_len = le_u32(raw, 4);

        if header_len as usize != SPOOL_HEADER_LEN {
            return Err(FormatError::Inconsistent(format!(
                "header length field is {} instead of {}",
                header_len, SPOOL_HEADER_LEN
            )));
        }

        let copies = le_u32(raw, 16);
        let copies = u16::try_from(copies.max(1)).map_err(|_| {
            FormatError::Inconsistent(format!("{} copies requested", copies))
        })?;

        let finish_code = le_u32(raw, 24);
        let finish = Finish::from_code(finish_code).ok_or_else(|| {
            FormatError::Inconsistent(format!("unknown finish code {}", finish_code))
        })?;

        let planes = le_u32(raw, 28);

        let planes = match planes {
            0 => return Err(FormatError::ZeroLength(String::from("plane count"))),
            3 | 4 => planes as u8,
            other => {
                return Err(FormatError::Inconsistent(format!(
                    "{} planes declared",
                    other
                )))
            }
        };

        let bytes_per_pixel = match le_u32(raw, 32) {
            bpp @ (1 | 2) => bpp as u8,
            other => {
                return Err(FormatError::Inconsistent(format!(
                    "{} bytes per pixel",
                    other
                )))
            }
        };

        Ok(Self {
            columns: le_u32(raw, 8),
            rows: le_u32(raw, 12),
            copies,
            media: le_u32(raw, 20),
            finish,
            planes,
            bytes_per_pixel,
            payload_len: le_u32(raw, 36),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(SPOOL_HEADER_LEN);
        raw.extend_from_slice(SPOOL_MAGIC);

        for field in [
            SPOOL_HEADER_LEN as u32,
            self.columns,
            self.rows,
            self.copies as u32,
            self.media,
            self.finish.code(),
            self.planes as u32,
            self.bytes_per_pixel as u32,
            self.payload_len,
        ] {
            raw.extend_from_slice(&field.to_le_bytes());
        }

        raw.resize(SPOOL_HEADER_LEN, 0);
        raw
    }

    fn plane_kinds(&self) -> Vec<PlaneKind> {
        let mut kinds = vec![PlaneKind::Yellow, PlaneKind::Magenta, PlaneKind::Cyan];

        if self.planes == 4 {
            kinds.push(PlaneKind::Overcoat);
        }

        kinds
    }

    fn declared_payload(&self) -> Option<usize> {
        Some(self.payload_len as usize)
    }
}

/// Frame a device command: command and payload length as little-endian `u16`, then the payload.
pub fn command(cmd: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&cmd.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub struct BankedFamily {
    media: Vec<MediaSize>,
    correction_table: Option<Vec<u8>>,
    combine: bool,
}

impl Default for BankedFamily {
    fn default() -> Self {
        Self::new(None)
    }
}

impl BankedFamily {
    pub fn new(correction_table: Option<Vec<u8>>) -> Self {
        Self {
            media: DEFAULT_MEDIA.to_vec(),
            correction_table,
            combine: true,
        }
    }

    /// Allow or forbid stacking two short prints onto one sheet.
    pub fn with_combining(mut self, combine: bool) -> Self {
        self.combine = combine;
        self
    }

    /// Replace the media legality table.
    pub fn with_media(mut self, media: Vec<MediaSize>) -> Self {
        self.media = media;
        self
    }

    fn media_size(&self, code: u32) -> Option<&MediaSize> {
        self.media.iter().find(|m| m.code == code)
    }

    fn check_size(&self, header: &BankedHeader) -> Result<(), FormatError> {
        let unsupported = || FormatError::UnsupportedSize {
            columns: header.columns,
            rows: header.rows,
            media: header.media,
        };

        let size = self.media_size(header.media).ok_or_else(unsupported)?;

        if header.columns != size.columns || header.rows > size.max_rows {
            return Err(unsupported());
        }

        Ok(())
    }

    fn ribbon_marker(&self, media_code: u32, capacity: Option<u32>, remaining: Remaining) -> Marker {
        let name = match self.media_size(media_code) {
            Some(size) => format!("{} ribbon", size.name),
            None => String::from("Unknown ribbon"),
        };

        Marker {
            name,
            color: "#00FFFF#FF00FF#FFFF00",
            kind: MarkerKind::Ribbon,
            media_code,
            capacity,
            remaining,
        }
    }
}

impl Family for BankedFamily {
    type Header = BankedHeader;

    fn kind(&self) -> FamilyKind {
        FamilyKind::Banked
    }

    fn banks(&self) -> u8 {
        BANKS
    }

    fn read_job<R: Read>(
        &self,
        cursor: &mut SpoolCursor<R>,
        options: &ReadOptions,
    ) -> Result<Job<BankedHeader>, FormatError> {
        let mut job = declared::read_job(cursor, |header| self.check_size(header))?;

        if let Some(copies) = options.copies_override {
            job.header.set_copies(copies);
        }

        Ok(job)
    }

    // Two prints share a sheet when they agree on everything but the rows
    // and the sheet is long enough for both.
    fn combinable(&self, first: &Job<BankedHeader>, second: &Job<BankedHeader>) -> bool {
        let (a, b) = (&first.header, &second.header);

        self.combine
            && a.media == b.media
            && a.columns == b.columns
            && a.finish == b.finish
            && a.copies == b.copies
            && a.planes == b.planes
            && a.bytes_per_pixel == b.bytes_per_pixel
            && self
                .media_size(a.media)
                .is_some_and(|size| a.rows + b.rows <= size.max_rows)
    }

    fn status_query(&self) -> Vec<u8> {
        command(CMD_STATUS, &[])
    }

    fn status_reply_len(&self) -> usize {
        STATUS_LEN
    }

    fn decode_status(&self, raw: &[u8]) -> StatusReport {
        if raw.len() < STATUS_LEN || u16::from_le_bytes([raw[0], raw[1]]) != CMD_STATUS {
            let word = raw
                .iter()
                .take(4)
                .enumerate()
                .fold(0u32, |acc, (i, b)| acc | (*b as u32) << (8 * i));
            return StatusReport::new(DeviceStatus::Unknown(word));
        }

        let (state, class) = (raw[2], raw[3]);
        let code = u16::from_le_bytes([raw[4], raw[5]]) as u32;
        let flags = StatusFlags::from_bits_truncate(raw[6]);
        let word = u32::from_le_bytes([state, class, raw[4], raw[5]]);

        let status = match class {
            0 => match state {
                0 => DeviceStatus::Idle,
                1 => DeviceStatus::Feeding,
                2..=5 => DeviceStatus::PrintingPlane(state - 2),
                6 => DeviceStatus::Cooling,
                7 => DeviceStatus::BufferFull,
                _ => DeviceStatus::Unknown(word),
            },
            1 => DeviceStatus::CoverOpen,
            2 => DeviceStatus::NoPaper,
            3 => DeviceStatus::NoRibbon,
            4 => DeviceStatus::MediaMismatch,
            5 => DeviceStatus::MechanicalError(code),
            _ => DeviceStatus::Unknown(word),
        };

        let busy = (flags & (StatusFlags::BANK1_BUSY | StatusFlags::BANK2_BUSY))
            .bits()
            .count_ones() as u8;

        let media_code = le_u32(raw, 8);
        let capacity = Some(le_u32(raw, 12)).filter(|c| *c != 0);
        let remaining = match le_u32(raw, 16) {
            u32::MAX => Remaining::Unknown,
            count => Remaining::Count(count),
        };

        StatusReport {
            status,
            resend_requested: flags.contains(StatusFlags::RESEND_DATA),
            free_banks: Some(BANKS.saturating_sub(busy)),
            markers: vec![self.ribbon_marker(media_code, capacity, remaining)],
            lifetime_prints: Some(le_u32(raw, 20)),
        }
    }

    fn start_job(&self, job: &Job<BankedHeader>, copies: u16) -> Vec<u8> {
        let header = &job.header;
        let mut payload = Vec::with_capacity(14);

        payload.extend_from_slice(&copies.to_le_bytes());
        payload.extend_from_slice(&(header.columns as u16).to_le_bytes());
        payload.extend_from_slice(&(header.rows as u16).to_le_bytes());
        payload.extend_from_slice(&header.media.to_le_bytes());
        payload.push(header.finish.code() as u8);
        payload.push(job.planes.len() as u8);
        payload.push(header.bytes_per_pixel);
        payload.push(0x00);

        command(CMD_PRINT, &payload)
    }

    fn ack_len(&self) -> Option<usize> {
        Some(ACK_LEN)
    }

    fn decode_ack(&self, reply: &[u8]) -> Ack {
        if reply.len() < ACK_LEN || u16::from_le_bytes([reply[0], reply[1]]) != CMD_PRINT {
            return Ack::Rejected(u32::MAX);
        }

        match reply[2] {
            0 => Ack::Accepted,
            1 => Ack::Busy,
            other => Ack::Rejected(other as u32),
        }
    }

    fn setup_blocks(&self, _job: &Job<BankedHeader>) -> Vec<Vec<u8>> {
        match &self.correction_table {
            Some(table) => vec![
                command(CMD_CORRECTION, &(table.len() as u32).to_le_bytes()),
                table.clone(),
            ],
            None => Vec::new(),
        }
    }

    fn plane_wrapper(&self, job: &Job<BankedHeader>, index: usize) -> Vec<u8> {
        let mut payload = vec![index as u8, 0, 0, 0];
        payload.extend_from_slice(&(job.planes[index].len() as u32).to_le_bytes());

        command(CMD_PLANE, &payload)
    }

    fn describe(&self, status: &DeviceStatus) -> String {
        match status {
            DeviceStatus::MechanicalError(code) => ERROR_TEXT
                .iter()
                .find(|(c, _)| c == code)
                .map(|(_, text)| format!("{} ({:#06x})", text, code))
                .unwrap_or_else(|| status.to_string()),
            other => other.to_string(),
        }
    }

    fn offline_markers(&self, media_code: u32) -> Vec<Marker> {
        let capacity = self.media_size(media_code).map(|m| m.prints);
        vec![self.ribbon_marker(media_code, capacity, Remaining::UnknownOk)]
    }
}
