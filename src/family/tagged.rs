use super::{Family, FamilyKind};
use crate::job::{Finish, Job, JobHeader, Plane, PlaneKind};
use crate::spool::tagged::{self, Block, BlockHeader, BlockPolicy, Disposition};
use crate::spool::{ReadOptions, SpoolCursor};
use crate::status::{DeviceStatus, Marker, MarkerKind, Remaining, StatusReport};
use crate::transport::{receive_exact, Transport};
use crate::{FormatError, TransportError};

use std::io::Read;

const CONTROL: &str = "CNTRL";
const IMAGE: &str = "IMAGE";
const INFO: &str = "INFO";
const STATUS: &str = "STATUS";

const QTY: &str = "QTY";
const DATE: &str = "DATE";
const OVERCOAT: &str = "OVERCOAT";
const MULTICUT: &str = "MULTICUT";
const IMAGE_SIZE: &str = "IMAGE_SIZE";
const START: &str = "START";

const DATE_FORMAT: &str = "%Y%m%d%H%M%S";

/// Status replies open with the payload length as eight ASCII digits.
const STATUS_LEN_DIGITS: usize = 8;
const STATUS_MAX_PAYLOAD: usize = 4096;

/// Reads spent on emptying the endpoint after a reply we cannot frame.
const STATUS_DRAIN_READS: u32 = 4;

const MAX_COPIES: u16 = 9999;

/// Media codes carried by the `MULTICUT` block and the exact raster they take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedMedia {
    pub code: u32,
    pub name: &'static str,
    pub columns: u32,
    pub rows: u32,
    pub prints: u32,
}

const DEFAULT_MEDIA: &[TaggedMedia] = &[
    TaggedMedia {
        code: 1,
        name: "3.5x5",
        columns: 1920,
        rows: 1088,
        prints: 460,
    },
    TaggedMedia {
        code: 2,
        name: "4x6",
        columns: 1920,
        rows: 1240,
        prints: 400,
    },
    TaggedMedia {
        code: 3,
        name: "5x7",
        columns: 1920,
        rows: 2138,
        prints: 230,
    },
    TaggedMedia {
        code: 4,
        name: "6x8",
        columns: 1920,
        rows: 2436,
        prints: 200,
    },
    TaggedMedia {
        code: 5,
        name: "6x9",
        columns: 1920,
        rows: 2740,
        prints: 180,
    },
];

const ERROR_TEXT: &[(u32, &str)] = &[
    (1000, "Printer cover open"),
    (1100, "Paper end"),
    (1200, "Ribbon end"),
    (1300, "Paper and ribbon type mismatch"),
    (2100, "Print head voltage error"),
    (2200, "Print head position error"),
    (2300, "Power supply fan stopped"),
    (2400, "Cutter error"),
    (2500, "Pinch roller position error"),
    (2600, "Abnormal print head temperature"),
    (2700, "Abnormal media temperature"),
    (2800, "Ribbon tension error"),
    (2900, "RFID module error"),
];

fn plane_name(kind: PlaneKind) -> &'static str {
    match kind {
        PlaneKind::Yellow => "YPLANE",
        PlaneKind::Magenta => "MPLANE",
        PlaneKind::Cyan => "CPLANE",
        PlaneKind::Black => "KPLANE",
        PlaneKind::Overcoat => "OPLANE",
    }
}

fn plane_kind(name: &str) -> Option<PlaneKind> {
    match name {
        "YPLANE" => Some(PlaneKind::Yellow),
        "MPLANE" => Some(PlaneKind::Magenta),
        "CPLANE" => Some(PlaneKind::Cyan),
        "KPLANE" => Some(PlaneKind::Black),
        "OPLANE" => Some(PlaneKind::Overcoat),
        _ => None,
    }
}

/// Job parameters modelled as fields, plus every other control block kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedHeader {
    pub columns: u32,
    pub rows: u32,
    pub copies: u16,
    pub media: u32,
    pub finish: Finish,
    pub controls: Vec<Block>,
}

impl JobHeader for TaggedHeader {
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
        self.media
    }

    fn finish(&self) -> Finish {
        self.finish
    }

    fn plane_len(&self) -> usize {
        self.columns as usize * self.rows as usize
    }
}

impl TaggedHeader {
    /// The control blocks for a submission of `copies` copies.
    pub fn to_blocks(&self, copies: u16) -> Vec<Block> {
        let mut blocks = self.controls.clone();

        blocks.push(Block::numeric(CONTROL, QTY, copies as u32));
        blocks.push(Block::numeric(CONTROL, OVERCOAT, self.finish.code()));
        blocks.push(Block::numeric(CONTROL, MULTICUT, self.media));
        blocks.push(Block::new(
            CONTROL,
            IMAGE_SIZE,
            format!("{:04}{:04}", self.columns, self.rows).into_bytes(),
        ));

        blocks
    }

    /// Split the blocks of one job into the header and its planes.
    pub fn from_blocks(blocks: Vec<Block>) -> Result<(Self, Vec<Plane>), FormatError> {
        let mut copies = 1;
        let mut media = 0;
        let mut finish = Finish::Glossy;
        let mut size = None;
        let mut controls = Vec::new();
        let mut planes = Vec::new();

        for block in blocks {
            let header = &block.header;

            if header.class == IMAGE {
                let kind = plane_kind(&header.name).ok_or_else(|| {
                    FormatError::Inconsistent(format!("unknown image block {}", header.name))
                })?;
                planes.push(Plane::new(kind, block.payload));
                continue;
            }

            if header.class != CONTROL {
                controls.push(block);
                continue;
            }

            match header.name.as_str() {
                QTY => {
                    let qty = block.number()?;
                    copies = u16::try_from(qty.max(1))
                        .ok()
                        .filter(|c| *c <= MAX_COPIES)
                        .ok_or_else(|| {
                            FormatError::Inconsistent(format!("{} copies requested", qty))
                        })?;
                }
                OVERCOAT => {
                    let code = block.number()?;
                    finish = Finish::from_code(code).ok_or_else(|| {
                        FormatError::Inconsistent(format!("unknown overcoat mode {}", code))
                    })?;
                }
                MULTICUT => media = block.number()?,
                IMAGE_SIZE => size = Some(parse_size(&block)?),
                START => {}
                _ => controls.push(block),
            }
        }

        let (columns, rows) = size.ok_or_else(|| {
            FormatError::Inconsistent(String::from("the job carries no IMAGE_SIZE block"))
        })?;

        Ok((
            Self {
                columns,
                rows,
                copies,
                media,
                finish,
                controls,
            },
            planes,
        ))
    }
}

fn parse_size(block: &Block) -> Result<(u32, u32), FormatError> {
    let malformed = || FormatError::MalformedBlock(String::from("IMAGE_SIZE must be eight digits"));

    let text = std::str::from_utf8(&block.payload).map_err(|_| malformed())?;

    if text.len() != 8 {
        return Err(malformed());
    }

    let columns = text[..4].parse().map_err(|_| malformed())?;
    let rows = text[4..].parse().map_err(|_| malformed())?;

    Ok((columns, rows))
}

/// Reader decisions for one job: `INFO` is dropped, `QTY` and `DATE` are rewritten.
struct SpoolPolicy<'a> {
    options: &'a ReadOptions,
}

impl BlockPolicy for SpoolPolicy<'_> {
    fn terminal(&self) -> &'static str {
        "CNTRL START"
    }

    fn classify(&self, header: &BlockHeader) -> Disposition {
        if header.is(CONTROL, START) {
            Disposition::Terminal
        } else if header.class == INFO {
            Disposition::Discard
        } else if header.is(CONTROL, QTY) || header.is(CONTROL, DATE) {
            Disposition::Rewrite
        } else {
            Disposition::Keep
        }
    }

    fn rewrite(&self, block: Block) -> Result<Block, FormatError> {
        if block.header.name == QTY {
            return Ok(match self.options.copies_override {
                Some(copies) => Block::numeric(CONTROL, QTY, copies as u32),
                None => block,
            });
        }

        // The stamp must fit the length the spool declared for it.
        let stamp = self.options.timestamp.format(DATE_FORMAT).to_string();
        let len = block.header.len;

        if stamp.len() > len {
            return Err(FormatError::Inconsistent(format!(
                "DATE block of {} bytes cannot hold a time stamp",
                len
            )));
        }

        let mut payload = stamp.into_bytes();
        payload.resize(len, b' ');

        Ok(Block::new(CONTROL, DATE, payload))
    }
}

pub struct TaggedFamily {
    media: Vec<TaggedMedia>,
}

impl Default for TaggedFamily {
    fn default() -> Self {
        Self::new()
    }
}

impl TaggedFamily {
    pub fn new() -> Self {
        Self {
            media: DEFAULT_MEDIA.to_vec(),
        }
    }

    /// Replace the media legality table.
    pub fn with_media(mut self, media: Vec<TaggedMedia>) -> Self {
        self.media = media;
        self
    }

    fn media(&self, code: u32) -> Option<&TaggedMedia> {
        self.media.iter().find(|m| m.code == code)
    }

    fn media_marker(&self, media_code: u32, capacity: Option<u32>, remaining: Remaining) -> Marker {
        let name = match self.media(media_code) {
            Some(media) => format!("{} media", media.name),
            None => String::from("Unknown media"),
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

    fn decode_code(code: u32) -> DeviceStatus {
        match code {
            0 => DeviceStatus::Idle,
            1 => DeviceStatus::Feeding,
            10..=13 => DeviceStatus::PrintingPlane((code - 10) as u8),
            500 => DeviceStatus::Cooling,
            900 => DeviceStatus::BufferFull,
            1000 => DeviceStatus::CoverOpen,
            1100 => DeviceStatus::NoPaper,
            1200 => DeviceStatus::NoRibbon,
            1300 => DeviceStatus::MediaMismatch,
            2000..=2999 => DeviceStatus::MechanicalError(code),
            other => DeviceStatus::Unknown(other),
        }
    }
}

impl Family for TaggedFamily {
    type Header = TaggedHeader;

    fn kind(&self) -> FamilyKind {
        FamilyKind::Tagged
    }

    fn max_native_copies(&self) -> u16 {
        MAX_COPIES
    }

    fn read_job<R: Read>(
        &self,
        cursor: &mut SpoolCursor<R>,
        options: &ReadOptions,
    ) -> Result<Job<TaggedHeader>, FormatError> {
        let blocks = tagged::read_blocks(cursor, &SpoolPolicy { options })?;
        let (mut header, planes) = TaggedHeader::from_blocks(blocks)?;

        // A spool without a QTY block still honours the override.
        if let Some(copies) = options.copies_override {
            header.set_copies(copies);
        }

        let legal = self
            .media(header.media)
            .is_some_and(|m| m.columns == header.columns && m.rows == header.rows);

        if !legal {
            return Err(FormatError::UnsupportedSize {
                columns: header.columns,
                rows: header.rows,
                media: header.media,
            });
        }

        Job::new(header, planes)
    }

    fn status_query(&self) -> Vec<u8> {
        Block::new(STATUS, "QUERY", Vec::new()).to_bytes()
    }

    fn status_reply_len(&self) -> usize {
        STATUS_LEN_DIGITS
    }

    fn fetch_status<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<Vec<u8>, TransportError> {
        transport.send(&self.status_query())?;

        let mut raw = receive_exact(transport, STATUS_LEN_DIGITS)?;

        // With a garbled length the rest of the reply cannot be framed. Empty the endpoint
        // so the next query starts clean; the digits decode to an unknown status.
        let Some(len) = std::str::from_utf8(&raw)
            .ok()
            .and_then(|digits| digits.trim().parse::<usize>().ok())
        else {
            drain(transport)?;
            return Ok(raw);
        };

        let keep = len.min(STATUS_MAX_PAYLOAD);
        raw.extend(receive_exact(transport, keep)?);

        // Oversized replies are read to the end, but only the start is kept.
        let mut excess = len - keep;

        if excess > 0 {
            log::warn!("Status reply of {} bytes, keeping the first {}", len, keep);
        }

        while excess > 0 {
            excess -= receive_exact(transport, excess.min(STATUS_MAX_PAYLOAD))?.len();
        }

        Ok(raw)
    }

    fn decode_status(&self, raw: &[u8]) -> StatusReport {
        let text = raw
            .get(STATUS_LEN_DIGITS..)
            .and_then(|payload| std::str::from_utf8(payload).ok());

        let Some(text) = text else {
            return StatusReport::new(DeviceStatus::Unknown(u32::MAX));
        };

        let fields: Vec<&str> = text.trim().split(',').map(str::trim).collect();

        let Some(code) = fields.first().and_then(|f| f.parse::<u32>().ok()) else {
            return StatusReport::new(DeviceStatus::Unknown(u32::MAX));
        };

        let number = |idx: usize| fields.get(idx).and_then(|f| f.parse::<u32>().ok());

        let media_code = number(2).unwrap_or(0);
        let remaining = match number(3) {
            Some(count) => Remaining::Count(count),
            None => Remaining::Unknown,
        };
        let capacity = number(4).filter(|c| *c != 0);

        StatusReport {
            status: Self::decode_code(code),
            resend_requested: fields.get(1) == Some(&"1"),
            free_banks: None,
            markers: vec![self.media_marker(media_code, capacity, remaining)],
            lifetime_prints: number(5),
        }
    }

    fn start_job(&self, job: &Job<TaggedHeader>, copies: u16) -> Vec<u8> {
        job.header
            .to_blocks(copies)
            .iter()
            .flat_map(Block::to_bytes)
            .collect()
    }

    fn plane_wrapper(&self, job: &Job<TaggedHeader>, index: usize) -> Vec<u8> {
        let plane = &job.planes[index];
        BlockHeader::new(IMAGE, plane_name(plane.kind), plane.len())
            .encode()
            .to_vec()
    }

    fn commit(&self, _job: &Job<TaggedHeader>, _copies: u16) -> Option<Vec<u8>> {
        Some(Block::new(CONTROL, START, Vec::new()).to_bytes())
    }

    fn describe(&self, status: &DeviceStatus) -> String {
        let code = match status {
            DeviceStatus::CoverOpen => 1000,
            DeviceStatus::NoPaper => 1100,
            DeviceStatus::NoRibbon => 1200,
            DeviceStatus::MediaMismatch => 1300,
            DeviceStatus::MechanicalError(code) => *code,
            other => return other.to_string(),
        };

        ERROR_TEXT
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, text)| format!("{} ({:05})", text, code))
            .unwrap_or_else(|| status.to_string())
    }

    fn offline_markers(&self, media_code: u32) -> Vec<Marker> {
        let capacity = self.media(media_code).map(|m| m.prints);
        vec![self.media_marker(media_code, capacity, Remaining::UnknownOk)]
    }
}

fn drain<T: Transport + ?Sized>(transport: &mut T) -> Result<(), TransportError> {
    for _ in 0..STATUS_DRAIN_READS {
        if transport.receive(STATUS_MAX_PAYLOAD)?.is_empty() {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;

    use chrono::NaiveDate;

    fn small_media() -> Vec<TaggedMedia> {
        vec![TaggedMedia {
            code: 2,
            name: "test",
            columns: 4,
            rows: 3,
            prints: 10,
        }]
    }

    fn spool_blocks() -> Vec<Block> {
        vec![
            Block::numeric(CONTROL, QTY, 2),
            Block::new(INFO, "DRIVER", b"v1.0 some driver".to_vec()),
            Block::numeric(CONTROL, "CUTTER", 120),
            Block::new(CONTROL, DATE, vec![b'0'; 16]),
            Block::numeric(CONTROL, OVERCOAT, 1),
            Block::numeric(CONTROL, MULTICUT, 2),
            Block::new(CONTROL, IMAGE_SIZE, b"00040003".to_vec()),
            Block::new(IMAGE, "YPLANE", vec![0x01; 12]),
            Block::new(IMAGE, "MPLANE", vec![0x02; 12]),
            Block::new(IMAGE, "CPLANE", vec![0x03; 12]),
            Block::new(CONTROL, START, Vec::new()),
        ]
    }

    fn options() -> ReadOptions {
        ReadOptions {
            copies_override: None,
            timestamp: NaiveDate::from_ymd_opt(2026, 10, 19)
                .unwrap()
                .and_hms_opt(14, 5, 9)
                .unwrap(),
        }
    }

    fn read(data: &[u8], options: &ReadOptions) -> Result<Job<TaggedHeader>, FormatError> {
        TaggedFamily::new()
            .with_media(small_media())
            .read_job(&mut SpoolCursor::new(data), options)
    }

    fn stream(blocks: &[Block]) -> Vec<u8> {
        blocks.iter().flat_map(Block::to_bytes).collect()
    }

    #[test]
    fn header_round_trip() {
        let header = TaggedHeader {
            columns: 1920,
            rows: 1240,
            copies: 3,
            media: 2,
            finish: Finish::Matte,
            controls: vec![Block::numeric(CONTROL, "CUTTER", 120)],
        };

        let (decoded, planes) = TaggedHeader::from_blocks(header.to_blocks(3)).unwrap();
        assert_eq!(decoded, header);
        assert!(planes.is_empty());
    }

    #[test]
    fn reads_job_and_rewrites_blocks() {
        let job = read(&stream(&spool_blocks()), &options()).unwrap();

        assert_eq!(job.header.copies, 2);
        assert_eq!(job.header.finish, Finish::Matte);
        assert_eq!((job.header.columns, job.header.rows), (4, 3));
        assert_eq!(job.planes.len(), 3);
        assert_eq!(job.planes[1].data, vec![0x02; 12]);

        let names: Vec<_> = job
            .header
            .controls
            .iter()
            .map(|b| b.header.name.as_str())
            .collect();
        assert_eq!(names, ["CUTTER", "DATE"]);
        assert_eq!(job.header.controls[1].payload, b"20261019140509  ".to_vec());
    }

    #[test]
    fn copies_override_rewrites_qty() {
        let options = ReadOptions {
            copies_override: Some(7),
            ..options()
        };

        let job = read(&stream(&spool_blocks()), &options).unwrap();
        assert_eq!(job.header.copies, 7);
    }

    #[test]
    fn short_date_block_is_inconsistent() {
        let mut blocks = spool_blocks();
        blocks[3] = Block::new(CONTROL, DATE, vec![b'0'; 8]);

        assert!(matches!(
            read(&stream(&blocks), &options()),
            Err(FormatError::Inconsistent(_))
        ));
    }

    #[test]
    fn plane_size_mismatch() {
        let mut blocks = spool_blocks();
        blocks[8] = Block::new(IMAGE, "MPLANE", vec![0x02; 11]);

        assert!(matches!(
            read(&stream(&blocks), &options()),
            Err(FormatError::Inconsistent(_))
        ));
    }

    #[test]
    fn size_must_match_media() {
        let mut blocks = spool_blocks();
        blocks[5] = Block::numeric(CONTROL, MULTICUT, 4);

        assert!(matches!(
            read(&stream(&blocks), &options()),
            Err(FormatError::UnsupportedSize { media: 4, .. })
        ));
    }

    #[test]
    fn decodes_status_reply() {
        let family = TaggedFamily::new();
        let payload = b"00011,0,2,120,400,5321";
        let mut raw = format!("{:08}", payload.len()).into_bytes();
        raw.extend_from_slice(payload);

        let report = family.decode_status(&raw);
        assert_eq!(report.status, DeviceStatus::PrintingPlane(1));
        assert!(!report.resend_requested);
        assert_eq!(report.free_banks, None);
        assert_eq!(report.markers[0].level(), 30);
        assert_eq!(report.markers[0].name, "4x6 media");
        assert_eq!(report.lifetime_prints, Some(5321));
        assert_eq!(report, family.decode_status(&raw));
    }

    #[test]
    fn unknown_codes_and_garbage() {
        let family = TaggedFamily::new();

        let mut raw = b"00000005".to_vec();
        raw.extend_from_slice(b"00777");
        assert_eq!(family.decode_status(&raw).status, DeviceStatus::Unknown(777));

        let garbage = family.decode_status(b"xx");
        assert_eq!(garbage.status, DeviceStatus::Unknown(u32::MAX));
    }

    #[test]
    fn fetches_variable_length_status() {
        let family = TaggedFamily::new();
        let mut transport = ScriptedTransport::new()
            .reply(b"00000008".to_vec())
            .reply(b"01000,0,".to_vec());

        let raw = family.fetch_status(&mut transport).unwrap();
        assert_eq!(family.decode_status(&raw).status, DeviceStatus::CoverOpen);
        assert_eq!(transport.sent(), vec![family.status_query().as_slice()]);
    }

    #[test]
    fn garbled_status_length_is_drained() {
        let family = TaggedFamily::new();
        let mut transport = ScriptedTransport::new()
            .reply(b"0000x008".to_vec())
            .reply(b"01000,0,".to_vec())
            .reply(Vec::new())
            .reply(b"00000008".to_vec())
            .reply(b"00000,0,".to_vec());

        let raw = family.fetch_status(&mut transport).unwrap();
        assert_eq!(family.decode_status(&raw).status, DeviceStatus::Unknown(u32::MAX));

        let raw = family.fetch_status(&mut transport).unwrap();
        assert_eq!(family.decode_status(&raw).status, DeviceStatus::Idle);
        assert_eq!(transport.remaining_replies(), 0);
    }

    #[test]
    fn oversized_status_is_read_to_the_end() {
        let family = TaggedFamily::new();

        let mut payload = b"00000,0,".to_vec();
        payload.resize(STATUS_MAX_PAYLOAD + 100, b' ');

        let mut transport = ScriptedTransport::new()
            .reply(format!("{:08}", payload.len()).into_bytes())
            .reply(payload)
            .reply(b"00000008".to_vec())
            .reply(b"01000,0,".to_vec());

        let raw = family.fetch_status(&mut transport).unwrap();
        assert_eq!(raw.len(), STATUS_LEN_DIGITS + STATUS_MAX_PAYLOAD);
        assert_eq!(family.decode_status(&raw).status, DeviceStatus::Idle);

        let raw = family.fetch_status(&mut transport).unwrap();
        assert_eq!(family.decode_status(&raw).status, DeviceStatus::CoverOpen);
    }

    #[test]
    fn describes_errors() {
        let family = TaggedFamily::new();

        assert_eq!(
            family.describe(&DeviceStatus::MechanicalError(2400)),
            "Cutter error (02400)"
        );
        assert_eq!(family.describe(&DeviceStatus::Idle), "Idle");
    }

    #[test]
    fn commits_with_start() {
        let job = read(&stream(&spool_blocks()), &options()).unwrap();
        let family = TaggedFamily::new();

        let commit = family.commit(&job, 1).unwrap();
        assert_eq!(BlockHeader::parse(&commit).unwrap(), BlockHeader::new(CONTROL, START, 0));

        let wrapper = family.plane_wrapper(&job, 2);
        assert_eq!(BlockHeader::parse(&wrapper).unwrap(), BlockHeader::new(IMAGE, "CPLANE", 12));
    }
}
