mod common;

use common::{fast_config, ToyFamily, ToyHeader};

use dyesub_backend::engine::{CancelToken, ProtocolEngine};
use dyesub_backend::family::banked::{BankedHeader, MediaSize, CMD_PRINT, CMD_STATUS, STATUS_LEN};
use dyesub_backend::family::tagged::TaggedMedia;
use dyesub_backend::family::{BankedFamily, Family, TaggedFamily};
use dyesub_backend::job::JobHeader;
use dyesub_backend::policy;
use dyesub_backend::spool::declared::DeclaredHeader;
use dyesub_backend::spool::tagged::Block;
use dyesub_backend::spool::{ReadOptions, SpoolCursor};
use dyesub_backend::transport::ScriptedTransport;
use dyesub_backend::FormatError;

use std::io::{Seek, SeekFrom, Write};

fn tagged_family() -> TaggedFamily {
    TaggedFamily::new().with_media(vec![TaggedMedia {
        code: 2,
        name: "test",
        columns: 4,
        rows: 3,
        prints: 10,
    }])
}

fn tagged_spool(copies: u32) -> Vec<u8> {
    [
        Block::numeric("CNTRL", "QTY", copies),
        Block::new("INFO", "DRIVER", b"test driver".to_vec()),
        Block::numeric("CNTRL", "OVERCOAT", 0),
        Block::numeric("CNTRL", "MULTICUT", 2),
        Block::new("CNTRL", "IMAGE_SIZE", b"00040003".to_vec()),
        Block::new("IMAGE", "YPLANE", vec![0x01; 12]),
        Block::new("IMAGE", "MPLANE", vec![0x02; 12]),
        Block::new("IMAGE", "CPLANE", vec![0x03; 12]),
        Block::new("CNTRL", "START", Vec::new()),
    ]
    .iter()
    .flat_map(Block::to_bytes)
    .collect()
}

fn banked_family() -> BankedFamily {
    BankedFamily::new(None).with_media(vec![MediaSize {
        code: 0x01,
        name: "test",
        columns: 4,
        max_rows: 8,
        prints: 50,
    }])
}

fn banked_spool(rows: u32, copies: u16, fill: u8) -> Vec<u8> {
    let mut header = BankedHeader::new(4, rows, 0x01, 3);
    header.copies = copies;

    let mut data = header.encode();
    data.resize(data.len() + header.payload_len as usize, fill);
    data
}

#[test]
fn tagged_truncation_is_incomplete_everywhere() {
    let family = tagged_family();
    let data = tagged_spool(1);

    for cut in 1..data.len() {
        let mut cursor = SpoolCursor::new(&data[..cut]);

        match family.read_job(&mut cursor, &ReadOptions::default()) {
            Err(FormatError::Incomplete { consumed, .. }) => assert_eq!(consumed, cut as u64),
            other => panic!("cut at {}: unexpected result {:?}", cut, other.map(|_| ())),
        }
    }
}

#[test]
fn tagged_reader_consumes_exactly_one_job() {
    let family = tagged_family();
    let mut data = tagged_spool(1);
    let first = data.len();
    data.extend(tagged_spool(4));

    let mut cursor = SpoolCursor::new(&data[..]);

    let job = family.read_job(&mut cursor, &ReadOptions::default()).unwrap();
    assert_eq!(cursor.consumed(), first as u64);
    assert_eq!(job.header.copies(), 1);

    let job = family.read_job(&mut cursor, &ReadOptions::default()).unwrap();
    assert_eq!(cursor.consumed(), data.len() as u64);
    assert_eq!(job.header.copies(), 4);

    assert!(matches!(
        family.read_job(&mut cursor, &ReadOptions::default()),
        Err(FormatError::EndOfStream)
    ));
}

#[test]
fn declared_truncation_is_truncated() {
    let family = banked_family();
    let data = banked_spool(2, 1, 0x55);

    let mut cursor = SpoolCursor::new(&data[..data.len() - 1]);
    assert!(matches!(
        family.read_job(&mut cursor, &ReadOptions::default()),
        Err(FormatError::Truncated { .. })
    ));

    let mut cursor = SpoolCursor::new(&data[..10]);
    assert!(matches!(
        family.read_job(&mut cursor, &ReadOptions::default()),
        Err(FormatError::Truncated { .. })
    ));
}

#[test]
fn bad_magic_cancels_the_job() {
    let family = banked_family();
    let mut data = banked_spool(2, 1, 0x55);
    data[0] = b'X';

    let err = family
        .read_job(&mut SpoolCursor::new(&data[..]), &ReadOptions::default())
        .unwrap_err();

    assert!(matches!(err, FormatError::BadMagic { .. }));
    assert_eq!(policy::for_format(&err).exit_status().code(), 5);
}

#[test]
fn multi_job_spool_from_file() {
    let family = banked_family();

    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&banked_spool(2, 1, 0x10)).unwrap();
    file.write_all(&banked_spool(8, 2, 0x20)).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();

    let options = ReadOptions {
        copies_override: Some(3),
        ..ReadOptions::default()
    };

    let mut cursor = SpoolCursor::new(file);
    let mut jobs = Vec::new();

    loop {
        match family.read_job(&mut cursor, &options) {
            Ok(job) => jobs.push(job),
            Err(FormatError::EndOfStream) => break,
            Err(err) => panic!("unexpected error: {}", err),
        }
    }

    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].header.rows, 2);
    assert_eq!(jobs[1].header.rows, 8);
    assert!(jobs.iter().all(|job| job.header.copies == 3));
    assert_eq!(jobs[1].planes[2].data, vec![0x20; 32]);
}

#[test]
fn toy_spool_through_the_engine() {
    let family = ToyFamily {
        acks: false,
        ..ToyFamily::default()
    };

    let header = ToyHeader {
        columns: 2,
        rows: 1,
        copies: 2,
    };
    let mut data = header.encode();
    data.extend_from_slice(&[1, 2, 3, 4]);

    let job = family
        .read_job(&mut SpoolCursor::new(&data[..]), &ReadOptions::default())
        .unwrap();

    let mut script = ScriptedTransport::new().fallback(common::status(common::IDLE));
    let mut engine = ProtocolEngine::new(&family, &mut script, fast_config(), CancelToken::new());

    let summary = engine.run(job).unwrap();
    assert_eq!(summary.copies_completed, 2);

    let planes: Vec<_> = script.sent().into_iter().filter(|s| s.len() == 2 && s[0] != 0xa0).collect();
    assert_eq!(planes, [&[1u8, 2][..], &[3, 4][..], &[1, 2][..], &[3, 4][..]]);
}

fn banked_status(state: u8, busy_flags: u8) -> Vec<u8> {
    let mut raw = vec![0u8; STATUS_LEN];
    raw[..2].copy_from_slice(&CMD_STATUS.to_le_bytes());
    raw[2] = state;
    raw[6] = busy_flags;
    raw[8..12].copy_from_slice(&1u32.to_le_bytes());
    raw[12..16].copy_from_slice(&50u32.to_le_bytes());
    raw[16..20].copy_from_slice(&49u32.to_le_bytes());
    raw
}

fn banked_ack(code: u8) -> Vec<u8> {
    let mut raw = CMD_PRINT.to_le_bytes().to_vec();
    raw.extend_from_slice(&[code, 0]);
    raw
}

#[test]
fn banked_job_with_correction_table() {
    let family = BankedFamily::new(Some(vec![0xcc; 16])).with_media(vec![MediaSize {
        code: 0x01,
        name: "test",
        columns: 4,
        max_rows: 8,
        prints: 50,
    }]);

    let data = banked_spool(2, 1, 0x33);
    let job = family
        .read_job(&mut SpoolCursor::new(&data[..]), &ReadOptions::default())
        .unwrap();

    let mut script = ScriptedTransport::new()
        .replies([banked_status(0, 0), banked_ack(0)])
        .fallback(banked_status(0, 0));

    let mut engine = ProtocolEngine::new(&family, &mut script, fast_config(), CancelToken::new());
    let summary = engine.run(job).unwrap();

    assert_eq!(summary.copies_completed, 1);
    assert_eq!(engine.markers()[0].level(), 98);

    let sent = script.sent();
    assert_eq!(&sent[1][..2], &CMD_PRINT.to_le_bytes());
    assert_eq!(sent[3], &[0xcc; 16][..]);
    assert_eq!(sent[5], &[0x33; 8][..]);
}

#[test]
fn short_banked_jobs_share_one_print() {
    let family = banked_family();

    let mut data = banked_spool(3, 1, 0x10);
    data.extend(banked_spool(5, 1, 0x20));

    let mut script = ScriptedTransport::new()
        .replies([banked_status(0, 0), banked_ack(0)])
        .fallback(banked_status(0, 0));

    let mut engine = ProtocolEngine::new(&family, &mut script, fast_config(), CancelToken::new());
    let mut cursor = SpoolCursor::new(&data[..]);

    while let Ok(job) = family.read_job(&mut cursor, &ReadOptions::default()) {
        engine.enqueue(job);
    }

    assert!(engine.combine_pending());

    let summary = engine.run_next().unwrap().unwrap();
    assert_eq!(summary.copies_completed, 1);
    assert!(engine.run_next().is_none());
    drop(engine);

    let sent = script.sent();
    assert_eq!(&sent[1][8..10], &8u16.to_le_bytes());

    let mut yellow = vec![0x10; 12];
    yellow.extend_from_slice(&[0x20; 20]);
    assert!(sent.contains(&yellow.as_slice()));
}
