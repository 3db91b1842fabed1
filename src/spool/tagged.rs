use super::{Error, SpoolCursor};

use std::fmt::{self, Debug};
use std::io::Read;

/// `ESC P`, six characters of class, sixteen of name and eight ASCII digits of payload length.
pub const BLOCK_HEADER_LEN: usize = 32;

const BLOCK_INTRO: [u8; 2] = [0x1b, b'P'];
const CLASS_LEN: usize = 6;
const NAME_LEN: usize = 16;
const LEN_DIGITS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub class: String,
    pub name: String,
    pub len: usize,
}

impl BlockHeader {
    pub fn new(class: &str, name: &str, len: usize) -> Self {
        Self {
            class: class.to_owned(),
            name: name.to_owned(),
            len,
        }
    }

    pub fn is(&self, class: &str, name: &str) -> bool {
        self.class == class && self.name == name
    }

    pub fn parse(raw: &[u8]) -> Result<Self, Error> {
        if raw.len() != BLOCK_HEADER_LEN {
            return Err(Error::MalformedBlock(format!(
                "header has {} bytes instead of {}",
                raw.len(),
                BLOCK_HEADER_LEN
            )));
        }

        if raw[..2] != BLOCK_INTRO {
            return Err(Error::MalformedBlock(format!(
                "header starts with {:02x?}",
                &raw[..2]
            )));
        }

        let field = |range: std::ops::Range<usize>| -> Result<String, Error> {
            let text = std::str::from_utf8(&raw[range])
                .map_err(|_| Error::MalformedBlock(String::from("header is not ASCII")))?;
            Ok(text.trim_end().to_owned())
        };

        let class = field(2..2 + CLASS_LEN)?;
        let name = field(2 + CLASS_LEN..2 + CLASS_LEN + NAME_LEN)?;
        let digits = field(2 + CLASS_LEN + NAME_LEN..BLOCK_HEADER_LEN)?;

        let len = digits
            .parse::<usize>()
            .map_err(|_| Error::MalformedBlock(format!("bad length field {:?}", digits)))?;

        Ok(Self { class, name, len })
    }

    pub fn encode(&self) -> [u8; BLOCK_HEADER_LEN] {
        let mut raw = [b' '; BLOCK_HEADER_LEN];
        raw[..2].copy_from_slice(&BLOCK_INTRO);

        let class = self.class.as_bytes();
        let class_len = class.len().min(CLASS_LEN);
        raw[2..2 + class_len].copy_from_slice(&class[..class_len]);

        let name = self.name.as_bytes();
        let name_len = name.len().min(NAME_LEN);
        raw[2 + CLASS_LEN..2 + CLASS_LEN + name_len].copy_from_slice(&name[..name_len]);

        let digits = format!("{:0width$}", self.len, width = LEN_DIGITS);
        raw[2 + CLASS_LEN + NAME_LEN..].copy_from_slice(&digits.as_bytes()[..LEN_DIGITS]);

        raw
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub payload: Vec<u8>,
}

impl Block {
    pub fn new(class: &str, name: &str, payload: Vec<u8>) -> Self {
        Self {
            header: BlockHeader::new(class, name, payload.len()),
            payload,
        }
    }

    /// A block whose payload is a zero-padded eight digit number.
    pub fn numeric(class: &str, name: &str, value: u32) -> Self {
        Self::new(class, name, format!("{:08}", value).into_bytes())
    }

    /// Parse a numeric payload as written by `Block::numeric`.
    pub fn number(&self) -> Result<u32, Error> {
        std::str::from_utf8(&self.payload)
            .ok()
            .and_then(|text| text.trim().parse().ok())
            .ok_or_else(|| {
                Error::MalformedBlock(format!(
                    "{} {} does not carry a number",
                    self.header.class, self.header.name
                ))
            })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(BLOCK_HEADER_LEN + self.payload.len());
        raw.extend_from_slice(&self.header.encode());
        raw.extend_from_slice(&self.payload);
        raw
    }
}

impl Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block({} {}, {} bytes)",
            self.header.class, self.header.name, self.header.len
        )
    }
}

/// What the reader does with a block once its header is known.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    Rewrite,
    Discard,
    /// Keep the block and stop reading; the job is complete.
    Terminal,
}

/// Per-family decisions for a command-tagged stream.
pub trait BlockPolicy {
    /// Human readable name of the terminal block, for error messages.
    fn terminal(&self) -> &'static str;

    fn classify(&self, header: &BlockHeader) -> Disposition;

    /// Called for every block classified as `Rewrite`.
    fn rewrite(&self, block: Block) -> Result<Block, Error> {
        Ok(block)
    }
}

/// Read blocks until the family's terminal block.
/// End-of-file before that point is `Incomplete`, except on an empty stream which is `EndOfStream`.
pub fn read_blocks<R, P>(cursor: &mut SpoolCursor<R>, policy: &P) -> Result<Vec<Block>, Error>
where
    R: Read,
    P: BlockPolicy,
{
    let terminal = policy.terminal();
    let mut blocks = Vec::new();
    let mut first = true;

    loop {
        let raw = match cursor.read_record(BLOCK_HEADER_LEN) {
            Ok(raw) => raw,
            Err(Error::EndOfStream) if first => return Err(Error::EndOfStream),
            Err(err) => return Err(err.into_incomplete(terminal, cursor.consumed())),
        };
        first = false;

        let header = BlockHeader::parse(&raw)?;
        let disposition = policy.classify(&header);

        log::trace!(
            "Spool block {} {} ({} bytes): {:?}",
            header.class,
            header.name,
            header.len,
            disposition
        );

        if disposition == Disposition::Discard {
            cursor
                .skip(header.len)
                .map_err(|err| err.into_incomplete(terminal, cursor.consumed()))?;
            continue;
        }

        let payload = cursor
            .read_vec(header.len)
            .map_err(|err| err.into_incomplete(terminal, cursor.consumed()))?;
        let block = Block { header, payload };

        match disposition {
            Disposition::Rewrite => blocks.push(policy.rewrite(block)?),
            Disposition::Terminal => {
                blocks.push(block);
                return Ok(blocks);
            }
            _ => blocks.push(block),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EndAtStop;

    impl BlockPolicy for EndAtStop {
        fn terminal(&self) -> &'static str {
            "CTRL STOP"
        }

        fn classify(&self, header: &BlockHeader) -> Disposition {
            match (header.class.as_str(), header.name.as_str()) {
                ("CTRL", "STOP") => Disposition::Terminal,
                ("NOTE", _) => Disposition::Discard,
                _ => Disposition::Keep,
            }
        }
    }

    fn stream(blocks: &[Block]) -> Vec<u8> {
        blocks.iter().flat_map(Block::to_bytes).collect()
    }

    #[test]
    fn header_layout() {
        let raw = BlockHeader::new("IMAGE", "YPLANE", 1234).encode();
        assert_eq!(&raw[..2], b"\x1bP");
        assert_eq!(&raw[2..8], b"IMAGE ");
        assert_eq!(&raw[8..24], b"YPLANE          ");
        assert_eq!(&raw[24..], b"00001234");
        assert_eq!(
            BlockHeader::parse(&raw).unwrap(),
            BlockHeader::new("IMAGE", "YPLANE", 1234)
        );
    }

    #[test]
    fn bad_length_digits() {
        let mut raw = BlockHeader::new("CTRL", "X", 1).encode();
        raw[30] = b'z';
        assert!(matches!(
            BlockHeader::parse(&raw),
            Err(Error::MalformedBlock(_))
        ));
    }

    #[test]
    fn discards_and_stops_at_terminal() {
        let mut data = stream(&[
            Block::new("CTRL", "A", vec![1, 2, 3]),
            Block::new("NOTE", "SKIPPED", vec![9; 40]),
            Block::new("DATA", "B", vec![4; 10]),
            Block::new("CTRL", "STOP", vec![]),
        ]);
        data.extend_from_slice(b"next job");

        let mut cursor = SpoolCursor::new(&data[..]);
        let blocks = read_blocks(&mut cursor, &EndAtStop).unwrap();

        let names: Vec<_> = blocks.iter().map(|b| b.header.name.as_str()).collect();
        assert_eq!(names, ["A", "B", "STOP"]);
        assert_eq!(cursor.consumed(), (data.len() - 8) as u64);
    }

    #[test]
    fn end_of_file_without_terminal_is_incomplete() {
        let data = stream(&[Block::new("CTRL", "A", vec![1, 2, 3])]);
        let mut cursor = SpoolCursor::new(&data[..]);

        assert!(matches!(
            read_blocks(&mut cursor, &EndAtStop),
            Err(Error::Incomplete { .. })
        ));
    }
}
