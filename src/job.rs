use crate::FormatError;

use std::fmt::{self, Debug, Display};

/// Lamination or surface finish requested for a print.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Finish {
    Glossy,
    Matte,
    Off,
}

impl Finish {
    pub fn from_code(code: u32) -> Option<Self> {
        use Finish::*;

        match code {
            0 => Some(Glossy),
            1 => Some(Matte),
            2 => Some(Off),
            _ => None,
        }
    }

    pub fn code(&self) -> u32 {
        use Finish::*;

        match self {
            Glossy => 0,
            Matte => 1,
            Off => 2,
        }
    }
}

impl Display for Finish {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Finish::*;

        match self {
            Glossy => write!(f, "glossy"),
            Matte => write!(f, "matte"),
            Off => write!(f, "none"),
        }
    }
}

/// The colour (or finishing layer) a plane carries.
/// The declaration order is the order in which planes go to the device.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PlaneKind {
    Yellow,
    Magenta,
    Cyan,
    Black,
    Overcoat,
}

impl Display for PlaneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PlaneKind::*;

        let name = match self {
            Yellow => "Y",
            Magenta => "M",
            Cyan => "C",
            Black => "K",
            Overcoat => "OC",
        };

        write!(f, "{}", name)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Plane {
    pub kind: PlaneKind,
    pub data: Vec<u8>,
}

impl Plane {
    pub fn new(kind: PlaneKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// Raster planes are large; never dump them.
impl Debug for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plane")
            .field("kind", &self.kind)
            .field("len", &self.data.len())
            .finish()
    }
}

/// The family-specific part of a job.
/// Every family keeps its own header type, but the engine and the queue only need these fields.
pub trait JobHeader: Clone + Debug {
    fn columns(&self) -> u32;
    fn rows(&self) -> u32;
    fn set_rows(&mut self, rows: u32);
    fn copies(&self) -> u16;
    fn set_copies(&mut self, copies: u16);
    fn media(&self) -> u32;
    fn finish(&self) -> Finish;

    /// Number of bytes every plane must carry for the current geometry.
    fn plane_len(&self) -> usize;
}

/// One unit of work read from the spool.
#[derive(Debug, Clone)]
pub struct Job<H> {
    pub header: H,
    pub planes: Vec<Plane>,
}

impl<H: JobHeader> Job<H> {
    /// Assemble a job and check that the planes agree with the header.
    /// Nothing is ever padded or truncated here.
    pub fn new(header: H, planes: Vec<Plane>) -> Result<Self, FormatError> {
        if planes.is_empty() {
            return Err(FormatError::Inconsistent(String::from(
                "the job carries no image planes",
            )));
        }

        let expected = header.plane_len();

        if expected == 0 {
            return Err(FormatError::ZeroLength(format!(
                "plane size for {}x{}",
                header.columns(),
                header.rows()
            )));
        }

        for (idx, plane) in planes.iter().enumerate() {
            if plane.is_empty() {
                return Err(FormatError::ZeroLength(format!("plane {}", plane.kind)));
            }

            if plane.len() != expected {
                return Err(FormatError::Inconsistent(format!(
                    "plane {} holds {} bytes, but {}x{} requires {}",
                    plane.kind,
                    plane.len(),
                    header.columns(),
                    header.rows(),
                    expected
                )));
            }

            if idx > 0 && planes[idx - 1].kind >= plane.kind {
                return Err(FormatError::Inconsistent(format!(
                    "plane {} follows plane {}",
                    plane.kind,
                    planes[idx - 1].kind
                )));
            }
        }

        Ok(Self { header, planes })
    }

    pub fn payload_len(&self) -> usize {
        self.planes.iter().map(Plane::len).sum()
    }

    /// Stack `other` below `self` into a single print.
    /// This is the purely mechanical part of combining; whether two jobs
    /// should be merged on a given media is up to the caller.
    pub fn combine(&self, other: &Self) -> Option<Self> {
        let (a, b) = (&self.header, &other.header);

        let compatible = a.columns() == b.columns()
            && a.media() == b.media()
            && a.finish() == b.finish()
            && a.copies() == b.copies()
            && self.planes.len() == other.planes.len()
            && self
                .planes
                .iter()
                .zip(&other.planes)
                .all(|(p, q)| p.kind == q.kind);

        if !compatible {
            return None;
        }

        let mut header = a.clone();
        header.set_rows(a.rows() + b.rows());

        let planes = self
            .planes
            .iter()
            .zip(&other.planes)
            .map(|(p, q)| {
                let mut data = Vec::with_capacity(p.len() + q.len());
                data.extend_from_slice(&p.data);
                data.extend_from_slice(&q.data);
                Plane::new(p.kind, data)
            })
            .collect();

        Job::new(header, planes).ok()
    }
}
