use super::{Error, SpoolCursor};
use crate::job::{Job, JobHeader, Plane, PlaneKind};

use std::io::Read;

/// A fixed-size spool header that declares the geometry of everything after it.
pub trait DeclaredHeader: JobHeader + Sized {
    /// Size of the header on the wire.
    const LEN: usize;

    /// Cookie that must open the header before any declared length is trusted.
    const MAGIC: &'static [u8];

    fn decode(raw: &[u8]) -> Result<Self, Error>;

    fn encode(&self) -> Vec<u8>;

    /// The planes that follow the header, in wire order.
    fn plane_kinds(&self) -> Vec<PlaneKind>;

    /// Total payload length stated by the header, if the format carries one.
    fn declared_payload(&self) -> Option<usize> {
        None
    }
}

/// Read one length-declared job: header, cookie check, consistency checks, then the planes.
/// `validate` sees the header before any plane data is read.
pub fn read_job<H, R, V>(cursor: &mut SpoolCursor<R>, validate: V) -> Result<Job<H>, Error>
where
    H: DeclaredHeader,
    R: Read,
    V: FnOnce(&H) -> Result<(), Error>,
{
    let raw = cursor.read_record(H::LEN)?;

    if !raw.starts_with(H::MAGIC) {
        return Err(Error::BadMagic {
            expected: H::MAGIC.to_vec(),
            found: raw[..H::MAGIC.len().min(raw.len())].to_vec(),
        });
    }

    let header = H::decode(&raw)?;
    let kinds = header.plane_kinds();
    let plane_len = header.plane_len();

    if kinds.is_empty() {
        return Err(Error::ZeroLength(String::from("plane list")));
    }

    if plane_len == 0 {
        return Err(Error::ZeroLength(format!(
            "plane ({}x{})",
            header.columns(),
            header.rows()
        )));
    }

    let computed = plane_len * kinds.len();

    if let Some(declared) = header.declared_payload() {
        if declared != computed {
            return Err(Error::Inconsistent(format!(
                "header declares {} payload bytes, but {} planes of {}x{} need {}",
                declared,
                kinds.len(),
                header.columns(),
                header.rows(),
                computed
            )));
        }
    }

    validate(&header)?;

    log::debug!(
        "Spool header: {}x{}, {} planes, {} payload bytes",
        header.columns(),
        header.rows(),
        kinds.len(),
        computed
    );

    let mut planes = Vec::with_capacity(kinds.len());

    for kind in kinds {
        planes.push(Plane::new(kind, cursor.read_vec(plane_len)?));
    }

    Job::new(header, planes)
}
