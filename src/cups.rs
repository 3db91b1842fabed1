use crate::family::FamilyKind;
use crate::status::{DeviceStatus, Marker};
use crate::transport::Discovered;

use std::io::{self, Write};
use std::process::ExitCode;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Exit codes understood by the CUPS scheduler.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Ok,
    Failed,
    AuthRequired,
    Hold,
    Stop,
    Cancel,
    Retry,
    RetryCurrent,
}

impl BackendStatus {
    pub fn code(&self) -> u8 {
        match self {
            BackendStatus::Ok => 0,
            BackendStatus::Failed => 1,
            BackendStatus::AuthRequired => 2,
            BackendStatus::Hold => 3,
            BackendStatus::Stop => 4,
            BackendStatus::Cancel => 5,
            BackendStatus::Retry => 6,
            BackendStatus::RetryCurrent => 7,
        }
    }
}

impl From<BackendStatus> for ExitCode {
    fn from(status: BackendStatus) -> Self {
        ExitCode::from(status.code())
    }
}

/// Writes log records as CUPS backend message lines on stderr.
pub struct CupsLogger {
    level: LevelFilter,
}

impl CupsLogger {
    fn prefix(level: Level) -> &'static str {
        match level {
            Level::Error => "ERROR",
            Level::Warn => "WARNING",
            Level::Info => "INFO",
            Level::Debug | Level::Trace => "DEBUG",
        }
    }
}

impl Log for CupsLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut stderr = io::stderr().lock();

        // One line per message; CUPS reads the tag at the start of each line.
        for line in record.args().to_string().lines() {
            let _ = writeln!(stderr, "{}: {}", Self::prefix(record.level()), line);
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

/// Install the CUPS logger. Later calls keep the first logger.
pub fn init_logging(level: LevelFilter) {
    let logger = Box::new(CupsLogger { level });

    if log::set_boxed_logger(logger).is_ok() {
        log::set_max_level(level);
    }
}

const STATE_REASONS: &[&str] = &[
    "cover-open",
    "media-empty",
    "marker-supply-empty",
    "media-needed",
    "other",
];

/// The `printer-state-reasons` keyword for a device condition.
pub fn state_reason(status: &DeviceStatus) -> Option<&'static str> {
    let idx = match status {
        DeviceStatus::CoverOpen => 0,
        DeviceStatus::NoPaper => 1,
        DeviceStatus::NoRibbon => 2,
        DeviceStatus::MediaMismatch => 3,
        DeviceStatus::MechanicalError(_) => 4,
        _ => return None,
    };

    Some(STATE_REASONS[idx])
}

/// Withdraw every reason a failed run may have left on the printer.
pub fn clear_state_reasons<W: Write>(out: &mut W) -> io::Result<()> {
    for reason in STATE_REASONS {
        set_state_reason(out, reason, false)?;
    }

    out.flush()
}

pub fn set_state_reason<W: Write>(out: &mut W, reason: &str, on: bool) -> io::Result<()> {
    writeln!(out, "STATE: {}{}", if on { '+' } else { '-' }, reason)
}

pub fn report_page<W: Write>(out: &mut W, page: u32, copies: u32) -> io::Result<()> {
    writeln!(out, "PAGE: {} {}", page, copies)
}

/// Emit the marker attributes for every consumable.
pub fn report_markers<W: Write>(out: &mut W, markers: &[Marker]) -> io::Result<()> {
    if markers.is_empty() {
        return Ok(());
    }

    writeln!(out, "ATTR: marker-colors={}", join(markers, |m| m.color.to_owned()))?;
    writeln!(out, "ATTR: marker-names={}", join(markers, |m| format!("'\"{}\"'", m.name)))?;
    writeln!(out, "ATTR: marker-types={}", join(markers, |m| m.kind.cups_type().to_owned()))?;
    writeln!(out, "ATTR: marker-high-levels={}", join(markers, |_| String::from("100")))?;
    writeln!(out, "ATTR: marker-low-levels={}", join(markers, |_| String::from("10")))?;
    writeln!(out, "ATTR: marker-levels={}", join(markers, |m| m.level().to_string()))?;
    writeln!(out, "ATTR: marker-message='{}'", join(markers, |m| m.name.clone()))?;

    out.flush()
}

fn join<F: Fn(&Marker) -> String>(markers: &[Marker], f: F) -> String {
    markers.iter().map(f).collect::<Vec<_>>().join(",")
}

/// One line of the device discovery listing.
pub fn device_line(family: FamilyKind, device: &Discovered) -> String {
    let make_and_model = device.make_and_model();

    format!(
        "direct dyesub://{}/{} \"{}\" \"{}\"",
        family, device.serial_number, make_and_model, make_and_model
    )
}
