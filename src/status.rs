use std::fmt::Display;

/// Canonical printer state, decoded fresh from every status reply.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    Idle,
    Feeding,
    PrintingPlane(u8),
    Cooling,
    BufferFull,
    CoverOpen,
    NoPaper,
    NoRibbon,
    MediaMismatch,
    MechanicalError(u32),
    Unknown(u32),
}

impl DeviceStatus {
    /// Conditions that stop the printer until somebody acts.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            DeviceStatus::CoverOpen
                | DeviceStatus::NoPaper
                | DeviceStatus::NoRibbon
                | DeviceStatus::MediaMismatch
                | DeviceStatus::MechanicalError(_)
        )
    }
}

impl Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use DeviceStatus::*;

        match self {
            Idle => write!(f, "Idle"),
            Feeding => write!(f, "Feeding media"),
            PrintingPlane(plane) => write!(f, "Printing plane {}", plane),
            Cooling => write!(f, "Cooling down"),
            BufferFull => write!(f, "Buffer full"),
            CoverOpen => write!(f, "Cover open"),
            NoPaper => write!(f, "Out of paper"),
            NoRibbon => write!(f, "Out of ribbon"),
            MediaMismatch => write!(f, "Paper and ribbon do not match"),
            MechanicalError(code) => write!(f, "Mechanical error {:#06x}", code),
            Unknown(raw) => write!(f, "Unknown status {:#010x}", raw),
        }
    }
}

/// How CUPS should render a consumable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MarkerKind {
    Ribbon,
    Paper,
}

impl MarkerKind {
    pub fn cups_type(&self) -> &'static str {
        match self {
            MarkerKind::Ribbon => "ribbonWax",
            MarkerKind::Paper => "paper",
        }
    }
}

/// Remaining count of a consumable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Remaining {
    Count(u32),
    Unknown,
    /// The device cannot count, but reports the supply as usable.
    UnknownOk,
}

/// One consumable as reported to the spooler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub name: String,
    pub color: &'static str,
    pub kind: MarkerKind,
    pub media_code: u32,

    /// `None` when the device does not expose a capacity.
    pub capacity: Option<u32>,
    pub remaining: Remaining,
}

pub const LEVEL_UNAVAILABLE: i32 = -1;
pub const LEVEL_UNKNOWN: i32 = -2;
pub const LEVEL_UNKNOWN_OK: i32 = -3;

impl Marker {
    /// The `marker-levels` value: a percentage or one of the sentinel levels.
    pub fn level(&self) -> i32 {
        let Some(capacity) = self.capacity else {
            return LEVEL_UNAVAILABLE;
        };

        match self.remaining {
            Remaining::Unknown => LEVEL_UNKNOWN,
            Remaining::UnknownOk => LEVEL_UNKNOWN_OK,
            Remaining::Count(_) if capacity == 0 => LEVEL_UNAVAILABLE,
            Remaining::Count(count) => ((count.min(capacity) as u64 * 100) / capacity as u64) as i32,
        }
    }
}

/// Everything a single status reply tells us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: DeviceStatus,

    /// The device latched a transfer error and wants the last plane again.
    pub resend_requested: bool,

    /// Free memory banks, for devices that report them.
    pub free_banks: Option<u8>,

    pub markers: Vec<Marker>,
    pub lifetime_prints: Option<u32>,
}

impl StatusReport {
    pub fn new(status: DeviceStatus) -> Self {
        Self {
            status,
            resend_requested: false,
            free_banks: None,
            markers: Vec::new(),
            lifetime_prints: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ribbon(capacity: Option<u32>, remaining: Remaining) -> Marker {
        Marker {
            name: String::from("6x4 ribbon"),
            color: "#00FFFF#FF00FF#FFFF00",
            kind: MarkerKind::Ribbon,
            media_code: 1,
            capacity,
            remaining,
        }
    }

    #[test]
    fn levels() {
        assert_eq!(ribbon(Some(400), Remaining::Count(100)).level(), 25);
        assert_eq!(ribbon(Some(400), Remaining::Count(900)).level(), 100);
        assert_eq!(ribbon(None, Remaining::Count(100)).level(), LEVEL_UNAVAILABLE);
        assert_eq!(ribbon(Some(400), Remaining::Unknown).level(), LEVEL_UNKNOWN);
        assert_eq!(ribbon(Some(400), Remaining::UnknownOk).level(), LEVEL_UNKNOWN_OK);
    }

    #[test]
    fn classes() {
        assert!(DeviceStatus::MechanicalError(3).is_error());
        assert!(!DeviceStatus::BufferFull.is_error());
        assert!(!DeviceStatus::Unknown(7).is_error());
    }
}
