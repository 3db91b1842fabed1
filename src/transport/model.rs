use crate::family::FamilyKind;

use std::fmt::Display;

/// Printers we know by USB id. `Custom` comes from the `EXTRA_*` environment overrides.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Model {
    DnpDs40,
    DnpDs80,
    DnpDsRx1,
    DnpDs620,
    ShinkoS2145,
    ShinkoS6145,
    Custom {
        vendor_id: u16,
        product_id: u16,
        family: FamilyKind,
    },
}

const VENDOR_CITIZEN: u16 = 0x1343;
const VENDOR_DNP: u16 = 0x1452;
const VENDOR_SHINKO: u16 = 0x10ce;

const KNOWN: &[Model] = &[
    Model::DnpDs40,
    Model::DnpDs80,
    Model::DnpDsRx1,
    Model::DnpDs620,
    Model::ShinkoS2145,
    Model::ShinkoS6145,
];

impl Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Model::*;

        match self {
            DnpDs40 => write!(f, "DNP DS40"),
            DnpDs80 => write!(f, "DNP DS80"),
            DnpDsRx1 => write!(f, "DNP DS-RX1"),
            DnpDs620 => write!(f, "DNP DS620"),
            ShinkoS2145 => write!(f, "Shinko CHC-S2145"),
            ShinkoS6145 => write!(f, "Shinko CHC-S6145"),
            Custom {
                vendor_id,
                product_id,
                family,
            } => write!(
                f,
                "Unlisted {} printer {:04x}:{:04x}",
                family, vendor_id, product_id
            ),
        }
    }
}

impl TryFrom<(u16, u16)> for Model {
    type Error = String;

    fn try_from((vendor_id, product_id): (u16, u16)) -> Result<Self, Self::Error> {
        KNOWN
            .iter()
            .copied()
            .find(|model| model.vendor_id() == vendor_id && model.product_id() == product_id)
            .ok_or_else(|| format!("Unknown USB id: {:04x}:{:04x}", vendor_id, product_id))
    }
}

impl Model {
    pub fn vendor_id(&self) -> u16 {
        use Model::*;

        match self {
            DnpDs40 | DnpDs80 | DnpDsRx1 => VENDOR_CITIZEN,
            DnpDs620 => VENDOR_DNP,
            ShinkoS2145 | ShinkoS6145 => VENDOR_SHINKO,
            Custom { vendor_id, .. } => *vendor_id,
        }
    }

    pub fn product_id(&self) -> u16 {
        use Model::*;

        match self {
            DnpDs40 => 0x0003,
            DnpDs80 => 0x0004,
            DnpDsRx1 => 0x0005,
            DnpDs620 => 0x8b01,
            ShinkoS2145 => 0x000e,
            ShinkoS6145 => 0x0019,
            Custom { product_id, .. } => *product_id,
        }
    }

    pub fn family(&self) -> FamilyKind {
        use Model::*;

        match self {
            DnpDs40 | DnpDs80 | DnpDsRx1 | DnpDs620 => FamilyKind::Tagged,
            ShinkoS2145 | ShinkoS6145 => FamilyKind::Banked,
            Custom { family, .. } => *family,
        }
    }

    /// Look a USB id up in the built-in table, falling back to the extra model if it matches.
    pub fn lookup(vendor_id: u16, product_id: u16, extra: Option<Model>) -> Option<Model> {
        extra
            .filter(|m| m.vendor_id() == vendor_id && m.product_id() == product_id)
            .or_else(|| Model::try_from((vendor_id, product_id)).ok())
    }
}
