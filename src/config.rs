use crate::engine::EngineConfig;
use crate::family::FamilyKind;
use crate::transport::{AttachFilter, Model};

use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use log::LevelFilter;
use thiserror::Error;

const URI_SCHEME: &str = "dyesub://";

#[derive(Debug, Error)]
pub enum Error {
    #[error("{variable} holds an invalid number: {value:?}")]
    InvalidNumber { variable: &'static str, value: String },

    #[error("{0}")]
    UnknownFamily(String),

    #[error("EXTRA_VID, EXTRA_PID and EXTRA_TYPE must be set together.")]
    IncompleteExtraModel,

    #[error("Invalid device URI: {0:?}")]
    InvalidUri(String),

    #[error("Reading the correction table {path:?} failed: {source}")]
    CorrectionTable { path: PathBuf, source: io::Error },

    #[error("The correction table {0:?} is empty.")]
    EmptyCorrectionTable(PathBuf),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum TestMode {
    #[default]
    Off,
    /// Attach and report status, but never submit.
    NoPrint,
    /// Parse the spool only; no device is touched.
    NoAttach,
}

/// `dyesub://<family>/<serial>`, as listed by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceUri {
    pub family: FamilyKind,
    pub serial_number: Option<String>,
}

impl FromStr for DeviceUri {
    type Err = Error;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidUri(uri.to_owned());

        let rest = uri.strip_prefix(URI_SCHEME).ok_or_else(invalid)?;
        let (family, serial) = rest.split_once('/').unwrap_or((rest, ""));

        let family = family.parse::<FamilyKind>().map_err(|_| invalid())?;
        let serial = serial.trim_end_matches('/');

        Ok(Self {
            family,
            serial_number: (!serial.is_empty()).then(|| serial.to_owned()),
        })
    }
}

/// Run-time settings taken from the environment CUPS hands to the backend.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub debug: u32,
    pub test_mode: TestMode,
    pub media_code: Option<u32>,
    pub fast_return: bool,

    /// Let families stack neighbouring short prints onto one sheet.
    pub combine_jobs: bool,

    pub correction_table: Option<PathBuf>,
    pub extra_model: Option<Model>,
    pub device_uri: Option<DeviceUri>,
}

fn parse_number(variable: &'static str, value: &str) -> Result<u32, Error> {
    let value = value.trim();

    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };

    parsed.map_err(|_| Error::InvalidNumber {
        variable,
        value: value.to_owned(),
    })
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source. Unset and empty variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let number = |name: &'static str| var(name).map(|value| parse_number(name, &value)).transpose();

        let test_mode = match number("TEST_MODE")? {
            None | Some(0) => TestMode::Off,
            Some(1) => TestMode::NoPrint,
            Some(_) => TestMode::NoAttach,
        };

        let extra_model = match (number("EXTRA_VID")?, number("EXTRA_PID")?, var("EXTRA_TYPE")) {
            (None, None, None) => None,
            (Some(vendor_id), Some(product_id), Some(family)) => Some(Model::Custom {
                vendor_id: vendor_id as u16,
                product_id: product_id as u16,
                family: family.parse().map_err(Error::UnknownFamily)?,
            }),
            _ => return Err(Error::IncompleteExtraModel),
        };

        let device_uri = match var("DEVICE_URI") {
            Some(uri) => Some(uri.parse::<DeviceUri>()?),
            None => None,
        };

        Ok(Self {
            debug: number("DYESUB_DEBUG")?.unwrap_or(0),
            test_mode,
            media_code: number("MEDIA_CODE")?,
            fast_return: number("FAST_RETURN")?.is_some_and(|v| v != 0),
            combine_jobs: number("COMBINE_JOBS")?.map_or(true, |v| v != 0),
            correction_table: var("CORRTABLE_PATH").map(PathBuf::from),
            extra_model,
            device_uri,
        })
    }

    pub fn log_level(&self) -> LevelFilter {
        match self.debug {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            fast_return: self.fast_return,
            ..EngineConfig::default()
        }
    }

    pub fn attach_filter(&self) -> AttachFilter {
        AttachFilter {
            extra_model: self.extra_model,
            family: self.device_uri.as_ref().map(|uri| uri.family),
            serial_number: self
                .device_uri
                .as_ref()
                .and_then(|uri| uri.serial_number.clone()),
        }
    }

    /// Load the table named by `CORRTABLE_PATH`, if any.
    pub fn load_correction_table(&self) -> Result<Option<Vec<u8>>, Error> {
        let Some(path) = &self.correction_table else {
            return Ok(None);
        };

        let table = std::fs::read(path).map_err(|source| Error::CorrectionTable {
            path: path.clone(),
            source,
        })?;

        if table.is_empty() {
            return Err(Error::EmptyCorrectionTable(path.clone()));
        }

        log::debug!("Loaded {} bytes of correction data from {:?}", table.len(), path);
        Ok(Some(table))
    }
}
