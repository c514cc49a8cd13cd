//! Instrument file parsers.
//!
//! Every supported instrument implements [`DeviceParser`]; [`DeviceRegistry::standard`] builds
//! the table mapping a [`DeviceKind`] to its parser. The registry is created once at startup
//! and passed by reference to the import service.

pub mod gamma_neutron;
pub mod spectrometer;
pub mod telemetry;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::io::{self, BufRead, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use crate::db::models::{Calibration, Device, FlightLeg};
use crate::db::store::StoreError;
use crate::models::dose::{DeviceKind, DoseRate, IntegratedDose, Sample};
use crate::units::UnitError;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed file: {0}")]
    Malformed(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Unit(#[from] UnitError),
    #[error("no calibration for device {device_id} effective on or before {date}")]
    MissingCalibration { device_id: i64, date: NaiveDate },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub(crate) fn malformed(msg: impl Into<String>) -> ParseError {
    ParseError::Malformed(msg.into())
}

/// An uploaded instrument log held in memory so parsers can rewind freely.
#[derive(Debug, Clone)]
pub struct RawFile {
    name: String,
    cursor: Cursor<Vec<u8>>,
}

impl RawFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        RawFile {
            name: name.into(),
            cursor: Cursor::new(bytes),
        }
    }

    pub fn open(path: &Path) -> io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        Ok(RawFile::new(name, bytes))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rewind(&mut self) -> io::Result<()> {
        self.cursor.seek(SeekFrom::Start(0)).map(|_| ())
    }

    /// Read one line without its terminator; `None` at end of file.
    pub fn next_line(&mut self) -> Result<Option<String>, ParseError> {
        let mut buf = Vec::new();
        if self.cursor.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        let line = String::from_utf8(buf).map_err(|_| malformed("line is not valid UTF-8"))?;
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Everything from the start of the file.
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        self.rewind()?;
        let mut bytes = Vec::new();
        self.cursor.read_to_end(&mut bytes)?;
        self.rewind()?;
        Ok(bytes)
    }

    pub fn read_text(&mut self) -> Result<String, ParseError> {
        String::from_utf8(self.read_all()?).map_err(|_| malformed("file is not valid UTF-8"))
    }
}

/// Read access to calibration records.
pub trait CalibrationLookup {
    /// Latest calibration of `device_id` whose effective date is on or before `on`.
    fn calibration_in_force(&mut self, device_id: i64, on: NaiveDate) -> Result<Option<Calibration>, StoreError>;
}

/// Everything a parser needs besides the file itself.
pub struct ParseContext<'a> {
    pub device: &'a Device,
    pub legs: &'a [FlightLeg],
    pub calibrations: &'a mut dyn CalibrationLookup,
    /// Zone the instruments' clocks are set to.
    pub timezone: Tz,
}

pub trait DeviceParser {
    fn kind(&self) -> DeviceKind;

    /// Whether an upload's filename looks like this instrument's export.
    fn matches_filename(&self, name: &str) -> bool;

    /// Identify the instrument. Leaves the file rewound to offset 0.
    fn parse_serial_number(&self, raw: &mut RawFile) -> Result<String, ParseError>;

    /// Samples in chronological order, each attributed to the leg containing it.
    fn parse_file(&self, raw: &mut RawFile, ctx: &mut ParseContext<'_>) -> Result<Vec<Sample>, ParseError>;

    /// `None` when the samples do not determine a dose.
    fn integrate_dose(&self, samples: &[Sample]) -> Option<IntegratedDose>;

    /// Rate curve with offsets relative to `reference`.
    fn dose_rate(&self, samples: &[Sample], reference: DateTime<Utc>) -> DoseRate;
}

pub struct DeviceRegistry {
    parsers: Vec<Box<dyn DeviceParser>>,
}

impl DeviceRegistry {
    pub fn standard() -> Self {
        DeviceRegistry {
            parsers: vec![
                Box::new(gamma_neutron::GammaNeutronParser),
                Box::new(spectrometer::SpectrometerParser),
                Box::new(telemetry::TelemetryParser),
            ],
        }
    }

    pub fn get(&self, kind: DeviceKind) -> Option<&dyn DeviceParser> {
        self.parsers.iter().find(|p| p.kind() == kind).map(|p| p.as_ref())
    }

    /// First registered kind whose filename convention matches.
    pub fn guess_kind(&self, filename: &str) -> Option<DeviceKind> {
        self.parsers.iter().find(|p| p.matches_filename(filename)).map(|p| p.kind())
    }
}
