//! Kind-agnostic sample view and the derived dose structures.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Stored dose values are NUMERIC(14, 7).
pub const DOSE_SCALE: u32 = 7;
const DOSE_INTEGER_DIGITS: u32 = 14 - DOSE_SCALE;

/// Closed set of supported instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Cumulative gamma/neutron counter (EPDN2).
    GammaNeutron,
    /// Energy-deposition spectrometer (Liulin).
    Spectrometer,
    /// Tissue-equivalent telemetry monitor (Hawk).
    Telemetry,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 3] = [DeviceKind::GammaNeutron, DeviceKind::Spectrometer, DeviceKind::Telemetry];

    /// Code stored in `devices.kind` / `device_versions.kind`.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::GammaNeutron => "gamma_neutron",
            DeviceKind::Spectrometer => "spectrometer",
            DeviceKind::Telemetry => "telemetry",
        }
    }

    /// Instrument name shown in device labels.
    pub fn display_name(self) -> &'static str {
        match self {
            DeviceKind::GammaNeutron => "EPDN2",
            DeviceKind::Spectrometer => "Liulin",
            DeviceKind::Telemetry => "Hawk",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        DeviceKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(needle) || k.display_name().eq_ignore_ascii_case(needle))
            .ok_or_else(|| format!("unknown device kind: {}", s))
    }
}

/// `<Name>-[<version>-]<serial>`, e.g. `EPDN2-v2-1234567`.
pub fn device_label(kind: DeviceKind, version: Option<&str>, serial: &str) -> String {
    match version {
        Some(v) => format!("{}-{}-{}", kind.display_name(), v, serial),
        None => format!("{}-{}", kind.display_name(), serial),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryReading {
    pub volt: Decimal,
    pub current: Decimal,
    pub temp: Decimal,
    pub qfactor: Decimal,
    pub gamma_dose: Decimal,
    pub dose_equivalent: Decimal,
    pub low_let: Decimal,
    pub high_let: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SamplePayload {
    /// Per-interval µSv deltas recovered from the cumulative counters.
    GammaNeutron { gamma: i32, neutron: i32 },
    /// Dose, flux and the raw channel counts joined by `;`.
    Spectrum { dose: Decimal, flux: Decimal, spectrum: String },
    Telemetry(TelemetryReading),
}

impl SamplePayload {
    pub fn kind(&self) -> DeviceKind {
        match self {
            SamplePayload::GammaNeutron { .. } => DeviceKind::GammaNeutron,
            SamplePayload::Spectrum { .. } => DeviceKind::Spectrometer,
            SamplePayload::Telemetry(_) => DeviceKind::Telemetry,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub time: DateTime<Utc>,
    pub flight_leg_id: Option<i64>,
    pub payload: SamplePayload,
}

/// Dose accumulated by one file over one flight leg.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegratedDose {
    pub dose: Decimal,
    pub low_let: Option<Decimal>,
    pub high_let: Option<Decimal>,
}

/// Time-aligned dose-rate curve, offsets relative to a reference instant (wheels-off).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DoseRate {
    #[serde(serialize_with = "serialize_offsets")]
    pub time: Vec<Duration>,
    pub bas: Vec<f64>,
    pub haut: Vec<f64>,
    pub total: Vec<f64>,
}

impl DoseRate {
    pub fn push(&mut self, offset: Duration, bas: f64, haut: f64) {
        self.time.push(offset);
        self.bas.push(bas);
        self.haut.push(haut);
        self.total.push(bas + haut);
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// Dose-rate curve plus the context the presentation layer labels it with.
#[derive(Debug, Clone, Serialize)]
pub struct DoseRateReport {
    pub from: String,
    pub to: String,
    pub dev: String,
    #[serde(flatten)]
    pub rate: DoseRate,
}

/// Format an offset as `[-]H:MM:SS`.
pub fn format_offset(offset: Duration) -> String {
    let secs = offset.num_seconds();
    let sign = if secs < 0 { "-" } else { "" };
    let abs = secs.unsigned_abs();
    format!("{}{}:{:02}:{:02}", sign, abs / 3600, (abs % 3600) / 60, abs % 60)
}

fn serialize_offsets<S>(offsets: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(offsets.iter().map(|d| format_offset(*d)))
}

/// Convert a computed value into the stored decimal representation. `None` when the value is
/// not finite or does not fit NUMERIC(14, 7).
pub fn dose_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    let d = Decimal::from_f64(value)?.round_dp(DOSE_SCALE);
    fits_dose_column(d).then_some(d)
}

pub fn fits_dose_column(d: Decimal) -> bool {
    d.abs() < Decimal::from(10_i64.pow(DOSE_INTEGER_DIGITS))
}

pub fn decimal_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Fractional hours between two instants.
pub fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}
