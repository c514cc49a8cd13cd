//! Tissue-equivalent telemetry monitor (Hawk).
//!
//! The export starts with a free-form header; the table begins after the first line starting
//! with a comma and one more header line. Each row carries value/unit column pairs that are
//! normalised with [`crate::units::convert`]. LET components are derived with the device
//! calibration in force on the date of the first row.

use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;
use rust_decimal::Decimal;
use std::path::Path;

use super::{DeviceParser, ParseContext, ParseError, RawFile, malformed};
use crate::models::dose::{
    DOSE_SCALE, DeviceKind, DoseRate, IntegratedDose, Sample, SamplePayload, TelemetryReading, decimal_f64, dose_decimal,
    fits_dose_column, hours_between,
};
use crate::services::flight_window;
use crate::units::convert;
use crate::utils::{to_utc, utc_offset_at};

const SERIAL_LINE: usize = 4;
const DATE_FORMAT: &str = "%H:%M:%S %d%b%y";

mod col {
    pub const TIME: usize = 1;
    pub const DATE: usize = 2;
    pub const VOLT: (usize, usize) = (4, 5);
    pub const CURRENT: (usize, usize) = (6, 7);
    pub const TEMP: (usize, usize) = (8, 9);
    pub const QFACTOR: usize = 29;
    pub const GAMMA_DOSE: (usize, usize) = (35, 36);
    pub const DOSE_EQUIVALENT: (usize, usize) = (37, 38);
    pub const MIN_COLUMNS: usize = 39;
}

pub struct TelemetryParser;

struct Row<'r> {
    record: &'r csv::StringRecord,
    line: usize,
}

impl Row<'_> {
    fn text(&self, idx: usize) -> &str {
        self.record.get(idx).unwrap_or_default()
    }

    fn local_time(&self) -> Result<NaiveDateTime, ParseError> {
        let stamp = format!("{} {}", self.text(col::TIME), self.text(col::DATE));
        NaiveDateTime::parse_from_str(&stamp, DATE_FORMAT)
            .map_err(|e| malformed(format!("row {}: bad timestamp {:?}: {}", self.line, stamp, e)))
    }

    fn number(&self, idx: usize) -> Result<f64, ParseError> {
        let raw = self.text(idx);
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| malformed(format!("row {}: column {} {:?} is not a number", self.line, idx, raw)))
    }

    /// Value column converted from the unit in the following column to `target`.
    fn measure(&self, (value, unit): (usize, usize), target: &str) -> Result<Decimal, ParseError> {
        let converted = convert(self.number(value)?, self.text(unit), target)?;
        self.decimal(converted)
    }

    fn decimal(&self, value: f64) -> Result<Decimal, ParseError> {
        dose_decimal(value).ok_or_else(|| malformed(format!("row {}: value {} out of range", self.line, value)))
    }
}

fn scaled(value: Decimal, coefficient: Decimal, line: usize) -> Result<Decimal, ParseError> {
    value
        .checked_mul(coefficient)
        .map(|d| d.round_dp(DOSE_SCALE))
        .filter(|d| fits_dose_column(*d))
        .ok_or_else(|| malformed(format!("row {}: calibrated value out of range", line)))
}

impl DeviceParser for TelemetryParser {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Telemetry
    }

    fn matches_filename(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("txt"))
    }

    /// Line 4 ends with `: <4 chars><serial><4 chars>`.
    fn parse_serial_number(&self, raw: &mut RawFile) -> Result<String, ParseError> {
        raw.rewind()?;
        let mut line = None;
        for _ in 0..SERIAL_LINE {
            line = raw.next_line()?;
        }
        raw.rewind()?;
        let line = line.ok_or_else(|| malformed(format!("header shorter than {} lines", SERIAL_LINE)))?;
        let tail = line.rsplit(':').next().unwrap_or_default().trim();
        let chars = tail.chars().collect::<Vec<_>>();
        if chars.len() <= 8 {
            return Ok(String::new());
        }
        Ok(chars[4..chars.len() - 4].iter().collect())
    }

    fn parse_file(&self, raw: &mut RawFile, ctx: &mut ParseContext<'_>) -> Result<Vec<Sample>, ParseError> {
        let text = raw.read_text()?;
        let mut lines = text.lines().enumerate();
        lines
            .by_ref()
            .find(|(_, l)| l.starts_with(','))
            .ok_or_else(|| malformed("table marker line not found"))?;
        // column header line
        lines.next();

        let (first_line, _) = lines.clone().next().unwrap_or((0, ""));
        let body = lines.map(|(_, l)| l).collect::<Vec<_>>().join("\n");
        let records = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes())
            .records()
            .collect::<Result<Vec<_>, _>>()?;

        let rows = records
            .iter()
            .enumerate()
            .map(|(i, record)| Row {
                record,
                line: first_line + i + 1,
            })
            .collect::<Vec<_>>();
        // the final row is the export trailer
        let data = &rows[..rows.len().saturating_sub(1)];
        if let Some(short) = data.iter().find(|r| r.record.len() < col::MIN_COLUMNS) {
            return Err(malformed(format!(
                "row {}: {} columns, expected at least {}",
                short.line,
                short.record.len(),
                col::MIN_COLUMNS
            )));
        }
        let first = data.first().ok_or_else(|| malformed("no data rows"))?;
        let first_local = first.local_time()?;
        let offset = utc_offset_at(ctx.timezone, first_local);
        let calibration = ctx
            .calibrations
            .calibration_in_force(ctx.device.id, first_local.date())?
            .ok_or(ParseError::MissingCalibration {
                device_id: ctx.device.id,
                date: first_local.date(),
            })?;
        debug!(
            "{}: {} rows, UTC offset {}s, calibration {} from {}",
            raw.name(),
            rows.len(),
            offset.num_seconds(),
            calibration.id,
            calibration.effective_from
        );

        let mut samples = Vec::with_capacity(data.len());
        for row in data {
            let time = to_utc(row.local_time()?, offset);
            let gamma_dose = row.measure(col::GAMMA_DOSE, "µG")?;
            let dose_equivalent = row.measure(col::DOSE_EQUIVALENT, "µS")?;
            let reading = TelemetryReading {
                volt: row.measure(col::VOLT, "V")?,
                current: row.measure(col::CURRENT, "µA")?,
                temp: row.measure(col::TEMP, "C")?,
                qfactor: row.decimal(row.number(col::QFACTOR)?)?,
                gamma_dose,
                dose_equivalent,
                low_let: scaled(gamma_dose, calibration.low_let_coefficient, row.line)?,
                high_let: scaled(dose_equivalent - gamma_dose, calibration.high_let_coefficient, row.line)?,
            };
            samples.push(Sample {
                time,
                flight_leg_id: flight_window::assign_id(ctx.legs, time),
                payload: SamplePayload::Telemetry(reading),
            });
        }
        Ok(samples)
    }

    fn integrate_dose(&self, samples: &[Sample]) -> Option<IntegratedDose> {
        let mut seen = false;
        let (mut low, mut high) = (Decimal::ZERO, Decimal::ZERO);
        for s in samples {
            if let SamplePayload::Telemetry(r) = &s.payload {
                seen = true;
                low += r.low_let;
                high += r.high_let;
            }
        }
        seen.then(|| IntegratedDose {
            dose: low + high,
            low_let: Some(low),
            high_let: Some(high),
        })
    }

    /// Component per hour since the previous sample; zero for the first sample and for
    /// repeated timestamps.
    fn dose_rate(&self, samples: &[Sample], reference: DateTime<Utc>) -> DoseRate {
        let mut rate = DoseRate::default();
        let mut prev: Option<DateTime<Utc>> = None;
        for s in samples {
            let SamplePayload::Telemetry(r) = &s.payload else {
                continue;
            };
            let hours = prev.map(|p| hours_between(p, s.time)).unwrap_or(0.0);
            let (bas, haut) = if hours == 0.0 {
                (0.0, 0.0)
            } else {
                (decimal_f64(r.low_let) / hours, decimal_f64(r.high_let) / hours)
            };
            rate.push(s.time - reference, bas, haut);
            prev = Some(s.time);
        }
        rate
    }
}
