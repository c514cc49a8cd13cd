//! Cumulative gamma/neutron counter (EPDN2).
//!
//! Exports are UTF-16LE CSV, newest row first, with columns `DateHeure` (local time),
//! `HpG uSv` and `HpN uSv` holding cumulative doses. Samples are the increase between
//! consecutive rows; idle intervals (no increase on either channel) are dropped.

use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;
use rust_decimal::Decimal;
use std::path::Path;

use super::{DeviceParser, ParseContext, ParseError, RawFile, malformed};
use crate::models::dose::{DeviceKind, DoseRate, IntegratedDose, Sample, SamplePayload, hours_between};
use crate::services::flight_window;
use crate::utils::{interp, to_utc, utc_offset_at};

const DATE_COLUMN: &str = "DateHeure";
const GAMMA_COLUMN: &str = "HpG uSv";
const NEUTRON_COLUMN: &str = "HpN uSv";
const DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

pub struct GammaNeutronParser;

#[derive(Debug, Clone, Copy)]
struct CounterRow {
    local: NaiveDateTime,
    gamma: f64,
    neutron: f64,
}

fn decode_utf16le(bytes: &[u8]) -> Result<String, ParseError> {
    if bytes.len() % 2 != 0 {
        return Err(malformed("odd byte count for UTF-16LE content"));
    }
    let units = bytes.chunks_exact(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    let text = char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|e| malformed(format!("invalid UTF-16LE: {}", e)))?;
    Ok(text.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(text))
}

fn parse_counter(field: &str, column: &str, line: usize) -> Result<f64, ParseError> {
    field
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| malformed(format!("row {}: {} is not a number: {:?}", line, column, field)))
}

fn read_rows(text: &str) -> Result<Vec<CounterRow>, ParseError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| malformed(format!("missing column {:?}", name)))
    };
    let (date_idx, gamma_idx, neutron_idx) = (column(DATE_COLUMN)?, column(GAMMA_COLUMN)?, column(NEUTRON_COLUMN)?);

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let line = i + 2;
        let field = |idx: usize| record.get(idx).unwrap_or_default();
        let local = NaiveDateTime::parse_from_str(field(date_idx), DATE_FORMAT)
            .map_err(|e| malformed(format!("row {}: bad {}: {}", line, DATE_COLUMN, e)))?;
        rows.push(CounterRow {
            local,
            gamma: parse_counter(field(gamma_idx), GAMMA_COLUMN, line)?,
            neutron: parse_counter(field(neutron_idx), NEUTRON_COLUMN, line)?,
        });
    }
    Ok(rows)
}

fn to_count(delta: f64) -> i32 {
    delta.trunc().clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

impl DeviceParser for GammaNeutronParser {
    fn kind(&self) -> DeviceKind {
        DeviceKind::GammaNeutron
    }

    fn matches_filename(&self, name: &str) -> bool {
        let path = Path::new(name);
        let stem_ok = path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.len() == 7 && s.bytes().all(|b| b.is_ascii_digit()));
        let ext_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("txt"));
        stem_ok && ext_ok
    }

    /// The serial number is the export's file name without extension.
    fn parse_serial_number(&self, raw: &mut RawFile) -> Result<String, ParseError> {
        raw.rewind()?;
        Path::new(raw.name())
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| malformed(format!("cannot derive serial number from {:?}", raw.name())))
    }

    fn parse_file(&self, raw: &mut RawFile, ctx: &mut ParseContext<'_>) -> Result<Vec<Sample>, ParseError> {
        let text = decode_utf16le(&raw.read_all()?)?;
        let rows = read_rows(&text)?;
        let oldest = rows.last().ok_or_else(|| malformed("no data rows"))?;
        let offset = utc_offset_at(ctx.timezone, oldest.local);
        debug!(
            "{}: {} counter rows, UTC offset {}s",
            raw.name(),
            rows.len(),
            offset.num_seconds()
        );

        // rows[idx] is newer than rows[idx + 1]; walk oldest to newest
        let mut samples = Vec::new();
        for idx in (0..rows.len().saturating_sub(1)).rev() {
            let (newer, older) = (rows[idx], rows[idx + 1]);
            let gamma = newer.gamma - older.gamma;
            let neutron = newer.neutron - older.neutron;
            if gamma > 0.0 || neutron > 0.0 {
                let time = to_utc(newer.local, offset);
                samples.push(Sample {
                    time,
                    flight_leg_id: flight_window::assign_id(ctx.legs, time),
                    payload: SamplePayload::GammaNeutron {
                        gamma: to_count(gamma),
                        neutron: to_count(neutron),
                    },
                });
            }
        }
        Ok(samples)
    }

    fn integrate_dose(&self, samples: &[Sample]) -> Option<IntegratedDose> {
        let mut seen = false;
        let (mut low, mut high) = (0_i64, 0_i64);
        for s in samples {
            if let SamplePayload::GammaNeutron { gamma, neutron } = s.payload {
                seen = true;
                low += i64::from(gamma);
                high += i64::from(neutron);
            }
        }
        seen.then(|| IntegratedDose {
            dose: Decimal::from(low + high),
            low_let: Some(Decimal::from(low)),
            high_let: Some(Decimal::from(high)),
        })
    }

    fn dose_rate(&self, samples: &[Sample], reference: DateTime<Utc>) -> DoseRate {
        let seconds = |t: DateTime<Utc>| (t - reference).num_milliseconds() as f64 / 1000.0;
        let mut prev_gamma: Option<DateTime<Utc>> = None;
        let mut prev_neutron: Option<DateTime<Utc>> = None;
        let (mut xg, mut yg, mut xn, mut yn) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
        let mut grid = Vec::new();
        let mut rate = DoseRate::default();

        for s in samples {
            let SamplePayload::GammaNeutron { gamma, neutron } = s.payload else {
                continue;
            };
            let t = seconds(s.time);
            for (amount, prev, xs, ys) in [
                (gamma, &mut prev_gamma, &mut xg, &mut yg),
                (neutron, &mut prev_neutron, &mut xn, &mut yn),
            ] {
                if amount == 0 {
                    continue;
                }
                if let Some(p) = *prev {
                    let hours = hours_between(p, s.time);
                    if hours > 0.0 {
                        xs.push(t);
                        ys.push(f64::from(amount) / hours);
                    }
                }
                *prev = Some(s.time);
            }
            grid.push(t);
            rate.time.push(s.time - reference);
        }

        rate.bas = interp(&grid, &xg, &yg);
        rate.haut = interp(&grid, &xn, &yn);
        rate.total = rate.bas.iter().zip(&rate.haut).map(|(b, h)| b + h).collect();
        rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::tests::{FixedCalibrations, device};
    use crate::services::flight_window::tests::leg;
    use chrono::{Duration, TimeZone};

    fn utf16(text: &str) -> Vec<u8> {
        let mut bytes = vec![0xff, 0xfe];
        bytes.extend(text.encode_utf16().flat_map(|u| u.to_le_bytes()));
        bytes
    }

    fn export(rows: &[(&str, i64, i64)]) -> RawFile {
        let mut text = String::from("DateHeure, HpG uSv, HpN uSv\r\n");
        for (date, g, n) in rows {
            text.push_str(&format!("{}, {}, {}\r\n", date, g, n));
        }
        RawFile::new("1234567.txt", utf16(&text))
    }

    fn parse(raw: &mut RawFile, legs: &[crate::db::models::FlightLeg]) -> Result<Vec<Sample>, ParseError> {
        let dev = device(DeviceKind::GammaNeutron, "1234567");
        let mut cals = FixedCalibrations::default();
        let mut ctx = ParseContext {
            device: &dev,
            legs,
            calibrations: &mut cals,
            timezone: chrono_tz::Europe::Paris,
        };
        GammaNeutronParser.parse_file(raw, &mut ctx)
    }

    fn sample(time: DateTime<Utc>, gamma: i32, neutron: i32) -> Sample {
        Sample {
            time,
            flight_leg_id: None,
            payload: SamplePayload::GammaNeutron { gamma, neutron },
        }
    }

    #[test]
    fn serial_number_is_file_stem() {
        let mut raw = export(&[]);
        assert_eq!(GammaNeutronParser.parse_serial_number(&mut raw).unwrap(), "1234567");
    }

    #[test]
    fn deltas_between_cumulative_rows() {
        // newest first; winter date so Paris is UTC+1
        let mut raw = export(&[("10/01/2024 12:10:00", 140, 7), ("10/01/2024 12:00:00", 100, 5)]);
        let samples = parse(&mut raw, &[]).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].time, Utc.with_ymd_and_hms(2024, 1, 10, 11, 10, 0).unwrap());
        assert_eq!(samples[0].payload, SamplePayload::GammaNeutron { gamma: 40, neutron: 2 });
    }

    #[test]
    fn identical_rows_emit_nothing() {
        let mut raw = export(&[
            ("10/07/2024 12:20:00", 100, 5),
            ("10/07/2024 12:10:00", 100, 5),
            ("10/07/2024 12:00:00", 90, 5),
        ]);
        let samples = parse(&mut raw, &[]).unwrap();
        assert_eq!(samples.len(), 1);
        // summer: UTC+2
        assert_eq!(samples[0].time, Utc.with_ymd_and_hms(2024, 7, 10, 10, 10, 0).unwrap());
    }

    #[test]
    fn one_offset_for_a_file_spanning_dst_change() {
        // Paris switches to UTC+2 at 02:00 on 2024-03-31; the oldest row is still UTC+1
        let mut raw = export(&[
            ("31/03/2024 04:00:00", 150, 9),
            ("31/03/2024 01:30:00", 120, 7),
            ("30/03/2024 23:00:00", 100, 5),
        ]);
        let samples = parse(&mut raw, &[]).unwrap();
        let t = |d, h, m| Utc.with_ymd_and_hms(2024, 3, d, h, m, 0).unwrap();
        assert_eq!(samples.iter().map(|s| s.time).collect::<Vec<_>>(), vec![t(31, 0, 30), t(31, 3, 0)]);
    }

    #[test]
    fn samples_are_chronological_and_leg_tagged() {
        let t = |h, m| Utc.with_ymd_and_hms(2024, 1, 10, h, m, 0).unwrap();
        let legs = vec![leg(5, t(11, 0), t(11, 15))];
        let mut raw = export(&[
            ("10/01/2024 12:30:00", 130, 9),
            ("10/01/2024 12:10:00", 120, 8),
            ("10/01/2024 12:00:00", 100, 5),
        ]);
        let samples = parse(&mut raw, &legs).unwrap();
        assert_eq!(samples.iter().map(|s| s.time).collect::<Vec<_>>(), vec![t(11, 10), t(11, 30)]);
        assert_eq!(samples[0].flight_leg_id, Some(5));
        assert_eq!(samples[1].flight_leg_id, None);
    }

    #[test]
    fn rejects_missing_columns_and_bad_encoding() {
        let mut raw = RawFile::new("1234567.txt", utf16("Date, HpG uSv\r\n01/01/2024 00:00:00, 1\r\n"));
        assert!(matches!(parse(&mut raw, &[]), Err(ParseError::Malformed(_))));

        let mut raw = RawFile::new("1234567.txt", b"abc".to_vec());
        assert!(matches!(parse(&mut raw, &[]), Err(ParseError::Malformed(_))));

        let mut raw = export(&[]);
        assert!(matches!(parse(&mut raw, &[]), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn integrates_channels_independently() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let samples = vec![sample(t0, 3, 1), sample(t0 + Duration::minutes(5), 4, 0)];
        let dose = GammaNeutronParser.integrate_dose(&samples).unwrap();
        assert_eq!(dose.dose, Decimal::from(8));
        assert_eq!(dose.low_let, Some(Decimal::from(7)));
        assert_eq!(dose.high_let, Some(Decimal::from(1)));
        assert_eq!(GammaNeutronParser.integrate_dose(&[]), None);
    }

    #[test]
    fn rate_interpolates_each_channel_onto_full_grid() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let samples = vec![
            sample(t0, 2, 0),
            sample(t0 + Duration::hours(1), 4, 0),
            sample(t0 + Duration::hours(2), 0, 3),
            sample(t0 + Duration::hours(3), 2, 0),
        ];
        let rate = GammaNeutronParser.dose_rate(&samples, t0);
        assert_eq!(rate.len(), 4);
        assert_eq!(rate.time[3], Duration::hours(3));
        // gamma points: t=1h -> 4/h, t=3h -> 2/2h = 1/h
        assert_eq!(rate.bas, vec![4.0, 4.0, 2.5, 1.0]);
        // one nonzero neutron sample: no rate point, zeros everywhere
        assert_eq!(rate.haut, vec![0.0; 4]);
        assert_eq!(rate.total, rate.bas);
    }
}
