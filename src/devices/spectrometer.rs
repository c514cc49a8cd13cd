//! Energy-deposition spectrometer (Liulin).
//!
//! After two header lines the export repeats a two-line block per observation: the
//! deposited-energy spectrum (one integer count per channel) and a whitespace-separated
//! metadata line starting with the local date and time, with dose in column 4 and flux in
//! column 7.

use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;
use std::path::Path;

use super::{DeviceParser, ParseContext, ParseError, RawFile, malformed};
use crate::models::dose::{
    DeviceKind, DoseRate, IntegratedDose, Sample, SamplePayload, decimal_f64, dose_decimal, hours_between,
};
use crate::services::flight_window;
use crate::utils::{to_utc, utc_offset_at};

const HEADER_LINES: usize = 2;
/// Channel 0 is not used; weighted channels are 1..=255.
const MIN_CHANNELS: usize = 256;
const LOW_LET_LAST_CHANNEL: usize = 12;
const DATE_FORMAT: &str = "%d/%m/%y %H:%M:%S";
const DOSE_COLUMN: usize = 4;
const FLUX_COLUMN: usize = 7;

pub struct SpectrometerParser;

fn channel_weight(channel: usize) -> f64 {
    40.7 + 81.4 * (channel as f64 - 1.0)
}

/// Weighted channel counts split into (low-LET, high-LET) buckets.
fn let_weights(spectrum: &str) -> (f64, f64) {
    let mut low = 0.0;
    let mut high = 0.0;
    for (channel, count) in spectrum.split(';').enumerate().take(MIN_CHANNELS).skip(1) {
        let weighted = count.trim().parse::<i64>().unwrap_or(0) as f64 * channel_weight(channel);
        if channel <= LOW_LET_LAST_CHANNEL {
            low += weighted;
        } else {
            high += weighted;
        }
    }
    (low, high)
}

fn parse_spectrum(line: &str, line_no: usize) -> Result<String, ParseError> {
    let counts = line.split_whitespace().collect::<Vec<_>>();
    if counts.len() < MIN_CHANNELS {
        return Err(malformed(format!(
            "line {}: spectrum has {} channels, expected at least {}",
            line_no,
            counts.len(),
            MIN_CHANNELS
        )));
    }
    if let Some(bad) = counts.iter().find(|c| c.parse::<i64>().is_err()) {
        return Err(malformed(format!("line {}: channel count {:?} is not an integer", line_no, bad)));
    }
    Ok(counts.join(";"))
}

struct Observation {
    local: NaiveDateTime,
    dose: f64,
    flux: f64,
    spectrum: String,
}

fn parse_observation(spectrum: &str, metadata: &str, line_no: usize) -> Result<Observation, ParseError> {
    let spectrum = parse_spectrum(spectrum, line_no)?;
    let fields = metadata.split_whitespace().collect::<Vec<_>>();
    let meta_line = line_no + 1;
    if fields.len() <= FLUX_COLUMN {
        return Err(malformed(format!("line {}: metadata has {} fields", meta_line, fields.len())));
    }
    let local = NaiveDateTime::parse_from_str(&format!("{} {}", fields[0], fields[1]), DATE_FORMAT)
        .map_err(|e| malformed(format!("line {}: bad timestamp: {}", meta_line, e)))?;
    let number = |idx: usize, what: &str| {
        fields[idx]
            .parse::<f64>()
            .map_err(|_| malformed(format!("line {}: {} {:?} is not a number", meta_line, what, fields[idx])))
    };
    Ok(Observation {
        local,
        dose: number(DOSE_COLUMN, "dose")?,
        flux: number(FLUX_COLUMN, "flux")?,
        spectrum,
    })
}

impl DeviceParser for SpectrometerParser {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Spectrometer
    }

    /// Extensions `.s`, `.s01`, `.s2`...
    fn matches_filename(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.strip_prefix('s').or_else(|| e.strip_prefix('S')))
            .is_some_and(|rest| rest.bytes().all(|b| b.is_ascii_digit()))
    }

    /// First space-separated token of the first line.
    fn parse_serial_number(&self, raw: &mut RawFile) -> Result<String, ParseError> {
        raw.rewind()?;
        let header = raw.next_line();
        raw.rewind()?;
        let header = header?.ok_or_else(|| malformed("empty file"))?;
        Ok(header.split(' ').next().unwrap_or_default().to_string())
    }

    fn parse_file(&self, raw: &mut RawFile, ctx: &mut ParseContext<'_>) -> Result<Vec<Sample>, ParseError> {
        let text = raw.read_text()?;
        let body = text
            .lines()
            .enumerate()
            .skip(HEADER_LINES)
            .filter(|(_, l)| !l.trim().is_empty())
            .collect::<Vec<_>>();

        // a dangling spectrum line without its metadata is ignored
        let observations = body
            .chunks_exact(2)
            .map(|pair| parse_observation(pair[0].1, pair[1].1, pair[0].0 + 1))
            .collect::<Result<Vec<_>, _>>()?;
        let first = observations.first().ok_or_else(|| malformed("no observations"))?;
        let offset = utc_offset_at(ctx.timezone, first.local);
        debug!(
            "{}: {} observations, UTC offset {}s",
            raw.name(),
            observations.len(),
            offset.num_seconds()
        );

        observations
            .into_iter()
            .map(|obs| {
                let time = to_utc(obs.local, offset);
                let dose = dose_decimal(obs.dose).ok_or_else(|| malformed(format!("dose {} out of range", obs.dose)))?;
                let flux = dose_decimal(obs.flux).ok_or_else(|| malformed(format!("flux {} out of range", obs.flux)))?;
                Ok(Sample {
                    time,
                    flight_leg_id: flight_window::assign_id(ctx.legs, time),
                    payload: SamplePayload::Spectrum {
                        dose,
                        flux,
                        spectrum: obs.spectrum,
                    },
                })
            })
            .collect()
    }

    /// Needs two observations to know the exposure time per observation.
    fn integrate_dose(&self, samples: &[Sample]) -> Option<IntegratedDose> {
        let spectra = samples
            .iter()
            .filter_map(|s| match &s.payload {
                SamplePayload::Spectrum { dose, spectrum, .. } => Some((s.time, decimal_f64(*dose), spectrum.as_str())),
                _ => None,
            })
            .collect::<Vec<_>>();
        if spectra.len() < 2 {
            return None;
        }
        let exposure_hours = hours_between(spectra[0].0, spectra[1].0);

        let (mut low, mut high, mut total) = (0.0, 0.0, 0.0);
        for (_, dose, spectrum) in &spectra {
            total += dose * exposure_hours;
            let (l, h) = let_weights(spectrum);
            low += l;
            high += h;
        }
        let weighted = low + high;
        let share = |bucket: f64| (weighted > 0.0).then(|| dose_decimal(bucket / weighted * total)).flatten();
        Some(IntegratedDose {
            dose: dose_decimal(total)?,
            low_let: share(low),
            high_let: share(high),
        })
    }

    fn dose_rate(&self, samples: &[Sample], reference: DateTime<Utc>) -> DoseRate {
        let mut rate = DoseRate::default();
        for s in samples {
            let SamplePayload::Spectrum { dose, spectrum, .. } = &s.payload else {
                continue;
            };
            let dose = decimal_f64(*dose);
            let (low, high) = let_weights(spectrum);
            let weighted = low + high;
            let (bas, haut) = if weighted > 0.0 {
                (dose * low / weighted, dose * high / weighted)
            } else {
                (0.0, 0.0)
            };
            rate.time.push(s.time - reference);
            rate.bas.push(bas);
            rate.haut.push(haut);
            rate.total.push(dose);
        }
        rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::tests::{FixedCalibrations, device};
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn spectrum_line(counts: &[(usize, i64)]) -> String {
        let mut channels = vec![0_i64; MIN_CHANNELS];
        for &(ch, n) in counts {
            channels[ch] = n;
        }
        channels.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" ")
    }

    fn export(blocks: &[(&str, &str, Vec<(usize, i64)>)]) -> RawFile {
        let mut text = String::from("LIU-0815 firmware 3.1\nchannels 256\n");
        for (stamp, dose, counts) in blocks {
            text.push_str(&spectrum_line(counts));
            text.push('\n');
            text.push_str(&format!("{} 10 0.5 {} 3 4 {} 12\n", stamp, dose, "0.25"));
        }
        RawFile::new("flight.s01", text.into_bytes())
    }

    fn parse(raw: &mut RawFile) -> Result<Vec<Sample>, ParseError> {
        let dev = device(DeviceKind::Spectrometer, "LIU-0815");
        let mut cals = FixedCalibrations::default();
        let mut ctx = ParseContext {
            device: &dev,
            legs: &[],
            calibrations: &mut cals,
            timezone: chrono_tz::Europe::Paris,
        };
        SpectrometerParser.parse_file(raw, &mut ctx)
    }

    fn sample(time: DateTime<Utc>, dose: &str, counts: &[(usize, i64)]) -> Sample {
        Sample {
            time,
            flight_leg_id: None,
            payload: SamplePayload::Spectrum {
                dose: Decimal::from_str(dose).unwrap(),
                flux: Decimal::ZERO,
                spectrum: spectrum_line(counts).replace(' ', ";"),
            },
        }
    }

    #[test]
    fn serial_number_from_header_and_rewinds() {
        let mut raw = export(&[]);
        assert_eq!(SpectrometerParser.parse_serial_number(&mut raw).unwrap(), "LIU-0815");
        assert_eq!(raw.next_line().unwrap().as_deref(), Some("LIU-0815 firmware 3.1"));
    }

    #[test]
    fn parses_blocks_and_ignores_dangling_spectrum() {
        let mut raw = export(&[
            ("15/01/24 10:00:00", "1.5", vec![(1, 3)]),
            ("15/01/24 10:05:00", "2.25", vec![(20, 1)]),
        ]);
        let mut text = String::from_utf8(raw.read_all().unwrap()).unwrap();
        text.push_str(&spectrum_line(&[]));
        text.push('\n');
        let mut raw = RawFile::new("flight.s01", text.into_bytes());

        let samples = parse(&mut raw).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].time, Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap());
        match &samples[1].payload {
            SamplePayload::Spectrum { dose, flux, spectrum } => {
                assert_eq!(*dose, Decimal::from_str("2.25").unwrap());
                assert_eq!(*flux, Decimal::from_str("0.25").unwrap());
                assert_eq!(spectrum.split(';').count(), MIN_CHANNELS);
                assert_eq!(spectrum.split(';').nth(20), Some("1"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn short_spectrum_is_malformed() {
        let text = "LIU-0815\nheader\n1 2 3\n15/01/24 10:00:00 1 2 3 4 5 6\n";
        let mut raw = RawFile::new("flight.s01", text.as_bytes().to_vec());
        assert!(matches!(parse(&mut raw), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn integration_needs_two_samples() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(SpectrometerParser.integrate_dose(&[sample(t0, "1", &[(1, 5)])]), None);
    }

    #[test]
    fn all_low_let_counts_go_to_low_bucket() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let samples = vec![
            sample(t0, "2", &[(1, 5), (12, 2)]),
            sample(t0 + Duration::minutes(30), "4", &[(3, 1)]),
        ];
        let dose = SpectrometerParser.integrate_dose(&samples).unwrap();
        // (2 + 4) µGy/h over 0.5 h each
        assert_eq!(dose.dose, Decimal::from(3));
        assert_eq!(dose.high_let, Some(Decimal::ZERO));
        assert_eq!(dose.low_let, Some(dose.dose));
    }

    #[test]
    fn integration_apportions_by_weighted_counts() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        // channel 1 weighs 40.7, channel 13 weighs 1017.5
        let samples = vec![
            sample(t0, "1", &[(1, 25)]),
            sample(t0 + Duration::hours(1), "1", &[(13, 1)]),
        ];
        let dose = SpectrometerParser.integrate_dose(&samples).unwrap();
        assert_eq!(dose.dose, Decimal::from(2));
        let low = decimal_f64(dose.low_let.unwrap());
        let high = decimal_f64(dose.high_let.unwrap());
        assert!((low - 1.0).abs() < 1e-6, "low {low}");
        assert!((high - 1.0).abs() < 1e-6, "high {high}");
    }

    #[test]
    fn empty_spectra_leave_components_unknown() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let samples = vec![sample(t0, "1", &[]), sample(t0 + Duration::hours(1), "1", &[])];
        let dose = SpectrometerParser.integrate_dose(&samples).unwrap();
        assert_eq!(dose.dose, Decimal::from(2));
        assert_eq!(dose.low_let, None);
        assert_eq!(dose.high_let, None);
    }

    #[test]
    fn rate_splits_each_sample_by_its_own_spectrum() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let samples = vec![sample(t0 + Duration::minutes(10), "3", &[(1, 25), (13, 1)])];
        let rate = SpectrometerParser.dose_rate(&samples, t0);
        assert_eq!(rate.time, vec![Duration::minutes(10)]);
        assert_eq!(rate.total, vec![3.0]);
        assert!((rate.bas[0] - 1.5).abs() < 1e-9);
        assert!((rate.haut[0] - 1.5).abs() < 1e-9);
    }
}
