//! Import pipeline: flight log first, then each instrument file in turn.
//!
//! A device file is parsed completely in memory before anything is written, then its record
//! and samples are stored in one transaction and the per-leg integrated doses are recomputed.
//! Failures are isolated per file; the outcome of each file is reported back to the caller.

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use log::{debug, info, warn};

use crate::db::models::{FlightLeg, FlightLog, InstrumentFile, NewFlightLog, NewInstrumentFile, NewIntegratedDose};
use crate::db::store::{DoseStore, StoreError};
use crate::devices::{DeviceParser, DeviceRegistry, ParseContext, ParseError, RawFile};
use crate::models::dose::{DeviceKind, DoseRateReport, device_label, fits_dose_column};
use crate::services::flight_log::{FlightLogError, parse_flight_log};
use crate::services::refs::describe_device;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("flight log {file}: {source}")]
    FlightLog {
        file: String,
        #[source]
        source: FlightLogError,
    },
    #[error("device {device} does not exist")]
    UnrecognizedDevice { device: String },
    #[error("{file} ({device}): wrong format: {detail}")]
    MalformedFile { file: String, device: String, detail: String },
    #[error("{file} ({device}): no calibration in force on {date}")]
    MissingCalibration { file: String, device: String, date: NaiveDate },
    #[error("no parser registered for {0}")]
    UnsupportedKind(DeviceKind),
    #[error("stored device has unknown kind {0:?}")]
    UnknownKind(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ImportError {
    /// Short message suitable for showing to the uploader.
    pub fn user_message(&self) -> String {
        match self {
            ImportError::FlightLog { .. } => "flight log: wrong format.".to_string(),
            ImportError::UnrecognizedDevice { device } => format!("device {} does not exist.", device),
            ImportError::MalformedFile { .. } => "wrong format.".to_string(),
            ImportError::MissingCalibration { device, date, .. } => {
                format!("no calibration for device {} on {}.", device, date)
            }
            ImportError::UnsupportedKind(kind) => format!("{} files are not supported.", kind),
            ImportError::UnknownKind(_) | ImportError::Store(_) => "storage error.".to_string(),
        }
    }
}

/// One instrument file queued for import.
#[derive(Debug)]
pub struct DeviceUpload {
    pub kind: DeviceKind,
    pub version: Option<String>,
    pub file: RawFile,
}

#[derive(Debug)]
pub struct ImportedFile {
    pub file: InstrumentFile,
    pub device: String,
    pub samples: usize,
    /// Samples that fell inside a leg's airborne window.
    pub assigned: usize,
    pub doses: Vec<NewIntegratedDose>,
}

#[derive(Debug)]
pub struct FileOutcome {
    pub filename: String,
    pub kind: DeviceKind,
    pub result: Result<ImportedFile, ImportError>,
}

#[derive(Debug)]
pub struct BatchReport {
    pub flight_log: FlightLog,
    pub legs: Vec<FlightLeg>,
    pub files: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn failures(&self) -> usize {
        self.files.iter().filter(|f| f.result.is_err()).count()
    }
}

pub struct Importer<'r> {
    registry: &'r DeviceRegistry,
    timezone: Tz,
}

impl<'r> Importer<'r> {
    pub fn new(registry: &'r DeviceRegistry, timezone: Tz) -> Self {
        Importer { registry, timezone }
    }

    fn parser(&self, kind: DeviceKind) -> Result<&'r dyn DeviceParser, ImportError> {
        self.registry.get(kind).ok_or(ImportError::UnsupportedKind(kind))
    }

    /// Parse and store a flight log with its legs. Returns the legs as stored.
    pub fn import_flight_log<S: DoseStore>(
        &self,
        store: &mut S,
        raw: &mut RawFile,
        year_hint: Option<i32>,
        today: NaiveDate,
    ) -> Result<(FlightLog, Vec<FlightLeg>), ImportError> {
        let file = raw.name().to_string();
        let text = raw.read_text().map_err(|e| ImportError::FlightLog {
            file: file.clone(),
            source: FlightLogError::Malformed(e.to_string()),
        })?;
        let parsed = parse_flight_log(&text, year_hint, today).map_err(|source| {
            warn!("Flight log {} rejected: {}", file, source);
            ImportError::FlightLog {
                file: file.clone(),
                source,
            }
        })?;

        let log = store.insert_flight_log(
            NewFlightLog {
                filename: file.clone(),
                aircraft_registration: parsed.aircraft_registration,
                aircraft_model: parsed.aircraft_model,
            },
            &parsed.legs,
        )?;
        let legs = store.flight_legs(log.id)?;
        info!(
            "Flight log {} stored (id={}, aircraft={} {}, legs={})",
            file,
            log.id,
            log.aircraft_registration,
            log.aircraft_model,
            legs.len()
        );
        Ok((log, legs))
    }

    /// Import one instrument file against the legs of `flight_log_id`.
    pub fn import_instrument_file<S: DoseStore>(
        &self,
        store: &mut S,
        flight_log_id: i64,
        upload: &mut DeviceUpload,
    ) -> Result<ImportedFile, ImportError> {
        let parser = self.parser(upload.kind)?;
        let file = upload.file.name().to_string();
        let version = upload.version.as_deref();

        let serial = parser.parse_serial_number(&mut upload.file).map_err(|e| {
            debug!("{}: serial number unreadable: {}", file, e);
            ImportError::MalformedFile {
                file: file.clone(),
                device: device_label(upload.kind, version, "?"),
                detail: e.to_string(),
            }
        })?;
        let label = device_label(upload.kind, version, &serial);
        let unrecognized = || {
            warn!("{}: device {} is not registered", file, label);
            ImportError::UnrecognizedDevice { device: label.clone() }
        };

        let version_id = match version {
            Some(v) => Some(store.find_device_version(upload.kind, v)?.ok_or_else(unrecognized)?.id),
            None => None,
        };
        let device = store
            .find_device(upload.kind, version_id, &serial)?
            .ok_or_else(unrecognized)?;

        let legs = store.flight_legs(flight_log_id)?;
        let samples = {
            let mut ctx = ParseContext {
                device: &device,
                legs: &legs,
                calibrations: &mut *store,
                timezone: self.timezone,
            };
            parser.parse_file(&mut upload.file, &mut ctx)
        }
        .map_err(|e| match e {
            ParseError::MissingCalibration { date, .. } => ImportError::MissingCalibration {
                file: file.clone(),
                device: label.clone(),
                date,
            },
            ParseError::Store(e) => ImportError::Store(e),
            other => {
                warn!("{} ({}): {}", file, label, other);
                ImportError::MalformedFile {
                    file: file.clone(),
                    device: label.clone(),
                    detail: other.to_string(),
                }
            }
        })?;
        let assigned = samples.iter().filter(|s| s.flight_leg_id.is_some()).count();
        debug!("{}: {} samples parsed, {} inside a leg", file, samples.len(), assigned);

        let saved = store.insert_instrument_file(
            NewInstrumentFile {
                flight_log_id,
                device_id: device.id,
                filename: file.clone(),
            },
            &samples,
        )?;

        let doses = match self.refresh_integrated_doses(store, parser, &saved, &legs) {
            Ok(doses) => doses,
            Err(e) => {
                // a file is never kept without its integrated doses
                if let Err(cleanup) = store.delete_instrument_file(saved.id) {
                    warn!("{}: cleanup of file {} failed: {}", file, saved.id, cleanup);
                }
                return Err(e);
            }
        };

        info!(
            "{} ({}) imported: file id={}, samples={}, assigned={}, legs with dose={}",
            file,
            label,
            saved.id,
            samples.len(),
            assigned,
            doses.len()
        );
        Ok(ImportedFile {
            file: saved,
            device: label,
            samples: samples.len(),
            assigned,
            doses,
        })
    }

    /// Recompute the integrated dose of `file` for every leg from its stored samples.
    fn refresh_integrated_doses<S: DoseStore>(
        &self,
        store: &mut S,
        parser: &dyn DeviceParser,
        file: &InstrumentFile,
        legs: &[FlightLeg],
    ) -> Result<Vec<NewIntegratedDose>, ImportError> {
        let mut rows = Vec::new();
        for leg in legs {
            let samples = store.samples(parser.kind(), file.id, leg.id)?;
            let Some(dose) = parser.integrate_dose(&samples) else {
                continue;
            };
            let column = |value: Option<rust_decimal::Decimal>| {
                value.filter(|v| {
                    let fits = fits_dose_column(*v);
                    if !fits {
                        warn!("file {} leg {}: integrated value {} out of range", file.id, leg.id, v);
                    }
                    fits
                })
            };
            rows.push(NewIntegratedDose {
                flight_leg_id: leg.id,
                file_id: file.id,
                dose: column(Some(dose.dose)),
                low_let: column(dose.low_let),
                high_let: column(dose.high_let),
            });
        }
        store.replace_integrated_doses(file.id, &rows)?;
        Ok(rows)
    }

    /// Import a flight log and then every upload against it. Only a flight-log failure aborts
    /// the batch; file failures are reported in the returned outcomes.
    pub fn import_batch<S: DoseStore>(
        &self,
        store: &mut S,
        flight_log: &mut RawFile,
        year_hint: Option<i32>,
        uploads: Vec<DeviceUpload>,
    ) -> Result<BatchReport, ImportError> {
        let today = Utc::now().date_naive();
        let (log, legs) = self.import_flight_log(store, flight_log, year_hint, today)?;

        let total = uploads.len();
        let mut files = Vec::with_capacity(total);
        for (i, mut upload) in uploads.into_iter().enumerate() {
            info!("Importing file {}/{}: {} ({})", i + 1, total, upload.file.name(), upload.kind);
            let result = self.import_instrument_file(store, log.id, &mut upload);
            if let Err(e) = &result {
                warn!("{}: import failed: {}", upload.file.name(), e);
            }
            files.push(FileOutcome {
                filename: upload.file.name().to_string(),
                kind: upload.kind,
                result,
            });
        }

        let report = BatchReport {
            flight_log: log,
            legs,
            files,
        };
        info!(
            "Batch for flight log {} done: {} file(s), {} failed",
            report.flight_log.id,
            total,
            report.failures()
        );
        Ok(report)
    }

    /// Dose-rate curve of one file over one leg, relative to the leg's wheels-off.
    pub fn dose_rate_report<S: DoseStore>(
        &self,
        store: &mut S,
        file_id: i64,
        flight_leg_id: i64,
    ) -> Result<DoseRateReport, ImportError> {
        let file = store.instrument_file(file_id)?;
        let device = store.device(file.device_id)?;
        let kind = device
            .kind
            .parse::<DeviceKind>()
            .map_err(|_| ImportError::UnknownKind(device.kind.clone()))?;
        let parser = self.parser(kind)?;
        let leg = store.flight_leg(flight_leg_id)?;
        let samples = store.samples(kind, file_id, flight_leg_id)?;

        Ok(DoseRateReport {
            from: leg.origin.clone(),
            to: leg.destination.clone(),
            dev: describe_device(store, &device)?,
            rate: parser.dose_rate(&samples, leg.wheels_off),
        })
    }
}

pub fn delete_instrument_file<S: DoseStore>(store: &mut S, id: i64) -> Result<bool, ImportError> {
    let deleted = store.delete_instrument_file(id)?;
    if deleted {
        info!("Deleted instrument file {} with its samples and doses", id);
    } else {
        warn!("Instrument file {} not found", id);
    }
    Ok(deleted)
}

pub fn delete_flight_log<S: DoseStore>(store: &mut S, id: i64) -> Result<bool, ImportError> {
    let deleted = store.delete_flight_log(id)?;
    if deleted {
        info!("Deleted flight log {} with its legs and files", id);
    } else {
        warn!("Flight log {} not found", id);
    }
    Ok(deleted)
}
