//! In-memory [`DoseStore`] for service tests. Mirrors the cascades and all-or-nothing writes
//! of the Postgres schema.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::db::models::*;
use crate::db::store::{DoseStore, StoreError};
use crate::devices::CalibrationLookup;
use crate::models::dose::{DeviceKind, Sample};

#[derive(Debug, Clone)]
pub(crate) struct StoredSample {
    pub file_id: i64,
    pub sample: Sample,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    next_id: i64,
    pub versions: Vec<DeviceVersion>,
    pub devices: Vec<Device>,
    pub calibrations: Vec<Calibration>,
    pub flight_logs: Vec<FlightLog>,
    pub legs: Vec<FlightLeg>,
    pub files: Vec<InstrumentFile>,
    pub samples: Vec<StoredSample>,
    pub doses: Vec<IntegratedDoseRow>,
    /// Reject the next sample insert, as a failing transaction would.
    pub fail_sample_insert: bool,
    /// Reject integrated-dose writes.
    pub fail_dose_write: bool,
}

fn not_found(what: &str, id: i64) -> StoreError {
    StoreError::NotFound(format!("{} {}", what, id))
}

fn uploaded_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

impl MemoryStore {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn purge_file(&mut self, file_id: i64) {
        self.files.retain(|f| f.id != file_id);
        self.samples.retain(|s| s.file_id != file_id);
        self.doses.retain(|d| d.file_id != file_id);
    }
}

impl CalibrationLookup for MemoryStore {
    fn calibration_in_force(&mut self, device_id: i64, on: NaiveDate) -> Result<Option<Calibration>, StoreError> {
        Ok(self
            .calibrations
            .iter()
            .filter(|c| c.device_id == device_id && c.effective_from <= on)
            .max_by_key(|c| (c.effective_from, c.id))
            .cloned())
    }
}

impl DoseStore for MemoryStore {
    fn insert_device_version(&mut self, row: NewDeviceVersion) -> Result<DeviceVersion, StoreError> {
        let saved = DeviceVersion {
            id: self.id(),
            kind: row.kind,
            version: row.version,
        };
        self.versions.push(saved.clone());
        Ok(saved)
    }

    fn find_device_version(&mut self, kind: DeviceKind, version: &str) -> Result<Option<DeviceVersion>, StoreError> {
        Ok(self
            .versions
            .iter()
            .find(|v| v.kind == kind.as_str() && v.version == version)
            .cloned())
    }

    fn device_version(&mut self, id: i64) -> Result<DeviceVersion, StoreError> {
        self.versions
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or_else(|| not_found("device version", id))
    }

    fn insert_device(&mut self, row: NewDevice) -> Result<Device, StoreError> {
        let saved = Device {
            id: self.id(),
            kind: row.kind,
            version_id: row.version_id,
            serial_num: row.serial_num,
        };
        self.devices.push(saved.clone());
        Ok(saved)
    }

    fn find_device(
        &mut self,
        kind: DeviceKind,
        version_id: Option<i64>,
        serial: &str,
    ) -> Result<Option<Device>, StoreError> {
        Ok(self
            .devices
            .iter()
            .find(|d| d.kind == kind.as_str() && d.version_id == version_id && d.serial_num == serial)
            .cloned())
    }

    fn device(&mut self, id: i64) -> Result<Device, StoreError> {
        self.devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| not_found("device", id))
    }

    fn insert_calibration(&mut self, row: NewCalibration) -> Result<Calibration, StoreError> {
        let saved = Calibration {
            id: self.id(),
            device_id: row.device_id,
            effective_from: row.effective_from,
            low_let_coefficient: row.low_let_coefficient,
            high_let_coefficient: row.high_let_coefficient,
        };
        self.calibrations.push(saved.clone());
        Ok(saved)
    }

    fn insert_flight_log(&mut self, log: NewFlightLog, legs: &[LegSchedule]) -> Result<FlightLog, StoreError> {
        let saved = FlightLog {
            id: self.id(),
            filename: log.filename,
            aircraft_registration: log.aircraft_registration,
            aircraft_model: log.aircraft_model,
            uploaded_at: uploaded_at(),
        };
        for leg in legs {
            let new = leg.clone().into_new(saved.id);
            let id = self.id();
            self.legs.push(FlightLeg {
                id,
                flight_log_id: new.flight_log_id,
                leg_number: new.leg_number,
                origin: new.origin,
                destination: new.destination,
                scheduled_departure: new.scheduled_departure,
                scheduled_arrival: new.scheduled_arrival,
                off_blocks: new.off_blocks,
                wheels_off: new.wheels_off,
                wheels_on: new.wheels_on,
                on_blocks: new.on_blocks,
            });
        }
        self.flight_logs.push(saved.clone());
        Ok(saved)
    }

    fn flight_legs(&mut self, flight_log_id: i64) -> Result<Vec<FlightLeg>, StoreError> {
        let mut legs = self
            .legs
            .iter()
            .filter(|l| l.flight_log_id == flight_log_id)
            .cloned()
            .collect::<Vec<_>>();
        legs.sort_by_key(|l| (l.wheels_off, l.id));
        Ok(legs)
    }

    fn flight_leg(&mut self, id: i64) -> Result<FlightLeg, StoreError> {
        self.legs
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or_else(|| not_found("flight leg", id))
    }

    fn delete_flight_log(&mut self, id: i64) -> Result<bool, StoreError> {
        let before = self.flight_logs.len();
        self.flight_logs.retain(|l| l.id != id);
        if self.flight_logs.len() == before {
            return Ok(false);
        }
        let files = self
            .files
            .iter()
            .filter(|f| f.flight_log_id == id)
            .map(|f| f.id)
            .collect::<Vec<_>>();
        for file_id in files {
            self.purge_file(file_id);
        }
        let legs = self
            .legs
            .iter()
            .filter(|l| l.flight_log_id == id)
            .map(|l| l.id)
            .collect::<Vec<_>>();
        self.legs.retain(|l| l.flight_log_id != id);
        self.doses.retain(|d| !legs.contains(&d.flight_leg_id));
        Ok(true)
    }

    fn insert_instrument_file(
        &mut self,
        file: NewInstrumentFile,
        samples: &[Sample],
    ) -> Result<InstrumentFile, StoreError> {
        if std::mem::take(&mut self.fail_sample_insert) {
            return Err(StoreError::Database(diesel::result::Error::RollbackTransaction));
        }
        let saved = InstrumentFile {
            id: self.id(),
            flight_log_id: file.flight_log_id,
            device_id: file.device_id,
            filename: file.filename,
            uploaded_at: uploaded_at(),
        };
        self.samples.extend(samples.iter().map(|s| StoredSample {
            file_id: saved.id,
            sample: s.clone(),
        }));
        self.files.push(saved.clone());
        Ok(saved)
    }

    fn instrument_file(&mut self, id: i64) -> Result<InstrumentFile, StoreError> {
        self.files
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .ok_or_else(|| not_found("instrument file", id))
    }

    fn delete_instrument_file(&mut self, id: i64) -> Result<bool, StoreError> {
        let existed = self.files.iter().any(|f| f.id == id);
        self.purge_file(id);
        Ok(existed)
    }

    fn samples(&mut self, kind: DeviceKind, file_id: i64, flight_leg_id: i64) -> Result<Vec<Sample>, StoreError> {
        let mut samples = self
            .samples
            .iter()
            .filter(|s| {
                s.file_id == file_id && s.sample.flight_leg_id == Some(flight_leg_id) && s.sample.payload.kind() == kind
            })
            .map(|s| s.sample.clone())
            .collect::<Vec<_>>();
        samples.sort_by_key(|s| s.time);
        Ok(samples)
    }

    fn replace_integrated_doses(&mut self, file_id: i64, rows: &[NewIntegratedDose]) -> Result<usize, StoreError> {
        if self.fail_dose_write {
            return Err(StoreError::Database(diesel::result::Error::RollbackTransaction));
        }
        self.doses.retain(|d| d.file_id != file_id);
        for row in rows {
            let id = self.id();
            self.doses.push(IntegratedDoseRow {
                id,
                flight_leg_id: row.flight_leg_id,
                file_id: row.file_id,
                dose: row.dose,
                low_let: row.low_let,
                high_let: row.high_let,
            });
        }
        Ok(rows.len())
    }

    fn integrated_doses(&mut self, file_id: i64) -> Result<Vec<IntegratedDoseRow>, StoreError> {
        Ok(self.doses.iter().filter(|d| d.file_id == file_id).cloned().collect())
    }
}
