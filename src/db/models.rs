//! Diesel model structs for reference data, flight schedules, instrument samples and
//! derived doses.
//!
//! Sample rows are split per device kind (`gamma_neutron_samples`, `spectrometer_samples`,
//! `telemetry_samples`); `crate::models::dose::Sample` is the kind-agnostic view used by the
//! parsers and the dose algorithms.

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::dose::{Sample, SamplePayload};
use crate::schema;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::device_versions)]
pub struct DeviceVersion {
    pub id: i64,
    pub kind: String,
    pub version: String,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::device_versions)]
pub struct NewDeviceVersion {
    pub kind: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::devices)]
pub struct Device {
    pub id: i64,
    pub kind: String,
    pub version_id: Option<i64>,
    pub serial_num: String,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::devices)]
pub struct NewDevice {
    pub kind: String,
    pub version_id: Option<i64>,
    pub serial_num: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::calibrations)]
#[diesel(belongs_to(Device))]
pub struct Calibration {
    pub id: i64,
    pub device_id: i64,
    pub effective_from: NaiveDate,
    pub low_let_coefficient: Decimal,
    pub high_let_coefficient: Decimal,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::calibrations)]
pub struct NewCalibration {
    pub device_id: i64,
    pub effective_from: NaiveDate,
    pub low_let_coefficient: Decimal,
    pub high_let_coefficient: Decimal,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::flight_logs)]
pub struct FlightLog {
    pub id: i64,
    pub filename: String,
    pub aircraft_registration: String,
    pub aircraft_model: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::flight_logs)]
pub struct NewFlightLog {
    pub filename: String,
    pub aircraft_registration: String,
    pub aircraft_model: String,
}

/// One takeoff-to-landing segment. `wheels_off..=wheels_on` is the airborne window used to
/// attribute samples.
#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::flight_legs)]
#[diesel(belongs_to(FlightLog))]
pub struct FlightLeg {
    pub id: i64,
    pub flight_log_id: i64,
    pub leg_number: String,
    pub origin: String,
    pub destination: String,
    pub scheduled_departure: DateTime<Utc>,
    pub scheduled_arrival: DateTime<Utc>,
    pub off_blocks: DateTime<Utc>,
    pub wheels_off: DateTime<Utc>,
    pub wheels_on: DateTime<Utc>,
    pub on_blocks: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::flight_legs)]
pub struct NewFlightLeg {
    pub flight_log_id: i64,
    pub leg_number: String,
    pub origin: String,
    pub destination: String,
    pub scheduled_departure: DateTime<Utc>,
    pub scheduled_arrival: DateTime<Utc>,
    pub off_blocks: DateTime<Utc>,
    pub wheels_off: DateTime<Utc>,
    pub wheels_on: DateTime<Utc>,
    pub on_blocks: DateTime<Utc>,
}

/// A leg as read from a flight log, before it belongs to a stored log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegSchedule {
    pub leg_number: String,
    pub origin: String,
    pub destination: String,
    pub scheduled_departure: DateTime<Utc>,
    pub scheduled_arrival: DateTime<Utc>,
    pub off_blocks: DateTime<Utc>,
    pub wheels_off: DateTime<Utc>,
    pub wheels_on: DateTime<Utc>,
    pub on_blocks: DateTime<Utc>,
}

impl LegSchedule {
    pub fn into_new(self, flight_log_id: i64) -> NewFlightLeg {
        NewFlightLeg {
            flight_log_id,
            leg_number: self.leg_number,
            origin: self.origin,
            destination: self.destination,
            scheduled_departure: self.scheduled_departure,
            scheduled_arrival: self.scheduled_arrival,
            off_blocks: self.off_blocks,
            wheels_off: self.wheels_off,
            wheels_on: self.wheels_on,
            on_blocks: self.on_blocks,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::instrument_files)]
#[diesel(belongs_to(FlightLog))]
#[diesel(belongs_to(Device))]
pub struct InstrumentFile {
    pub id: i64,
    pub flight_log_id: i64,
    pub device_id: i64,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::instrument_files)]
pub struct NewInstrumentFile {
    pub flight_log_id: i64,
    pub device_id: i64,
    pub filename: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::gamma_neutron_samples)]
pub struct GammaNeutronRow {
    pub id: i64,
    pub file_id: i64,
    pub flight_leg_id: Option<i64>,
    pub time: DateTime<Utc>,
    pub gamma: i32,
    pub neutron: i32,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::gamma_neutron_samples)]
pub struct NewGammaNeutronRow {
    pub file_id: i64,
    pub flight_leg_id: Option<i64>,
    pub time: DateTime<Utc>,
    pub gamma: i32,
    pub neutron: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::spectrometer_samples)]
pub struct SpectrometerRow {
    pub id: i64,
    pub file_id: i64,
    pub flight_leg_id: Option<i64>,
    pub time: DateTime<Utc>,
    pub dose: Decimal,
    pub flux: Decimal,
    pub spectrum: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::spectrometer_samples)]
pub struct NewSpectrometerRow {
    pub file_id: i64,
    pub flight_leg_id: Option<i64>,
    pub time: DateTime<Utc>,
    pub dose: Decimal,
    pub flux: Decimal,
    pub spectrum: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::telemetry_samples)]
pub struct TelemetryRow {
    pub id: i64,
    pub file_id: i64,
    pub flight_leg_id: Option<i64>,
    pub time: DateTime<Utc>,
    pub volt: Decimal,
    pub current: Decimal,
    pub temp: Decimal,
    pub qfactor: Decimal,
    pub gamma_dose: Decimal,
    pub dose_equivalent: Decimal,
    pub low_let: Decimal,
    pub high_let: Decimal,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::telemetry_samples)]
pub struct NewTelemetryRow {
    pub file_id: i64,
    pub flight_leg_id: Option<i64>,
    pub time: DateTime<Utc>,
    pub volt: Decimal,
    pub current: Decimal,
    pub temp: Decimal,
    pub qfactor: Decimal,
    pub gamma_dose: Decimal,
    pub dose_equivalent: Decimal,
    pub low_let: Decimal,
    pub high_let: Decimal,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::integrated_doses)]
pub struct IntegratedDoseRow {
    pub id: i64,
    pub flight_leg_id: i64,
    pub file_id: i64,
    pub dose: Option<Decimal>,
    pub low_let: Option<Decimal>,
    pub high_let: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::integrated_doses)]
pub struct NewIntegratedDose {
    pub flight_leg_id: i64,
    pub file_id: i64,
    pub dose: Option<Decimal>,
    pub low_let: Option<Decimal>,
    pub high_let: Option<Decimal>,
}

/// Sample rows of one file, grouped by the table they land in.
#[derive(Debug, Default)]
pub struct SampleBatch {
    pub gamma_neutron: Vec<NewGammaNeutronRow>,
    pub spectrometer: Vec<NewSpectrometerRow>,
    pub telemetry: Vec<NewTelemetryRow>,
}

impl SampleBatch {
    pub fn from_samples(file_id: i64, samples: &[Sample]) -> Self {
        let mut batch = SampleBatch::default();
        for s in samples {
            match &s.payload {
                SamplePayload::GammaNeutron { gamma, neutron } => batch.gamma_neutron.push(NewGammaNeutronRow {
                    file_id,
                    flight_leg_id: s.flight_leg_id,
                    time: s.time,
                    gamma: *gamma,
                    neutron: *neutron,
                }),
                SamplePayload::Spectrum { dose, flux, spectrum } => batch.spectrometer.push(NewSpectrometerRow {
                    file_id,
                    flight_leg_id: s.flight_leg_id,
                    time: s.time,
                    dose: *dose,
                    flux: *flux,
                    spectrum: spectrum.clone(),
                }),
                SamplePayload::Telemetry(t) => batch.telemetry.push(NewTelemetryRow {
                    file_id,
                    flight_leg_id: s.flight_leg_id,
                    time: s.time,
                    volt: t.volt,
                    current: t.current,
                    temp: t.temp,
                    qfactor: t.qfactor,
                    gamma_dose: t.gamma_dose,
                    dose_equivalent: t.dose_equivalent,
                    low_let: t.low_let,
                    high_let: t.high_let,
                }),
            }
        }
        batch
    }
}

impl From<GammaNeutronRow> for Sample {
    fn from(row: GammaNeutronRow) -> Self {
        Sample {
            time: row.time,
            flight_leg_id: row.flight_leg_id,
            payload: SamplePayload::GammaNeutron {
                gamma: row.gamma,
                neutron: row.neutron,
            },
        }
    }
}

impl From<SpectrometerRow> for Sample {
    fn from(row: SpectrometerRow) -> Self {
        Sample {
            time: row.time,
            flight_leg_id: row.flight_leg_id,
            payload: SamplePayload::Spectrum {
                dose: row.dose,
                flux: row.flux,
                spectrum: row.spectrum,
            },
        }
    }
}

impl From<TelemetryRow> for Sample {
    fn from(row: TelemetryRow) -> Self {
        Sample {
            time: row.time,
            flight_leg_id: row.flight_leg_id,
            payload: SamplePayload::Telemetry(crate::models::dose::TelemetryReading {
                volt: row.volt,
                current: row.current,
                temp: row.temp,
                qfactor: row.qfactor,
                gamma_dose: row.gamma_dose,
                dose_equivalent: row.dose_equivalent,
                low_let: row.low_let,
                high_let: row.high_let,
            }),
        }
    }
}
