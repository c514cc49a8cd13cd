//! Persistence boundary for the import pipeline.
//!
//! [`DoseStore`] lists the reads and all-or-nothing writes the import and reporting services
//! need. [`PgStore`] implements it on a diesel `PgConnection`; every multi-row write runs in
//! one transaction so a failure never leaves part of a file or flight log behind.

use chrono::NaiveDate;
use diesel::PgConnection;
use diesel::prelude::*;

use crate::db::models::*;
use crate::devices::CalibrationLookup;
use crate::models::dose::{DeviceKind, Sample};
use crate::schema;
use crate::services::ingest;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("{0} not found")]
    NotFound(String),
}

fn not_found(what: &str, id: i64) -> StoreError {
    StoreError::NotFound(format!("{} {}", what, id))
}

pub trait DoseStore: CalibrationLookup {
    fn insert_device_version(&mut self, row: NewDeviceVersion) -> Result<DeviceVersion, StoreError>;
    fn find_device_version(&mut self, kind: DeviceKind, version: &str) -> Result<Option<DeviceVersion>, StoreError>;
    fn device_version(&mut self, id: i64) -> Result<DeviceVersion, StoreError>;

    fn insert_device(&mut self, row: NewDevice) -> Result<Device, StoreError>;
    fn find_device(&mut self, kind: DeviceKind, version_id: Option<i64>, serial: &str)
    -> Result<Option<Device>, StoreError>;
    fn device(&mut self, id: i64) -> Result<Device, StoreError>;

    fn insert_calibration(&mut self, row: NewCalibration) -> Result<Calibration, StoreError>;

    /// Insert the log and all of its legs atomically.
    fn insert_flight_log(&mut self, log: NewFlightLog, legs: &[LegSchedule]) -> Result<FlightLog, StoreError>;
    /// Legs of one log ordered by wheels-off.
    fn flight_legs(&mut self, flight_log_id: i64) -> Result<Vec<FlightLeg>, StoreError>;
    fn flight_leg(&mut self, id: i64) -> Result<FlightLeg, StoreError>;
    /// Deletes the log with its legs, files, samples and integrated doses.
    fn delete_flight_log(&mut self, id: i64) -> Result<bool, StoreError>;

    /// Insert the file record and all of its samples atomically.
    fn insert_instrument_file(&mut self, file: NewInstrumentFile, samples: &[Sample])
    -> Result<InstrumentFile, StoreError>;
    fn instrument_file(&mut self, id: i64) -> Result<InstrumentFile, StoreError>;
    fn delete_instrument_file(&mut self, id: i64) -> Result<bool, StoreError>;

    /// Samples of `file_id` recorded during `flight_leg_id`, in time order.
    fn samples(&mut self, kind: DeviceKind, file_id: i64, flight_leg_id: i64) -> Result<Vec<Sample>, StoreError>;

    /// Replace every integrated dose of `file_id` with `rows`.
    fn replace_integrated_doses(&mut self, file_id: i64, rows: &[NewIntegratedDose]) -> Result<usize, StoreError>;
    fn integrated_doses(&mut self, file_id: i64) -> Result<Vec<IntegratedDoseRow>, StoreError>;
}

pub struct PgStore<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgStore<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        PgStore { conn }
    }
}

impl CalibrationLookup for PgStore<'_> {
    fn calibration_in_force(&mut self, device_id: i64, on: NaiveDate) -> Result<Option<Calibration>, StoreError> {
        use schema::calibrations::dsl as C;

        Ok(C::calibrations
            .filter(C::device_id.eq(device_id))
            .filter(C::effective_from.le(on))
            .order((C::effective_from.desc(), C::id.desc()))
            .select(Calibration::as_select())
            .first(self.conn)
            .optional()?)
    }
}

impl DoseStore for PgStore<'_> {
    fn insert_device_version(&mut self, row: NewDeviceVersion) -> Result<DeviceVersion, StoreError> {
        use schema::device_versions::dsl as V;

        Ok(diesel::insert_into(V::device_versions)
            .values(&row)
            .returning(DeviceVersion::as_returning())
            .get_result(self.conn)?)
    }

    fn find_device_version(&mut self, kind: DeviceKind, version: &str) -> Result<Option<DeviceVersion>, StoreError> {
        use schema::device_versions::dsl as V;

        Ok(V::device_versions
            .filter(V::kind.eq(kind.as_str()))
            .filter(V::version.eq(version))
            .select(DeviceVersion::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn device_version(&mut self, id: i64) -> Result<DeviceVersion, StoreError> {
        use schema::device_versions::dsl as V;

        V::device_versions
            .find(id)
            .select(DeviceVersion::as_select())
            .first(self.conn)
            .optional()?
            .ok_or_else(|| not_found("device version", id))
    }

    fn insert_device(&mut self, row: NewDevice) -> Result<Device, StoreError> {
        use schema::devices::dsl as D;

        Ok(diesel::insert_into(D::devices)
            .values(&row)
            .returning(Device::as_returning())
            .get_result(self.conn)?)
    }

    fn find_device(
        &mut self,
        kind: DeviceKind,
        version_id: Option<i64>,
        serial: &str,
    ) -> Result<Option<Device>, StoreError> {
        use schema::devices::dsl as D;

        let mut query = D::devices
            .filter(D::kind.eq(kind.as_str()))
            .filter(D::serial_num.eq(serial))
            .into_boxed();
        query = match version_id {
            Some(v) => query.filter(D::version_id.eq(v)),
            None => query.filter(D::version_id.is_null()),
        };
        Ok(query
            .order(D::id.asc())
            .select(Device::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn device(&mut self, id: i64) -> Result<Device, StoreError> {
        use schema::devices::dsl as D;

        D::devices
            .find(id)
            .select(Device::as_select())
            .first(self.conn)
            .optional()?
            .ok_or_else(|| not_found("device", id))
    }

    fn insert_calibration(&mut self, row: NewCalibration) -> Result<Calibration, StoreError> {
        use schema::calibrations::dsl as C;

        Ok(diesel::insert_into(C::calibrations)
            .values(&row)
            .returning(Calibration::as_returning())
            .get_result(self.conn)?)
    }

    fn insert_flight_log(&mut self, log: NewFlightLog, legs: &[LegSchedule]) -> Result<FlightLog, StoreError> {
        use schema::flight_logs::dsl as F;

        self.conn.transaction::<_, StoreError, _>(|conn| {
            let saved: FlightLog = diesel::insert_into(F::flight_logs)
                .values(&log)
                .returning(FlightLog::as_returning())
                .get_result(conn)?;
            let rows = legs.iter().map(|l| l.clone().into_new(saved.id)).collect::<Vec<_>>();
            ingest::insert_flight_legs(conn, &rows)?;
            Ok(saved)
        })
    }

    fn flight_legs(&mut self, flight_log_id: i64) -> Result<Vec<FlightLeg>, StoreError> {
        use schema::flight_legs::dsl as L;

        Ok(L::flight_legs
            .filter(L::flight_log_id.eq(flight_log_id))
            .order((L::wheels_off.asc(), L::id.asc()))
            .select(FlightLeg::as_select())
            .load(self.conn)?)
    }

    fn flight_leg(&mut self, id: i64) -> Result<FlightLeg, StoreError> {
        use schema::flight_legs::dsl as L;

        L::flight_legs
            .find(id)
            .select(FlightLeg::as_select())
            .first(self.conn)
            .optional()?
            .ok_or_else(|| not_found("flight leg", id))
    }

    fn delete_flight_log(&mut self, id: i64) -> Result<bool, StoreError> {
        use schema::flight_logs::dsl as F;

        Ok(diesel::delete(F::flight_logs.find(id)).execute(self.conn)? > 0)
    }

    fn insert_instrument_file(
        &mut self,
        file: NewInstrumentFile,
        samples: &[Sample],
    ) -> Result<InstrumentFile, StoreError> {
        use schema::instrument_files::dsl as I;

        self.conn.transaction::<_, StoreError, _>(|conn| {
            let saved: InstrumentFile = diesel::insert_into(I::instrument_files)
                .values(&file)
                .returning(InstrumentFile::as_returning())
                .get_result(conn)?;
            let batch = SampleBatch::from_samples(saved.id, samples);
            ingest::insert_sample_batch(conn, &batch)?;
            Ok(saved)
        })
    }

    fn instrument_file(&mut self, id: i64) -> Result<InstrumentFile, StoreError> {
        use schema::instrument_files::dsl as I;

        I::instrument_files
            .find(id)
            .select(InstrumentFile::as_select())
            .first(self.conn)
            .optional()?
            .ok_or_else(|| not_found("instrument file", id))
    }

    fn delete_instrument_file(&mut self, id: i64) -> Result<bool, StoreError> {
        use schema::instrument_files::dsl as I;

        Ok(diesel::delete(I::instrument_files.find(id)).execute(self.conn)? > 0)
    }

    fn samples(&mut self, kind: DeviceKind, file_id: i64, flight_leg_id: i64) -> Result<Vec<Sample>, StoreError> {
        let samples = match kind {
            DeviceKind::GammaNeutron => {
                use schema::gamma_neutron_samples::dsl as S;
                S::gamma_neutron_samples
                    .filter(S::file_id.eq(file_id).and(S::flight_leg_id.eq(flight_leg_id)))
                    .order((S::time.asc(), S::id.asc()))
                    .select(GammaNeutronRow::as_select())
                    .load(self.conn)?
                    .into_iter()
                    .map(Sample::from)
                    .collect()
            }
            DeviceKind::Spectrometer => {
                use schema::spectrometer_samples::dsl as S;
                S::spectrometer_samples
                    .filter(S::file_id.eq(file_id).and(S::flight_leg_id.eq(flight_leg_id)))
                    .order((S::time.asc(), S::id.asc()))
                    .select(SpectrometerRow::as_select())
                    .load(self.conn)?
                    .into_iter()
                    .map(Sample::from)
                    .collect()
            }
            DeviceKind::Telemetry => {
                use schema::telemetry_samples::dsl as S;
                S::telemetry_samples
                    .filter(S::file_id.eq(file_id).and(S::flight_leg_id.eq(flight_leg_id)))
                    .order((S::time.asc(), S::id.asc()))
                    .select(TelemetryRow::as_select())
                    .load(self.conn)?
                    .into_iter()
                    .map(Sample::from)
                    .collect()
            }
        };
        Ok(samples)
    }

    fn replace_integrated_doses(&mut self, file_id: i64, rows: &[NewIntegratedDose]) -> Result<usize, StoreError> {
        use schema::integrated_doses::dsl as D;

        self.conn.transaction::<_, StoreError, _>(|conn| {
            diesel::delete(D::integrated_doses.filter(D::file_id.eq(file_id))).execute(conn)?;
            ingest::insert_integrated_doses(conn, rows)
        })
    }

    fn integrated_doses(&mut self, file_id: i64) -> Result<Vec<IntegratedDoseRow>, StoreError> {
        use schema::integrated_doses::dsl as D;

        Ok(D::integrated_doses
            .filter(D::file_id.eq(file_id))
            .order(D::id.asc())
            .select(IntegratedDoseRow::as_select())
            .load(self.conn)?)
    }
}
