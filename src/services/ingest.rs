use crate::db::models::{NewFlightLeg, NewIntegratedDose, SampleBatch};
use crate::db::store::StoreError;
use crate::schema;
use diesel::PgConnection;
use diesel::prelude::*;

/// Rows per INSERT statement; keeps the widest sample table under the 65535 bind-parameter
/// limit of the Postgres protocol.
const ROWS_PER_STATEMENT: usize = 2_000;

pub fn insert_flight_legs(conn: &mut PgConnection, rows: &[NewFlightLeg]) -> Result<usize, StoreError> {
    use schema::flight_legs::dsl as L;

    let mut inserted = 0;
    for chunk in rows.chunks(ROWS_PER_STATEMENT) {
        inserted += diesel::insert_into(L::flight_legs).values(chunk).execute(conn)?;
    }
    Ok(inserted)
}

pub fn insert_sample_batch(conn: &mut PgConnection, batch: &SampleBatch) -> Result<usize, StoreError> {
    let mut inserted = 0;

    for chunk in batch.gamma_neutron.chunks(ROWS_PER_STATEMENT) {
        use schema::gamma_neutron_samples::dsl as G;
        inserted += diesel::insert_into(G::gamma_neutron_samples).values(chunk).execute(conn)?;
    }
    for chunk in batch.spectrometer.chunks(ROWS_PER_STATEMENT) {
        use schema::spectrometer_samples::dsl as S;
        inserted += diesel::insert_into(S::spectrometer_samples).values(chunk).execute(conn)?;
    }
    for chunk in batch.telemetry.chunks(ROWS_PER_STATEMENT) {
        use schema::telemetry_samples::dsl as T;
        inserted += diesel::insert_into(T::telemetry_samples).values(chunk).execute(conn)?;
    }

    Ok(inserted)
}

pub fn insert_integrated_doses(conn: &mut PgConnection, rows: &[NewIntegratedDose]) -> Result<usize, StoreError> {
    if rows.is_empty() {
        return Ok(0);
    }

    use schema::integrated_doses::dsl as D;

    Ok(diesel::insert_into(D::integrated_doses).values(rows).execute(conn)?)
}
