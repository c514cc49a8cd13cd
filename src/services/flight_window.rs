//! Attribute a timestamp to the flight leg whose airborne window contains it.

use crate::db::models::FlightLeg;
use chrono::{DateTime, Utc};

/// First leg (in iteration order) with `wheels_off <= time <= wheels_on`.
///
/// Legs of one flight log are not expected to overlap; if they do, the earliest-listed leg wins.
pub fn assign(legs: &[FlightLeg], time: DateTime<Utc>) -> Option<&FlightLeg> {
    legs.iter().find(|leg| time >= leg.wheels_off && time <= leg.wheels_on)
}

pub fn assign_id(legs: &[FlightLeg], time: DateTime<Utc>) -> Option<i64> {
    assign(legs, time).map(|leg| leg.id)
}
