//! Flight-log parser.
//!
//! The log is a `;`-separated export. Line 4 carries the aircraft registration and model;
//! line 6 is the table header. Only rows with an actual arrival (`ON` starting with `A`) and
//! both wheels-off and wheels-on times become legs. All times are UTC.
//!
//! The day/month of each row is completed with a year hint. When a row's date falls before
//! the previous row's date, the log is assumed to cross New Year and the year is advanced
//! for that row and the following ones. This is a heuristic: an unordered log will be
//! misdated.

use chrono::{DateTime, Datelike, Month, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use log::{debug, warn};

use crate::db::models::LegSchedule;
use crate::utils::{normalize_whitespace, roll_forward};

const AIRCRAFT_LINE: usize = 3;
const TABLE_HEADER_LINE: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum FlightLogError {
    #[error("malformed flight log: {0}")]
    Malformed(String),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

fn malformed(msg: impl Into<String>) -> FlightLogError {
    FlightLogError::Malformed(msg.into())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFlightLog {
    pub aircraft_registration: String,
    pub aircraft_model: String,
    pub legs: Vec<LegSchedule>,
}

struct Columns {
    number: usize,
    origin: usize,
    destination: usize,
    date: usize,
    departure: usize,
    arrival: usize,
    off_blocks: usize,
    wheels_off: usize,
    wheels_on: usize,
    on_blocks: usize,
}

impl Columns {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, FlightLogError> {
        // `Dep.` and `Arr.` appear twice: airport first, scheduled time second
        let find = |name: &str, occurrence: usize| {
            headers
                .iter()
                .enumerate()
                .filter(|(_, h)| *h == name)
                .nth(occurrence)
                .map(|(i, _)| i)
                .ok_or_else(|| malformed(format!("missing column {:?} (occurrence {})", name, occurrence + 1)))
        };
        Ok(Columns {
            number: find("N volCause IRG", 0)?,
            origin: find("Dep.", 0)?,
            destination: find("Arr.", 0)?,
            date: find("Date TdL", 0)?,
            departure: find("Dep.", 1)?,
            arrival: find("Arr.", 1)?,
            off_blocks: find("OUT", 0)?,
            wheels_off: find("OFF", 0)?,
            wheels_on: find("ON", 0)?,
            on_blocks: find("IN", 0)?,
        })
    }
}

/// Day, month and optional year from `12/03`, `12/03/24`, `12-MAR-2024`, `12MAR`...
fn parse_day_month(text: &str) -> Option<(u32, u32, Option<i32>)> {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    for ch in text.trim().chars() {
        let same_class = current
            .chars()
            .last()
            .is_none_or(|prev| prev.is_ascii_digit() == ch.is_ascii_digit());
        if !ch.is_ascii_alphanumeric() || !same_class {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        }
        if ch.is_ascii_alphanumeric() {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    let day = tokens.first()?.parse::<u32>().ok()?;
    let month_token = tokens.get(1)?;
    let month = month_token
        .parse::<u32>()
        .ok()
        .or_else(|| month_token.parse::<Month>().ok().map(|m| m.number_from_month()))?;
    let year = match tokens.get(2) {
        Some(y) if y.len() == 2 => Some(2000 + y.parse::<i32>().ok()?),
        Some(y) => Some(y.parse::<i32>().ok()?),
        None => None,
    };
    Some((day, month, year))
}

fn parse_clock(text: &str) -> Option<NaiveTime> {
    let text = text.trim();
    NaiveTime::parse_from_str(text, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .ok()
}

/// Block and wheel times are prefixed with a status letter; the clock is the last five chars.
fn event_clock(field: &str) -> Option<NaiveTime> {
    let chars = field.trim().chars().collect::<Vec<_>>();
    let tail = chars[chars.len().saturating_sub(5)..].iter().collect::<String>();
    parse_clock(&tail)
}

fn utc(local: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&local)
}

/// Completes day/month dates with a year and detects New Year crossings.
struct YearResolver {
    hint: Option<i32>,
    today: NaiveDate,
    rollover: i32,
    previous: Option<NaiveDate>,
}

impl YearResolver {
    fn departure(&mut self, (day, month, year): (u32, u32, Option<i32>), time: NaiveTime) -> Option<NaiveDateTime> {
        let at = |y: i32| NaiveDate::from_ymd_opt(y, month, day).map(|d| d.and_time(time));
        let departure = match (year, self.hint) {
            (Some(y), _) => at(y)?,
            (None, Some(hint)) => {
                let mut candidate = at(hint + self.rollover)?;
                if self.previous.is_some_and(|prev| candidate.date() < prev) {
                    self.rollover += 1;
                    debug!("flight log: date regression at {}, advancing year", candidate.date());
                    candidate = at(hint + self.rollover)?;
                }
                candidate
            }
            // most recent past occurrence
            (None, None) => {
                let this_year = at(self.today.year())?;
                if this_year.date() > self.today {
                    at(self.today.year() - 1)?
                } else {
                    this_year
                }
            }
        };
        self.previous = Some(departure.date());
        Some(departure)
    }
}

pub fn parse_flight_log(text: &str, year_hint: Option<i32>, today: NaiveDate) -> Result<ParsedFlightLog, FlightLogError> {
    let lines = text.lines().collect::<Vec<_>>();
    let aircraft = lines
        .get(AIRCRAFT_LINE)
        .ok_or_else(|| malformed("missing aircraft line"))?
        .split(';')
        .map(|field| field.trim().split(' ').next_back().unwrap_or_default().trim().to_string())
        .collect::<Vec<_>>();
    let (aircraft_registration, aircraft_model) = match aircraft.as_slice() {
        [registration, model, ..] if !registration.is_empty() && !model.is_empty() => {
            (registration.clone(), model.clone())
        }
        _ => return Err(malformed("aircraft line needs registration and model")),
    };
    if lines.len() <= TABLE_HEADER_LINE {
        return Err(malformed("missing table header"));
    }

    let table = lines[TABLE_HEADER_LINE..].join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(table.as_bytes());
    let columns = Columns::resolve(reader.headers()?)?;

    let mut years = YearResolver {
        hint: year_hint,
        today,
        rollover: 0,
        previous: None,
    };
    let mut legs = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let line = TABLE_HEADER_LINE + i + 2;
        let field = |idx: usize| record.get(idx).unwrap_or_default();

        let (wheels_off, wheels_on) = (field(columns.wheels_off), field(columns.wheels_on));
        if wheels_off.is_empty() || !wheels_on.starts_with('A') {
            continue;
        }

        let bad = |what: &str| malformed(format!("line {}: bad {} {:?}", line, what, record.as_slice()));
        let date = parse_day_month(field(columns.date)).ok_or_else(|| bad("date"))?;
        let departure_time = parse_clock(field(columns.departure)).ok_or_else(|| bad("departure time"))?;
        let departure = years.departure(date, departure_time).ok_or_else(|| bad("date"))?;
        let anchored = |idx: usize, what: &str, clock: fn(&str) -> Option<NaiveTime>| {
            clock(field(idx))
                .map(|t| utc(roll_forward(departure, t)))
                .ok_or_else(|| bad(what))
        };

        let leg = LegSchedule {
            leg_number: normalize_whitespace(field(columns.number)),
            origin: normalize_whitespace(field(columns.origin)),
            destination: normalize_whitespace(field(columns.destination)),
            scheduled_departure: utc(departure),
            scheduled_arrival: anchored(columns.arrival, "arrival time", parse_clock)?,
            off_blocks: anchored(columns.off_blocks, "OUT", event_clock)?,
            wheels_off: anchored(columns.wheels_off, "OFF", event_clock)?,
            wheels_on: anchored(columns.wheels_on, "ON", event_clock)?,
            on_blocks: anchored(columns.on_blocks, "IN", event_clock)?,
        };
        if leg.wheels_on < leg.wheels_off {
            warn!(
                "flight log line {}: leg {} lands ({}) before it takes off ({})",
                line, leg.leg_number, leg.wheels_on, leg.wheels_off
            );
        }
        legs.push(leg);
    }

    Ok(ParsedFlightLog {
        aircraft_registration,
        aircraft_model,
        legs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "EXPORT EQUIPAGE\nPeriode 03/2024\n\nImmatriculation F-GSPA;Type B777;\n\n\
        N volCause IRG;Dep.;Arr.;Date TdL;Dep.;Arr.;OUT;OFF;ON;IN\n";

    fn log(rows: &[&str]) -> String {
        let mut text = HEADER.to_string();
        for r in rows {
            text.push_str(r);
            text.push('\n');
        }
        text
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 20).unwrap()
    }

    #[test]
    fn parses_header_and_actual_legs() {
        let text = log(&[
            "AF  0011 ;CDG;JFK;12/03;10:30;18:45:00;R 10:25;R 10:40;A 18:30;A 18:40",
            "AF 0012;JFK;CDG;12/03;22:30;06:40:00;22:35;22:50;A 06:20;06:35",
            "AF 0013;CDG;NCE;13/03;08:00;09:30:00;;;E 09:30;",
            "AF 0014;CDG;LHR;14/03;08:00;09:00:00;08:05;08:15;E 09:00;09:05",
        ]);
        let parsed = parse_flight_log(&text, Some(2024), today()).unwrap();
        assert_eq!(parsed.aircraft_registration, "F-GSPA");
        assert_eq!(parsed.aircraft_model, "B777");
        assert_eq!(parsed.legs.len(), 2);

        let first = &parsed.legs[0];
        assert_eq!(first.leg_number, "AF 0011");
        assert_eq!((first.origin.as_str(), first.destination.as_str()), ("CDG", "JFK"));
        assert_eq!(first.scheduled_departure, at(2024, 3, 12, 10, 30));
        assert_eq!(first.scheduled_arrival, at(2024, 3, 12, 18, 45));
        assert_eq!(first.off_blocks, at(2024, 3, 12, 10, 25));
        assert_eq!(first.wheels_off, at(2024, 3, 12, 10, 40));
        assert_eq!(first.wheels_on, at(2024, 3, 12, 18, 30));
        assert_eq!(first.on_blocks, at(2024, 3, 12, 18, 40));

        // overnight leg: arrival-side times roll to the next day
        let second = &parsed.legs[1];
        assert_eq!(second.wheels_off, at(2024, 3, 12, 22, 50));
        assert_eq!(second.scheduled_arrival, at(2024, 3, 13, 6, 40));
        assert_eq!(second.wheels_on, at(2024, 3, 13, 6, 20));
        assert_eq!(second.on_blocks, at(2024, 3, 13, 6, 35));
    }

    #[test]
    fn advances_year_on_date_regression() {
        let text = log(&[
            "AF 1;CDG;PTP;30/12;10:00;18:00;09:50;10:05;A 17:55;18:05",
            "AF 2;PTP;CDG;02/01;20:00;06:00;19:50;20:05;A 05:55;06:05",
            "AF 3;CDG;NCE;03/01;08:00;09:30;07:50;08:05;A 09:20;09:30",
        ]);
        let parsed = parse_flight_log(&text, Some(2023), today()).unwrap();
        assert_eq!(parsed.legs[0].wheels_off, at(2023, 12, 30, 10, 5));
        assert_eq!(parsed.legs[1].wheels_off, at(2024, 1, 2, 20, 5));
        assert_eq!(parsed.legs[2].wheels_off, at(2024, 1, 3, 8, 5));
    }

    #[test]
    fn same_day_rows_out_of_time_order_keep_the_year() {
        let text = log(&[
            "AF 1;CDG;JFK;12/03;10:30;18:45;10:25;10:40;A 18:30;18:40",
            "AF 2;CDG;NCE;12/03;08:00;09:30;07:55;08:10;A 09:20;09:30",
            "AF 3;NCE;CDG;13/03;07:00;08:30;06:55;07:10;A 08:20;08:30",
        ]);
        let parsed = parse_flight_log(&text, Some(2024), today()).unwrap();
        assert_eq!(parsed.legs[0].wheels_off, at(2024, 3, 12, 10, 40));
        assert_eq!(parsed.legs[1].wheels_off, at(2024, 3, 12, 8, 10));
        assert_eq!(parsed.legs[2].wheels_off, at(2024, 3, 13, 7, 10));
    }

    #[test]
    fn without_hint_picks_most_recent_past_year() {
        let text = log(&[
            "AF 1;CDG;JFK;12/03;10:00;18:00;09:50;10:05;A 17:55;18:05",
            "AF 2;CDG;JFK;25 DEC;10:00;18:00;09:50;10:05;A 17:55;18:05",
            "AF 3;CDG;JFK;01/02/22;10:00;18:00;09:50;10:05;A 17:55;18:05",
        ]);
        let parsed = parse_flight_log(&text, None, today()).unwrap();
        assert_eq!(parsed.legs[0].scheduled_departure, at(2024, 3, 12, 10, 0));
        assert_eq!(parsed.legs[1].scheduled_departure, at(2023, 12, 25, 10, 0));
        assert_eq!(parsed.legs[2].scheduled_departure, at(2022, 2, 1, 10, 0));
    }

    #[test]
    fn structural_problems_are_rejected() {
        assert!(matches!(parse_flight_log("a\nb\n", None, today()), Err(FlightLogError::Malformed(_))));

        let missing_column = "x\nx\nx\nReg F-GSPA;Type A320\nx\nN volCause IRG;Dep.;Arr.;Date TdL;OUT;OFF;ON;IN\n";
        assert!(parse_flight_log(missing_column, None, today()).is_err());

        let bad_time = log(&["AF 1;CDG;JFK;12/03;25:99;18:00;09:50;10:05;A 17:55;18:05"]);
        assert!(matches!(
            parse_flight_log(&bad_time, Some(2024), today()),
            Err(FlightLogError::Malformed(_))
        ));
    }

    #[test]
    fn day_month_formats() {
        assert_eq!(parse_day_month("12/03"), Some((12, 3, None)));
        assert_eq!(parse_day_month("12/03/24"), Some((12, 3, Some(2024))));
        assert_eq!(parse_day_month("12-MAR-2024"), Some((12, 3, Some(2024))));
        assert_eq!(parse_day_month("05dec"), Some((5, 12, None)));
        assert_eq!(parse_day_month("hello"), None);
    }
}
