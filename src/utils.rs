use chrono::offset::LocalResult;
use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

/// UTC offset in force in `tz` at the local wall-clock instant `local`.
///
/// Ambiguous instants (autumn fold) resolve to standard time; instants skipped by a spring
/// transition use the offset in force the day before.
pub fn utc_offset_at(tz: Tz, local: NaiveDateTime) -> Duration {
    let offset = match tz.offset_from_local_datetime(&local) {
        LocalResult::Single(o) => o,
        LocalResult::Ambiguous(_, standard) => standard,
        LocalResult::None => match tz.offset_from_local_datetime(&(local - Duration::days(1))) {
            LocalResult::Single(o) | LocalResult::Ambiguous(_, o) => o,
            LocalResult::None => return Duration::zero(),
        },
    };
    Duration::seconds(i64::from(offset.fix().local_minus_utc()))
}

/// Shift a local timestamp to UTC with a precomputed offset.
///
/// Device files are converted with one offset for the whole file, so a file recorded across
/// a DST transition is shifted uniformly.
pub fn to_utc(local: NaiveDateTime, offset: Duration) -> DateTime<Utc> {
    Utc.from_utc_datetime(&(local - offset))
}

/// Put `time` on the calendar date of `anchor`; if that lands more than one hour before the
/// anchor the clock has wrapped past midnight, so move it to the next day.
pub fn roll_forward(anchor: NaiveDateTime, time: NaiveTime) -> NaiveDateTime {
    let candidate = anchor.date().and_time(time);
    if candidate < anchor && anchor - candidate > Duration::hours(1) {
        candidate + Duration::days(1)
    } else {
        candidate
    }
}

/// Piecewise-linear interpolation of `(xp, fp)` at each `x`. `xp` must be increasing;
/// points outside `xp` take the nearest endpoint value. An empty series yields zeros.
pub fn interp(x: &[f64], xp: &[f64], fp: &[f64]) -> Vec<f64> {
    let n = xp.len().min(fp.len());
    if n == 0 {
        return vec![0.0; x.len()];
    }
    let (xp, fp) = (&xp[..n], &fp[..n]);
    x.iter()
        .map(|&v| {
            if v <= xp[0] {
                fp[0]
            } else if v >= xp[n - 1] {
                fp[n - 1]
            } else {
                let j = xp.partition_point(|p| *p <= v) - 1;
                fp[j] + (v - xp[j]) * (fp[j + 1] - fp[j]) / (xp[j + 1] - xp[j])
            }
        })
        .collect()
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn paris_offsets_follow_dst() {
        let tz = chrono_tz::Europe::Paris;
        assert_eq!(utc_offset_at(tz, local(2024, 1, 10, 12, 0)), Duration::hours(1));
        assert_eq!(utc_offset_at(tz, local(2024, 7, 10, 12, 0)), Duration::hours(2));
        // fold on 2024-10-27 02:30 resolves to standard time
        assert_eq!(utc_offset_at(tz, local(2024, 10, 27, 2, 30)), Duration::hours(1));
        // gap on 2024-03-31 02:30 uses the pre-transition offset
        assert_eq!(utc_offset_at(tz, local(2024, 3, 31, 2, 30)), Duration::hours(1));
    }

    #[test]
    fn roll_forward_handles_midnight_wrap() {
        let anchor = local(2024, 5, 1, 23, 30);
        assert_eq!(
            roll_forward(anchor, NaiveTime::from_hms_opt(1, 15, 0).unwrap()),
            local(2024, 5, 2, 1, 15)
        );
        // slightly earlier than the anchor stays on the same day
        assert_eq!(
            roll_forward(anchor, NaiveTime::from_hms_opt(23, 0, 0).unwrap()),
            local(2024, 5, 1, 23, 0)
        );
        assert_eq!(
            roll_forward(anchor, NaiveTime::from_hms_opt(23, 50, 0).unwrap()),
            local(2024, 5, 1, 23, 50)
        );
    }

    #[test]
    fn interp_matches_linear_and_clamps() {
        let xp = [0.0, 10.0, 20.0];
        let fp = [0.0, 100.0, 50.0];
        let got = interp(&[-5.0, 0.0, 5.0, 10.0, 15.0, 20.0, 30.0], &xp, &fp);
        assert_eq!(got, vec![0.0, 0.0, 50.0, 100.0, 75.0, 50.0, 50.0]);
        assert_eq!(interp(&[1.0, 2.0], &[], &[]), vec![0.0, 0.0]);
        assert_eq!(interp(&[1.0, 9.0], &[5.0], &[3.0]), vec![3.0, 3.0]);
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(normalize_whitespace("  AF  1234 \t"), "AF 1234");
    }
}
