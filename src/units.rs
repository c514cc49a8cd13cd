//! Metric-prefix scaling between units sharing a base symbol.
//!
//! A unit is written as an optional prefix followed by a single base character (`µA`, `mV`,
//! `C`). Only the prefix takes part in the conversion; the base symbol is not checked.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitError {
    #[error("unknown metric prefix {prefix:?} in unit {unit:?}")]
    UnknownPrefix { unit: String, prefix: String },
}

fn prefix_power(prefix: &str) -> Option<i32> {
    let p = match prefix {
        "Y" => 24,
        "Z" => 21,
        "E" => 18,
        "P" => 15,
        "T" => 12,
        "G" => 9,
        "M" => 6,
        "k" => 3,
        "h" => 2,
        "da" => 1,
        "" => 0,
        "d" => -1,
        "c" => -2,
        "m" => -3,
        // micro sign, greek mu and the ASCII fallback
        "\u{b5}" | "\u{3bc}" | "u" => -6,
        "n" => -9,
        "p" => -12,
        "f" => -15,
        "a" => -18,
        "z" => -21,
        "y" => -24,
        _ => return None,
    };
    Some(p)
}

fn unit_power(unit: &str) -> Result<i32, UnitError> {
    let unknown = |prefix: &str| UnitError::UnknownPrefix {
        unit: unit.to_string(),
        prefix: prefix.to_string(),
    };
    let (base_at, _) = unit.char_indices().last().ok_or_else(|| unknown(""))?;
    let prefix = &unit[..base_at];
    prefix_power(prefix).ok_or_else(|| unknown(prefix))
}

/// `value × 10^(pow(from) − pow(to))`.
pub fn convert(value: f64, from: &str, to: &str) -> Result<f64, UnitError> {
    let exponent = unit_power(from)? - unit_power(to)?;
    Ok(value * 10f64.powi(exponent))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNITS: [&str; 23] = [
        "YG", "ZG", "EG", "PG", "TG", "GG", "MG", "kG", "hG", "daG", "G", "dG", "cG", "mG", "µG", "μG", "uG",
        "nG", "pG", "fG", "aG", "zG", "yG",
    ];

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn identity_for_every_unit() {
        for u in UNITS {
            assert_eq!(convert(12.5, u, u), Ok(12.5), "unit {u}");
        }
    }

    #[test]
    fn round_trip_within_tolerance() {
        for a in UNITS {
            for b in UNITS {
                let there = convert(3.75, a, b).expect("known units");
                let back = convert(there, b, a).expect("known units");
                assert!(close(back, 3.75), "{a} -> {b} -> {a} gave {back}");
            }
        }
    }

    #[test]
    fn scales_by_prefix_difference() {
        assert!(close(convert(1500.0, "mV", "V").unwrap(), 1.5));
        assert!(close(convert(2.0, "mA", "µA").unwrap(), 2000.0));
        assert!(close(convert(7.0, "uS", "µS").unwrap(), 7.0));
        assert!(close(convert(1.0, "daG", "dG").unwrap(), 100.0));
        assert!(close(convert(21.0, "C", "C").unwrap(), 21.0));
    }

    #[test]
    fn rejects_unknown_prefix() {
        assert_eq!(
            convert(1.0, "xV", "V"),
            Err(UnitError::UnknownPrefix {
                unit: "xV".to_string(),
                prefix: "x".to_string()
            })
        );
        assert!(convert(1.0, "", "V").is_err());
        assert!(convert(1.0, "V", "µGy").is_err());
    }
}
