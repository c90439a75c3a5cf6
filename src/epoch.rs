//! Epoch helpers shared by the geomagnetic model and temporal analysis.
use hifitime::{Epoch, Unit};

/*
 * Infaillible `Epoch::now()` call.
 */
pub(crate) fn now_utc() -> Epoch {
    Epoch::now().unwrap_or(Epoch::from_gregorian_utc_at_midnight(2000, 1, 1))
}

/// Converts an [Epoch] to a decimal year, the time axis used
/// by secular variation models and trend regressions.
pub fn decimal_year(epoch: Epoch) -> f64 {
    let (y, _, _, _, _, _, _) = epoch.to_gregorian_utc();
    let year_start = Epoch::from_gregorian_utc_at_midnight(y, 1, 1);
    let elapsed_days = (epoch - year_start).to_unit(Unit::Day);
    y as f64 + elapsed_days / 365.25
}

/// Decimal hours since UTC midnight, for local time computations.
pub(crate) fn utc_hours(epoch: Epoch) -> f64 {
    let (_, _, _, hh, mm, ss, nanos) = epoch.to_gregorian_utc();
    hh as f64 + mm as f64 / 60.0 + ss as f64 / 3600.0 + nanos as f64 / 3.6e12
}

#[cfg(test)]
mod test {
    use super::*;
    use hifitime::Epoch;
    #[test]
    fn decimal_years() {
        let t = Epoch::from_gregorian_utc_at_midnight(2020, 1, 1);
        assert!((decimal_year(t) - 2020.0).abs() < 1e-9);
        let t = Epoch::from_gregorian_utc_at_midnight(2020, 7, 1);
        let y = decimal_year(t);
        assert!(y > 2020.4 && y < 2020.6, "mid year was {}", y);
    }
    #[test]
    fn utc_decimal_hours() {
        let t = Epoch::from_gregorian_utc(2024, 6, 1, 18, 30, 0, 0);
        assert!((utc_hours(t) - 18.5).abs() < 1e-9);
    }
}
