use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Workbook date system used to interpret serial date values.
///
/// - `Excel1900` (default; includes the Lotus 1-2-3 leap year bug where serial `60` is the
///   nonexistent 1900-02-29)
/// - `Excel1904` (serial `0` is 1904-01-01)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DateSystem {
    #[serde(rename = "excel1900")]
    Excel1900,
    #[serde(rename = "excel1904")]
    Excel1904,
}

impl Default for DateSystem {
    fn default() -> Self {
        Self::Excel1900
    }
}

impl DateSystem {
    /// Serial day number (with fractional time of day) for `dt`.
    ///
    /// Returns `None` for datetimes before the epoch of the date system.
    pub fn to_serial(self, dt: NaiveDateTime) -> Option<f64> {
        let date = dt.date();
        let days = match self {
            DateSystem::Excel1900 => {
                let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
                let leap_bug_cutoff = NaiveDate::from_ymd_opt(1900, 3, 1)?;
                let days = (date - base).num_days();
                if date < leap_bug_cutoff {
                    days - 1
                } else {
                    days
                }
            }
            DateSystem::Excel1904 => (date - NaiveDate::from_ymd_opt(1904, 1, 1)?).num_days(),
        };
        if days < 0 {
            return None;
        }
        let time = dt.time();
        let millis = i64::from(time.num_seconds_from_midnight()) * 1000
            + i64::from(time.nanosecond() / 1_000_000);
        Some(days as f64 + millis as f64 / MILLIS_PER_DAY as f64)
    }

    /// Datetime for a serial day number, rounded to the millisecond.
    ///
    /// Returns `None` for negative serials, non-finite values and the phantom 1900-02-29.
    pub fn from_serial(self, serial: f64) -> Option<NaiveDateTime> {
        if !serial.is_finite() || serial < 0.0 {
            return None;
        }
        let mut days = serial.floor() as i64;
        let mut millis = ((serial - serial.floor()) * MILLIS_PER_DAY as f64).round() as i64;
        if millis >= MILLIS_PER_DAY {
            days += 1;
            millis -= MILLIS_PER_DAY;
        }

        let date = match self {
            DateSystem::Excel1900 => match days {
                60 => return None,
                d if d < 60 => NaiveDate::from_ymd_opt(1899, 12, 31)? + Duration::days(d),
                d => NaiveDate::from_ymd_opt(1899, 12, 30)? + Duration::days(d),
            },
            DateSystem::Excel1904 => NaiveDate::from_ymd_opt(1904, 1, 1)? + Duration::days(days),
        };
        date.and_hms_opt(0, 0, 0)
            .map(|midnight| midnight + Duration::milliseconds(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn excel1900_serials_match_known_values() {
        let sys = DateSystem::Excel1900;
        assert_eq!(sys.to_serial(dt(1900, 1, 1, 0, 0)), Some(1.0));
        assert_eq!(sys.to_serial(dt(1900, 2, 28, 0, 0)), Some(59.0));
        assert_eq!(sys.to_serial(dt(1900, 3, 1, 0, 0)), Some(61.0));
        assert_eq!(sys.to_serial(dt(2024, 1, 15, 12, 0)), Some(45306.5));
    }

    #[test]
    fn excel1900_phantom_leap_day_has_no_datetime() {
        assert_eq!(DateSystem::Excel1900.from_serial(60.0), None);
        assert_eq!(
            DateSystem::Excel1900.from_serial(61.0),
            Some(dt(1900, 3, 1, 0, 0))
        );
    }

    #[test]
    fn excel1904_offsets_from_1904() {
        let sys = DateSystem::Excel1904;
        assert_eq!(sys.to_serial(dt(1904, 1, 2, 6, 0)), Some(1.25));
        assert_eq!(sys.from_serial(1.25), Some(dt(1904, 1, 2, 6, 0)));
        assert_eq!(sys.to_serial(dt(1903, 12, 31, 0, 0)), None);
    }

    #[test]
    fn serials_round_trip_through_datetimes() {
        let sys = DateSystem::Excel1900;
        let value = dt(2023, 7, 4, 18, 45);
        let serial = sys.to_serial(value).unwrap();
        assert_eq!(sys.from_serial(serial), Some(value));
    }
}
