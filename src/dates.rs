use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use polars::prelude::{DataFrame, DataType};

use crate::error::{PipelineError, PipelineResult};
use crate::frame;

/// Every match timestamp in the pipeline is expressed in Melbourne time.
pub const MELBOURNE: Tz = chrono_tz::Australia::Melbourne;

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%:z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%z",
];
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

pub fn now_melbourne() -> DateTime<Tz> {
    Utc::now().with_timezone(&MELBOURNE)
}

/// Attaches Melbourne time to a wall-clock timestamp.
pub fn localize(naive: NaiveDateTime) -> DateTime<Tz> {
    MELBOURNE
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| MELBOURNE.from_utc_datetime(&naive))
}

/// Day counts since 1970-01-01, as the AFL Tables extracts serialize dates.
pub fn from_day_count(days: i64) -> Option<DateTime<Tz>> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    let date = epoch.checked_add_signed(chrono::Duration::days(days))?;
    Some(localize(date.and_hms_opt(0, 0, 0)?))
}

/// First instant of a season, Melbourne time.
pub fn start_of_year(year: i32) -> Option<DateTime<Tz>> {
    Some(localize(NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)?))
}

/// Last second of a season, Melbourne time.
pub fn end_of_year(year: i32) -> Option<DateTime<Tz>> {
    Some(localize(NaiveDate::from_ymd_opt(year, 12, 31)?.and_hms_opt(23, 59, 59)?))
}

pub fn parse_datetime(raw: &str) -> Option<DateTime<Tz>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&MELBOURNE));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&MELBOURNE));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(localize(naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(localize)
}

/// Replaces a date column with Melbourne timestamps. Text is parsed, whole
/// numbers are day counts, and nulls stay null.
pub fn parse_dates(mut df: DataFrame, column: &str) -> PipelineResult<DataFrame> {
    let parsed = match frame::column(&df, column)?.dtype() {
        DataType::Datetime(..) | DataType::Null => frame::datetimes(&df, column)?,
        DataType::String => frame::strs(&df, column)?
            .into_iter()
            .map(|raw| match raw {
                None => Ok(None),
                Some(raw) => parse_datetime(&raw).map(Some).ok_or_else(|| {
                    PipelineError::coercion(column, format!("cannot parse `{raw}` as a date"))
                }),
            })
            .collect::<PipelineResult<Vec<_>>>()?,
        _ => frame::ints(&df, column)?
            .into_iter()
            .map(|days| match days {
                None => Ok(None),
                Some(days) => from_day_count(days).map(Some).ok_or_else(|| {
                    PipelineError::coercion(column, format!("{days} is out of the date range"))
                }),
            })
            .collect::<PipelineResult<Vec<_>>>()?,
    };
    df.with_column(frame::datetime_column(column, &parsed)?)?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn day_counts_become_melbourne_midnight() {
        // 2019-03-21
        let dt = from_day_count(17_976).unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2019, 3, 21));
        assert_eq!(dt.hour(), 0);
        assert_eq!(dt.timezone(), MELBOURNE);
    }

    #[test]
    fn offset_strings_keep_their_instant() {
        let dt = parse_datetime("2019-03-21T08:25:00+00:00").unwrap();
        assert_eq!(dt.hour(), 19);
        assert_eq!(dt.with_timezone(&Utc).hour(), 8);
    }

    #[test]
    fn unparseable_text_is_a_coercion_error() {
        let df = polars::df!("date" => ["next friday"]).unwrap();
        let err = parse_dates(df, "date").unwrap_err();
        assert!(err.to_string().contains("date"));
    }

    #[test]
    fn day_count_columns_become_datetimes() {
        let df = polars::df!("date" => [Some(17_976i64), None]).unwrap();
        let parsed = parse_dates(df, "date").unwrap();
        assert_eq!(parsed.column("date").unwrap().dtype(), &frame::melbourne_datetime());
        let dates = frame::datetimes(&parsed, "date").unwrap();
        assert_eq!(dates[0], from_day_count(17_976));
        assert_eq!(dates[1], None);
    }
}
