//! Thin helpers over polars `DataFrame`s shared by the cleaning and feature steps.
//!
//! Extracts arrive as JSON rows, so [`from_json_rows`] infers one dtype per column.
//! Timestamps are stored as millisecond datetimes in Melbourne time.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use polars::prelude::*;
use serde_json::{Map, Value};

use crate::dates::MELBOURNE;
use crate::error::{PipelineError, PipelineResult};

const ROW_NR: &str = "__row_nr";

pub fn melbourne_datetime() -> DataType {
    DataType::Datetime(TimeUnit::Milliseconds, Some(MELBOURNE.name().into()))
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_index(name).is_some()
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect()
}

pub fn require_columns(df: &DataFrame, required: &[&str]) -> PipelineResult<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|name| !has_column(df, name))
        .map(|name| name.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::missing(missing, &column_names(df)))
    }
}

/// An empty frame with untyped columns.
pub fn empty_frame(columns: &[&str]) -> PipelineResult<DataFrame> {
    let columns = columns
        .iter()
        .map(|name| Series::new_empty((*name).into(), &DataType::Null).into())
        .collect();
    Ok(DataFrame::new(columns)?)
}

/// True when the frame has no rows.
pub fn is_blank(df: &DataFrame) -> bool {
    df.height() == 0
}

/// Builds a frame from JSON objects; other values are skipped. Column order follows
/// first appearance. A column of whole numbers is `Int64`, mixed numbers are
/// `Float64`, booleans stay booleans and anything else is kept as text.
pub fn from_json_rows(rows: &[Value]) -> PipelineResult<DataFrame> {
    let rows: Vec<&Map<String, Value>> = rows.iter().filter_map(Value::as_object).collect();
    let mut names: Vec<&str> = Vec::new();
    let mut seen = BTreeSet::new();
    for row in &rows {
        for key in row.keys() {
            if seen.insert(key.as_str()) {
                names.push(key.as_str());
            }
        }
    }

    let columns = names
        .into_iter()
        .map(|name| {
            let values: Vec<&Value> = rows
                .iter()
                .map(|row| row.get(name).unwrap_or(&Value::Null))
                .collect();
            json_column(name, &values)
        })
        .collect();
    Ok(DataFrame::new(columns)?)
}

fn json_column(name: &str, values: &[&Value]) -> Column {
    let present = values.iter().filter(|value| !value.is_null());
    let name: PlSmallStr = name.into();
    if present.clone().count() == 0 {
        return Series::new_null(name, values.len()).into();
    }
    if present.clone().all(|value| value.is_boolean()) {
        let values: Vec<Option<bool>> = values.iter().map(|value| value.as_bool()).collect();
        return Column::new(name, values);
    }
    if present.clone().all(|value| value.is_i64()) {
        let values: Vec<Option<i64>> = values.iter().map(|value| value.as_i64()).collect();
        return Column::new(name, values);
    }
    if present.clone().all(|value| value.is_number()) {
        let values: Vec<Option<f64>> = values.iter().map(|value| value.as_f64()).collect();
        return Column::new(name, values);
    }
    let values: Vec<Option<String>> = values
        .iter()
        .map(|value| match value {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        })
        .collect();
    Column::new(name, values)
}

pub fn column<'a>(df: &'a DataFrame, name: &str) -> PipelineResult<&'a Column> {
    require_columns(df, &[name])?;
    Ok(df.column(name)?)
}

/// Integer values of a column. Floats must be whole and text must parse.
pub fn ints(df: &DataFrame, name: &str) -> PipelineResult<Vec<Option<i64>>> {
    let source = column(df, name)?;
    let cast = match source.dtype() {
        DataType::Float32 | DataType::Float64 => {
            let floats = source.cast(&DataType::Float64)?;
            if let Some(value) = floats.f64()?.into_iter().flatten().find(|v| v.fract() != 0.0) {
                return Err(PipelineError::coercion(name, format!("{value} is not a whole number")));
            }
            floats.cast(&DataType::Int64)?
        }
        DataType::String => source
            .strict_cast(&DataType::Int64)
            .map_err(|err| PipelineError::coercion(name, err.to_string()))?,
        _ => source
            .cast(&DataType::Int64)
            .map_err(|err| PipelineError::coercion(name, err.to_string()))?,
    };
    Ok(cast.i64()?.into_iter().collect())
}

pub fn floats(df: &DataFrame, name: &str) -> PipelineResult<Vec<Option<f64>>> {
    let cast = column(df, name)?
        .cast(&DataType::Float64)
        .map_err(|err| PipelineError::coercion(name, err.to_string()))?;
    Ok(cast.f64()?.into_iter().collect())
}

/// Text values of a column. Whole floats print without a fraction.
pub fn strs(df: &DataFrame, name: &str) -> PipelineResult<Vec<Option<String>>> {
    let source = column(df, name)?;
    if matches!(source.dtype(), DataType::Float32 | DataType::Float64) {
        let floats = source.cast(&DataType::Float64)?;
        return Ok(floats
            .f64()?
            .into_iter()
            .map(|value| {
                value.map(|v| {
                    if v.fract() == 0.0 && v.abs() < 1e15 {
                        format!("{}", v as i64)
                    } else {
                        v.to_string()
                    }
                })
            })
            .collect());
    }
    let cast = source.cast(&DataType::String)?;
    Ok(cast
        .str()?
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect())
}

/// Datetime values of a column, in Melbourne time.
pub fn datetimes(df: &DataFrame, name: &str) -> PipelineResult<Vec<Option<DateTime<Tz>>>> {
    let source = column(df, name)?;
    let unit = match source.dtype() {
        DataType::Datetime(unit, _) => *unit,
        DataType::Null => return Ok(vec![None; source.len()]),
        other => {
            return Err(PipelineError::coercion(name, format!("{other} is not a datetime")));
        }
    };
    let raw = source.cast(&DataType::Int64)?;
    Ok(raw
        .i64()?
        .into_iter()
        .map(|value| {
            let millis = match unit {
                TimeUnit::Nanoseconds => value? / 1_000_000,
                TimeUnit::Microseconds => value? / 1_000,
                TimeUnit::Milliseconds => value?,
            };
            DateTime::<Utc>::from_timestamp_millis(millis).map(|ts| ts.with_timezone(&MELBOURNE))
        })
        .collect())
}

pub fn datetime_column(name: &str, values: &[Option<DateTime<Tz>>]) -> PipelineResult<Column> {
    let millis: Int64Chunked = values
        .iter()
        .map(|value| value.map(|ts| ts.timestamp_millis()))
        .collect();
    let series = millis
        .with_name(name.into())
        .into_datetime(TimeUnit::Milliseconds, Some(MELBOURNE.name().into()))
        .into_series();
    Ok(series.into())
}

/// Renames the listed columns that are present.
pub fn rename_columns(mut df: DataFrame, renames: &[(&str, &str)]) -> PipelineResult<DataFrame> {
    for (from, to) in renames {
        if has_column(&df, from) {
            df.rename(from, (*to).into())?;
        }
    }
    Ok(df)
}

/// Drops the listed columns that are present.
pub fn drop_columns(df: DataFrame, dropped: &[&str]) -> PipelineResult<DataFrame> {
    let kept: Vec<String> = column_names(&df)
        .into_iter()
        .filter(|name| !dropped.contains(&name.as_str()))
        .collect();
    Ok(df.select(kept)?)
}

/// Stable multi-column sort with nulls last.
pub fn sort_stable(df: &DataFrame, by: &[&str], descending: bool) -> PipelineResult<DataFrame> {
    let by: Vec<String> = by.iter().map(|name| name.to_string()).collect();
    let options = SortMultipleOptions::default()
        .with_order_descending(descending)
        .with_nulls_last(true)
        .with_maintain_order(true);
    Ok(df.sort(by, options)?)
}

/// Keeps one row per key, in first-seen order.
pub fn dedup(df: &DataFrame, key: &[&str], keep: UniqueKeepStrategy) -> PipelineResult<DataFrame> {
    require_columns(df, key)?;
    let subset: Vec<String> = key.iter().map(|name| name.to_string()).collect();
    Ok(df.unique_stable(Some(subset.as_slice()), keep, None)?)
}

/// Left join that keeps the left frame's row order. Clashing right columns get a
/// `_right` suffix.
pub fn left_join(left: &DataFrame, right: &DataFrame, on: &[&str]) -> PipelineResult<DataFrame> {
    require_columns(left, on)?;
    require_columns(right, on)?;
    let keys: Vec<Expr> = on.iter().map(|name| col(*name)).collect();
    let joined = left
        .clone()
        .lazy()
        .with_row_index(ROW_NR, None)
        .join(
            right.clone().lazy(),
            keys.clone(),
            keys,
            JoinArgs::new(JoinType::Left),
        )
        .sort([ROW_NR], SortMultipleOptions::default().with_maintain_order(true))
        .collect()?;
    Ok(joined.drop(ROW_NR)?)
}

/// Stacks frames by column name. Columns missing from a frame are null there.
pub fn concat_diagonal(frames: &[DataFrame]) -> PipelineResult<DataFrame> {
    let frames: Vec<LazyFrame> = frames
        .iter()
        .filter(|df| df.width() > 0)
        .map(|df| df.clone().lazy())
        .collect();
    if frames.is_empty() {
        return Ok(DataFrame::empty());
    }
    let args = UnionArgs {
        to_supertypes: true,
        ..Default::default()
    };
    Ok(concat_lf_diagonal(frames, args)?.collect()?)
}

/// Keeps the rows flagged `true`.
pub fn filter_rows(df: &DataFrame, keep: &[bool]) -> PipelineResult<DataFrame> {
    let mask = Series::new("keep".into(), keep.to_vec());
    Ok(df.filter(mask.bool()?)?)
}

/// Drops every row with a null in any column.
pub fn drop_null_rows(df: &DataFrame) -> PipelineResult<DataFrame> {
    let mut keep = vec![true; df.height()];
    for column in df.get_columns() {
        let valid = column.is_not_null();
        for (flag, present) in keep.iter_mut().zip(valid.into_iter()) {
            *flag &= present.unwrap_or(false);
        }
    }
    filter_rows(df, &keep)
}

/// Replaces nulls with zero: `0` in numeric columns and `"0"` in text columns.
/// Untyped all-null columns become integer zeros.
pub fn fill_nulls_with_zero(df: DataFrame) -> PipelineResult<DataFrame> {
    let fills: Vec<Expr> = df
        .get_columns()
        .iter()
        .filter(|column| column.null_count() > 0)
        .filter_map(|column| {
            let name = column.name().as_str();
            let zero = match column.dtype() {
                DataType::Null => lit(0i64).alias(name),
                DataType::String => col(name).fill_null(lit("0")),
                dtype if dtype.is_primitive_numeric() => col(name).fill_null(lit(0)),
                DataType::Boolean => col(name).fill_null(lit(false)),
                _ => return None,
            };
            Some(zero)
        })
        .collect();
    if fills.is_empty() {
        return Ok(df);
    }
    Ok(df.lazy().with_columns(fills).collect()?)
}
