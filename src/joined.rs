use polars::prelude::*;

use crate::error::{PipelineError, PipelineResult};
use crate::frame;

const ROW_NR: &str = "__position";

/// Joins cleaned sources side by side on the shared key columns `on`. With no key
/// columns the frames line up by row position.
///
/// Frames are ordered longest first, and a column that appears in several frames is
/// taken from the first of them. Sources reach back different distances (betting data
/// only starts in 2010), so taking a shared column like `date` from a shorter source
/// would null it out for every older row. The sort is stable, so equally long frames
/// keep their given order. Key values repeated within one frame use its first row.
pub fn clean_joined_data(frames: Vec<DataFrame>, on: &[&str]) -> PipelineResult<DataFrame> {
    let mut frames = frames;
    frames.sort_by_key(|df| std::cmp::Reverse(df.height()));
    if frames.is_empty() {
        return Ok(DataFrame::empty());
    }

    let positional = on.is_empty();
    let key: Vec<&str> = if positional { vec![ROW_NR] } else { on.to_vec() };
    if positional {
        frames = frames
            .into_iter()
            .map(|df| df.with_row_index(ROW_NR.into(), None))
            .collect::<PolarsResult<Vec<_>>>()?;
    }

    for (pos, df) in frames.iter().enumerate() {
        let missing: Vec<String> = key
            .iter()
            .filter(|name| !frame::has_column(df, name))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::MissingJoinKey {
                frame: pos,
                missing,
            });
        }
    }

    // Union of keys, in order of first appearance.
    let key_frames = frames
        .iter()
        .map(|df| df.select(key.iter().copied()))
        .collect::<PolarsResult<Vec<_>>>()?;
    let keys = frame::concat_diagonal(&key_frames)?;
    let mut joined = frame::dedup(&keys, &key, UniqueKeepStrategy::First)?;

    let mut order: Vec<String> = Vec::new();
    for df in &frames {
        let added: Vec<String> = frame::column_names(df)
            .into_iter()
            .filter(|name| !order.contains(name))
            .collect();
        let fresh: Vec<String> = added
            .iter()
            .filter(|name| !key.contains(&name.as_str()))
            .cloned()
            .collect();
        order.extend(added);
        if fresh.is_empty() {
            continue;
        }

        let casts: Vec<Expr> = key
            .iter()
            .map(|name| {
                let dtype = joined.column(name)?.dtype().clone();
                Ok(col(*name).cast(dtype))
            })
            .collect::<PolarsResult<_>>()?;
        let selected: Vec<String> = key.iter().map(|name| name.to_string()).chain(fresh).collect();
        let source = df
            .select(selected)?
            .lazy()
            .with_columns(casts)
            .collect()?;
        let source = frame::dedup(&source, &key, UniqueKeepStrategy::First)?;
        joined = frame::left_join(&joined, &source, &key)?;
    }

    let order: Vec<String> = order.into_iter().filter(|name| name != ROW_NR).collect();
    Ok(joined.select(order)?)
}
