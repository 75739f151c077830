//! Default feature functions over team-match rows (`team`, `year`, `round_number`,
//! `score`, `oppo_score`). Each one adds a single column and leaves the rows alone.
//!
//! The frame is expected sorted by `(team, year, round_number)`, so a team's matches
//! are chronological.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;

use log::warn;
use polars::prelude::*;

use crate::error::PipelineResult;
use crate::feature_builder::{Feature, FeatureFn};
use crate::frame;

const WIN_POINTS: f64 = 4.0;
const ROLLING_WINDOW: usize = 23;
const ODDS_COLS: &[&str] = &["line_odds", "oppo_line_odds", "win_odds", "oppo_win_odds"];

pub fn default_features() -> Vec<Box<dyn FeatureFn>> {
    vec![
        Box::new(Feature::new("last_week_result", add_last_week_result)),
        Box::new(Feature::new("last_week_score", add_last_week_score)),
        Box::new(Feature::new("cum_percent", add_cum_percent)),
        Box::new(Feature::new("cum_win_points", add_cum_win_points)),
        Box::new(Feature::new("rolling_pred_win_rate", add_rolling_pred_win_rate)),
        Box::new(Feature::new(
            "rolling_last_week_win_rate",
            add_rolling_last_week_win_rate,
        )),
        Box::new(Feature::new("ladder_position", add_ladder_position)),
        Box::new(Feature::new("win_streak", add_win_streak)),
    ]
}

/// 1 for the previous match won, 0.5 drawn, 0 lost.
pub fn add_last_week_result(df: DataFrame) -> PipelineResult<DataFrame> {
    frame::require_columns(&df, &["team", "score", "oppo_score"])?;
    let last_week = result_expr()
        .shift(lit(1))
        .over([col("team")])
        .alias("last_week_result");
    Ok(df.lazy().with_column(last_week).collect()?)
}

pub fn add_last_week_score(df: DataFrame) -> PipelineResult<DataFrame> {
    frame::require_columns(&df, &["team", "score"])?;
    let last_week = col("score")
        .shift(lit(1))
        .over([col("team")])
        .alias("last_week_score");
    Ok(df.lazy().with_column(last_week).collect()?)
}

/// Season-to-date points for over points against, as a percentage, before the match.
pub fn add_cum_percent(df: DataFrame) -> PipelineResult<DataFrame> {
    frame::require_columns(&df, &["team", "year", "score", "oppo_score"])?;
    Ok(df.lazy().with_column(cum_percent_expr()).collect()?)
}

/// Season-to-date premiership points before the match: 4 a win, 2 a draw.
pub fn add_cum_win_points(df: DataFrame) -> PipelineResult<DataFrame> {
    frame::require_columns(&df, &["team", "year", "score", "oppo_score"])?;
    Ok(df.lazy().with_column(cum_win_points_expr()).collect()?)
}

/// Share of the previous 23 matches in which the team was the betting favourite:
/// the shorter line, or the shorter win price when the lines are level. Without
/// betting odds the column is null.
pub fn add_rolling_pred_win_rate(mut df: DataFrame) -> PipelineResult<DataFrame> {
    frame::require_columns(&df, &["team"])?;
    if !ODDS_COLS.iter().all(|col| frame::has_column(&df, col)) {
        warn!("no betting odds to find favourites from; rolling_pred_win_rate is null");
        let nulls =
            Series::full_null("rolling_pred_win_rate".into(), df.height(), &DataType::Float64);
        df.with_column(nulls)?;
        return Ok(df);
    }

    let line = frame::floats(&df, "line_odds")?;
    let oppo_line = frame::floats(&df, "oppo_line_odds")?;
    let win = frame::floats(&df, "win_odds")?;
    let oppo_win = frame::floats(&df, "oppo_win_odds")?;
    let favoured: Vec<Option<f64>> = (0..df.height())
        .map(|row| favourite(line[row], oppo_line[row], win[row], oppo_win[row]))
        .collect();

    let teams = groups(frame::strs(&df, "team")?);
    let values = rolling_prior_mean(&teams, &favoured);
    df.with_column(Column::new("rolling_pred_win_rate".into(), values))?;
    Ok(df)
}

/// Mean of the previous results over the last 23 matches, across seasons.
pub fn add_rolling_last_week_win_rate(mut df: DataFrame) -> PipelineResult<DataFrame> {
    frame::require_columns(&df, &["team", "score", "oppo_score"])?;
    let results = match_results(&df)?;
    let teams = groups(frame::strs(&df, "team")?);
    let values = rolling_prior_mean(&teams, &results);
    df.with_column(Column::new("rolling_last_week_win_rate".into(), values))?;
    Ok(df)
}

/// Position on the ladder going into the round: premiership points, then percentage.
pub fn add_ladder_position(mut df: DataFrame) -> PipelineResult<DataFrame> {
    frame::require_columns(&df, &["team", "year", "round_number", "score", "oppo_score"])?;
    let standings = df
        .clone()
        .lazy()
        .select([cum_win_points_expr(), cum_percent_expr()])
        .collect()?;
    let points = frame::ints(&standings, "cum_win_points")?;
    let percent = frame::floats(&standings, "cum_percent")?;
    let teams = frame::strs(&df, "team")?;

    let rounds: Vec<(Option<i64>, Option<i64>)> = frame::ints(&df, "year")?
        .into_iter()
        .zip(frame::ints(&df, "round_number")?)
        .collect();
    let mut values: Vec<Option<i64>> = vec![None; df.height()];
    for mut rows in groups(rounds) {
        rows.sort_by(|a, b| {
            descending(points[*a], points[*b])
                .then_with(|| descending(percent[*a], percent[*b]))
                .then_with(|| teams[*a].cmp(&teams[*b]))
        });
        for (position, row) in rows.iter().enumerate() {
            values[*row] = Some(position as i64 + 1);
        }
    }
    df.with_column(Column::new("ladder_position".into(), values))?;
    Ok(df)
}

/// Consecutive wins (positive) or losses (negative) going into the match. A draw
/// resets the streak.
pub fn add_win_streak(mut df: DataFrame) -> PipelineResult<DataFrame> {
    frame::require_columns(&df, &["team", "score", "oppo_score"])?;
    let results = match_results(&df)?;
    let mut values: Vec<Option<i64>> = vec![None; df.height()];
    for rows in groups(frame::strs(&df, "team")?) {
        let mut streak = 0i64;
        for row in rows {
            values[row] = Some(streak);
            streak = match results[row] {
                Some(r) if r > 0.5 => streak.max(0) + 1,
                Some(r) if r < 0.5 => streak.min(0) - 1,
                Some(_) => 0,
                None => streak,
            };
        }
    }
    df.with_column(Column::new("win_streak".into(), values))?;
    Ok(df)
}

// 1 won, 0.5 drawn, 0 lost; null when either score is.
fn result_expr() -> Expr {
    when(col("score").is_null().or(col("oppo_score").is_null()))
        .then(lit(NULL).cast(DataType::Float64))
        .when(col("score").gt(col("oppo_score")))
        .then(lit(1.0))
        .when(col("score").eq(col("oppo_score")))
        .then(lit(0.5))
        .otherwise(lit(0.0))
}

/// Running total of a column over the earlier rows of the partition.
fn prior_total(values: Expr) -> Expr {
    let values = values.cast(DataType::Float64).fill_null(lit(0.0));
    (values.clone().cum_sum(false) - values).over([col("team"), col("year")])
}

fn cum_percent_expr() -> Expr {
    let points_for = prior_total(col("score"));
    let points_against = prior_total(col("oppo_score"));
    when(points_against.clone().gt(lit(0.0)))
        .then(points_for / points_against * lit(100.0))
        .otherwise(lit(NULL).cast(DataType::Float64))
        .alias("cum_percent")
}

fn cum_win_points_expr() -> Expr {
    prior_total(result_expr() * lit(WIN_POINTS))
        .cast(DataType::Int64)
        .alias("cum_win_points")
}

fn match_results(df: &DataFrame) -> PipelineResult<Vec<Option<f64>>> {
    let scores = frame::floats(df, "score")?;
    let oppo_scores = frame::floats(df, "oppo_score")?;
    Ok(scores
        .into_iter()
        .zip(oppo_scores)
        .map(|(score, oppo)| {
            Some(match score?.partial_cmp(&oppo?)? {
                Ordering::Greater => 1.0,
                Ordering::Equal => 0.5,
                Ordering::Less => 0.0,
            })
        })
        .collect())
}

/// 1 when the team was favoured, 0 when it wasn't, null without odds.
fn favourite(
    line: Option<f64>,
    oppo_line: Option<f64>,
    win: Option<f64>,
    oppo_win: Option<f64>,
) -> Option<f64> {
    match (line, oppo_line) {
        (Some(line), Some(oppo)) if line < oppo => Some(1.0),
        (Some(line), Some(oppo)) if line > oppo => Some(0.0),
        _ => {
            let (win, oppo) = (win?, oppo_win?);
            Some(if win < oppo { 1.0 } else { 0.0 })
        }
    }
}

/// For each row, the mean of the known values over the previous 23 rows of its group.
fn rolling_prior_mean(groups: &[Vec<usize>], values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    for rows in groups {
        for (i, row) in rows.iter().enumerate() {
            let window = &rows[i.saturating_sub(ROLLING_WINDOW)..i];
            let known: Vec<f64> = window.iter().filter_map(|r| values[*r]).collect();
            if !known.is_empty() {
                out[*row] = Some(known.iter().sum::<f64>() / known.len() as f64);
            }
        }
    }
    out
}

/// Row positions grouped by key, groups and rows in frame order.
fn groups<K: Eq + Hash>(keys: Vec<K>) -> Vec<Vec<usize>> {
    let mut slots: HashMap<K, usize> = HashMap::new();
    let mut out: Vec<Vec<usize>> = Vec::new();
    for (row, key) in keys.into_iter().enumerate() {
        let slot = *slots.entry(key).or_insert_with(|| {
            out.push(Vec::new());
            out.len() - 1
        });
        out[slot].push(row);
    }
    out
}

// Nulls last, larger values first.
fn descending<T: PartialOrd>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Richmond: W 100-50, L 60-80, W 90-70 in 2019.
    fn richmond() -> DataFrame {
        df!(
            "team" => ["Richmond", "Richmond", "Richmond"],
            "year" => [2019i64, 2019, 2019],
            "round_number" => [1i64, 2, 3],
            "score" => [100i64, 60, 90],
            "oppo_score" => [50i64, 80, 70],
        )
        .unwrap()
    }

    fn floats(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        frame::floats(df, name).unwrap()
    }

    #[test]
    fn last_week_result_shifts_within_team() {
        let df = add_last_week_result(richmond()).unwrap();
        assert_eq!(floats(&df, "last_week_result"), vec![None, Some(1.0), Some(0.0)]);
    }

    #[test]
    fn last_week_score_does_not_cross_teams() {
        let df = df!(
            "team" => ["Carlton", "Richmond", "Richmond"],
            "score" => [64i64, 100, 72],
        )
        .unwrap();
        let df = add_last_week_score(df).unwrap();
        let last_week = df.column("last_week_score").unwrap().i64().unwrap();
        assert_eq!(last_week.get(0), None);
        assert_eq!(last_week.get(1), None);
        assert_eq!(last_week.get(2), Some(100));
    }

    #[test]
    fn cumulative_columns_only_count_prior_matches() {
        let df = add_cum_win_points(add_cum_percent(richmond()).unwrap()).unwrap();
        assert_eq!(
            frame::ints(&df, "cum_win_points").unwrap(),
            vec![Some(0), Some(4), Some(4)]
        );
        let percent = floats(&df, "cum_percent");
        assert_eq!(percent[0], None);
        assert_eq!(percent[1], Some(200.0));
        assert_eq!(percent[2], Some(160.0 / 130.0 * 100.0));
    }

    #[test]
    fn win_streak_flips_sign_on_a_loss() {
        let df = add_win_streak(richmond()).unwrap();
        assert_eq!(frame::ints(&df, "win_streak").unwrap(), vec![Some(0), Some(1), Some(-1)]);
    }

    #[test]
    fn rolling_rate_averages_previous_results() {
        let df = add_rolling_last_week_win_rate(richmond()).unwrap();
        let rates = floats(&df, "rolling_last_week_win_rate");
        assert_eq!(rates[0], None);
        assert_eq!(rates[2], Some(0.5));
    }

    #[test]
    fn favourites_come_from_the_line_then_the_win_price() {
        // favoured on the line, favoured on price with level lines, then the underdog
        let df = df!(
            "team" => ["Richmond", "Richmond", "Richmond", "Richmond"],
            "line_odds" => [-12.5f64, 0.0, 18.5, -3.5],
            "oppo_line_odds" => [12.5f64, 0.0, -18.5, 3.5],
            "win_odds" => [1.4f64, 1.8, 3.6, 1.7],
            "oppo_win_odds" => [2.9f64, 2.0, 1.3, 2.1],
        )
        .unwrap();
        let df = add_rolling_pred_win_rate(df).unwrap();
        let rates = floats(&df, "rolling_pred_win_rate");
        assert_eq!(rates[0], None);
        assert_eq!(rates[1], Some(1.0));
        assert_eq!(rates[2], Some(1.0));
        assert_eq!(rates[3], Some(2.0 / 3.0));
    }

    #[test]
    fn pred_win_rate_is_null_without_odds() {
        let df = add_rolling_pred_win_rate(richmond()).unwrap();
        assert_eq!(floats(&df, "rolling_pred_win_rate"), vec![None, None, None]);
    }

    #[test]
    fn ladder_ranks_points_then_percentage() {
        let df = df!(
            "team" => ["A", "A", "B", "B"],
            "year" => [2019i64, 2019, 2019, 2019],
            "round_number" => [1i64, 2, 1, 2],
            "score" => [100i64, 0, 50, 0],
            "oppo_score" => [50i64, 0, 100, 0],
        )
        .unwrap();
        let df = add_ladder_position(df).unwrap();
        let ladder = frame::ints(&df, "ladder_position").unwrap();
        assert_eq!(ladder[1], Some(1));
        assert_eq!(ladder[3], Some(2));
    }
}
