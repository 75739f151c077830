//! Per-source cleaning of raw match, player and betting extracts.
//!
//! Each cleaner borrows its input and returns a new frame with canonical column names,
//! coerced types, Melbourne timestamps and the known-bad rows removed.

use chrono::{DateTime, Datelike};
use chrono_tz::Tz;
use polars::prelude::*;

use crate::dates::{now_melbourne, parse_dates};
use crate::error::{PipelineError, PipelineResult};
use crate::frame;
use crate::names::NameTables;
use crate::reconcile;

const MATCH_COL_TRANSLATIONS: &[(&str, &str)] = &[
    ("home_points", "home_score"),
    ("away_points", "away_score"),
    ("margin", "home_margin"),
    ("season", "year"),
    ("game", "match_id"),
    ("home_goals", "home_team_goals"),
    ("away_goals", "away_team_goals"),
    ("home_behinds", "home_team_behinds"),
    ("away_behinds", "away_team_behinds"),
];

const PLAYER_COL_TRANSLATIONS: &[(&str, &str)] = &[
    ("time_on_ground__", "time_on_ground"),
    ("id", "player_id"),
    ("round", "round_number"),
    ("season", "year"),
];

const BETTING_COL_TRANSLATIONS: &[(&str, &str)] = &[("season", "year"), ("round", "round_number")];

const UNUSED_PLAYER_COLS: &[&str] = &[
    "local_start_time",
    "attendance",
    "hq1g",
    "hq1b",
    "hq2g",
    "hq2b",
    "hq3g",
    "hq3b",
    "hq4g",
    "hq4b",
    "aq1g",
    "aq1b",
    "aq2g",
    "aq2b",
    "aq3g",
    "aq3b",
    "aq4g",
    "aq4b",
    "jumper_no_",
    "umpire_1",
    "umpire_2",
    "umpire_3",
    "umpire_4",
    "substitute",
    "group_id",
    // re-derived from the match join
    "first_name",
    "surname",
    "round_number",
];

const UNUSED_BETTING_COLS: &[&str] = &[
    "home_win_paid",
    "home_line_paid",
    "away_win_paid",
    "away_line_paid",
    "venue",
    "round_label",
    "home_margin",
    "away_margin",
];

pub const MATCH_KEY: &[&str] = &["year", "round_number", "home_team", "away_team"];
pub const PLAYER_KEY: &[&str] = &["year", "round_number", "player_id"];

// Early round-robin rounds that don't split into regular matches.
const ANOMALOUS_ROUNDS: &[(i64, i64)] = &[(1897, 15), (1924, 19)];

/// Cleans raw extracts against a fixed set of name translations and a reference time.
#[derive(Debug, Clone)]
pub struct Cleaner<'a> {
    names: &'a NameTables,
    now: DateTime<Tz>,
}

impl<'a> Cleaner<'a> {
    pub fn new(names: &'a NameTables) -> Self {
        Self {
            names,
            now: now_melbourne(),
        }
    }

    /// Pins the reference time used to find the next unplayed round.
    pub fn at(mut self, now: DateTime<Tz>) -> Self {
        self.now = now;
        self
    }

    pub fn names(&self) -> &'a NameTables {
        self.names
    }

    pub fn now(&self) -> DateTime<Tz> {
        self.now
    }

    /// Cleans past match results and, when a fixture is given, appends the matches of
    /// the next unplayed round.
    pub fn clean_match_data(
        &self,
        past: &DataFrame,
        fixture: Option<&DataFrame>,
    ) -> PipelineResult<DataFrame> {
        let mut match_data = frame::rename_columns(past.clone(), MATCH_COL_TRANSLATIONS)?;
        match_data = parse_dates(match_data, "date")?;

        if !frame::has_column(&match_data, "home_margin") {
            frame::require_columns(&match_data, &["home_score", "away_score"])?;
            match_data = match_data
                .lazy()
                .with_column((col("home_score") - col("away_score")).alias("home_margin"))
                .collect()?;
        }
        frame::require_columns(&match_data, &["home_margin"])?;
        match_data = match_data
            .lazy()
            .with_column((lit(0) - col("home_margin")).alias("away_margin"))
            .collect()?;
        match_data = int_column(match_data, "year")?;
        match_data = int_column(match_data, "round_number")?;

        let match_data = filter_out_dodgy_data(&match_data, MATCH_KEY)?;
        let match_data = ids_to_text(match_data, "match_id")?;
        let match_data = frame::drop_columns(match_data, &["round"])?;

        match fixture {
            Some(fixture) => {
                reconcile::append_fixture_to_match_data(match_data, fixture, self.now, self.names)
            }
            None => Ok(match_data),
        }
    }

    /// Cleans per-player match statistics. Round numbers and match ids are taken from
    /// the cleaned match data because the player source's own ids are unreliable for
    /// recent seasons.
    pub fn clean_player_data(
        &self,
        player: &DataFrame,
        match_data: &DataFrame,
        roster: Option<&DataFrame>,
    ) -> PipelineResult<DataFrame> {
        let mut player_data = frame::rename_columns(player.clone(), PLAYER_COL_TRANSLATIONS)?;
        player_data = int_column(player_data, "year")?;
        player_data = map_text(player_data, "venue", |venue| venue.trim().to_string())?;

        let first = frame::strs(&player_data, "first_name")?;
        let last = frame::strs(&player_data, "surname")?;
        let full_names: Vec<Option<String>> = first
            .into_iter()
            .zip(last)
            .map(|(first, last)| Some(format!("{} {}", first?, last?)))
            .collect();
        player_data.with_column(Column::new("player_name".into(), full_names))?;

        let player_data = ids_to_text(player_data, "player_id")?;
        let player_data = parse_dates(player_data, "date")?;
        let player_data = frame::drop_columns(player_data, UNUSED_PLAYER_COLS)?;

        let match_ids = self
            .clean_match_data(match_data, None)?
            .select(["date", "venue", "round_number", "match_id"])?;

        let player_data = frame::left_join(&player_data, &match_ids, &["date", "venue"])?;
        let mut cleaned = filter_out_dodgy_data(&player_data, PLAYER_KEY)?;
        cleaned = frame::drop_columns(cleaned, &["venue"])?;
        if frame::has_column(&cleaned, "brownlow_votes") {
            // brownlow votes aren't known until the end of the season
            cleaned = cleaned
                .lazy()
                .with_column(col("brownlow_votes").fill_null(lit(0)))
                .collect()?;
        }
        // drops the finals that share a date and venue with another match
        let mut cleaned = frame::drop_null_rows(&cleaned)?;
        cleaned.with_column(Column::new("id".into(), player_row_ids(&cleaned)?))?;
        let cleaned = frame::sort_stable(&cleaned, &["id"], false)?;

        match roster {
            Some(roster) => {
                reconcile::append_rosters_to_player_data(cleaned, roster, self.now.year())
            }
            None => Ok(cleaned),
        }
    }

    pub fn clean_betting_data(&self, betting: &DataFrame) -> PipelineResult<DataFrame> {
        let betting = frame::rename_columns(betting.clone(), BETTING_COL_TRANSLATIONS)?;
        let betting = frame::drop_columns(betting, UNUSED_BETTING_COLS)?;
        let betting = normalize_teams(betting, "home_team", self.names)?;
        let betting = normalize_teams(betting, "away_team", self.names)?;
        parse_dates(betting, "date")
    }
}

/// Sorts by date, keeps the last row for each key, and removes the anomalous rounds.
///
/// Keeping the later row is a heuristic for replayed drawn finals: the replay is
/// assumed to be the authoritative result.
pub fn filter_out_dodgy_data(df: &DataFrame, key: &[&str]) -> PipelineResult<DataFrame> {
    let sorted = frame::sort_stable(df, &["date"], false)?;
    let deduped = frame::dedup(&sorted, key, UniqueKeepStrategy::Last)?;
    let anomalous = ANOMALOUS_ROUNDS
        .iter()
        .fold(lit(false), |acc, (year, round)| {
            acc.or(col("year").eq(lit(*year)).and(col("round_number").eq(lit(*round))))
        })
        .fill_null(lit(false));
    Ok(deduped.lazy().filter(anomalous.not()).collect()?)
}

/// `{year}.{match_id}.{player_id}` for every row; the year keeps ids from different
/// eras apart.
pub fn player_row_ids(df: &DataFrame) -> PipelineResult<Vec<String>> {
    let years = frame::strs(df, "year")?;
    let match_ids = frame::strs(df, "match_id")?;
    let player_ids = frame::strs(df, "player_id")?;
    Ok(years
        .into_iter()
        .zip(match_ids)
        .zip(player_ids)
        .map(|((year, match_id), player_id)| {
            format!(
                "{}.{}.{}",
                year.unwrap_or_default(),
                match_id.unwrap_or_default(),
                player_id.unwrap_or_default()
            )
        })
        .collect())
}

/// Rewrites a text column value by value, leaving nulls alone. Missing or non-text
/// columns pass through.
pub fn map_text(
    mut df: DataFrame,
    column: &str,
    f: impl Fn(&str) -> String,
) -> PipelineResult<DataFrame> {
    let is_text = df
        .column(column)
        .is_ok_and(|values| values.dtype() == &DataType::String);
    if !is_text {
        return Ok(df);
    }
    let values: Vec<Option<String>> = frame::strs(&df, column)?
        .into_iter()
        .map(|value| value.map(|value| f(&value)))
        .collect();
    df.with_column(Column::new(column.into(), values))?;
    Ok(df)
}

pub fn normalize_teams(
    df: DataFrame,
    column: &str,
    names: &NameTables,
) -> PipelineResult<DataFrame> {
    map_text(df, column, |team| names.normalize_team(team).to_string())
}

pub fn normalize_venues(
    df: DataFrame,
    column: &str,
    names: &NameTables,
) -> PipelineResult<DataFrame> {
    map_text(df, column, |venue| names.normalize_venue(venue).to_string())
}

/// Numeric ids are stored as text because player names stand in for missing ids and
/// ids get concatenated into composite keys.
pub fn ids_to_text(mut df: DataFrame, column: &str) -> PipelineResult<DataFrame> {
    let ids: Vec<Option<String>> = match frame::column(&df, column)?.dtype() {
        DataType::String => frame::strs(&df, column)?
            .into_iter()
            .map(|raw| raw.map(|raw| canonical_id(&raw)))
            .collect(),
        DataType::Null => vec![None; df.height()],
        dtype if dtype.is_primitive_numeric() => frame::ints(&df, column)?
            .into_iter()
            .map(|id| id.map(|id| id.to_string()))
            .collect(),
        other => {
            return Err(PipelineError::coercion(column, format!("{other} is not an id type")));
        }
    };
    df.with_column(Column::new(column.into(), ids))?;
    Ok(df)
}

fn canonical_id(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(id) if id.fract() == 0.0 && id.abs() < 1e15 => format!("{}", id as i64),
        _ => trimmed.to_string(),
    }
}

/// Casts a column to `Int64`, naming the column when a value won't convert.
pub fn int_column(mut df: DataFrame, column: &str) -> PipelineResult<DataFrame> {
    let values = frame::ints(&df, column)?;
    df.with_column(Column::new(column.into(), values))?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_become_canonical_text() {
        let df = df!("id" => [Some(9_876.0f64), None]).unwrap();
        let df = ids_to_text(df, "id").unwrap();
        assert_eq!(frame::strs(&df, "id").unwrap(), vec![Some("9876".to_string()), None]);

        let df = df!("id" => [" 12 ", "Sam Walsh", "12031.0"]).unwrap();
        let df = ids_to_text(df, "id").unwrap();
        let ids = frame::strs(&df, "id").unwrap();
        assert_eq!(ids[0].as_deref(), Some("12"));
        assert_eq!(ids[1].as_deref(), Some("Sam Walsh"));
        assert_eq!(ids[2].as_deref(), Some("12031"));

        let df = df!("id" => [1.5f64]).unwrap();
        assert!(ids_to_text(df, "id").is_err());
    }

    #[test]
    fn anomalous_rounds_are_removed() {
        let df = df!(
            "date" => [1i64, 2, 3],
            "year" => [Some(1897i64), Some(1897), None],
            "round_number" => [15i64, 14, 15],
            "match_id" => ["a", "b", "c"],
        )
        .unwrap();
        let kept = filter_out_dodgy_data(&df, &["match_id"]).unwrap();
        assert_eq!(
            frame::strs(&kept, "match_id").unwrap(),
            vec![Some("b".to_string()), Some("c".to_string())]
        );
    }

    #[test]
    fn later_duplicates_win() {
        let df = df!(
            "date" => [2i64, 1],
            "year" => [2010i64, 2010],
            "round_number" => [27i64, 27],
            "home_team" => ["Collingwood", "Collingwood"],
            "away_team" => ["St Kilda", "St Kilda"],
            "home_score" => [101i64, 68],
        )
        .unwrap();
        let kept = filter_out_dodgy_data(&df, MATCH_KEY).unwrap();
        assert_eq!(frame::ints(&kept, "home_score").unwrap(), vec![Some(101)]);
    }
}
