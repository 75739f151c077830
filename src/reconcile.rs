//! Folding not-yet-played data into the historical frames: the next round of the
//! fixture into match data, and team rosters into player data.

use chrono::DateTime;
use chrono_tz::Tz;
use log::{debug, warn};
use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;

use crate::cleaning::{normalize_venues, player_row_ids};
use crate::dates::parse_dates;
use crate::error::PipelineResult;
use crate::frame;
use crate::names::NameTables;

static REGULAR_ROUND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)round\s+(\d+)$").expect("regular round pattern is valid"));

const FIXTURE_COLS: &[&str] = &[
    "date",
    "venue",
    "year",
    "round_number",
    "home_team",
    "away_team",
    "round_type",
];

const FIXTURE_DEDUP_COLS: &[&str] = &[
    "date",
    "venue",
    "year",
    "round_number",
    "home_team",
    "away_team",
];

const PLAYER_ID_RANK: &str = "player_id_rank";

pub fn round_type(label: &str) -> &'static str {
    if REGULAR_ROUND.is_match(label.trim()) {
        "Regular"
    } else {
        "Finals"
    }
}

/// Rows of the earliest fixture round that still has a match after `now`, shaped like
/// match data. An empty fixture, or one that is fully played, yields no rows.
pub fn next_round_fixture(
    fixture: &DataFrame,
    now: DateTime<Tz>,
    names: &NameTables,
) -> PipelineResult<DataFrame> {
    let fixture =
        frame::rename_columns(fixture.clone(), &[("round", "round_number"), ("season", "year")])?;
    let has_label = frame::has_column(&fixture, "round_label");
    let columns: Vec<&str> = FIXTURE_COLS
        .iter()
        .copied()
        .filter(|col| {
            frame::has_column(&fixture, col) || (*col == "round_type" && has_label)
        })
        .collect();

    if frame::is_blank(&fixture) {
        warn!("fixture for the upcoming round hasn't been posted yet; nothing to add");
        return frame::empty_frame(&columns);
    }

    frame::require_columns(&fixture, &["date", "round_number"])?;
    let fixture = parse_dates(fixture, "date")?;
    let dates = frame::datetimes(&fixture, "date")?;
    let rounds = frame::ints(&fixture, "round_number")?;

    let next_round = dates
        .iter()
        .zip(&rounds)
        .filter(|(date, _)| date.is_some_and(|date| date > now))
        .filter_map(|(_, round)| *round)
        .min();

    let Some(next_round) = next_round else {
        warn!("no fixture matches found after {now}; nothing to add");
        return frame::empty_frame(&columns);
    };
    debug!("next unplayed round is {next_round}");

    let in_round: Vec<bool> = rounds.iter().map(|round| *round == Some(next_round)).collect();
    let mut upcoming = frame::filter_rows(&fixture, &in_round)?;
    upcoming.with_column(Column::new(
        "round_number".into(),
        vec![next_round; upcoming.height()],
    ))?;

    if has_label {
        let round_types: Vec<Option<&str>> = frame::strs(&upcoming, "round_label")?
            .iter()
            .map(|label| label.as_deref().map(round_type))
            .collect();
        upcoming.with_column(Column::new("round_type".into(), round_types))?;
    }
    let upcoming = normalize_venues(upcoming, "venue", names)?;

    Ok(upcoming.select(columns.iter().copied())?)
}

/// Appends the next unplayed round to cleaned match data. Rows already present in the
/// match data win over fixture rows; remaining gaps become zero.
pub fn append_fixture_to_match_data(
    match_data: DataFrame,
    fixture: &DataFrame,
    now: DateTime<Tz>,
    names: &NameTables,
) -> PipelineResult<DataFrame> {
    let upcoming = next_round_fixture(fixture, now, names)?;
    let added = upcoming.height();
    let combined = frame::concat_diagonal(&[match_data, upcoming])?;

    let key: Vec<&str> = FIXTURE_DEDUP_COLS
        .iter()
        .copied()
        .filter(|col| frame::has_column(&combined, col))
        .collect();
    let combined = frame::dedup(&combined, &key, UniqueKeepStrategy::First)?;
    debug!("appended {added} fixture rows to match data");

    frame::fill_nulls_with_zero(combined)
}

/// Resolves roster entries to player ids.
///
/// Names are matched against the historical player data; when two players share a
/// name the one with the highest id (the latest to enter the league) wins. Players new
/// to the league fall back to their name as id. An empty roster comes back with an
/// explicit, empty `player_id` column.
pub fn clean_roster_data(
    player: &DataFrame,
    roster: &DataFrame,
    year: i32,
) -> PipelineResult<DataFrame> {
    if frame::is_blank(roster) {
        let mut empty = roster.clear();
        if !frame::has_column(&empty, "player_id") {
            empty.with_column(Series::new_empty("player_id".into(), &DataType::String))?;
        }
        return Ok(empty);
    }

    frame::require_columns(roster, &["player_name"])?;
    let known = player.select(["player_name", "player_id"])?;
    let known = frame::dedup(&known, &["player_name", "player_id"], UniqueKeepStrategy::First)?;

    let roster = frame::drop_columns(roster.clone(), &["player_id"])?;
    let mut roster = frame::left_join(&roster, &known, &["player_name"])?;
    let ranks: Vec<Option<i64>> = frame::strs(&roster, "player_id")?
        .iter()
        .map(|id| id.as_deref().and_then(|id| id.trim().parse().ok()))
        .collect();
    roster.with_column(Column::new(PLAYER_ID_RANK.into(), ranks))?;
    let roster = frame::sort_stable(&roster, &[PLAYER_ID_RANK], true)?;
    let roster = frame::dedup(&roster, &["player_name"], UniqueKeepStrategy::First)?;
    let mut roster = frame::drop_columns(roster, &[PLAYER_ID_RANK])?;

    roster.with_column(Column::new(
        "year".into(),
        vec![i64::from(year); roster.height()],
    ))?;
    if frame::has_column(&roster, "date") {
        roster = parse_dates(roster, "date")?;
    }

    let ids: Vec<Option<String>> = frame::strs(&roster, "player_id")?
        .into_iter()
        .zip(frame::strs(&roster, "player_name")?)
        .map(|(id, name)| id.or(name))
        .collect();
    roster.with_column(Column::new("player_id".into(), ids))?;
    roster.with_column(Column::new("id".into(), player_row_ids(&roster)?))?;
    Ok(roster)
}

pub fn append_rosters_to_player_data(
    player_data: DataFrame,
    roster: &DataFrame,
    year: i32,
) -> PipelineResult<DataFrame> {
    let roster = clean_roster_data(&player_data, roster, year)?;
    let combined = frame::concat_diagonal(&[player_data, roster])?;
    frame::fill_nulls_with_zero(combined)
}
