//! Reshaping between match rows (one per match, `home_*`/`away_*` columns) and
//! team-match rows (one per team per match, `*`/`oppo_*` columns).

use std::collections::BTreeMap;

use log::warn;
use polars::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::PipelineResult;
use crate::frame;

const MATCH_ROW: &str = "__match_row";

/// A single model's prediction from one team's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamPrediction {
    pub team: String,
    pub oppo_team: String,
    pub year: i32,
    pub round_number: i32,
    #[serde(deserialize_with = "de_flag")]
    pub at_home: bool,
    pub ml_model: String,
    #[serde(default)]
    pub predicted_margin: Option<f64>,
    #[serde(default)]
    pub predicted_win_probability: Option<f64>,
}

/// A single model's prediction for a match, expressed for the predicted winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPrediction {
    pub year: i32,
    pub round_number: i32,
    pub ml_model: String,
    pub home_team: String,
    pub away_team: String,
    pub predicted_winner: String,
    pub predicted_margin: Option<f64>,
    pub predicted_win_probability: Option<f64>,
}

impl MatchPrediction {
    pub fn winner_is_home(&self) -> bool {
        self.predicted_winner == self.home_team
    }
}

fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    })
}

/// Splits each match row into a home-team row and an away-team row, in match order.
pub fn match_to_team_matches(matches: &DataFrame) -> PipelineResult<DataFrame> {
    frame::require_columns(matches, &["home_team", "away_team", "year", "round_number"])?;
    let names = frame::column_names(matches);
    let indexed = matches.clone().lazy().with_row_index(MATCH_ROW, None);

    let view = |home: bool| -> PipelineResult<DataFrame> {
        let mut exprs: Vec<Expr> = names
            .iter()
            .map(|name| col(name.as_str()).alias(side_column(name, home)))
            .collect();
        exprs.push(lit(i64::from(home)).alias("at_home"));
        exprs.push(col(MATCH_ROW));
        Ok(indexed.clone().select(exprs).collect()?)
    };

    let teams = frame::concat_diagonal(&[view(true)?, view(false)?])?;
    let teams = frame::sort_stable(&teams, &[MATCH_ROW], false)?;
    Ok(teams.drop(MATCH_ROW)?)
}

fn side_column(col: &str, home: bool) -> String {
    let (own, other) = if home { ("home_", "away_") } else { ("away_", "home_") };
    if let Some(rest) = col.strip_prefix(own) {
        return rest.to_string();
    }
    if let Some(rest) = col.strip_prefix(other) {
        return if rest == "team" {
            "oppo_team".to_string()
        } else {
            format!("oppo_{rest}")
        };
    }
    col.to_string()
}

#[derive(Default)]
struct MatchSides<'a> {
    home: Option<&'a TeamPrediction>,
    away: Option<&'a TeamPrediction>,
}

/// Combines both teams' predictions for a match into one prediction per model.
///
/// The margin is the mean of the two sides' views, `(home - away) / 2`, and the home
/// win probability is `(p_home + 1 - p_away) / 2`. A tied margin goes to the home team.
pub fn team_predictions_to_matches(rows: &[TeamPrediction]) -> Vec<MatchPrediction> {
    let mut grouped: BTreeMap<(i32, i32, String, String, String), MatchSides<'_>> = BTreeMap::new();
    for row in rows {
        let (home, away) = if row.at_home {
            (row.team.clone(), row.oppo_team.clone())
        } else {
            (row.oppo_team.clone(), row.team.clone())
        };
        let sides = grouped
            .entry((row.year, row.round_number, row.ml_model.clone(), home, away))
            .or_default();
        if row.at_home {
            sides.home = Some(row);
        } else {
            sides.away = Some(row);
        }
    }

    let mut out = Vec::with_capacity(grouped.len());
    for ((year, round_number, ml_model, home_team, away_team), sides) in grouped {
        let home_margin = consolidate(
            sides.home.and_then(|p| p.predicted_margin),
            sides.away.and_then(|p| p.predicted_margin),
            |h, a| (h - a) / 2.0,
            |a| -a,
        );
        let home_prob = consolidate(
            sides.home.and_then(|p| p.predicted_win_probability),
            sides.away.and_then(|p| p.predicted_win_probability),
            |h, a| (h + 1.0 - a) / 2.0,
            |a| 1.0 - a,
        );

        let home_wins = match (home_margin, home_prob) {
            (Some(margin), _) => margin >= 0.0,
            (None, Some(prob)) => prob >= 0.5,
            (None, None) => {
                warn!("{ml_model} has no prediction for {home_team} v {away_team}; skipping");
                continue;
            }
        };

        let predicted_winner = if home_wins { home_team.clone() } else { away_team.clone() };
        out.push(MatchPrediction {
            year,
            round_number,
            ml_model,
            home_team,
            away_team,
            predicted_winner,
            predicted_margin: home_margin.map(f64::abs),
            predicted_win_probability: home_prob.map(|p| if home_wins { p } else { 1.0 - p }),
        });
    }
    out
}

fn consolidate(
    home: Option<f64>,
    away: Option<f64>,
    both: impl Fn(f64, f64) -> f64,
    away_only: impl Fn(f64) -> f64,
) -> Option<f64> {
    match (home, away) {
        (Some(h), Some(a)) => Some(both(h, a)),
        (Some(h), None) => Some(h),
        (None, Some(a)) => Some(away_only(a)),
        (None, None) => None,
    }
}
