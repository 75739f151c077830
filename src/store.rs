//! SQLite persistence for teams, matches, team matches and model predictions.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use chrono_tz::Tz;
use log::{debug, info};
use polars::prelude::DataFrame;
use rusqlite::{Connection, OptionalExtension, params};

use crate::frame;
use crate::pivot::MatchPrediction;

/// A match counts as played this long after it starts.
pub const MATCH_DURATION_HOURS: i64 = 3;

const BUSY_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatch {
    pub id: i64,
    pub start_date_time: DateTime<Utc>,
    pub season: i32,
    pub round_number: i32,
    pub venue: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub winner: Option<String>,
    pub margin: Option<i64>,
}

impl StoredMatch {
    pub fn has_been_played(&self, now: DateTime<Tz>) -> bool {
        self.start_date_time + Duration::hours(MATCH_DURATION_HOURS) < now.with_timezone(&Utc)
    }

    pub fn is_draw(&self) -> bool {
        self.margin == Some(0)
    }
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    // the results job and the tipping chain each hold a connection
    conn.busy_timeout(std::time::Duration::from_secs(BUSY_TIMEOUT_SECS))
        .context("set sqlite busy timeout")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS teams (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS matches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            start_date_time TEXT NOT NULL,
            season INTEGER NOT NULL CHECK (season > 0),
            round_number INTEGER NOT NULL CHECK (round_number > 0),
            venue TEXT NOT NULL CHECK (venue <> ''),
            winner_id INTEGER NULL REFERENCES teams(id),
            margin INTEGER NULL CHECK (margin >= 0),
            updated_at TEXT NOT NULL,
            UNIQUE (start_date_time, round_number, venue)
        );
        CREATE INDEX IF NOT EXISTS idx_matches_round ON matches(season, round_number);
        CREATE INDEX IF NOT EXISTS idx_matches_start ON matches(start_date_time);

        CREATE TABLE IF NOT EXISTS team_matches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            match_id INTEGER NOT NULL REFERENCES matches(id),
            team_id INTEGER NOT NULL REFERENCES teams(id),
            at_home INTEGER NOT NULL,
            score INTEGER NOT NULL DEFAULT 0,
            UNIQUE (match_id, team_id)
        );

        CREATE TABLE IF NOT EXISTS predictions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            match_id INTEGER NOT NULL REFERENCES matches(id),
            ml_model TEXT NOT NULL,
            predicted_winner_id INTEGER NOT NULL REFERENCES teams(id),
            predicted_margin REAL NULL,
            predicted_win_probability REAL NULL,
            is_correct INTEGER NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (match_id, ml_model)
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Inserts any team not yet stored. Returns how many were new.
pub fn ensure_teams<'a>(
    conn: &Connection,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<usize> {
    let mut inserted = 0usize;
    for name in names {
        inserted += conn
            .execute("INSERT OR IGNORE INTO teams(name) VALUES (?1)", params![name])
            .context("insert team")?;
    }
    Ok(inserted)
}

fn team_id(conn: &Connection, name: &str) -> Result<i64> {
    conn.query_row("SELECT id FROM teams WHERE name = ?1", params![name], |row| row.get(0))
        .optional()
        .context("query team")?
        .ok_or_else(|| anyhow!("unknown team `{name}`"))
}

/// Gets or creates a match per fixture row, and its home and away team matches.
/// Returns the number of team matches created.
pub fn create_matches_from_fixture(conn: &mut Connection, fixture: &DataFrame) -> Result<usize> {
    frame::require_columns(
        fixture,
        &["date", "year", "round_number", "venue", "home_team", "away_team"],
    )?;
    if frame::is_blank(fixture) {
        bail!("no fixture data found");
    }
    let dates = frame::datetimes(fixture, "date")?;
    let years = frame::ints(fixture, "year")?;
    let rounds = frame::ints(fixture, "round_number")?;
    let venues = frame::strs(fixture, "venue")?;
    let home_teams = frame::strs(fixture, "home_team")?;
    let away_teams = frame::strs(fixture, "away_team")?;

    let tx = conn.transaction().context("begin fixture transaction")?;
    let mut created = 0usize;
    for row in 0..fixture.height() {
        let start = dates[row]
            .ok_or_else(|| anyhow!("fixture row {row} has no parsed date"))?
            .with_timezone(&Utc);
        let round_number =
            rounds[row].ok_or_else(|| anyhow!("fixture row {row} has no round number"))?;
        let season = years[row].unwrap_or(i64::from(chrono::Datelike::year(&start)));
        let venue = venues[row].clone().unwrap_or_default();
        let home_team = home_teams[row].clone().unwrap_or_default();
        let away_team = away_teams[row].clone().unwrap_or_default();

        tx.execute(
            "INSERT OR IGNORE INTO matches(start_date_time, season, round_number, venue, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![utc_text(start), season, round_number, venue, Utc::now().to_rfc3339()],
        )
        .context("insert match")?;
        let match_id: i64 = tx
            .query_row(
                "SELECT id FROM matches \
                 WHERE start_date_time = ?1 AND round_number = ?2 AND venue = ?3",
                params![utc_text(start), round_number, venue],
                |r| r.get(0),
            )
            .context("query match")?;

        let existing: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM team_matches WHERE match_id = ?1",
                params![match_id],
                |r| r.get(0),
            )
            .context("count team matches")?;
        match existing {
            0 => {}
            2 => continue,
            n => bail!(
                "{home_team} v {away_team} at {venue} has {n} team matches; expected 0 or 2"
            ),
        }

        for (team, at_home) in [(&home_team, true), (&away_team, false)] {
            let team_id = team_id(&tx, team)?;
            tx.execute(
                "INSERT INTO team_matches(match_id, team_id, at_home, score) \
                 VALUES (?1, ?2, ?3, 0)",
                params![match_id, team_id, at_home],
            )
            .context("insert team match")?;
            created += 1;
        }
    }
    tx.commit().context("commit fixture transaction")?;
    debug!("created {created} team matches");
    Ok(created)
}

pub fn count_unplayed_matches(conn: &Connection, now: DateTime<Tz>) -> Result<usize> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM matches WHERE start_date_time > ?1",
            params![utc_text(now.with_timezone(&Utc))],
            |row| row.get(0),
        )
        .context("count unplayed matches")?;
    Ok(count as usize)
}

/// Records scores, winner and margin for stored matches that have been played, then
/// refreshes the correctness of their predictions. Returns the number of matches
/// updated.
pub fn update_match_results(
    conn: &mut Connection,
    results: &DataFrame,
    now: DateTime<Tz>,
) -> Result<usize> {
    frame::require_columns(
        results,
        &["year", "round_number", "home_team", "away_team", "home_score", "away_score"],
    )?;
    let years = frame::ints(results, "year")?;
    let rounds = frame::ints(results, "round_number")?;
    let home_teams = frame::strs(results, "home_team")?;
    let away_teams = frame::strs(results, "away_team")?;
    let home_scores = frame::ints(results, "home_score")?;
    let away_scores = frame::ints(results, "away_score")?;

    let tx = conn.transaction().context("begin results transaction")?;
    let mut updated = 0usize;
    for row in 0..results.height() {
        let (Some(year), Some(round_number), Some(home_score), Some(away_score)) =
            (years[row], rounds[row], home_scores[row], away_scores[row])
        else {
            continue;
        };
        let home_team = home_teams[row].clone().unwrap_or_default();
        let away_team = away_teams[row].clone().unwrap_or_default();

        let Some(stored) = find_match(&tx, year, round_number, &home_team, &away_team)? else {
            debug!("no stored match for {home_team} v {away_team}, round {round_number} {year}");
            continue;
        };
        if !stored.has_been_played(now) {
            continue;
        }

        let margin = (home_score - away_score).abs();
        let winner = match home_score.cmp(&away_score) {
            std::cmp::Ordering::Greater => Some(team_id(&tx, &home_team)?),
            std::cmp::Ordering::Less => Some(team_id(&tx, &away_team)?),
            std::cmp::Ordering::Equal => None,
        };
        tx.execute(
            "UPDATE matches SET winner_id = ?1, margin = ?2, updated_at = ?3 WHERE id = ?4",
            params![winner, margin, Utc::now().to_rfc3339(), stored.id],
        )
        .context("update match result")?;
        for (team, score) in [(&home_team, home_score), (&away_team, away_score)] {
            tx.execute(
                "UPDATE team_matches SET score = ?1
                 WHERE match_id = ?2 AND team_id = (SELECT id FROM teams WHERE name = ?3)",
                params![score, stored.id, team],
            )
            .context("update team match score")?;
        }
        refresh_correctness(&tx, Some(stored.id))?;
        updated += 1;
    }
    tx.commit().context("commit results transaction")?;
    info!("updated results for {updated} matches");
    Ok(updated)
}

/// Creates or replaces the prediction of one model for one match.
pub fn upsert_prediction(conn: &Connection, prediction: &MatchPrediction) -> Result<()> {
    let stored = find_match(
        conn,
        i64::from(prediction.year),
        i64::from(prediction.round_number),
        &prediction.home_team,
        &prediction.away_team,
    )?
    .ok_or_else(|| {
        anyhow!(
            "no stored match for {} v {} in round {}, {}",
            prediction.home_team,
            prediction.away_team,
            prediction.round_number,
            prediction.year
        )
    })?;
    let winner_id = team_id(conn, &prediction.predicted_winner)?;

    conn.execute(
        r#"
        INSERT INTO predictions (
            match_id, ml_model, predicted_winner_id,
            predicted_margin, predicted_win_probability, is_correct, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)
        ON CONFLICT(match_id, ml_model) DO UPDATE SET
            predicted_winner_id = excluded.predicted_winner_id,
            predicted_margin = excluded.predicted_margin,
            predicted_win_probability = excluded.predicted_win_probability,
            updated_at = excluded.updated_at
        "#,
        params![
            stored.id,
            prediction.ml_model,
            winner_id,
            prediction.predicted_margin,
            prediction.predicted_win_probability,
            Utc::now().to_rfc3339(),
        ],
    )
    .context("upsert prediction")?;
    refresh_correctness(conn, Some(stored.id))
}

pub fn load_round_predictions(
    conn: &Connection,
    year: i32,
    round_number: i32,
) -> Result<Vec<MatchPrediction>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT
                m.season, m.round_number, p.ml_model,
                home.name, away.name, winner.name,
                p.predicted_margin, p.predicted_win_probability
            FROM predictions p
            JOIN matches m ON m.id = p.match_id
            JOIN team_matches htm ON htm.match_id = m.id AND htm.at_home = 1
            JOIN teams home ON home.id = htm.team_id
            JOIN team_matches atm ON atm.match_id = m.id AND atm.at_home = 0
            JOIN teams away ON away.id = atm.team_id
            JOIN teams winner ON winner.id = p.predicted_winner_id
            WHERE m.season = ?1 AND m.round_number = ?2
            ORDER BY m.start_date_time ASC, m.id ASC, p.ml_model ASC
            "#,
        )
        .context("prepare load predictions query")?;

    let rows = stmt
        .query_map(params![year, round_number], |row| {
            Ok(MatchPrediction {
                year: row.get(0)?,
                round_number: row.get(1)?,
                ml_model: row.get(2)?,
                home_team: row.get(3)?,
                away_team: row.get(4)?,
                predicted_winner: row.get(5)?,
                predicted_margin: row.get(6)?,
                predicted_win_probability: row.get(7)?,
            })
        })
        .context("query load predictions")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode prediction row")?);
    }
    Ok(out)
}

/// Recomputes `is_correct` for every stored prediction.
pub fn backfill_prediction_correctness(conn: &mut Connection) -> Result<usize> {
    let tx = conn.transaction().context("begin backfill transaction")?;
    refresh_correctness(&tx, None)?;
    let count: i64 = tx
        .query_row("SELECT COUNT(*) FROM predictions", [], |row| row.get(0))
        .context("count predictions")?;
    tx.commit().context("commit backfill transaction")?;
    Ok(count as usize)
}

pub fn prediction_correctness(
    conn: &Connection,
    year: i32,
    round_number: i32,
) -> Result<Vec<(String, Option<bool>)>> {
    let mut stmt = conn
        .prepare(
            "SELECT p.ml_model, p.is_correct FROM predictions p
             JOIN matches m ON m.id = p.match_id
             WHERE m.season = ?1 AND m.round_number = ?2
             ORDER BY m.start_date_time ASC, p.ml_model ASC",
        )
        .context("prepare correctness query")?;
    let rows = stmt
        .query_map(params![year, round_number], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<bool>>(1)?))
        })
        .context("query correctness")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode correctness row")?);
    }
    Ok(out)
}

// Draws count as correct for every tip. Matches without a result stay NULL.
fn refresh_correctness(conn: &Connection, match_id: Option<i64>) -> Result<()> {
    conn.execute(
        r#"
        UPDATE predictions SET is_correct = (
            SELECT CASE
                WHEN m.margin IS NULL THEN NULL
                WHEN m.margin = 0 THEN 1
                WHEN m.winner_id = predictions.predicted_winner_id THEN 1
                ELSE 0
            END
            FROM matches m WHERE m.id = predictions.match_id
        )
        WHERE ?1 IS NULL OR match_id = ?1
        "#,
        params![match_id],
    )
    .context("update prediction correctness")?;
    Ok(())
}

pub fn find_match(
    conn: &Connection,
    season: i64,
    round_number: i64,
    home_team: &str,
    away_team: &str,
) -> Result<Option<StoredMatch>> {
    conn.query_row(
        r#"
        SELECT
            m.id, m.start_date_time, m.season, m.round_number, m.venue,
            home.name, away.name, htm.score, atm.score, winner.name, m.margin
        FROM matches m
        JOIN team_matches htm ON htm.match_id = m.id AND htm.at_home = 1
        JOIN teams home ON home.id = htm.team_id
        JOIN team_matches atm ON atm.match_id = m.id AND atm.at_home = 0
        JOIN teams away ON away.id = atm.team_id
        LEFT JOIN teams winner ON winner.id = m.winner_id
        WHERE m.season = ?1 AND m.round_number = ?2 AND home.name = ?3 AND away.name = ?4
        "#,
        params![season, round_number, home_team, away_team],
        |row| {
            let start: String = row.get(1)?;
            let start_date_time = DateTime::parse_from_rfc3339(&start)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|err| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Text,
                        Box::new(err),
                    )
                })?;
            Ok(StoredMatch {
                id: row.get(0)?,
                start_date_time,
                season: row.get(2)?,
                round_number: row.get(3)?,
                venue: row.get(4)?,
                home_team: row.get(5)?,
                away_team: row.get(6)?,
                home_score: row.get(7)?,
                away_score: row.get(8)?,
                winner: row.get(9)?,
                margin: row.get(10)?,
            })
        },
    )
    .optional()
    .context("query stored match")
}

fn utc_text(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}
