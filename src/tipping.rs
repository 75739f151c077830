//! Turning stored predictions into tips, and submitting them to tipping competitions.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Datelike};
use chrono_tz::Tz;
use log::{info, warn};
use once_cell::sync::Lazy;
use polars::prelude::DataFrame;
use reqwest::Url;
use reqwest::blocking::Client;
use rusqlite::Connection;
use scraper::{ElementRef, Html, Selector};
use serde_json::json;
use thiserror::Error;

use crate::config::Credentials;
use crate::dates::{end_of_year, now_melbourne, start_of_year};
use crate::error::PipelineResult;
use crate::frame;
use crate::http_client::{http_client, session_client};
use crate::jobs::{Job, JobQueue};
use crate::names::{NameTables, TipSite};
use crate::pivot::{MatchPrediction, team_predictions_to_matches};
use crate::service::DataImporter;
use crate::store;

pub const MONASH_TIPS_URL: &str = "http://probabilistic-footy.monash.edu/~footy/tips.shtml";
pub const FOOTY_TIPS_FORM_URL: &str = "https://www.footytips.com.au/tipping/afl/";

const FOOTY_TIPS_LUA: &str = include_str!("../scripts/footy_tips_submitter.lua");

// Values the Monash form starts with; left in place they mean a match was not tipped.
const EMPTY_PREDICTION_VALUES: &[&str] = &["0", "0.5"];

static FORM: Lazy<Selector> = Lazy::new(|| Selector::parse("form").expect("form selector"));
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("row selector"));
static LABEL_OR_INPUT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("label, input").expect("label or input selector"));
static INPUT: Lazy<Selector> = Lazy::new(|| Selector::parse("input").expect("input selector"));
static FIELD: Lazy<Selector> =
    Lazy::new(|| Selector::parse("input, select, textarea").expect("form field selector"));
static OPTION: Lazy<Selector> = Lazy::new(|| Selector::parse("option").expect("option selector"));

#[derive(Debug, Error)]
pub enum TipError {
    #[error("tried to use incorrect username and couldn't log in to the {competition} competition")]
    BadUsername { competition: String },
    #[error("tried to use incorrect password and couldn't log in to the {competition} competition")]
    BadPassword { competition: String },
    #[error("no form found on {url}")]
    MissingForm { url: String },
    #[error(
        "the number of predicted winners ({predictions}) doesn't match the number of matches \
         ({rows}); predicted winners: {winners:?}"
    )]
    RowCountMismatch {
        rows: usize,
        predictions: usize,
        winners: Vec<String>,
    },
    #[error("found {count} empty prediction inputs on {url}")]
    EmptyPredictions { count: usize, url: String },
    #[error("tip submission rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Which prediction a competition is scored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionKind {
    Margin,
    WinProbability,
}

/// One tip: the team picked and the number entered against it.
#[derive(Debug, Clone, PartialEq)]
pub struct Tip {
    pub home_team: String,
    pub away_team: String,
    pub winner: String,
    pub value: f64,
}

impl Tip {
    /// Margins are entered as whole numbers; probabilities as given.
    pub fn input_value(&self, kind: PredictionKind) -> String {
        match kind {
            PredictionKind::Margin => format!("{}", self.value.round() as i64),
            PredictionKind::WinProbability => format!("{}", self.value),
        }
    }
}

/// One tip per match, taken from the first prediction (in slice order) that carries
/// the kind of value needed. Matches with no such prediction are left out.
pub fn tips_for(predictions: &[MatchPrediction], kind: PredictionKind) -> Vec<Tip> {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut tips = Vec::new();
    for prediction in predictions {
        let value = match kind {
            PredictionKind::Margin => prediction.predicted_margin,
            PredictionKind::WinProbability => prediction.predicted_win_probability,
        };
        let Some(value) = value else {
            continue;
        };
        if !seen.insert((prediction.home_team.as_str(), prediction.away_team.as_str())) {
            continue;
        }
        tips.push(Tip {
            home_team: prediction.home_team.clone(),
            away_team: prediction.away_team.clone(),
            winner: prediction.predicted_winner.clone(),
            value,
        });
    }
    tips
}

/// Orders predictions so the listed models come first, in list order.
pub fn order_by_model(
    mut predictions: Vec<MatchPrediction>,
    models: &[String],
) -> Vec<MatchPrediction> {
    predictions
        .sort_by_key(|p| models.iter().position(|m| *m == p.ml_model).unwrap_or(models.len()));
    predictions
}

pub trait TipSubmitter: Send {
    fn name(&self) -> &str;
    fn submit_tips(&self, predictions: &[MatchPrediction]) -> Result<()>;
}

/// A form ready to post: the resolved action and every successful control's value.
#[derive(Debug, Clone, PartialEq)]
pub struct HtmlForm {
    pub action: String,
    pub method: String,
    pub fields: Vec<(String, String)>,
}

impl HtmlForm {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set(&mut self, name: &str, value: &str) {
        match self.fields.iter_mut().find(|(field, _)| field == name) {
            Some(field) => field.1 = value.to_string(),
            None => self.fields.push((name.to_string(), value.to_string())),
        }
    }

    fn from_element(form: ElementRef<'_>) -> Self {
        let mut fields = Vec::new();
        for control in form.select(&FIELD) {
            let element = control.value();
            let Some(name) = element.attr("name") else {
                continue;
            };
            let value = match element.name() {
                "select" => control
                    .select(&OPTION)
                    .find(|o| o.value().attr("selected").is_some())
                    .or_else(|| control.select(&OPTION).next())
                    .map(option_value),
                "textarea" => Some(control.text().collect()),
                _ => {
                    let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
                    match kind.as_str() {
                        "submit" | "button" | "image" | "reset" | "file" => None,
                        "radio" | "checkbox" if element.attr("checked").is_none() => None,
                        _ => Some(element.attr("value").unwrap_or_default().to_string()),
                    }
                }
            };
            if let Some(value) = value {
                fields.push((name.to_string(), value));
            }
        }

        Self {
            action: form.value().attr("action").unwrap_or_default().to_string(),
            method: form.value().attr("method").unwrap_or("get").to_ascii_lowercase(),
            fields,
        }
    }
}

fn option_value(option: ElementRef<'_>) -> String {
    option
        .value()
        .attr("value")
        .map(str::to_string)
        .unwrap_or_else(|| option.text().collect::<String>().trim().to_string())
}

pub fn parse_first_form(html: &str, url: &str) -> Result<HtmlForm, TipError> {
    let document = Html::parse_document(html);
    document
        .select(&FORM)
        .next()
        .map(HtmlForm::from_element)
        .ok_or_else(|| TipError::MissingForm { url: url.to_string() })
}

/// Fills the Monash login form for a competition.
pub fn fill_login_form(
    html: &str,
    url: &str,
    credentials: &Credentials,
    competition: &str,
) -> Result<HtmlForm, TipError> {
    let mut form = parse_first_form(html, url)?;
    form.set("name", &credentials.username);
    form.set("passwd", &credentials.password);
    form.set("comp", competition);
    Ok(form)
}

pub fn check_login(html: &str, competition: &str) -> Result<(), TipError> {
    if html.contains("Sorry, the alias") {
        return Err(TipError::BadUsername {
            competition: competition.to_string(),
        });
    }
    if html.contains("Wrong passwd") {
        return Err(TipError::BadPassword {
            competition: competition.to_string(),
        });
    }
    Ok(())
}

/// Picks each predicted winner and enters its value in the Monash tip table.
///
/// The table's first row holds the column labels, so every later row is a match. A
/// row count that differs from the number of tips, or a value input still at its
/// starting value after filling, aborts before anything is posted.
pub fn fill_tip_form(
    html: &str,
    url: &str,
    tips: &[Tip],
    kind: PredictionKind,
    names: &NameTables,
) -> Result<HtmlForm, TipError> {
    let document = Html::parse_document(html);
    let form_element = document
        .select(&FORM)
        .next()
        .ok_or_else(|| TipError::MissingForm { url: url.to_string() })?;
    let mut form = HtmlForm::from_element(form_element);

    let winners: BTreeMap<&str, String> = tips
        .iter()
        .map(|tip| (tip.winner.as_str(), tip.input_value(kind)))
        .collect();

    let rows: Vec<ElementRef<'_>> = form_element.select(&ROW).skip(1).collect();
    if rows.len() != winners.len() {
        return Err(TipError::RowCountMismatch {
            rows: rows.len(),
            predictions: winners.len(),
            winners: winners.keys().map(|w| w.to_string()).collect(),
        });
    }

    let mut text_inputs: Vec<String> = Vec::new();
    for row in rows {
        let mut predicted_winner: Option<&str> = None;
        for element in row.select(&LABEL_OR_INPUT) {
            if element.value().name() == "label" {
                let label: String = element.text().collect();
                let team = names.normalize_team(label.trim());
                if let Some((winner, _)) = winners.get_key_value(team)
                    && let Some(choice) = element.select(&INPUT).next()
                    && let (Some(name), Some(value)) =
                        (choice.value().attr("name"), choice.value().attr("value"))
                {
                    form.set(name, value);
                    predicted_winner = Some(*winner);
                }
                continue;
            }

            let Some(name) = element.value().attr("name") else {
                continue;
            };
            if !element.value().attr("type").unwrap_or("text").eq_ignore_ascii_case("text") {
                continue;
            }
            text_inputs.push(name.to_string());
            let numeric = element
                .value()
                .attr("value")
                .is_some_and(|v| v.trim().parse::<f64>().is_ok());
            // A stale fixture can leave a row with neither team tipped; skip it.
            if let (true, Some(winner)) = (numeric, predicted_winner)
                && let Some(value) = winners.get(winner)
            {
                form.set(name, value);
            }
        }
    }

    let empty = text_inputs
        .iter()
        .filter(|name| form.get(name).is_some_and(|v| EMPTY_PREDICTION_VALUES.contains(&v.trim())))
        .count();
    if empty > 0 {
        return Err(TipError::EmptyPredictions {
            count: empty,
            url: url.to_string(),
        });
    }
    Ok(form)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonashCompetition {
    Normal,
    Info,
}

impl MonashCompetition {
    pub fn option_value(self) -> &'static str {
        match self {
            MonashCompetition::Normal => "normal",
            MonashCompetition::Info => "info",
        }
    }

    pub fn prediction_kind(self) -> PredictionKind {
        match self {
            MonashCompetition::Normal => PredictionKind::Margin,
            MonashCompetition::Info => PredictionKind::WinProbability,
        }
    }
}

/// Submits tips to the Monash probabilistic footy tipping competitions.
pub struct MonashSubmitter {
    competitions: Vec<MonashCompetition>,
    credentials: Credentials,
    client: Client,
    names: NameTables,
    tips_url: String,
}

impl MonashSubmitter {
    pub fn new(credentials: Credentials, names: NameTables, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            competitions: vec![MonashCompetition::Normal, MonashCompetition::Info],
            credentials,
            client: session_client(timeout_secs)?,
            names,
            tips_url: MONASH_TIPS_URL.to_string(),
        })
    }

    pub fn with_competitions(mut self, competitions: Vec<MonashCompetition>) -> Self {
        self.competitions = competitions;
        self
    }

    fn submit_competition(&self, competition: MonashCompetition, tips: &[Tip]) -> Result<()> {
        // Posting tips doesn't redirect back to the login page, so start fresh each time.
        let login_page = self.fetch(&self.tips_url)?;
        let login = fill_login_form(
            &login_page,
            &self.tips_url,
            &self.credentials,
            competition.option_value(),
        )?;
        let (tips_url, tips_page) = self.post(&self.tips_url, &login)?;
        check_login(&tips_page, competition.option_value())?;

        let kind = competition.prediction_kind();
        let form = fill_tip_form(&tips_page, &tips_url, tips, kind, &self.names)?;
        self.post(&tips_url, &form)?;
        Ok(())
    }

    fn fetch(&self, url: &str) -> Result<String> {
        self.client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("fetch {url}"))?
            .text()
            .context("read monash page")
    }

    fn post(&self, page_url: &str, form: &HtmlForm) -> Result<(String, String)> {
        let base = Url::parse(page_url).with_context(|| format!("parse url {page_url}"))?;
        let target = base
            .join(&form.action)
            .with_context(|| format!("resolve form action {}", form.action))?;
        let request = if form.method == "post" {
            self.client.post(target.clone()).form(&form.fields)
        } else {
            self.client.get(target.clone()).query(&form.fields)
        };
        let response = request
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("submit form to {target}"))?;
        let url = response.url().to_string();
        let body = response.text().context("read monash response")?;
        Ok((url, body))
    }
}

impl TipSubmitter for MonashSubmitter {
    fn name(&self) -> &str {
        "monash"
    }

    fn submit_tips(&self, predictions: &[MatchPrediction]) -> Result<()> {
        info!("Submitting tips to probabilistic-footy.monash.edu...");
        for competition in &self.competitions {
            let tips = tips_for(predictions, competition.prediction_kind());
            self.submit_competition(*competition, &tips)
                .with_context(|| format!("monash {} competition", competition.option_value()))?;
            info!("{} tips submitted!", competition.option_value());
        }
        Ok(())
    }
}

/// Submits margin tips to footytips.com.au through a Splash rendering service.
pub struct FootyTipsSubmitter {
    splash_url: String,
    credentials: Credentials,
    client: &'static Client,
    names: NameTables,
}

impl FootyTipsSubmitter {
    pub fn new(
        splash_url: &str,
        credentials: Credentials,
        names: NameTables,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            splash_url: splash_url.trim_end_matches('/').to_string(),
            credentials,
            client: http_client(timeout_secs)?,
            names,
        })
    }

    /// Site team name to whole-number margin, winners only.
    pub fn predicted_margins(&self, predictions: &[MatchPrediction]) -> BTreeMap<String, i64> {
        tips_for(predictions, PredictionKind::Margin)
            .into_iter()
            .map(|tip| {
                let team = self.names.site_team_name(TipSite::FootyTips, &tip.winner).to_string();
                (team, tip.value.round() as i64)
            })
            .collect()
    }

    pub fn payload(&self, predictions: &[MatchPrediction]) -> serde_json::Value {
        json!({
            "lua_source": FOOTY_TIPS_LUA,
            "url": FOOTY_TIPS_FORM_URL,
            "username": self.credentials.username,
            "password": self.credentials.password,
            "predictions": self.predicted_margins(predictions),
            "team_translations": self.names.site_team_translations(TipSite::FootyTips),
        })
    }
}

/// Splash answers non-2xx when the script errors; errors it flags as warnings are
/// logged instead of failing the submission.
pub fn check_splash_response(status: u16, body: &str) -> Result<(), TipError> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    if body.contains("WARNING") {
        warn!("{body}");
        return Ok(());
    }
    Err(TipError::Rejected {
        status,
        body: body.to_string(),
    })
}

impl TipSubmitter for FootyTipsSubmitter {
    fn name(&self) -> &str {
        "footytips"
    }

    fn submit_tips(&self, predictions: &[MatchPrediction]) -> Result<()> {
        info!("Submitting tips to footytips.com.au...");
        let url = format!("{}/execute", self.splash_url);
        let response = self
            .client
            .post(&url)
            .json(&self.payload(predictions))
            .send()
            .with_context(|| format!("post to {url}"))?;
        let status = response.status().as_u16();
        let body = response.text().context("read splash response")?;
        check_splash_response(status, &body)?;
        info!("Tips submitted!");
        Ok(())
    }
}

/// The earliest round with a match after `now`, and that round's fixture rows. An
/// empty fixture, or one whose last match has already started, gives nothing to tip.
pub fn select_upcoming_matches(
    fixture: &DataFrame,
    now: DateTime<Tz>,
) -> PipelineResult<Option<(i32, DataFrame)>> {
    if frame::is_blank(fixture) {
        warn!(
            "Fixture for the upcoming round hasn't been posted yet, so there's nothing to tip. \
             Try again later."
        );
        return Ok(None);
    }
    frame::require_columns(fixture, &["date", "round_number"])?;
    let dates = frame::datetimes(fixture, "date")?;
    let rounds = frame::ints(fixture, "round_number")?;

    let latest = dates.iter().flatten().max();
    match latest {
        Some(latest) if *latest > now => {}
        latest => {
            let latest = latest.map(|d| d.to_rfc3339()).unwrap_or_else(|| "none".to_string());
            warn!("No matches found after {now}. The latest match found is at {latest}");
            return Ok(None);
        }
    }

    let Some(round) = dates
        .iter()
        .zip(&rounds)
        .filter(|(date, _)| date.is_some_and(|d| d > now))
        .filter_map(|(_, round)| *round)
        .min()
    else {
        return Ok(None);
    };
    let in_round: Vec<bool> = rounds.iter().map(|r| *r == Some(round)).collect();
    let matches = frame::filter_rows(fixture, &in_round)?;
    Ok(Some((round as i32, matches)))
}

/// Runs the tipping flow against the modeling service, the store and the submitters.
pub struct Tipper {
    importer: Box<dyn DataImporter>,
    submitters: Vec<Box<dyn TipSubmitter>>,
    conn: Connection,
    names: NameTables,
    ml_models: Vec<String>,
    now: DateTime<Tz>,
    upcoming: Option<(i32, i32)>,
}

impl Tipper {
    pub fn new(
        importer: Box<dyn DataImporter>,
        submitters: Vec<Box<dyn TipSubmitter>>,
        conn: Connection,
        names: NameTables,
        ml_models: Vec<String>,
    ) -> Self {
        Self {
            importer,
            submitters,
            conn,
            names,
            ml_models,
            now: now_melbourne(),
            upcoming: None,
        }
    }

    pub fn at(mut self, now: DateTime<Tz>) -> Self {
        self.now = now;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// `(year, round_number)` of the round predictions were last fetched for.
    pub fn upcoming_round(&self) -> Option<(i32, i32)> {
        self.upcoming
    }

    /// Stores the matches of the next round. Returns that round, if there is one.
    pub fn fetch_upcoming_fixture(&mut self) -> Result<Option<i32>> {
        let year = self.now.year();
        info!("Fetching fixture for {year}...");
        let fixture = self.importer.fetch_fixture_data(year_start(year)?, year_end(year)?)?;

        let Some((round, matches)) = select_upcoming_matches(&fixture, self.now)? else {
            return Ok(None);
        };

        let teams = self.names.data_config().team_names;
        store::ensure_teams(&self.conn, teams.iter().map(String::as_str))?;
        let unplayed = store::count_unplayed_matches(&self.conn, self.now)?;
        if unplayed > 0 {
            info!("{unplayed} unplayed match records found for round {round}");
        }
        let created = store::create_matches_from_fixture(&mut self.conn, &matches)?;
        info!("Saved {created} team matches for round {round}, {year}");
        Ok(Some(round))
    }

    /// Fetches predictions for the round of the next match and stores them.
    pub fn update_match_predictions(&mut self) -> Result<Vec<MatchPrediction>> {
        let fixture = self
            .importer
            .fetch_fixture_data(self.now, year_end(self.now.year())?)?;
        let next_match = if frame::is_blank(&fixture) {
            None
        } else {
            let dates = frame::datetimes(&fixture, "date")?;
            let rounds = frame::ints(&fixture, "round_number")?;
            let years = if frame::has_column(&fixture, "year") {
                frame::ints(&fixture, "year")?
            } else {
                vec![None; fixture.height()]
            };
            (0..fixture.height())
                .filter_map(|row| {
                    let date = dates[row]?;
                    let round = rounds[row]?;
                    let year = years[row].unwrap_or(i64::from(date.year()));
                    Some((date, year as i32, round as i32))
                })
                .min()
        };
        let Some((_, year, round)) = next_match else {
            info!("There are no upcoming matches to predict.");
            return Ok(Vec::new());
        };

        info!("Fetching predictions for round {round}, {year}...");
        let rows = self
            .importer
            .fetch_prediction_data((year, year + 1), Some(round), &self.ml_models)?;
        info!("Predictions received!");

        let predictions = team_predictions_to_matches(&rows);
        for prediction in &predictions {
            store::upsert_prediction(&self.conn, prediction)?;
        }
        self.upcoming = Some((year, round));
        info!("Saved {} match predictions", predictions.len());
        Ok(predictions)
    }

    /// Sends the stored predictions for the upcoming round to every submitter.
    pub fn submit_tips(&mut self) -> Result<usize> {
        let Some((year, round)) = self.upcoming else {
            info!("No predictions found for the upcoming round. Not submitting any tips.");
            return Ok(0);
        };
        let predictions = store::load_round_predictions(&self.conn, year, round)?;
        if predictions.is_empty() {
            info!("No predictions found for the upcoming round. Not submitting any tips.");
            return Ok(0);
        }
        let predictions = order_by_model(predictions, &self.ml_models);

        for submitter in &self.submitters {
            submitter
                .submit_tips(&predictions)
                .with_context(|| format!("submit tips to {}", submitter.name()))?;
        }
        Ok(self.submitters.len())
    }

    /// Records this season's results for stored matches.
    pub fn update_match_results(&mut self) -> Result<usize> {
        let year = self.now.year();
        let results = self
            .importer
            .fetch_match_results_data(year_start(year)?, year_end(year)?, true)?;
        store::update_match_results(&mut self.conn, &results, self.now)
    }
}

/// The tipping run as jobs. Results are recorded by their own tipper, so a stuck
/// results fetch can't hold up the fixture, prediction and submission chain, which
/// shares the other tipper in that order.
pub fn tipping_queue(results: Tipper, tipper: Tipper, timeout: Duration) -> JobQueue {
    let mut results = results;
    let mut queue = JobQueue::new();
    queue.push(
        Job::new("update-results", move || {
            let updated = results.update_match_results()?;
            info!("{updated} match results recorded");
            Ok(())
        })
        .timeout(timeout),
    );

    let tipper = Arc::new(Mutex::new(tipper));
    let shared = Arc::clone(&tipper);
    queue.push(
        Job::new("fetch-fixture", move || {
            lock(&shared)?.fetch_upcoming_fixture()?;
            Ok(())
        })
        .timeout(timeout),
    );
    let shared = Arc::clone(&tipper);
    queue.push(
        Job::new("update-predictions", move || {
            lock(&shared)?.update_match_predictions()?;
            Ok(())
        })
        .depends_on("fetch-fixture")
        .timeout(timeout),
    );
    queue.push(
        Job::new("submit-tips", move || {
            let submitted = lock(&tipper)?.submit_tips()?;
            info!("tips sent to {submitted} competitions");
            Ok(())
        })
        .depends_on("update-predictions")
        .timeout(timeout),
    );
    queue
}

fn lock(tipper: &Mutex<Tipper>) -> Result<MutexGuard<'_, Tipper>> {
    tipper
        .lock()
        .map_err(|_| anyhow!("an earlier job panicked while holding the tipper"))
}

fn year_start(year: i32) -> Result<DateTime<Tz>> {
    start_of_year(year).ok_or_else(|| anyhow!("no start of year for {year}"))
}

fn year_end(year: i32) -> Result<DateTime<Tz>> {
    end_of_year(year).ok_or_else(|| anyhow!("no end of year for {year}"))
}
