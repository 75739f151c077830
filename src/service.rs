//! Client for the modeling service, which serves fixtures, match results and model
//! predictions as `{"data": [...]}` JSON.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat};
use chrono_tz::Tz;
use log::debug;
use polars::prelude::DataFrame;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::AppConfig;
use crate::dates::parse_dates;
use crate::frame;
use crate::http_client::http_client;
use crate::names::DataConfig;
use crate::pivot::TeamPrediction;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Bad response from application: {status} / {headers} / {body}")]
    BadStatus {
        url: String,
        status: u16,
        headers: String,
        body: String,
    },
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid json from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlModelInfo {
    pub name: String,
    #[serde(default)]
    pub prediction_type: Option<String>,
    #[serde(default)]
    pub trained_to: Option<i32>,
    #[serde(default)]
    pub is_principal: bool,
    #[serde(default)]
    pub used_in_competitions: bool,
}

/// The data the tipping flow reads from the modeling service.
pub trait DataImporter: Send {
    fn fetch_fixture_data(&self, start: DateTime<Tz>, end: DateTime<Tz>) -> Result<DataFrame>;

    fn fetch_match_results_data(
        &self,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
        fetch_data: bool,
    ) -> Result<DataFrame>;

    /// `year_range` is min inclusive, max exclusive.
    fn fetch_prediction_data(
        &self,
        year_range: (i32, i32),
        round_number: Option<i32>,
        ml_models: &[String],
    ) -> Result<Vec<TeamPrediction>>;
}

pub struct ModelingService {
    base_url: String,
    client: &'static Client,
}

impl ModelingService {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(timeout_secs)?,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(&config.service_url, config.http_timeout_secs)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn fetch_ml_models(&self) -> Result<Vec<MlModelInfo>> {
        let data = self.fetch_data("ml_models", &[])?;
        serde_json::from_value(data).context("decode ml_models")
    }

    pub fn fetch_data_config(&self) -> Result<DataConfig> {
        let data = self.fetch_data("data_config", &[])?;
        serde_json::from_value(data).context("decode data_config")
    }

    fn fetch_data(&self, path: &str, params: &[(&str, String)]) -> Result<Value, ServiceError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("GET {url} {params:?}");
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .map_err(|source| ServiceError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        let headers = format!("{:?}", response.headers());
        let body = response.text().map_err(|source| ServiceError::Request {
            url: url.clone(),
            source,
        })?;
        if status != StatusCode::OK {
            return Err(ServiceError::BadStatus {
                url,
                status: status.as_u16(),
                headers,
                body,
            });
        }
        parse_data_payload(&url, &body)
    }
}

impl DataImporter for ModelingService {
    fn fetch_fixture_data(&self, start: DateTime<Tz>, end: DateTime<Tz>) -> Result<DataFrame> {
        let data = self.fetch_data(
            "fixtures",
            &[("start_date", date_param(start)), ("end_date", date_param(end))],
        )?;
        rows_to_frame(&data).context("parse fixture dates")
    }

    fn fetch_match_results_data(
        &self,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
        fetch_data: bool,
    ) -> Result<DataFrame> {
        let data = self.fetch_data(
            "match_results",
            &[
                ("start_date", date_param(start)),
                ("end_date", date_param(end)),
                ("fetch_data", fetch_data.to_string()),
            ],
        )?;
        rows_to_frame(&data).context("parse match result dates")
    }

    fn fetch_prediction_data(
        &self,
        year_range: (i32, i32),
        round_number: Option<i32>,
        ml_models: &[String],
    ) -> Result<Vec<TeamPrediction>> {
        let params = prediction_params(year_range, round_number, ml_models);
        let data = self.fetch_data("predictions", &params)?;
        serde_json::from_value(data).context("decode predictions")
    }
}

pub fn prediction_params(
    year_range: (i32, i32),
    round_number: Option<i32>,
    ml_models: &[String],
) -> Vec<(&'static str, String)> {
    let (min_year, max_year) = year_range;
    let mut params = vec![("year_range", format!("{min_year}-{max_year}"))];
    if let Some(round_number) = round_number {
        params.push(("round_number", round_number.to_string()));
    }
    if !ml_models.is_empty() {
        params.push(("ml_models", ml_models.join(",")));
    }
    params
}

/// Pulls `data` out of a service response body. A body without `data` reads as null.
pub fn parse_data_payload(url: &str, body: &str) -> Result<Value, ServiceError> {
    let value: Value = serde_json::from_str(body.trim()).map_err(|source| ServiceError::Decode {
        url: url.to_string(),
        source,
    })?;
    Ok(value.get("data").cloned().unwrap_or(Value::Null))
}

/// Row arrays become frames with `date` parsed to Melbourne time, keeping the instant
/// given by each row's offset.
pub fn rows_to_frame(data: &Value) -> Result<DataFrame> {
    let rows = data.as_array().map(Vec::as_slice).unwrap_or_default();
    let df = frame::from_json_rows(rows).context("build frame from rows")?;
    if !frame::has_column(&df, "date") {
        return Ok(df);
    }
    Ok(parse_dates(df, "date")?)
}

fn date_param(value: DateTime<Tz>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, false)
}
