use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;

use afl_tipping::config::{self, AppConfig};
use afl_tipping::jobs::{self, JOB_TIMEOUT_SECS};
use afl_tipping::names::NameTables;
use afl_tipping::service::ModelingService;
use afl_tipping::store;
use afl_tipping::tipping::{self, FootyTipsSubmitter, MonashSubmitter, TipSubmitter, Tipper};

fn main() -> Result<()> {
    config::load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env();
    let db_path = parse_db_path_arg().unwrap_or_else(|| config.db_path.clone());
    info!("using db {}", db_path.display());

    let names = NameTables::builtin();
    let submitters = build_submitters(&config, &names)?;
    // Each tipper gets its own connection and service client.
    let results = build_tipper(&config, &db_path, &names, Vec::new())?;
    let tipper = build_tipper(&config, &db_path, &names, submitters)?;

    let queue = tipping::tipping_queue(results, tipper, Duration::from_secs(JOB_TIMEOUT_SECS));
    let reports = queue.run()?;
    jobs::first_failure(&reports, JOB_TIMEOUT_SECS).context("tipping run failed")
}

fn build_tipper(
    config: &AppConfig,
    db_path: &Path,
    names: &NameTables,
    submitters: Vec<Box<dyn TipSubmitter>>,
) -> Result<Tipper> {
    let conn = store::open_db(db_path)?;
    let service = ModelingService::from_config(config)?;
    info!("modeling service at {}", service.base_url());
    Ok(Tipper::new(
        Box::new(service),
        submitters,
        conn,
        names.clone(),
        config.ml_models.clone(),
    ))
}

fn build_submitters(config: &AppConfig, names: &NameTables) -> Result<Vec<Box<dyn TipSubmitter>>> {
    if !config.production {
        info!("TIPPING_ENV is not production; tips will not be submitted");
        return Ok(Vec::new());
    }

    let mut submitters: Vec<Box<dyn TipSubmitter>> = Vec::new();
    match &config.monash {
        Some(credentials) => submitters.push(Box::new(MonashSubmitter::new(
            credentials.clone(),
            names.clone(),
            config.http_timeout_secs,
        )?)),
        None => info!("MONASH_USERNAME/MONASH_PASSWORD not set; skipping monash"),
    }
    match &config.footy_tips {
        Some(credentials) => submitters.push(Box::new(FootyTipsSubmitter::new(
            &config.splash_url,
            credentials.clone(),
            names.clone(),
            config.http_timeout_secs,
        )?)),
        None => info!("FOOTY_TIPS_USERNAME/FOOTY_TIPS_PASSWORD not set; skipping footytips"),
    }
    Ok(submitters)
}

fn parse_db_path_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix("--db=") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == "--db" {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            let trimmed = next.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
    }
    None
}
