use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use log::info;
use polars::prelude::*;
use serde_json::Value;

use afl_tipping::cleaning::{Cleaner, MATCH_KEY};
use afl_tipping::config;
use afl_tipping::feature_builder::FeatureBuilder;
use afl_tipping::joined::clean_joined_data;
use afl_tipping::names::NameTables;
use afl_tipping::pivot::match_to_team_matches;
use afl_tipping::frame;

fn main() -> Result<()> {
    config::load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches_path =
        parse_path_arg("--matches").ok_or_else(|| anyhow!("--matches <path> is required"))?;
    let out_path = parse_path_arg("--out").unwrap_or_else(|| PathBuf::from("team_matches.json"));

    let names = NameTables::builtin();
    let cleaner = Cleaner::new(&names);

    let raw_matches = read_rows(&matches_path)?;
    let fixture = parse_path_arg("--fixture").map(|p| read_rows(&p)).transpose()?;
    let match_data = cleaner
        .clean_match_data(&raw_matches, fixture.as_ref())
        .context("clean match data")?;
    info!("cleaned {} matches", match_data.height());

    let mut frames = vec![match_data];
    if let Some(path) = parse_path_arg("--betting") {
        let betting = cleaner
            .clean_betting_data(&read_rows(&path)?)
            .context("clean betting data")?;
        info!("cleaned {} betting rows", betting.height());
        frames.push(betting);
    }
    let joined = clean_joined_data(frames, MATCH_KEY).context("join match sources")?;

    let team_matches = match_to_team_matches(&joined)?;
    let builder = FeatureBuilder::default();
    info!("building features {:?}", builder.feature_names());
    let mut features = builder
        .transform(&team_matches)
        .context("build team match features")?;
    write_rows(&out_path, &mut features)?;
    info!("wrote {} team matches to {}", features.height(), out_path.display());

    if let Some(players_path) = parse_path_arg("--players") {
        let roster = parse_path_arg("--roster").map(|p| read_rows(&p)).transpose()?;
        let mut players = cleaner
            .clean_player_data(&read_rows(&players_path)?, &raw_matches, roster.as_ref())
            .context("clean player data")?;
        let players_out = parse_path_arg("--players-out")
            .unwrap_or_else(|| PathBuf::from("player_matches.json"));
        write_rows(&players_out, &mut players)?;
        info!("wrote {} player rows to {}", players.height(), players_out.display());
    }

    Ok(())
}

/// Extracts are either a bare array of row objects or wrapped as `{"data": [...]}`.
fn read_rows(path: &Path) -> Result<DataFrame> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&raw).with_context(|| format!("parse json {}", path.display()))?;
    let rows = value
        .get("data")
        .unwrap_or(&value)
        .as_array()
        .ok_or_else(|| anyhow!("{} is not an array of rows", path.display()))?;
    frame::from_json_rows(rows).with_context(|| format!("load rows {}", path.display()))
}

fn write_rows(path: &Path, df: &mut DataFrame) -> Result<()> {
    let mut file =
        fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    JsonWriter::new(&mut file)
        .with_json_format(JsonFormat::Json)
        .finish(df)
        .with_context(|| format!("write {}", path.display()))
}

fn parse_path_arg(flag: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{flag}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&prefix) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == flag {
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
