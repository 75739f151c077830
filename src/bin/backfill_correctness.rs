use std::path::PathBuf;

use anyhow::Result;

use afl_tipping::config::{self, AppConfig};
use afl_tipping::store;

fn main() -> Result<()> {
    config::load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let db_path = parse_db_path_arg().unwrap_or_else(|| AppConfig::from_env().db_path);
    let mut conn = store::open_db(&db_path)?;
    let count = store::backfill_prediction_correctness(&mut conn)?;

    println!("Prediction correctness backfilled");
    println!("DB: {}", db_path.display());
    println!("Predictions checked: {count}");
    Ok(())
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
