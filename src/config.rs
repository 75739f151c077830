use std::env;
use std::path::PathBuf;

const DEFAULT_SERVICE_URL: &str = "http://data_science:8008";
const DEFAULT_SPLASH_URL: &str = "http://splash:8050";
const DEFAULT_DB_PATH: &str = "afl_tipping.sqlite";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub production: bool,
    pub service_url: String,
    pub db_path: PathBuf,
    /// Models whose predictions are fetched; empty means every model the service has.
    pub ml_models: Vec<String>,
    pub monash: Option<Credentials>,
    pub footy_tips: Option<Credentials>,
    pub splash_url: String,
    pub http_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let production = env::var("TIPPING_ENV")
            .map(|v| v.trim().eq_ignore_ascii_case("production"))
            .unwrap_or(false);
        // Outside production the service is always reached by its compose hostname.
        let service_url = if production {
            env_string("DATA_SCIENCE_SERVICE").unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string())
        } else {
            DEFAULT_SERVICE_URL.to_string()
        };
        let db_path = env_string("TIPPING_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
        let ml_models = env_string("ML_MODELS")
            .map(|raw| parse_list(&raw))
            .unwrap_or_default();
        let http_timeout_secs = env::var("HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS)
            .clamp(1, 600);

        Self {
            production,
            service_url: service_url.trim_end_matches('/').to_string(),
            db_path,
            ml_models,
            monash: credentials("MONASH_USERNAME", "MONASH_PASSWORD"),
            footy_tips: credentials("FOOTY_TIPS_USERNAME", "FOOTY_TIPS_PASSWORD"),
            splash_url: env_string("SPLASH_SERVICE")
                .unwrap_or_else(|| DEFAULT_SPLASH_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            http_timeout_secs,
        }
    }
}

/// Loads `.env.local` then `.env`; variables already set win.
pub fn load_dotenv() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn credentials(user_key: &str, password_key: &str) -> Option<Credentials> {
    Some(Credentials {
        username: env_string(user_key)?,
        password: env_string(password_key)?,
    })
}

pub fn parse_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in raw.split([',', ';', ' ']) {
        let part = part.trim();
        if !part.is_empty() && !out.iter().any(|p| p == part) {
            out.push(part.to_string());
        }
    }
    out
}
