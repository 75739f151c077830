use criterion::{Criterion, criterion_group, criterion_main};
use polars::prelude::DataFrame;
use serde_json::{Value, json};
use std::hint::black_box;

use afl_tipping::cleaning::Cleaner;
use afl_tipping::feature_builder::FeatureBuilder;
use afl_tipping::names::NameTables;
use afl_tipping::pivot::match_to_team_matches;
use afl_tipping::frame;

const TEAMS: [&str; 18] = [
    "Adelaide",
    "Brisbane",
    "Carlton",
    "Collingwood",
    "Essendon",
    "Fremantle",
    "Geelong",
    "Gold Coast",
    "GWS",
    "Hawthorn",
    "Melbourne",
    "North Melbourne",
    "Port Adelaide",
    "Richmond",
    "St Kilda",
    "Sydney",
    "West Coast",
    "Western Bulldogs",
];

// Nine matches a round, every team once, with scores that vary by pairing.
fn raw_seasons(first_year: i64, years: i64) -> DataFrame {
    let mut rows: Vec<Value> = Vec::new();
    let mut game = 0;
    for year in first_year..first_year + years {
        for round in 1..=22i64 {
            let day = (year - 1970) * 365 + 80 + round * 7;
            for k in 0..9i64 {
                let home = TEAMS[((round + k) % 18) as usize];
                let away = TEAMS[((round + 17 - k) % 18) as usize];
                game += 1;
                rows.push(json!({
                    "game": game,
                    "date": day,
                    "season": year,
                    "round": format!("R{round}"),
                    "round_number": round,
                    "venue": "M.C.G.",
                    "home_team": home,
                    "away_team": away,
                    "home_points": 60 + (game * 7) % 50,
                    "away_points": 55 + (game * 11) % 50,
                    "home_win_odds": 1.5 + (game % 5) as f64 * 0.2,
                    "away_win_odds": 2.5 - (game % 5) as f64 * 0.2,
                    "home_line_odds": (game % 7) as f64 * 3.5 - 10.5,
                    "away_line_odds": 10.5 - (game % 7) as f64 * 3.5,
                }));
            }
        }
    }
    frame::from_json_rows(&rows).unwrap()
}

fn bench_clean_match_data(c: &mut Criterion) {
    let names = NameTables::builtin();
    let raw = raw_seasons(2010, 10);
    c.bench_function("clean_match_data", |b| {
        b.iter(|| {
            let cleaned = Cleaner::new(&names)
                .clean_match_data(black_box(&raw), None)
                .unwrap();
            black_box(cleaned.height());
        })
    });
}

fn bench_feature_builder(c: &mut Criterion) {
    let names = NameTables::builtin();
    let cleaned = Cleaner::new(&names)
        .clean_match_data(&raw_seasons(2010, 10), None)
        .unwrap();
    let team_matches = match_to_team_matches(&cleaned).unwrap();
    let builder = FeatureBuilder::default();
    c.bench_function("feature_builder", |b| {
        b.iter(|| {
            let features = builder.transform(black_box(&team_matches)).unwrap();
            black_box(features.height());
        })
    });
}

criterion_group!(perf, bench_clean_match_data, bench_feature_builder);
criterion_main!(perf);
