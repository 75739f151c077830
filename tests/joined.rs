use polars::prelude::DataFrame;
use serde_json::json;

use afl_tipping::error::PipelineError;
use afl_tipping::frame;
use afl_tipping::joined::clean_joined_data;

const KEY: &[&str] = &["year", "round_number", "home_team", "away_team"];

fn matches() -> DataFrame {
    frame::from_json_rows(&[
        json!({"year": 2009, "round_number": 1, "home_team": "Richmond", "away_team": "Carlton",
               "date": "2009-03-26", "home_score": 83}),
        json!({"year": 2010, "round_number": 1, "home_team": "Carlton", "away_team": "Richmond",
               "date": "2010-03-25", "home_score": 120}),
        json!({"year": 2010, "round_number": 1, "home_team": "Geelong", "away_team": "Essendon",
               "date": "2010-03-26", "home_score": 98}),
    ])
    .unwrap()
}

fn betting() -> DataFrame {
    frame::from_json_rows(&[
        json!({"year": 2010, "round_number": 1, "home_team": "Carlton", "away_team": "Richmond",
               "date": null, "home_win_odds": 1.4}),
        json!({"year": 2010, "round_number": 1, "home_team": "Geelong", "away_team": "Essendon",
               "date": null, "home_win_odds": 1.2}),
    ])
    .unwrap()
}

#[test]
fn shared_columns_come_from_the_longer_frame() {
    let joined = clean_joined_data(vec![betting(), matches()], KEY).unwrap();
    assert_eq!(joined.height(), 3);
    let dates = frame::strs(&joined, "date").unwrap();
    assert!(dates.iter().all(Option::is_some));
    assert_eq!(dates[1].as_deref(), Some("2010-03-25"));
    assert_eq!(frame::floats(&joined, "home_win_odds").unwrap()[1], Some(1.4));
}

#[test]
fn keys_missing_from_the_shorter_frame_get_nulls() {
    let joined = clean_joined_data(vec![matches(), betting()], KEY).unwrap();
    assert_eq!(frame::ints(&joined, "year").unwrap()[0], Some(2009));
    assert_eq!(frame::floats(&joined, "home_win_odds").unwrap()[0], None);
    assert_eq!(
        frame::column_names(&joined),
        vec![
            "year",
            "round_number",
            "home_team",
            "away_team",
            "date",
            "home_score",
            "home_win_odds"
        ]
    );
}

#[test]
fn frames_must_carry_the_join_key() {
    let other = betting().drop("home_team").unwrap();
    let err = clean_joined_data(vec![matches(), other], KEY).unwrap_err();
    assert!(matches!(err, PipelineError::MissingJoinKey { frame: 1, .. }));
}

#[test]
fn keyless_frames_align_by_position() {
    let left = frame::from_json_rows(&[json!({"a": 1}), json!({"a": 2}), json!({"a": 3})]).unwrap();
    let right = frame::from_json_rows(&[json!({"a": 10, "b": "x"})]).unwrap();
    let joined = clean_joined_data(vec![right, left], &[]).unwrap();
    assert_eq!(joined.height(), 3);
    assert_eq!(frame::column_names(&joined), vec!["a", "b"]);
    assert_eq!(frame::ints(&joined, "a").unwrap()[0], Some(1));
    let b = frame::strs(&joined, "b").unwrap();
    assert_eq!(b[0].as_deref(), Some("x"));
    assert_eq!(b[2], None);
}
