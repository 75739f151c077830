use std::collections::HashSet;

use chrono::{TimeZone, Timelike};
use polars::prelude::DataFrame;
use serde_json::{Value, json};

use afl_tipping::cleaning::Cleaner;
use afl_tipping::dates::MELBOURNE;
use afl_tipping::frame;
use afl_tipping::names::NameTables;
use afl_tipping::reconcile::{clean_roster_data, next_round_fixture};

// 2019-03-21 as days since 1970-01-01.
const OPENING_DAY: i64 = 17_976;

#[allow(clippy::too_many_arguments)]
fn raw_match(
    game: i64,
    day: i64,
    season: i64,
    round: i64,
    home: &str,
    away: &str,
    hp: i64,
    ap: i64,
) -> Value {
    json!({
        "game": game,
        "date": day,
        "season": season,
        "round": format!("R{round}"),
        "round_number": round,
        "venue": "M.C.G.",
        "home_team": home,
        "away_team": away,
        "home_points": hp,
        "away_points": ap,
    })
}

fn raw_match_rows() -> Vec<Value> {
    vec![
        raw_match(15_001, OPENING_DAY, 2019, 1, "Carlton", "Richmond", 64, 97),
        raw_match(15_002, OPENING_DAY + 1, 2019, 1, "Collingwood", "Geelong", 67, 93),
        raw_match(15_010, OPENING_DAY + 7, 2019, 2, "Richmond", "Collingwood", 72, 116),
        raw_match(15_011, OPENING_DAY + 8, 2019, 2, "Geelong", "Melbourne", 106, 74),
    ]
}

fn frame_of(rows: &[Value]) -> DataFrame {
    frame::from_json_rows(rows).unwrap()
}

fn raw_matches() -> DataFrame {
    frame_of(&raw_match_rows())
}

fn names() -> NameTables {
    NameTables::builtin()
}

fn cleaner(names: &NameTables) -> Cleaner<'_> {
    Cleaner::new(names).at(MELBOURNE.with_ymd_and_hms(2019, 4, 1, 12, 0, 0).unwrap())
}

fn ints(df: &DataFrame, name: &str) -> Vec<Option<i64>> {
    frame::ints(df, name).unwrap()
}

fn strs(df: &DataFrame, name: &str) -> Vec<Option<String>> {
    frame::strs(df, name).unwrap()
}

fn row_where(df: &DataFrame, name: &str, value: &str) -> usize {
    strs(df, name)
        .iter()
        .position(|v| v.as_deref() == Some(value))
        .unwrap()
}

#[test]
fn away_margin_mirrors_home_margin() {
    let names = names();
    let cleaned = cleaner(&names).clean_match_data(&raw_matches(), None).unwrap();
    assert_eq!(cleaned.height(), 4);
    let home = ints(&cleaned, "home_margin");
    let away = ints(&cleaned, "away_margin");
    for (home, away) in home.iter().zip(&away) {
        assert_eq!(*away, home.map(|h| -h));
    }
    assert_eq!(home[0], Some(-33));
}

#[test]
fn raw_columns_are_renamed_and_round_label_dropped() {
    let names = names();
    let cleaned = cleaner(&names).clean_match_data(&raw_matches(), None).unwrap();
    for col in ["home_score", "away_score", "year", "match_id", "home_margin"] {
        assert!(frame::has_column(&cleaned, col), "missing {col}");
    }
    assert!(!frame::has_column(&cleaned, "round"));
    assert!(!frame::has_column(&cleaned, "season"));
    assert_eq!(strs(&cleaned, "match_id")[0].as_deref(), Some("15001"));
    assert!(frame::datetimes(&cleaned, "date").unwrap()[0].is_some());
}

#[test]
fn duplicate_keys_keep_the_later_dated_row() {
    let mut rows = vec![
        raw_match(15_100, OPENING_DAY + 190, 2019, 25, "Richmond", "GWS", 80, 80),
        raw_match(15_101, OPENING_DAY + 197, 2019, 25, "Richmond", "GWS", 114, 25),
    ];
    // Out of date order in the extract.
    rows.reverse();
    let names = names();
    let cleaned = cleaner(&names).clean_match_data(&frame_of(&rows), None).unwrap();
    assert_eq!(cleaned.height(), 1);
    assert_eq!(ints(&cleaned, "home_score"), vec![Some(114)]);
    assert_eq!(strs(&cleaned, "match_id"), vec![Some("15101".to_string())]);
}

#[test]
fn match_keys_are_unique_after_cleaning() {
    let mut rows = raw_match_rows();
    rows.push(raw_match(15_003, OPENING_DAY + 2, 2019, 1, "Carlton", "Richmond", 70, 71));
    let names = names();
    let cleaned = cleaner(&names).clean_match_data(&frame_of(&rows), None).unwrap();

    let years = ints(&cleaned, "year");
    let rounds = ints(&cleaned, "round_number");
    let home = strs(&cleaned, "home_team");
    let away = strs(&cleaned, "away_team");
    let keys: HashSet<_> = (0..cleaned.height())
        .map(|row| (years[row], rounds[row], home[row].clone(), away[row].clone()))
        .collect();
    assert_eq!(keys.len(), cleaned.height());
    assert_eq!(cleaned.height(), 4);
}

#[test]
fn anomalous_early_rounds_are_removed() {
    let mut rows = raw_match_rows();
    rows.push(raw_match(200, -26_380, 1897, 15, "Essendon", "Geelong", 40, 38));
    rows.push(raw_match(201, -26_380, 1897, 14, "Essendon", "Melbourne", 40, 30));
    let names = names();
    let cleaned = cleaner(&names).clean_match_data(&frame_of(&rows), None).unwrap();

    let years = ints(&cleaned, "year");
    let rounds = ints(&cleaned, "round_number");
    let keys: Vec<_> = years.into_iter().zip(rounds).collect();
    assert!(!keys.contains(&(Some(1897), Some(15))));
    assert!(keys.contains(&(Some(1897), Some(14))));
}

#[test]
fn cleaning_cleaned_data_changes_nothing() {
    let names = names();
    let cleaner = cleaner(&names);
    let once = cleaner.clean_match_data(&raw_matches(), None).unwrap();
    let twice = cleaner.clean_match_data(&once, None).unwrap();
    assert!(once.equals_missing(&twice));
}

#[test]
fn uncoercible_years_name_the_column() {
    let mut rows = raw_match_rows();
    rows[0]["season"] = json!("twenty nineteen");
    let names = names();
    let err = cleaner(&names)
        .clean_match_data(&frame_of(&rows), None)
        .unwrap_err();
    assert!(err.to_string().contains("year"));
}

fn fixture() -> DataFrame {
    frame_of(&[
        json!({"date": "2019-04-04T19:25:00+11:00", "season": 2019, "round": 3,
               "round_label": "Round 3", "venue": "Marvel Stadium",
               "home_team": "Melbourne", "away_team": "Richmond"}),
        json!({"date": "2019-04-11T19:25:00+10:00", "season": 2019, "round": 4,
               "round_label": "Round 4", "venue": "MCG",
               "home_team": "Carlton", "away_team": "Geelong"}),
    ])
}

#[test]
fn next_fixture_round_is_appended() {
    let names = names();
    let cleaned = cleaner(&names)
        .clean_match_data(&raw_matches(), Some(&fixture()))
        .unwrap();
    assert_eq!(cleaned.height(), 5);
    let last = cleaned.height() - 1;
    assert_eq!(ints(&cleaned, "round_number")[last], Some(3));
    assert_eq!(strs(&cleaned, "venue")[last].as_deref(), Some("Docklands"));
    assert_eq!(strs(&cleaned, "round_type")[last].as_deref(), Some("Regular"));
    // Scores of the unplayed match are filled with zero.
    assert_eq!(ints(&cleaned, "home_score")[last], Some(0));
}

#[test]
fn fully_played_fixture_adds_nothing() {
    let names = names();
    let later = Cleaner::new(&names).at(MELBOURNE.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());

    let upcoming = next_round_fixture(&fixture(), later.now(), &names).unwrap();
    assert_eq!(upcoming.height(), 0);

    let cleaned = later
        .clean_match_data(&raw_matches(), Some(&fixture()))
        .unwrap();
    assert_eq!(cleaned.height(), 4);
    let match_ids: Vec<Option<String>> = strs(&cleaned, "match_id");
    assert_eq!(match_ids[0].as_deref(), Some("15001"));
    assert!(match_ids.iter().all(|id| id.as_deref() != Some("0")));
}

#[test]
fn betting_data_gets_canonical_teams_and_melbourne_dates() {
    let betting = frame_of(&[json!({
        "date": "2019-03-23 19:25:00", "season": 2019, "round": 1, "round_label": "Round 1",
        "venue": "Gabba", "home_team": "Brisbane Lions", "away_team": "GWS Giants",
        "home_score": 70, "away_score": 90, "home_margin": -20, "away_margin": 20,
        "home_win_odds": 2.1, "away_win_odds": 1.75, "home_win_paid": 0.0, "away_win_paid": 1.75,
        "home_line_odds": 6.5, "away_line_odds": -6.5, "home_line_paid": 0.0,
        "away_line_paid": 1.9,
    })]);
    let names = names();
    let cleaned = cleaner(&names).clean_betting_data(&betting).unwrap();

    assert_eq!(strs(&cleaned, "home_team")[0].as_deref(), Some("Brisbane"));
    assert_eq!(strs(&cleaned, "away_team")[0].as_deref(), Some("GWS"));
    assert_eq!(ints(&cleaned, "year"), vec![Some(2019)]);
    assert_eq!(ints(&cleaned, "round_number"), vec![Some(1)]);
    for dropped in [
        "home_win_paid",
        "away_line_paid",
        "venue",
        "round_label",
        "home_margin",
        "away_margin",
    ] {
        assert!(!frame::has_column(&cleaned, dropped), "{dropped} kept");
    }
    assert!(frame::has_column(&cleaned, "home_win_odds"));

    let date = frame::datetimes(&cleaned, "date").unwrap()[0].unwrap();
    assert_eq!(date.timezone(), MELBOURNE);
    assert_eq!(date.hour(), 19);
}

fn raw_players() -> DataFrame {
    let player = |id: i64, first: &str, last: &str, day: i64, kicks: i64, votes: Value| {
        json!({
            "id": id,
            "first_name": first,
            "surname": last,
            "date": day,
            "season": 2019,
            "round": "R1",
            "venue": "M.C.G. ",
            "kicks": kicks,
            "brownlow_votes": votes,
            "umpire_1": "Ray Chamberlain",
            "jumper_no_": 17,
        })
    };
    frame_of(&[
        player(12_031, "Dustin", "Martin", OPENING_DAY, 18, json!(2)),
        player(11_558, "Patrick", "Cripps", OPENING_DAY, 9, Value::Null),
        player(12_031, "Dustin", "Martin", OPENING_DAY, 18, json!(2)),
        player(11_960, "Scott", "Pendlebury", OPENING_DAY + 1, 15, json!(0)),
    ])
}

#[test]
fn player_ids_combine_year_match_and_player() {
    let names = names();
    let cleaned = cleaner(&names)
        .clean_player_data(&raw_players(), &raw_matches(), None)
        .unwrap();
    assert_eq!(cleaned.height(), 3);

    let years = strs(&cleaned, "year");
    let match_ids = strs(&cleaned, "match_id");
    let player_ids = strs(&cleaned, "player_id");
    let ids = strs(&cleaned, "id");
    let mut seen = HashSet::new();
    for row in 0..cleaned.height() {
        let expected = format!(
            "{}.{}.{}",
            years[row].as_deref().unwrap(),
            match_ids[row].as_deref().unwrap(),
            player_ids[row].as_deref().unwrap()
        );
        assert_eq!(ids[row].as_deref(), Some(expected.as_str()));
        assert!(seen.insert(expected));
    }
    assert!(seen.contains("2019.15001.12031"));
    assert!(seen.contains("2019.15002.11960"));

    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[test]
fn player_data_gets_round_from_matches_and_zero_brownlow_votes() {
    let names = names();
    let cleaned = cleaner(&names)
        .clean_player_data(&raw_players(), &raw_matches(), None)
        .unwrap();
    assert!(!frame::has_column(&cleaned, "venue"));
    assert!(!frame::has_column(&cleaned, "umpire_1"));
    let cripps = row_where(&cleaned, "player_name", "Patrick Cripps");
    assert_eq!(ints(&cleaned, "brownlow_votes")[cripps], Some(0));
    assert_eq!(ints(&cleaned, "round_number")[cripps], Some(1));
}

#[test]
fn rosters_are_appended_to_player_data() {
    let roster = frame_of(&[
        json!({"player_name": "Dustin Martin", "team": "Richmond", "match_id": "15020",
               "date": "2019-04-04T19:25:00+11:00"}),
        json!({"player_name": "Sam Walsh", "team": "Carlton", "match_id": "15021",
               "date": "2019-04-04T19:25:00+11:00"}),
    ]);
    let names = names();
    let cleaned = cleaner(&names)
        .clean_player_data(&raw_players(), &raw_matches(), Some(&roster))
        .unwrap();
    assert_eq!(cleaned.height(), 5);

    let ids = strs(&cleaned, "id");
    assert!(ids.contains(&Some("2019.15020.12031".to_string())));
    assert!(ids.contains(&Some("2019.15021.Sam Walsh".to_string())));

    let walsh = row_where(&cleaned, "id", "2019.15021.Sam Walsh");
    assert_eq!(ints(&cleaned, "kicks")[walsh], Some(0));
    assert_eq!(ints(&cleaned, "brownlow_votes")[walsh], Some(0));
    assert_eq!(ints(&cleaned, "year")[walsh], Some(2019));
    assert_eq!(cleaned.column("id").unwrap().null_count(), 0);
}

#[test]
fn empty_roster_has_an_empty_player_id_column() {
    let roster = frame::empty_frame(&["player_name", "team", "date"]).unwrap();
    let cleaned = clean_roster_data(&DataFrame::empty(), &roster, 2019).unwrap();
    assert_eq!(cleaned.height(), 0);
    assert!(frame::has_column(&cleaned, "player_id"));
}

#[test]
fn roster_names_resolve_to_the_latest_player_id() {
    let player = frame_of(&[
        json!({"player_name": "Josh Kennedy", "player_id": "1105"}),
        json!({"player_name": "Josh Kennedy", "player_id": "11952"}),
        json!({"player_name": "Dustin Martin", "player_id": "12031"}),
    ]);
    let roster = frame_of(&[
        json!({"player_name": "Josh Kennedy", "team": "Sydney", "match_id": "16001",
               "date": "2020-03-19T19:40:00+11:00"}),
        json!({"player_name": "Sam Walsh", "team": "Carlton", "match_id": "16002",
               "date": "2020-03-19T19:40:00+11:00"}),
    ]);
    let cleaned = clean_roster_data(&player, &roster, 2020).unwrap();
    assert_eq!(cleaned.height(), 2);

    let kennedy = row_where(&cleaned, "player_name", "Josh Kennedy");
    let walsh = row_where(&cleaned, "player_name", "Sam Walsh");
    let player_ids = strs(&cleaned, "player_id");
    assert_eq!(player_ids[kennedy].as_deref(), Some("11952"));
    assert_eq!(player_ids[walsh].as_deref(), Some("Sam Walsh"));
    assert_eq!(strs(&cleaned, "id")[walsh].as_deref(), Some("2020.16002.Sam Walsh"));
    assert_eq!(ints(&cleaned, "year")[kennedy], Some(2020));
}
