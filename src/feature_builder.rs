//! Applies feature functions to team-match frames and mirrors every new feature onto
//! the opposing team's row.

use log::debug;
use polars::prelude::*;

use crate::error::{PipelineError, PipelineResult};
use crate::features;
use crate::frame;

pub const INDEX_COLS: &[&str] = &["team", "year", "round_number"];
const REQUIRED_COLS: &[&str] = &["team", "year", "round_number", "oppo_team"];

/// A named transformation that adds feature columns to a team-match frame sorted by
/// `(team, year, round_number)`.
pub trait FeatureFn {
    fn name(&self) -> &str;
    fn apply(&self, df: DataFrame) -> PipelineResult<DataFrame>;
}

/// Wraps a plain function or closure as a [`FeatureFn`].
pub struct Feature<F> {
    name: String,
    func: F,
}

impl<F> Feature<F>
where
    F: Fn(DataFrame) -> PipelineResult<DataFrame>,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> FeatureFn for Feature<F>
where
    F: Fn(DataFrame) -> PipelineResult<DataFrame>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, df: DataFrame) -> PipelineResult<DataFrame> {
        (self.func)(df)
    }
}

pub struct FeatureBuilder {
    features: Vec<Box<dyn FeatureFn>>,
    oppo_columns: Vec<String>,
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new(features::default_features(), Vec::new())
    }
}

impl FeatureBuilder {
    pub fn new(features: Vec<Box<dyn FeatureFn>>, oppo_columns: Vec<String>) -> Self {
        Self {
            features,
            oppo_columns,
        }
    }

    pub fn feature_names(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.name()).collect()
    }

    /// Sorts the frame by `(team, year, round_number)`, adds `oppo_*` views of the
    /// configured columns, then applies each feature in order.
    pub fn transform(&self, df: &DataFrame) -> PipelineResult<DataFrame> {
        let mut required: Vec<&str> = REQUIRED_COLS.to_vec();
        required.extend(self.oppo_columns.iter().map(String::as_str));
        frame::require_columns(df, &required)?;

        let sorted = frame::sort_stable(df, INDEX_COLS, false)?;
        let oppo: Vec<&str> = self.oppo_columns.iter().map(String::as_str).collect();
        let mut current = add_oppo_columns(sorted, &oppo)?;

        for feature in &self.features {
            current = self.add_feature(feature.as_ref(), current)?;
        }
        Ok(current)
    }

    fn add_feature(&self, feature: &dyn FeatureFn, df: DataFrame) -> PipelineResult<DataFrame> {
        check_index(feature.name(), &df)?;
        let before = frame::column_names(&df);
        let keys = df.select(INDEX_COLS.iter().copied())?;

        let updated = feature.apply(df)?;

        check_index(feature.name(), &updated)?;
        let after = updated.select(INDEX_COLS.iter().copied())?;
        if !after.equals_missing(&keys) {
            return Err(PipelineError::RowsChanged {
                feature: feature.name().to_string(),
                expected: keys.height(),
                found: after.height(),
            });
        }

        let mut added: Vec<String> = frame::column_names(&updated)
            .into_iter()
            .filter(|col| !before.contains(col))
            .collect();
        added.sort();
        debug!("feature {} added columns {added:?}", feature.name());

        if added.is_empty() {
            return Ok(updated);
        }
        let added: Vec<&str> = added.iter().map(String::as_str).collect();
        add_oppo_columns(updated, &added)
    }
}

fn check_index(feature: &str, df: &DataFrame) -> PipelineResult<()> {
    if INDEX_COLS.iter().all(|col| frame::has_column(df, col)) {
        return Ok(());
    }
    Err(PipelineError::IndexChanged {
        feature: feature.to_string(),
        expected: INDEX_COLS.iter().map(|c| c.to_string()).collect(),
        found: frame::column_names(df),
    })
}

/// Adds `oppo_{col}` for each column: the value the opposing team's row holds for the
/// same `(year, round_number)`. Rows whose opponent is absent get null. Existing
/// `oppo_{col}` columns are replaced.
pub fn add_oppo_columns(df: DataFrame, columns: &[&str]) -> PipelineResult<DataFrame> {
    frame::require_columns(&df, columns)?;
    if columns.is_empty() {
        return Ok(df);
    }
    frame::require_columns(&df, REQUIRED_COLS)?;

    let oppo_names: Vec<String> = columns.iter().map(|col| format!("oppo_{col}")).collect();
    let replaced: Vec<&str> = oppo_names.iter().map(String::as_str).collect();
    let base = frame::drop_columns(df, &replaced)?;

    let mut exprs = vec![col("team").alias("oppo_team"), col("year"), col("round_number")];
    exprs.extend(
        columns
            .iter()
            .zip(&oppo_names)
            .map(|(source, name)| col(*source).alias(name.as_str())),
    );
    let opponents = base.clone().lazy().select(exprs).collect()?;
    let key = ["oppo_team", "year", "round_number"];
    let opponents = frame::dedup(&opponents, &key, UniqueKeepStrategy::First)?;
    frame::left_join(&base, &opponents, &key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team_matches() -> DataFrame {
        df!(
            "team" => ["Richmond", "Carlton"],
            "oppo_team" => ["Carlton", "Richmond"],
            "year" => [2019i64, 2019],
            "round_number" => [1i64, 1],
            "score" => [97i64, 64],
        )
        .unwrap()
    }

    #[test]
    fn oppo_values_come_from_the_opponent_row() {
        let df = add_oppo_columns(team_matches(), &["score"]).unwrap();
        let oppo_score = df.column("oppo_score").unwrap().i64().unwrap();
        assert_eq!(oppo_score.get(0), Some(64));
        assert_eq!(oppo_score.get(1), Some(97));
    }

    #[test]
    fn missing_opponents_get_null() {
        let df = team_matches().head(Some(1));
        let df = add_oppo_columns(df, &["score"]).unwrap();
        assert_eq!(df.column("oppo_score").unwrap().i64().unwrap().get(0), None);
    }

    #[test]
    fn features_that_drop_rows_are_rejected() {
        let dropper = Feature::new("dropper", |df: DataFrame| Ok(df.head(Some(1))));
        let builder = FeatureBuilder::new(vec![Box::new(dropper)], Vec::new());
        let err = builder.transform(&team_matches()).unwrap_err();
        assert!(matches!(err, PipelineError::RowsChanged { .. }));
    }

    #[test]
    fn features_that_reorder_rows_are_rejected() {
        let reverser = Feature::new("reverser", |df: DataFrame| Ok(df.reverse()));
        let builder = FeatureBuilder::new(vec![Box::new(reverser)], Vec::new());
        let err = builder.transform(&team_matches()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::RowsChanged { ref feature, .. } if feature == "reverser"
        ));
    }

    #[test]
    fn features_that_drop_index_columns_are_rejected() {
        let dropper = Feature::new("dropper", |df: DataFrame| Ok(df.drop("round_number")?));
        let builder = FeatureBuilder::new(vec![Box::new(dropper)], Vec::new());
        let err = builder.transform(&team_matches()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::IndexChanged { ref feature, .. } if feature == "dropper"
        ));
    }
}
