use polars::prelude::PolarsError;
use thiserror::Error;

/// Errors raised by the cleaning and feature pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("required columns {missing:?} are missing; the columns given were {given:?}")]
    MissingColumns {
        missing: Vec<String>,
        given: Vec<String>,
    },
    #[error("feature `{feature}` must keep the index {expected:?}, but the frame has {found:?}")]
    IndexChanged {
        feature: String,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error(
        "feature `{feature}` added, dropped or reordered rows ({expected} before, {found} after)"
    )]
    RowsChanged {
        feature: String,
        expected: usize,
        found: usize,
    },
    #[error("frame {frame} lacks the join key {missing:?}")]
    MissingJoinKey { frame: usize, missing: Vec<String> },
    #[error("column `{column}`: {message}")]
    Coercion { column: String, message: String },
    #[error(transparent)]
    Frame(#[from] PolarsError),
}

impl PipelineError {
    pub fn missing(missing: Vec<String>, given: &[String]) -> Self {
        PipelineError::MissingColumns {
            missing,
            given: given.to_vec(),
        }
    }

    pub fn coercion(column: &str, message: impl Into<String>) -> Self {
        PipelineError::Coercion {
            column: column.to_string(),
            message: message.into(),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
