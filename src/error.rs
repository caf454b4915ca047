use thiserror::Error;
use uuid::Uuid;

use crate::predictor::{HIGHEST_GRADE, LOWEST_GRADE};

/// Errors from calculating or persisting a prediction.
///
/// Missing grade data is not an error: it is the `InsufficientData` outcome.
#[derive(Debug, Error)]
pub enum PredictionError {
    /// A grade outside the exam scale reached the predictor.
    #[error("exam grade {0} is outside the {lo}..={hi} scale", lo = LOWEST_GRADE, hi = HIGHEST_GRADE)]
    MalformedGrade(i32),

    #[error("student {0} not found")]
    StudentNotFound(Uuid),

    /// The store failed; the surrounding transaction was rolled back.
    #[error("prediction store failed: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl PredictionError {
    /// Whether repeating the same recalculation can be expected to succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Persistence(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                // serialization_failure, deadlock_detected
                sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001" | "40P01")),
                _ => false,
            },
            Self::MalformedGrade(_) | Self::StudentNotFound(_) => false,
        }
    }
}
