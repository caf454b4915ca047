//! Replace-or-delete persistence of the one current prediction per student.
//!
//! A store runs the whole recalculation for a student as one atomic unit:
//! read the inputs, compute, drop any existing prediction, insert the new
//! one. Concurrent recalculations for the same student are serialized by the
//! store, so a student never has more than one prediction and never loses one
//! mid-replace.

use chrono::Utc;
use uuid::Uuid;

use crate::error::PredictionError;
use crate::models::{GradeInputs, PredictionRecord};
use crate::predictor::{self, Outcome, Weights};

#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Stored(PredictionRecord),
    /// No grade data; `removed` stale predictions were deleted.
    Cleared { removed: u64 },
}

pub trait PredictionStore {
    /// Loads the student's inputs, hands them to `compute` and applies the
    /// outcome. If `compute` fails nothing is written.
    async fn recalculate_with<F>(
        &self,
        student_id: Uuid,
        compute: F,
    ) -> Result<Applied, PredictionError>
    where
        F: FnOnce(&GradeInputs) -> Result<Outcome, PredictionError>;

    async fn student_ids(&self) -> Result<Vec<Uuid>, PredictionError>;
}

pub async fn recalculate_student<S: PredictionStore>(
    store: &S,
    student_id: Uuid,
    weights: Weights,
) -> Result<Applied, PredictionError> {
    let applied = store
        .recalculate_with(student_id, |inputs| {
            predictor::predict(&inputs.exam_grades, &inputs.credit_results, weights)
        })
        .await?;

    match &applied {
        Applied::Stored(record) => tracing::debug!(
            %student_id,
            overall = ?record.overall_performance_score,
            "prediction stored"
        ),
        Applied::Cleared { removed } => tracing::debug!(
            %student_id,
            removed,
            "insufficient data, prediction cleared"
        ),
    }

    Ok(applied)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecomputeSummary {
    pub predicted: usize,
    pub skipped: usize,
    pub rejected: Vec<Uuid>,
}

pub async fn recompute_all<S: PredictionStore>(
    store: &S,
    weights: Weights,
) -> Result<RecomputeSummary, PredictionError> {
    let student_ids = store.student_ids().await?;
    recompute_students(store, &student_ids, weights).await
}

/// Recalculates students one at a time. Students without data are skipped
/// quietly and students with malformed grades are reported in the summary;
/// a store failure aborts the run.
pub async fn recompute_students<S: PredictionStore>(
    store: &S,
    student_ids: &[Uuid],
    weights: Weights,
) -> Result<RecomputeSummary, PredictionError> {
    let mut summary = RecomputeSummary::default();

    for &student_id in student_ids {
        match recalculate_student(store, student_id, weights).await {
            Ok(Applied::Stored(_)) => summary.predicted += 1,
            Ok(Applied::Cleared { .. }) => summary.skipped += 1,
            Err(err @ PredictionError::MalformedGrade(_)) => {
                tracing::warn!(%student_id, error = %err, "skipping student with malformed grades");
                summary.rejected.push(student_id);
            }
            Err(err) => return Err(err),
        }
    }

    tracing::info!(
        predicted = summary.predicted,
        skipped = summary.skipped,
        rejected = summary.rejected.len(),
        "recompute finished"
    );

    Ok(summary)
}

/// Builds the row that replaces a student's prediction, stamped now.
pub fn fresh_record(student_id: Uuid, outcome: &Outcome) -> Option<PredictionRecord> {
    match outcome {
        Outcome::Predicted(prediction) => {
            Some(PredictionRecord::new(student_id, prediction, Utc::now()))
        }
        Outcome::InsufficientData => None,
    }
}
