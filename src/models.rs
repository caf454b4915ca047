use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::predictor::Prediction;

/// Raw grade data for one student, as recorded upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeInputs {
    pub exam_grades: Vec<i32>,
    pub credit_results: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub predicted_exam_grade: Option<f64>,
    pub predicted_credit_pass_rate: Option<f64>,
    pub overall_performance_score: Option<f64>,
    pub prediction_date: DateTime<Utc>,
}

impl PredictionRecord {
    pub fn new(student_id: Uuid, prediction: &Prediction, prediction_date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            predicted_exam_grade: prediction.predicted_exam_grade,
            predicted_credit_pass_rate: prediction.predicted_credit_pass_rate,
            overall_performance_score: Some(prediction.overall_performance_score),
            prediction_date,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionListing {
    pub prediction_id: Uuid,
    pub student_id: Uuid,
    pub full_name: String,
    pub group_name: String,
    pub predicted_exam_grade: Option<f64>,
    pub predicted_credit_pass_rate: Option<f64>,
    pub overall_performance_score: Option<f64>,
    pub prediction_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct GroupStatistics {
    pub group_name: String,
    pub total_students: i64,
    pub students_with_predictions: i64,
    pub avg_performance_score: Option<f64>,
    pub avg_exam_grade: Option<f64>,
    pub avg_credit_pass_rate: Option<f64>,
}
