use std::fmt;

use serde::Serialize;

use crate::error::PredictionError;

pub const LOWEST_GRADE: i32 = 2;
pub const HIGHEST_GRADE: i32 = 5;

/// Relative weight of exam and credit performance in the overall score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub exam: f64,
    pub credit: f64,
}

pub const DEFAULT_WEIGHTS: Weights = Weights {
    exam: 0.7,
    credit: 0.3,
};

impl Default for Weights {
    fn default() -> Self {
        DEFAULT_WEIGHTS
    }
}

/// An exam grade known to be on the 2..=5 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExamGrade(i32);

impl ExamGrade {
    pub fn value(self) -> i32 {
        self.0
    }
}

impl TryFrom<i32> for ExamGrade {
    type Error = PredictionError;

    fn try_from(grade: i32) -> Result<Self, Self::Error> {
        if (LOWEST_GRADE..=HIGHEST_GRADE).contains(&grade) {
            Ok(Self(grade))
        } else {
            Err(PredictionError::MalformedGrade(grade))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub predicted_exam_grade: Option<f64>,
    pub predicted_credit_pass_rate: Option<f64>,
    pub overall_performance_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Predicted(Prediction),
    InsufficientData,
}

/// Checks every grade against the scale, then computes the snapshot.
pub fn predict(
    exam_grades: &[i32],
    credit_results: &[bool],
    weights: Weights,
) -> Result<Outcome, PredictionError> {
    let grades = exam_grades
        .iter()
        .map(|&grade| ExamGrade::try_from(grade))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(predict_validated(&grades, credit_results, weights))
}

/// The overall score is combined from the already rounded exam average and
/// pass rate, not from full-precision intermediates.
pub fn predict_validated(
    exam_grades: &[ExamGrade],
    credit_results: &[bool],
    weights: Weights,
) -> Outcome {
    let exam = average_grade(exam_grades);
    let credit = pass_rate(credit_results);

    let overall = match (exam, credit) {
        (Some(exam), Some(credit)) => {
            round2(normalize_grade(exam) * weights.exam + credit * weights.credit)
        }
        (Some(exam), None) => round2(normalize_grade(exam)),
        (None, Some(credit)) => credit,
        (None, None) => return Outcome::InsufficientData,
    };

    Outcome::Predicted(Prediction {
        predicted_exam_grade: exam,
        predicted_credit_pass_rate: credit,
        overall_performance_score: overall,
    })
}

pub fn average_grade(grades: &[ExamGrade]) -> Option<f64> {
    if grades.is_empty() {
        return None;
    }

    let total: i64 = grades.iter().map(|grade| i64::from(grade.value())).sum();
    Some(round2(total as f64 / grades.len() as f64))
}

pub fn pass_rate(results: &[bool]) -> Option<f64> {
    if results.is_empty() {
        return None;
    }

    let passed = results.iter().filter(|passed| **passed).count();
    Some(round2((passed as f64 / results.len() as f64) * 100.0))
}

/// Maps the closed grade range [2, 5] linearly onto [0, 100].
pub fn normalize_grade(grade: f64) -> f64 {
    let span = f64::from(HIGHEST_GRADE - LOWEST_GRADE);
    ((grade - f64::from(LOWEST_GRADE)) / span) * 100.0
}

/// Rounds half away from zero at two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScoreBand {
    AtRisk,
    Watch,
    Strong,
}

impl ScoreBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Strong
        } else if score >= 60.0 {
            Self::Watch
        } else {
            Self::AtRisk
        }
    }
}

impl fmt::Display for ScoreBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Strong => "strong",
            Self::Watch => "watch",
            Self::AtRisk => "at risk",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predicted(grades: &[i32], credits: &[bool]) -> Prediction {
        match predict(grades, credits, Weights::default()).expect("valid grades") {
            Outcome::Predicted(prediction) => prediction,
            Outcome::InsufficientData => panic!("expected a prediction"),
        }
    }

    #[test]
    fn exam_only_scores_use_rounded_average() {
        let prediction = predicted(&[5, 5, 4], &[]);
        assert_eq!(prediction.predicted_exam_grade, Some(4.67));
        assert_eq!(prediction.predicted_credit_pass_rate, None);
        assert_eq!(prediction.overall_performance_score, 89.0);
    }

    #[test]
    fn credit_only_scores_pass_rate_directly() {
        let prediction = predicted(&[], &[true, true, false, true]);
        assert_eq!(prediction.predicted_exam_grade, None);
        assert_eq!(prediction.predicted_credit_pass_rate, Some(75.0));
        assert_eq!(prediction.overall_performance_score, 75.0);
    }

    #[test]
    fn blended_score_weights_exams_over_credits() {
        let prediction = predicted(&[3, 3], &[true, false]);
        assert_eq!(prediction.predicted_exam_grade, Some(3.0));
        assert_eq!(prediction.predicted_credit_pass_rate, Some(50.0));
        assert_eq!(prediction.overall_performance_score, 38.33);
    }

    #[test]
    fn empty_inputs_have_insufficient_data() {
        let outcome = predict(&[], &[], Weights::default()).expect("no grades to reject");
        assert_eq!(outcome, Outcome::InsufficientData);
    }

    #[test]
    fn grade_scale_bounds_map_to_zero_and_hundred() {
        assert_eq!(predicted(&[2], &[]).overall_performance_score, 0.0);
        assert_eq!(predicted(&[5], &[]).overall_performance_score, 100.0);
        assert_eq!(predicted(&[2, 2, 2, 2], &[]).overall_performance_score, 0.0);
        assert_eq!(predicted(&[5, 5, 5], &[]).overall_performance_score, 100.0);
    }

    #[test]
    fn out_of_scale_grades_are_rejected() {
        for grade in [0, 1, 6, -3] {
            let err = predict(&[4, grade], &[true], Weights::default()).unwrap_err();
            assert!(matches!(err, PredictionError::MalformedGrade(g) if g == grade));
        }
    }

    #[test]
    fn custom_weights_change_the_blend() {
        let weights = Weights {
            exam: 0.5,
            credit: 0.5,
        };
        let outcome = predict(&[5], &[false], weights).expect("valid grades");
        let Outcome::Predicted(prediction) = outcome else {
            panic!("expected a prediction");
        };
        assert_eq!(prediction.overall_performance_score, 50.0);
    }

    #[test]
    fn averages_and_rates_stay_in_range() {
        let scale = [2, 3, 4, 5];
        for a in scale {
            for b in scale {
                for c in scale {
                    let grades = [a, b, c];
                    let credits = [a % 2 == 0, b > 3, c == 5];
                    let prediction = predicted(&grades, &credits);

                    let mean = f64::from(a + b + c) / 3.0;
                    let exam = prediction.predicted_exam_grade.expect("exam average");
                    assert_eq!(exam, round2(mean));
                    assert!((2.0..=5.0).contains(&exam));

                    let passed = credits.iter().filter(|p| **p).count() as f64;
                    let rate = prediction.predicted_credit_pass_rate.expect("pass rate");
                    assert_eq!(rate, round2(passed / 3.0 * 100.0));
                    assert!((0.0..=100.0).contains(&rate));

                    let overall = prediction.overall_performance_score;
                    assert!((0.0..=100.0).contains(&overall), "overall {overall}");
                }
            }
        }
    }

    #[test]
    fn round2_goes_half_away_from_zero() {
        assert_eq!(round2(0.125), 0.13);
        assert_eq!(round2(66.666_666), 66.67);
        assert_eq!(round2(33.333_333), 33.33);
        assert_eq!(round2(-0.125), -0.13);
    }

    #[test]
    fn bands_follow_score_thresholds() {
        assert_eq!(ScoreBand::from_score(100.0), ScoreBand::Strong);
        assert_eq!(ScoreBand::from_score(80.0), ScoreBand::Strong);
        assert_eq!(ScoreBand::from_score(79.99), ScoreBand::Watch);
        assert_eq!(ScoreBand::from_score(60.0), ScoreBand::Watch);
        assert_eq!(ScoreBand::from_score(59.99), ScoreBand::AtRisk);
        assert_eq!(ScoreBand::AtRisk.to_string(), "at risk");
    }
}
