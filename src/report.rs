use std::collections::BTreeMap;
use std::fmt::Write;

use crate::models::{GroupStatistics, PredictionListing};
use crate::predictor::ScoreBand;

pub fn format_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |value| format!("{value:.2}"))
}

pub fn summarize_by_band(predictions: &[PredictionListing]) -> BTreeMap<ScoreBand, usize> {
    let mut bands = BTreeMap::new();
    for prediction in predictions {
        if let Some(score) = prediction.overall_performance_score {
            *bands.entry(ScoreBand::from_score(score)).or_insert(0) += 1;
        }
    }
    bands
}

fn by_score_desc(predictions: &[PredictionListing]) -> Vec<&PredictionListing> {
    let mut ranked: Vec<&PredictionListing> = predictions
        .iter()
        .filter(|prediction| prediction.overall_performance_score.is_some())
        .collect();
    ranked.sort_by(|a, b| {
        b.overall_performance_score
            .partial_cmp(&a.overall_performance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.full_name.cmp(&b.full_name))
    });
    ranked
}

pub fn build_report(
    group: Option<&str>,
    statistics: &[GroupStatistics],
    predictions: &[PredictionListing],
) -> String {
    let mut output = String::new();
    let group_label = group.unwrap_or("all groups");

    let _ = writeln!(output, "# Student Performance Report");
    let _ = writeln!(
        output,
        "Generated for {} ({} predictions)",
        group_label,
        predictions.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Group Statistics");

    if statistics.is_empty() {
        let _ = writeln!(output, "No groups recorded.");
    } else {
        for stats in statistics {
            let _ = writeln!(
                output,
                "- {}: {}/{} students predicted, avg score {}, avg exam grade {}, avg credit pass rate {}",
                stats.group_name,
                stats.students_with_predictions,
                stats.total_students,
                format_optional(stats.avg_performance_score),
                format_optional(stats.avg_exam_grade),
                format_optional(stats.avg_credit_pass_rate)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Score Bands");

    let bands = summarize_by_band(predictions);
    if bands.is_empty() {
        let _ = writeln!(output, "No predictions recorded.");
    } else {
        for (band, count) in bands.iter().rev() {
            let _ = writeln!(output, "- {band}: {count} students");
        }
    }

    let ranked = by_score_desc(predictions);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Performers");

    if ranked.is_empty() {
        let _ = writeln!(output, "No predictions recorded.");
    } else {
        for prediction in ranked.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} ({}) score {}, exam grade {}, credit pass rate {}",
                prediction.full_name,
                prediction.group_name,
                format_optional(prediction.overall_performance_score),
                format_optional(prediction.predicted_exam_grade),
                format_optional(prediction.predicted_credit_pass_rate)
            );
        }
    }

    let at_risk: Vec<&PredictionListing> = ranked
        .iter()
        .rev()
        .filter(|prediction| {
            prediction
                .overall_performance_score
                .is_some_and(|score| ScoreBand::from_score(score) == ScoreBand::AtRisk)
        })
        .copied()
        .collect();

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students At Risk");

    if at_risk.is_empty() {
        let _ = writeln!(output, "No students below the watch threshold.");
    } else {
        for prediction in at_risk {
            let _ = writeln!(
                output,
                "- {} ({}) score {}",
                prediction.full_name,
                prediction.group_name,
                format_optional(prediction.overall_performance_score)
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    use super::*;

    fn listing(name: &str, group: &str, score: f64) -> PredictionListing {
        PredictionListing {
            prediction_id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            full_name: name.to_string(),
            group_name: group.to_string(),
            predicted_exam_grade: None,
            predicted_credit_pass_rate: Some(score),
            overall_performance_score: Some(score),
            prediction_date: Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn bands_count_scored_predictions() {
        let mut unscored = listing("Noah Fischer", "IVT-22", 0.0);
        unscored.overall_performance_score = None;
        let predictions = vec![
            listing("Avery Lee", "IVT-21", 89.0),
            listing("Jules Moreno", "IVT-21", 38.33),
            listing("Kiara Patel", "IVT-21", 12.5),
            listing("Mila Novak", "IVT-22", 75.0),
            unscored,
        ];

        let bands = summarize_by_band(&predictions);
        assert_eq!(bands.get(&ScoreBand::Strong), Some(&1));
        assert_eq!(bands.get(&ScoreBand::Watch), Some(&1));
        assert_eq!(bands.get(&ScoreBand::AtRisk), Some(&2));
    }

    #[test]
    fn report_lists_groups_leaders_and_students_at_risk() {
        let statistics = vec![GroupStatistics {
            group_name: "IVT-21".to_string(),
            total_students: 3,
            students_with_predictions: 2,
            avg_performance_score: Some(63.664),
            avg_exam_grade: Some(3.834),
            avg_credit_pass_rate: None,
        }];
        let predictions = vec![
            listing("Jules Moreno", "IVT-21", 38.33),
            listing("Avery Lee", "IVT-21", 89.0),
        ];

        let report = build_report(Some("IVT-21"), &statistics, &predictions);
        let expected = "\
# Student Performance Report
Generated for IVT-21 (2 predictions)

## Group Statistics
- IVT-21: 2/3 students predicted, avg score 63.66, avg exam grade 3.83, avg credit pass rate n/a

## Score Bands
- strong: 1 students
- at risk: 1 students

## Top Performers
- Avery Lee (IVT-21) score 89.00, exam grade n/a, credit pass rate 89.00
- Jules Moreno (IVT-21) score 38.33, exam grade n/a, credit pass rate 38.33

## Students At Risk
- Jules Moreno (IVT-21) score 38.33
";
        assert_eq!(report, expected);
    }

    #[test]
    fn empty_report_says_so() {
        let report = build_report(None, &[], &[]);
        assert!(report.contains("Generated for all groups (0 predictions)"));
        assert!(report.contains("No groups recorded."));
        assert!(report.contains("No students below the watch threshold."));
    }
}
