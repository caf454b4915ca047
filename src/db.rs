use std::collections::BTreeSet;

use anyhow::Context;
use serde::Deserialize;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::PredictionError;
use crate::models::{GradeInputs, GroupStatistics, PredictionListing, PredictionRecord};
use crate::predictor::{ExamGrade, Outcome};
use crate::store::{self, Applied, PredictionStore};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

impl PredictionStore for PgPool {
    async fn recalculate_with<F>(
        &self,
        student_id: Uuid,
        compute: F,
    ) -> Result<Applied, PredictionError>
    where
        F: FnOnce(&GradeInputs) -> Result<Outcome, PredictionError>,
    {
        let mut tx = self.begin().await?;

        // Row lock serializes recalculations of the same student.
        let locked = sqlx::query(
            "SELECT id FROM student_performance.students WHERE id = $1 FOR UPDATE",
        )
        .bind(student_id)
        .fetch_optional(&mut *tx)
        .await?;

        if locked.is_none() {
            return Err(PredictionError::StudentNotFound(student_id));
        }

        let inputs = load_inputs(&mut tx, student_id).await?;
        let outcome = compute(&inputs)?;

        let removed = sqlx::query(
            "DELETE FROM student_performance.performance_predictions WHERE student_id = $1",
        )
        .bind(student_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let applied = match store::fresh_record(student_id, &outcome) {
            Some(record) => {
                insert_prediction(&mut tx, &record).await?;
                Applied::Stored(record)
            }
            None => Applied::Cleared { removed },
        };

        tx.commit().await?;
        Ok(applied)
    }

    async fn student_ids(&self) -> Result<Vec<Uuid>, PredictionError> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM student_performance.students ORDER BY full_name, id",
        )
        .fetch_all(self)
        .await?;
        Ok(ids)
    }
}

async fn load_inputs(conn: &mut PgConnection, student_id: Uuid) -> Result<GradeInputs, sqlx::Error> {
    let exam_grades: Vec<i32> = sqlx::query_scalar(
        "SELECT grade FROM student_performance.exam_grades WHERE student_id = $1",
    )
    .bind(student_id)
    .fetch_all(&mut *conn)
    .await?;

    let credit_results: Vec<bool> = sqlx::query_scalar(
        "SELECT is_passed FROM student_performance.credit_results WHERE student_id = $1",
    )
    .bind(student_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(GradeInputs {
        exam_grades,
        credit_results,
    })
}

async fn insert_prediction(conn: &mut PgConnection, record: &PredictionRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO student_performance.performance_predictions
        (id, student_id, predicted_exam_grade, predicted_credit_pass_rate,
         overall_performance_score, prediction_date)
        VALUES ($1, $2, $3::float8::numeric(5, 2), $4::float8::numeric(5, 2),
                $5::float8::numeric(5, 2), $6)
        "#,
    )
    .bind(record.id)
    .bind(record.student_id)
    .bind(record.predicted_exam_grade)
    .bind(record.predicted_credit_pass_rate)
    .bind(record.overall_performance_score)
    .bind(record.prediction_date)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn fetch_prediction(
    pool: &PgPool,
    student_id: Uuid,
) -> anyhow::Result<Option<PredictionRecord>> {
    let row = sqlx::query(
        r#"
        SELECT id, student_id,
               predicted_exam_grade::float8 AS predicted_exam_grade,
               predicted_credit_pass_rate::float8 AS predicted_credit_pass_rate,
               overall_performance_score::float8 AS overall_performance_score,
               prediction_date
        FROM student_performance.performance_predictions
        WHERE student_id = $1
        "#,
    )
    .bind(student_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| PredictionRecord {
        id: row.get("id"),
        student_id: row.get("student_id"),
        predicted_exam_grade: row.get("predicted_exam_grade"),
        predicted_credit_pass_rate: row.get("predicted_credit_pass_rate"),
        overall_performance_score: row.get("overall_performance_score"),
        prediction_date: row.get("prediction_date"),
    }))
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub group: Option<String>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
}

fn list_query(filter: &ListFilter) -> String {
    let mut query = String::from(
        "SELECT pp.id AS prediction_id, pp.student_id, s.full_name, g.group_name, \
         pp.predicted_exam_grade::float8 AS predicted_exam_grade, \
         pp.predicted_credit_pass_rate::float8 AS predicted_credit_pass_rate, \
         pp.overall_performance_score::float8 AS overall_performance_score, \
         pp.prediction_date \
         FROM student_performance.performance_predictions pp \
         JOIN student_performance.students s ON s.id = pp.student_id \
         JOIN student_performance.groups g ON g.id = s.group_id",
    );

    let mut conditions = Vec::new();
    let mut param = 0;

    if filter.group.is_some() {
        param += 1;
        conditions.push(format!("g.group_name = ${param}"));
    }
    if filter.min_score.is_some() {
        param += 1;
        conditions.push(format!("pp.overall_performance_score >= ${param}::float8"));
    }
    if filter.max_score.is_some() {
        param += 1;
        conditions.push(format!("pp.overall_performance_score <= ${param}::float8"));
    }

    if !conditions.is_empty() {
        query.push_str(" WHERE ");
        query.push_str(&conditions.join(" AND "));
    }

    query.push_str(" ORDER BY pp.prediction_date DESC, s.full_name");
    query
}

pub async fn list_predictions(
    pool: &PgPool,
    filter: &ListFilter,
) -> anyhow::Result<Vec<PredictionListing>> {
    let query = list_query(filter);
    let mut rows = sqlx::query(&query);

    if let Some(group) = &filter.group {
        rows = rows.bind(group);
    }
    if let Some(min_score) = filter.min_score {
        rows = rows.bind(min_score);
    }
    if let Some(max_score) = filter.max_score {
        rows = rows.bind(max_score);
    }

    let records = rows.fetch_all(pool).await?;
    let mut predictions = Vec::with_capacity(records.len());

    for row in records {
        predictions.push(PredictionListing {
            prediction_id: row.get("prediction_id"),
            student_id: row.get("student_id"),
            full_name: row.get("full_name"),
            group_name: row.get("group_name"),
            predicted_exam_grade: row.get("predicted_exam_grade"),
            predicted_credit_pass_rate: row.get("predicted_credit_pass_rate"),
            overall_performance_score: row.get("overall_performance_score"),
            prediction_date: row.get("prediction_date"),
        });
    }

    Ok(predictions)
}

pub async fn group_statistics(pool: &PgPool) -> anyhow::Result<Vec<GroupStatistics>> {
    let records = sqlx::query(
        r#"
        SELECT g.group_name,
               COUNT(DISTINCT s.id) AS total_students,
               COUNT(pp.id) AS students_with_predictions,
               AVG(pp.overall_performance_score)::float8 AS avg_performance_score,
               AVG(pp.predicted_exam_grade)::float8 AS avg_exam_grade,
               AVG(pp.predicted_credit_pass_rate)::float8 AS avg_credit_pass_rate
        FROM student_performance.groups g
        LEFT JOIN student_performance.students s ON s.group_id = g.id
        LEFT JOIN student_performance.performance_predictions pp ON pp.student_id = s.id
        GROUP BY g.id, g.group_name
        ORDER BY g.group_name
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(records
        .into_iter()
        .map(|row| GroupStatistics {
            group_name: row.get("group_name"),
            total_students: row.get("total_students"),
            students_with_predictions: row.get("students_with_predictions"),
            avg_performance_score: row.get("avg_performance_score"),
            avg_exam_grade: row.get("avg_exam_grade"),
            avg_credit_pass_rate: row.get("avg_credit_pass_rate"),
        })
        .collect())
}

pub async fn delete_prediction(pool: &PgPool, prediction_id: Uuid) -> anyhow::Result<bool> {
    let result =
        sqlx::query("DELETE FROM student_performance.performance_predictions WHERE id = $1")
            .bind(prediction_id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

async fn upsert_group(conn: &mut PgConnection, group_name: &str) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO student_performance.groups (id, group_name)
        VALUES ($1, $2)
        ON CONFLICT (group_name) DO UPDATE SET group_name = EXCLUDED.group_name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(group_name)
    .fetch_one(&mut *conn)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_student(
    conn: &mut PgConnection,
    student_code: &str,
    full_name: &str,
    group_id: Uuid,
) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO student_performance.students (id, student_code, full_name, group_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (student_code) DO UPDATE
        SET full_name = EXCLUDED.full_name, group_id = EXCLUDED.group_id
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_code)
    .bind(full_name)
    .bind(group_id)
    .fetch_one(&mut *conn)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_exam(conn: &mut PgConnection, exam_name: &str) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO student_performance.exams (id, exam_name)
        VALUES ($1, $2)
        ON CONFLICT (exam_name) DO UPDATE SET exam_name = EXCLUDED.exam_name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(exam_name)
    .fetch_one(&mut *conn)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_credit(conn: &mut PgConnection, credit_name: &str) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO student_performance.credits (id, credit_name)
        VALUES ($1, $2)
        ON CONFLICT (credit_name) DO UPDATE SET credit_name = EXCLUDED.credit_name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(credit_name)
    .fetch_one(&mut *conn)
    .await?
    .get("id");
    Ok(id)
}

async fn record_exam_grade(
    conn: &mut PgConnection,
    student_id: Uuid,
    exam_id: Uuid,
    grade: ExamGrade,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO student_performance.exam_grades (id, student_id, exam_id, grade)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (student_id, exam_id) DO UPDATE
        SET grade = EXCLUDED.grade, graded_at = NOW()
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(exam_id)
    .bind(grade.value())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn record_credit_result(
    conn: &mut PgConnection,
    student_id: Uuid,
    credit_id: Uuid,
    is_passed: bool,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO student_performance.credit_results (id, student_id, credit_id, is_passed)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (student_id, credit_id) DO UPDATE
        SET is_passed = EXCLUDED.is_passed, recorded_at = NOW()
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(credit_id)
    .bind(is_passed)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Seeds two groups of students with exam grades and credit results.
/// Returns the seeded student ids so their predictions can be computed.
pub async fn seed(pool: &PgPool) -> anyhow::Result<Vec<Uuid>> {
    let mut tx = pool.begin().await?;
    let students = vec![
        ("ST-1001", "Avery Lee", "IVT-21"),
        ("ST-1002", "Jules Moreno", "IVT-21"),
        ("ST-1003", "Kiara Patel", "IVT-21"),
        ("ST-2001", "Noah Fischer", "IVT-22"),
        ("ST-2002", "Mila Novak", "IVT-22"),
        ("ST-2003", "Theo Laurent", "IVT-22"),
        ("ST-2004", "Iris Walsh", "IVT-22"),
    ];

    let mut student_ids = Vec::with_capacity(students.len());
    for (code, name, group) in students {
        let group_id = upsert_group(&mut tx, group).await?;
        student_ids.push(upsert_student(&mut tx, code, name, group_id).await?);
    }

    let exam_grades = vec![
        ("ST-1001", "Calculus", 5),
        ("ST-1001", "Physics", 5),
        ("ST-1001", "Databases", 4),
        ("ST-1002", "Calculus", 3),
        ("ST-1002", "Physics", 3),
        ("ST-1003", "Calculus", 2),
        ("ST-1003", "Databases", 3),
        ("ST-2001", "Calculus", 4),
        ("ST-2001", "Physics", 5),
        ("ST-2002", "Databases", 2),
    ];

    for (code, exam, grade) in exam_grades {
        let student_id = student_id_by_code(&mut tx, code).await?;
        let exam_id = upsert_exam(&mut tx, exam).await?;
        let grade = ExamGrade::try_from(grade).context("seed grade outside the exam scale")?;
        record_exam_grade(&mut tx, student_id, exam_id, grade).await?;
    }

    let credit_results = vec![
        ("ST-1001", "Physical Education", true),
        ("ST-1002", "Physical Education", true),
        ("ST-1002", "History", false),
        ("ST-1003", "History", false),
        ("ST-2001", "History", true),
        ("ST-2003", "Physical Education", true),
        ("ST-2003", "History", true),
        ("ST-2003", "Philosophy", false),
        ("ST-2003", "Technical English", true),
    ];

    for (code, credit, is_passed) in credit_results {
        let student_id = student_id_by_code(&mut tx, code).await?;
        let credit_id = upsert_credit(&mut tx, credit).await?;
        record_credit_result(&mut tx, student_id, credit_id, is_passed).await?;
    }

    tx.commit().await?;
    Ok(student_ids)
}

async fn student_id_by_code(conn: &mut PgConnection, student_code: &str) -> anyhow::Result<Uuid> {
    let id = sqlx::query("SELECT id FROM student_performance.students WHERE student_code = $1")
        .bind(student_code)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("student {student_code} not seeded"))?
        .get("id");
    Ok(id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RecordKind {
    Exam,
    Credit,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    student_code: String,
    full_name: String,
    group_name: String,
    kind: RecordKind,
    discipline: String,
    grade: Option<i32>,
    is_passed: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GradeEntry {
    Exam(ExamGrade),
    Credit(bool),
}

fn parse_entry(row: &CsvRow) -> anyhow::Result<GradeEntry> {
    match row.kind {
        RecordKind::Exam => {
            let grade = row
                .grade
                .with_context(|| format!("exam row for {} has no grade", row.student_code))?;
            Ok(GradeEntry::Exam(ExamGrade::try_from(grade)?))
        }
        RecordKind::Credit => {
            let is_passed = row
                .is_passed
                .with_context(|| format!("credit row for {} has no result", row.student_code))?;
            Ok(GradeEntry::Credit(is_passed))
        }
    }
}

#[derive(Debug, Default)]
pub struct ImportSummary {
    pub records: usize,
    pub students: BTreeSet<Uuid>,
}

/// Reads every row and checks it before anything is written, so a bad
/// row anywhere in the file rejects the whole file.
fn read_entries<R: std::io::Read>(
    mut reader: csv::Reader<R>,
) -> anyhow::Result<Vec<(CsvRow, GradeEntry)>> {
    let mut entries = Vec::new();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        // Header is line 1.
        let line = index + 2;
        let row = result.with_context(|| format!("malformed CSV row at line {line}"))?;
        let entry = parse_entry(&row).with_context(|| format!("invalid record at line {line}"))?;
        entries.push((row, entry));
    }

    Ok(entries)
}

/// Imports exam grades and credit results in one transaction. A later row
/// for the same student and discipline replaces the earlier one.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<ImportSummary> {
    let reader = csv::Reader::from_path(csv_path)?;
    let entries = read_entries(reader)?;

    let mut tx = pool.begin().await?;
    let mut summary = ImportSummary::default();

    for (row, entry) in entries {
        let group_id = upsert_group(&mut tx, &row.group_name).await?;
        let student_id = upsert_student(&mut tx, &row.student_code, &row.full_name, group_id).await?;

        match entry {
            GradeEntry::Exam(grade) => {
                let exam_id = upsert_exam(&mut tx, &row.discipline).await?;
                record_exam_grade(&mut tx, student_id, exam_id, grade).await?;
            }
            GradeEntry::Credit(is_passed) => {
                let credit_id = upsert_credit(&mut tx, &row.discipline).await?;
                record_credit_result(&mut tx, student_id, credit_id, is_passed).await?;
            }
        }

        summary.records += 1;
        summary.students.insert(student_id);
    }

    tx.commit().await?;
    Ok(summary)
}
