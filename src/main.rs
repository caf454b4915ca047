use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

mod config;
mod db;
mod error;
mod models;
mod predictor;
mod report;
mod store;

use crate::config::AppConfig;
use crate::predictor::{ScoreBand, Weights};
use crate::report::format_optional;
use crate::store::Applied;

#[derive(Parser)]
#[command(name = "performance-predictor")]
#[command(about = "Student performance predictions from exam grades and credit results", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample groups, students and grades, then compute predictions
    Seed,
    /// Import exam grades and credit results from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Recalculate the prediction for one student
    Calculate { student_id: Uuid },
    /// Show the stored prediction for one student
    Show {
        student_id: Uuid,
        #[arg(long)]
        json: bool,
    },
    /// Recalculate predictions for every student
    Recompute,
    /// List stored predictions, newest first
    List {
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        min_score: Option<f64>,
        #[arg(long)]
        max_score: Option<f64>,
        #[arg(long)]
        json: bool,
    },
    /// Per-group prediction statistics
    Stats,
    /// Delete a stored prediction by its id
    Delete { prediction_id: Uuid },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        group: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let config = AppConfig::load().context("failed to load configuration")?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let weights = Weights::default();

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let student_ids = db::seed(&pool).await?;
            let summary = store::recompute_students(&pool, &student_ids, weights).await?;
            println!(
                "Seed data inserted for {} students; {} predictions computed.",
                student_ids.len(),
                summary.predicted
            );
        }
        Commands::Import { csv } => {
            let imported = db::import_csv(&pool, &csv).await?;
            let student_ids: Vec<Uuid> = imported.students.into_iter().collect();
            let summary = store::recompute_students(&pool, &student_ids, weights).await?;
            println!(
                "Imported {} records from {}; {} predictions updated.",
                imported.records,
                csv.display(),
                summary.predicted
            );
            report_rejected(&summary.rejected);
        }
        Commands::Calculate { student_id } => {
            let applied = store::recalculate_student(&pool, student_id, weights)
                .await
                .map_err(|err| {
                    let retryable = err.is_retryable();
                    let err = anyhow::Error::new(err);
                    if retryable {
                        err.context("recalculation failed; it is safe to retry")
                    } else {
                        err
                    }
                })?;

            match applied {
                Applied::Stored(record) => {
                    println!("Prediction for {student_id}:");
                    println!(
                        "- exam grade {}, credit pass rate {}, overall score {}",
                        format_optional(record.predicted_exam_grade),
                        format_optional(record.predicted_credit_pass_rate),
                        format_optional(record.overall_performance_score)
                    );
                }
                Applied::Cleared { removed } => {
                    println!("Insufficient data to predict performance for {student_id}.");
                    if removed > 0 {
                        println!("Removed the stale prediction.");
                    }
                }
            }
        }
        Commands::Show { student_id, json } => {
            let Some(record) = db::fetch_prediction(&pool, student_id).await? else {
                println!("No prediction stored for {student_id}.");
                return Ok(());
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!(
                    "Prediction for {} as of {}:",
                    student_id,
                    record.prediction_date.format("%Y-%m-%d %H:%M")
                );
                println!(
                    "- exam grade {}, credit pass rate {}, overall score {}",
                    format_optional(record.predicted_exam_grade),
                    format_optional(record.predicted_credit_pass_rate),
                    format_optional(record.overall_performance_score)
                );
            }
        }
        Commands::Recompute => {
            let summary = store::recompute_all(&pool, weights).await?;
            println!(
                "Recomputed {} predictions; {} students had no grades or credits.",
                summary.predicted, summary.skipped
            );
            report_rejected(&summary.rejected);
        }
        Commands::List {
            group,
            min_score,
            max_score,
            json,
        } => {
            let filter = db::ListFilter {
                group,
                min_score,
                max_score,
            };
            let predictions = db::list_predictions(&pool, &filter).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&predictions)?);
                return Ok(());
            }

            if predictions.is_empty() {
                println!("No predictions match.");
                return Ok(());
            }

            for prediction in &predictions {
                let band = prediction
                    .overall_performance_score
                    .map(ScoreBand::from_score)
                    .map_or_else(|| "unscored".to_string(), |band| band.to_string());
                println!(
                    "- {} ({}) score {} [{}], exam grade {}, credit pass rate {}",
                    prediction.full_name,
                    prediction.group_name,
                    format_optional(prediction.overall_performance_score),
                    band,
                    format_optional(prediction.predicted_exam_grade),
                    format_optional(prediction.predicted_credit_pass_rate)
                );
            }
            println!("{} predictions.", predictions.len());
        }
        Commands::Stats => {
            let statistics = db::group_statistics(&pool).await?;
            if statistics.is_empty() {
                println!("No groups recorded.");
                return Ok(());
            }

            for stats in &statistics {
                println!(
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
        Commands::Delete { prediction_id } => {
            if db::delete_prediction(&pool, prediction_id).await? {
                println!("Prediction {prediction_id} deleted.");
            } else {
                anyhow::bail!("prediction {prediction_id} not found");
            }
        }
        Commands::Report { group, out } => {
            let filter = db::ListFilter {
                group: group.clone(),
                ..db::ListFilter::default()
            };
            let predictions = db::list_predictions(&pool, &filter).await?;
            let mut statistics = db::group_statistics(&pool).await?;
            if let Some(group) = group.as_deref() {
                statistics.retain(|stats| stats.group_name == group);
            }

            let report = report::build_report(group.as_deref(), &statistics, &predictions);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn report_rejected(rejected: &[Uuid]) {
    if rejected.is_empty() {
        return;
    }
    println!("{} students have grades outside the exam scale:", rejected.len());
    for student_id in rejected {
        println!("- {student_id}");
    }
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };

    let filter = tracing_subscriber::EnvFilter::try_from_env("PREDICTOR_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
