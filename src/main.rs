use std::collections::BTreeSet;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use axum_prometheus::PrometheusMetricLayer;
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tracing::info;

use scholarship_ranking::config::AppConfig;
use scholarship_ranking::error::AppError;
use scholarship_ranking::ranking::{
    distribution, ranking_router, sheet, Application, ApplicationId, ApplicationStatus,
    InMemoryRankingRepository, QuotaTable, Ranking, RankingId, RankingService, ReviewStatus,
    Semester,
};
use scholarship_ranking::telemetry;

#[derive(Clone)]
struct ServerState {
    readiness: Arc<AtomicBool>,
    metrics: PrometheusHandle,
}

#[derive(Parser, Debug)]
#[command(
    name = "Scholarship Ranking Service",
    about = "Run the scholarship ranking and distribution service, or execute a distribution offline",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run the distribution engine against sheets on disk and print the report
    Distribute(DistributeArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct DistributeArgs {
    /// Ranking sheet in the export format (Rank, Student ID, Name, College, ...)
    #[arg(long)]
    ranking_csv: PathBuf,
    /// Quota sheet (Sub-type, College, Quota)
    #[arg(long)]
    quota_csv: PathBuf,
    /// Sub-type code of the ranking list
    #[arg(long, default_value = "general")]
    sub_type: String,
    /// Academic year of the ranking list
    #[arg(long, default_value_t = 113)]
    academic_year: u16,
    /// Semester (1 or 2)
    #[arg(long, default_value_t = 1)]
    semester: u8,
    /// Include the rejected list in the output
    #[arg(long)]
    list_rejected: bool,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => run_server(args).await,
        Command::Distribute(args) => run_distribution_report(args),
    }
}

async fn run_server(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let mut quotas = QuotaTable::new();
    if let Some(path) = &config.quota_sheet {
        let file = File::open(path)?;
        for row in sheet::parse_quota_rows(file)? {
            quotas.set(row.sub_type, row.college, row.quota);
        }
    }

    let repository = Arc::new(InMemoryRankingRepository::new());
    let service = Arc::new(RankingService::new(repository, quotas));

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let state = ServerState {
        readiness: readiness_flag.clone(),
        metrics: prometheus_handle,
    };

    let app = Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
        .merge(ranking_router(service))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "scholarship ranking service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(State(state): State<ServerState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

async fn metrics_endpoint(State(state): State<ServerState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

fn run_distribution_report(args: DistributeArgs) -> Result<(), AppError> {
    let DistributeArgs {
        ranking_csv,
        quota_csv,
        sub_type,
        academic_year,
        semester,
        list_rejected,
    } = args;

    let semester = if semester == 2 {
        Semester::Second
    } else {
        Semester::First
    };

    let mut quotas = QuotaTable::new();
    for row in sheet::parse_quota_rows(File::open(quota_csv)?)? {
        quotas.set(row.sub_type, row.college, row.quota);
    }

    let rows = sheet::parse_export_rows(File::open(ranking_csv)?)?;
    let total_quota = quotas.total_quota(&sub_type).unwrap_or(0);
    let mut ranking = Ranking::new(RankingId(1), &sub_type, academic_year, semester, total_quota);
    for (index, row) in rows.iter().enumerate() {
        ranking.push_application(application_from_row(index as u64 + 1, row));
    }
    let order: Vec<ApplicationId> = sorted_by_rank(&rows);
    ranking
        .apply_order(&order)
        .map_err(scholarship_ranking::ranking::RankingServiceError::from)?;

    let result = distribution::run(&ranking, &quotas)
        .map_err(scholarship_ranking::ranking::RankingServiceError::from)?;

    println!("Distribution report");
    println!(
        "Ranking: sub-type '{sub_type}', year {academic_year}, {}",
        semester.label()
    );
    println!("Applications: {}", ranking.items.len());

    for cell in &result.cells {
        println!(
            "\n[{} / {}] quota {}, demand {}",
            cell.sub_type, cell.college, cell.quota, cell.demand
        );
        if cell.admitted.is_empty() {
            println!("  admitted: none");
        } else {
            for entry in &cell.admitted {
                println!(
                    "  admitted: rank {} {} ({})",
                    entry.rank_position, entry.student_name, entry.student_id
                );
            }
        }
        for entry in &cell.backup {
            println!(
                "  backup #{}: rank {} {} ({})",
                entry.backup_position, entry.rank_position, entry.student_name, entry.student_id
            );
        }
    }

    println!(
        "\nTotals: {} admitted, {} backup, {} rejected",
        result.admitted_total(),
        result.backup_total(),
        result.rejected.len()
    );

    if list_rejected && !result.rejected.is_empty() {
        println!("\nRejected");
        for entry in &result.rejected {
            println!(
                "- rank {} {} ({}): {}",
                entry.rank_position,
                entry.student_name,
                entry.student_id,
                entry.reason.label()
            );
        }
    }

    Ok(())
}

fn application_from_row(id: u64, row: &sheet::ExportRow) -> Application {
    let eligible_subtypes: BTreeSet<String> = row
        .eligible_subtypes
        .split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect();
    Application {
        id: ApplicationId(id),
        app_id: format!("APP-{id:04}"),
        student_name: row.student_name.clone(),
        student_id: row.student_id.clone(),
        academy_code: row.college.clone(),
        academy_name: row.college.clone(),
        department_code: row.department.clone(),
        department_name: row.department.clone(),
        scholarship_type: "offline".to_string(),
        eligible_subtypes,
        status: ApplicationStatus::from_label(&row.status).unwrap_or(ApplicationStatus::Submitted),
        review_status: ReviewStatus::Recommended,
    }
}

fn sorted_by_rank(rows: &[sheet::ExportRow]) -> Vec<ApplicationId> {
    let mut indexed: Vec<(u32, u64)> = rows
        .iter()
        .enumerate()
        .map(|(index, row)| (row.rank_position, index as u64 + 1))
        .collect();
    indexed.sort_by_key(|(rank, _)| *rank);
    indexed
        .into_iter()
        .map(|(_, id)| ApplicationId(id))
        .collect()
}
