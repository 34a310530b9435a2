// src/main.rs
use anyhow::{Context, Result};
use axum::http::StatusCode as AxumStatusCode;
use axum::{
    extract::{Path, State},
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use chrono::NaiveDate;
use clap::Parser;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{env, net::SocketAddr, sync::Arc};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

mod collaborators;
mod model;
mod posting;
mod schedule;
mod store;
mod workflow;


use collaborators::{
    Clock, ComputationError, FixedSalaryComputation, LogApprovalMailer, LogNotificationService,
    SalaryComputation, StaticApproverDirectory,
};
use model::{CutoffSchedule, PeriodTotals, ScheduleKind};
use posting::{LedgerError, PostingLedger};
use schedule::{generate_periods, ScheduleError, DEFAULT_PERIOD_COUNT};
use store::PayrollStore;
use workflow::{CutoffWorkflow, TransitionAction, TransitionOutcome, WorkflowError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    #[error("schedule {0} not found")]
    ScheduleNotFound(String),
    #[error("employee-period link {0} not found")]
    LinkNotFound(String),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Computation(#[from] ComputationError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        error!("Request failed: {:?}", self);
        let status = match &self {
            AppError::TlsConfig(_) => AxumStatusCode::INTERNAL_SERVER_ERROR,
            AppError::ScheduleNotFound(_) | AppError::LinkNotFound(_) => AxumStatusCode::NOT_FOUND,
            AppError::Schedule(_) => AxumStatusCode::UNPROCESSABLE_ENTITY,
            AppError::Workflow(workflow_err) => match workflow_err {
                WorkflowError::PeriodNotFound(_)
                | WorkflowError::Ledger(LedgerError::PeriodNotFound(_)) => {
                    AxumStatusCode::NOT_FOUND
                }
                _ => AxumStatusCode::UNPROCESSABLE_ENTITY,
            },
            AppError::Computation(comp_err) => match comp_err {
                ComputationError::NoComputation(_) => AxumStatusCode::NOT_FOUND,
                ComputationError::Failed(_) => AxumStatusCode::BAD_GATEWAY,
            },
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "payday-core",
    about = "Payroll cutoff scheduling and ledger service"
)]
struct CliArgs {
    /// Port to bind the HTTP server on.
    #[arg(long, default_value_t = 3000)]
    port: u16,
}

#[derive(Clone)]
pub struct AppState {
    pub store: PayrollStore,
    pub workflow: CutoffWorkflow,
    pub computation: Arc<dyn SalaryComputation>,
    pub clock: Clock,
}

// --- API payloads ---

#[derive(Debug, Deserialize)]
struct CreateScheduleRequest {
    id: Option<String>,
    company_id: String,
    #[serde(flatten)]
    kind: ScheduleKind,
    release_offset_days: u32,
}

#[derive(Debug, Default, Deserialize)]
struct GeneratePeriodsRequest {
    reference_date: Option<NaiveDate>,
    count: Option<usize>,
}

#[derive(Debug, Serialize)]
struct GeneratePeriodsResponse {
    schedule_id: String,
    generated: usize,
    inserted: usize,
}

#[derive(Debug, Deserialize)]
struct TransitionRequest {
    action: TransitionAction,
    actor_id: String,
    remarks: Option<String>,
}

#[derive(Debug, Serialize)]
struct PeriodTotalsResponse {
    period_id: String,
    status: model::CutoffStatus,
    totals: Option<PeriodTotals>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Setting tracing subscriber failed")?;
    info!("Tracing subscriber initialized.");

    let args = CliArgs::parse();

    let store = PayrollStore::new();
    let clock = Clock::system();

    let directory = StaticApproverDirectory::new();
    configure_approval_chain_from_env(&directory);

    // In-process stand-in until the external computation service is wired up.
    let computation: Arc<dyn SalaryComputation> = Arc::new(FixedSalaryComputation::new());

    let ledger = PostingLedger::new(store.clone(), clock.clone());
    let workflow = CutoffWorkflow::new(
        store.clone(),
        ledger,
        Arc::new(directory),
        Arc::new(LogNotificationService),
        Arc::new(LogApprovalMailer),
        clock.clone(),
    );
    info!("Payroll core initialized.");

    let app_state = AppState {
        store,
        workflow,
        computation,
        clock,
    };

    let api_routes = Router::new()
        .route("/schedules", post(handle_create_schedule))
        .route(
            "/schedules/{id}/periods/generate",
            post(handle_generate_periods),
        )
        .route("/periods/{id}/totals", get(handle_period_totals))
        .route("/periods/{id}/transition", post(handle_transition))
        .route("/links/{id}/recompute", post(handle_recompute));
    let app = Router::new()
        .nest("/api", api_routes)
        .route("/status", get(handle_status))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    match load_tls_config().await? {
        Some(tls_config) => {
            info!("Starting server on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
                .context("HTTPS server failed")?;
        }
        None => {
            info!(
                "CERT_PATH/KEY_PATH not set; starting plain HTTP server on http://{}",
                addr
            );
            axum_server::bind(addr)
                .serve(app.into_make_service())
                .await
                .context("HTTP server failed")?;
        }
    }

    Ok(())
}

/// Approval chain from the environment, e.g.
/// `APPROVAL_CHAIN="1=alice,bob;2=carol"` for the company in `COMPANY_ID`.
fn configure_approval_chain_from_env(directory: &StaticApproverDirectory) {
    let company_id = env::var("COMPANY_ID").unwrap_or_else(|_| "default".to_string());
    let Ok(raw_chain) = env::var("APPROVAL_CHAIN") else {
        info!("APPROVAL_CHAIN not set; approvals require manual override.");
        return;
    };
    for (level, approvers) in parse_approval_chain(&raw_chain) {
        let approver_refs: Vec<&str> = approvers.iter().map(String::as_str).collect();
        directory.configure_level(&company_id, level, &approver_refs);
        info!(
            "Configured approval level {} for company {}: {:?}",
            level, company_id, approvers
        );
    }
}

fn parse_approval_chain(raw: &str) -> Vec<(u32, Vec<String>)> {
    raw.split(';')
        .filter_map(|part| {
            let (level, accounts) = part.split_once('=')?;
            let level: u32 = level.trim().parse().ok()?;
            let accounts: Vec<String> = accounts
                .split(',')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            if level == 0 || accounts.is_empty() {
                None
            } else {
                Some((level, accounts))
            }
        })
        .collect()
}

async fn load_tls_config() -> Result<Option<RustlsConfig>, AppError> {
    let (Ok(cert_path), Ok(key_path)) = (env::var("CERT_PATH"), env::var("KEY_PATH")) else {
        return Ok(None);
    };
    RustlsConfig::from_pem_file(&cert_path, &key_path)
        .await
        .map(Some)
        .map_err(|e| AppError::TlsConfig(format!("Failed to load TLS cert/key: {}", e)))
}

// --- Handlers ---

async fn handle_create_schedule(
    State(state): State<AppState>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<Json<CutoffSchedule>, AppError> {
    let schedule = CutoffSchedule {
        id: request.id.unwrap_or_else(|| generated_id("SCHED")),
        company_id: request.company_id,
        kind: request.kind,
        release_offset_days: request.release_offset_days,
        deleted: false,
    };
    schedule::validate_schedule(&schedule)?;
    info!("Creating schedule {}", schedule.id);
    state.store.upsert_schedule(schedule.clone());
    Ok(Json(schedule))
}

async fn handle_generate_periods(
    State(state): State<AppState>,
    Path(schedule_id): Path<String>,
    request: Option<Json<GeneratePeriodsRequest>>,
) -> Result<Json<GeneratePeriodsResponse>, AppError> {
    let Json(request) = request.unwrap_or_default();
    let schedule = state
        .store
        .schedule(&schedule_id)
        .ok_or_else(|| AppError::ScheduleNotFound(schedule_id.clone()))?;

    let reference_date = request
        .reference_date
        .unwrap_or_else(|| state.clock.today());
    let count = request.count.unwrap_or(DEFAULT_PERIOD_COUNT);
    let periods = generate_periods(&schedule, reference_date, count)?;
    let generated = periods.len();
    let inserted = state.store.sync_periods(periods);

    Ok(Json(GeneratePeriodsResponse {
        schedule_id,
        generated,
        inserted,
    }))
}

async fn handle_period_totals(
    State(state): State<AppState>,
    Path(period_id): Path<String>,
) -> Result<Json<PeriodTotalsResponse>, AppError> {
    let period = state
        .store
        .period(&period_id)
        .ok_or(WorkflowError::PeriodNotFound(period_id))?;
    Ok(Json(PeriodTotalsResponse {
        period_id: period.id,
        status: period.status,
        totals: period.totals,
    }))
}

async fn handle_transition(
    State(state): State<AppState>,
    Path(period_id): Path<String>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<TransitionOutcome>, AppError> {
    let outcome = state.workflow.transition(
        &period_id,
        request.action,
        &request.actor_id,
        request.remarks,
    )?;
    Ok(Json(outcome))
}

async fn handle_recompute(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
) -> Result<Json<model::SalaryRecord>, AppError> {
    let link = state
        .store
        .employee_link(&link_id)
        .ok_or_else(|| AppError::LinkNotFound(link_id.clone()))?;
    state.workflow.ensure_recompute_allowed(&link.period_id)?;
    let record = state.computation.compute(&link).await?;
    state.store.attach_salary_record(&link_id, record.clone());
    info!(
        "Recomputed salary record {} for employee {} on period {}",
        record.id, record.employee_id, record.period_id
    );
    Ok(Json(record))
}

async fn handle_status(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let schedule_count = state.store.schedules.lock().unwrap().len();
    let period_count = state.store.periods.lock().unwrap().len();
    let link_count = state.store.employee_links.lock().unwrap().len();
    let plan_count = state.store.plans.lock().unwrap().len();
    let ledger_rows = state.store.deduction_ledger.lock().unwrap().len()
        + state.store.allowance_ledger.lock().unwrap().len();
    let government_rows = state.store.government_records.lock().unwrap().len();

    let html_body = format!(
        "<h1>Server Status</h1><p>Current Time (Server): {}</p><hr>\
         <p>Schedules: {}</p>\
         <p>Cutoff Periods: {}</p>\
         <p>Employee-Period Links: {}</p>\
         <p>Balance Plans: {}</p>\
         <p>Ledger Entries: {}</p>\
         <p>Government Payment Records: {}</p>",
        state.clock.now(),
        schedule_count,
        period_count,
        link_count,
        plan_count,
        ledger_rows,
        government_rows
    );
    Ok(Html(html_body))
}

fn generated_id(prefix: &str) -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("{}-{}", prefix, suffix)
}
