//! Financial data store (read side)
//!
//! The orchestrator only reads: latest completed model run, latest risk
//! simulation job, and recent transaction aggregates.
//! In-memory for development and tests; Postgres in production.

use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

pub mod postgres;
pub use postgres::PgFinancialDataStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelRun {
    pub id: String,
    pub org_id: Uuid,
    /// Stored summary; field names are not normalized upstream
    pub summary: Value,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "queued" | "pending" => JobStatus::Queued,
            "running" | "in_progress" => JobStatus::Running,
            "completed" | "done" | "succeeded" => JobStatus::Completed,
            _ => JobStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskJob {
    pub job_id: String,
    pub org_id: Uuid,
    pub status: JobStatus,
    pub params_hash: Option<String>,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TransactionAggregate {
    pub inflow: f64,
    pub outflow: f64,
    pub transaction_count: u64,
}

/// Trait for the persistent financial data store
#[async_trait::async_trait]
pub trait FinancialDataStore: Send + Sync {
    /// Most recent model run with status completed
    async fn latest_model_run(&self, org_id: Uuid) -> Result<Option<ModelRun>>;
    /// Most recent Monte-Carlo job, whatever its status
    async fn latest_risk_job(&self, org_id: Uuid) -> Result<Option<RiskJob>>;
    async fn risk_job(&self, job_id: &str) -> Result<Option<RiskJob>>;
    async fn transaction_aggregate(&self, org_id: Uuid, window_days: u32) -> Result<TransactionAggregate>;
}

#[derive(Debug, Clone)]
struct TransactionRecord {
    org_id: Uuid,
    amount: f64,
    occurred_at: DateTime<Utc>,
}

/// In-memory data store for development and tests
pub struct InMemoryFinancialDataStore {
    model_runs: Arc<RwLock<HashMap<Uuid, Vec<ModelRun>>>>,
    risk_jobs: Arc<RwLock<HashMap<String, RiskJob>>>,
    transactions: Arc<RwLock<Vec<TransactionRecord>>>,
}

impl InMemoryFinancialDataStore {
    pub fn new() -> Self {
        Self {
            model_runs: Arc::new(RwLock::new(HashMap::new())),
            risk_jobs: Arc::new(RwLock::new(HashMap::new())),
            transactions: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn insert_model_run(&self, run: ModelRun) {
        let mut runs = self.model_runs.write().await;
        runs.entry(run.org_id).or_insert_with(Vec::new).push(run);
    }

    /// Insert or replace a job (keyed by job id)
    pub async fn upsert_risk_job(&self, job: RiskJob) {
        let mut jobs = self.risk_jobs.write().await;
        jobs.insert(job.job_id.clone(), job);
    }

    /// Positive amounts are inflows, negative amounts outflows
    pub async fn insert_transaction(&self, org_id: Uuid, amount: f64, occurred_at: DateTime<Utc>) {
        let mut transactions = self.transactions.write().await;
        transactions.push(TransactionRecord {
            org_id,
            amount,
            occurred_at,
        });
    }
}

impl Default for InMemoryFinancialDataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl FinancialDataStore for InMemoryFinancialDataStore {
    async fn latest_model_run(&self, org_id: Uuid) -> Result<Option<ModelRun>> {
        let runs = self.model_runs.read().await;

        Ok(runs
            .get(&org_id)
            .and_then(|runs| runs.iter().max_by_key(|r| r.completed_at))
            .cloned())
    }

    async fn latest_risk_job(&self, org_id: Uuid) -> Result<Option<RiskJob>> {
        let jobs = self.risk_jobs.read().await;

        Ok(jobs
            .values()
            .filter(|job| job.org_id == org_id)
            .max_by_key(|job| job.created_at)
            .cloned())
    }

    async fn risk_job(&self, job_id: &str) -> Result<Option<RiskJob>> {
        let jobs = self.risk_jobs.read().await;
        Ok(jobs.get(job_id).cloned())
    }

    async fn transaction_aggregate(&self, org_id: Uuid, window_days: u32) -> Result<TransactionAggregate> {
        let since = Utc::now() - Duration::days(i64::from(window_days));
        let transactions = self.transactions.read().await;

        let aggregate = transactions
            .iter()
            .filter(|t| t.org_id == org_id && t.occurred_at >= since)
            .fold(TransactionAggregate::default(), |mut acc, t| {
                if t.amount >= 0.0 {
                    acc.inflow += t.amount;
                } else {
                    acc.outflow += -t.amount;
                }
                acc.transaction_count += 1;
                acc
            });

        Ok(aggregate)
    }
}

/// Postgres when `DATABASE_URL` is set and valid, otherwise an empty in-memory store
pub fn build_data_store() -> Arc<dyn FinancialDataStore> {
    let database_url = env::var("POSTGRES_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok();

    if let Some(url) = database_url {
        match PgFinancialDataStore::connect_lazy(&url) {
            Ok(store) => {
                info!("Financial data store backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres data store, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Financial data store backend: in-memory");
    Arc::new(InMemoryFinancialDataStore::new())
}
