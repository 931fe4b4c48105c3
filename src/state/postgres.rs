//! Postgres-backed financial data store
//!
//! Read-only queries against the finance schema. Runtime-checked queries
//! (no compile-time database needed).

use super::{FinancialDataStore, JobStatus, ModelRun, RiskJob, TransactionAggregate};
use crate::error::OrchestrationError;
use crate::Result;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct PgFinancialDataStore {
    pool: PgPool,
}

impl PgFinancialDataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)?;

        Ok(Self::new(pool))
    }
}

fn db_error(context: &str, e: sqlx::Error) -> OrchestrationError {
    OrchestrationError::DataStoreError(format!("{}: {}", context, e))
}

fn risk_job_from_row(row: &PgRow) -> Result<RiskJob> {
    let status: String = row.try_get("status")?;

    Ok(RiskJob {
        job_id: row.try_get("job_id")?,
        org_id: row.try_get("org_id")?,
        status: JobStatus::from_db(&status),
        params_hash: row.try_get::<Option<String>, _>("params_hash").ok().flatten(),
        result: row.try_get::<Option<serde_json::Value>, _>("result").ok().flatten(),
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait::async_trait]
impl FinancialDataStore for PgFinancialDataStore {
    async fn latest_model_run(&self, org_id: Uuid) -> Result<Option<ModelRun>> {
        let row = sqlx::query(
            r#"
            SELECT id::text AS id, org_id, summary, completed_at
            FROM financial_model_runs
            WHERE org_id = $1 AND status = 'completed' AND summary IS NOT NULL
            ORDER BY completed_at DESC
            LIMIT 1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load latest model run", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(ModelRun {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            summary: row.try_get("summary")?,
            completed_at: row.try_get("completed_at")?,
        }))
    }

    async fn latest_risk_job(&self, org_id: Uuid) -> Result<Option<RiskJob>> {
        let row = sqlx::query(
            r#"
            SELECT job_id::text AS job_id, org_id, status, params_hash, result, created_at
            FROM risk_simulation_jobs
            WHERE org_id = $1 AND job_type = 'monte_carlo'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load latest risk job", e))?;

        row.as_ref().map(risk_job_from_row).transpose()
    }

    async fn risk_job(&self, job_id: &str) -> Result<Option<RiskJob>> {
        let row = sqlx::query(
            r#"
            SELECT job_id::text AS job_id, org_id, status, params_hash, result, created_at
            FROM risk_simulation_jobs
            WHERE job_id::text = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to poll risk job", e))?;

        row.as_ref().map(risk_job_from_row).transpose()
    }

    async fn transaction_aggregate(&self, org_id: Uuid, window_days: u32) -> Result<TransactionAggregate> {
        let row = sqlx::query(
            r#"
            SELECT
              COALESCE(SUM(CASE WHEN amount > 0 THEN amount ELSE 0 END), 0)::float8 AS inflow,
              COALESCE(SUM(CASE WHEN amount < 0 THEN -amount ELSE 0 END), 0)::float8 AS outflow,
              COUNT(*) AS transaction_count
            FROM transactions
            WHERE org_id = $1 AND occurred_at >= NOW() - make_interval(days => $2)
            "#,
        )
        .bind(org_id)
        .bind(window_days as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to aggregate transactions", e))?;

        let count: i64 = row.try_get("transaction_count")?;

        Ok(TransactionAggregate {
            inflow: row.try_get("inflow")?,
            outflow: row.try_get("outflow")?,
            transaction_count: count.max(0) as u64,
        })
    }
}
