//! Baseline snapshot builder
//!
//! Produces the single financial baseline shared by every agent of a query.
//! Preference: latest completed model run, then a 30-day transaction
//! aggregate. A Monte-Carlo survival estimate is attached when the latest
//! risk job finishes in time and agrees with the runway heuristic.
//! Never fails: errors degrade to `SnapshotSource::SnapshotError`.

use crate::config::OrchestratorConfig;
use crate::models::{BaselineSnapshot, MonteCarloEstimate, SnapshotSource};
use crate::state::{FinancialDataStore, JobStatus, ModelRun, RiskJob};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CASH_KEYS: &[&str] = &["cashBalance", "cash_balance", "cash", "endingCash", "ending_cash", "closingCash"];
const REVENUE_KEYS: &[&str] = &["monthlyRevenue", "monthly_revenue", "revenue", "mrr", "totalRevenue", "total_revenue"];
const BURN_KEYS: &[&str] = &["monthlyBurn", "monthly_burn", "burnRate", "burn_rate", "burn", "monthlyExpenses", "expenses"];
const OPEX_KEYS: &[&str] = &["opex", "operatingExpenses", "operating_expenses", "monthlyOpex"];
const DEBT_KEYS: &[&str] = &["debt", "totalDebt", "total_debt", "liabilities"];
const CHURN_KEYS: &[&str] = &["churnRate", "churn_rate", "churn", "monthlyChurn"];

/// Nested objects inside a model-run summary that may hold the metrics
const SUMMARY_SCOPES: &[&str] = &["metrics", "summary", "kpis"];

/// Paths at which a risk job may report survival probability
const SURVIVAL_PATHS: &[&[&str]] = &[
    &["survivalProbability"],
    &["survival_probability"],
    &["probabilityOfSurvival"],
    &["percentiles", "survivalProbability"],
    &["percentiles", "survival_probability"],
    &["summary", "survivalProbability"],
    &["summary", "survival_probability"],
    &["metrics", "survival_probability"],
    &["results", "survivalProbability"],
];

/// Paths reporting the complement (probability of running out of cash)
const RUIN_PATHS: &[&[&str]] = &[
    &["probabilityOfRuin"],
    &["ruin_probability"],
    &["percentiles", "probabilityOfRuin"],
];

/// Maximum distance between Monte-Carlo and heuristic before the former is distrusted
const MONTE_CARLO_TOLERANCE: f64 = 0.2;

/// Survival probability implied by runway alone
pub fn heuristic_survival_probability(snapshot: &BaselineSnapshot) -> f64 {
    match snapshot.runway_months() {
        Some(months) if months <= 12.0 => 0.78,
        _ => 0.95,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse::<f64>()
            .ok(),
        _ => None,
    }
}

/// First non-null value for the first key that has one, top level before nested scopes
fn read_metric(summary: &Value, keys: &[&str]) -> Option<f64> {
    let scopes: Vec<&Value> = std::iter::once(summary)
        .chain(SUMMARY_SCOPES.iter().filter_map(|scope| summary.get(*scope)))
        .collect();

    keys.iter().find_map(|key| {
        scopes
            .iter()
            .find_map(|scope| scope.get(*key).and_then(as_number))
    })
}

fn read_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}

/// Probability in [0, 1]; percentages are scaled down
fn normalize_probability(raw: f64) -> Option<f64> {
    match raw {
        p if (0.0..=1.0).contains(&p) => Some(p),
        p if p > 1.0 && p <= 100.0 => Some(p / 100.0),
        _ => None,
    }
}

pub fn extract_survival_probability(result: &Value) -> Option<f64> {
    let direct = SURVIVAL_PATHS
        .iter()
        .find_map(|path| read_path(result, path).and_then(as_number))
        .and_then(normalize_probability);

    direct.or_else(|| {
        RUIN_PATHS
            .iter()
            .find_map(|path| read_path(result, path).and_then(as_number))
            .and_then(normalize_probability)
            .map(|ruin| 1.0 - ruin)
    })
}

fn snapshot_from_model_run(org_id: Uuid, run: &ModelRun) -> BaselineSnapshot {
    let summary = &run.summary;
    let cash_balance = read_metric(summary, CASH_KEYS).unwrap_or(0.0);
    let monthly_revenue = read_metric(summary, REVENUE_KEYS).unwrap_or(0.0);
    let monthly_burn = read_metric(summary, BURN_KEYS).unwrap_or(0.0);
    let churn = read_metric(summary, CHURN_KEYS).unwrap_or(0.0);

    BaselineSnapshot {
        org_id,
        cash_balance,
        monthly_revenue,
        monthly_burn,
        opex: read_metric(summary, OPEX_KEYS).unwrap_or(monthly_burn),
        debt: read_metric(summary, DEBT_KEYS).unwrap_or(0.0),
        churn_rate: if churn > 1.0 { churn / 100.0 } else { churn },
        model_run_id: Some(run.id.clone()),
        monte_carlo: None,
        has_real_data: cash_balance != 0.0 || monthly_revenue != 0.0 || monthly_burn != 0.0,
        source: SnapshotSource::ModelRun,
    }
}

pub struct SnapshotBuilder {
    store: Arc<dyn FinancialDataStore>,
    poll_interval: Duration,
    wait_deadline: Duration,
    transaction_window_days: u32,
}

impl SnapshotBuilder {
    pub fn new(store: Arc<dyn FinancialDataStore>, config: &OrchestratorConfig) -> Self {
        Self {
            store,
            poll_interval: config.risk_job_poll_interval,
            wait_deadline: config.risk_job_wait_deadline,
            transaction_window_days: config.transaction_window_days.max(1),
        }
    }

    /// Build the baseline for one query. Never fails.
    pub async fn build_snapshot(&self, org_id: Uuid) -> Arc<BaselineSnapshot> {
        let snapshot = match self.try_build(org_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(org_id = %org_id, error = %e, "Snapshot build failed, degrading");
                BaselineSnapshot::empty(org_id, SnapshotSource::SnapshotError)
            }
        };

        info!(
            org_id = %org_id,
            source = %snapshot.source,
            has_real_data = snapshot.has_real_data,
            monte_carlo_usable = snapshot.usable_survival_probability().is_some(),
            "Baseline snapshot built"
        );

        Arc::new(snapshot)
    }

    async fn try_build(&self, org_id: Uuid) -> Result<BaselineSnapshot> {
        let mut snapshot = match self.store.latest_model_run(org_id).await? {
            Some(run) => snapshot_from_model_run(org_id, &run),
            None => BaselineSnapshot::empty(org_id, SnapshotSource::ModelRun),
        };

        if snapshot.cash_balance == 0.0 && snapshot.monthly_revenue == 0.0 && snapshot.monthly_burn == 0.0 {
            debug!(org_id = %org_id, "No usable model run, falling back to transactions");

            let aggregate = self
                .store
                .transaction_aggregate(org_id, self.transaction_window_days)
                .await?;
            let monthly_factor = 30.0 / f64::from(self.transaction_window_days);

            snapshot.monthly_revenue = aggregate.inflow * monthly_factor;
            snapshot.monthly_burn = aggregate.outflow * monthly_factor;
            snapshot.opex = snapshot.monthly_burn;
            snapshot.has_real_data = aggregate.transaction_count > 0;
            snapshot.source = SnapshotSource::TransactionsFallback;
        }

        snapshot.monte_carlo = self.monte_carlo_estimate(&snapshot).await;
        Ok(snapshot)
    }

    async fn monte_carlo_estimate(&self, snapshot: &BaselineSnapshot) -> Option<MonteCarloEstimate> {
        let job = match self.store.latest_risk_job(snapshot.org_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return None,
            Err(e) => {
                warn!(org_id = %snapshot.org_id, error = %e, "Risk job lookup failed");
                return None;
            }
        };

        let job = if job.status.is_pending() {
            self.await_job(job).await
        } else {
            job
        };

        match job.status {
            JobStatus::Completed => {
                let survival = job.result.as_ref().and_then(extract_survival_probability)?;
                let heuristic = heuristic_survival_probability(snapshot);
                let usable = (survival - heuristic).abs() <= MONTE_CARLO_TOLERANCE;

                if !usable {
                    warn!(
                        job_id = %job.job_id,
                        survival = survival,
                        heuristic = heuristic,
                        "Monte-Carlo survival inconsistent with runway heuristic"
                    );
                }

                Some(MonteCarloEstimate {
                    job_id: job.job_id,
                    params_hash: job.params_hash,
                    survival_probability: Some(survival),
                    usable,
                })
            }
            JobStatus::Queued | JobStatus::Running => Some(MonteCarloEstimate {
                job_id: job.job_id,
                params_hash: job.params_hash,
                survival_probability: None,
                usable: false,
            }),
            JobStatus::Failed => None,
        }
    }

    /// Poll a pending job until it settles or the wall-clock deadline passes
    async fn await_job(&self, job: RiskJob) -> RiskJob {
        let deadline = Instant::now() + self.wait_deadline;
        let mut current = job;

        while current.status.is_pending() {
            let now = Instant::now();
            if now >= deadline {
                warn!(job_id = %current.job_id, "Risk job still pending at deadline");
                break;
            }

            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;

            match self.store.risk_job(&current.job_id).await {
                Ok(Some(next)) => current = next,
                Ok(None) => break,
                Err(e) => {
                    warn!(job_id = %current.job_id, error = %e, "Risk job poll failed");
                    break;
                }
            }
        }

        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestrationError;
    use crate::state::{InMemoryFinancialDataStore, TransactionAggregate};
    use chrono::Utc;
    use serde_json::json;

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            risk_job_poll_interval: Duration::from_millis(10),
            risk_job_wait_deadline: Duration::from_millis(300),
            ..OrchestratorConfig::default()
        }
    }

    fn model_run(org_id: Uuid, summary: Value) -> ModelRun {
        ModelRun {
            id: "run-42".to_string(),
            org_id,
            summary,
            completed_at: Utc::now(),
        }
    }

    fn risk_job(org_id: Uuid, status: JobStatus, result: Option<Value>) -> RiskJob {
        RiskJob {
            job_id: "mc-7".to_string(),
            org_id,
            status,
            params_hash: Some("abc123".to_string()),
            result,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_read_metric_synonyms_and_nesting() {
        let summary = json!({
            "cash": null,
            "ending_cash": "$1,250,000",
            "metrics": { "mrr": 80000 },
            "burn_rate": 95000.5
        });

        assert_eq!(read_metric(&summary, CASH_KEYS), Some(1_250_000.0));
        assert_eq!(read_metric(&summary, REVENUE_KEYS), Some(80_000.0));
        assert_eq!(read_metric(&summary, BURN_KEYS), Some(95_000.5));
        assert_eq!(read_metric(&summary, DEBT_KEYS), None);
    }

    #[test]
    fn test_extract_survival_shapes() {
        assert_eq!(extract_survival_probability(&json!({ "survivalProbability": 0.9 })), Some(0.9));
        assert_eq!(
            extract_survival_probability(&json!({ "percentiles": { "survival_probability": 87 } })),
            Some(0.87)
        );
        let from_ruin = extract_survival_probability(&json!({ "probabilityOfRuin": 0.25 })).unwrap();
        assert!((from_ruin - 0.75).abs() < 1e-9);
        assert_eq!(extract_survival_probability(&json!({ "p50": 1.0 })), None);
    }

    #[tokio::test]
    async fn test_model_run_snapshot_with_usable_monte_carlo() {
        let store = Arc::new(InMemoryFinancialDataStore::new());
        let org_id = Uuid::new_v4();
        store
            .insert_model_run(model_run(
                org_id,
                json!({ "cashBalance": 500000, "monthlyRevenue": 60000, "monthlyBurn": 80000, "churnRate": 3 }),
            ))
            .await;
        store
            .upsert_risk_job(risk_job(org_id, JobStatus::Completed, Some(json!({ "survivalProbability": 0.9 }))))
            .await;

        let builder = SnapshotBuilder::new(store, &fast_config());
        let snapshot = builder.build_snapshot(org_id).await;

        assert_eq!(snapshot.source, SnapshotSource::ModelRun);
        assert!(snapshot.has_real_data);
        assert_eq!(snapshot.model_run_id.as_deref(), Some("run-42"));
        assert_eq!(snapshot.churn_rate, 0.03);
        // runway 25 months → heuristic 0.95, within tolerance of 0.9
        assert_eq!(snapshot.usable_survival_probability(), Some(0.9));
    }

    #[tokio::test]
    async fn test_outlier_monte_carlo_is_distrusted() {
        let store = Arc::new(InMemoryFinancialDataStore::new());
        let org_id = Uuid::new_v4();
        store
            .insert_model_run(model_run(
                org_id,
                json!({ "cashBalance": 500000, "monthlyRevenue": 60000, "monthlyBurn": 80000 }),
            ))
            .await;
        store
            .upsert_risk_job(risk_job(org_id, JobStatus::Completed, Some(json!({ "survivalProbability": 0.4 }))))
            .await;

        let snapshot = SnapshotBuilder::new(store, &fast_config()).build_snapshot(org_id).await;
        let mc = snapshot.monte_carlo.as_ref().unwrap();
        assert!(!mc.usable);
        assert_eq!(snapshot.usable_survival_probability(), None);
    }

    #[tokio::test]
    async fn test_transactions_fallback() {
        let store = Arc::new(InMemoryFinancialDataStore::new());
        let org_id = Uuid::new_v4();
        store.insert_transaction(org_id, 30_000.0, Utc::now()).await;
        store.insert_transaction(org_id, -70_000.0, Utc::now()).await;

        let snapshot = SnapshotBuilder::new(store, &fast_config()).build_snapshot(org_id).await;

        assert_eq!(snapshot.source, SnapshotSource::TransactionsFallback);
        assert_eq!(snapshot.monthly_burn, 70_000.0);
        assert_eq!(snapshot.monthly_revenue, 30_000.0);
        assert!(snapshot.has_real_data);
        assert!(snapshot.model_run_id.is_none());
    }

    #[tokio::test]
    async fn test_pending_job_polled_until_completion() {
        let store = Arc::new(InMemoryFinancialDataStore::new());
        let org_id = Uuid::new_v4();
        store
            .insert_model_run(model_run(
                org_id,
                json!({ "cashBalance": 500000, "monthlyRevenue": 60000, "monthlyBurn": 80000 }),
            ))
            .await;
        store.upsert_risk_job(risk_job(org_id, JobStatus::Running, None)).await;

        let finisher = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            finisher
                .upsert_risk_job(risk_job(org_id, JobStatus::Completed, Some(json!({ "survival_probability": 0.93 }))))
                .await;
        });

        let snapshot = SnapshotBuilder::new(store, &fast_config()).build_snapshot(org_id).await;
        assert_eq!(snapshot.usable_survival_probability(), Some(0.93));
    }

    #[tokio::test]
    async fn test_job_still_running_at_deadline_is_not_usable() {
        let store = Arc::new(InMemoryFinancialDataStore::new());
        let org_id = Uuid::new_v4();
        store.upsert_risk_job(risk_job(org_id, JobStatus::Running, None)).await;

        let config = OrchestratorConfig {
            risk_job_poll_interval: Duration::from_millis(10),
            risk_job_wait_deadline: Duration::from_millis(50),
            ..OrchestratorConfig::default()
        };
        let started = std::time::Instant::now();
        let snapshot = SnapshotBuilder::new(store, &config).build_snapshot(org_id).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        let mc = snapshot.monte_carlo.as_ref().unwrap();
        assert!(!mc.usable);
        assert!(mc.survival_probability.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_is_deterministic() {
        let store = Arc::new(InMemoryFinancialDataStore::new());
        let org_id = Uuid::new_v4();
        store
            .insert_model_run(model_run(org_id, json!({ "cash": 900000, "revenue": 120000, "burn": 150000 })))
            .await;

        let builder = SnapshotBuilder::new(store, &fast_config());
        let first = builder.build_snapshot(org_id).await;
        let second = builder.build_snapshot(org_id).await;
        assert_eq!(*first, *second);
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl FinancialDataStore for FailingStore {
        async fn latest_model_run(&self, _org_id: Uuid) -> Result<Option<ModelRun>> {
            Err(OrchestrationError::DataStoreError("connection refused".to_string()))
        }
        async fn latest_risk_job(&self, _org_id: Uuid) -> Result<Option<RiskJob>> {
            Ok(None)
        }
        async fn risk_job(&self, _job_id: &str) -> Result<Option<RiskJob>> {
            Ok(None)
        }
        async fn transaction_aggregate(&self, _org_id: Uuid, _window_days: u32) -> Result<TransactionAggregate> {
            Ok(TransactionAggregate::default())
        }
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_snapshot_error() {
        let snapshot = SnapshotBuilder::new(Arc::new(FailingStore), &fast_config())
            .build_snapshot(Uuid::new_v4())
            .await;

        assert_eq!(snapshot.source, SnapshotSource::SnapshotError);
        assert!(!snapshot.has_real_data);
    }
}
