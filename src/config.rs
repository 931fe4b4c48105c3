//! Orchestrator configuration
//!
//! Thresholds and weights are fixed constants by default; every one can be
//! overridden through the environment so operators can tune them without
//! a rebuild.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Confidence assigned to any pattern-table match
pub const PATTERN_MATCH_CONFIDENCE: f64 = 0.85;

/// Generative classifications at or below this confidence are discarded
pub const GENERATIVE_CONFIDENCE_FLOOR: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalThresholds {
    pub low_confidence: f64,
    pub high_value_transaction: f64,
    pub major_investment: f64,
}

impl Default for ApprovalThresholds {
    fn default() -> Self {
        Self {
            low_confidence: 0.6,
            high_value_transaction: 100_000.0,
            major_investment: 500_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CertificationWeights {
    pub policy_fail_penalty: f64,
    pub policy_warning_penalty: f64,
    pub agent_failure_penalty: f64,
}

impl Default for CertificationWeights {
    fn default() -> Self {
        Self {
            policy_fail_penalty: 0.35,
            policy_warning_penalty: 0.15,
            agent_failure_penalty: 0.25,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub approval: ApprovalThresholds,
    pub certification: CertificationWeights,

    /// Parent deadline for all agent tasks of one query
    pub task_deadline: Duration,
    /// Worker pool size for one parallel group
    pub max_concurrent_tasks: usize,
    pub max_tasks_per_plan: usize,

    pub risk_job_poll_interval: Duration,
    pub risk_job_wait_deadline: Duration,
    pub transaction_window_days: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            approval: ApprovalThresholds::default(),
            certification: CertificationWeights::default(),
            task_deadline: Duration::from_secs(30),
            max_concurrent_tasks: 4,
            max_tasks_per_plan: 16,
            risk_job_poll_interval: Duration::from_millis(500),
            risk_job_wait_deadline: Duration::from_secs(5),
            transaction_window_days: 30,
        }
    }
}

impl OrchestratorConfig {
    /// Defaults, overridden by any `ORCH_*` variables present
    pub fn from_env() -> Self {
        let mut config = Self::default();

        override_from_env("ORCH_LOW_CONFIDENCE_THRESHOLD", &mut config.approval.low_confidence);
        override_from_env("ORCH_HIGH_VALUE_TRANSACTION", &mut config.approval.high_value_transaction);
        override_from_env("ORCH_MAJOR_INVESTMENT", &mut config.approval.major_investment);
        override_from_env("ORCH_MAX_CONCURRENT_TASKS", &mut config.max_concurrent_tasks);
        override_from_env("ORCH_TRANSACTION_WINDOW_DAYS", &mut config.transaction_window_days);

        let mut deadline_secs = config.task_deadline.as_secs();
        override_from_env("ORCH_TASK_DEADLINE_SECS", &mut deadline_secs);
        config.task_deadline = Duration::from_secs(deadline_secs);

        let mut poll_ms = config.risk_job_poll_interval.as_millis() as u64;
        override_from_env("ORCH_RISK_JOB_POLL_MS", &mut poll_ms);
        config.risk_job_poll_interval = Duration::from_millis(poll_ms);

        let mut wait_secs = config.risk_job_wait_deadline.as_secs();
        override_from_env("ORCH_RISK_JOB_WAIT_SECS", &mut wait_secs);
        config.risk_job_wait_deadline = Duration::from_secs(wait_secs);

        config.max_concurrent_tasks = config.max_concurrent_tasks.max(1);
        config
    }
}

fn override_from_env<T: FromStr>(key: &str, target: &mut T) {
    let Ok(raw) = env::var(key) else {
        return;
    };

    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => warn!(key = key, value = %raw, "Ignoring unparsable configuration value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.approval.low_confidence, 0.6);
        assert_eq!(config.approval.high_value_transaction, 100_000.0);
        assert_eq!(config.approval.major_investment, 500_000.0);
        assert_eq!(config.certification.policy_fail_penalty, 0.35);
        assert_eq!(config.certification.policy_warning_penalty, 0.15);
        assert_eq!(config.certification.agent_failure_penalty, 0.25);
    }

    #[test]
    fn test_override_ignores_garbage() {
        let mut value = 4usize;
        env::set_var("ORCH_TEST_GARBAGE_VALUE", "not-a-number");
        override_from_env("ORCH_TEST_GARBAGE_VALUE", &mut value);
        assert_eq!(value, 4);

        env::set_var("ORCH_TEST_GOOD_VALUE", " 9 ");
        override_from_env("ORCH_TEST_GOOD_VALUE", &mut value);
        assert_eq!(value, 9);
    }
}
