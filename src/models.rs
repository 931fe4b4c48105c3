//! Core data models for the finance query orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

/// Identifier of a specialized analysis agent.
///
/// The set is closed: the registry, the plan builder and the synthesizer all
/// match on it exhaustively, so adding an agent is a compile-time change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    Treasury,
    Forecasting,
    Risk,
    Analytics,
    Compliance,
    Variance,
    Anomaly,
    CapitalAllocation,
}

impl AgentId {
    pub const ALL: [AgentId; 8] = [
        AgentId::Treasury,
        AgentId::Forecasting,
        AgentId::Risk,
        AgentId::Analytics,
        AgentId::Compliance,
        AgentId::Variance,
        AgentId::Anomaly,
        AgentId::CapitalAllocation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::Treasury => "treasury",
            AgentId::Forecasting => "forecasting",
            AgentId::Risk => "risk",
            AgentId::Analytics => "analytics",
            AgentId::Compliance => "compliance",
            AgentId::Variance => "variance",
            AgentId::Anomaly => "anomaly",
            AgentId::CapitalAllocation => "capital_allocation",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AgentId::Treasury => "Treasury",
            AgentId::Forecasting => "Forecasting",
            AgentId::Risk => "Risk",
            AgentId::Analytics => "Analytics",
            AgentId::Compliance => "Compliance",
            AgentId::Variance => "Variance",
            AgentId::Anomaly => "Anomaly Detection",
            AgentId::CapitalAllocation => "Capital Allocation",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    ModelRun,
    TransactionsFallback,
    SnapshotError,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatus {
    Pass,
    Warning,
    Fail,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificationStatus {
    InstitutionalGrade,
    Conditional,
    NotInstitutional,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    WaitingApproval,
    Degraded,
}

/// How the final narrative was produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisStrategy {
    Deterministic,
    Generative,
}

//
// ================= Query =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Query {
    pub query_id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub text: String,
    pub context: Option<Value>,
    pub received_at: DateTime<Utc>,
}

impl Query {
    pub fn new(org_id: Uuid, user_id: Uuid, text: impl Into<String>, context: Option<Value>) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            org_id,
            user_id,
            text: text.into(),
            context,
            received_at: Utc::now(),
        }
    }
}

//
// ================= Intent =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentClassification {
    pub primary_intent: String,
    pub confidence: f64,
    pub entities: Map<String, Value>,
    /// Ordered, duplicate-free
    pub required_agents: Vec<AgentId>,
    pub complexity: Complexity,
}

impl IntentClassification {
    pub fn entity_f64(&self, key: &str) -> Option<f64> {
        self.entities.get(key).and_then(Value::as_f64)
    }

    /// Monetary amount extracted from the query, if any
    pub fn amount(&self) -> Option<f64> {
        self.entity_f64("amount")
    }
}

//
// ================= Plan =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTask {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub description: String,
    pub params: Value,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionPlan {
    pub id: Uuid,
    pub query: Query,
    pub intent: IntentClassification,
    pub tasks: Vec<AgentTask>,
    pub execution_order: Vec<Uuid>,
    pub parallel_groups: Vec<Vec<Uuid>>,
    pub requires_approval: bool,
    pub approval_reason: Option<String>,
}

impl ExecutionPlan {
    pub fn task(&self, task_id: Uuid) -> Option<&AgentTask> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_descriptions(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.description.clone()).collect()
    }
}

//
// ================= Baseline Snapshot =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonteCarloEstimate {
    pub job_id: String,
    pub params_hash: Option<String>,
    /// `None` when the job had not finished by the polling deadline
    pub survival_probability: Option<f64>,
    pub usable: bool,
}

/// The one financial baseline every agent in a query reads.
///
/// Built once, then shared behind an `Arc`; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaselineSnapshot {
    pub org_id: Uuid,
    pub cash_balance: f64,
    pub monthly_revenue: f64,
    pub monthly_burn: f64,
    pub opex: f64,
    pub debt: f64,
    pub churn_rate: f64,
    pub model_run_id: Option<String>,
    pub monte_carlo: Option<MonteCarloEstimate>,
    pub has_real_data: bool,
    pub source: SnapshotSource,
}

impl BaselineSnapshot {
    pub fn empty(org_id: Uuid, source: SnapshotSource) -> Self {
        Self {
            org_id,
            cash_balance: 0.0,
            monthly_revenue: 0.0,
            monthly_burn: 0.0,
            opex: 0.0,
            debt: 0.0,
            churn_rate: 0.0,
            model_run_id: None,
            monte_carlo: None,
            has_real_data: false,
            source,
        }
    }

    /// Burn net of revenue; negative when cash-flow positive
    pub fn net_burn(&self) -> f64 {
        self.monthly_burn - self.monthly_revenue
    }

    /// Months of runway, `None` when the business is not burning cash
    pub fn runway_months(&self) -> Option<f64> {
        let net_burn = self.net_burn();
        if net_burn <= 0.0 {
            None
        } else {
            Some(self.cash_balance / net_burn)
        }
    }

    /// Monte-Carlo survival probability, only when it passed the sanity check
    pub fn usable_survival_probability(&self) -> Option<f64> {
        self.monte_carlo
            .as_ref()
            .filter(|mc| mc.usable)
            .and_then(|mc| mc.survival_probability)
    }
}

//
// ================= Agent Output =================
//

/// Provenance record for a figure that entered the answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    #[serde(rename = "type")]
    pub source_type: String,
    pub id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thought {
    pub agent_id: Option<AgentId>,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl Thought {
    pub fn new(agent_id: Option<AgentId>, content: impl Into<String>) -> Self {
        Self {
            agent_id,
            content: content.into(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyCheck {
    pub policy: String,
    pub status: PolicyStatus,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResponse {
    pub agent_id: AgentId,
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub answer: String,
    pub confidence: f64,
    #[serde(default)]
    pub calculations: BTreeMap<String, f64>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub data_sources: Vec<Citation>,
    #[serde(default)]
    pub thoughts: Vec<Thought>,
    #[serde(default)]
    pub policy_checks: Vec<PolicyCheck>,
}

impl AgentResponse {
    pub fn completed(agent_id: AgentId, task_id: Uuid, answer: impl Into<String>, confidence: f64) -> Self {
        Self {
            agent_id,
            task_id,
            status: TaskStatus::Completed,
            answer: answer.into(),
            confidence,
            calculations: BTreeMap::new(),
            recommendations: Vec::new(),
            data_sources: Vec::new(),
            thoughts: Vec::new(),
            policy_checks: Vec::new(),
        }
    }

    pub fn with_calculation(mut self, key: &str, value: f64) -> Self {
        self.calculations.insert(key.to_string(), value);
        self
    }

    pub fn calculation(&self, key: &str) -> Option<f64> {
        self.calculations.get(key).copied()
    }
}

//
// ================= Synthesis Output =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Certification {
    pub maturity_score: f64,
    pub policy_adherence_score: f64,
    pub data_quality_score: f64,
    pub overall_status: CertificationStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    FinancialIntegrity,
    ForecastValidation,
    VarianceDrivers,
    ModelGovernance,
    CapitalAllocation,
    AnomalyDetection,
    PolicyCompliance,
    LiquiditySurvival,
    DataQuality,
    AuditAppendix,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportSection {
    pub kind: SectionKind,
    pub title: String,
    pub body: String,
    /// False when the section carries only a fallback sentence
    pub has_data: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub plan_id: Uuid,
    pub reason: String,
    pub planned_task_descriptions: Vec<String>,
}

//
// ================= Final Result =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub query_id: Uuid,
    pub status: ResponseStatus,
    pub answer: String,
    pub confidence: f64,
    pub intent: Option<IntentClassification>,
    pub plan: Option<ExecutionPlan>,
    pub requires_approval: bool,
    pub approval: Option<ApprovalRequest>,
    pub agent_responses: Vec<AgentResponse>,
    pub calculations: BTreeMap<String, f64>,
    pub data_sources: Vec<Citation>,
    pub thoughts: Vec<Thought>,
    pub sections: Vec<ReportSection>,
    pub certification: Option<Certification>,
    pub synthesis: Option<SynthesisStrategy>,
    pub follow_ups: Vec<String>,
    pub execution_time_ms: u64,
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicyStatus::Pass => "PASS",
            PolicyStatus::Warning => "WARNING",
            PolicyStatus::Fail => "FAIL",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SnapshotSource::ModelRun => "model_run",
            SnapshotSource::TransactionsFallback => "transactions_fallback",
            SnapshotSource::SnapshotError => "snapshot_error",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for CertificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CertificationStatus::InstitutionalGrade => "INSTITUTIONAL_GRADE",
            CertificationStatus::Conditional => "CONDITIONAL",
            CertificationStatus::NotInstitutional => "NOT_INSTITUTIONAL",
        };
        write!(f, "{}", s)
    }
}
