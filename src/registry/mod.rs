//! Agent trait and registry
//!
//! Every specialized agent is reached through one capability contract.
//! Agents are keyed by `AgentId`, so a lookup can only miss when an agent
//! was never registered, not because of a misspelt name.

use crate::config::OrchestratorConfig;
use crate::models::{AgentId, AgentResponse, BaselineSnapshot};
use crate::Result;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub mod builtin;
pub mod remote;

pub use builtin::{AnalyticsAgent, ComplianceAgent, ForecastingAgent, RiskAgent, TreasuryAgent};
pub use remote::{RemoteAgent, RemoteAgentClient};

/// Free-text agent names (from the generative classifier or remote callers)
/// mapped onto agent identifiers. Matched after normalization.
const AGENT_ALIASES: &[(&str, AgentId)] = &[
    ("treasury", AgentId::Treasury),
    ("cash", AgentId::Treasury),
    ("cash_management", AgentId::Treasury),
    ("liquidity", AgentId::Treasury),
    ("runway", AgentId::Treasury),
    ("forecasting", AgentId::Forecasting),
    ("forecast", AgentId::Forecasting),
    ("forecaster", AgentId::Forecasting),
    ("projection", AgentId::Forecasting),
    ("risk", AgentId::Risk),
    ("risk_management", AgentId::Risk),
    ("monte_carlo", AgentId::Risk),
    ("scenario", AgentId::Risk),
    ("analytics", AgentId::Analytics),
    ("analyst", AgentId::Analytics),
    ("general", AgentId::Analytics),
    ("reporting", AgentId::Analytics),
    ("compliance", AgentId::Compliance),
    ("governance", AgentId::Compliance),
    ("policy", AgentId::Compliance),
    ("audit", AgentId::Compliance),
    ("variance", AgentId::Variance),
    ("budget_variance", AgentId::Variance),
    ("fpa", AgentId::Variance),
    ("anomaly", AgentId::Anomaly),
    ("anomaly_detection", AgentId::Anomaly),
    ("fraud", AgentId::Anomaly),
    ("capital_allocation", AgentId::CapitalAllocation),
    ("capital", AgentId::CapitalAllocation),
    ("investment", AgentId::CapitalAllocation),
    ("allocation", AgentId::CapitalAllocation),
];

/// Resolve a free-text agent name. Unknown names fall back to analytics.
pub fn normalize_agent_name(raw: &str) -> AgentId {
    let mut key = raw.trim().to_lowercase().replace([' ', '-'], "_");
    for suffix in ["_agent", "_engine"] {
        if let Some(stripped) = key.strip_suffix(suffix) {
            key = stripped.to_string();
        }
    }

    AGENT_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, id)| *id)
        .unwrap_or(AgentId::Analytics)
}

/// Input handed to an agent: the task's own params plus the shared snapshot
#[derive(Debug, Clone)]
pub struct AgentParams {
    pub task_id: Uuid,
    pub params: Value,
    pub baseline_snapshot: Arc<BaselineSnapshot>,
}

impl AgentParams {
    pub fn query_text(&self) -> &str {
        self.params.get("query").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn intent(&self) -> &str {
        self.params.get("intent").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn entities(&self) -> Map<String, Value> {
        self.params
            .get("entities")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    pub fn entity_f64(&self, key: &str) -> Option<f64> {
        self.params
            .get("entities")
            .and_then(|e| e.get(key))
            .and_then(Value::as_f64)
    }

    /// `{...params, baselineSnapshot}` as a single JSON object
    pub fn merged(&self) -> Result<Value> {
        let mut merged = match &self.params {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other.clone());
                map
            }
        };
        merged.insert(
            "baselineSnapshot".to_string(),
            serde_json::to_value(self.baseline_snapshot.as_ref())?,
        );
        Ok(Value::Object(merged))
    }
}

/// Capability contract of a specialized agent.
///
/// Recoverable conditions should come back as a low-confidence response;
/// an `Err` is reserved for the unexpected and is isolated by the executor.
#[async_trait::async_trait]
pub trait FinancialAgent: Send + Sync {
    fn id(&self) -> AgentId;
    fn description(&self) -> &'static str;
    async fn execute(&self, org_id: Uuid, user_id: Uuid, params: &AgentParams) -> Result<AgentResponse>;
}

/// Registry for looking up agents by identifier
pub struct AgentRegistry {
    agents: HashMap<AgentId, Arc<dyn FinancialAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    pub fn register(&mut self, agent: Arc<dyn FinancialAgent>) {
        self.agents.insert(agent.id(), agent);
    }

    pub fn get(&self, id: AgentId) -> Option<Arc<dyn FinancialAgent>> {
        self.agents.get(&id).cloned()
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.agents.contains_key(&id)
    }

    pub fn list(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.agents.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with the in-process reference agents only
pub fn builtin_registry(config: &OrchestratorConfig) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(TreasuryAgent));
    registry.register(Arc::new(RiskAgent));
    registry.register(Arc::new(ForecastingAgent));
    registry.register(Arc::new(AnalyticsAgent));
    registry.register(Arc::new(ComplianceAgent::from_thresholds(&config.approval)));
    registry
}

/// Reference agents plus the HTTP-backed agents when a financial API is configured.
pub fn create_default_registry(config: &OrchestratorConfig) -> AgentRegistry {
    let mut registry = builtin_registry(config);

    if let Some(api) = RemoteAgentClient::from_env() {
        registry.register(Arc::new(RemoteAgent::new(
            AgentId::Variance,
            "Budget-vs-actual variance and driver decomposition",
            api.clone(),
        )));
        registry.register(Arc::new(RemoteAgent::new(
            AgentId::Anomaly,
            "Anomaly and structural-break detection on ledger series",
            api.clone(),
        )));
        registry.register(Arc::new(RemoteAgent::new(
            AgentId::CapitalAllocation,
            "Capital allocation and investment prioritisation",
            api,
        )));
    }

    registry
}
