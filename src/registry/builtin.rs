//! In-process reference agents
//!
//! Deterministic, computed from the shared baseline snapshot only.
//! LLM is NOT allowed here.

use super::{AgentParams, FinancialAgent};
use crate::config::ApprovalThresholds;
use crate::models::{AgentId, AgentResponse, BaselineSnapshot, Citation, PolicyStatus, Thought};
use crate::policy::{create_default_policy_engine, PolicyContext, PolicyEngine};
use crate::snapshot::heuristic_survival_probability;
use crate::synthesis::report::format_usd;
use crate::Result;
use chrono::Utc;
use uuid::Uuid;

/// Runway reported when the business is not burning cash
pub const RUNWAY_CAP_MONTHS: f64 = 120.0;

fn snapshot_confidence(snapshot: &BaselineSnapshot, with_data: f64, without_data: f64) -> f64 {
    if snapshot.has_real_data {
        with_data
    } else {
        without_data
    }
}

fn snapshot_citation(snapshot: &BaselineSnapshot, confidence: f64) -> Citation {
    let id = snapshot
        .model_run_id
        .clone()
        .unwrap_or_else(|| format!("org:{}", snapshot.org_id));

    Citation {
        source_type: "baseline_snapshot".to_string(),
        id,
        name: format!("Baseline snapshot ({})", snapshot.source),
        timestamp: Utc::now(),
        confidence,
        snippet: Some(format!(
            "cash={} revenue={} burn={}",
            format_usd(snapshot.cash_balance),
            format_usd(snapshot.monthly_revenue),
            format_usd(snapshot.monthly_burn)
        )),
    }
}

fn capped_runway(snapshot: &BaselineSnapshot) -> f64 {
    snapshot
        .runway_months()
        .map(|m| m.min(RUNWAY_CAP_MONTHS))
        .unwrap_or(RUNWAY_CAP_MONTHS)
}

//
// ================= Treasury =================
//

pub struct TreasuryAgent;

#[async_trait::async_trait]
impl FinancialAgent for TreasuryAgent {
    fn id(&self) -> AgentId {
        AgentId::Treasury
    }

    fn description(&self) -> &'static str {
        "Cash position, net burn and runway"
    }

    async fn execute(&self, _org_id: Uuid, _user_id: Uuid, params: &AgentParams) -> Result<AgentResponse> {
        let snapshot = params.baseline_snapshot.as_ref();
        let net_burn = snapshot.net_burn();
        let runway = capped_runway(snapshot);
        let confidence = snapshot_confidence(snapshot, 0.9, 0.5);

        let mut answer = if net_burn <= 0.0 {
            format!(
                "Cash-flow positive: revenue of {} covers burn of {}. Runway is not constrained (reported at the {:.0}-month cap).",
                format_usd(snapshot.monthly_revenue),
                format_usd(snapshot.monthly_burn),
                RUNWAY_CAP_MONTHS
            )
        } else {
            format!(
                "Net burn is {}/month against {} cash: {:.1} months of runway.",
                format_usd(net_burn),
                format_usd(snapshot.cash_balance),
                runway
            )
        };
        if !snapshot.has_real_data {
            answer.push_str(" Figures are provisional: no recorded financial data was found.");
        }

        let mut response = AgentResponse::completed(AgentId::Treasury, params.task_id, answer, confidence)
            .with_calculation("cashBalance", snapshot.cash_balance)
            .with_calculation("monthlyBurn", snapshot.monthly_burn)
            .with_calculation("monthlyRevenue", snapshot.monthly_revenue)
            .with_calculation("netBurn", net_burn)
            .with_calculation("runway", runway);

        response.recommendations.push(if runway < 6.0 {
            "Open bridge financing discussions and freeze discretionary spend now.".to_string()
        } else if runway < 12.0 {
            "Plan a raise or a burn reduction within the next two quarters.".to_string()
        } else {
            "Maintain current cash discipline; revisit runway monthly.".to_string()
        });
        response.data_sources.push(snapshot_citation(snapshot, confidence));

        Ok(response)
    }
}

//
// ================= Risk =================
//

pub struct RiskAgent;

#[async_trait::async_trait]
impl FinancialAgent for RiskAgent {
    fn id(&self) -> AgentId {
        AgentId::Risk
    }

    fn description(&self) -> &'static str {
        "Survival probability and downside scenarios"
    }

    async fn execute(&self, _org_id: Uuid, _user_id: Uuid, params: &AgentParams) -> Result<AgentResponse> {
        let snapshot = params.baseline_snapshot.as_ref();

        let (survival, method, confidence) = match snapshot.usable_survival_probability() {
            Some(p) => (p, "monte_carlo", 0.85),
            None => (
                heuristic_survival_probability(snapshot),
                "runway_heuristic",
                snapshot_confidence(snapshot, 0.7, 0.45),
            ),
        };

        let mut answer = format!(
            "Estimated survival probability is {:.0}% ({}).",
            survival * 100.0,
            method.replace('_', " ")
        );

        let mut response = AgentResponse::completed(AgentId::Risk, params.task_id, String::new(), confidence)
            .with_calculation("survivalProbability", survival)
            .with_calculation("runway", capped_runway(snapshot));

        if let Some(mc) = snapshot.monte_carlo.as_ref().filter(|mc| !mc.usable) {
            response.thoughts.push(Thought::new(
                Some(AgentId::Risk),
                format!("Monte-Carlo job {} not used: unfinished or inconsistent with runway", mc.job_id),
            ));
        }

        // Scenario stress works on a copy; the shared snapshot stays untouched.
        if let Some(change) = params.entity_f64("revenueChange").filter(|c| c.abs() < 1.0) {
            let stressed = BaselineSnapshot {
                monthly_revenue: snapshot.monthly_revenue * (1.0 + change),
                ..snapshot.clone()
            };
            let stressed_runway = capped_runway(&stressed);
            let stressed_survival = heuristic_survival_probability(&stressed);
            response = response
                .with_calculation("stressedRunway", stressed_runway)
                .with_calculation("stressedSurvivalProbability", stressed_survival);
            answer.push_str(&format!(
                " Under a {:+.0}% revenue change runway moves to {:.1} months (survival {:.0}%).",
                change * 100.0,
                stressed_runway,
                stressed_survival * 100.0
            ));
        }

        if survival < 0.8 {
            response
                .recommendations
                .push("Build a downside plan covering at least 12 months of net burn.".to_string());
        }

        response.answer = answer;
        response.data_sources.push(snapshot_citation(snapshot, confidence));
        if let Some(mc) = &snapshot.monte_carlo {
            response.data_sources.push(Citation {
                source_type: "risk_simulation".to_string(),
                id: mc.job_id.clone(),
                name: "Monte-Carlo survival simulation".to_string(),
                timestamp: Utc::now(),
                confidence: if mc.usable { 0.85 } else { 0.3 },
                snippet: mc.params_hash.as_ref().map(|h| format!("params_hash={}", h)),
            });
        }

        Ok(response)
    }
}

//
// ================= Forecasting =================
//

pub struct ForecastingAgent;

#[async_trait::async_trait]
impl FinancialAgent for ForecastingAgent {
    fn id(&self) -> AgentId {
        AgentId::Forecasting
    }

    fn description(&self) -> &'static str {
        "Revenue projection with confidence band"
    }

    async fn execute(&self, _org_id: Uuid, _user_id: Uuid, params: &AgentParams) -> Result<AgentResponse> {
        let snapshot = params.baseline_snapshot.as_ref();
        let horizon = params.entity_f64("months").unwrap_or(12.0);
        let growth = params.entity_f64("revenueChange").filter(|c| c.abs() < 1.0).unwrap_or(0.0);
        let band = if snapshot.has_real_data { 0.10 } else { 0.25 };
        let confidence = snapshot_confidence(snapshot, 0.8, 0.5);

        let projected = snapshot.monthly_revenue * (1.0 + growth);
        let low = projected * (1.0 - band);
        let high = projected * (1.0 + band);

        let mut response = AgentResponse::completed(
            AgentId::Forecasting,
            params.task_id,
            format!(
                "Projected monthly revenue over {:.0} months: {} (band {} to {}).",
                horizon,
                format_usd(projected),
                format_usd(low),
                format_usd(high)
            ),
            confidence,
        )
        .with_calculation("baselineRevenue", snapshot.monthly_revenue)
        .with_calculation("projectedMonthlyRevenue", projected)
        .with_calculation("forecastLow", low)
        .with_calculation("forecastHigh", high)
        .with_calculation("bandWidth", band)
        .with_calculation("horizonMonths", horizon);

        if params.intent() == "governance_override" {
            response.thoughts.push(Thought::new(
                Some(AgentId::Forecasting),
                "Manual adjustment requested; projection shown unadjusted pending governance sign-off",
            ));
        }
        response.data_sources.push(snapshot_citation(snapshot, confidence));

        Ok(response)
    }
}

//
// ================= Analytics =================
//

pub struct AnalyticsAgent;

#[async_trait::async_trait]
impl FinancialAgent for AnalyticsAgent {
    fn id(&self) -> AgentId {
        AgentId::Analytics
    }

    fn description(&self) -> &'static str {
        "General KPI overview"
    }

    async fn execute(&self, _org_id: Uuid, _user_id: Uuid, params: &AgentParams) -> Result<AgentResponse> {
        let snapshot = params.baseline_snapshot.as_ref();
        let confidence = snapshot_confidence(snapshot, 0.75, 0.4);

        let mut response = AgentResponse::completed(AgentId::Analytics, params.task_id, String::new(), confidence)
            .with_calculation("cashBalance", snapshot.cash_balance)
            .with_calculation("monthlyRevenue", snapshot.monthly_revenue)
            .with_calculation("monthlyBurn", snapshot.monthly_burn)
            .with_calculation("churnRate", snapshot.churn_rate);

        let mut lines = vec![format!(
            "Cash {}, revenue {}/month, burn {}/month.",
            format_usd(snapshot.cash_balance),
            format_usd(snapshot.monthly_revenue),
            format_usd(snapshot.monthly_burn)
        )];

        if snapshot.monthly_revenue > 0.0 {
            let burn_multiple = snapshot.net_burn().max(0.0) / snapshot.monthly_revenue;
            response = response.with_calculation("burnMultiple", burn_multiple);
            lines.push(format!("Burn multiple {:.2}.", burn_multiple));
        }
        if snapshot.cash_balance > 0.0 && snapshot.debt > 0.0 {
            let debt_to_cash = snapshot.debt / snapshot.cash_balance;
            response = response.with_calculation("debtToCash", debt_to_cash);
            lines.push(format!("Debt-to-cash {:.2}.", debt_to_cash));
        }
        if snapshot.churn_rate > 0.0 {
            lines.push(format!("Churn {:.1}%.", snapshot.churn_rate * 100.0));
        }

        response.answer = lines.join(" ");
        response.data_sources.push(snapshot_citation(snapshot, confidence));
        Ok(response)
    }
}

//
// ================= Compliance =================
//

pub struct ComplianceAgent {
    engine: PolicyEngine,
}

impl ComplianceAgent {
    pub fn new(engine: PolicyEngine) -> Self {
        Self { engine }
    }

    /// Dual authorization shares the approval gate's high-value threshold
    pub fn from_thresholds(thresholds: &ApprovalThresholds) -> Self {
        Self::new(create_default_policy_engine(thresholds.high_value_transaction))
    }
}

impl Default for ComplianceAgent {
    fn default() -> Self {
        Self::from_thresholds(&ApprovalThresholds::default())
    }
}

#[async_trait::async_trait]
impl FinancialAgent for ComplianceAgent {
    fn id(&self) -> AgentId {
        AgentId::Compliance
    }

    fn description(&self) -> &'static str {
        "Policy, governance and control mapping"
    }

    async fn execute(&self, _org_id: Uuid, _user_id: Uuid, params: &AgentParams) -> Result<AgentResponse> {
        let snapshot = params.baseline_snapshot.as_ref();
        let entities = params.entities();
        let ctx = PolicyContext {
            query_text: params.query_text(),
            intent: params.intent(),
            entities: &entities,
            snapshot,
        };

        let checks = self.engine.evaluate(&ctx);
        let triggered: Vec<_> = checks.iter().filter(|c| c.status != PolicyStatus::Pass).collect();
        let passed = checks.len() - triggered.len();

        let answer = if triggered.is_empty() {
            format!("All {} controls passed.", checks.len())
        } else {
            let detail: Vec<String> = triggered
                .iter()
                .map(|c| format!("{} [{}]: {}", c.policy, c.status, c.details))
                .collect();
            format!("{} control(s) triggered. {}", triggered.len(), detail.join("; "))
        };

        let mut response = AgentResponse::completed(AgentId::Compliance, params.task_id, answer, 0.9)
            .with_calculation("triggeredControls", triggered.len() as f64)
            .with_calculation(
                "policyPassRate",
                if checks.is_empty() { 1.0 } else { passed as f64 / checks.len() as f64 },
            );

        for check in &triggered {
            if check.status == PolicyStatus::Fail {
                response
                    .recommendations
                    .push(format!("Escalate {} to the finance controller before acting.", check.policy));
            }
        }
        response.policy_checks = checks;
        response.data_sources.push(snapshot_citation(snapshot, 0.9));

        Ok(response)
    }
}
