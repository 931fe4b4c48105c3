//! Policy engine for governance and compliance controls
//!
//! Rules-based evaluation, deterministic, no LLM involvement.
//! Each rule reports pass / warning / fail for one control.

use crate::models::{BaselineSnapshot, PolicyCheck, PolicyStatus};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::info;

lazy_static! {
    static ref MANUAL_ADJUSTMENT: Regex =
        Regex::new(r"(?i)\b(manual(ly)?|override|overrid(e|ing)|hand[- ]?adjust|bump|haircut|plug)\b")
            .expect("manual adjustment pattern is valid");
}

/// Everything a rule may look at
pub struct PolicyContext<'a> {
    pub query_text: &'a str,
    pub intent: &'a str,
    pub entities: &'a Map<String, Value>,
    pub snapshot: &'a BaselineSnapshot,
}

impl PolicyContext<'_> {
    fn entity_f64(&self, key: &str) -> Option<f64> {
        self.entities.get(key).and_then(Value::as_f64)
    }
}

pub struct RuleOutcome {
    pub status: PolicyStatus,
    pub details: String,
}

impl RuleOutcome {
    fn new(status: PolicyStatus, details: impl Into<String>) -> Self {
        Self {
            status,
            details: details.into(),
        }
    }
}

/// Trait for policy rules
pub trait PolicyRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, ctx: &PolicyContext<'_>) -> RuleOutcome;
}

/// Evaluates every registered rule in registration order
pub struct PolicyEngine {
    rules: Vec<Box<dyn PolicyRule>>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn PolicyRule>) {
        self.rules.push(rule);
    }

    pub fn evaluate(&self, ctx: &PolicyContext<'_>) -> Vec<PolicyCheck> {
        let checks: Vec<PolicyCheck> = self
            .rules
            .iter()
            .map(|rule| {
                let outcome = rule.evaluate(ctx);
                PolicyCheck {
                    policy: rule.name().to_string(),
                    status: outcome.status,
                    details: outcome.details,
                }
            })
            .collect();

        info!(
            rule_count = self.rules.len(),
            triggered = checks.iter().filter(|c| c.status != PolicyStatus::Pass).count(),
            "Policy evaluation completed"
        );

        checks
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Rules =================
//

/// Manual overrides of forecasts or plans beyond a tolerated deviation
pub struct StrategicDeviationRule {
    pub fail_above_pct: f64,
    pub warn_above_pct: f64,
}

impl Default for StrategicDeviationRule {
    fn default() -> Self {
        Self {
            fail_above_pct: 15.0,
            warn_above_pct: 5.0,
        }
    }
}

impl PolicyRule for StrategicDeviationRule {
    fn name(&self) -> &'static str {
        "strategic_deviation"
    }

    fn evaluate(&self, ctx: &PolicyContext<'_>) -> RuleOutcome {
        let manual = MANUAL_ADJUSTMENT.is_match(ctx.query_text) || ctx.intent == "governance_override";
        let Some(pct) = ctx.entity_f64("percentage").filter(|_| manual) else {
            return RuleOutcome::new(PolicyStatus::Pass, "No manual adjustment requested");
        };

        if pct > self.fail_above_pct {
            RuleOutcome::new(
                PolicyStatus::Fail,
                format!(
                    "Control triggered: manual adjustment of {:.1}% exceeds the {:.0}% strategic-deviation threshold",
                    pct, self.fail_above_pct
                ),
            )
        } else if pct > self.warn_above_pct {
            RuleOutcome::new(
                PolicyStatus::Warning,
                format!(
                    "Manual adjustment of {:.1}% requires documented rationale (above {:.0}%)",
                    pct, self.warn_above_pct
                ),
            )
        } else {
            RuleOutcome::new(
                PolicyStatus::Pass,
                format!("Manual adjustment of {:.1}% within tolerance", pct),
            )
        }
    }
}

/// Minimum months of runway before liquidity is flagged
pub struct LiquidityFloorRule {
    pub fail_below_months: f64,
    pub warn_below_months: f64,
}

impl Default for LiquidityFloorRule {
    fn default() -> Self {
        Self {
            fail_below_months: 6.0,
            warn_below_months: 12.0,
        }
    }
}

impl PolicyRule for LiquidityFloorRule {
    fn name(&self) -> &'static str {
        "liquidity_floor"
    }

    fn evaluate(&self, ctx: &PolicyContext<'_>) -> RuleOutcome {
        match ctx.snapshot.runway_months() {
            None => RuleOutcome::new(PolicyStatus::Pass, "Not burning cash; liquidity floor not at risk"),
            Some(m) if m < self.fail_below_months => RuleOutcome::new(
                PolicyStatus::Fail,
                format!("Runway of {:.1} months is below the {:.0}-month floor", m, self.fail_below_months),
            ),
            Some(m) if m < self.warn_below_months => RuleOutcome::new(
                PolicyStatus::Warning,
                format!("Runway of {:.1} months is below the {:.0}-month target", m, self.warn_below_months),
            ),
            Some(m) => RuleOutcome::new(PolicyStatus::Pass, format!("Runway of {:.1} months", m)),
        }
    }
}

/// Figures must trace back to recorded financial data
pub struct DataProvenanceRule;

impl PolicyRule for DataProvenanceRule {
    fn name(&self) -> &'static str {
        "data_provenance"
    }

    fn evaluate(&self, ctx: &PolicyContext<'_>) -> RuleOutcome {
        if ctx.snapshot.has_real_data {
            RuleOutcome::new(
                PolicyStatus::Pass,
                format!("Baseline sourced from {}", ctx.snapshot.source),
            )
        } else {
            RuleOutcome::new(
                PolicyStatus::Warning,
                format!("No recorded financial data behind the baseline ({})", ctx.snapshot.source),
            )
        }
    }
}

/// Large transactions need a second approver
pub struct DualAuthorizationRule {
    pub threshold: f64,
}

impl PolicyRule for DualAuthorizationRule {
    fn name(&self) -> &'static str {
        "dual_authorization"
    }

    fn evaluate(&self, ctx: &PolicyContext<'_>) -> RuleOutcome {
        match ctx.entity_f64("amount") {
            Some(amount) if amount > self.threshold => RuleOutcome::new(
                PolicyStatus::Warning,
                format!(
                    "Amount of ${:.0} exceeds ${:.0}; dual authorization required",
                    amount, self.threshold
                ),
            ),
            _ => RuleOutcome::new(PolicyStatus::Pass, "No amount above the dual-authorization limit"),
        }
    }
}

/// Create a policy engine with the standard controls
pub fn create_default_policy_engine(high_value_transaction: f64) -> PolicyEngine {
    let mut engine = PolicyEngine::new();
    engine.add_rule(Box::new(StrategicDeviationRule::default()));
    engine.add_rule(Box::new(LiquidityFloorRule::default()));
    engine.add_rule(Box::new(DataProvenanceRule));
    engine.add_rule(Box::new(DualAuthorizationRule {
        threshold: high_value_transaction,
    }));
    engine
}
