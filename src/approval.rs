//! Approval gate
//!
//! Information requests flow through; proposed actions above the value or
//! complexity thresholds stop for a human. Rules are checked in a fixed
//! precedence: every matching rule sets the flag, the first one names it.

use crate::config::ApprovalThresholds;
use crate::models::{Complexity, IntentClassification};

/// Intents that propose a transaction rather than ask for information
pub const ACTION_INTENTS: &[&str] = &["budget_change", "large_transfer", "mna_execution"];

pub fn is_action_intent(intent: &str) -> bool {
    ACTION_INTENTS.contains(&intent)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalDecision {
    pub required: bool,
    pub reason: Option<String>,
}

pub struct ApprovalGate {
    thresholds: ApprovalThresholds,
}

impl ApprovalGate {
    pub fn new(thresholds: ApprovalThresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(&self, intent: &IntentClassification) -> ApprovalDecision {
        let t = &self.thresholds;
        let action = is_action_intent(&intent.primary_intent);
        let amount = intent.amount();

        let mut reasons: Vec<String> = Vec::new();

        if intent.confidence < t.low_confidence {
            reasons.push(format!(
                "Low classification confidence ({:.2} < {:.2}); please confirm the request",
                intent.confidence, t.low_confidence
            ));
        }

        if let Some(amount) = amount.filter(|a| action && *a > t.high_value_transaction) {
            reasons.push(format!(
                "High-value {} of ${:.0} exceeds the ${:.0} approval threshold",
                intent.primary_intent, amount, t.high_value_transaction
            ));
        }

        if let Some(amount) = amount.filter(|a| action && *a > t.major_investment) {
            reasons.push(format!(
                "Major commitment of ${:.0} exceeds ${:.0}",
                amount, t.major_investment
            ));
        }

        if action && intent.complexity == Complexity::Complex {
            reasons.push(format!(
                "Complex {} requires human sign-off before execution",
                intent.primary_intent
            ));
        }

        ApprovalDecision {
            required: !reasons.is_empty(),
            reason: reasons.into_iter().next(),
        }
    }

    /// `(requires_approval, reason)`
    pub fn requires_approval(&self, intent: &IntentClassification) -> (bool, Option<String>) {
        let decision = self.evaluate(intent);
        (decision.required, decision.reason)
    }
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new(ApprovalThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentId;
    use serde_json::{json, Map};

    fn intent(name: &str, confidence: f64, amount: Option<f64>, complexity: Complexity) -> IntentClassification {
        let mut entities = Map::new();
        if let Some(amount) = amount {
            entities.insert("amount".to_string(), json!(amount));
        }
        IntentClassification {
            primary_intent: name.to_string(),
            confidence,
            entities,
            required_agents: vec![AgentId::Treasury],
            complexity,
        }
    }

    #[test]
    fn test_low_confidence_always_gates() {
        let gate = ApprovalGate::default();
        let (required, reason) = gate.requires_approval(&intent("general_query", 0.5, None, Complexity::Simple));
        assert!(required);
        assert!(reason.unwrap().contains("Low classification confidence"));
    }

    #[test]
    fn test_amount_gating_is_monotonic_for_action_intents() {
        let gate = ApprovalGate::default();
        let mut flipped = false;

        for amount in [10_000.0, 99_999.0, 100_000.0, 100_001.0, 250_000.0, 600_000.0, 5_000_000.0] {
            let (required, _) =
                gate.requires_approval(&intent("large_transfer", 0.85, Some(amount), Complexity::Moderate));
            if flipped {
                assert!(required, "gate reopened at {}", amount);
            }
            flipped |= required;
            assert_eq!(required, amount > 100_000.0);
        }
        assert!(flipped);
    }

    #[test]
    fn test_analysis_intents_never_gate_on_value_or_complexity() {
        let gate = ApprovalGate::default();
        for name in ["mna_analysis", "scenario_analysis", "cash_runway"] {
            let (required, reason) =
                gate.requires_approval(&intent(name, 0.85, Some(10_000_000.0), Complexity::Complex));
            assert!(!required, "{} should not gate", name);
            assert!(reason.is_none());
        }
    }

    #[test]
    fn test_first_matching_rule_names_the_reason() {
        let gate = ApprovalGate::default();

        let decision = gate.evaluate(&intent("mna_execution", 0.85, Some(2_000_000.0), Complexity::Complex));
        assert!(decision.required);
        assert!(decision.reason.unwrap().starts_with("High-value mna_execution"));

        let decision = gate.evaluate(&intent("mna_execution", 0.85, None, Complexity::Complex));
        assert!(decision.reason.unwrap().starts_with("Complex mna_execution"));
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let gate = ApprovalGate::new(ApprovalThresholds {
            high_value_transaction: 1_000.0,
            ..ApprovalThresholds::default()
        });
        let (required, _) = gate.requires_approval(&intent("budget_change", 0.85, Some(5_000.0), Complexity::Moderate));
        assert!(required);
    }
}
