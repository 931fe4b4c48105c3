//! Follow-up suggestions, keyed by intent

use crate::models::IntentClassification;
use std::collections::BTreeMap;

const FOLLOW_UPS: &[(&str, &[&str])] = &[
    (
        "cash_runway",
        &[
            "What happens to runway if revenue drops 20%?",
            "Which expenses drive most of our burn?",
            "What is our survival probability over the next 12 months?",
        ],
    ),
    (
        "scenario_analysis",
        &[
            "How does the downside case change our hiring plan?",
            "What revenue growth keeps runway above 18 months?",
            "Which scenario has the highest survival probability?",
        ],
    ),
    (
        "revenue_forecast",
        &[
            "How confident is this forecast versus last quarter's actuals?",
            "What are the main drivers of the forecast band?",
            "How does the forecast affect our runway?",
        ],
    ),
    (
        "risk_assessment",
        &[
            "What would raise our survival probability above 90%?",
            "Run a stress test with revenue down 30%.",
            "Which covenants are closest to breach?",
        ],
    ),
    (
        "governance_override",
        &[
            "Who needs to sign off on this forecast adjustment?",
            "Show the forecast without the manual override.",
            "Which controls did this adjustment trigger?",
        ],
    ),
    (
        "budget_change",
        &[
            "How does this budget change affect runway?",
            "Which departments are over budget this quarter?",
            "What is the approval path for this change?",
        ],
    ),
    (
        "large_transfer",
        &[
            "What is our cash position after this transfer?",
            "Does this transfer require dual authorization?",
            "Show recent transfers above $100,000.",
        ],
    ),
    (
        "mna_analysis",
        &[
            "How would this acquisition change our runway?",
            "What synergies are needed to break even?",
            "What is the downside risk if integration slips two quarters?",
        ],
    ),
    (
        "mna_execution",
        &[
            "What approvals are still outstanding for this deal?",
            "How does closing change our cash position?",
            "What are the key integration risks?",
        ],
    ),
    (
        "variance_analysis",
        &[
            "Which line items explain most of the variance?",
            "Is this variance a trend or a one-off?",
            "How should we re-forecast given this variance?",
        ],
    ),
    (
        "anomaly_detection",
        &[
            "Show the transactions behind this anomaly.",
            "Has this pattern appeared before?",
            "Should this anomaly trigger a control review?",
        ],
    ),
    (
        "compliance_check",
        &[
            "Which controls failed and who owns them?",
            "What is our liquidity floor status?",
            "Show the audit trail for the last approval.",
        ],
    ),
    (
        "capital_allocation",
        &[
            "Which investment has the best payback period?",
            "How much capital can we deploy without dropping below 12 months runway?",
            "Compare these options against paying down debt.",
        ],
    ),
    (
        "financial_health",
        &[
            "How has our burn multiple trended over the last two quarters?",
            "What is our cash runway?",
            "Where are we most exposed to risk?",
        ],
    ),
];

const GENERIC_FOLLOW_UPS: &[&str] = &[
    "What is our current cash runway?",
    "How is revenue tracking against forecast?",
    "Are there any compliance issues I should know about?",
];

pub fn generic_follow_ups() -> Vec<String> {
    GENERIC_FOLLOW_UPS.iter().map(|s| s.to_string()).collect()
}

/// Suggested next questions for a classified query
pub fn generate_follow_ups(intent: &IntentClassification, calculations: &BTreeMap<String, f64>) -> Vec<String> {
    let mut follow_ups: Vec<String> = FOLLOW_UPS
        .iter()
        .find(|(name, _)| *name == intent.primary_intent)
        .map(|(_, questions)| questions.iter().map(|q| q.to_string()).collect())
        .unwrap_or_else(generic_follow_ups);

    // Short runway makes the survival question the most urgent one
    if calculations.get("runway").is_some_and(|r| *r < 6.0) {
        let urgent = "How do we extend runway beyond 12 months?".to_string();
        if !follow_ups.contains(&urgent) {
            follow_ups.insert(0, urgent);
            follow_ups.truncate(3);
        }
    }

    follow_ups
}
