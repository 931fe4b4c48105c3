//! Response synthesizer
//!
//! Sections and certification are always computed deterministically. The
//! strategy only decides who writes the narrative: a fixed template, or the
//! completion service with the template as its fallback.

pub mod certification;
pub mod report;

use crate::audit::compute_snapshot_hash;
use crate::completion::CompletionService;
use crate::config::CertificationWeights;
use crate::error::OrchestrationError;
use crate::execution::ExecutionReport;
use crate::models::{
    AgentResponse, BaselineSnapshot, Certification, Citation, Complexity, ExecutionPlan, ReportSection,
    SynthesisStrategy, Thought,
};
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use report::{build_sections, format_usd, render_sections, section_title, ReportContext, SECTION_ORDER};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Metrics every agent reads from the same baseline; the last writer wins
pub const SHARED_METRICS: &[&str] = &[
    "runway",
    "netBurn",
    "survivalProbability",
    "cashBalance",
    "monthlyBurn",
    "monthlyRevenue",
];

lazy_static! {
    static ref EXPLANATORY_RE: Regex = Regex::new(r"(?i)\b(why|how|explain)\b").expect("strategy pattern must compile");
}

pub fn select_strategy(query_text: &str, complexity: Complexity) -> SynthesisStrategy {
    if complexity == Complexity::Complex || EXPLANATORY_RE.is_match(query_text) {
        SynthesisStrategy::Generative
    } else {
        SynthesisStrategy::Deterministic
    }
}

/// Union of all calculations. Shared metrics are last-wins; any other
/// colliding key is kept under `{agent}.{key}` instead of overwriting.
pub fn aggregate_calculations(responses: &[AgentResponse]) -> BTreeMap<String, f64> {
    let mut merged = BTreeMap::new();

    for response in responses {
        for (key, value) in &response.calculations {
            if SHARED_METRICS.contains(&key.as_str()) || !merged.contains_key(key) {
                merged.insert(key.clone(), *value);
            } else {
                merged.insert(format!("{}.{}", response.agent_id, key), *value);
            }
        }
    }

    merged
}

/// Citations of all agents, first occurrence of each `(type, id)` kept
fn collect_citations(responses: &[AgentResponse]) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    for citation in responses.iter().flat_map(|r| r.data_sources.iter()) {
        if !citations
            .iter()
            .any(|c| c.source_type == citation.source_type && c.id == citation.id)
        {
            citations.push(citation.clone());
        }
    }
    citations
}

#[derive(Debug, Clone)]
pub struct Synthesis {
    pub answer: String,
    pub confidence: f64,
    pub strategy: SynthesisStrategy,
    pub sections: Vec<ReportSection>,
    pub certification: Certification,
    pub calculations: BTreeMap<String, f64>,
    pub data_sources: Vec<Citation>,
    pub thoughts: Vec<Thought>,
}

const NARRATIVE_SYSTEM_PROMPT: &str = "You are the reporting layer of a CFO assistant. \
Write the answer to the user's question from the structured agent output you are given. \
Use only figures present in that output and never invent numbers. \
Follow the section inventory provided, in order, but omit any section whose \
`hasData` is false or that carries no material data. \
Open with a two-sentence direct answer, then the sections as short paragraphs. \
State the certification status verbatim.";

pub struct ResponseSynthesizer {
    completion: Option<Arc<dyn CompletionService>>,
    weights: CertificationWeights,
}

impl ResponseSynthesizer {
    pub fn new(completion: Option<Arc<dyn CompletionService>>, weights: CertificationWeights) -> Self {
        Self { completion, weights }
    }

    pub async fn synthesize(
        &self,
        plan: &ExecutionPlan,
        snapshot: &BaselineSnapshot,
        execution: &ExecutionReport,
    ) -> Synthesis {
        let responses = execution.responses();
        let certification = certification::certify(
            &responses,
            execution.failed_agents().len(),
            snapshot,
            &self.weights,
        );
        let snapshot_hash = compute_snapshot_hash(snapshot);

        let sections = build_sections(&ReportContext {
            snapshot,
            responses: &responses,
            execution,
            certification: &certification,
            snapshot_hash: &snapshot_hash,
        });

        let mut thoughts = execution.thoughts.clone();
        let deterministic = deterministic_answer(&responses, snapshot, &certification, &sections);

        let requested = select_strategy(&plan.query.text, plan.intent.complexity);
        let (answer, strategy) = match (requested, &self.completion) {
            (SynthesisStrategy::Generative, Some(completion)) => {
                match self
                    .generative_answer(completion.as_ref(), plan, snapshot, &responses, &sections, &certification)
                    .await
                {
                    Ok(narrative) => (narrative, SynthesisStrategy::Generative),
                    Err(e) => {
                        warn!(query_id = %plan.query.query_id, error = %e, "Generative synthesis failed, using deterministic report");
                        thoughts.push(Thought::new(
                            None,
                            "Narrative service unavailable; returning the deterministic report",
                        ));
                        (deterministic, SynthesisStrategy::Deterministic)
                    }
                }
            }
            _ => (deterministic, SynthesisStrategy::Deterministic),
        };

        info!(
            query_id = %plan.query.query_id,
            strategy = ?strategy,
            status = %certification.overall_status,
            maturity = certification.maturity_score,
            "Response synthesized"
        );

        Synthesis {
            answer,
            confidence: answer_confidence(&responses, snapshot),
            strategy,
            sections,
            certification,
            calculations: aggregate_calculations(&responses),
            data_sources: collect_citations(&responses),
            thoughts,
        }
    }

    async fn generative_answer(
        &self,
        completion: &dyn CompletionService,
        plan: &ExecutionPlan,
        snapshot: &BaselineSnapshot,
        responses: &[AgentResponse],
        sections: &[ReportSection],
        certification: &Certification,
    ) -> Result<String> {
        let inventory: Vec<&str> = SECTION_ORDER.iter().map(|k| section_title(*k)).collect();
        let context = json!({
            "question": plan.query.text,
            "intent": plan.intent.primary_intent,
            "sectionInventory": inventory,
            "baselineSnapshot": snapshot,
            "agentResponses": responses,
            "sections": sections
                .iter()
                .map(|s| json!({ "title": s.title, "hasData": s.has_data, "body": s.body }))
                .collect::<Vec<_>>(),
            "certification": certification,
        });

        let user_prompt = serde_json::to_string_pretty(&context)?;
        let narrative = completion.complete(NARRATIVE_SYSTEM_PROMPT, &user_prompt, false).await?;
        let narrative = narrative.trim();

        if narrative.is_empty() {
            return Err(OrchestrationError::SynthesisError("Empty narrative".to_string()));
        }

        Ok(narrative.to_string())
    }
}

/// Mean agent confidence, discounted when the baseline is not real data
fn answer_confidence(responses: &[AgentResponse], snapshot: &BaselineSnapshot) -> f64 {
    if responses.is_empty() {
        return 0.2;
    }
    let mean = responses.iter().map(|r| r.confidence).sum::<f64>() / responses.len() as f64;
    let factor = if snapshot.has_real_data { 1.0 } else { 0.8 };
    (mean * factor).clamp(0.0, 1.0)
}

fn deterministic_answer(
    responses: &[AgentResponse],
    snapshot: &BaselineSnapshot,
    certification: &Certification,
    sections: &[ReportSection],
) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !snapshot.has_real_data {
        parts.push("Figures are provisional: no verified financial data was available for this organization.".to_string());
    }

    if responses.is_empty() {
        parts.push("No analysis agent produced a result for this query.".to_string());
    } else {
        for response in responses {
            parts.push(format!("{}: {}", response.agent_id.display_name(), response.answer));
        }
    }

    let mut recommendations: Vec<&str> = Vec::new();
    for rec in responses.iter().flat_map(|r| r.recommendations.iter()) {
        if !recommendations.contains(&rec.as_str()) {
            recommendations.push(rec);
        }
    }
    if !recommendations.is_empty() {
        let top: Vec<&str> = recommendations.into_iter().take(3).collect();
        parts.push(format!("Recommended next steps: {}", top.join(" ")));
    }

    parts.push(format!(
        "Certification: {} (maturity {:.2}, policy adherence {:.2}, data quality {:.2}).",
        certification.overall_status,
        certification.maturity_score,
        certification.policy_adherence_score,
        certification.data_quality_score
    ));

    let headline = parts.join("\n");
    let detail: Vec<ReportSection> = sections.iter().filter(|s| s.has_data).cloned().collect();

    if detail.is_empty() {
        headline
    } else {
        format!("{}\n\n{}", headline, render_sections(&detail))
    }
}

/// Compact money summary used by follow-ups and logs
pub fn headline_figures(calculations: &BTreeMap<String, f64>) -> Option<String> {
    let cash = calculations.get("cashBalance")?;
    let runway = calculations.get("runway")?;
    Some(format!("{} cash, {:.1} months runway", format_usd(*cash), runway))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{TaskFailure, TaskOutcome};
    use crate::models::{AgentId, CertificationStatus, IntentClassification, Query, SnapshotSource};
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct ScriptedCompletion {
        reply: Option<String>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CompletionService for ScriptedCompletion {
        async fn complete(&self, _system: &str, user: &str, wants_json: bool) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(!wants_json);
            assert!(user.contains("sectionInventory"));
            self.reply
                .clone()
                .ok_or_else(|| OrchestrationError::LlmError("upstream 503".to_string()))
        }
    }

    fn plan(text: &str, complexity: Complexity) -> ExecutionPlan {
        ExecutionPlan {
            id: Uuid::new_v4(),
            query: Query::new(Uuid::new_v4(), Uuid::new_v4(), text, None),
            intent: IntentClassification {
                primary_intent: "cash_runway".to_string(),
                confidence: 0.85,
                entities: Map::new(),
                required_agents: vec![AgentId::Treasury, AgentId::Risk],
                complexity,
            },
            tasks: vec![],
            execution_order: vec![],
            parallel_groups: vec![],
            requires_approval: false,
            approval_reason: None,
        }
    }

    fn snapshot() -> BaselineSnapshot {
        BaselineSnapshot {
            cash_balance: 500_000.0,
            monthly_burn: 80_000.0,
            monthly_revenue: 60_000.0,
            has_real_data: true,
            ..BaselineSnapshot::empty(Uuid::nil(), SnapshotSource::ModelRun)
        }
    }

    fn outcome(response: AgentResponse) -> TaskOutcome {
        TaskOutcome {
            task_id: response.task_id,
            agent_id: response.agent_id,
            result: Ok(response),
            execution_time_ms: 3,
        }
    }

    fn execution() -> ExecutionReport {
        ExecutionReport {
            outcomes: vec![
                outcome(
                    AgentResponse::completed(AgentId::Treasury, Uuid::new_v4(), "Runway is 25.0 months.", 0.9)
                        .with_calculation("runway", 25.0)
                        .with_calculation("cashBalance", 500_000.0),
                ),
                TaskOutcome {
                    task_id: Uuid::new_v4(),
                    agent_id: AgentId::Risk,
                    result: Err(TaskFailure::AgentError("boom".to_string())),
                    execution_time_ms: 1,
                },
            ],
            thoughts: vec![],
        }
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(select_strategy("cash runway", Complexity::Simple), SynthesisStrategy::Deterministic);
        assert_eq!(select_strategy("Why is burn up?", Complexity::Simple), SynthesisStrategy::Generative);
        assert_eq!(select_strategy("show the mix", Complexity::Complex), SynthesisStrategy::Generative);
        // substring of another word does not count
        assert_eq!(select_strategy("showcase", Complexity::Moderate), SynthesisStrategy::Deterministic);
    }

    #[test]
    fn test_aggregation_never_silently_overwrites() {
        let responses = vec![
            AgentResponse::completed(AgentId::Treasury, Uuid::nil(), "", 0.9)
                .with_calculation("runway", 25.0)
                .with_calculation("horizonMonths", 12.0),
            AgentResponse::completed(AgentId::Risk, Uuid::nil(), "", 0.9)
                .with_calculation("runway", 24.0)
                .with_calculation("horizonMonths", 18.0),
        ];

        let merged = aggregate_calculations(&responses);
        assert_eq!(merged["runway"], 24.0);
        assert_eq!(merged["horizonMonths"], 12.0);
        assert_eq!(merged["risk.horizonMonths"], 18.0);
    }

    #[tokio::test]
    async fn test_deterministic_synthesis_accounts_for_failed_agent() {
        let synthesizer = ResponseSynthesizer::new(None, CertificationWeights::default());
        let result = synthesizer
            .synthesize(&plan("cash runway", Complexity::Simple), &snapshot(), &execution())
            .await;

        assert_eq!(result.strategy, SynthesisStrategy::Deterministic);
        assert_eq!(result.sections.len(), 10);
        assert_eq!(result.certification.overall_status, CertificationStatus::NotInstitutional);
        assert!(result.answer.contains("Runway is 25.0 months."));
        assert!(result.answer.contains("NOT_INSTITUTIONAL"));
        assert_eq!(result.calculations["runway"], 25.0);
        assert_eq!(headline_figures(&result.calculations).unwrap(), "$500,000 cash, 25.0 months runway");
    }

    #[tokio::test]
    async fn test_generative_narrative_used_when_available() {
        let completion = Arc::new(ScriptedCompletion {
            reply: Some("  You have about two years of runway.  ".to_string()),
            calls: AtomicUsize::new(0),
        });
        let synthesizer = ResponseSynthesizer::new(Some(completion.clone()), CertificationWeights::default());

        let result = synthesizer
            .synthesize(&plan("Explain our runway", Complexity::Simple), &snapshot(), &execution())
            .await;

        assert_eq!(result.strategy, SynthesisStrategy::Generative);
        assert_eq!(result.answer, "You have about two years of runway.");
        assert_eq!(result.sections.len(), 10);
        assert_eq!(completion.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generative_failure_falls_back_with_same_sections() {
        let completion = Arc::new(ScriptedCompletion {
            reply: None,
            calls: AtomicUsize::new(0),
        });
        let synthesizer = ResponseSynthesizer::new(Some(completion), CertificationWeights::default());
        let deterministic = ResponseSynthesizer::new(None, CertificationWeights::default());

        let failed = synthesizer
            .synthesize(&plan("Why is runway short?", Complexity::Complex), &snapshot(), &execution())
            .await;
        let baseline = deterministic
            .synthesize(&plan("Why is runway short?", Complexity::Complex), &snapshot(), &execution())
            .await;

        assert_eq!(failed.strategy, SynthesisStrategy::Deterministic);
        assert_eq!(failed.answer, baseline.answer);
        assert_eq!(
            failed.sections.iter().map(|s| s.kind).collect::<Vec<_>>(),
            baseline.sections.iter().map(|s| s.kind).collect::<Vec<_>>()
        );
        assert!(failed.thoughts.iter().any(|t| t.content.contains("deterministic report")));
    }
}
