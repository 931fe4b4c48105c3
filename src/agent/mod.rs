//! Main orchestrator
//!
//! QUERY → CLASSIFY → PLAN → APPROVAL? → SNAPSHOT → EXECUTE → SYNTHESIZE → FOLLOW-UPS

use crate::approval::ApprovalGate;
use crate::classifier::IntentClassifier;
use crate::completion::CompletionService;
use crate::config::OrchestratorConfig;
use crate::execution::TaskExecutor;
use crate::followup::{generate_follow_ups, generic_follow_ups};
use crate::models::{
    ApprovalRequest, ExecutionPlan, IntentClassification, Query, QueryResponse, ResponseStatus, Thought,
};
use crate::planner::PlanBuilder;
use crate::registry::AgentRegistry;
use crate::snapshot::SnapshotBuilder;
use crate::state::FinancialDataStore;
use crate::synthesis::{headline_figures, ResponseSynthesizer};
use crate::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Confidence reported when the pipeline itself failed
const DEGRADED_CONFIDENCE: f64 = 0.1;

/// Coordinates one query from text to report
pub struct Orchestrator {
    classifier: IntentClassifier,
    planner: PlanBuilder,
    snapshots: SnapshotBuilder,
    executor: TaskExecutor,
    synthesizer: ResponseSynthesizer,
}

impl Orchestrator {
    pub fn new(
        config: &OrchestratorConfig,
        registry: Arc<AgentRegistry>,
        store: Arc<dyn FinancialDataStore>,
        completion: Option<Arc<dyn CompletionService>>,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(completion.clone()),
            planner: PlanBuilder::new(ApprovalGate::new(config.approval.clone()), config.max_tasks_per_plan),
            snapshots: SnapshotBuilder::new(store, config),
            executor: TaskExecutor::new(registry, config),
            synthesizer: ResponseSynthesizer::new(completion, config.certification.clone()),
        }
    }

    /// Answer a query. Always returns a response; internal failures come back
    /// as a degraded, low-confidence answer.
    pub async fn process_query(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        text: &str,
        context: Option<Value>,
    ) -> QueryResponse {
        let started = Instant::now();
        let query = Query::new(org_id, user_id, text, context);
        let query_id = query.query_id;

        info!(query_id = %query_id, org_id = %org_id, "Processing query");

        match self.run(query, started).await {
            Ok(response) => response,
            Err(e) => {
                error!(query_id = %query_id, error = %e, "Query pipeline failed");
                degraded_response(query_id, &e.to_string(), started)
            }
        }
    }

    async fn run(&self, query: Query, started: Instant) -> Result<QueryResponse> {
        let mut thoughts = Vec::new();

        // === CLASSIFY ===
        let intent = self.classifier.classify(&query.text).await;
        thoughts.push(Thought::new(
            None,
            format!(
                "Classified as {} (confidence {:.2}, {} agent(s))",
                intent.primary_intent,
                intent.confidence,
                intent.required_agents.len()
            ),
        ));

        // === PLAN ===
        let plan = self.planner.build_plan(&query, &intent)?;
        thoughts.push(Thought::new(
            None,
            format!("Planned {} task(s): {}", plan.tasks.len(), plan.task_descriptions().join("; ")),
        ));

        // === APPROVAL ===
        if plan.requires_approval {
            info!(query_id = %query.query_id, plan_id = %plan.id, "Plan requires approval, stopping before execution");
            return Ok(approval_response(plan, thoughts, started));
        }

        // === SNAPSHOT ===
        let snapshot = self.snapshots.build_snapshot(query.org_id).await;
        thoughts.push(Thought::new(
            None,
            format!(
                "Baseline snapshot from {} (real data: {})",
                snapshot.source, snapshot.has_real_data
            ),
        ));

        // === EXECUTE ===
        let execution = self.executor.execute(&plan, snapshot.clone()).await;

        // === SYNTHESIZE ===
        let synthesis = self.synthesizer.synthesize(&plan, &snapshot, &execution).await;
        thoughts.extend(synthesis.thoughts);

        let follow_ups = generate_follow_ups(&plan.intent, &synthesis.calculations);

        if let Some(figures) = headline_figures(&synthesis.calculations) {
            debug!(query_id = %query.query_id, figures = %figures, "Headline figures");
        }

        info!(
            query_id = %query.query_id,
            intent = %plan.intent.primary_intent,
            responses = execution.responses().len(),
            status = %synthesis.certification.overall_status,
            "Query completed"
        );

        Ok(QueryResponse {
            query_id: query.query_id,
            status: ResponseStatus::Completed,
            answer: synthesis.answer,
            confidence: synthesis.confidence,
            intent: Some(plan.intent.clone()),
            agent_responses: execution.responses(),
            calculations: synthesis.calculations,
            data_sources: synthesis.data_sources,
            thoughts,
            sections: synthesis.sections,
            certification: Some(synthesis.certification),
            synthesis: Some(synthesis.strategy),
            follow_ups,
            plan: Some(plan),
            requires_approval: false,
            approval: None,
            execution_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn approval_response(plan: ExecutionPlan, mut thoughts: Vec<Thought>, started: Instant) -> QueryResponse {
    let reason = plan
        .approval_reason
        .clone()
        .unwrap_or_else(|| "Approval required".to_string());
    let descriptions = plan.task_descriptions();
    let intent: IntentClassification = plan.intent.clone();

    thoughts.push(Thought::new(None, format!("Awaiting approval: {}", reason)));

    let preview: Vec<String> = descriptions.iter().map(|d| format!("- {}", d)).collect();
    let answer = format!(
        "This request needs approval before anything runs. {}\nPlanned steps:\n{}",
        reason,
        preview.join("\n")
    );

    QueryResponse {
        query_id: plan.query.query_id,
        status: ResponseStatus::WaitingApproval,
        answer,
        confidence: intent.confidence,
        follow_ups: generate_follow_ups(&intent, &BTreeMap::new()),
        intent: Some(intent),
        approval: Some(ApprovalRequest {
            plan_id: plan.id,
            reason,
            planned_task_descriptions: descriptions,
        }),
        plan: Some(plan),
        requires_approval: true,
        agent_responses: Vec::new(),
        calculations: BTreeMap::new(),
        data_sources: Vec::new(),
        thoughts,
        sections: Vec::new(),
        certification: None,
        synthesis: None,
        execution_time_ms: started.elapsed().as_millis() as u64,
    }
}

fn degraded_response(query_id: Uuid, detail: &str, started: Instant) -> QueryResponse {
    QueryResponse {
        query_id,
        status: ResponseStatus::Degraded,
        answer: "I hit an issue while analysing your question and could not complete the report. \
                 Please try again, or rephrase the question."
            .to_string(),
        confidence: DEGRADED_CONFIDENCE,
        intent: None,
        plan: None,
        requires_approval: false,
        approval: None,
        agent_responses: Vec::new(),
        calculations: BTreeMap::new(),
        data_sources: Vec::new(),
        thoughts: vec![Thought::new(None, format!("Pipeline error: {}", detail))],
        sections: Vec::new(),
        certification: None,
        synthesis: None,
        follow_ups: generic_follow_ups(),
        execution_time_ms: started.elapsed().as_millis() as u64,
    }
}
