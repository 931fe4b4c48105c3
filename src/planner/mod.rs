//! Plan builder
//!
//! One task per required agent, in classification order. All tasks share a
//! single parallel group: no declared dependencies between agents.

use crate::approval::ApprovalGate;
use crate::classifier::dedupe_agents;
use crate::error::OrchestrationError;
use crate::models::{AgentId, AgentTask, ExecutionPlan, IntentClassification, Query, TaskStatus};
use crate::Result;
use serde_json::json;
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

fn task_focus(agent: AgentId) -> &'static str {
    match agent {
        AgentId::Treasury => "cash position, net burn and runway",
        AgentId::Forecasting => "revenue projection with confidence band",
        AgentId::Risk => "survival probability and downside scenarios",
        AgentId::Analytics => "KPI overview",
        AgentId::Compliance => "policy and control checks",
        AgentId::Variance => "budget-vs-actual variance drivers",
        AgentId::Anomaly => "anomaly and structural-break scan",
        AgentId::CapitalAllocation => "capital allocation options",
    }
}

pub struct PlanBuilder {
    gate: ApprovalGate,
    max_tasks: usize,
}

impl PlanBuilder {
    pub fn new(gate: ApprovalGate, max_tasks: usize) -> Self {
        Self { gate, max_tasks }
    }

    pub fn build_plan(&self, query: &Query, intent: &IntentClassification) -> Result<ExecutionPlan> {
        let mut agents = dedupe_agents(intent.required_agents.iter().copied());
        if agents.is_empty() {
            agents.push(AgentId::Analytics);
        }

        if agents.len() > self.max_tasks {
            return Err(OrchestrationError::PlanningError(format!(
                "Plan would need {} tasks, limit is {}",
                agents.len(),
                self.max_tasks
            )));
        }

        // Tasks follow the deduplicated agent list, so the intent carried by
        // the plan is normalized to the same list.
        let mut intent = intent.clone();
        intent.required_agents = agents.clone();

        let tasks: Vec<AgentTask> = agents
            .iter()
            .map(|agent| AgentTask {
                id: Uuid::new_v4(),
                agent_id: *agent,
                description: format!("{} agent: {}", agent.display_name(), task_focus(*agent)),
                params: json!({
                    "query": query.text,
                    "intent": intent.primary_intent,
                    "entities": intent.entities,
                    "context": query.context,
                }),
                status: TaskStatus::Idle,
            })
            .collect();

        let execution_order: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
        let (requires_approval, approval_reason) = self.gate.requires_approval(&intent);

        let plan = ExecutionPlan {
            id: Uuid::new_v4(),
            query: query.clone(),
            intent,
            tasks,
            parallel_groups: vec![execution_order.clone()],
            execution_order,
            requires_approval,
            approval_reason,
        };

        validate_plan(&plan)?;

        info!(
            plan_id = %plan.id,
            query_id = %query.query_id,
            tasks = plan.tasks.len(),
            requires_approval = plan.requires_approval,
            "Execution plan built"
        );

        Ok(plan)
    }
}

/// Structural checks: tasks 1:1 with agents, order and groups cover each task exactly once
pub fn validate_plan(plan: &ExecutionPlan) -> Result<()> {
    let task_agents: Vec<AgentId> = plan.tasks.iter().map(|t| t.agent_id).collect();
    if task_agents != plan.intent.required_agents {
        return Err(OrchestrationError::InvalidPlan(
            "Tasks do not correspond to required agents".to_string(),
        ));
    }

    let task_ids: HashSet<Uuid> = plan.tasks.iter().map(|t| t.id).collect();
    let ordered: HashSet<Uuid> = plan.execution_order.iter().copied().collect();
    if ordered != task_ids || plan.execution_order.len() != plan.tasks.len() {
        return Err(OrchestrationError::InvalidPlan(
            "Execution order must list every task exactly once".to_string(),
        ));
    }

    let grouped: Vec<Uuid> = plan.parallel_groups.iter().flatten().copied().collect();
    let grouped_set: HashSet<Uuid> = grouped.iter().copied().collect();
    if grouped_set != task_ids || grouped.len() != plan.tasks.len() {
        return Err(OrchestrationError::InvalidPlan(
            "Parallel groups must partition the tasks".to_string(),
        ));
    }

    Ok(())
}
