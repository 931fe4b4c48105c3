//! Task executor
//!
//! Runs every task of a plan against its agent. Groups run one after the
//! other; the tasks inside a group run concurrently on a bounded pool.
//!
//! One agent failing never aborts the plan: each task ends in its own
//! `TaskOutcome`, and a parent deadline bounds the whole execution.
//! Stragglers are not preempted, the executor simply stops waiting.

use crate::config::OrchestratorConfig;
use crate::models::{AgentId, AgentResponse, BaselineSnapshot, ExecutionPlan, Thought};
use crate::registry::{AgentParams, AgentRegistry};
use crate::error::OrchestrationError;
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why a task produced no response
#[derive(Debug, Clone, PartialEq)]
pub enum TaskFailure {
    /// No agent registered for the id; the task is skipped
    NotRegistered,
    AgentError(String),
    TimedOut,
    Panicked(String),
}

impl TaskFailure {
    /// Skips do not count against certification, real failures do
    pub fn is_agent_failure(&self) -> bool {
        !matches!(self, TaskFailure::NotRegistered)
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::NotRegistered => write!(f, "agent not registered"),
            TaskFailure::AgentError(e) => write!(f, "{}", e),
            TaskFailure::TimedOut => write!(f, "did not finish before the execution deadline"),
            TaskFailure::Panicked(e) => write!(f, "panicked: {}", e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub agent_id: AgentId,
    pub result: std::result::Result<AgentResponse, TaskFailure>,
    pub execution_time_ms: u64,
}

/// Outcomes in execution order plus the executor's own trace
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub outcomes: Vec<TaskOutcome>,
    pub thoughts: Vec<Thought>,
}

impl ExecutionReport {
    pub fn responses(&self) -> Vec<AgentResponse> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().cloned())
            .collect()
    }

    /// Agents that ran and failed (skips excluded)
    pub fn failed_agents(&self) -> Vec<AgentId> {
        self.outcomes
            .iter()
            .filter(|o| matches!(&o.result, Err(failure) if failure.is_agent_failure()))
            .map(|o| o.agent_id)
            .collect()
    }
}

type TaskHandle = JoinHandle<(crate::Result<AgentResponse>, u64)>;

pub struct TaskExecutor {
    registry: Arc<AgentRegistry>,
    deadline: Duration,
    max_concurrent: usize,
}

impl TaskExecutor {
    pub fn new(registry: Arc<AgentRegistry>, config: &OrchestratorConfig) -> Self {
        Self {
            registry,
            deadline: config.task_deadline,
            max_concurrent: config.max_concurrent_tasks.max(1),
        }
    }

    pub async fn execute(&self, plan: &ExecutionPlan, snapshot: Arc<BaselineSnapshot>) -> ExecutionReport {
        let deadline = Instant::now() + self.deadline;
        let pool = Arc::new(Semaphore::new(self.max_concurrent));
        let mut finished: HashMap<Uuid, TaskOutcome> = HashMap::with_capacity(plan.tasks.len());

        let groups: Vec<Vec<Uuid>> = if plan.parallel_groups.is_empty() {
            plan.execution_order.iter().map(|id| vec![*id]).collect()
        } else {
            plan.parallel_groups.clone()
        };

        debug!(plan_id = %plan.id, groups = groups.len(), "Starting task execution");

        for group in groups {
            let mut running: Vec<(Uuid, AgentId, TaskHandle)> = Vec::with_capacity(group.len());

            for task_id in group {
                let Some(task) = plan.task(task_id) else {
                    warn!(plan_id = %plan.id, task_id = %task_id, "Group references unknown task");
                    continue;
                };

                let Some(agent) = self.registry.get(task.agent_id) else {
                    warn!(agent = %task.agent_id, task_id = %task.id, "Agent not registered, skipping");
                    finished.insert(
                        task.id,
                        TaskOutcome {
                            task_id: task.id,
                            agent_id: task.agent_id,
                            result: Err(TaskFailure::NotRegistered),
                            execution_time_ms: 0,
                        },
                    );
                    continue;
                };

                let params = AgentParams {
                    task_id: task.id,
                    params: task.params.clone(),
                    baseline_snapshot: snapshot.clone(),
                };
                let org_id = plan.query.org_id;
                let user_id = plan.query.user_id;
                let pool = pool.clone();

                let handle = tokio::spawn(async move {
                    let _permit = match pool.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => return (Err(OrchestrationError::ExecutionError(e.to_string())), 0),
                    };
                    let started = std::time::Instant::now();
                    let result = agent.execute(org_id, user_id, &params).await;
                    (result, started.elapsed().as_millis() as u64)
                });

                running.push((task.id, task.agent_id, handle));
            }

            // Join the whole group; each handle gets the same parent deadline.
            let joined = join_all(running.into_iter().map(|(task_id, agent_id, handle)| async move {
                (task_id, agent_id, timeout_at(deadline, handle).await)
            }))
            .await;

            for (task_id, agent_id, joined) in joined {
                let (result, execution_time_ms) = match joined {
                    Ok(Ok((Ok(mut response), elapsed))) => {
                        response.agent_id = agent_id;
                        response.task_id = task_id;
                        response.confidence = response.confidence.clamp(0.0, 1.0);
                        (Ok(response), elapsed)
                    }
                    Ok(Ok((Err(e), elapsed))) => (Err(TaskFailure::AgentError(e.to_string())), elapsed),
                    Ok(Err(join_error)) => (Err(TaskFailure::Panicked(join_error.to_string())), 0),
                    Err(_) => (Err(TaskFailure::TimedOut), self.deadline.as_millis() as u64),
                };

                if let Err(failure) = &result {
                    warn!(agent = %agent_id, task_id = %task_id, error = %failure, "Agent task failed");
                }

                finished.insert(
                    task_id,
                    TaskOutcome {
                        task_id,
                        agent_id,
                        result,
                        execution_time_ms,
                    },
                );
            }
        }

        let mut report = ExecutionReport::default();

        for task_id in &plan.execution_order {
            let Some(outcome) = finished.remove(task_id) else {
                continue;
            };

            match &outcome.result {
                Ok(response) => {
                    report.thoughts.push(Thought::new(
                        Some(outcome.agent_id),
                        format!(
                            "{} agent completed in {}ms (confidence {:.2})",
                            outcome.agent_id.display_name(),
                            outcome.execution_time_ms,
                            response.confidence
                        ),
                    ));
                    report.thoughts.extend(response.thoughts.iter().cloned());
                }
                Err(TaskFailure::NotRegistered) => {
                    report.thoughts.push(Thought::new(
                        Some(outcome.agent_id),
                        format!(
                            "{} agent is not available for this organization; skipped",
                            outcome.agent_id.display_name()
                        ),
                    ));
                }
                Err(failure) => {
                    report.thoughts.push(Thought::new(
                        Some(outcome.agent_id),
                        format!("{} agent failed: {}", outcome.agent_id.display_name(), failure),
                    ));
                }
            }

            report.outcomes.push(outcome);
        }

        info!(
            plan_id = %plan.id,
            completed = report.responses().len(),
            failed = report.failed_agents().len(),
            "Task execution finished"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentTask, Complexity, IntentClassification, Query, SnapshotSource, TaskStatus};
    use crate::registry::FinancialAgent;
    use crate::Result;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Answer,
        Fail,
        Panic,
        Sleep(Duration),
    }

    struct StubAgent {
        id: AgentId,
        behaviour: Behaviour,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl StubAgent {
        fn new(id: AgentId, behaviour: Behaviour) -> Self {
            Self {
                id,
                behaviour,
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait::async_trait]
    impl FinancialAgent for StubAgent {
        fn id(&self) -> AgentId {
            self.id
        }

        fn description(&self) -> &'static str {
            "stub"
        }

        async fn execute(&self, _org: Uuid, _user: Uuid, params: &AgentParams) -> Result<AgentResponse> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let result = match &self.behaviour {
                Behaviour::Answer => Ok(()),
                Behaviour::Fail => Err(OrchestrationError::AgentError("ledger unavailable".to_string())),
                Behaviour::Panic => panic!("division by zero in stub"),
                Behaviour::Sleep(d) => {
                    tokio::time::sleep(*d).await;
                    Ok(())
                }
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result?;

            Ok(AgentResponse::completed(self.id, params.task_id, "ok", 0.8)
                .with_calculation("cashBalance", params.baseline_snapshot.cash_balance))
        }
    }

    fn plan_for(agents: &[AgentId]) -> ExecutionPlan {
        let tasks: Vec<AgentTask> = agents
            .iter()
            .map(|a| AgentTask {
                id: Uuid::new_v4(),
                agent_id: *a,
                description: format!("{} task", a),
                params: json!({ "query": "test" }),
                status: TaskStatus::Idle,
            })
            .collect();
        let order: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();

        ExecutionPlan {
            id: Uuid::new_v4(),
            query: Query::new(Uuid::new_v4(), Uuid::new_v4(), "test", None),
            intent: IntentClassification {
                primary_intent: "financial_health".to_string(),
                confidence: 0.85,
                entities: Map::new(),
                required_agents: agents.to_vec(),
                complexity: Complexity::Moderate,
            },
            tasks,
            parallel_groups: vec![order.clone()],
            execution_order: order,
            requires_approval: false,
            approval_reason: None,
        }
    }

    fn snapshot() -> Arc<BaselineSnapshot> {
        Arc::new(BaselineSnapshot {
            cash_balance: 500_000.0,
            ..BaselineSnapshot::empty(Uuid::nil(), SnapshotSource::ModelRun)
        })
    }

    fn executor(registry: AgentRegistry, config: OrchestratorConfig) -> TaskExecutor {
        TaskExecutor::new(Arc::new(registry), &config)
    }

    #[tokio::test]
    async fn test_one_failing_agent_is_isolated() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(StubAgent::new(AgentId::Treasury, Behaviour::Answer)));
        registry.register(Arc::new(StubAgent::new(AgentId::Risk, Behaviour::Fail)));
        registry.register(Arc::new(StubAgent::new(AgentId::Forecasting, Behaviour::Answer)));

        let plan = plan_for(&[AgentId::Treasury, AgentId::Risk, AgentId::Forecasting]);
        let report = executor(registry, OrchestratorConfig::default())
            .execute(&plan, snapshot())
            .await;

        let responses = report.responses();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].agent_id, AgentId::Treasury);
        assert_eq!(responses[1].agent_id, AgentId::Forecasting);
        assert_eq!(report.failed_agents(), vec![AgentId::Risk]);

        let failure_thoughts: Vec<&Thought> = report
            .thoughts
            .iter()
            .filter(|t| t.content.contains("failed"))
            .collect();
        assert_eq!(failure_thoughts.len(), 1);
        assert!(failure_thoughts[0].content.contains("ledger unavailable"));
    }

    #[tokio::test]
    async fn test_every_agent_sees_the_same_snapshot() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(StubAgent::new(AgentId::Treasury, Behaviour::Answer)));
        registry.register(Arc::new(StubAgent::new(AgentId::Analytics, Behaviour::Answer)));

        let plan = plan_for(&[AgentId::Treasury, AgentId::Analytics]);
        let report = executor(registry, OrchestratorConfig::default())
            .execute(&plan, snapshot())
            .await;

        for response in report.responses() {
            assert_eq!(response.calculation("cashBalance"), Some(500_000.0));
        }
    }

    #[tokio::test]
    async fn test_unregistered_agent_is_skipped_not_failed() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(StubAgent::new(AgentId::Analytics, Behaviour::Answer)));

        let plan = plan_for(&[AgentId::Variance, AgentId::Analytics]);
        let report = executor(registry, OrchestratorConfig::default())
            .execute(&plan, snapshot())
            .await;

        assert_eq!(report.responses().len(), 1);
        assert!(report.failed_agents().is_empty());
        assert_eq!(report.outcomes[0].result, Err(TaskFailure::NotRegistered));
        assert!(report.thoughts.iter().any(|t| t.content.contains("skipped")));
    }

    #[tokio::test]
    async fn test_panicking_agent_is_contained() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(StubAgent::new(AgentId::Anomaly, Behaviour::Panic)));
        registry.register(Arc::new(StubAgent::new(AgentId::Treasury, Behaviour::Answer)));

        let plan = plan_for(&[AgentId::Anomaly, AgentId::Treasury]);
        let report = executor(registry, OrchestratorConfig::default())
            .execute(&plan, snapshot())
            .await;

        assert!(matches!(report.outcomes[0].result, Err(TaskFailure::Panicked(_))));
        assert_eq!(report.responses().len(), 1);
    }

    #[tokio::test]
    async fn test_deadline_keeps_completed_results() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(StubAgent::new(AgentId::Treasury, Behaviour::Answer)));
        registry.register(Arc::new(StubAgent::new(
            AgentId::Risk,
            Behaviour::Sleep(Duration::from_secs(10)),
        )));

        let config = OrchestratorConfig {
            task_deadline: Duration::from_millis(100),
            ..OrchestratorConfig::default()
        };
        let plan = plan_for(&[AgentId::Treasury, AgentId::Risk]);

        let started = std::time::Instant::now();
        let report = executor(registry, config).execute(&plan, snapshot()).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.responses().len(), 1);
        assert_eq!(report.outcomes[1].result, Err(TaskFailure::TimedOut));
        assert_eq!(report.failed_agents(), vec![AgentId::Risk]);
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let agents = [AgentId::Treasury, AgentId::Risk, AgentId::Forecasting, AgentId::Analytics];

        let mut registry = AgentRegistry::new();
        for id in agents {
            registry.register(Arc::new(StubAgent {
                id,
                behaviour: Behaviour::Sleep(Duration::from_millis(40)),
                in_flight: in_flight.clone(),
                peak: peak.clone(),
            }));
        }

        let config = OrchestratorConfig {
            max_concurrent_tasks: 2,
            ..OrchestratorConfig::default()
        };
        let report = executor(registry, config).execute(&plan_for(&agents), snapshot()).await;

        assert_eq!(report.responses().len(), 4);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
