//! HTTP-backed agents
//!
//! Agents whose formulas live in the external financial API service.
//! Each call posts the merged params (with the baseline snapshot) and
//! expects an `AgentResponse` back.

use super::{AgentParams, FinancialAgent};
use crate::error::OrchestrationError;
use crate::models::{AgentId, AgentResponse};
use crate::Result;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct RemoteAgentClient {
    client: Client,
    base_url: String,
}

impl RemoteAgentClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_env() -> Option<Self> {
        let base_url = env::var("FINANCIAL_API_BASE_URL")
            .or_else(|_| env::var("AGENTS_API_BASE_URL"))
            .ok()?;

        Self::new(&base_url).ok()
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                OrchestrationError::AgentError(format!(
                    "Financial API request failed for {}: {}",
                    path, e
                ))
            })?;

        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| OrchestrationError::AgentError(format!("Invalid JSON response: {}", e)))?;

        if !status.is_success() {
            return Err(OrchestrationError::AgentError(format!(
                "Financial API returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }
}

fn output_data(output: &Value) -> &Value {
    output.get("data").unwrap_or(output)
}

/// Decode a service payload, pinning identity fields to the task it answers
fn decode_agent_response(agent_id: AgentId, task_id: Uuid, payload: &Value) -> Result<AgentResponse> {
    let mut response: AgentResponse = serde_json::from_value(output_data(payload).clone())?;
    response.agent_id = agent_id;
    response.task_id = task_id;
    response.confidence = response.confidence.clamp(0.0, 1.0);
    Ok(response)
}

pub struct RemoteAgent {
    id: AgentId,
    description: &'static str,
    api: RemoteAgentClient,
}

impl RemoteAgent {
    pub fn new(id: AgentId, description: &'static str, api: RemoteAgentClient) -> Self {
        Self { id, description, api }
    }
}

#[async_trait::async_trait]
impl FinancialAgent for RemoteAgent {
    fn id(&self) -> AgentId {
        self.id
    }

    fn description(&self) -> &'static str {
        self.description
    }

    async fn execute(&self, org_id: Uuid, user_id: Uuid, params: &AgentParams) -> Result<AgentResponse> {
        let path = format!("/api/v1/agents/{}", self.id.as_str());
        let body = json!({
            "org_id": org_id,
            "user_id": user_id,
            "task_id": params.task_id,
            "params": params.merged()?,
        });

        debug!(agent = %self.id, path = %path, "Calling remote agent");
        let payload = self.api.post_json(&path, &body).await?;

        decode_agent_response(self.id, params.task_id, &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;

    #[test]
    fn test_decode_wrapped_payload() {
        let task_id = Uuid::new_v4();
        let payload = json!({
            "data": {
                "agent_id": "analytics",
                "task_id": Uuid::nil(),
                "status": "completed",
                "answer": "Opex 12% over budget, driven by cloud spend.",
                "confidence": 1.4,
                "calculations": { "opexVariancePct": 12.0 }
            }
        });

        let response = decode_agent_response(AgentId::Variance, task_id, &payload).unwrap();
        assert_eq!(response.agent_id, AgentId::Variance);
        assert_eq!(response.task_id, task_id);
        assert_eq!(response.status, TaskStatus::Completed);
        assert_eq!(response.confidence, 1.0);
        assert_eq!(response.calculation("opexVariancePct"), Some(12.0));
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        let payload = json!({ "answer": 42 });
        assert!(decode_agent_response(AgentId::Anomaly, Uuid::new_v4(), &payload).is_err());
    }
}
