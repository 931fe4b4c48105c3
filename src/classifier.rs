//! Intent Classifier
//!
//! Maps a free-text query onto an intent, its agent set and a complexity.
//!
//! The pattern table is evaluated top to bottom and the first entry with a
//! matching pattern wins. Order matters: specific action intents
//! (overrides, budget changes, transfers, deal execution) sit above the
//! looser analytical patterns that would otherwise shadow them.
//!
//! Entity extraction is independent of the match path and always merged in.
//! When nothing matches, a generative classification is attempted, and the
//! fixed `general_query` default is the last resort.

use crate::completion::{strip_json_fence, CompletionService};
use crate::config::{GENERATIVE_CONFIDENCE_FLOOR, PATTERN_MATCH_CONFIDENCE};
use crate::error::OrchestrationError;
use crate::models::{AgentId, Complexity, IntentClassification};
use crate::registry::normalize_agent_name;
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_INTENT: &str = "general_query";
const DEFAULT_CONFIDENCE: f64 = 0.5;

struct IntentPattern {
    intent: &'static str,
    patterns: Vec<Regex>,
    agents: &'static [AgentId],
    complexity: Complexity,
}

fn pattern(
    intent: &'static str,
    sources: &[&str],
    agents: &'static [AgentId],
    complexity: Complexity,
) -> IntentPattern {
    IntentPattern {
        intent,
        patterns: sources
            .iter()
            .map(|src| Regex::new(&format!("(?i){}", src)).expect("intent pattern must compile"))
            .collect(),
        agents,
        complexity,
    }
}

lazy_static! {
    static ref INTENT_TABLE: Vec<IntentPattern> = vec![
        pattern(
            "governance_override",
            &[
                r"\b(manual(ly)?|override|overrid(e|ing)|force)\b.*\b(forecast|projection|model|plan)s?\b",
                r"\b(adjust|bump|tweak)\b.*\b(forecast|projection)s?\b.*\bby\b",
            ],
            &[AgentId::Compliance, AgentId::Forecasting],
            Complexity::Moderate,
        ),
        pattern(
            "budget_change",
            &[
                r"\b(increase|cut|reduce|raise|change|reallocate|approve|slash)\b.*\bbudget\b",
                r"\bbudget\b.*\b(increase|cut|reduction|change|reallocation)\b",
            ],
            &[AgentId::CapitalAllocation, AgentId::Treasury, AgentId::Compliance],
            Complexity::Moderate,
        ),
        pattern(
            "large_transfer",
            &[
                r"\b(transfer|wire|remit)\b",
                r"\b(send|pay out|move)\b.*\b(funds|money|cash)\b",
            ],
            &[AgentId::Treasury, AgentId::Compliance],
            Complexity::Moderate,
        ),
        pattern(
            "mna_execution",
            &[r"\b(execute|proceed|close|sign|finali[sz]e)\b.*\b(acquisition|merger|deal|buyout)\b"],
            &[AgentId::CapitalAllocation, AgentId::Risk, AgentId::Compliance],
            Complexity::Complex,
        ),
        pattern(
            "mna_analysis",
            &[r"\b(acquisition|acquire|merger|m&a|buyout|takeover)\b"],
            &[AgentId::CapitalAllocation, AgentId::Risk, AgentId::Forecasting],
            Complexity::Complex,
        ),
        pattern(
            "scenario_analysis",
            &[r"\bwhat if\b", r"\bscenario\b", r"\bstress[- ]test", r"\bsimulat(e|ion)\b"],
            &[AgentId::Forecasting, AgentId::Risk, AgentId::Treasury],
            Complexity::Complex,
        ),
        pattern(
            "cash_runway",
            &[
                r"\brunway\b",
                r"\bhow long\b.*\b(cash|money)\b.*\blast\b",
                r"\bcash (position|balance)\b",
                r"\bburn rate\b",
            ],
            &[AgentId::Treasury],
            Complexity::Simple,
        ),
        pattern(
            "revenue_forecast",
            &[
                r"\b(forecast|project|projection|predict)\w*\b.*\b(revenue|sales|arr|mrr)\b",
                r"\b(revenue|sales|arr|mrr)\b.*\b(forecast|outlook|next (quarter|month|year))\b",
            ],
            &[AgentId::Forecasting],
            Complexity::Moderate,
        ),
        pattern(
            "risk_assessment",
            &[r"\b(risk|risks|survival|downside|default|insolven\w*)\b"],
            &[AgentId::Risk],
            Complexity::Moderate,
        ),
        pattern(
            "variance_analysis",
            &[r"\b(variance|over budget|under budget|vs\.? budget|budget vs|actuals?)\b"],
            &[AgentId::Variance, AgentId::Analytics],
            Complexity::Moderate,
        ),
        pattern(
            "anomaly_detection",
            &[r"\b(anomal\w*|unusual|outliers?|spikes?|suspicious|structural break)\b"],
            &[AgentId::Anomaly],
            Complexity::Moderate,
        ),
        pattern(
            "compliance_check",
            &[r"\b(complian\w*|polic(y|ies)|audit|controls?|sox|covenants?)\b"],
            &[AgentId::Compliance],
            Complexity::Moderate,
        ),
        pattern(
            "capital_allocation",
            &[r"\b(capital allocation|allocate|invest(ment)?s?|capex|deploy capital)\b"],
            &[AgentId::CapitalAllocation, AgentId::Treasury],
            Complexity::Moderate,
        ),
        pattern(
            "financial_health",
            &[r"\b(financial health|health check|how are we doing|kpis?|burn multiple|overview|metrics)\b"],
            &[AgentId::Analytics, AgentId::Treasury, AgentId::Risk],
            Complexity::Moderate,
        ),
    ];

    static ref PERCENT_RE: Regex =
        Regex::new(r"(?i)(-?\d+(?:\.\d+)?)\s*(%|percent\b)").expect("percent pattern must compile");
    static ref CURRENCY_RE: Regex =
        Regex::new(r"(?i)\$\s?(\d[\d,]*(?:\.\d+)?)\s*(k|mm|m|b|thousand|million|billion)?\b")
            .expect("currency pattern must compile");
    static ref DOWN_RE: Regex = Regex::new(
        r"(?i)\b(drop|drops|dropped|decrease[sd]?|decline[sd]?|cut|cuts|reduce[sd]?|fall|falls|fell|lower|lose|loss|shrink\w*)\b"
    )
    .expect("direction pattern must compile");
    static ref UP_RE: Regex = Regex::new(
        r"(?i)\b(increase[sd]?|grow|grows|growth|rise|rises|raise[sd]?|boost\w*|higher|gain\w*)\b"
    )
    .expect("direction pattern must compile");
    static ref QUARTER_RE: Regex = Regex::new(r"(?i)\bq([1-4])\b").expect("quarter pattern must compile");
    static ref MONTH_RE: Regex = Regex::new(
        r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december)\b"
    )
    .expect("month pattern must compile");
    static ref MONTHS_RE: Regex =
        Regex::new(r"(?i)\b(\d{1,3})[\s-]*months?\b").expect("months pattern must compile");
    static ref YEAR_RE: Regex = Regex::new(r"\b(20\d{2})\b").expect("year pattern must compile");
    static ref PERIOD_RE: Regex =
        Regex::new(r"(?i)\b(next|this|last)\s+(quarter|month|year)\b").expect("period pattern must compile");
}

/// Sign implied by directional wording; downward wins when both appear
fn direction(text: &str) -> Option<f64> {
    if DOWN_RE.is_match(text) {
        Some(-1.0)
    } else if UP_RE.is_match(text) {
        Some(1.0)
    } else {
        None
    }
}

fn currency_scale(suffix: &str) -> f64 {
    match suffix.to_lowercase().as_str() {
        "k" | "thousand" => 1_000.0,
        "m" | "mm" | "million" => 1_000_000.0,
        "b" | "billion" => 1_000_000_000.0,
        _ => 1.0,
    }
}

/// Deterministic entity extraction: percentage, currency amount, time period
pub fn extract_entities(text: &str) -> Map<String, Value> {
    let mut entities = Map::new();
    let sign = direction(text);

    let percentage = PERCENT_RE
        .captures(text)
        .and_then(|caps| caps[1].parse::<f64>().ok());

    if let Some(raw) = percentage {
        let magnitude = raw.abs();
        let signed = sign.unwrap_or(raw.signum()) * magnitude / 100.0;
        entities.insert("percentage".to_string(), json!(magnitude));
        entities.insert("revenueChange".to_string(), json!(signed));
    }

    let amount = CURRENCY_RE.captures(text).and_then(|caps| {
        let value = caps[1].replace(',', "").parse::<f64>().ok()?;
        let scale = caps.get(2).map(|m| currency_scale(m.as_str())).unwrap_or(1.0);
        Some(value * scale)
    });

    if let Some(amount) = amount {
        entities.insert("amount".to_string(), json!(amount));
        if percentage.is_none() {
            if let Some(sign) = sign {
                entities.insert("revenueChange".to_string(), json!(sign * amount));
            }
        }
    }

    if let Some(caps) = QUARTER_RE.captures(text) {
        entities.insert("quarter".to_string(), json!(format!("Q{}", &caps[1])));
    }
    if let Some(caps) = MONTH_RE.captures(text) {
        entities.insert("month".to_string(), json!(caps[1].to_lowercase()));
    }
    if let Some(months) = MONTHS_RE
        .captures(text)
        .and_then(|caps| caps[1].parse::<u32>().ok())
    {
        entities.insert("months".to_string(), json!(months));
    }
    if let Some(year) = YEAR_RE
        .captures(text)
        .and_then(|caps| caps[1].parse::<u32>().ok())
    {
        entities.insert("year".to_string(), json!(year));
    }
    if let Some(caps) = PERIOD_RE.captures(text) {
        entities.insert(
            "period".to_string(),
            json!(format!("{}_{}", caps[1].to_lowercase(), caps[2].to_lowercase())),
        );
    }

    entities
}

/// First table entry with a matching pattern
fn match_intent(text: &str) -> Option<&'static IntentPattern> {
    INTENT_TABLE
        .iter()
        .find(|entry| entry.patterns.iter().any(|re| re.is_match(text)))
}

/// Keep first occurrence of each agent
pub fn dedupe_agents(agents: impl IntoIterator<Item = AgentId>) -> Vec<AgentId> {
    let mut seen = Vec::new();
    for agent in agents {
        if !seen.contains(&agent) {
            seen.push(agent);
        }
    }
    seen
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerativeIntent {
    intent: String,
    confidence: f64,
    #[serde(default)]
    required_agents: Vec<String>,
    #[serde(default)]
    entities: Map<String, Value>,
    #[serde(default)]
    complexity: Option<Complexity>,
}

const CLASSIFICATION_SYSTEM_PROMPT: &str = "You classify financial questions for a CFO assistant. \
Respond with a single JSON object and nothing else, using exactly this schema: \
{\"intent\": string (snake_case), \"confidence\": number between 0 and 1, \
\"requiredAgents\": array of agent names, \"entities\": object, \
\"complexity\": \"simple\" | \"moderate\" | \"complex\"}. \
Agent names: treasury, forecasting, risk, analytics, compliance, variance, anomaly, capital_allocation.";

pub struct IntentClassifier {
    completion: Option<Arc<dyn CompletionService>>,
}

impl IntentClassifier {
    pub fn new(completion: Option<Arc<dyn CompletionService>>) -> Self {
        Self { completion }
    }

    /// Classify a query. Never fails.
    pub async fn classify(&self, text: &str) -> IntentClassification {
        let entities = extract_entities(text);

        if let Some(entry) = match_intent(text) {
            info!(intent = entry.intent, "Intent matched pattern table");
            return IntentClassification {
                primary_intent: entry.intent.to_string(),
                confidence: PATTERN_MATCH_CONFIDENCE,
                entities,
                required_agents: entry.agents.to_vec(),
                complexity: entry.complexity,
            };
        }

        if let Some(completion) = &self.completion {
            match self.classify_generative(completion.as_ref(), text).await {
                Ok(generated) if generated.confidence > GENERATIVE_CONFIDENCE_FLOOR => {
                    info!(
                        intent = %generated.primary_intent,
                        confidence = generated.confidence,
                        "Intent from generative classification"
                    );
                    return merge_entities(generated, entities);
                }
                Ok(generated) => {
                    debug!(
                        confidence = generated.confidence,
                        "Generative classification below confidence floor"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Generative classification failed, using default intent");
                }
            }
        }

        default_classification(entities)
    }

    async fn classify_generative(
        &self,
        completion: &dyn CompletionService,
        text: &str,
    ) -> Result<IntentClassification> {
        let raw = completion
            .complete(CLASSIFICATION_SYSTEM_PROMPT, text, true)
            .await?;
        let parsed: GenerativeIntent = serde_json::from_str(strip_json_fence(&raw))
            .map_err(|e| OrchestrationError::ClassificationError(format!("Unparsable classification: {}", e)))?;

        let intent = parsed.intent.trim().to_lowercase().replace([' ', '-'], "_");
        if intent.is_empty() {
            return Err(OrchestrationError::ClassificationError("Empty intent".to_string()));
        }

        let mut agents = dedupe_agents(parsed.required_agents.iter().map(|name| normalize_agent_name(name)));
        if agents.is_empty() {
            agents.push(AgentId::Analytics);
        }

        let complexity = parsed.complexity.unwrap_or(match agents.len() {
            1 => Complexity::Simple,
            2 => Complexity::Moderate,
            _ => Complexity::Complex,
        });

        Ok(IntentClassification {
            primary_intent: intent,
            confidence: parsed.confidence.clamp(0.0, 1.0),
            entities: parsed.entities,
            required_agents: agents,
            complexity,
        })
    }
}

/// Extracted entities override generative ones on key collision
fn merge_entities(mut classification: IntentClassification, extracted: Map<String, Value>) -> IntentClassification {
    for (key, value) in extracted {
        classification.entities.insert(key, value);
    }
    classification
}

fn default_classification(entities: Map<String, Value>) -> IntentClassification {
    IntentClassification {
        primary_intent: DEFAULT_INTENT.to_string(),
        confidence: DEFAULT_CONFIDENCE,
        entities,
        required_agents: vec![AgentId::Analytics],
        complexity: Complexity::Simple,
    }
}
