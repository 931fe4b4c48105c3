//! Structured report sections
//!
//! Ten sections in fixed order. A section renders figures only from the
//! agent that owns them; when that agent did not run it says so instead.

use crate::execution::ExecutionReport;
use crate::models::{
    AgentId, AgentResponse, BaselineSnapshot, Certification, PolicyStatus, ReportSection, SectionKind,
};

pub const SECTION_ORDER: [SectionKind; 10] = [
    SectionKind::FinancialIntegrity,
    SectionKind::ForecastValidation,
    SectionKind::VarianceDrivers,
    SectionKind::ModelGovernance,
    SectionKind::CapitalAllocation,
    SectionKind::AnomalyDetection,
    SectionKind::PolicyCompliance,
    SectionKind::LiquiditySurvival,
    SectionKind::DataQuality,
    SectionKind::AuditAppendix,
];

pub fn section_title(kind: SectionKind) -> &'static str {
    match kind {
        SectionKind::FinancialIntegrity => "Financial Integrity & Data Lineage",
        SectionKind::ForecastValidation => "Forecast Validation",
        SectionKind::VarianceDrivers => "Variance & Driver Decomposition",
        SectionKind::ModelGovernance => "Model Governance & Drift",
        SectionKind::CapitalAllocation => "Capital Allocation",
        SectionKind::AnomalyDetection => "Anomaly & Structural-Break Detection",
        SectionKind::PolicyCompliance => "Policy & Compliance Mapping",
        SectionKind::LiquiditySurvival => "Liquidity & Survival Scenario",
        SectionKind::DataQuality => "Data Quality",
        SectionKind::AuditAppendix => "Audit Appendix",
    }
}

/// Whole dollars with thousands separators, e.g. `$500,000`
pub fn format_usd(value: f64) -> String {
    let rounded = value.abs().round() as u64;
    let digits = rounded.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if value < 0.0 && rounded > 0 {
        format!("-${}", grouped)
    } else {
        format!("${}", grouped)
    }
}

pub fn format_pct(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

/// Everything a section may draw on
pub struct ReportContext<'a> {
    pub snapshot: &'a BaselineSnapshot,
    pub responses: &'a [AgentResponse],
    pub execution: &'a ExecutionReport,
    pub certification: &'a Certification,
    pub snapshot_hash: &'a str,
}

impl<'a> ReportContext<'a> {
    fn response(&self, agent: AgentId) -> Option<&'a AgentResponse> {
        self.responses.iter().find(|r| r.agent_id == agent)
    }
}

fn section(kind: SectionKind, body: String, has_data: bool) -> ReportSection {
    ReportSection {
        kind,
        title: section_title(kind).to_string(),
        body,
        has_data,
    }
}

fn not_executed(kind: SectionKind, engine: &str, consequence: &str) -> ReportSection {
    section(
        kind,
        format!("The {} engine was not executed for this query; {}.", engine, consequence),
        false,
    )
}

/// Answer, calculations and recommendations of a remote agent, as reported
fn agent_summary(response: &AgentResponse) -> String {
    let mut body = response.answer.clone();

    if !response.calculations.is_empty() {
        let figures: Vec<String> = response
            .calculations
            .iter()
            .map(|(k, v)| format!("{} = {:.2}", k, v))
            .collect();
        body.push_str(&format!("\nFigures: {}.", figures.join(", ")));
    }
    if !response.recommendations.is_empty() {
        body.push_str(&format!("\nRecommended: {}", response.recommendations.join(" ")));
    }
    body
}

fn financial_integrity(ctx: &ReportContext) -> ReportSection {
    let s = ctx.snapshot;
    let lineage = match &s.model_run_id {
        Some(id) => format!("Baseline sourced from {} (model run {}).", s.source, id),
        None => format!("Baseline sourced from {}.", s.source),
    };

    if !s.has_real_data {
        return section(
            SectionKind::FinancialIntegrity,
            format!(
                "{} No verified financial data was available; every figure in this report is provisional.",
                lineage
            ),
            false,
        );
    }

    section(
        SectionKind::FinancialIntegrity,
        format!(
            "{} Cash {}, monthly revenue {}, monthly burn {}, debt {}. All agents read this same baseline.",
            lineage,
            format_usd(s.cash_balance),
            format_usd(s.monthly_revenue),
            format_usd(s.monthly_burn),
            format_usd(s.debt)
        ),
        true,
    )
}

fn forecast_validation(ctx: &ReportContext) -> ReportSection {
    let Some(forecast) = ctx.response(AgentId::Forecasting) else {
        return not_executed(
            SectionKind::ForecastValidation,
            "forecasting",
            "no forecast or confidence band is reported",
        );
    };

    let body = match (
        forecast.calculation("projectedMonthlyRevenue"),
        forecast.calculation("forecastLow"),
        forecast.calculation("forecastHigh"),
    ) {
        (Some(projected), Some(low), Some(high)) => format!(
            "Projected monthly revenue {} with a band of {} to {} (confidence {:.2}).",
            format_usd(projected),
            format_usd(low),
            format_usd(high),
            forecast.confidence
        ),
        _ => forecast.answer.clone(),
    };

    section(SectionKind::ForecastValidation, body, true)
}

fn remote_section(ctx: &ReportContext, kind: SectionKind, agent: AgentId, engine: &str, consequence: &str) -> ReportSection {
    match ctx.response(agent) {
        Some(response) => section(kind, agent_summary(response), true),
        None => not_executed(kind, engine, consequence),
    }
}

fn model_governance(ctx: &ReportContext) -> ReportSection {
    let s = ctx.snapshot;
    let Some(run_id) = &s.model_run_id else {
        return section(
            SectionKind::ModelGovernance,
            "No completed model run backs this answer; model governance and drift status cannot be assessed."
                .to_string(),
            false,
        );
    };

    let mut body = format!("Model run {} is the system of record for this report.", run_id);
    match &s.monte_carlo {
        Some(mc) if mc.usable => body.push_str(&format!(
            " Monte-Carlo job {} agrees with the runway heuristic and is in use.",
            mc.job_id
        )),
        Some(mc) => body.push_str(&format!(
            " Monte-Carlo job {} was excluded (unfinished or drifted from the runway heuristic).",
            mc.job_id
        )),
        None => body.push_str(" No Monte-Carlo simulation was available."),
    }

    let overrides: Vec<&str> = ctx
        .responses
        .iter()
        .flat_map(|r| r.thoughts.iter())
        .filter(|t| t.content.to_lowercase().contains("override"))
        .map(|t| t.content.as_str())
        .collect();
    if !overrides.is_empty() {
        body.push_str(&format!(" Override notes: {}", overrides.join(" ")));
    }

    section(SectionKind::ModelGovernance, body, true)
}

fn policy_compliance(ctx: &ReportContext) -> ReportSection {
    let Some(compliance) = ctx.response(AgentId::Compliance) else {
        return not_executed(
            SectionKind::PolicyCompliance,
            "compliance",
            "no policy mapping is reported",
        );
    };

    if compliance.policy_checks.is_empty() {
        return section(SectionKind::PolicyCompliance, compliance.answer.clone(), true);
    }

    let lines: Vec<String> = compliance
        .policy_checks
        .iter()
        .map(|c| format!("- {}: {} ({})", c.policy, c.status, c.details))
        .collect();
    let triggered = compliance
        .policy_checks
        .iter()
        .filter(|c| c.status != PolicyStatus::Pass)
        .count();

    section(
        SectionKind::PolicyCompliance,
        format!("{} of {} controls triggered.\n{}", triggered, lines.len(), lines.join("\n")),
        true,
    )
}

fn liquidity_survival(ctx: &ReportContext) -> ReportSection {
    let Some(risk) = ctx.response(AgentId::Risk) else {
        let mut body =
            "The risk engine was not executed for this query; no survival probability is reported.".to_string();
        if let Some(runway) = ctx.response(AgentId::Treasury).and_then(|t| t.calculation("runway")) {
            body.push_str(&format!(" Treasury reports {:.1} months of runway.", runway));
        }
        return section(SectionKind::LiquiditySurvival, body, false);
    };

    let mut body = match risk.calculation("survivalProbability") {
        Some(p) => format!("Survival probability {}.", format_pct(p)),
        None => risk.answer.clone(),
    };
    if let Some(runway) = risk.calculation("runway") {
        body.push_str(&format!(" Baseline runway {:.1} months.", runway));
    }
    if let (Some(runway), Some(p)) = (
        risk.calculation("stressedRunway"),
        risk.calculation("stressedSurvivalProbability"),
    ) {
        body.push_str(&format!(
            " Under the requested scenario: runway {:.1} months, survival {}.",
            runway,
            format_pct(p)
        ));
    }

    section(SectionKind::LiquiditySurvival, body, true)
}

fn data_quality(ctx: &ReportContext) -> ReportSection {
    let s = ctx.snapshot;
    let mut body = format!(
        "Data quality score {:.2} (source {}).",
        ctx.certification.data_quality_score, s.source
    );
    if !s.has_real_data {
        body.push_str(" No real financial data was found for this organization.");
    }
    if s.usable_survival_probability().is_some() {
        body.push_str(" A validated Monte-Carlo estimate is available.");
    }

    section(SectionKind::DataQuality, body, true)
}

fn audit_appendix(ctx: &ReportContext) -> ReportSection {
    let executed: Vec<String> = ctx.responses.iter().map(|r| r.agent_id.to_string()).collect();
    let failed: Vec<String> = ctx
        .execution
        .failed_agents()
        .iter()
        .map(|a| a.to_string())
        .collect();

    let mut lines = vec![
        format!("Snapshot fingerprint (sha256): {}", ctx.snapshot_hash),
        format!(
            "Agents executed: {}",
            if executed.is_empty() { "none".to_string() } else { executed.join(", ") }
        ),
    ];
    if !failed.is_empty() {
        lines.push(format!("Agents failed: {}", failed.join(", ")));
    }
    if let Some(mc) = &ctx.snapshot.monte_carlo {
        lines.push(format!(
            "Monte-Carlo job: {} (params {})",
            mc.job_id,
            mc.params_hash.as_deref().unwrap_or("n/a")
        ));
    }
    lines.push(format!(
        "Certification: {} (maturity {:.2}, policy adherence {:.2})",
        ctx.certification.overall_status,
        ctx.certification.maturity_score,
        ctx.certification.policy_adherence_score
    ));

    section(SectionKind::AuditAppendix, lines.join("\n"), true)
}

pub fn build_sections(ctx: &ReportContext) -> Vec<ReportSection> {
    SECTION_ORDER
        .iter()
        .map(|kind| match kind {
            SectionKind::FinancialIntegrity => financial_integrity(ctx),
            SectionKind::ForecastValidation => forecast_validation(ctx),
            SectionKind::VarianceDrivers => remote_section(
                ctx,
                SectionKind::VarianceDrivers,
                AgentId::Variance,
                "variance",
                "no driver decomposition is available",
            ),
            SectionKind::ModelGovernance => model_governance(ctx),
            SectionKind::CapitalAllocation => remote_section(
                ctx,
                SectionKind::CapitalAllocation,
                AgentId::CapitalAllocation,
                "capital allocation",
                "no allocation recommendation is made",
            ),
            SectionKind::AnomalyDetection => remote_section(
                ctx,
                SectionKind::AnomalyDetection,
                AgentId::Anomaly,
                "anomaly detection",
                "no anomaly or structural-break findings are reported",
            ),
            SectionKind::PolicyCompliance => policy_compliance(ctx),
            SectionKind::LiquiditySurvival => liquidity_survival(ctx),
            SectionKind::DataQuality => data_quality(ctx),
            SectionKind::AuditAppendix => audit_appendix(ctx),
        })
        .collect()
}

/// Plain-text rendering of the sections, as used in the deterministic answer
pub fn render_sections(sections: &[ReportSection]) -> String {
    sections
        .iter()
        .map(|s| format!("## {}\n{}", s.title, s.body))
        .collect::<Vec<_>>()
        .join("\n\n")
}
