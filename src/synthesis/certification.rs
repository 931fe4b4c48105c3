//! Certification scoring
//!
//! maturity = 0.5 * avg confidence + 0.5 * data quality - penalties, clamped
//! to [0, 1]. Penalties stack per category: any failed policy, any warning,
//! any failed agent. A failed agent also occupies a zero slot in both the
//! confidence and the data-quality means, so adding a failure can only lower
//! the score.

use crate::config::CertificationWeights;
use crate::models::{
    AgentResponse, BaselineSnapshot, Certification, CertificationStatus, PolicyCheck, PolicyStatus, SnapshotSource,
    TaskStatus,
};

/// Used when no policy was evaluated at all
const NEUTRAL_POLICY_ADHERENCE: f64 = 0.5;

pub fn policy_score(status: PolicyStatus) -> f64 {
    match status {
        PolicyStatus::Pass => 1.0,
        PolicyStatus::Warning => 0.7,
        PolicyStatus::Fail => 0.0,
    }
}

pub fn policy_adherence(checks: &[&PolicyCheck]) -> f64 {
    if checks.is_empty() {
        return NEUTRAL_POLICY_ADHERENCE;
    }
    checks.iter().map(|c| policy_score(c.status)).sum::<f64>() / checks.len() as f64
}

fn is_failed(response: &AgentResponse) -> bool {
    response.status == TaskStatus::Failed
}

/// Quality implied by where the baseline came from
pub fn snapshot_data_quality(snapshot: &BaselineSnapshot) -> f64 {
    let mut score: f64 = match snapshot.source {
        SnapshotSource::ModelRun => 0.9,
        SnapshotSource::TransactionsFallback => 0.6,
        SnapshotSource::SnapshotError => 0.2,
    };
    if snapshot.usable_survival_probability().is_some() {
        score += 0.1;
    }
    if !snapshot.has_real_data {
        score -= 0.3;
    }
    score.clamp(0.0, 1.0)
}

/// Mean over every agent slot. A completed agent contributes its reported
/// `dataQualityScore` capped at the snapshot quality (or the snapshot quality
/// itself); a failed agent contributes 0. With no agents at all the snapshot
/// quality stands alone.
pub fn data_quality_score(responses: &[AgentResponse], failed_agents: usize, snapshot: &BaselineSnapshot) -> f64 {
    let baseline = snapshot_data_quality(snapshot);
    let slots = responses.len() + failed_agents;
    if slots == 0 {
        return baseline;
    }

    let total: f64 = responses
        .iter()
        .filter(|r| !is_failed(r))
        .map(|r| {
            r.calculation("dataQualityScore")
                .map(|score| if score > 1.0 { score / 100.0 } else { score })
                .map_or(baseline, |score| score.clamp(0.0, 1.0).min(baseline))
        })
        .sum();
    total / slots as f64
}

/// Failed agents count as zero confidence
fn average_confidence(responses: &[AgentResponse], failed_agents: usize) -> f64 {
    let slots = responses.len() + failed_agents;
    if slots == 0 {
        return 0.0;
    }
    let total: f64 = responses.iter().filter(|r| !is_failed(r)).map(|r| r.confidence).sum();
    total / slots as f64
}

/// `failed_agents` counts agents that ran and failed in the executor; skipped
/// agents are not failures. Responses reporting `Failed` count as failures too.
pub fn certify(
    responses: &[AgentResponse],
    failed_agents: usize,
    snapshot: &BaselineSnapshot,
    weights: &CertificationWeights,
) -> Certification {
    let checks: Vec<&PolicyCheck> = responses.iter().flat_map(|r| r.policy_checks.iter()).collect();
    let any_fail = checks.iter().any(|c| c.status == PolicyStatus::Fail);
    let any_warning = checks.iter().any(|c| c.status == PolicyStatus::Warning);
    let agent_failed = failed_agents > 0 || responses.iter().any(is_failed);

    let avg_confidence = average_confidence(responses, failed_agents);
    let data_quality = data_quality_score(responses, failed_agents, snapshot);

    let mut penalties = 0.0;
    if any_fail {
        penalties += weights.policy_fail_penalty;
    }
    if any_warning {
        penalties += weights.policy_warning_penalty;
    }
    if agent_failed {
        penalties += weights.agent_failure_penalty;
    }

    let maturity = (0.5 * avg_confidence + 0.5 * data_quality - penalties).clamp(0.0, 1.0);

    let overall_status = if any_fail || agent_failed {
        CertificationStatus::NotInstitutional
    } else if any_warning {
        CertificationStatus::Conditional
    } else {
        CertificationStatus::InstitutionalGrade
    };

    Certification {
        maturity_score: maturity,
        policy_adherence_score: policy_adherence(&checks),
        data_quality_score: data_quality,
        overall_status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentId;
    use uuid::Uuid;

    fn check(policy: &str, status: PolicyStatus) -> PolicyCheck {
        PolicyCheck {
            policy: policy.to_string(),
            status,
            details: String::new(),
        }
    }

    fn compliance_response(checks: Vec<PolicyCheck>) -> AgentResponse {
        let mut response = AgentResponse::completed(AgentId::Compliance, Uuid::new_v4(), "checked", 0.9);
        response.policy_checks = checks;
        response
    }

    fn model_run_snapshot() -> BaselineSnapshot {
        BaselineSnapshot {
            cash_balance: 500_000.0,
            monthly_burn: 80_000.0,
            monthly_revenue: 60_000.0,
            has_real_data: true,
            ..BaselineSnapshot::empty(Uuid::nil(), SnapshotSource::ModelRun)
        }
    }

    #[test]
    fn test_all_pass_is_institutional_grade() {
        let responses = vec![compliance_response(vec![
            check("liquidity_floor", PolicyStatus::Pass),
            check("data_provenance", PolicyStatus::Pass),
        ])];
        let cert = certify(&responses, 0, &model_run_snapshot(), &CertificationWeights::default());

        // 0.5 * 0.9 + 0.5 * 0.9
        assert!((cert.maturity_score - 0.9).abs() < 1e-9);
        assert_eq!(cert.policy_adherence_score, 1.0);
        assert_eq!(cert.overall_status, CertificationStatus::InstitutionalGrade);
    }

    #[test]
    fn test_adding_a_failed_policy_strictly_lowers_maturity() {
        let snapshot = model_run_snapshot();
        let weights = CertificationWeights::default();
        let passing = vec![check("liquidity_floor", PolicyStatus::Pass)];
        let before = certify(&[compliance_response(passing.clone())], 0, &snapshot, &weights);

        let mut with_fail = passing;
        with_fail.push(check("strategic_deviation", PolicyStatus::Fail));
        let after = certify(&[compliance_response(with_fail)], 0, &snapshot, &weights);

        assert!(after.maturity_score < before.maturity_score);
        assert!(after.policy_adherence_score < before.policy_adherence_score);
        assert_ne!(after.overall_status, CertificationStatus::InstitutionalGrade);
        assert_eq!(after.overall_status, CertificationStatus::NotInstitutional);
    }

    #[test]
    fn test_penalties_stack_and_clamp() {
        let snapshot = model_run_snapshot();
        let weights = CertificationWeights::default();
        let responses = vec![compliance_response(vec![
            check("a", PolicyStatus::Fail),
            check("b", PolicyStatus::Warning),
        ])];

        let cert = certify(&responses, 0, &snapshot, &weights);
        // 0.9 - 0.35 - 0.15
        assert!((cert.maturity_score - 0.4).abs() < 1e-9);

        // 0.5 * 0.45 + 0.5 * 0.45 - 0.35 - 0.15 - 0.25 clamps to zero
        let cert = certify(&responses, 1, &snapshot, &weights);
        assert_eq!(cert.maturity_score, 0.0);

        let empty = certify(&[], 3, &BaselineSnapshot::empty(Uuid::nil(), SnapshotSource::SnapshotError), &weights);
        assert_eq!(empty.maturity_score, 0.0);
    }

    #[test]
    fn test_agent_failure_never_raises_maturity() {
        let snapshot = model_run_snapshot();
        let weights = CertificationWeights::default();
        let treasury = AgentResponse::completed(AgentId::Treasury, Uuid::nil(), "runway", 0.9);
        let analytics = AgentResponse::completed(AgentId::Analytics, Uuid::nil(), "kpis", 0.8)
            .with_calculation("dataQualityScore", 20.0);

        let before = certify(&[treasury.clone(), analytics], 0, &snapshot, &weights);
        let analytics_failed = certify(&[treasury.clone()], 1, &snapshot, &weights);
        assert!(analytics_failed.maturity_score <= before.maturity_score);
        assert!(analytics_failed.data_quality_score <= before.data_quality_score);

        let weak = AgentResponse::completed(AgentId::Risk, Uuid::nil(), "unsure", 0.1);
        let one_failed = certify(&[treasury.clone(), weak], 1, &snapshot, &weights);
        let two_failed = certify(&[treasury], 2, &snapshot, &weights);
        assert!(one_failed.maturity_score > 0.0);
        assert!(two_failed.maturity_score < one_failed.maturity_score);
    }

    #[test]
    fn test_failed_status_response_counts_as_agent_failure() {
        let snapshot = model_run_snapshot();
        let weights = CertificationWeights::default();
        let mut failed = AgentResponse::completed(AgentId::Variance, Uuid::nil(), "upstream error", 0.9);
        failed.status = TaskStatus::Failed;

        let cert = certify(&[failed], 0, &snapshot, &weights);
        assert_eq!(cert.overall_status, CertificationStatus::NotInstitutional);
        assert_eq!(cert.maturity_score, 0.0);

        let ok = AgentResponse::completed(AgentId::Treasury, Uuid::nil(), "runway", 0.9);
        let mut failed = ok.clone();
        failed.status = TaskStatus::Failed;
        let mixed = certify(&[ok.clone(), failed], 0, &snapshot, &weights);
        let clean = certify(&[ok.clone(), ok], 0, &snapshot, &weights);
        assert!(mixed.maturity_score < clean.maturity_score);
    }

    #[test]
    fn test_warning_only_is_conditional_and_agent_failure_is_not_institutional() {
        let snapshot = model_run_snapshot();
        let weights = CertificationWeights::default();
        let warned = vec![compliance_response(vec![check("dual_authorization", PolicyStatus::Warning)])];

        let cert = certify(&warned, 0, &snapshot, &weights);
        assert_eq!(cert.overall_status, CertificationStatus::Conditional);
        assert!((cert.policy_adherence_score - 0.7).abs() < 1e-9);

        let cert = certify(&[AgentResponse::completed(AgentId::Treasury, Uuid::nil(), "x", 0.9)], 1, &snapshot, &weights);
        assert_eq!(cert.overall_status, CertificationStatus::NotInstitutional);
    }

    #[test]
    fn test_neutral_adherence_without_policies() {
        let responses = vec![AgentResponse::completed(AgentId::Treasury, Uuid::nil(), "x", 0.9)];
        let cert = certify(&responses, 0, &model_run_snapshot(), &CertificationWeights::default());
        assert_eq!(cert.policy_adherence_score, 0.5);
    }

    #[test]
    fn test_data_quality_sources() {
        let reported = vec![
            AgentResponse::completed(AgentId::Analytics, Uuid::nil(), "x", 0.8).with_calculation("dataQualityScore", 72.0),
        ];
        assert!((data_quality_score(&reported, 0, &model_run_snapshot()) - 0.72).abs() < 1e-9);

        let fallback = BaselineSnapshot {
            has_real_data: true,
            ..BaselineSnapshot::empty(Uuid::nil(), SnapshotSource::TransactionsFallback)
        };
        assert!((data_quality_score(&[], 0, &fallback) - 0.6).abs() < 1e-9);

        let nothing = BaselineSnapshot::empty(Uuid::nil(), SnapshotSource::ModelRun);
        assert!((data_quality_score(&[], 0, &nothing) - 0.6).abs() < 1e-9);

        // A report above the snapshot quality is capped; a failed slot adds zero.
        let optimistic = vec![
            AgentResponse::completed(AgentId::Analytics, Uuid::nil(), "x", 0.8).with_calculation("dataQualityScore", 99.0),
        ];
        assert!((data_quality_score(&optimistic, 0, &fallback) - 0.6).abs() < 1e-9);
        assert!((data_quality_score(&optimistic, 1, &fallback) - 0.3).abs() < 1e-9);
    }
}
