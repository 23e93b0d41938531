// Flow readiness analysis
// Decides, per flow, whether the credential can run it now, could after
// assuming a discovered role, or is blocked outright

use crate::catalog::FlowSpec;
use crate::models::{DiscoveredRole, FlowPriority, FlowStatus, ProbeOutcome};
use crate::scoring;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const ROLES_PER_RECOMMENDATION: usize = 2;
const BLOCKED_SAMPLE: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowAnalysis {
    pub flow_id: String,
    pub name: String,
    pub priority: FlowPriority,
    pub status: FlowStatus,
    pub completion_percent: u8,
    pub score: u32,
    pub accessible_operations: Vec<String>,
    pub missing_operations: Vec<String>,
    /// Discovered roles whose attached policies match this flow's
    /// escalation markers, best first.
    pub candidate_roles: Vec<DiscoveredRole>,
}

/// Analyze one flow against the probe rows. `roles` is None when role
/// discovery was skipped or failed, which simply contributes no
/// escalation candidates.
pub fn analyze_flow(
    flow: &FlowSpec,
    rows: &HashMap<String, ProbeOutcome>,
    roles: Option<&[DiscoveredRole]>,
) -> FlowAnalysis {
    let mut accessible = Vec::new();
    let mut missing = Vec::new();
    for op_id in &flow.operations {
        if rows.get(op_id).map(|row| row.accessible).unwrap_or(false) {
            accessible.push(op_id.clone());
        } else {
            missing.push(op_id.clone());
        }
    }

    let completion_percent = if flow.operations.is_empty() {
        0
    } else {
        ((accessible.len() as f64 * 100.0) / flow.operations.len() as f64).round() as u8
    };
    let score = scoring::flow_score(flow, rows);

    let mut candidate_roles: Vec<DiscoveredRole> = roles
        .map(|all| {
            all.iter()
                .filter(|role| {
                    flow.escalation_markers.iter().any(|marker| {
                        role.attached_policies
                            .iter()
                            .any(|policy| policy.contains(marker.as_str()))
                    })
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    candidate_roles.sort_by(|a, b| b.weight.cmp(&a.weight).then(a.role_name.cmp(&b.role_name)));

    // Precedence: full coverage wins outright, a partial footprint can
    // still escalate through a matched role, and zero coverage is a
    // dead end no matter what roles exist.
    let status = if missing.is_empty() {
        FlowStatus::Ready
    } else if accessible.is_empty() {
        FlowStatus::Blocked
    } else if !candidate_roles.is_empty() {
        FlowStatus::EscalationNeeded
    } else {
        FlowStatus::BlockedNoEscalation
    };

    FlowAnalysis {
        flow_id: flow.id.clone(),
        name: flow.name.clone(),
        priority: flow.priority,
        status,
        completion_percent,
        score,
        accessible_operations: accessible,
        missing_operations: missing,
        candidate_roles,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub flow_id: String,
    pub status: FlowStatus,
    pub summary: String,
    /// Role names worth trying, at most two, best first.
    pub roles: Vec<String>,
}

/// Ordered guidance: READY flows first by score, then flows one role
/// assumption away, then a short sample of what stays blocked.
pub fn recommendations(analyses: &[FlowAnalysis]) -> Vec<Recommendation> {
    let mut out = Vec::new();

    let mut ready: Vec<&FlowAnalysis> = analyses
        .iter()
        .filter(|a| a.status == FlowStatus::Ready)
        .collect();
    ready.sort_by(|a, b| b.score.cmp(&a.score).then(a.flow_id.cmp(&b.flow_id)));
    for analysis in ready {
        out.push(Recommendation {
            flow_id: analysis.flow_id.clone(),
            status: FlowStatus::Ready,
            summary: format!("{} is fully available (score {})", analysis.name, analysis.score),
            roles: Vec::new(),
        });
    }

    for analysis in analyses
        .iter()
        .filter(|a| a.status == FlowStatus::EscalationNeeded)
    {
        let roles: Vec<String> = analysis
            .candidate_roles
            .iter()
            .take(ROLES_PER_RECOMMENDATION)
            .map(|role| role.role_name.clone())
            .collect();
        out.push(Recommendation {
            flow_id: analysis.flow_id.clone(),
            status: FlowStatus::EscalationNeeded,
            summary: format!(
                "{} is {}% complete; an assumable role could close the gap",
                analysis.name, analysis.completion_percent
            ),
            roles,
        });
    }

    for analysis in analyses
        .iter()
        .filter(|a| {
            a.status == FlowStatus::Blocked || a.status == FlowStatus::BlockedNoEscalation
        })
        .take(BLOCKED_SAMPLE)
    {
        out.push(Recommendation {
            flow_id: analysis.flow_id.clone(),
            status: analysis.status,
            summary: format!(
                "{} is blocked ({} of {} operations missing)",
                analysis.name,
                analysis.missing_operations.len(),
                analysis.missing_operations.len() + analysis.accessible_operations.len()
            ),
            roles: Vec::new(),
        });
    }

    out
}
