// Flow readiness verdicts, completion math, recommendation ordering, and
// the full plan-probe-analyze path over the embedded catalog.

mod common;

use common::{test_context, ScriptedInvoker};
use keyreach::catalog::{Catalog, FlowSpec};
use keyreach::engine::{build_plan, EngineConfig, ProbeEngine};
use keyreach::flows::{analyze_flow, recommendations, FlowAnalysis};
use keyreach::models::{DiscoveredRole, FlowPriority, FlowStatus, ProbeOutcome};
use keyreach::scoring::total_score;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn flow(operations: &[&str], markers: &[&str]) -> FlowSpec {
    FlowSpec {
        id: "demo_flow".to_string(),
        name: "Demo Flow".to_string(),
        priority: FlowPriority::Critical,
        description: String::new(),
        operations: operations.iter().map(|s| s.to_string()).collect(),
        escalation_markers: markers.iter().map(|s| s.to_string()).collect(),
    }
}

fn row(id: &str, accessible: bool, score: u32) -> ProbeOutcome {
    ProbeOutcome {
        operation_id: id.to_string(),
        accessible,
        score,
        elapsed_ms: 12,
        attempts: 1,
        error_code: if accessible {
            None
        } else {
            Some("AccessDenied".to_string())
        },
    }
}

fn rows(entries: &[ProbeOutcome]) -> HashMap<String, ProbeOutcome> {
    entries
        .iter()
        .map(|r| (r.operation_id.clone(), r.clone()))
        .collect()
}

fn role(name: &str, policies: &[&str], weight: u32) -> DiscoveredRole {
    DiscoveredRole {
        role_name: name.to_string(),
        arn: format!("arn:aws:iam::123456789012:role/{name}"),
        attached_policies: policies
            .iter()
            .map(|p| format!("arn:aws:iam::aws:policy/{p}"))
            .collect(),
        weight,
    }
}

#[test]
fn fully_accessible_flow_is_ready() {
    let spec = flow(&["a", "b"], &["AdministratorAccess"]);
    let probed = rows(&[row("a", true, 40), row("b", true, 30)]);
    let matching = vec![role("admin", &["AdministratorAccess"], 100)];

    let analysis = analyze_flow(&spec, &probed, Some(&matching));
    assert_eq!(analysis.status, FlowStatus::Ready);
    assert_eq!(analysis.completion_percent, 100);
    assert_eq!(analysis.score, 70);
    assert!(analysis.missing_operations.is_empty());
    // Candidates are still reported for context even when nothing is
    // missing.
    assert_eq!(analysis.candidate_roles.len(), 1);
}

#[test]
fn partial_access_without_discovery_has_no_escalation_path() {
    let spec = flow(&["a", "b"], &["AdministratorAccess"]);
    let probed = rows(&[row("a", true, 40)]);

    let analysis = analyze_flow(&spec, &probed, None);
    assert_eq!(analysis.status, FlowStatus::BlockedNoEscalation);
    assert_eq!(analysis.missing_operations, vec!["b".to_string()]);
    assert!(analysis.candidate_roles.is_empty());
}

#[test]
fn matching_role_turns_blocked_into_escalation_needed() {
    let spec = flow(&["a", "b"], &["AmazonS3FullAccess"]);
    let probed = rows(&[row("a", true, 40)]);
    let discovered = vec![
        role("reader", &["ReadOnlyAccess"], 0),
        role("s3-admin", &["AmazonS3FullAccess"], 60),
        role("superuser", &["AmazonS3FullAccess", "AdministratorAccess"], 160),
    ];

    let analysis = analyze_flow(&spec, &probed, Some(&discovered));
    assert_eq!(analysis.status, FlowStatus::EscalationNeeded);
    let names: Vec<&str> = analysis
        .candidate_roles
        .iter()
        .map(|r| r.role_name.as_str())
        .collect();
    // Heaviest candidate first, non-matching roles dropped.
    assert_eq!(names, vec!["superuser", "s3-admin"]);
}

#[test]
fn no_matching_role_is_blocked_no_escalation() {
    let spec = flow(&["a", "b"], &["AmazonS3FullAccess"]);
    let probed = rows(&[row("a", true, 40)]);
    let discovered = vec![role("reader", &["ReadOnlyAccess"], 0)];

    let analysis = analyze_flow(&spec, &probed, Some(&discovered));
    assert_eq!(analysis.status, FlowStatus::BlockedNoEscalation);
    assert!(analysis.candidate_roles.is_empty());
}

#[test]
fn zero_accessible_operations_is_blocked_even_with_matching_roles() {
    let spec = flow(&["a"], &["AdministratorAccess"]);
    let probed = rows(&[]);
    let matching = vec![role("admin", &["AdministratorAccess"], 100)];
    let analysis = analyze_flow(&spec, &probed, Some(&matching));
    assert_eq!(analysis.status, FlowStatus::Blocked);
    // Matched roles are still surfaced even though they cannot unblock a
    // flow with no foothold at all.
    assert_eq!(analysis.candidate_roles.len(), 1);
}

#[test]
fn completion_percent_rounds_to_nearest() {
    let spec = flow(&["a", "b", "c"], &[]);
    let one_of_three = rows(&[row("a", true, 10)]);
    assert_eq!(analyze_flow(&spec, &one_of_three, None).completion_percent, 33);

    let two_of_three = rows(&[row("a", true, 10), row("b", true, 10)]);
    assert_eq!(analyze_flow(&spec, &two_of_three, None).completion_percent, 67);
}

#[test]
fn flow_score_counts_accessible_operations_only() {
    let spec = flow(&["a", "b", "c"], &[]);
    let probed = rows(&[row("a", true, 40), row("b", false, 0), row("c", true, 15)]);
    assert_eq!(analyze_flow(&spec, &probed, None).score, 55);
}

#[test]
fn recommendations_order_ready_then_escalation_then_blocked_sample() {
    let mut analyses = Vec::new();

    let mut modest = analyze_flow(&flow(&["a"], &[]), &rows(&[row("a", true, 10)]), Some(&[]));
    modest.flow_id = "modest".to_string();
    analyses.push(modest);

    let mut strong = analyze_flow(&flow(&["a"], &[]), &rows(&[row("a", true, 99)]), Some(&[]));
    strong.flow_id = "strong".to_string();
    analyses.push(strong);

    let discovered = vec![
        role("first", &["AmazonS3FullAccess"], 90),
        role("second", &["AmazonS3FullAccess"], 60),
        role("third", &["AmazonS3FullAccess"], 30),
    ];
    let mut needs_role = analyze_flow(
        &flow(&["a", "b"], &["AmazonS3FullAccess"]),
        &rows(&[row("a", true, 10)]),
        Some(&discovered),
    );
    needs_role.flow_id = "needs_role".to_string();
    analyses.push(needs_role);

    for i in 0..4 {
        let mut blocked = analyze_flow(&flow(&["a", "b"], &[]), &rows(&[]), Some(&[]));
        blocked.flow_id = format!("blocked_{i}");
        analyses.push(blocked);
    }

    let recs = recommendations(&analyses);
    let ids: Vec<&str> = recs.iter().map(|r| r.flow_id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "strong",
            "modest",
            "needs_role",
            "blocked_0",
            "blocked_1",
            "blocked_2"
        ]
    );
    // At most two roles are suggested even when more match.
    assert_eq!(recs[2].roles, vec!["first".to_string(), "second".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn granting_the_user_escalation_flow_scores_critical_and_ready() {
    let catalog = Catalog::embedded().unwrap();
    let invoker = Arc::new(ScriptedInvoker::new());
    for id in [
        "iam_create_user",
        "iam_attach_user_policy",
        "iam_create_access_key",
        "iam_put_user_policy",
        "iam_create_login_profile",
    ] {
        invoker.grant(id);
    }

    let engine = ProbeEngine::new(invoker, EngineConfig::default());
    let plan = build_plan(&catalog, Some(FlowPriority::Critical));
    let run = engine
        .run(&plan, &test_context(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(total_score(&run.rows), 270);
    assert_eq!(catalog.category_for(270), "critical");

    let by_id: HashMap<String, ProbeOutcome> = run
        .rows
        .iter()
        .map(|r| (r.operation_id.clone(), r.clone()))
        .collect();
    let analyses: Vec<FlowAnalysis> = catalog
        .flows_with_priority(Some(FlowPriority::Critical))
        .into_iter()
        .map(|spec| analyze_flow(spec, &by_id, Some(&[])))
        .collect();

    let user_flow = analyses
        .iter()
        .find(|a| a.flow_id == "iam_user_escalation")
        .unwrap();
    assert_eq!(user_flow.status, FlowStatus::Ready);
    assert_eq!(user_flow.completion_percent, 100);
    assert_eq!(user_flow.score, 270);

    let recs = recommendations(&analyses);
    assert_eq!(recs[0].flow_id, "iam_user_escalation");
    assert_eq!(recs[0].status, FlowStatus::Ready);
    // One ready flow plus the three sampled blocked flows.
    assert_eq!(recs.len(), 4);
}
