// Report assembly and rendering
// Builds the final report struct, prints the console summary, and writes
// timestamped JSON and Markdown exports

use crate::catalog::Catalog;
use crate::error::{Result, ScanError};
use crate::flows::{FlowAnalysis, Recommendation};
use crate::models::{FlowPriority, Identity, ProbeOutcome};
use crate::scoring;
use crate::tracker::PerformanceSummary;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One probed operation joined with its catalog metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationReport {
    pub id: String,
    pub service: String,
    pub action: String,
    pub description: String,
    pub weight: u32,
    pub accessible: bool,
    pub score: u32,
    pub elapsed_ms: u64,
    pub attempts: u32,
    pub error_code: Option<String>,
}

/// Everything a scan produced. Serializes as the JSON export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub generated_at: DateTime<Utc>,
    pub region: String,
    pub access_key_masked: String,
    pub identity: Identity,
    pub principal: String,
    pub filter: Option<FlowPriority>,
    pub interrupted: bool,
    pub operations: Vec<OperationReport>,
    pub flows: Vec<FlowAnalysis>,
    pub total_score: u32,
    pub category: String,
    pub performance: PerformanceSummary,
    pub recommendations: Vec<Recommendation>,
}

#[allow(clippy::too_many_arguments)]
pub fn build_report(
    catalog: &Catalog,
    region: &str,
    access_key_masked: String,
    identity: Identity,
    filter: Option<FlowPriority>,
    interrupted: bool,
    rows: &[ProbeOutcome],
    flows: Vec<FlowAnalysis>,
    performance: PerformanceSummary,
    recommendations: Vec<Recommendation>,
) -> ProbeReport {
    let principal = identity.principal_name().to_string();
    let operations = rows
        .iter()
        .map(|row| {
            let spec = catalog.operation(&row.operation_id);
            OperationReport {
                id: row.operation_id.clone(),
                service: spec.map(|s| s.service.clone()).unwrap_or_default(),
                action: spec.map(|s| s.action.clone()).unwrap_or_default(),
                description: spec.map(|s| s.description.clone()).unwrap_or_default(),
                weight: spec.map(|s| s.weight).unwrap_or_default(),
                accessible: row.accessible,
                score: row.score,
                elapsed_ms: row.elapsed_ms,
                attempts: row.attempts,
                error_code: row.error_code.clone(),
            }
        })
        .collect();
    let total_score = scoring::total_score(rows);
    let category = catalog.category_for(total_score).to_string();

    ProbeReport {
        generated_at: Utc::now(),
        region: region.to_string(),
        access_key_masked,
        identity,
        principal,
        filter,
        interrupted,
        operations,
        flows,
        total_score,
        category,
        performance,
        recommendations,
    }
}

/// Print the human summary to stdout.
pub fn render_console(report: &ProbeReport) {
    let wide = "=".repeat(66);
    let thin = "-".repeat(66);

    println!("{wide}");
    println!("  keyreach :: AWS permission probe");
    println!("{wide}");
    println!(
        "  Generated    {}",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  Region       {}", report.region);
    println!("  Access key   {}", report.access_key_masked);
    println!("  Account      {}", report.identity.account_id);
    println!("  Principal    {}", report.principal);
    println!("  ARN          {}", report.identity.arn);
    if let Some(filter) = report.filter {
        println!("  Filter       {} flows only", filter.label());
    }
    if report.interrupted {
        println!("  NOTE         scan interrupted; results are partial");
    }

    let accessible = report.operations.iter().filter(|o| o.accessible).count();
    println!("{thin}");
    println!(
        "  Operations   {} probed, {} accessible",
        report.operations.len(),
        accessible
    );
    println!("{thin}");
    for op in &report.operations {
        let marker = if op.accessible { "[+]" } else { "[-]" };
        let note = if op.accessible {
            format!("{} pts", op.score)
        } else {
            op.error_code.clone().unwrap_or_else(|| "denied".to_string())
        };
        println!(
            "  {marker} {:<36} {:>24}  {:>6} ms  x{}",
            op.id, note, op.elapsed_ms, op.attempts
        );
    }

    println!("{thin}");
    println!("  Flows");
    println!("{thin}");
    for flow in &report.flows {
        println!(
            "  [{}] {} ({}, {}% complete, {} pts)",
            flow.status.label(),
            flow.name,
            flow.priority.label(),
            flow.completion_percent,
            flow.score
        );
        if !flow.missing_operations.is_empty() {
            println!("        missing: {}", flow.missing_operations.join(", "));
        }
        for role in flow.candidate_roles.iter().take(2) {
            println!(
                "        candidate role: {} (weight {})",
                role.role_name, role.weight
            );
        }
    }

    println!("{thin}");
    println!(
        "  Total score  {} ({})",
        report.total_score, report.category
    );
    let perf = &report.performance;
    println!(
        "  Probes       {} total, {} ok, {} failed ({:.1}% success)",
        perf.total_probes, perf.successful_probes, perf.failed_probes, perf.success_rate_percent
    );
    for slow in &perf.slowest {
        println!(
            "        slowest: {} avg {} ms",
            slow.operation_id, slow.average_ms
        );
    }

    if !report.recommendations.is_empty() {
        println!("{thin}");
        println!("  Recommendations");
        println!("{thin}");
        for (i, rec) in report.recommendations.iter().enumerate() {
            println!("  {}. {}", i + 1, rec.summary);
            if !rec.roles.is_empty() {
                println!("     try roles: {}", rec.roles.join(", "));
            }
        }
    }
    println!("{wide}");
}

/// Write the report as pretty JSON into `dir` and return the path.
pub fn export_json(report: &ProbeReport, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(format!(
        "keyreach_report_{}.json",
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    let payload =
        serde_json::to_string_pretty(report).map_err(|e| ScanError::Export(e.to_string()))?;
    fs::write(&path, payload)?;
    Ok(path)
}

/// Write the report as Markdown into `dir` and return the path.
pub fn export_markdown(report: &ProbeReport, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(format!(
        "keyreach_report_{}.md",
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    fs::write(&path, markdown_body(report))?;
    Ok(path)
}

fn markdown_body(report: &ProbeReport) -> String {
    let mut md = String::new();
    md.push_str("# keyreach report\n\n");
    md.push_str(&format!(
        "- Generated: {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    md.push_str(&format!("- Region: {}\n", report.region));
    md.push_str(&format!("- Access key: {}\n", report.access_key_masked));
    md.push_str(&format!("- Account: {}\n", report.identity.account_id));
    md.push_str(&format!(
        "- Principal: {} ({})\n",
        report.principal, report.identity.arn
    ));
    if let Some(filter) = report.filter {
        md.push_str(&format!("- Filter: {} flows only\n", filter.label()));
    }
    if report.interrupted {
        md.push_str("- **Interrupted: results are partial**\n");
    }
    md.push_str(&format!(
        "\n## Total\n\n**{} points** ({})\n",
        report.total_score, report.category
    ));

    md.push_str("\n## Operations\n\n");
    md.push_str("| Operation | Service | Access | Score | Latency | Attempts | Error |\n");
    md.push_str("|---|---|---|---|---|---|---|\n");
    for op in &report.operations {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} ms | {} | {} |\n",
            op.id,
            op.service,
            if op.accessible { "yes" } else { "no" },
            op.score,
            op.elapsed_ms,
            op.attempts,
            op.error_code.as_deref().unwrap_or("-"),
        ));
    }

    md.push_str("\n## Flows\n\n");
    for flow in &report.flows {
        md.push_str(&format!(
            "### {} ({})\n\n",
            flow.name,
            flow.priority.label()
        ));
        md.push_str(&format!("- Status: {}\n", flow.status.label()));
        md.push_str(&format!("- Completion: {}%\n", flow.completion_percent));
        md.push_str(&format!("- Score: {}\n", flow.score));
        if !flow.missing_operations.is_empty() {
            md.push_str(&format!(
                "- Missing: {}\n",
                flow.missing_operations.join(", ")
            ));
        }
        for role in flow.candidate_roles.iter().take(2) {
            md.push_str(&format!(
                "- Candidate role: `{}` (weight {})\n",
                role.role_name, role.weight
            ));
        }
        md.push('\n');
    }

    md.push_str("## Performance\n\n");
    let perf = &report.performance;
    md.push_str(&format!(
        "{} probes, {} succeeded, {} failed ({:.1}% success)\n",
        perf.total_probes, perf.successful_probes, perf.failed_probes, perf.success_rate_percent
    ));
    if !perf.slowest.is_empty() {
        md.push_str("\nSlowest operations:\n\n");
        for slow in &perf.slowest {
            md.push_str(&format!(
                "- {}: {} ms average\n",
                slow.operation_id, slow.average_ms
            ));
        }
    }

    if !report.recommendations.is_empty() {
        md.push_str("\n## Recommendations\n\n");
        for (i, rec) in report.recommendations.iter().enumerate() {
            md.push_str(&format!("{}. {}\n", i + 1, rec.summary));
            if !rec.roles.is_empty() {
                md.push_str(&format!("   roles: {}\n", rec.roles.join(", ")));
            }
        }
    }
    md
}
