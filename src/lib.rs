pub mod aws;
pub mod cache;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod flows;
pub mod invoker;
pub mod models;
pub mod report;
pub mod roles;
pub mod scoring;
pub mod tracker;
pub mod validator;

// Re-export commonly used items
pub use cache::*;
pub use catalog::*;
pub use engine::*;
pub use error::*;
pub use flows::*;
pub use invoker::*;
pub use models::*;
pub use report::*;
pub use roles::*;
pub use scoring::*;
pub use tracker::*;
pub use validator::*;

use crate::aws::AwsInvoker;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Scan settings beyond the credential itself.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub region: String,
    /// Restrict probing to flows of one priority.
    pub filter: Option<FlowPriority>,
    pub concurrency: usize,
    /// Alternative catalog file; the embedded catalog is used when unset.
    pub catalog_path: Option<PathBuf>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            filter: None,
            concurrency: DEFAULT_CONCURRENCY,
            catalog_path: None,
        }
    }
}

/// Run a full scan with a fresh cancellation token.
pub async fn scan(credential: Credential, options: ScanOptions) -> Result<ProbeReport> {
    scan_with(credential, options, CancellationToken::new()).await
}

/// Run a full scan under the caller's cancellation token. Cancellation is
/// cooperative: in-flight probes finish, role discovery is skipped, and
/// the report is marked partial.
pub async fn scan_with(
    credential: Credential,
    options: ScanOptions,
    cancel: CancellationToken,
) -> Result<ProbeReport> {
    let catalog = match &options.catalog_path {
        Some(path) => Catalog::from_path(path)?,
        None => Catalog::embedded()?,
    };

    let invoker = Arc::new(AwsInvoker::new(&catalog)?);
    let tracker = PerformanceTracker::new();
    let mut ctx = ProbeContext::new(credential.clone(), options.region.clone());

    let validator = CredentialValidator::new(Arc::clone(&invoker), tracker.clone());
    let identity = validator.validate(&mut ctx).await?;
    info!(
        account = %identity.account_id,
        principal = identity.principal_name(),
        "credential validated"
    );

    let engine = ProbeEngine::with_tracker(
        Arc::clone(&invoker) as Arc<dyn OperationInvoker>,
        tracker.clone(),
        EngineConfig {
            concurrency: options.concurrency,
            ..EngineConfig::default()
        },
    );
    let plan = build_plan(&catalog, options.filter);
    info!(probes = plan.len(), "probe plan built");
    let run = engine.run(&plan, &ctx, &cancel).await?;

    let roles = if run.interrupted {
        None
    } else {
        AwsRoleDiscovery::new(Arc::clone(&invoker), catalog.escalation_policies.clone())
            .discover(&ctx)
            .await
    };

    let by_id: HashMap<String, ProbeOutcome> = run
        .rows
        .iter()
        .map(|row| (row.operation_id.clone(), row.clone()))
        .collect();
    let analyses: Vec<FlowAnalysis> = catalog
        .flows_with_priority(options.filter)
        .into_iter()
        .map(|flow| analyze_flow(flow, &by_id, roles.as_deref()))
        .collect();
    let recs = recommendations(&analyses);

    Ok(build_report(
        &catalog,
        &options.region,
        credential.masked_access_key(),
        identity,
        options.filter,
        run.interrupted,
        &run.rows,
        analyses,
        tracker.summary(),
        recs,
    ))
}
