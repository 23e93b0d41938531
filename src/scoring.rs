// Score aggregation and category banding

use crate::catalog::{CategoryBand, FlowSpec, OperationSpec};
use crate::models::ProbeOutcome;
use std::collections::HashMap;

/// Points one probe contributes: the full catalog weight when accessible,
/// nothing otherwise.
pub fn operation_score(op: &OperationSpec, accessible: bool) -> u32 {
    if accessible {
        op.weight
    } else {
        0
    }
}

/// Total over unique report rows. Rows are already deduplicated by the
/// engine, so this is a plain sum of the stamped scores.
pub fn total_score(rows: &[ProbeOutcome]) -> u32 {
    rows.iter().map(|row| row.score).sum()
}

/// Sum of the accessible operations inside one flow.
pub fn flow_score(flow: &FlowSpec, rows: &HashMap<String, ProbeOutcome>) -> u32 {
    flow.operations
        .iter()
        .filter_map(|id| rows.get(id))
        .filter(|row| row.accessible)
        .map(|row| row.score)
        .sum()
}

/// First band whose threshold the total reaches, scanning top-down. The
/// catalog guarantees a zero floor, so the fallback only covers an empty
/// table that validation would have rejected.
pub fn category_for(bands: &[CategoryBand], total: u32) -> &str {
    bands
        .iter()
        .find(|band| total >= band.min_score)
        .map(|band| band.label.as_str())
        .unwrap_or("minimal")
}
