// Operation catalog for keyreach
// Services, operations, flows, and score bands loaded from declarative TOML

use crate::error::{Result, ScanError};
use crate::models::{FlowPriority, OperationClass};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// Catalog compiled into the binary; `--catalog` overrides it at runtime.
const EMBEDDED_CATALOG: &str = include_str!("../data/catalog.toml");

/// AWS wire protocol family an operation is spoken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Protocol {
    #[serde(rename = "query")]
    Query,
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "rest-json")]
    RestJson,
    #[serde(rename = "rest-xml")]
    RestXml,
}

/// Per-service wire settings. The endpoint may carry a `{region}`
/// placeholder; IAM resolves globally without one.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSpec {
    pub protocol: Protocol,
    pub endpoint: String,
    pub signing_name: String,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub target_prefix: Option<String>,
}

/// One probeable operation. Exactly one wire shape is populated depending
/// on the owning service's protocol: `params` for query services, `body`
/// for JSON and REST-JSON, `method`/`path`/`query`/`body_text` for REST.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationSpec {
    pub id: String,
    pub service: String,
    pub action: String,
    pub weight: u32,
    pub class: OperationClass,
    pub description: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub body_text: Option<String>,
}

impl OperationSpec {
    /// Operation built in code rather than loaded from the catalog, for
    /// calls that sit outside the probe plan (identity probe, role
    /// discovery).
    pub fn synthetic_query(id: &str, service: &str, action: &str, params: &[(&str, &str)]) -> Self {
        Self {
            id: id.to_string(),
            service: service.to_string(),
            action: action.to_string(),
            weight: 0,
            class: OperationClass::Read,
            description: String::new(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: None,
            method: None,
            path: None,
            query: BTreeMap::new(),
            body_text: None,
        }
    }
}

/// Ordered group of operations that together enable one outcome.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowSpec {
    pub id: String,
    pub name: String,
    pub priority: FlowPriority,
    pub description: String,
    pub operations: Vec<String>,
    #[serde(default)]
    pub escalation_markers: Vec<String>,
}

/// Score band; the table is scanned top-down and the first band whose
/// `min_score` the total reaches wins.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryBand {
    pub min_score: u32,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    pub services: HashMap<String, ServiceSpec>,
    pub operations: Vec<OperationSpec>,
    pub flows: Vec<FlowSpec>,
    pub categories: Vec<CategoryBand>,
    #[serde(default)]
    pub escalation_policies: BTreeMap<String, u32>,
}

impl Catalog {
    pub fn embedded() -> Result<Self> {
        Self::from_toml_str(EMBEDDED_CATALOG)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let catalog: Catalog =
            toml::from_str(text).map_err(|e| ScanError::Catalog(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for op in &self.operations {
            if !ids.insert(op.id.as_str()) {
                return Err(ScanError::Catalog(format!("duplicate operation id {}", op.id)));
            }
            if op.weight > 100 {
                return Err(ScanError::Catalog(format!(
                    "operation {} weight {} exceeds 100",
                    op.id, op.weight
                )));
            }
            if !self.services.contains_key(&op.service) {
                return Err(ScanError::Catalog(format!(
                    "operation {} references unknown service {}",
                    op.id, op.service
                )));
            }
        }

        let mut flow_ids = HashSet::new();
        for flow in &self.flows {
            if !flow_ids.insert(flow.id.as_str()) {
                return Err(ScanError::Catalog(format!("duplicate flow id {}", flow.id)));
            }
            if flow.operations.is_empty() {
                return Err(ScanError::Catalog(format!("flow {} has no operations", flow.id)));
            }
            for op_id in &flow.operations {
                if !ids.contains(op_id.as_str()) {
                    return Err(ScanError::Catalog(format!(
                        "flow {} references unknown operation {}",
                        flow.id, op_id
                    )));
                }
            }
        }

        if self.categories.is_empty() {
            return Err(ScanError::Catalog("no score categories defined".to_string()));
        }
        for pair in self.categories.windows(2) {
            if pair[0].min_score <= pair[1].min_score {
                return Err(ScanError::Catalog(
                    "score categories must descend strictly".to_string(),
                ));
            }
        }
        if self.categories.last().map(|b| b.min_score) != Some(0) {
            return Err(ScanError::Catalog(
                "score categories must end with a zero floor".to_string(),
            ));
        }

        Ok(())
    }

    pub fn operation(&self, id: &str) -> Option<&OperationSpec> {
        self.operations.iter().find(|op| op.id == id)
    }

    pub fn service(&self, key: &str) -> Option<&ServiceSpec> {
        self.services.get(key)
    }

    /// Flows matching the priority filter, in declared order. No filter
    /// means every flow.
    pub fn flows_with_priority(&self, filter: Option<FlowPriority>) -> Vec<&FlowSpec> {
        self.flows
            .iter()
            .filter(|f| filter.map_or(true, |p| f.priority == p))
            .collect()
    }

    pub fn category_for(&self, score: u32) -> &str {
        crate::scoring::category_for(&self.categories, score)
    }
}
