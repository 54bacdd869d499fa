//! Workflow definitions and the immutable catalog
//!
//! Definitions are loaded once at startup and never mutated. Loading
//! validates the whole catalog: duplicate ids, empty step lists, and step
//! templates referencing undeclared parameters are load-time errors, so a
//! workflow that parses is guaranteed renderable once its parameters bind.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::template;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowCategory {
    Recon,
    Enumeration,
    VulnerabilityScan,
    Exploitation,
    PostExploitation,
    Web,
    Network,
}

impl WorkflowCategory {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "recon" => Some(Self::Recon),
            "enumeration" => Some(Self::Enumeration),
            "vulnerability_scan" => Some(Self::VulnerabilityScan),
            "exploitation" => Some(Self::Exploitation),
            "post_exploitation" => Some(Self::PostExploitation),
            "web" => Some(Self::Web),
            "network" => Some(Self::Network),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recon => "recon",
            Self::Enumeration => "enumeration",
            Self::VulnerabilityScan => "vulnerability_scan",
            Self::Exploitation => "exploitation",
            Self::PostExploitation => "post_exploitation",
            Self::Web => "web",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for WorkflowCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowDifficulty {
    Easy,
    Medium,
    Hard,
}

impl WorkflowDifficulty {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "easy" => Some(Self::Easy),
            "medium" => Some(Self::Medium),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

impl fmt::Display for WorkflowDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of a workflow: a command template plus failure policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub command_template: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(default)]
    pub continue_on_failure: bool,
}

/// A named, ordered sequence of parameterized command steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: WorkflowCategory,
    pub difficulty: WorkflowDifficulty,
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(default)]
    pub optional_params: Vec<String>,
    #[serde(default = "default_estimated_minutes")]
    pub estimated_time_minutes: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    pub steps: Vec<WorkflowStep>,
}

fn default_estimated_minutes() -> u32 {
    5
}

impl WorkflowDefinition {
    /// Union of declared parameter names
    pub fn declared_params(&self) -> BTreeSet<&str> {
        self.required_params
            .iter()
            .chain(self.optional_params.iter())
            .map(String::as_str)
            .collect()
    }

    /// Caller-facing summary without the command templates
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "category": self.category,
            "difficulty": self.difficulty,
            "required_params": self.required_params,
            "optional_params": self.optional_params,
            "estimated_time_minutes": self.estimated_time_minutes,
            "tags": self.tags,
            "steps": self.steps.iter().map(|step| serde_json::json!({
                "name": step.name,
                "description": step.description,
                "continue_on_failure": step.continue_on_failure,
            })).collect::<Vec<_>>(),
        })
    }
}

/// Filter for `list_workflows`; all criteria are conjunctive, tags match any
#[derive(Debug, Default, Clone)]
pub struct WorkflowFilter {
    pub category: Option<WorkflowCategory>,
    pub difficulty: Option<WorkflowDifficulty>,
    pub tags: Vec<String>,
}

impl WorkflowFilter {
    fn matches(&self, workflow: &WorkflowDefinition) -> bool {
        if let Some(category) = self.category {
            if workflow.category != category {
                return false;
            }
        }
        if let Some(difficulty) = self.difficulty {
            if workflow.difficulty != difficulty {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|tag| workflow.tags.contains(tag)) {
            return false;
        }
        true
    }
}

/// The immutable workflow catalog, validated at load time
#[derive(Debug, Clone)]
pub struct WorkflowCatalog {
    workflows: Vec<WorkflowDefinition>,
}

#[derive(Deserialize)]
struct CatalogFile {
    workflows: Vec<WorkflowDefinition>,
}

impl WorkflowCatalog {
    /// Parse and validate a YAML catalog document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(yaml)?;
        let catalog = Self {
            workflows: file.workflows,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// An empty catalog (tests and embedders that bring their own content)
    pub fn empty() -> Self {
        Self {
            workflows: Vec::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for workflow in &self.workflows {
            if workflow.id.trim().is_empty() {
                return Err(EngineError::Configuration(
                    "workflow with empty id".to_string(),
                ));
            }
            if !seen.insert(workflow.id.as_str()) {
                return Err(EngineError::Configuration(format!(
                    "duplicate workflow id '{}'",
                    workflow.id
                )));
            }
            if workflow.steps.is_empty() {
                return Err(EngineError::Configuration(format!(
                    "workflow '{}' has no steps",
                    workflow.id
                )));
            }

            let declared = workflow.declared_params();
            for step in &workflow.steps {
                for placeholder in template::placeholders(&step.command_template) {
                    if !declared.contains(placeholder.as_str()) {
                        return Err(EngineError::Configuration(format!(
                            "workflow '{}' step '{}' references undeclared parameter '{placeholder}'",
                            workflow.id, step.name
                        )));
                    }
                }
                for param in &step.required_params {
                    if !declared.contains(param.as_str()) {
                        return Err(EngineError::Configuration(format!(
                            "workflow '{}' step '{}' requires undeclared parameter '{param}'",
                            workflow.id, step.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&WorkflowDefinition> {
        self.workflows.iter().find(|w| w.id == id)
    }

    /// List workflows matching the filter; a pure function of filter and
    /// catalog, stable across calls.
    pub fn list(&self, filter: &WorkflowFilter) -> Vec<&WorkflowDefinition> {
        self.workflows.iter().filter(|w| filter.matches(w)).collect()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}
