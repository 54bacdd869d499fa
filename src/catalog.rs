//! Built-in workflow catalog

use std::path::Path;

use crate::error::Result;
use crate::workflow::WorkflowCatalog;

/// YAML source for the catalog shipped with the binary
const BUILTIN_CATALOG: &str = include_str!("../workflows.yaml");

/// Load the built-in catalog. Validated like any external catalog; a broken
/// embedded document is a startup error, not a latent runtime one.
pub fn builtin() -> Result<WorkflowCatalog> {
    WorkflowCatalog::from_yaml(BUILTIN_CATALOG)
}

/// Load a catalog from an external YAML file.
pub fn from_file(path: impl AsRef<Path>) -> Result<WorkflowCatalog> {
    let raw = std::fs::read_to_string(path)?;
    WorkflowCatalog::from_yaml(&raw)
}
