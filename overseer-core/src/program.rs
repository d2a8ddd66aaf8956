use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Option keys used for placement bookkeeping. They travel with the catalog in
/// the coordination store but are stripped from the rendition handed to the
/// process supervisor.
pub const RESERVED_KEYS: &[&str] = &["weight"];

/// Declared definition of one program. The name is the owning map key in
/// [`crate::Catalog`]; `numprocs` is the declared default instance count, not a
/// live per-node assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramDefinition {
    pub command: String,
    pub numprocs: u32,
    pub weight: f64,
    pub extra_options: BTreeMap<String, String>,
}

impl ProgramDefinition {
    pub fn new(command: impl Into<String>) -> Self {
        ProgramDefinition {
            command: command.into(),
            numprocs: 1,
            weight: 1.0,
            extra_options: BTreeMap::new(),
        }
    }

    /// Load contributed by `count` instances of this program.
    pub fn load_of(&self, count: u32) -> f64 {
        count as f64 * self.weight
    }

    /// Load of the full declared instance count.
    pub fn declared_load(&self) -> f64 {
        self.load_of(self.numprocs)
    }
}
