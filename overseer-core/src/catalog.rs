use crate::program::ProgramDefinition;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Authoritative program name to definition mapping, independent of placement.
/// The single source of truth for weight and command lookups during
/// rebalancing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    programs: BTreeMap<String, ProgramDefinition>,
}

/// Program names added and removed between two catalog snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    pub fn upsert(&mut self, name: impl Into<String>, definition: ProgramDefinition) {
        self.programs.insert(name.into(), definition);
    }

    pub fn remove(&mut self, name: &str) -> Option<ProgramDefinition> {
        self.programs.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ProgramDefinition> {
        self.programs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ProgramDefinition)> {
        self.programs.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.programs.keys()
    }

    /// Program names present in `new` but not `old`, and vice versa. A program
    /// whose definition changed between the snapshots appears in both lists, so
    /// consumers handle it as remove-then-add and the new definition takes
    /// effect from scratch.
    pub fn delta(old: &Catalog, new: &Catalog) -> CatalogDelta {
        let added = new
            .programs
            .iter()
            .filter(|(name, def)| old.programs.get(*name) != Some(*def))
            .map(|(name, _)| name.clone())
            .collect();
        let removed = old
            .programs
            .iter()
            .filter(|(name, def)| new.programs.get(*name) != Some(*def))
            .map(|(name, _)| name.clone())
            .collect();
        CatalogDelta { added, removed }
    }

    /// Merge every definition from `other` into this catalog, replacing
    /// existing entries. Used to fold a new active set into the base set.
    pub fn merge(&mut self, other: &Catalog) {
        for (name, definition) in other.iter() {
            self.programs.insert(name.clone(), definition.clone());
        }
    }
}
