use overseer_core::Catalog;
use std::collections::BTreeMap;

/// A worker's live assignment as the master sees it. `dirty` is set on every
/// assignment mutation and cleared once the node's conf has been flushed to
/// its sync path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) assignment: BTreeMap<String, u32>,
    pub(crate) dirty: bool,
}

impl Node {
    // New nodes start dirty so the first flush pushes an (empty) conf down.
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            assignment: BTreeMap::new(),
            dirty: true,
        }
    }

    /// Signed-delta merge of one program's instance count. A count driven to
    /// zero or below removes the entry entirely. Always marks the node dirty,
    /// which lets the rebalancer issue independent take-away and give
    /// operations without a transaction.
    pub(crate) fn apply_delta(&mut self, program: &str, delta: i64) {
        let current = self.assignment.get(program).copied().unwrap_or(0) as i64;
        let next = current + delta;
        if next <= 0 {
            self.assignment.remove(program);
        } else {
            self.assignment.insert(program.to_owned(), next as u32);
        }
        self.dirty = true;
    }

    /// Recomputed on every call, never cached. Programs missing from the
    /// catalog (a transient state while a removal is in flight) count at the
    /// default weight.
    pub(crate) fn load(&self, catalog: &Catalog) -> f64 {
        self.assignment
            .iter()
            .map(|(name, count)| match catalog.get(name) {
                Some(def) => def.load_of(*count),
                None => *count as f64,
            })
            .sum()
    }

    #[allow(dead_code)]
    pub(crate) fn has(&self, program: &str) -> bool {
        self.assignment.contains_key(program)
    }

    pub(crate) fn get(&self, program: &str) -> Option<u32> {
        self.assignment.get(program).copied()
    }
}
