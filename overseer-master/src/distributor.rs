use crate::node::Node;

use anyhow::{anyhow, Result};
use overseer_core::Catalog;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::{BTreeMap, VecDeque};

#[cfg(test)]
#[path = "distributor_test.rs"]
mod distributor_test;

// Tolerance for float load comparisons; loads are small sums of products.
const EPS: f64 = 1e-9;

/// The rebalancing engine. Owns the node collection; the catalog stays with
/// the reconciliation loop and is passed by reference into every operation, so
/// weight and command lookups always hit the single source of truth.
///
/// Placement is a greedy heuristic, not an optimal partition. The only
/// nondeterminism is the random tail assignment in [`Distributor::distribute_conf`],
/// which goes through the injected RNG so tests can seed it.
#[derive(Debug)]
pub(crate) struct Distributor {
    nodes: Vec<Node>,
    rng: StdRng,
}

impl Distributor {
    pub(crate) fn new() -> Self {
        Distributor {
            nodes: Vec::new(),
            rng: StdRng::from_os_rng(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_rng_seed(seed: u64) -> Self {
        Distributor {
            nodes: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }

    pub(crate) fn has_node(&self, name: &str) -> bool {
        self.nodes.iter().any(|node| node.name == name)
    }

    /// Register a node with an empty assignment. Returns false when the name
    /// is already present (TTL renewals re-deliver registration events).
    pub(crate) fn add_node(&mut self, name: &str) -> bool {
        if self.has_node(name) {
            return false;
        }
        self.nodes.push(Node::new(name));
        true
    }

    /// Detach a node, handing back its last-known assignment.
    pub(crate) fn remove_node(&mut self, name: &str) -> Option<Node> {
        let idx = self.nodes.iter().position(|node| node.name == name)?;
        Some(self.nodes.remove(idx))
    }

    /// Place a program's full declared instance count on the least-loaded
    /// node. No placement history is consulted.
    pub(crate) fn add_program(&mut self, name: &str, catalog: &Catalog) {
        let Some(def) = catalog.get(name) else {
            return;
        };
        if def.numprocs == 0 {
            return;
        }
        if let Some(idx) = self.least_loaded_index(catalog) {
            self.nodes[idx].apply_delta(name, def.numprocs as i64);
        }
    }

    /// Remove a program from every node that carries it.
    pub(crate) fn remove_program(&mut self, name: &str) {
        for node in &mut self.nodes {
            if let Some(count) = node.get(name) {
                node.apply_delta(name, -(count as i64));
            }
        }
    }

    /// Add `by` instances on the least-loaded node overall, whether or not it
    /// already carries the program.
    pub(crate) fn increase_procs(&mut self, name: &str, by: u32, catalog: &Catalog) -> bool {
        if by == 0 || !catalog.contains(name) {
            return false;
        }
        match self.least_loaded_index(catalog) {
            Some(idx) => {
                self.nodes[idx].apply_delta(name, by as i64);
                true
            }
            None => false,
        }
    }

    /// Walk carrying nodes in iteration order, decrementing until `by`
    /// instances are gone or none remain. Decrementing past exhaustion is a
    /// no-op, not an error.
    pub(crate) fn decrease_procs(&mut self, name: &str, by: u32) {
        let mut remaining = by;
        for node in &mut self.nodes {
            if remaining == 0 {
                break;
            }
            if let Some(count) = node.get(name) {
                let take = count.min(remaining);
                node.apply_delta(name, -(take as i64));
                remaining -= take;
            }
        }
    }

    /// Global rebalance toward the mean load. Runs against a scratch copy of
    /// the node set and commits by swap, so a failed pass leaves the prior
    /// assignment untouched.
    pub(crate) fn distribute(&mut self, catalog: &Catalog) -> Result<()> {
        if self.nodes.is_empty() {
            return Ok(());
        }
        let mut scratch = self.nodes.clone();
        Self::rebalance(&mut scratch, catalog)?;
        self.nodes = scratch;
        Ok(())
    }

    fn rebalance(nodes: &mut [Node], catalog: &Catalog) -> Result<()> {
        let total: f64 = nodes.iter().map(|node| node.load(catalog)).sum();
        let mean = total / nodes.len() as f64;

        // Alternating ceiling/floor keeps cumulative rounding drift within one
        // unit of load across the whole node set.
        let mut round_up = true;
        let assignable: Vec<i64> = nodes
            .iter()
            .map(|node| toggle_round(mean - node.load(catalog), &mut round_up))
            .collect();

        let mut busy: Vec<(usize, f64)> = assignable
            .iter()
            .enumerate()
            .filter(|(_, amount)| **amount < 0)
            .map(|(idx, amount)| (idx, -*amount as f64))
            .collect();
        busy.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut lazy: Vec<(usize, f64)> = assignable
            .iter()
            .enumerate()
            .filter(|(_, amount)| **amount > 0)
            .map(|(idx, amount)| (idx, *amount as f64))
            .collect();
        lazy.sort_by(|a, b| b.1.total_cmp(&a.1));

        // Shed phase: strip excess off over-mean nodes into a pending pool.
        let mut pool: BTreeMap<String, u32> = BTreeMap::new();
        for (idx, excess) in busy {
            let mut excess = excess;
            for (name, count) in shed_from(&nodes[idx], catalog, &mut excess) {
                nodes[idx].apply_delta(&name, -(count as i64));
                *pool.entry(name).or_insert(0) += count;
            }
        }

        // Burden phase: pour the pool into under-mean nodes, largest deficit
        // first, splitting programs across nodes when a full pending count
        // does not fit.
        let mut lazy_idx = 0;
        for (name, mut pending) in pool {
            let weight = weight_of(catalog, &name);
            while pending > 0 {
                let Some((node_idx, deficit)) = lazy.get_mut(lazy_idx) else {
                    return Err(anyhow!(
                        "rebalance shed more load than the under-mean nodes can absorb: \
                         {} instances of '{}' unplaced",
                        pending,
                        name
                    ));
                };
                let full = pending as f64 * weight;
                if full <= *deficit + EPS {
                    nodes[*node_idx].apply_delta(&name, pending as i64);
                    *deficit -= full;
                    pending = 0;
                    if *deficit <= EPS {
                        lazy_idx += 1;
                    }
                } else {
                    let fit = (((*deficit + EPS) / weight).floor() as u32).min(pending);
                    if fit > 0 {
                        nodes[*node_idx].apply_delta(&name, fit as i64);
                        *deficit -= fit as f64 * weight;
                        pending -= fit;
                    }
                    lazy_idx += 1;
                }
            }
        }
        Ok(())
    }

    /// Bulk placement of a program set with no prior assignment, used at
    /// bootstrap and when reabsorbing a departed node's load. Fills one bucket
    /// per node up to a toggle-rounded share of the mean, splitting programs
    /// that would overshoot; residual instances land on uniformly random
    /// nodes.
    pub(crate) fn distribute_conf(
        &mut self,
        programs: Vec<(String, u32)>,
        catalog: &Catalog,
    ) -> Result<()> {
        let mut programs: Vec<(String, u32)> =
            programs.into_iter().filter(|(_, count)| *count > 0).collect();
        if programs.is_empty() {
            return Ok(());
        }
        if self.nodes.is_empty() {
            return Err(anyhow!("no nodes available for bulk placement"));
        }

        let node_count = self.nodes.len();
        let total: f64 = programs
            .iter()
            .map(|(name, count)| weight_of(catalog, name) * *count as f64)
            .sum();
        let mean = total / node_count as f64;

        programs.sort_by(|a, b| {
            let load_a = weight_of(catalog, &a.0) * a.1 as f64;
            let load_b = weight_of(catalog, &b.0) * b.1 as f64;
            load_b.total_cmp(&load_a)
        });
        let mut pool: VecDeque<(String, u32)> = programs.into();

        let mut round_up = true;
        for bucket in 0..node_count {
            let threshold = toggle_round(mean, &mut round_up) as f64;
            let mut filled = 0.0;
            while let Some((name, count)) = pool.front().cloned() {
                let weight = weight_of(catalog, &name);
                let whole = count as f64 * weight;
                if filled + whole <= threshold + EPS {
                    self.nodes[bucket].apply_delta(&name, count as i64);
                    filled += whole;
                    pool.pop_front();
                } else {
                    // Split: place the instances that fit, the remainder goes
                    // to later buckets.
                    let fit = ((((threshold - filled) + EPS) / weight).floor() as u32).min(count);
                    if fit > 0 {
                        self.nodes[bucket].apply_delta(&name, fit as i64);
                        if let Some(front) = pool.front_mut() {
                            front.1 = count - fit;
                        }
                    }
                    break;
                }
            }
        }

        // Residual fractional mismatch: scatter leftovers uniformly.
        while let Some((name, count)) = pool.pop_front() {
            for _ in 0..count {
                let idx = self.rng.random_range(0..node_count);
                self.nodes[idx].apply_delta(&name, 1);
            }
        }
        Ok(())
    }

    /// Feed unplaced instances back through bulk placement, ahead of the
    /// follow-up [`Distributor::distribute`]. The counts are typically a
    /// departed node's last-known assignment or a declared-vs-live gap.
    pub(crate) fn reabsorb(
        &mut self,
        assignment: BTreeMap<String, u32>,
        catalog: &Catalog,
    ) -> Result<()> {
        self.distribute_conf(assignment.into_iter().collect(), catalog)
    }

    // Ties break toward the first node encountered.
    fn least_loaded_index(&self, catalog: &Catalog) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, node) in self.nodes.iter().enumerate() {
            let load = node.load(catalog);
            if best.map_or(true, |(_, lowest)| load < lowest) {
                best = Some((idx, load));
            }
        }
        best.map(|(idx, _)| idx)
    }
}

fn weight_of(catalog: &Catalog, name: &str) -> f64 {
    catalog.get(name).map_or(1.0, |def| def.weight)
}

// Rounds to the nearest integer when the value already is one; otherwise the
// toggle decides the direction and flips for the next fractional value.
fn toggle_round(value: f64, round_up: &mut bool) -> i64 {
    let nearest = value.round();
    if (value - nearest).abs() < EPS {
        return nearest as i64;
    }
    if *round_up {
        *round_up = false;
        value.ceil() as i64
    } else {
        *round_up = true;
        value.floor() as i64
    }
}

// Greedy descent over a node's programs, largest allocation first: take an
// allocation wholly when it fits the remaining excess, otherwise peel single
// instances when the node carries more than one and one instance's weight
// fits, otherwise skip to the next smaller allocation.
fn shed_from(node: &Node, catalog: &Catalog, excess: &mut f64) -> Vec<(String, u32)> {
    let mut programs: Vec<(String, u32, f64)> = node
        .assignment
        .iter()
        .map(|(name, count)| (name.clone(), *count, weight_of(catalog, name)))
        .collect();
    programs.sort_by(|a, b| (b.1 as f64 * b.2).total_cmp(&(a.1 as f64 * a.2)));

    let mut shed = Vec::new();
    for (name, count, weight) in programs {
        if *excess <= EPS {
            break;
        }
        let whole = count as f64 * weight;
        if whole <= *excess + EPS {
            *excess -= whole;
            shed.push((name, count));
        } else if count > 1 && weight <= *excess + EPS {
            let mut peeled = 0;
            while peeled < count && weight <= *excess + EPS {
                peeled += 1;
                *excess -= weight;
            }
            shed.push((name, peeled));
        }
    }
    shed
}
