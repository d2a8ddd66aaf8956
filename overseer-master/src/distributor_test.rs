use super::*;
use overseer_core::ProgramDefinition;

fn definition(numprocs: u32, weight: f64) -> ProgramDefinition {
    let mut def = ProgramDefinition::new("sleep 1000");
    def.numprocs = numprocs;
    def.weight = weight;
    def
}

fn total_instances(distributor: &Distributor, program: &str) -> u32 {
    distributor
        .nodes()
        .iter()
        .map(|node| node.get(program).unwrap_or(0))
        .sum()
}

fn nodes_carrying(distributor: &Distributor, program: &str) -> usize {
    distributor
        .nodes()
        .iter()
        .filter(|node| node.has(program))
        .count()
}

/// Tests placement of a new program
/// Purpose: Validates that add_program picks the least-loaded node and breaks
///          ties toward the first node encountered
/// Expected: Full declared count lands on one node; an empty cluster tie goes
///           to the first registered node
#[test]
fn test_add_program_least_loaded() {
    let mut catalog = Catalog::new();
    catalog.upsert("alpha", definition(4, 1.0));
    catalog.upsert("beta", definition(2, 1.0));

    let mut distributor = Distributor::with_rng_seed(7);
    distributor.add_node("1001");
    distributor.add_node("1002");

    distributor.add_program("alpha", &catalog);
    assert_eq!(distributor.nodes()[0].get("alpha"), Some(4));

    // The second program goes to the now least-loaded node.
    distributor.add_program("beta", &catalog);
    assert_eq!(distributor.nodes()[1].get("beta"), Some(2));
}

/// Tests removal of a program from the whole cluster
/// Purpose: Validates remove_program strips every node carrying the program
/// Expected: No node carries the program afterwards, other programs untouched
#[test]
fn test_remove_program_everywhere() {
    let mut catalog = Catalog::new();
    catalog.upsert("alpha", definition(6, 1.0));
    catalog.upsert("beta", definition(1, 1.0));

    let mut distributor = Distributor::with_rng_seed(7);
    distributor.add_node("1001");
    distributor.add_node("1002");
    distributor
        .distribute_conf(
            vec![("alpha".to_string(), 6), ("beta".to_string(), 1)],
            &catalog,
        )
        .unwrap();
    assert!(nodes_carrying(&distributor, "alpha") >= 1);

    distributor.remove_program("alpha");
    assert_eq!(nodes_carrying(&distributor, "alpha"), 0);
    assert_eq!(total_instances(&distributor, "beta"), 1);
}

/// Tests manual scale-up of a program
/// Purpose: Validates increase_procs targets the least-loaded node overall
///          and rejects programs missing from the catalog
/// Expected: Instances land on the emptiest node; unknown program returns false
#[test]
fn test_increase_procs() {
    let mut catalog = Catalog::new();
    catalog.upsert("alpha", definition(4, 1.0));

    let mut distributor = Distributor::with_rng_seed(7);
    distributor.add_node("1001");
    distributor.add_node("1002");
    distributor.add_program("alpha", &catalog);

    assert!(distributor.increase_procs("alpha", 2, &catalog));
    assert_eq!(distributor.nodes()[1].get("alpha"), Some(2));
    assert_eq!(total_instances(&distributor, "alpha"), 6);

    assert!(!distributor.increase_procs("ghost", 1, &catalog));
}

/// Tests manual scale-down past exhaustion
/// Purpose: Validates decrease_procs walks carrying nodes in order and treats
///          over-decrementing as a no-op rather than an error
/// Expected: All instances removed, program absent everywhere, no panic
#[test]
fn test_decrease_procs_past_exhaustion() {
    let mut catalog = Catalog::new();
    catalog.upsert("alpha", definition(5, 1.0));

    let mut distributor = Distributor::with_rng_seed(7);
    distributor.add_node("1001");
    distributor.add_node("1002");
    distributor
        .distribute_conf(vec![("alpha".to_string(), 5)], &catalog)
        .unwrap();

    distributor.decrease_procs("alpha", 50);
    assert_eq!(total_instances(&distributor, "alpha"), 0);
    assert_eq!(nodes_carrying(&distributor, "alpha"), 0);
}

/// Tests the alternating rounding toggle
/// Purpose: Validates that cumulative rounding drift over a node set stays
///          within one unit of load
/// Expected: |sum(rounded) - sum(raw)| <= 1 for several load vectors
#[test]
fn test_toggle_round_drift_bound() {
    let load_vectors: Vec<Vec<f64>> = vec![
        vec![10.0, 4.0, 4.0],
        vec![1.0, 2.0, 2.0, 3.0, 5.0],
        vec![0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5],
        vec![7.25, 1.5, 3.75, 2.0],
    ];

    for loads in load_vectors {
        let mean: f64 = loads.iter().sum::<f64>() / loads.len() as f64;
        let mut round_up = true;
        let rounded_sum: i64 = loads
            .iter()
            .map(|load| toggle_round(mean - load, &mut round_up))
            .sum();
        let raw_sum: f64 = loads.iter().map(|load| mean - load).sum();
        assert!(
            (rounded_sum as f64 - raw_sum).abs() <= 1.0,
            "drift exceeded 1 for loads {:?}",
            loads
        );
    }
}

/// Tests the [10, 4, 4] rebalance scenario
/// Purpose: Validates the exact shed/burden outcome when assignable amounts
///          need no rounding
/// Expected: Assignables are [-4, +2, +2]; afterwards every node's load sits
///           in the [5, 7] band and total load is conserved
#[test]
fn test_distribute_ten_four_four() {
    let mut catalog = Catalog::new();
    catalog.upsert("heavy", definition(10, 1.0));
    catalog.upsert("mid", definition(4, 1.0));
    catalog.upsert("small", definition(4, 1.0));

    let mut distributor = Distributor::with_rng_seed(7);
    distributor.add_node("1001");
    distributor.add_node("1002");
    distributor.add_node("1003");
    distributor.nodes_mut().nth(0).unwrap().apply_delta("heavy", 10);
    distributor.nodes_mut().nth(1).unwrap().apply_delta("mid", 4);
    distributor.nodes_mut().nth(2).unwrap().apply_delta("small", 4);

    distributor.distribute(&catalog).unwrap();

    let loads: Vec<f64> = distributor
        .nodes()
        .iter()
        .map(|node| node.load(&catalog))
        .collect();
    assert_eq!(loads.iter().sum::<f64>(), 18.0);
    for load in loads {
        assert!((5.0..=7.0).contains(&load), "load {} outside band", load);
    }

    assert_eq!(total_instances(&distributor, "heavy"), 10);
    assert_eq!(total_instances(&distributor, "mid"), 4);
    assert_eq!(total_instances(&distributor, "small"), 4);
}

/// Tests rebalance after an idle node joins
/// Purpose: Validates that a single 8-instance program concentrated on one
///          node gets split once an idle node is available
/// Expected: The program spans at least 2 nodes and no instance is lost
#[test]
fn test_distribute_splits_onto_idle_node() {
    let mut catalog = Catalog::new();
    catalog.upsert("alpha", definition(8, 1.0));

    let mut distributor = Distributor::with_rng_seed(7);
    distributor.add_node("1001");
    distributor.nodes_mut().next().unwrap().apply_delta("alpha", 8);
    distributor.add_node("1002");
    distributor.add_node("1003");
    distributor.add_node("1004");

    distributor.distribute(&catalog).unwrap();

    assert!(nodes_carrying(&distributor, "alpha") >= 2);
    assert_eq!(total_instances(&distributor, "alpha"), 8);
}

/// Tests conservation across rebalances with weighted programs
/// Purpose: Validates that distribute() never creates or loses instances even
///          when weights make loads fractional
/// Expected: Per-program instance totals match the declared counts after
///           repeated rebalancing
#[test]
fn test_distribute_conserves_weighted_instances() {
    let mut catalog = Catalog::new();
    catalog.upsert("alpha", definition(7, 2.5));
    catalog.upsert("beta", definition(3, 1.0));
    catalog.upsert("gamma", definition(5, 0.5));

    let mut distributor = Distributor::with_rng_seed(42);
    distributor.add_node("1001");
    distributor.add_node("1002");
    distributor.add_node("1003");
    distributor.nodes_mut().nth(0).unwrap().apply_delta("alpha", 7);
    distributor.nodes_mut().nth(1).unwrap().apply_delta("beta", 3);
    distributor.nodes_mut().nth(2).unwrap().apply_delta("gamma", 5);

    for _ in 0..3 {
        distributor.distribute(&catalog).unwrap();
        assert_eq!(total_instances(&distributor, "alpha"), 7);
        assert_eq!(total_instances(&distributor, "beta"), 3);
        assert_eq!(total_instances(&distributor, "gamma"), 5);
    }
}

/// Tests the shed-phase skip rule
/// Purpose: Validates that a single-instance program too heavy to remove
///          wholly is skipped in favor of smaller allocations
/// Expected: The heavy singleton stays put, the lighter program moves
#[test]
fn test_shed_skips_unpeelable_singleton() {
    let mut catalog = Catalog::new();
    catalog.upsert("whale", definition(1, 5.0));
    catalog.upsert("minnow", definition(2, 1.0));

    let mut distributor = Distributor::with_rng_seed(7);
    distributor.add_node("1001");
    distributor.add_node("1002");
    distributor.add_node("1003");
    distributor.nodes_mut().next().unwrap().apply_delta("whale", 1);
    distributor.nodes_mut().next().unwrap().apply_delta("minnow", 2);

    distributor.distribute(&catalog).unwrap();

    assert_eq!(distributor.nodes()[0].get("whale"), Some(1));
    assert_eq!(distributor.nodes()[0].get("minnow"), None);
    assert_eq!(total_instances(&distributor, "minnow"), 2);
}

/// Tests bulk placement at bootstrap
/// Purpose: Validates distribute_conf covers every node bucket and conserves
///          instances, including the random tail assignment
/// Expected: All declared instances placed; per-node loads stay near the mean
#[test]
fn test_distribute_conf_bulk_placement() {
    let mut catalog = Catalog::new();
    catalog.upsert("alpha", definition(9, 1.0));
    catalog.upsert("beta", definition(4, 1.0));
    catalog.upsert("gamma", definition(2, 1.0));

    let mut distributor = Distributor::with_rng_seed(42);
    distributor.add_node("1001");
    distributor.add_node("1002");
    distributor.add_node("1003");
    distributor
        .distribute_conf(
            vec![
                ("alpha".to_string(), 9),
                ("beta".to_string(), 4),
                ("gamma".to_string(), 2),
            ],
            &catalog,
        )
        .unwrap();

    assert_eq!(total_instances(&distributor, "alpha"), 9);
    assert_eq!(total_instances(&distributor, "beta"), 4);
    assert_eq!(total_instances(&distributor, "gamma"), 2);

    // Mean is 5; buckets are toggle-rounded so no node should stray far.
    for node in distributor.nodes() {
        let load = node.load(&catalog);
        assert!((3.0..=7.0).contains(&load), "load {} too far from mean", load);
    }
}

/// Tests reabsorption of a departed node's assignment
/// Purpose: Validates the auto-redistribute path: a removed node's programs
///          are fed back through bulk placement onto the survivors
/// Expected: All 3 instances of the program reappear across the remaining
///           nodes, none lost
#[test]
fn test_reabsorb_departed_node() {
    let mut catalog = Catalog::new();
    catalog.upsert("orphan", definition(3, 1.0));

    let mut distributor = Distributor::with_rng_seed(42);
    distributor.add_node("1001");
    distributor.add_node("1002");
    distributor.add_node("1003");
    distributor.nodes_mut().next().unwrap().apply_delta("orphan", 3);

    let departed = distributor.remove_node("1001").unwrap();
    assert_eq!(distributor.nodes().len(), 2);

    distributor.reabsorb(departed.assignment, &catalog).unwrap();
    distributor.distribute(&catalog).unwrap();

    assert_eq!(total_instances(&distributor, "orphan"), 3);
}

/// Tests the burden-phase failure leaving the assignment untouched
/// Purpose: Validates that when shed instances are too heavy for any
///          under-mean node to absorb, distribute() errors and the prior
///          assignment survives intact
/// Expected: Err from distribute(); every node's assignment is exactly what
///          it was before the call
#[test]
fn test_distribute_unabsorbable_shed_fails_cleanly() {
    let mut catalog = Catalog::new();
    catalog.upsert("whale", definition(2, 5.0));

    let mut distributor = Distributor::with_rng_seed(7);
    distributor.add_node("1001");
    distributor.add_node("1002");
    distributor.add_node("1003");
    distributor.nodes_mut().next().unwrap().apply_delta("whale", 2);

    // Mean load is 10/3; one whale instance gets shed but at weight 5 it fits
    // no deficit, so the pass must fail.
    let before = distributor.nodes().to_vec();
    assert!(distributor.distribute(&catalog).is_err());
    assert_eq!(distributor.nodes(), &before[..]);
}

/// Tests distribute on an empty cluster
/// Purpose: Validates the degenerate cases do not divide by zero or error
/// Expected: Ok(()) with no nodes and with nodes but no assignment
#[test]
fn test_distribute_degenerate_cases() {
    let catalog = Catalog::new();
    let mut distributor = Distributor::with_rng_seed(7);
    distributor.distribute(&catalog).unwrap();

    distributor.add_node("1001");
    distributor.distribute(&catalog).unwrap();
    assert_eq!(distributor.nodes()[0].load(&catalog), 0.0);
}

/// Tests duplicate node registration
/// Purpose: Validates that a re-delivered registration event is a no-op
/// Expected: add_node returns false and the node's assignment is untouched
#[test]
fn test_add_node_idempotent() {
    let mut distributor = Distributor::with_rng_seed(7);
    assert!(distributor.add_node("1001"));
    distributor.nodes_mut().next().unwrap().apply_delta("alpha", 2);

    assert!(!distributor.add_node("1001"));
    assert_eq!(distributor.nodes()[0].get("alpha"), Some(2));
}
