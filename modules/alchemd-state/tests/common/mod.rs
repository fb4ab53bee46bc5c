//! Shared fixtures for the integration suites: a real Neo4j container, an
//! initialized store, and a small relative-benchmark network.

#![allow(dead_code)]

use std::collections::BTreeMap;

use alchemd_common::{
    AlchemicalNetwork, ChemicalComponent, ChemicalSystem, GufeObject, Scope, ScopedKey,
    Transformation,
};
use alchemd_state::{migrate, query, StateStore};
use serde_json::json;

/// Spin up a fresh Neo4j container and run schema initialization.
pub async fn setup() -> (impl std::any::Any, StateStore) {
    let (container, client) = alchemd_state::testutil::neo4j_container().await;
    migrate::initialize(&client)
        .await
        .expect("initialization failed");
    (container, StateStore::new(client))
}

pub fn test_scope() -> Scope {
    Scope::new("org", "camp", "proj").expect("valid scope")
}

pub fn ligand_system(name: &str) -> ChemicalSystem {
    ChemicalSystem {
        name: name.to_string(),
        components: BTreeMap::from([
            (
                "ligand".to_string(),
                ChemicalComponent {
                    name: name.to_string(),
                    smiles: "c1ccc2ccccc2c1".to_string(),
                    charge: 0,
                },
            ),
            (
                "protein".to_string(),
                ChemicalComponent {
                    name: "tyk2".to_string(),
                    smiles: "".to_string(),
                    charge: -2,
                },
            ),
        ]),
        box_vectors: vec![4.0, 4.0, 4.0],
    }
}

pub fn relative_transformation(a: &ChemicalSystem, b: &ChemicalSystem) -> Transformation {
    Transformation {
        name: format!("{}_to_{}", a.name, b.name),
        state_a: a.clone(),
        state_b: b.clone(),
        mapping: json!({"atoms": [[0, 0], [1, 1], [2, 3]]}),
        settings: json!({"lambda_windows": 11, "sampler": "repex", "steps": 250000}),
    }
}

/// Four ligand states joined by three transformations, sharing the protein
/// component throughout.
pub fn benchmark_network() -> AlchemicalNetwork {
    let systems: Vec<ChemicalSystem> = (1..=4)
        .map(|i| ligand_system(&format!("lig_ejm_{i}")))
        .collect();
    let edges = systems
        .windows(2)
        .map(|pair| relative_transformation(&pair[0], &pair[1]))
        .collect();
    AlchemicalNetwork {
        name: "tyk2_relative_benchmark".to_string(),
        edges,
        nodes: systems,
    }
}

/// The benchmark network minus its last transformation.
pub fn benchmark_subnetwork() -> AlchemicalNetwork {
    let mut network = benchmark_network();
    network.edges.pop();
    network.name = "tyk2_relative_benchmark_-1".to_string();
    network
}

pub async fn node_count(store: &StateStore, label: &str) -> i64 {
    let q = query(&format!("MATCH (n:{label}) RETURN count(n) AS count"));
    let mut stream = store
        .client()
        .inner()
        .execute(q)
        .await
        .expect("count query failed");
    let row = stream
        .next()
        .await
        .expect("count stream failed")
        .expect("count query returned no row");
    row.get::<i64>("count").expect("count column missing")
}

pub async fn actions_count(store: &StateStore, hub: &ScopedKey) -> i64 {
    let q = query("MATCH (:TaskHub {_scoped_key: $sk})-[r:ACTIONS]->() RETURN count(r) AS count")
        .param("sk", hub.to_string());
    let mut stream = store
        .client()
        .inner()
        .execute(q)
        .await
        .expect("count query failed");
    let row = stream
        .next()
        .await
        .expect("count stream failed")
        .expect("count query returned no row");
    row.get::<i64>("count").expect("count column missing")
}

/// Resolve a transformation of an already-stored network to its scoped key.
pub async fn transformation_key(
    store: &StateStore,
    transformation: &Transformation,
    scope: &Scope,
) -> ScopedKey {
    store
        .get_scoped_key(&GufeObject::Transformation(transformation.clone()), scope)
        .await
        .expect("transformation not stored")
}
