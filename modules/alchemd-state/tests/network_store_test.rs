//! Integration tests for network storage: round-trips, idempotent
//! submission, sub-object sharing, deletion semantics, and queries.
//!
//! Requirements: Docker (for Neo4j via testcontainers)
//!
//! Run with: cargo test -p alchemd-state --features test-utils --test network_store_test

#![cfg(feature = "test-utils")]

mod common;

use alchemd_common::{AlchemicalNetwork, GufeObject, Scope, StateError, Tokenizable};
use alchemd_state::migrate;
use common::*;

#[tokio::test]
async fn network_round_trip() {
    let (_container, store) = setup().await;
    let network = benchmark_network();

    let sk = store
        .create_network(&network, &test_scope())
        .await
        .expect("create_network failed");
    assert_eq!(sk.class_name(), "AlchemicalNetwork");
    assert_eq!(sk.scope(), test_scope());

    let loaded: AlchemicalNetwork = store
        .get_gufe(&sk)
        .await
        .expect("network not found")
        .try_into()
        .expect("wrong class");

    assert_eq!(loaded.name, "tyk2_relative_benchmark");
    assert_eq!(loaded, network);

    // re-encoding the loaded object lands on the original scoped key
    let resolved = store
        .get_scoped_key(&GufeObject::Network(loaded), &test_scope())
        .await
        .expect("resolve failed");
    assert_eq!(resolved, sk);
}

#[tokio::test]
async fn idempotent_network_creation() {
    let (_container, store) = setup().await;
    let network = benchmark_network();

    let sk = store.create_network(&network, &test_scope()).await.unwrap();
    let sk2 = store.create_network(&network, &test_scope()).await.unwrap();
    assert_eq!(sk2, sk);
    assert_eq!(node_count(&store, "AlchemicalNetwork").await, 1);

    // one fewer edge is different content, hence a different key
    let smaller = benchmark_subnetwork();
    let sk3 = store.create_network(&smaller, &test_scope()).await.unwrap();
    assert_ne!(sk3, sk);
    assert_eq!(node_count(&store, "AlchemicalNetwork").await, 2);
}

#[tokio::test]
async fn shared_subobjects_are_stored_once() {
    let (_container, store) = setup().await;
    let network = benchmark_network();
    let smaller = benchmark_subnetwork();

    store.create_network(&network, &test_scope()).await.unwrap();
    store.create_network(&smaller, &test_scope()).await.unwrap();

    // the subnetwork shares its two transformations and all systems with
    // the full network
    assert_eq!(node_count(&store, "Transformation").await, 3);
    assert_eq!(node_count(&store, "ChemicalSystem").await, 4);
}

#[tokio::test]
async fn delete_network_leaves_members_intact() {
    let (_container, store) = setup().await;
    let scope = test_scope();
    let network = benchmark_network();
    let smaller = benchmark_subnetwork();

    let sk = store.create_network(&network, &scope).await.unwrap();
    let sk_small = store.create_network(&smaller, &scope).await.unwrap();
    store.create_taskhub(&sk).await.unwrap();

    store.delete_network(&sk).await.unwrap();

    assert_eq!(node_count(&store, "AlchemicalNetwork").await, 1);
    assert_eq!(node_count(&store, "TaskHub").await, 0);
    // shared members survive the deletion
    assert_eq!(node_count(&store, "Transformation").await, 3);
    assert_eq!(node_count(&store, "ChemicalSystem").await, 4);

    // and the remaining network still reconstructs fully
    let remaining: AlchemicalNetwork = store
        .get_gufe(&sk_small)
        .await
        .unwrap()
        .try_into()
        .unwrap();
    assert_eq!(remaining, smaller);
}

#[tokio::test]
async fn query_networks_by_name_key_and_scope() {
    let (_container, store) = setup().await;
    let scope = test_scope();
    let network = benchmark_network();
    let smaller = benchmark_subnetwork();

    let sk = store.create_network(&network, &scope).await.unwrap();
    let sk_small = store.create_network(&smaller, &scope).await.unwrap();

    let all = store
        .query_networks(None, None, &Scope::wildcard())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.contains(&sk) && all.contains(&sk_small));

    let by_name = store
        .query_networks(Some("tyk2_relative_benchmark"), None, &Scope::wildcard())
        .await
        .unwrap();
    assert_eq!(by_name, vec![sk.clone()]);

    let key = network.gufe_key();
    let by_key = store
        .query_networks(None, Some(&key), &scope)
        .await
        .unwrap();
    assert_eq!(by_key, vec![sk.clone()]);

    let elsewhere: Scope = "elsewhere-*-*".parse().unwrap();
    assert!(store
        .query_networks(None, None, &elsewhere)
        .await
        .unwrap()
        .is_empty());

    let transformations = store
        .query_transformations(None, None, &scope)
        .await
        .unwrap();
    assert_eq!(transformations.len(), 3);
    let systems = store
        .query_chemicalsystems(None, None, &scope)
        .await
        .unwrap();
    assert_eq!(systems.len(), 4);

    let (found_sk, found) = store
        .query_networks_gufe(Some("tyk2_relative_benchmark"), None, &scope)
        .await
        .unwrap()
        .pop()
        .expect("network not returned");
    assert_eq!(found_sk, sk);
    assert_eq!(found, network);
}

#[tokio::test]
async fn get_scoped_key_not_found() {
    let (_container, store) = setup().await;
    let network = benchmark_network();

    let err = store
        .get_scoped_key(&GufeObject::Network(network), &test_scope())
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::NotFound(_)));
}

#[tokio::test]
async fn initialize_check_reset() {
    let (_container, store) = setup().await;

    // initialize is idempotent
    migrate::initialize(store.client()).await.unwrap();
    migrate::check(store.client()).await.unwrap();

    store
        .create_network(&benchmark_network(), &test_scope())
        .await
        .unwrap();

    migrate::reset(store.client()).await.unwrap();
    assert_eq!(node_count(&store, "AlchemicalNetwork").await, 0);
    // the sentinel survives a reset, the constraints do not
    assert_eq!(node_count(&store, "NOPE").await, 1);
    assert!(migrate::check(store.client()).await.is_err());

    migrate::initialize(store.client()).await.unwrap();
    migrate::check(store.client()).await.unwrap();
}
