//! Test utilities for spinning up a real Neo4j instance via testcontainers.

use testcontainers::{
    core::{ContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};

use crate::GraphClient;

pub const NEO4J_TEST_USER: &str = "neo4j";
pub const NEO4J_TEST_PASSWORD: &str = "testpassword";

/// Spin up a Neo4j 5 container and return the container handle + connected
/// GraphClient.
///
/// The container is dropped (and stopped) when `ContainerAsync` goes out of
/// scope, so callers must hold it alive for the duration of the test.
pub async fn neo4j_container() -> (ContainerAsync<GenericImage>, GraphClient) {
    let image = GenericImage::new("neo4j", "5")
        .with_exposed_port(ContainerPort::Tcp(7687))
        .with_wait_for(WaitFor::message_on_stdout("Started."));

    let container = image
        .with_env_var("NEO4J_AUTH", format!("{NEO4J_TEST_USER}/{NEO4J_TEST_PASSWORD}"))
        .start()
        .await
        .expect("Failed to start Neo4j container");

    let host_port = container
        .get_host_port_ipv4(7687)
        .await
        .expect("Failed to get Neo4j host port");

    let uri = format!("bolt://127.0.0.1:{host_port}");
    let client = GraphClient::connect(&uri, NEO4J_TEST_USER, NEO4J_TEST_PASSWORD, "neo4j")
        .await
        .expect("Failed to connect to Neo4j");

    (container, client)
}
