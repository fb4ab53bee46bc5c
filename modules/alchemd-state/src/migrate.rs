use std::collections::HashMap;

use alchemd_common::StateError;
use neo4rs::query;
use tracing::info;

use crate::GraphClient;

/// Uniqueness constraints the store relies on: (name, label, property).
/// Scoped keys are unique across all domain objects; identity identifiers
/// are unique per identity label.
const CONSTRAINTS: [(&str, &str, &str); 3] = [
    ("scoped_key", "GufeTokenizable", "_scoped_key"),
    ("user_identifier", "UserIdentity", "identifier"),
    ("compute_identifier", "ComputeIdentity", "identifier"),
];

/// Declare uniqueness constraints and the `NOPE` sentinel node.
/// Idempotent; must run against any database before the store is used.
pub async fn initialize(client: &GraphClient) -> Result<(), StateError> {
    let g = &client.graph;

    for (name, label, property) in CONSTRAINTS {
        g.run(query(&format!(
            "CREATE CONSTRAINT {name} IF NOT EXISTS FOR (n:{label}) REQUIRE n.{property} IS UNIQUE"
        )))
        .await?;
    }

    // sentinel guarding against engine node-id reuse after wipes
    g.run(query("MERGE (:NOPE)")).await?;

    info!("state store schema initialized");
    Ok(())
}

/// Verify that every expected constraint exists with the expected shape and
/// that the sentinel node is present.
pub async fn check(client: &GraphClient) -> Result<(), StateError> {
    let mut found: HashMap<String, (Vec<String>, Vec<String>)> = HashMap::new();

    let mut stream = client.graph.execute(query("SHOW CONSTRAINTS")).await?;
    while let Some(row) = stream.next().await? {
        let name: String = row.get("name")?;
        let labels: Vec<String> = row.get("labelsOrTypes")?;
        let properties: Vec<String> = row.get("properties")?;
        found.insert(name, (labels, properties));
    }

    if found.len() != CONSTRAINTS.len() {
        return Err(StateError::Storage(format!(
            "expected {} constraints, database has {}",
            CONSTRAINTS.len(),
            found.len()
        )));
    }

    for (name, label, property) in CONSTRAINTS {
        match found.get(name) {
            Some((labels, properties))
                if labels[..] == [label.to_string()]
                    && properties[..] == [property.to_string()] => {}
            _ => {
                return Err(StateError::Storage(format!(
                    "constraint {name} is missing or does not have the expected shape"
                )));
            }
        }
    }

    let mut stream = client
        .graph
        .execute(query("MATCH (n:NOPE) RETURN count(n) AS count"))
        .await?;
    let sentinels = match stream.next().await? {
        Some(row) => row.get::<i64>("count")?,
        None => 0,
    };
    if sentinels < 1 {
        return Err(StateError::Storage("sentinel node is missing".to_string()));
    }

    Ok(())
}

/// Remove all data and constraints; undoes `initialize`. The sentinel node
/// is kept so the engine never hands its id out again.
pub async fn reset(client: &GraphClient) -> Result<(), StateError> {
    let g = &client.graph;

    g.run(query("MATCH (n) WHERE NOT n:NOPE DETACH DELETE n"))
        .await?;

    for (name, _, _) in CONSTRAINTS {
        g.run(query(&format!("DROP CONSTRAINT {name} IF EXISTS")))
            .await?;
    }

    info!("state store reset");
    Ok(())
}
