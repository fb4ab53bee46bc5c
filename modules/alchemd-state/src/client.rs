use alchemd_common::Config;
use neo4rs::{ConfigBuilder, Graph};

/// Connection handle to the graph database. Everything the store does goes
/// through the `neo4rs::Graph` held here; cloning shares the underlying
/// connection pool.
#[derive(Clone)]
pub struct GraphClient {
    pub(crate) graph: Graph,
}

impl GraphClient {
    /// Open a Bolt connection against the named database.
    pub async fn connect(
        uri: &str,
        user: &str,
        password: &str,
        db: &str,
    ) -> Result<Self, neo4rs::Error> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .db(db)
            .fetch_size(500)
            .max_connections(10)
            .build()?;
        let graph = Graph::connect(config).await?;
        Ok(Self { graph })
    }

    /// Connect using environment-derived configuration.
    pub async fn from_config(config: &Config) -> Result<Self, neo4rs::Error> {
        Self::connect(
            &config.neo4j_uri,
            &config.neo4j_user,
            &config.neo4j_password,
            &config.neo4j_dbname,
        )
        .await
    }

    /// Escape hatch to the raw driver, for callers that need to issue their
    /// own Cypher — the integration tests use this for node-count and edge
    /// assertions that the store API deliberately does not expose.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}
