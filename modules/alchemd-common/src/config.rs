use std::env;

/// State store configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j (bolt protocol via neo4rs driver)
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub neo4j_dbname: String,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            neo4j_uri: required_env("NEO4J_URI"),
            neo4j_user: required_env("NEO4J_USER"),
            neo4j_password: required_env("NEO4J_PASSWORD"),
            neo4j_dbname: env::var("NEO4J_DBNAME").unwrap_or_else(|_| "neo4j".to_string()),
        }
    }

    /// Log each configured value without leaking credentials.
    pub fn log_redacted(&self) {
        let vars = [
            ("NEO4J_URI", &self.neo4j_uri),
            ("NEO4J_USER", &self.neo4j_user),
            ("NEO4J_PASSWORD", &self.neo4j_password),
            ("NEO4J_DBNAME", &self.neo4j_dbname),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
